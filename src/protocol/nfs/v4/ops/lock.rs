//! Byte-range lock operations: LOCK, LOCKT and LOCKU, over the lock table
//! shared with NLM.
//!
//! v4 owners enter the shared table as `v4:<clientid>:<hex>`, so an NLM
//! holder excludes a v4 locker on the same file and vice versa. Blocking
//! lock types answer DENIED like their plain variants — v4 clients poll,
//! they are not called back.

use tracing::debug;

use super::OpResult;
use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::nfs::v4::state::StateManager;
use crate::protocol::nfs::v4::pseudofs;
use crate::protocol::nfs::nlm::lockmgr::LockOutcome;
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs4::{
    locker4, nfsstat4, LOCK4args, LOCK4denied, LOCKT4args, LOCKU4args, lock_owner4,
};
use crate::protocol::xdr::Serialize;
use crate::store::LockRecord;

pub(super) async fn lock(
    args: &LOCK4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    if pseudofs::is_pseudo_handle(&fh) {
        return Err(nfsstat4::NFS4ERR_ROFS);
    }
    if end_of(args.offset, args.length).is_none() {
        return Err(nfsstat4::NFS4ERR_BAD_RANGE);
    }

    let in_grace = ctx.deps.state4.in_grace();
    if args.reclaim && !in_grace {
        return Err(nfsstat4::NFS4ERR_NO_GRACE);
    }
    if !args.reclaim && in_grace {
        return Err(nfsstat4::NFS4ERR_GRACE);
    }

    // Resolve the lock owner: first lock under an open mints a lock
    // stateid, later requests present it back.
    let (lock_stateid, owner_id) = match &args.locker {
        locker4::open_owner { open_stateid, lock_owner, .. } => {
            let client_id = match state.client_id {
                Some(id) => id,
                None => lock_owner.clientid,
            };
            // The open must exist and refer to this file.
            let open_handle = ctx.deps.state4.resolve_open(open_stateid, &fh)?;
            if open_handle != fh {
                return Err(nfsstat4::NFS4ERR_BAD_STATEID);
            }
            let stateid = ctx.deps.state4.lock_stateid(
                client_id,
                open_stateid.other,
                &fh,
                &lock_owner.owner,
            );
            let owner_id = StateManager::lock_owner_id(client_id, &lock_owner.owner);
            (stateid, owner_id)
        }
        locker4::lock_owner { lock_stateid, .. } => {
            let (owner_id, handle) = ctx
                .deps
                .state4
                .lookup_lock_state(lock_stateid)
                .ok_or_else(|| ctx.deps.state4.classify_unknown_stateid(lock_stateid))?;
            if handle != fh {
                return Err(nfsstat4::NFS4ERR_BAD_STATEID);
            }
            let stateid = ctx
                .deps
                .state4
                .bump_lock_state(lock_stateid)
                .ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
            (stateid, owner_id)
        }
    };

    let record = LockRecord {
        handle: fh.clone(),
        owner: owner_id,
        offset: args.offset,
        length: args.length,
        exclusive: args.locktype.is_write(),
        reclaim: args.reclaim,
    };
    debug!(xid = ctx.xid, owner = %record.owner, "lock4");

    match ctx.deps.locks.try_lock(record).await {
        LockOutcome::Granted => {
            state.current_stateid = lock_stateid;
            lock_stateid.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
            Ok(())
        }
        LockOutcome::Denied(holder) => {
            denied_body(&holder).serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
            Err(nfsstat4::NFS4ERR_DENIED)
        }
        LockOutcome::Blocked => Err(nfsstat4::NFS4ERR_DELAY),
    }
}

pub(super) async fn lockt(
    args: &LOCKT4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    if end_of(args.offset, args.length).is_none() {
        return Err(nfsstat4::NFS4ERR_BAD_RANGE);
    }
    let client_id = state.client_id.unwrap_or(args.owner.clientid);
    let probe = LockRecord {
        handle: fh,
        owner: StateManager::lock_owner_id(client_id, &args.owner.owner),
        offset: args.offset,
        length: args.length,
        exclusive: args.locktype.is_write(),
        reclaim: false,
    };
    match ctx.deps.locks.test(&probe).await {
        None => Ok(()),
        Some(holder) => {
            denied_body(&holder).serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
            Err(nfsstat4::NFS4ERR_DENIED)
        }
    }
}

pub(super) async fn locku(
    args: &LOCKU4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    let (owner_id, handle) = ctx
        .deps
        .state4
        .lookup_lock_state(&args.lock_stateid)
        .ok_or_else(|| ctx.deps.state4.classify_unknown_stateid(&args.lock_stateid))?;
    if handle != fh {
        return Err(nfsstat4::NFS4ERR_BAD_STATEID);
    }

    let record = LockRecord {
        handle: fh,
        owner: owner_id,
        offset: args.offset,
        length: args.length,
        exclusive: args.locktype.is_write(),
        reclaim: false,
    };
    ctx.deps.locks.unlock(&record).await;

    let stateid = ctx
        .deps
        .state4
        .bump_lock_state(&args.lock_stateid)
        .ok_or(nfsstat4::NFS4ERR_BAD_STATEID)?;
    state.current_stateid = stateid;
    debug!(xid = ctx.xid, "locku4");
    stateid.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

fn end_of(offset: u64, length: u64) -> Option<u64> {
    if length == 0 {
        Some(u64::MAX)
    } else {
        offset.checked_add(length)
    }
}

fn denied_body(holder: &LockRecord) -> LOCK4denied {
    LOCK4denied {
        offset: holder.offset,
        length: holder.length,
        locktype: if holder.exclusive {
            crate::protocol::xdr::nfs4::nfs_lock_type4::WRITE_LT
        } else {
            crate::protocol::xdr::nfs4::nfs_lock_type4::READ_LT
        },
        owner: lock_owner4 { clientid: 0, owner: holder.owner.clone().into_bytes() },
    }
}

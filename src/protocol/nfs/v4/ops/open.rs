//! Open-state lifecycle: OPEN, OPEN_CONFIRM, OPEN_DOWNGRADE, CLOSE and
//! DELEGRETURN.
//!
//! During the grace period only CLAIM_PREVIOUS reclaims are admitted; fresh
//! opens answer NFS4ERR_GRACE. An OPEN that conflicts with an outstanding
//! delegation first recalls it and asks the client to retry with DELAY.

use tracing::debug;

use super::{map_stat, OpResult};
use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::nfs::v4::pseudofs;
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs3::{filename3, sattr3};
use crate::protocol::xdr::nfs4::{
    change_info4, createhow4, nfsace4, nfsstat4, open_claim4, open_delegation4, openflag4,
    stateid4, utf8string, CLOSE4args, GET_DIR_DELEGATION4args, GET_DIR_DELEGATION4res_non_fatal,
    GET_DIR_DELEGATION4resok, OPEN4args, OPEN4resok, OPEN_CONFIRM4args, OPEN_DOWNGRADE4args,
    NOTIFY4_ADD_ENTRY, OPEN4_RESULT_CONFIRM, OPEN4_RESULT_LOCKTYPE_POSIX,
    OPEN4_SHARE_ACCESS_WRITE,
};
use crate::protocol::xdr::Serialize;
use crate::store::RawHandle;

pub(super) async fn open(
    args: &OPEN4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let client_id = match state.client_id {
        Some(id) => id,
        // v4.0 carries the client id inside the open owner.
        None => args.owner.clientid,
    };
    let write = args.share_access & OPEN4_SHARE_ACCESS_WRITE != 0;

    let (handle, cinfo) = match &args.claim {
        open_claim4::CLAIM_NULL(name) => {
            if ctx.deps.state4.in_grace() {
                return Err(nfsstat4::NFS4ERR_GRACE);
            }
            resolve_claim_null(args, name, state, ctx).await?
        }
        open_claim4::CLAIM_PREVIOUS(_delegate_type) => {
            if !ctx.deps.state4.in_grace() {
                return Err(nfsstat4::NFS4ERR_NO_GRACE);
            }
            (state.fh()?.clone(), change_info4::default())
        }
        open_claim4::CLAIM_FH => {
            if state.minor == 0 {
                return Err(nfsstat4::NFS4ERR_NOTSUPP);
            }
            (state.fh()?.clone(), change_info4::default())
        }
    };

    if pseudofs::is_pseudo_handle(&handle) {
        return Err(if write { nfsstat4::NFS4ERR_ROFS } else { nfsstat4::NFS4ERR_ISDIR });
    }

    // An outstanding conflicting delegation is recalled; the opener retries.
    let conflicts = ctx.deps.state4.conflicting_delegations(&handle, client_id, write);
    if !conflicts.is_empty() {
        ctx.deps.state4.recall_conflicting(&handle, client_id, write);
        return Err(nfsstat4::NFS4ERR_DELAY);
    }

    let stateid = ctx
        .deps
        .state4
        .open(client_id, args.owner.owner.clone(), &handle, args.share_access, state.minor >= 1)?;
    state.current_fh = Some(handle.clone());
    state.current_stateid = stateid;

    let mut rflags = OPEN4_RESULT_LOCKTYPE_POSIX;
    if state.minor == 0 && stateid.seqid == 1 {
        rflags |= OPEN4_RESULT_CONFIRM;
    }

    let delegation = if matches!(args.claim, open_claim4::CLAIM_NULL(_)) {
        match ctx.deps.state4.maybe_delegate(client_id, &handle, write) {
            Some(deleg_stateid) if write => {
                open_delegation4::WRITE(deleg_stateid, everyone_ace())
            }
            Some(deleg_stateid) => open_delegation4::READ(deleg_stateid, everyone_ace()),
            None => open_delegation4::NONE,
        }
    } else {
        open_delegation4::NONE
    };

    debug!(xid = ctx.xid, client_id, ?stateid, "open4");
    let res = OPEN4resok {
        stateid,
        cinfo,
        rflags,
        attrset: Vec::new(),
        delegation,
    };
    res.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

fn everyone_ace() -> nfsace4 {
    nfsace4 {
        acetype: 0,
        flag: 0,
        access_mask: 0,
        who: utf8string::from("EVERYONE@"),
    }
}

/// CLAIM_NULL: resolve (and possibly create) `name` under the current
/// directory handle.
async fn resolve_claim_null(
    args: &OPEN4args,
    name: &utf8string,
    state: &mut CompoundState,
    ctx: &RequestContext,
) -> Result<(RawHandle, change_info4), nfsstat4> {
    let dir = state.fh()?.clone();
    if pseudofs::is_pseudo_handle(&dir) {
        // Files cannot be opened (or created) inside the pseudo namespace.
        let fs = ctx.deps.state4.pseudofs();
        let node = fs.by_handle(&dir).ok_or(nfsstat4::NFS4ERR_STALE)?;
        let name = String::from_utf8_lossy(&name.0).into_owned();
        return match fs.lookup(node, &name) {
            Some(pseudofs::LookupResult::Export(handle)) => {
                Ok((handle, change_info4::default()))
            }
            Some(pseudofs::LookupResult::Pseudo(_)) => Err(nfsstat4::NFS4ERR_ISDIR),
            None => Err(nfsstat4::NFS4ERR_NOENT),
        };
    }

    let filename = filename3::from(name.0.as_slice());
    let before = dir_change(&dir, ctx).await;
    let store = &ctx.deps.stores.metadata;

    let mut created = false;
    let handle = match &args.openhow {
        openflag4::OPEN4_NOCREATE => store.lookup(&dir, &filename).await.map_err(map_stat)?,
        openflag4::OPEN4_CREATE(how) => {
            if matches!(store.capabilities(), crate::store::Capabilities::ReadOnly) {
                return Err(nfsstat4::NFS4ERR_ROFS);
            }
            match how {
                createhow4::UNCHECKED(attrs) => {
                    let sattr = settable_of(attrs);
                    match store.lookup(&dir, &filename).await {
                        Ok(existing) => existing,
                        Err(_) => {
                            created = true;
                            store
                                .create(&dir, &filename, sattr)
                                .await
                                .map_err(map_stat)?
                                .0
                        }
                    }
                }
                createhow4::GUARDED(attrs) => {
                    let sattr = settable_of(attrs);
                    if store.lookup(&dir, &filename).await.is_ok() {
                        return Err(nfsstat4::NFS4ERR_EXIST);
                    }
                    created = true;
                    store.create(&dir, &filename, sattr).await.map_err(map_stat)?.0
                }
                createhow4::EXCLUSIVE(verifier) => {
                    created = true;
                    store
                        .create_exclusive(&dir, &filename, *verifier)
                        .await
                        .map_err(map_stat)?
                        .0
                }
            }
        }
    };

    if created {
        let entry =
            crate::protocol::nfs::v4::delegation::encode_change_entry(NOTIFY4_ADD_ENTRY, &name.0);
        ctx.deps.state4.notify_dir_change(&dir, &entry);
    }
    let after = dir_change(&dir, ctx).await;
    Ok((handle, change_info4 { atomic: false, before, after }))
}

/// Best-effort settable attrs from an OPEN create; unsupported attributes
/// are ignored here (OPEN reports attrset accordingly empty).
fn settable_of(attrs: &crate::protocol::xdr::nfs4::fattr4) -> sattr3 {
    use crate::protocol::xdr::nfs3::set_mode3;
    use crate::protocol::xdr::nfs4::{bitmap_get, FATTR4_MODE};
    let mut sattr = sattr3::default();
    if bitmap_get(&attrs.attrmask, FATTR4_MODE) {
        // Mode is the first (and only) attribute this server accepts at
        // create time; it sits at the head of attr_vals.
        if attrs.attr_vals.len() >= 4 {
            let mode = u32::from_be_bytes([
                attrs.attr_vals[0],
                attrs.attr_vals[1],
                attrs.attr_vals[2],
                attrs.attr_vals[3],
            ]);
            sattr.mode = set_mode3::mode(mode & 0o7777);
        }
    }
    sattr
}

async fn dir_change(dir: &RawHandle, ctx: &RequestContext) -> u64 {
    match ctx.deps.stores.metadata.getattr(dir).await {
        Ok(attr) => (attr.mtime.seconds as u64) << 32 | attr.mtime.nseconds as u64,
        Err(_) => 0,
    }
}

pub(super) fn open_confirm(
    args: &OPEN_CONFIRM4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    if state.minor >= 1 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    let stateid = ctx.deps.state4.confirm_open(&args.open_stateid)?;
    state.current_stateid = stateid;
    stateid.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn open_downgrade(
    args: &OPEN_DOWNGRADE4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let stateid = ctx.deps.state4.downgrade_open(&args.open_stateid, args.share_access)?;
    state.current_stateid = stateid;
    stateid.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) async fn close(
    args: &CLOSE4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let stateid = ctx.deps.state4.close(&args.open_stateid)?;
    state.current_stateid = stateid4::special_zero();
    debug!(xid = ctx.xid, "close4");
    stateid.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn delegreturn(stateid: &stateid4, ctx: &RequestContext) -> OpResult {
    debug!(xid = ctx.xid, ?stateid, "delegreturn4");
    match ctx.deps.state4.delegreturn(stateid) {
        nfsstat4::NFS4_OK => Ok(()),
        status => Err(status),
    }
}

/// GET_DIR_DELEGATION: subscribe to change notifications for the current
/// directory. Denials are non-fatal — the op succeeds with GDD4_UNAVAIL.
pub(super) fn get_dir_delegation(
    args: &GET_DIR_DELEGATION4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    if state.minor == 0 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    let client_id = state.client_id.ok_or(nfsstat4::NFS4ERR_OP_NOT_IN_SESSION)?;
    let dir = state.fh()?.clone();

    // Pseudo directories only change on share reconfiguration; no
    // notification stream exists for them.
    let granted = if pseudofs::is_pseudo_handle(&dir) {
        None
    } else {
        ctx.deps.state4.grant_dir_delegation(
            client_id,
            &dir,
            args.gdda_notification_types.clone(),
        )
    };

    let res = match granted {
        Some(stateid) => {
            state.current_stateid = stateid;
            debug!(xid = ctx.xid, client_id, "get_dir_delegation4 granted");
            GET_DIR_DELEGATION4res_non_fatal::GDD4_OK(GET_DIR_DELEGATION4resok {
                gddr_cookieverf: ctx.deps.state4.server_verifier(),
                gddr_stateid: stateid,
                gddr_notification: args.gdda_notification_types.clone(),
                gddr_child_attributes: Vec::new(),
                gddr_dir_attributes: Vec::new(),
            })
        }
        None => {
            debug!(xid = ctx.xid, client_id, "get_dir_delegation4 unavailable");
            GET_DIR_DELEGATION4res_non_fatal::GDD4_UNAVAIL(false)
        }
    };
    res.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

//! Individual COMPOUND operation implementations.
//!
//! Each operation writes its own result body (everything after the per-op
//! status) into the scratch buffer and returns the status; the engine owns
//! the opcode/status framing and stop-at-first-error sequencing.

mod attr;
mod client;
mod fh;
mod io;
mod lock;
mod open;

pub use attr::{encode_attrs, ObjectInfo};

use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs3::nfsstat3;
use crate::protocol::xdr::nfs4::{nfs_argop4, nfsstat4};

/// Maps store-layer (v3-vocabulary) statuses onto v4.
pub(super) fn map_stat(stat: nfsstat3) -> nfsstat4 {
    match stat {
        nfsstat3::NFS3_OK => nfsstat4::NFS4_OK,
        nfsstat3::NFS3ERR_PERM => nfsstat4::NFS4ERR_PERM,
        nfsstat3::NFS3ERR_NOENT => nfsstat4::NFS4ERR_NOENT,
        nfsstat3::NFS3ERR_IO => nfsstat4::NFS4ERR_IO,
        nfsstat3::NFS3ERR_NXIO => nfsstat4::NFS4ERR_NOENT,
        nfsstat3::NFS3ERR_ACCES => nfsstat4::NFS4ERR_ACCESS,
        nfsstat3::NFS3ERR_EXIST => nfsstat4::NFS4ERR_EXIST,
        nfsstat3::NFS3ERR_XDEV => nfsstat4::NFS4ERR_XDEV,
        nfsstat3::NFS3ERR_NODEV => nfsstat4::NFS4ERR_NOENT,
        nfsstat3::NFS3ERR_NOTDIR => nfsstat4::NFS4ERR_NOTDIR,
        nfsstat3::NFS3ERR_ISDIR => nfsstat4::NFS4ERR_ISDIR,
        nfsstat3::NFS3ERR_INVAL => nfsstat4::NFS4ERR_INVAL,
        nfsstat3::NFS3ERR_FBIG => nfsstat4::NFS4ERR_FBIG,
        nfsstat3::NFS3ERR_NOSPC => nfsstat4::NFS4ERR_NOSPC,
        nfsstat3::NFS3ERR_ROFS => nfsstat4::NFS4ERR_ROFS,
        nfsstat3::NFS3ERR_MLINK => nfsstat4::NFS4ERR_MLINK,
        nfsstat3::NFS3ERR_NAMETOOLONG => nfsstat4::NFS4ERR_NAMETOOLONG,
        nfsstat3::NFS3ERR_NOTEMPTY => nfsstat4::NFS4ERR_NOTEMPTY,
        nfsstat3::NFS3ERR_DQUOT => nfsstat4::NFS4ERR_DQUOT,
        nfsstat3::NFS3ERR_STALE => nfsstat4::NFS4ERR_STALE,
        nfsstat3::NFS3ERR_REMOTE => nfsstat4::NFS4ERR_IO,
        nfsstat3::NFS3ERR_BADHANDLE => nfsstat4::NFS4ERR_BADHANDLE,
        nfsstat3::NFS3ERR_NOT_SYNC => nfsstat4::NFS4ERR_NOT_SAME,
        nfsstat3::NFS3ERR_BAD_COOKIE => nfsstat4::NFS4ERR_BAD_COOKIE,
        nfsstat3::NFS3ERR_NOTSUPP => nfsstat4::NFS4ERR_NOTSUPP,
        nfsstat3::NFS3ERR_TOOSMALL => nfsstat4::NFS4ERR_TOOSMALL,
        nfsstat3::NFS3ERR_SERVERFAULT => nfsstat4::NFS4ERR_SERVERFAULT,
        nfsstat3::NFS3ERR_BADTYPE => nfsstat4::NFS4ERR_BADTYPE,
        // Transient store pressure surfaces as DELAY on v4.
        nfsstat3::NFS3ERR_JUKEBOX => nfsstat4::NFS4ERR_DELAY,
    }
}

/// Runs one operation. The scratch buffer receives the result body.
pub async fn run(
    op: &nfs_argop4,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> nfsstat4 {
    let result = match op {
        nfs_argop4::PUTROOTFH | nfs_argop4::PUTPUBFH => fh::putrootfh(state, ctx),
        nfs_argop4::PUTFH(handle) => fh::putfh(handle, state),
        nfs_argop4::GETFH => fh::getfh(state, out),
        nfs_argop4::SAVEFH => fh::savefh(state),
        nfs_argop4::RESTOREFH => fh::restorefh(state),
        nfs_argop4::LOOKUP(name) => fh::lookup(name, state, ctx).await,
        nfs_argop4::LOOKUPP => fh::lookupp(state, ctx).await,
        nfs_argop4::GETATTR(bitmap) => attr::getattr(bitmap, state, ctx, out).await,
        nfs_argop4::SETATTR(stateid, attrs) => {
            attr::setattr(stateid, attrs, state, ctx, out).await
        }
        nfs_argop4::VERIFY(attrs) => attr::verify(attrs, state, ctx, true).await,
        nfs_argop4::NVERIFY(attrs) => attr::verify(attrs, state, ctx, false).await,
        nfs_argop4::ACCESS(mask) => attr::access(*mask, state, ctx, out).await,
        nfs_argop4::READDIR(args) => attr::readdir(args, state, ctx, out).await,
        nfs_argop4::READ(args) => io::read(args, state, ctx, out).await,
        nfs_argop4::WRITE(args) => io::write(args, state, ctx, out).await,
        nfs_argop4::COMMIT(args) => io::commit(args, state, ctx, out).await,
        nfs_argop4::OPEN(args) => open::open(args, state, ctx, out).await,
        nfs_argop4::OPEN_CONFIRM(args) => open::open_confirm(args, state, ctx, out),
        nfs_argop4::OPEN_DOWNGRADE(args) => open::open_downgrade(args, state, ctx, out),
        nfs_argop4::CLOSE(args) => open::close(args, state, ctx, out).await,
        nfs_argop4::DELEGRETURN(stateid) => open::delegreturn(stateid, ctx),
        nfs_argop4::GET_DIR_DELEGATION(args) => {
            open::get_dir_delegation(args, state, ctx, out)
        }
        nfs_argop4::LOCK(args) => lock::lock(args, state, ctx, out).await,
        nfs_argop4::LOCKT(args) => lock::lockt(args, state, ctx, out).await,
        nfs_argop4::LOCKU(args) => lock::locku(args, state, ctx, out).await,
        nfs_argop4::EXCHANGE_ID(args) => client::exchange_id(args, state, ctx, out),
        nfs_argop4::CREATE_SESSION(args) => client::create_session(args, state, ctx, out),
        nfs_argop4::BIND_CONN_TO_SESSION(args) => {
            client::bind_conn_to_session(args, state, ctx, out)
        }
        nfs_argop4::DESTROY_SESSION(id) => client::destroy_session(id, ctx),
        nfs_argop4::DESTROY_CLIENTID(id) => client::destroy_clientid(*id, ctx),
        nfs_argop4::SETCLIENTID(args) => client::setclientid(args, state, ctx, out),
        nfs_argop4::SETCLIENTID_CONFIRM(args) => client::setclientid_confirm(args, state, ctx),
        nfs_argop4::RENEW(client_id) => client::renew(*client_id, state, ctx),
        nfs_argop4::RECLAIM_COMPLETE(_one_fs) => client::reclaim_complete(state, ctx),
        // SEQUENCE is interpreted by the engine; reaching here means it was
        // not the first operation.
        nfs_argop4::SEQUENCE(_) => Err(nfsstat4::NFS4ERR_SEQUENCE_POS),
        nfs_argop4::ILLEGAL(_) => Err(nfsstat4::NFS4ERR_OP_ILLEGAL),
    };
    match result {
        Ok(()) => nfsstat4::NFS4_OK,
        Err(status) => status,
    }
}

/// Result alias used by all operation bodies.
pub(super) type OpResult = Result<(), nfsstat4>;

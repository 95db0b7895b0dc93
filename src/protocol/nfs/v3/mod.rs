//! NFSv3 procedure handlers (RFC 1813).
//!
//! All 22 procedures. Each handler decodes its arguments, bridges to the
//! metadata/content stores, and writes its own result body (status first).
//! Store failures become `NFS3ERR_*` codes in-band; nothing from the
//! transport layer leaks to the client. The handler layer is stateless
//! apart from the store handles carried in the request context.

use std::io::{Read, Write};

use num_traits::FromPrimitive;

use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{
    self, fattr3, filename3, nfs_fh3, nfsstat3, post_op_attr, pre_op_attr, wcc_data,
};
use crate::protocol::xdr::Serialize;

mod access;
mod commit;
mod create;
mod fsinfo;
mod fsstat;
mod getattr;
mod link;
mod lookup;
mod mkdir;
mod mknod;
mod null;
mod pathconf;
mod read;
mod readdir;
mod readdirplus;
mod readlink;
mod remove;
mod rename;
mod setattr;
mod symlink;
mod write;

use access::nfsproc3_access;
use commit::nfsproc3_commit;
use create::nfsproc3_create;
use fsinfo::nfsproc3_fsinfo;
use fsstat::nfsproc3_fsstat;
use getattr::nfsproc3_getattr;
use link::nfsproc3_link;
use lookup::nfsproc3_lookup;
use mkdir::nfsproc3_mkdir;
use mknod::nfsproc3_mknod;
use null::nfsproc3_null;
use pathconf::nfsproc3_pathconf;
use read::nfsproc3_read;
use readdir::nfsproc3_readdir;
use readdirplus::nfsproc3_readdirplus;
use readlink::nfsproc3_readlink;
use remove::nfsproc3_remove;
use rename::nfsproc3_rename;
use setattr::nfsproc3_setattr;
use symlink::nfsproc3_symlink;
use write::nfsproc3_write;

/// Routes one NFSv3 call to its procedure handler.
pub async fn handle(
    proc: u32,
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    use nfs3::NFSProgram::*;
    match nfs3::NFSProgram::from_u32(proc).unwrap_or(nfs3::NFSProgram::INVALID) {
        NFSPROC3_NULL => nfsproc3_null(output),
        NFSPROC3_GETATTR => nfsproc3_getattr(input, output, ctx).await,
        NFSPROC3_SETATTR => nfsproc3_setattr(input, output, ctx).await,
        NFSPROC3_LOOKUP => nfsproc3_lookup(input, output, ctx).await,
        NFSPROC3_ACCESS => nfsproc3_access(input, output, ctx).await,
        NFSPROC3_READLINK => nfsproc3_readlink(input, output, ctx).await,
        NFSPROC3_READ => nfsproc3_read(input, output, ctx).await,
        NFSPROC3_WRITE => nfsproc3_write(input, output, ctx).await,
        NFSPROC3_CREATE => nfsproc3_create(input, output, ctx).await,
        NFSPROC3_MKDIR => nfsproc3_mkdir(input, output, ctx).await,
        NFSPROC3_SYMLINK => nfsproc3_symlink(input, output, ctx).await,
        NFSPROC3_MKNOD => nfsproc3_mknod(input, output, ctx).await,
        NFSPROC3_REMOVE => nfsproc3_remove(input, output, ctx, false).await,
        NFSPROC3_RMDIR => nfsproc3_remove(input, output, ctx, true).await,
        NFSPROC3_RENAME => nfsproc3_rename(input, output, ctx).await,
        NFSPROC3_LINK => nfsproc3_link(input, output, ctx).await,
        NFSPROC3_READDIR => nfsproc3_readdir(input, output, ctx).await,
        NFSPROC3_READDIRPLUS => nfsproc3_readdirplus(input, output, ctx).await,
        NFSPROC3_FSSTAT => nfsproc3_fsstat(input, output, ctx).await,
        NFSPROC3_FSINFO => nfsproc3_fsinfo(input, output, ctx).await,
        NFSPROC3_PATHCONF => nfsproc3_pathconf(input, output, ctx).await,
        NFSPROC3_COMMIT => nfsproc3_commit(input, output, ctx).await,
        INVALID => Err(HandlerError::System(format!("v3 procedure {proc} routed past table"))),
    }
}

/// Post-operation attributes for `handle`, `Void` when the store cannot
/// produce them (the protocol allows omission everywhere they appear).
pub(crate) async fn post_op(ctx: &RequestContext, handle: &nfs_fh3) -> post_op_attr {
    match ctx.deps.stores.metadata.getattr(handle.raw()).await {
        Ok(attr) => post_op_attr::attributes(attr),
        Err(_) => post_op_attr::Void,
    }
}

/// Pre-operation attributes captured before a mutation.
pub(crate) async fn pre_op(ctx: &RequestContext, handle: &nfs_fh3) -> pre_op_attr {
    match ctx.deps.stores.metadata.getattr(handle.raw()).await {
        Ok(attr) => pre_op_attr::attributes(nfs3::wcc_attr {
            size: attr.size,
            mtime: attr.mtime,
            ctime: attr.ctime,
        }),
        Err(_) => pre_op_attr::Void,
    }
}

pub(crate) fn wcc(before: pre_op_attr, after: post_op_attr) -> wcc_data {
    wcc_data { before, after }
}

pub(crate) fn wcc_from(before: pre_op_attr, after: Option<fattr3>) -> wcc_data {
    wcc_data {
        before,
        after: match after {
            Some(attr) => post_op_attr::attributes(attr),
            None => post_op_attr::Void,
        },
    }
}

/// Writes `status` followed by `tail`, the uniform error-body shape for
/// procedures whose fault body is a single attribute/WCC field.
pub(crate) fn write_error<W: Write, T: Serialize>(
    output: &mut W,
    status: nfsstat3,
    tail: &T,
) -> HandlerResult {
    status.serialize(output)?;
    tail.serialize(output)?;
    Ok(())
}

/// Maps store read-only capability onto ROFS for mutating procedures.
pub(crate) fn require_writable(ctx: &RequestContext) -> Result<(), nfsstat3> {
    match ctx.deps.stores.metadata.capabilities() {
        crate::store::Capabilities::ReadWrite => Ok(()),
        crate::store::Capabilities::ReadOnly => Err(nfsstat3::NFS3ERR_ROFS),
    }
}

/// Shutdown-aware cancellation check for long-running handlers.
pub(crate) fn check_cancelled(ctx: &RequestContext) -> HandlerResult {
    if ctx.deps.shutdown.is_triggered() {
        Err(HandlerError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reports a successful directory mutation to any v4 directory-delegation
/// holders; the state manager's notifier batches the CB_NOTIFY traffic.
pub(crate) fn notify_change(ctx: &RequestContext, dir: &nfs_fh3, kind: u32, name: &filename3) {
    let entry =
        crate::protocol::nfs::v4::delegation::encode_change_entry(kind, name.as_ref());
    ctx.deps.state4.notify_dir_change(dir.raw(), &entry);
}

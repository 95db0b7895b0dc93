//! MKNOD procedure (RFC 1813 section 3.3.11): block/char devices, sockets
//! and FIFOs.

use std::io::Read;

use tracing::debug;

use super::{notify_change, post_op, pre_op, require_writable, wcc, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::dir::{mknoddata3, MKNOD3args};
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3, post_op_attr, post_op_fh3, specdata3};
use crate::protocol::xdr::nfs4::NOTIFY4_ADD_ENTRY;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_mknod(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<MKNOD3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_mknod");

    let before = pre_op(ctx, &args.dirops.dir).await;
    if let Err(stat) = require_writable(ctx) {
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }

    let (ftype, spec, attrs) = match args.what {
        mknoddata3::Device(ftype, data) => (ftype, data.spec, data.dev_attributes),
        mknoddata3::Pipe(ftype, attrs) => (ftype, specdata3::default(), attrs),
        mknoddata3::Other(_) => {
            let dir_after = post_op(ctx, &args.dirops.dir).await;
            return write_error(output, nfsstat3::NFS3ERR_BADTYPE, &wcc(before, dir_after));
        }
    };

    match ctx
        .deps
        .stores
        .metadata
        .mknod(args.dirops.dir.raw(), &args.dirops.name, ftype, spec, attrs)
        .await
    {
        Ok((handle, attr)) => {
            notify_change(ctx, &args.dirops.dir, NOTIFY4_ADD_ENTRY, &args.dirops.name);
            let dir_after = post_op(ctx, &args.dirops.dir).await;
            nfsstat3::NFS3_OK.serialize(output)?;
            post_op_fh3::handle(nfs_fh3 { data: handle }).serialize(output)?;
            post_op_attr::attributes(attr).serialize(output)?;
            wcc(before, dir_after).serialize(output)?;
            Ok(())
        }
        Err(stat) => {
            let dir_after = post_op(ctx, &args.dirops.dir).await;
            write_error(output, stat, &wcc(before, dir_after))
        }
    }
}

//! MKDIR procedure (RFC 1813 section 3.3.9).

use std::io::Read;

use tracing::debug;

use super::{notify_change, post_op, pre_op, require_writable, wcc, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::dir::MKDIR3args;
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3, post_op_attr, post_op_fh3};
use crate::protocol::xdr::nfs4::NOTIFY4_ADD_ENTRY;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_mkdir(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<MKDIR3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_mkdir");

    let before = pre_op(ctx, &args.dirops.dir).await;
    if let Err(stat) = require_writable(ctx) {
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }

    match ctx
        .deps
        .stores
        .metadata
        .mkdir(args.dirops.dir.raw(), &args.dirops.name, args.attributes)
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

//! LINK procedure (RFC 1813 section 3.3.15).

use std::io::Read;

use tracing::debug;

use super::{notify_change, post_op, pre_op, require_writable, wcc};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::file::LINK3args;
use crate::protocol::xdr::nfs3::{nfsstat3, post_op_attr};
use crate::protocol::xdr::nfs4::NOTIFY4_ADD_ENTRY;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_link(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<LINK3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_link");

    let dir_before = pre_op(ctx, &args.link.dir).await;
    if let Err(stat) = require_writable(ctx) {
        stat.serialize(output)?;
        post_op_attr::Void.serialize(output)?;
        wcc(dir_before, post_op_attr::Void).serialize(output)?;
        return Ok(());
    }

    let result = ctx
        .deps
        .stores
        .metadata
        .link(args.file.raw(), args.link.dir.raw(), &args.link.name)
        .await;

    let dir_after = post_op(ctx, &args.link.dir).await;
    match result {
        Ok(attr) => {
            notify_change(ctx, &args.link.dir, NOTIFY4_ADD_ENTRY, &args.link.name);
            nfsstat3::NFS3_OK.serialize(output)?;
            post_op_attr::attributes(attr).serialize(output)?;
        }
        Err(stat) => {
            stat.serialize(output)?;
            post_op(ctx, &args.file).await.serialize(output)?;
        }
    }
    wcc(dir_before, dir_after).serialize(output)?;
    Ok(())
}

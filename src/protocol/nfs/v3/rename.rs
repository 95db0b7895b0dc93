//! RENAME procedure (RFC 1813 section 3.3.14).

use std::io::Read;

use tracing::debug;

use super::{notify_change, post_op, pre_op, require_writable, wcc};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::dir::RENAME3args;
use crate::protocol::xdr::nfs3::{nfsstat3, post_op_attr};
use crate::protocol::xdr::nfs4::NOTIFY4_RENAME_ENTRY;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_rename(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<RENAME3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_rename");

    let from_before = pre_op(ctx, &args.from.dir).await;
    let to_before = pre_op(ctx, &args.to.dir).await;
    if let Err(stat) = require_writable(ctx) {
        stat.serialize(output)?;
        wcc(from_before, post_op_attr::Void).serialize(output)?;
        wcc(to_before, post_op_attr::Void).serialize(output)?;
        return Ok(());
    }

    let result = ctx
        .deps
        .stores
        .metadata
        .rename(args.from.dir.raw(), &args.from.name, args.to.dir.raw(), &args.to.name)
        .await;

    if result.is_ok() {
        notify_change(ctx, &args.from.dir, NOTIFY4_RENAME_ENTRY, &args.from.name);
        notify_change(ctx, &args.to.dir, NOTIFY4_RENAME_ENTRY, &args.to.name);
    }
    let from_after = post_op(ctx, &args.from.dir).await;
    let to_after = post_op(ctx, &args.to.dir).await;
    match result {
        Ok(()) => nfsstat3::NFS3_OK.serialize(output)?,
        Err(stat) => stat.serialize(output)?,
    }
    wcc(from_before, from_after).serialize(output)?;
    wcc(to_before, to_after).serialize(output)?;
    Ok(())
}

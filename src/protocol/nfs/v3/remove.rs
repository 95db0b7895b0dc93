//! REMOVE and RMDIR procedures (RFC 1813 sections 3.3.12, 3.3.13). The two
//! share argument and result shapes; only the store call differs.
//!
//! A successful removal also drops any advisory locks still recorded
//! against the removed object's handle.

use std::io::Read;

use tracing::debug;

use super::{notify_change, post_op, pre_op, require_writable, wcc, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{diropargs3, nfsstat3, post_op_attr};
use crate::protocol::xdr::nfs4::NOTIFY4_REMOVE_ENTRY;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_remove(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
    is_rmdir: bool,
) -> HandlerResult {
    let args = deserialize::<diropargs3>(input)?;
    debug!(xid = ctx.xid, ?args, is_rmdir, "nfsproc3_remove");

    let before = pre_op(ctx, &args.dir).await;
    if let Err(stat) = require_writable(ctx) {
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }

    let target = ctx.deps.stores.metadata.lookup(args.dir.raw(), &args.name).await.ok();

    let store = &ctx.deps.stores.metadata;
    let result = if is_rmdir {
        store.rmdir(args.dir.raw(), &args.name).await
    } else {
        store.remove(args.dir.raw(), &args.name).await
    };

    match result {
        Ok(()) => {
            if let Some(handle) = target {
                ctx.deps.locks.forget_file(&handle).await;
            }
            notify_change(ctx, &args.dir, NOTIFY4_REMOVE_ENTRY, &args.name);
            let dir_after = post_op(ctx, &args.dir).await;
            nfsstat3::NFS3_OK.serialize(output)?;
            wcc(before, dir_after).serialize(output)?;
            Ok(())
        }
        Err(stat) => {
            let dir_after = post_op(ctx, &args.dir).await;
            write_error(output, stat, &wcc(before, dir_after))
        }
    }
}

//! SETATTR procedure (RFC 1813 section 3.3.2), including the ctime guard.

use std::io::Read;

use tracing::debug;

use super::{pre_op, require_writable, wcc, wcc_from, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{nfsstat3, post_op_attr, sattrguard3, SETATTR3args};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_setattr(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<SETATTR3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_setattr");

    let before = pre_op(ctx, &args.object).await;
    if let Err(stat) = require_writable(ctx) {
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }

    // Guard: the client may pin the object's ctime to detect races.
    if let sattrguard3::obj_ctime(expected) = args.guard {
        match ctx.deps.stores.metadata.getattr(args.object.raw()).await {
            Ok(attr) if attr.ctime != expected => {
                return write_error(
                    output,
                    nfsstat3::NFS3ERR_NOT_SYNC,
                    &wcc(before, post_op_attr::attributes(attr)),
                );
            }
            Ok(_) => {}
            Err(stat) => return write_error(output, stat, &wcc(before, post_op_attr::Void)),
        }
    }

    match ctx.deps.stores.metadata.setattr(args.object.raw(), args.new_attributes).await {
        Ok(attr) => {
            nfsstat3::NFS3_OK.serialize(output)?;
            wcc_from(before, Some(attr)).serialize(output)?;
        }
        Err(stat) => {
            write_error(output, stat, &wcc(before, post_op_attr::Void))?;
        }
    }
    Ok(())
}

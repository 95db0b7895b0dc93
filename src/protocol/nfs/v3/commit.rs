//! COMMIT procedure (RFC 1813 section 3.3.21): flush unstable writes.

use std::io::Read;

use tracing::debug;

use super::{check_cancelled, pre_op, require_writable, wcc, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::file::{COMMIT3args, COMMIT3resok};
use crate::protocol::xdr::nfs3::{nfsstat3, post_op_attr};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_commit(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<COMMIT3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_commit");

    let before = pre_op(ctx, &args.file).await;
    if let Err(stat) = require_writable(ctx) {
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }
    check_cancelled(ctx)?;

    match ctx.deps.stores.content.commit(args.file.raw(), args.offset, args.count).await {
        Ok(attr) => {
            let res = COMMIT3resok {
                file_wcc: wcc(before, post_op_attr::attributes(attr)),
                verf: ctx.deps.write_verf,
            };
            nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &wcc(before, post_op_attr::Void)),
    }
}

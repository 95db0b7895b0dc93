//! WRITE procedure (RFC 1813 section 3.3.7).
//!
//! The verifier in the result is the adapter's boot verifier: clients use a
//! change of verifier to detect that unstable writes may have been lost
//! across a restart and must be re-sent.

use std::io::Read;

use tracing::debug;

use super::{check_cancelled, pre_op, require_writable, wcc, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::file::{WRITE3args, WRITE3resok};
use crate::protocol::xdr::nfs3::{nfsstat3, post_op_attr};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_write(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<WRITE3args>(input)?;
    debug!(
        xid = ctx.xid,
        file = ?args.file,
        offset = args.offset,
        count = args.count,
        "nfsproc3_write"
    );

    let before = pre_op(ctx, &args.file).await;
    if let Err(stat) = require_writable(ctx) {
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }
    check_cancelled(ctx)?;

    let data = &args.data[..args.data.len().min(args.count as usize)];
    match ctx.deps.stores.content.write(args.file.raw(), args.offset, data, args.stable).await {
        Ok((attr, committed)) => {
            let res = WRITE3resok {
                file_wcc: wcc(before, post_op_attr::attributes(attr)),
                count: data.len() as u32,
                committed,
                verf: ctx.deps.write_verf,
            };
            nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &wcc(before, post_op_attr::Void)),
    }
}

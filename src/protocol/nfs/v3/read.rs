//! READ procedure (RFC 1813 section 3.3.6).

use std::io::Read;

use tracing::debug;

use super::{check_cancelled, post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::file::{READ3args, READ3resok};
use crate::protocol::xdr::nfs3::nfsstat3;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_read(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<READ3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_read");

    check_cancelled(ctx)?;
    let attr = post_op(ctx, &args.file).await;
    match ctx.deps.stores.content.read(args.file.raw(), args.offset, args.count).await {
        Ok((data, eof)) => {
            check_cancelled(ctx)?;
            let res = READ3resok {
                file_attributes: attr,
                count: data.len() as u32,
                eof,
                data,
            };
            nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &attr),
    }
}

//! READLINK procedure (RFC 1813 section 3.3.5).

use std::io::Read;

use tracing::debug;

use super::{post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_readlink(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let fh = deserialize::<nfs_fh3>(input)?;
    debug!(xid = ctx.xid, ?fh, "nfsproc3_readlink");

    let attr = post_op(ctx, &fh).await;
    match ctx.deps.stores.metadata.readlink(fh.raw()).await {
        Ok(target) => {
            nfsstat3::NFS3_OK.serialize(output)?;
            attr.serialize(output)?;
            target.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &attr),
    }
}

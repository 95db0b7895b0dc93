//! GETATTR procedure (RFC 1813 section 3.3.1).

use std::io::Read;

use tracing::debug;

use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_getattr(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let fh = deserialize::<nfs_fh3>(input)?;
    debug!(xid = ctx.xid, ?fh, "nfsproc3_getattr");

    match ctx.deps.stores.metadata.getattr(fh.raw()).await {
        Ok(attr) => {
            nfsstat3::NFS3_OK.serialize(output)?;
            attr.serialize(output)?;
        }
        Err(stat) => {
            stat.serialize(output)?;
        }
    }
    Ok(())
}

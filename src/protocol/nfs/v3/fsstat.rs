//! FSSTAT procedure (RFC 1813 section 3.3.18).

use std::io::Read;

use tracing::debug;

use super::{post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::fs::FSSTAT3resok;
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_fsstat(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let fh = deserialize::<nfs_fh3>(input)?;
    debug!(xid = ctx.xid, ?fh, "nfsproc3_fsstat");

    let attr = post_op(ctx, &fh).await;
    match ctx.deps.stores.metadata.fsstat(fh.raw()).await {
        Ok(stat) => {
            let res = FSSTAT3resok {
                obj_attributes: attr,
                tbytes: stat.total_bytes,
                fbytes: stat.free_bytes,
                abytes: stat.avail_bytes,
                tfiles: stat.total_files,
                ffiles: stat.free_files,
                afiles: stat.avail_files,
                invarsec: 0,
            };
            nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &attr),
    }
}

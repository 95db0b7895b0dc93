//! LOOKUP procedure (RFC 1813 section 3.3.3).

use std::io::Read;

use tracing::debug;

use super::{post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{diropargs3, nfs_fh3, nfsstat3};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_lookup(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<diropargs3>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_lookup");

    let dir_attr = post_op(ctx, &args.dir).await;
    match ctx.deps.stores.metadata.lookup(args.dir.raw(), &args.name).await {
        Ok(handle) => {
            let fh = nfs_fh3 { data: handle };
            let obj_attr = post_op(ctx, &fh).await;
            nfsstat3::NFS3_OK.serialize(output)?;
            fh.serialize(output)?;
            obj_attr.serialize(output)?;
            dir_attr.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &dir_attr),
    }
}

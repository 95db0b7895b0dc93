//! PATHCONF procedure (RFC 1813 section 3.3.20).

use std::io::Read;

use tracing::debug;

use super::{post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::fs::PATHCONF3resok;
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3, post_op_attr};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_pathconf(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let fh = deserialize::<nfs_fh3>(input)?;
    debug!(xid = ctx.xid, ?fh, "nfsproc3_pathconf");

    let attr = post_op(ctx, &fh).await;
    match &attr {
        post_op_attr::attributes(_) => {
            let res = PATHCONF3resok {
                obj_attributes: attr,
                linkmax: 32_000,
                name_max: 255,
                no_trunc: true,
                chown_restricted: true,
                case_insensitive: false,
                case_preserving: true,
            };
            nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        post_op_attr::Void => write_error(output, nfsstat3::NFS3ERR_STALE, &attr),
    }
}

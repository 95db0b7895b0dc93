//! FSINFO procedure (RFC 1813 section 3.3.19). Static transfer-size and
//! capability advertisement; only the attributes come from the store.

use std::io::Read;

use tracing::debug;

use super::{post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::fs::{
    FSINFO3resok, FSF_CANSETTIME, FSF_HOMOGENEOUS, FSF_LINK, FSF_SYMLINK,
};
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3, nfstime3, post_op_attr};
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_fsinfo(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let fh = deserialize::<nfs_fh3>(input)?;
    debug!(xid = ctx.xid, ?fh, "nfsproc3_fsinfo");

    match ctx.deps.stores.metadata.getattr(fh.raw()).await {
        Ok(attr) => {
            let res = FSINFO3resok {
                obj_attributes: post_op_attr::attributes(attr),
                rtmax: 1024 * 1024,
                rtpref: 256 * 1024,
                rtmult: 4096,
                wtmax: 1024 * 1024,
                wtpref: 256 * 1024,
                wtmult: 4096,
                dtpref: 64 * 1024,
                maxfilesize: u64::MAX,
                time_delta: nfstime3 { seconds: 0, nseconds: 1 },
                properties: FSF_LINK | FSF_SYMLINK | FSF_HOMOGENEOUS | FSF_CANSETTIME,
            };
            nfsstat3::NFS3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        Err(stat) => write_error(output, stat, &post_op_attr::Void),
    }
}

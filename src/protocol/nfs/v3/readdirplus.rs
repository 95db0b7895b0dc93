//! READDIRPLUS procedure (RFC 1813 section 3.3.17): directory enumeration
//! with attributes and handles per entry, under two byte budgets.

use std::io::Read;

use tracing::debug;

use super::readdir::cookieverf_for;
use super::{check_cancelled, post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::dir::READDIRPLUS3args;
use crate::protocol::xdr::nfs3::{nfs_fh3, nfsstat3, post_op_attr, post_op_fh3};
use crate::protocol::xdr::{deserialize, Serialize};

const BATCH: usize = 128;

pub async fn nfsproc3_readdirplus(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<READDIRPLUS3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_readdirplus");

    let dir_attr = post_op(ctx, &args.dir).await;
    let verf = cookieverf_for(&dir_attr);
    if args.cookie != 0 && args.cookieverf != [0u8; 8] && args.cookieverf != verf {
        return write_error(output, nfsstat3::NFS3ERR_BAD_COOKIE, &dir_attr);
    }

    // `dircount` bounds the name/cookie portion, `maxcount` the whole reply.
    let dir_budget = args.dircount as usize;
    let total_budget = (args.maxcount as usize).saturating_sub(160);
    let mut entries_bytes: Vec<u8> = Vec::new();
    let mut dir_bytes = 0usize;
    let mut cookie = args.cookie;
    let mut eof = false;

    'fill: loop {
        check_cancelled(ctx)?;
        let batch = match ctx.deps.stores.metadata.readdir(args.dir.raw(), cookie, BATCH).await {
            Ok(batch) => batch,
            Err(stat) => return write_error(output, stat, &dir_attr),
        };
        for entry in &batch.entries {
            let mut one = Vec::with_capacity(entry.name.len() + 128);
            true.serialize(&mut one)?;
            entry.fileid.serialize(&mut one)?;
            entry.name.serialize(&mut one)?;
            entry.cookie.serialize(&mut one)?;
            let name_portion = one.len();
            post_op_attr::attributes(entry.attr).serialize(&mut one)?;
            post_op_fh3::handle(nfs_fh3 { data: entry.handle.clone() }).serialize(&mut one)?;

            if dir_bytes + name_portion > dir_budget
                || entries_bytes.len() + one.len() > total_budget
            {
                break 'fill;
            }
            dir_bytes += name_portion;
            entries_bytes.extend_from_slice(&one);
            cookie = entry.cookie;
        }
        if batch.end || batch.entries.is_empty() {
            eof = true;
            break;
        }
    }

    nfsstat3::NFS3_OK.serialize(output)?;
    dir_attr.serialize(output)?;
    verf.serialize(output)?;
    output.extend_from_slice(&entries_bytes);
    false.serialize(output)?;
    eof.serialize(output)?;
    Ok(())
}

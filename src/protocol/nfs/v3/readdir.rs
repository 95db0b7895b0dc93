//! READDIR procedure (RFC 1813 section 3.3.16).
//!
//! The reply is size-limited in bytes, not entries: entries are appended
//! until the next one would overflow the client's `count` budget. The
//! cookie verifier is derived from the directory's mtime so enumeration
//! restarted against a changed directory fails with NFS3ERR_BAD_COOKIE
//! instead of silently skipping entries.

use std::io::Read;

use tracing::debug;

use super::{check_cancelled, post_op, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::dir::{entry3, READDIR3args};
use crate::protocol::xdr::nfs3::{cookieverf3, nfsstat3, post_op_attr};
use crate::protocol::xdr::{deserialize, Serialize};

/// Entries fetched from the store per batch.
const BATCH: usize = 128;

pub(super) fn cookieverf_for(dir_attr: &post_op_attr) -> cookieverf3 {
    match dir_attr {
        post_op_attr::attributes(attr) => {
            let mut verf = [0u8; 8];
            verf[..4].copy_from_slice(&attr.mtime.seconds.to_be_bytes());
            verf[4..].copy_from_slice(&attr.mtime.nseconds.to_be_bytes());
            verf
        }
        post_op_attr::Void => [0u8; 8],
    }
}

pub async fn nfsproc3_readdir(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = deserialize::<READDIR3args>(input)?;
    debug!(xid = ctx.xid, ?args, "nfsproc3_readdir");

    let dir_attr = post_op(ctx, &args.dir).await;
    let verf = cookieverf_for(&dir_attr);
    if args.cookie != 0 && args.cookieverf != [0u8; 8] && args.cookieverf != verf {
        return write_error(output, nfsstat3::NFS3ERR_BAD_COOKIE, &dir_attr);
    }

    // Reserve space for the fixed fields around the entry list.
    let budget = (args.count as usize).saturating_sub(128);
    let mut entries_bytes: Vec<u8> = Vec::new();
    let mut cookie = args.cookie;
    let mut eof = false;

    'fill: loop {
        check_cancelled(ctx)?;
        let batch = match ctx.deps.stores.metadata.readdir(args.dir.raw(), cookie, BATCH).await {
            Ok(batch) => batch,
            Err(stat) => return write_error(output, stat, &dir_attr),
        };
        for entry in &batch.entries {
            let wire = entry3 {
                fileid: entry.fileid,
                name: entry.name.clone(),
                cookie: entry.cookie,
            };
            let mut one = Vec::with_capacity(entry.name.len() + 32);
            true.serialize(&mut one)?;
            wire.serialize(&mut one)?;
            if entries_bytes.len() + one.len() > budget {
                break 'fill;
            }
            entries_bytes.extend_from_slice(&one);
            cookie = entry.cookie;
        }
        if batch.end {
            eof = true;
            break;
        }
        if batch.entries.is_empty() {
            eof = true;
            break;
        }
    }

    nfsstat3::NFS3_OK.serialize(output)?;
    dir_attr.serialize(output)?;
    verf.serialize(output)?;
    output.extend_from_slice(&entries_bytes);
    false.serialize(output)?; // end of entry chain
    eof.serialize(output)?;
    Ok(())
}

//! CREATE procedure (RFC 1813 section 3.3.8): UNCHECKED, GUARDED and
//! EXCLUSIVE creation modes.

use std::io::Read;

use tracing::debug;

use super::{notify_change, post_op, pre_op, require_writable, wcc, write_error};
use crate::protocol::rpc::context::{HandlerResult, RequestContext};
use crate::protocol::xdr::nfs3::{
    createmode3, createverf3, diropargs3, nfs_fh3, nfsstat3, post_op_attr, post_op_fh3, sattr3,
};
use crate::protocol::xdr::nfs4::NOTIFY4_ADD_ENTRY;
use crate::protocol::xdr::{deserialize, Serialize};

pub async fn nfsproc3_create(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let dirops = deserialize::<diropargs3>(input)?;
    let mode = deserialize::<createmode3>(input)?;
    debug!(xid = ctx.xid, ?dirops, ?mode, "nfsproc3_create");

    let before = pre_op(ctx, &dirops.dir).await;
    if let Err(stat) = require_writable(ctx) {
        // Remaining argument bytes can be left unread; the dispatch layer
        // owns the record.
        return write_error(output, stat, &wcc(before, post_op_attr::Void));
    }

    let store = &ctx.deps.stores.metadata;
    let result = match mode {
        createmode3::UNCHECKED => {
            let attrs = deserialize::<sattr3>(input)?;
            store.create(dirops.dir.raw(), &dirops.name, attrs).await
        }
        createmode3::GUARDED => {
            let attrs = deserialize::<sattr3>(input)?;
            match store.lookup(dirops.dir.raw(), &dirops.name).await {
                Ok(_) => Err(nfsstat3::NFS3ERR_EXIST),
                Err(nfsstat3::NFS3ERR_NOENT) => {
                    store.create(dirops.dir.raw(), &dirops.name, attrs).await
                }
                Err(stat) => Err(stat),
            }
        }
        createmode3::EXCLUSIVE => {
            let verifier = deserialize::<createverf3>(input)?;
            store.create_exclusive(dirops.dir.raw(), &dirops.name, verifier).await
        }
    };

    match result {
        Ok((handle, attr)) => {
            notify_change(ctx, &dirops.dir, NOTIFY4_ADD_ENTRY, &dirops.name);
            let fh = nfs_fh3 { data: handle };
            let dir_after = post_op(ctx, &dirops.dir).await;
            nfsstat3::NFS3_OK.serialize(output)?;
            post_op_fh3::handle(fh).serialize(output)?;
            post_op_attr::attributes(attr).serialize(output)?;
            wcc(before, dir_after).serialize(output)?;
            Ok(())
        }
        Err(stat) => {
            let dir_after = post_op(ctx, &dirops.dir).await;
            write_error(output, stat, &wcc(before, dir_after))
        }
    }
}

//! File I/O operations: READ, WRITE and COMMIT.

use tracing::debug;

use super::{map_stat, OpResult};
use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::nfs::v4::pseudofs;
use crate::protocol::xdr::nfs3::file::stable_how;
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs4::{
    nfsstat4, stable_how4, COMMIT4args, READ4args, WRITE4args,
};
use crate::protocol::xdr::{write_opaque, Serialize};

fn stable3_of(stable: stable_how4) -> stable_how {
    match stable {
        stable_how4::UNSTABLE4 => stable_how::UNSTABLE,
        stable_how4::DATA_SYNC4 => stable_how::DATA_SYNC,
        stable_how4::FILE_SYNC4 => stable_how::FILE_SYNC,
    }
}

fn stable4_of(stable: stable_how) -> stable_how4 {
    match stable {
        stable_how::UNSTABLE => stable_how4::UNSTABLE4,
        stable_how::DATA_SYNC => stable_how4::DATA_SYNC4,
        stable_how::FILE_SYNC => stable_how4::FILE_SYNC4,
    }
}

pub(super) async fn read(
    args: &READ4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    if pseudofs::is_pseudo_handle(&fh) {
        return Err(nfsstat4::NFS4ERR_ISDIR);
    }
    let handle = ctx.deps.state4.resolve_open(&args.stateid, &fh)?;
    state.current_stateid = args.stateid;
    debug!(xid = ctx.xid, offset = args.offset, count = args.count, "read4");

    let (data, eof) = ctx
        .deps
        .stores
        .content
        .read(&handle, args.offset, args.count)
        .await
        .map_err(map_stat)?;
    eof.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    write_opaque(&data, out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    Ok(())
}

pub(super) async fn write(
    args: &WRITE4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    if pseudofs::is_pseudo_handle(&fh) {
        return Err(nfsstat4::NFS4ERR_ROFS);
    }
    if matches!(
        ctx.deps.stores.metadata.capabilities(),
        crate::store::Capabilities::ReadOnly
    ) {
        return Err(nfsstat4::NFS4ERR_ROFS);
    }
    let handle = ctx.deps.state4.resolve_open(&args.stateid, &fh)?;
    state.current_stateid = args.stateid;
    debug!(xid = ctx.xid, offset = args.offset, len = args.data.len(), "write4");

    let (_, committed) = ctx
        .deps
        .stores
        .content
        .write(&handle, args.offset, &args.data, stable3_of(args.stable))
        .await
        .map_err(map_stat)?;

    (args.data.len() as u32).serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    stable4_of(committed).serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    ctx.deps.write_verf.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    Ok(())
}

pub(super) async fn commit(
    args: &COMMIT4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    let fh = state.fh()?.clone();
    if pseudofs::is_pseudo_handle(&fh) {
        return Err(nfsstat4::NFS4ERR_ISDIR);
    }
    debug!(xid = ctx.xid, offset = args.offset, count = args.count, "commit4");
    ctx.deps
        .stores
        .content
        .commit(&fh, args.offset, args.count)
        .await
        .map_err(map_stat)?;
    ctx.deps.write_verf.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    Ok(())
}

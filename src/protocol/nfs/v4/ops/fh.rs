//! File-handle manipulation operations: PUTROOTFH, PUTFH, GETFH, SAVEFH,
//! RESTOREFH, LOOKUP and LOOKUPP.
//!
//! Navigation starts in the pseudo namespace and crosses into a share at
//! its export node; LOOKUPP crosses back when ascending from a share root.

use super::OpResult;
use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::nfs::v4::pseudofs::{self, LookupResult};
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs4::{component4, nfs_fh4, nfsstat4, NFS4_FHSIZE};
use crate::protocol::xdr::Serialize;

pub(super) fn putrootfh(state: &mut CompoundState, ctx: &RequestContext) -> OpResult {
    state.current_fh = Some(ctx.deps.state4.pseudofs().root().handle.clone());
    Ok(())
}

pub(super) fn putfh(handle: &nfs_fh4, state: &mut CompoundState) -> OpResult {
    if handle.data.is_empty() || handle.data.len() > NFS4_FHSIZE {
        return Err(nfsstat4::NFS4ERR_BADHANDLE);
    }
    state.current_fh = Some(handle.data.clone());
    Ok(())
}

pub(super) fn getfh(state: &CompoundState, out: &mut Vec<u8>) -> OpResult {
    let fh = state.fh()?;
    nfs_fh4 { data: fh.clone() }.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn savefh(state: &mut CompoundState) -> OpResult {
    state.saved_fh = Some(state.fh()?.clone());
    Ok(())
}

pub(super) fn restorefh(state: &mut CompoundState) -> OpResult {
    match &state.saved_fh {
        Some(saved) => {
            state.current_fh = Some(saved.clone());
            Ok(())
        }
        None => Err(nfsstat4::NFS4ERR_RESTOREFH),
    }
}

pub(super) async fn lookup(
    name: &component4,
    state: &mut CompoundState,
    ctx: &RequestContext,
) -> OpResult {
    let fh = state.fh()?.clone();
    if name.0.is_empty() {
        return Err(nfsstat4::NFS4ERR_INVAL);
    }

    if pseudofs::is_pseudo_handle(&fh) {
        let next = {
            let fs = ctx.deps.state4.pseudofs();
            let node = fs.by_handle(&fh).ok_or(nfsstat4::NFS4ERR_STALE)?;
            let name = String::from_utf8_lossy(&name.0).into_owned();
            fs.lookup(node, &name)
        };
        return match next {
            Some(LookupResult::Pseudo(handle)) | Some(LookupResult::Export(handle)) => {
                state.current_fh = Some(handle);
                Ok(())
            }
            None => Err(nfsstat4::NFS4ERR_NOENT),
        };
    }

    let name = crate::protocol::xdr::nfs3::filename3::from(name.0.as_slice());
    match ctx.deps.stores.metadata.lookup(&fh, &name).await {
        Ok(handle) => {
            state.current_fh = Some(handle);
            Ok(())
        }
        Err(stat) => Err(super::map_stat(stat)),
    }
}

pub(super) async fn lookupp(state: &mut CompoundState, ctx: &RequestContext) -> OpResult {
    let fh = state.fh()?.clone();

    if pseudofs::is_pseudo_handle(&fh) {
        let parent = {
            let fs = ctx.deps.state4.pseudofs();
            let node = fs.by_handle(&fh).ok_or(nfsstat4::NFS4ERR_STALE)?;
            fs.parent(node).handle.clone()
        };
        state.current_fh = Some(parent);
        return Ok(());
    }

    // Ascending from a share root crosses back into the pseudo namespace.
    let share_path = ctx
        .deps
        .stores
        .metadata
        .shares()
        .into_iter()
        .find(|share| share.root == fh)
        .map(|share| share.name);
    if let Some(path) = share_path {
        let parent = {
            let fs = ctx.deps.state4.pseudofs();
            let parent_path = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
            fs.by_handle(format!("pseudofs:/{parent_path}").as_bytes())
                .map(|node| node.handle.clone())
                .unwrap_or_else(|| fs.root().handle.clone())
        };
        state.current_fh = Some(parent);
        return Ok(());
    }

    match ctx.deps.stores.metadata.lookup_parent(&fh).await {
        Ok(parent) => {
            state.current_fh = Some(parent);
            Ok(())
        }
        Err(stat) => Err(super::map_stat(stat)),
    }
}

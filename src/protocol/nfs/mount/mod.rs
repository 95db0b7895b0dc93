//! MOUNT version 3 protocol (RFC 1813 Appendix I).
//!
//! MNT resolves an export path to its root file handle; the bookkeeping
//! procedures maintain the client mount list served by DUMP. Only MNT is
//! version-gated (v3); NULL/DUMP/UMNT/UMNTALL/EXPORT answer any version a
//! legacy client offers.

use std::collections::BTreeSet;
use std::io::Read;
use std::sync::Mutex;

use num_traits::FromPrimitive;
use tracing::debug;

use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};
use crate::protocol::xdr::mount::{
    dirpath, mountres3_ok, mountstat3, MountProgram, MNTNAMLEN,
};
use crate::protocol::xdr::rpc::auth_flavor;
use crate::protocol::xdr::{deserialize, write_opaque, Serialize};

/// Live client mount registrations, served by DUMP.
pub struct MountTable {
    entries: Mutex<BTreeSet<(String, String)>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self { entries: Mutex::new(BTreeSet::new()) }
    }

    pub fn add(&self, host: &str, path: &str) {
        self.entries
            .lock()
            .expect("mount table lock")
            .insert((host.to_string(), path.to_string()));
    }

    pub fn remove(&self, host: &str, path: &str) {
        self.entries.lock().expect("mount table lock").remove(&(
            host.to_string(),
            path.to_string(),
        ));
    }

    pub fn remove_host(&self, host: &str) {
        self.entries.lock().expect("mount table lock").retain(|(h, _)| h != host);
    }

    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.lock().expect("mount table lock").iter().cloned().collect()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

fn client_host(ctx: &RequestContext) -> String {
    ctx.client_addr.split(':').next().unwrap_or(&ctx.client_addr).to_string()
}

/// Routes one MOUNT call.
pub async fn handle(
    proc: u32,
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    use MountProgram::*;
    match MountProgram::from_u32(proc).unwrap_or(MountProgram::INVALID) {
        MOUNTPROC3_NULL => Ok(()),
        MOUNTPROC3_MNT => mnt(input, output, ctx).await,
        MOUNTPROC3_DUMP => dump(output, ctx),
        MOUNTPROC3_UMNT => umnt(input, output, ctx),
        MOUNTPROC3_UMNTALL => umnt_all(output, ctx),
        MOUNTPROC3_EXPORT => export(output, ctx),
        INVALID => Err(HandlerError::System(format!("mount procedure {proc} routed past table"))),
    }
}

/// MNT: export path to root handle, plus the accepted auth flavors.
async fn mnt(input: &mut impl Read, output: &mut Vec<u8>, ctx: &RequestContext) -> HandlerResult {
    let path = deserialize::<dirpath>(input)?;
    let requested = String::from_utf8_lossy(path.as_bytes()).trim_matches('/').to_string();
    debug!(xid = ctx.xid, path = %requested, "mountproc3_mnt");

    let share = ctx
        .deps
        .stores
        .metadata
        .shares()
        .into_iter()
        .find(|share| share.name == requested);

    match share {
        Some(share) => {
            ctx.deps.mounts.add(&client_host(ctx), &requested);
            let res = mountres3_ok {
                fhandle: share.root,
                auth_flavors: vec![
                    auth_flavor::AUTH_NULL as u32,
                    auth_flavor::AUTH_UNIX as u32,
                    auth_flavor::RPCSEC_GSS as u32,
                ],
            };
            mountstat3::MNT3_OK.serialize(output)?;
            res.serialize(output)?;
            Ok(())
        }
        None => {
            debug!(xid = ctx.xid, path = %requested, "no matching export");
            mountstat3::MNT3ERR_NOENT.serialize(output)?;
            Ok(())
        }
    }
}

/// DUMP: the (hostname, directory) mount list as a value-follows chain.
fn dump(output: &mut Vec<u8>, ctx: &RequestContext) -> HandlerResult {
    for (host, path) in ctx.deps.mounts.snapshot() {
        true.serialize(output)?;
        write_opaque(&host.as_bytes()[..host.len().min(MNTNAMLEN)], output)?;
        write_opaque(format!("/{path}").as_bytes(), output)?;
    }
    false.serialize(output)?;
    Ok(())
}

fn umnt(input: &mut impl Read, output: &mut Vec<u8>, ctx: &RequestContext) -> HandlerResult {
    let path = deserialize::<dirpath>(input)?;
    let requested = String::from_utf8_lossy(path.as_bytes()).trim_matches('/').to_string();
    debug!(xid = ctx.xid, path = %requested, "mountproc3_umnt");
    ctx.deps.mounts.remove(&client_host(ctx), &requested);
    // UMNT returns void; success is implicit.
    let _ = output;
    Ok(())
}

fn umnt_all(output: &mut Vec<u8>, ctx: &RequestContext) -> HandlerResult {
    debug!(xid = ctx.xid, "mountproc3_umntall");
    ctx.deps.mounts.remove_host(&client_host(ctx));
    let _ = output;
    Ok(())
}

/// EXPORT: every share, with an empty group list.
fn export(output: &mut Vec<u8>, ctx: &RequestContext) -> HandlerResult {
    for share in ctx.deps.stores.metadata.shares() {
        true.serialize(output)?;
        write_opaque(format!("/{}", share.name).as_bytes(), output)?;
        // no groups
        false.serialize(output)?;
    }
    false.serialize(output)?;
    Ok(())
}

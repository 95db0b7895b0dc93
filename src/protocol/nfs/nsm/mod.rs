//! NSM version 1 (statd) procedures and the restart notification protocol
//! (X/Open XNFS chapter 11).
//!
//! Registrations persist through the state store. On adapter startup the
//! server-state counter is bumped (odd while up) and SM_NOTIFY fans out to
//! every registered peer concurrently; peers that cannot be reached are
//! treated as crashed and their `nlm:<host>:` locks are released, which in
//! turn drives the blocking-lock queues.
//!
//! An inbound SM_NOTIFY means a peer rebooted: its locks are stale and are
//! released the same way.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use num_traits::FromPrimitive;
use tracing::{debug, info, warn};

use crate::protocol::nfs::nlm::lockmgr::LockManager;
use crate::protocol::rpc::client;
use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};
use crate::protocol::xdr::nsm::{
    self, mon, sm_name, sm_res, sm_stat, sm_stat_res, stat_chge, NsmProgram,
};
use crate::protocol::xdr::{deserialize, serialize_to_vec, Serialize};
use crate::store::{NsmRegistration, StateStore};

/// Budget for one SM_NOTIFY delivery (portmap lookup plus the call).
const NOTIFY_BUDGET: Duration = Duration::from_secs(5);

pub struct NsmMonitor {
    store: Arc<dyn StateStore>,
    locks: Arc<LockManager>,
}

impl NsmMonitor {
    pub fn new(store: Arc<dyn StateStore>, locks: Arc<LockManager>) -> Self {
        Self { store, locks }
    }

    async fn state(&self) -> i32 {
        self.store.nsm_state().await.unwrap_or(1)
    }

    /// Restart protocol: load registrations, bump the state counter to odd,
    /// notify every peer, and sweep locks of unreachable ones.
    pub async fn startup_notify(&self) {
        let mut state = match self.store.bump_nsm_state().await {
            Ok(state) => state,
            Err(stat) => {
                warn!(?stat, "could not bump NSM state counter");
                return;
            }
        };
        if state % 2 == 0 {
            state = match self.store.bump_nsm_state().await {
                Ok(state) => state,
                Err(_) => state + 1,
            };
        }

        let registrations = match self.store.load_nsm_registrations().await {
            Ok(regs) => regs,
            Err(stat) => {
                warn!(?stat, "could not load NSM registrations");
                return;
            }
        };
        if registrations.is_empty() {
            return;
        }
        info!(peers = registrations.len(), state, "sending SM_NOTIFY to monitored peers");

        let mut tasks = Vec::with_capacity(registrations.len());
        for reg in registrations {
            tasks.push(tokio::spawn(notify_peer(reg, state)));
        }
        for task in tasks {
            if let Ok(Some(crashed_host)) = task.await {
                self.peer_crashed(&crashed_host).await;
            }
        }
    }

    /// Releases every lock owned by a crashed or rebooted peer.
    pub async fn peer_crashed(&self, host: &str) {
        info!(%host, "releasing locks of crashed NSM peer");
        self.locks.release_owner_prefix(&format!("nlm:{host}:")).await;
        if let Err(stat) = self.store.remove_nsm_registration(host).await {
            debug!(?stat, %host, "stale NSM registration removal failed");
        }
    }
}

/// Notifies one peer; returns the host name when it was unreachable.
async fn notify_peer(reg: NsmRegistration, state: i32) -> Option<String> {
    let args = stat_chge {
        mon_name: sm_name(reg.my_name.clone().into_bytes()),
        state,
    };
    let Ok(body) = serialize_to_vec(&args) else {
        return Some(reg.mon_name);
    };
    let target = format!("{}:111", reg.mon_name);
    let attempt = async {
        let getport = crate::protocol::xdr::portmap::mapping {
            prog: nsm::PROGRAM,
            vers: nsm::VERSION,
            prot: crate::protocol::xdr::portmap::IPPROTO_TCP,
            port: 0,
        };
        let reply = client::call_once(
            &target,
            crate::protocol::xdr::portmap::PROGRAM,
            2,
            crate::protocol::xdr::portmap::PortmapProgram::PMAPPROC_GETPORT as u32,
            &serialize_to_vec(&getport).ok()?,
            NOTIFY_BUDGET,
        )
        .await
        .ok()?;
        let port = deserialize::<u32>(&mut std::io::Cursor::new(&reply)).ok()?;
        if port == 0 || port > u16::MAX as u32 {
            return None;
        }
        client::call_once(
            &format!("{}:{port}", reg.mon_name),
            nsm::PROGRAM,
            nsm::VERSION,
            NsmProgram::SM_NOTIFY as u32,
            &body,
            NOTIFY_BUDGET,
        )
        .await
        .ok()
    };
    match tokio::time::timeout(NOTIFY_BUDGET, attempt).await {
        Ok(Some(_)) => None,
        _ => {
            warn!(host = %reg.mon_name, "SM_NOTIFY failed, treating peer as crashed");
            Some(reg.mon_name)
        }
    }
}

/// Routes one NSM call.
pub async fn handle(
    proc: u32,
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    use NsmProgram::*;
    let nsm = &ctx.deps.nsm;
    match NsmProgram::from_u32(proc).unwrap_or(NsmProgram::INVALID) {
        SM_NULL => Ok(()),
        SM_STAT => {
            // Whether a host *could* be monitored; this server always can.
            let _name = deserialize::<sm_name>(input)?;
            sm_stat_res { res_stat: sm_res::STAT_SUCC, state: nsm.state().await }
                .serialize(output)?;
            Ok(())
        }
        SM_MON => {
            let args = deserialize::<mon>(input)?;
            let reg = NsmRegistration {
                mon_name: String::from_utf8_lossy(&args.mon_id.mon_name.0).into_owned(),
                my_name: String::from_utf8_lossy(&args.mon_id.my_id.my_name.0).into_owned(),
                my_prog: args.mon_id.my_id.my_prog,
                my_vers: args.mon_id.my_id.my_vers,
                my_proc: args.mon_id.my_id.my_proc,
                private: args.priv_,
            };
            debug!(xid = ctx.xid, host = %reg.mon_name, "sm_mon");
            let res_stat = match nsm.store.save_nsm_registration(&reg).await {
                Ok(()) => sm_res::STAT_SUCC,
                Err(_) => sm_res::STAT_FAIL,
            };
            sm_stat_res { res_stat, state: nsm.state().await }.serialize(output)?;
            Ok(())
        }
        SM_UNMON => {
            let args = deserialize::<nsm::mon_id>(input)?;
            let host = String::from_utf8_lossy(&args.mon_name.0).into_owned();
            debug!(xid = ctx.xid, %host, "sm_unmon");
            let _ = nsm.store.remove_nsm_registration(&host).await;
            sm_stat { state: nsm.state().await }.serialize(output)?;
            Ok(())
        }
        SM_UNMON_ALL => {
            let _args = deserialize::<nsm::my_id>(input)?;
            debug!(xid = ctx.xid, "sm_unmon_all");
            if let Ok(regs) = nsm.store.load_nsm_registrations().await {
                for reg in regs {
                    let _ = nsm.store.remove_nsm_registration(&reg.mon_name).await;
                }
            }
            sm_stat { state: nsm.state().await }.serialize(output)?;
            Ok(())
        }
        SM_SIMU_CRASH => {
            // Testing hook: act as if this server just rebooted.
            debug!(xid = ctx.xid, "sm_simu_crash");
            let _ = nsm.store.bump_nsm_state().await;
            Ok(())
        }
        SM_NOTIFY => {
            let args = deserialize::<stat_chge>(input)?;
            let host = String::from_utf8_lossy(&args.mon_name.0).into_owned();
            info!(xid = ctx.xid, %host, state = args.state, "peer rebooted");
            nsm.peer_crashed(&host).await;
            Ok(())
        }
        INVALID => Err(HandlerError::System(format!("nsm procedure {proc} routed past table"))),
    }
}

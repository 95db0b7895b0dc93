//! Adapter lifecycle: listeners, the accept loop, and graceful shutdown.
//!
//! States run `New -> Running -> ShuttingDown -> Closed`. `serve` returns
//! exactly once, after the drain completes; `stop` is an idempotent latch
//! that is safe to call repeatedly and concurrently with `serve`. On
//! shutdown the listener closes first, in-flight work is cancelled through
//! the shared shutdown token, connections get ~100 ms deadlines to unblock
//! their reads, and whatever remains past `timeouts.shutdown` is
//! force-closed through the connection registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionRegistry};
use crate::error::Error;
use crate::pool::BufferPool;
use crate::protocol::auth::gss::{GssProcessor, Krb5Mechanism};
use crate::protocol::auth::identity;
use crate::protocol::nfs::nlm::lockmgr::LockManager;
use crate::protocol::nfs::nsm::NsmMonitor;
use crate::protocol::nfs::portmap::PortmapRegistry;
use crate::protocol::nfs::v4::state::StateManager;
use crate::protocol::rpc::context::Deps;
use crate::protocol::xdr::{mount, nlm, nsm, portmap};
use crate::settings::{Settings, SettingsHandle};
use crate::shutdown::Shutdown;
use crate::store::Stores;

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SHUTTING_DOWN: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Admission-control hook consulted before a connection is registered.
pub type PreAcceptHook = Arc<dyn Fn(&SocketAddr) -> bool + Send + Sync>;

pub struct Adapter {
    deps: Arc<Deps>,
    registry: Arc<ConnectionRegistry>,
    listener: Mutex<Option<TcpListener>>,
    portmap_listener: Mutex<Option<TcpListener>>,
    bound: SocketAddr,
    portmap_bound: Option<SocketAddr>,
    conn_cap: Option<Arc<Semaphore>>,
    next_conn_id: AtomicU64,
    state: AtomicU8,
    pre_accept: Mutex<Option<PreAcceptHook>>,
    /// Fires when `serve` has fully drained and returned.
    closed: Shutdown,
    /// Fires when the accept loop is about to run; lets tests observe the
    /// bound address race-free.
    ready: Shutdown,
}

impl Adapter {
    /// Validates configuration, opens the listeners and assembles the
    /// dependency bundle. The adapter is in `New` until [`Adapter::serve`].
    pub async fn bind(
        settings: Settings,
        stores: Stores,
        mechanism: Arc<dyn Krb5Mechanism>,
    ) -> Result<Adapter, Error> {
        settings.validate()?;
        let handle = SettingsHandle::new(settings);
        let snapshot = handle.load();

        let listener = TcpListener::bind((snapshot.bind_address.as_str(), snapshot.port))
            .await
            .map_err(Error::Io)?;
        let bound = listener.local_addr().map_err(Error::Io)?;
        info!(%bound, "NFS endpoint bound");

        // Portmapper bind failure is non-fatal.
        let (portmap_listener, portmap_bound) = if snapshot.portmapper.enabled {
            match TcpListener::bind((snapshot.bind_address.as_str(), snapshot.portmapper.port))
                .await
            {
                Ok(listener) => {
                    let addr = listener.local_addr().map_err(Error::Io)?;
                    info!(%addr, "portmapper endpoint bound");
                    (Some(listener), Some(addr))
                }
                Err(err) => {
                    warn!(error = %err, "portmapper bind failed, continuing without");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let shutdown = Shutdown::new();
        let mapper = identity::mapper_from_settings(&snapshot.kerberos);
        let gss = Arc::new(GssProcessor::new(mechanism, mapper, &snapshot.kerberos));
        let portmap_registry = Arc::new(PortmapRegistry::new());
        let locks = LockManager::new(stores.state.clone());
        locks.recover().await;
        let nsm = Arc::new(NsmMonitor::new(stores.state.clone(), Arc::clone(&locks)));
        let state4 = StateManager::new(
            handle.clone(),
            stores.clone(),
            shutdown.clone(),
            Arc::clone(&locks),
        );
        state4.begin_grace();

        let mut write_verf = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut write_verf);

        let deps = Arc::new(Deps {
            settings: handle,
            stores,
            gss,
            state4,
            locks,
            nsm,
            portmap: portmap_registry,
            mounts: Arc::new(crate::protocol::nfs::mount::MountTable::new()),
            pool: BufferPool::new(),
            shutdown,
            write_verf,
        });

        let conn_cap = {
            let cap = snapshot.max_connections;
            (cap > 0).then(|| Arc::new(Semaphore::new(cap)))
        };

        Ok(Adapter {
            deps,
            registry: ConnectionRegistry::new(),
            listener: Mutex::new(Some(listener)),
            portmap_listener: Mutex::new(portmap_listener),
            bound,
            portmap_bound,
            conn_cap,
            next_conn_id: AtomicU64::new(1),
            state: AtomicU8::new(STATE_NEW),
            pre_accept: Mutex::new(None),
            closed: Shutdown::new(),
            ready: Shutdown::new(),
        })
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.bound
    }

    pub fn portmap_addr(&self) -> Option<SocketAddr> {
        self.portmap_bound
    }

    pub fn deps(&self) -> &Arc<Deps> {
        &self.deps
    }

    /// Installs the pre-accept admission hook.
    pub fn set_pre_accept(&self, hook: PreAcceptHook) {
        *self.pre_accept.lock().expect("pre-accept lock") = Some(hook);
    }

    /// Resolves once the accept loop is running.
    pub async fn ready(&self) {
        self.ready.triggered().await;
    }

    /// Runs the adapter until shutdown, then drains and returns. Returns
    /// exactly once; a second call is an error.
    pub async fn serve(&self) -> Result<(), Error> {
        let listener = self
            .listener
            .lock()
            .expect("listener lock")
            .take()
            .ok_or_else(|| Error::internal("serve already called"))?;
        self.state.store(STATE_RUNNING, Ordering::SeqCst);

        self.register_portmap_entries();
        self.spawn_background_workers();

        if let Some(pm_listener) = self.portmap_listener.lock().expect("portmap lock").take() {
            self.spawn_portmap_loop(pm_listener);
        }

        self.ready.trigger();
        self.accept_loop(listener).await;

        // Listener is dropped; drain active connections under the cap.
        self.state.store(STATE_SHUTTING_DOWN, Ordering::SeqCst);
        self.deps.shutdown.trigger();
        let deadline = self.deps.settings.load().shutdown_timeout();
        let drained = self.wait_for_drain(deadline).await;
        if !drained {
            self.registry.force_close_all();
            // Give aborted tasks a beat to run their cleanups.
            let _ = self.wait_for_drain(Duration::from_millis(250)).await;
        }

        self.unregister_portmap_entries();
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.closed.trigger();
        info!("adapter closed");
        Ok(())
    }

    /// Initiates shutdown and waits for `serve` to finish draining. Safe to
    /// call repeatedly and concurrently; later calls are no-ops.
    pub async fn stop(&self) -> Result<(), Error> {
        self.deps.shutdown.trigger();
        match self.state.load(Ordering::SeqCst) {
            STATE_NEW => {
                // Never served: nothing to drain.
                self.state.store(STATE_CLOSED, Ordering::SeqCst);
                self.closed.trigger();
                Ok(())
            }
            _ => {
                self.closed.triggered().await;
                Ok(())
            }
        }
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            // Under a global cap, a slot is held before accepting and
            // released by the connection's cleanup.
            let cap_permit = match &self.conn_cap {
                Some(sem) => {
                    tokio::select! {
                        permit = Arc::clone(sem).acquire_owned() => match permit {
                            Ok(p) => Some(p),
                            Err(_) => break,
                        },
                        _ = self.deps.shutdown.triggered() => break,
                    }
                }
                None => None,
            };

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = self.deps.shutdown.triggered() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let admit = self
                        .pre_accept
                        .lock()
                        .expect("pre-accept lock")
                        .as_ref()
                        .map(|hook| hook(&peer))
                        .unwrap_or(true);
                    if !admit {
                        debug!(%peer, "connection denied by pre-accept hook");
                        continue;
                    }
                    let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    Connection::spawn(
                        stream,
                        id,
                        Arc::clone(&self.deps),
                        Arc::clone(&self.registry),
                        cap_permit,
                    );
                }
                Err(err) => {
                    if self.deps.shutdown.is_triggered() {
                        break;
                    }
                    // Transient network failure; keep accepting.
                    error!(error = %err, "accept failed");
                }
            }
        }
    }

    fn spawn_portmap_loop(&self, listener: TcpListener) {
        let deps = Arc::clone(&self.deps);
        let registry = Arc::clone(&self.registry);
        let next_id = Arc::new(AtomicU64::new(1_000_000));
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = deps.shutdown.triggered() => break,
                };
                match accepted {
                    Ok((stream, _peer)) => {
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        Connection::spawn(
                            stream,
                            id,
                            Arc::clone(&deps),
                            Arc::clone(&registry),
                            None,
                        );
                    }
                    Err(err) => {
                        if deps.shutdown.is_triggered() {
                            break;
                        }
                        error!(error = %err, "portmap accept failed");
                    }
                }
            }
        });
    }

    fn spawn_background_workers(&self) {
        // NSM restart protocol: bump state, notify peers, release stale
        // locks for unreachable hosts.
        let nsm = Arc::clone(&self.deps.nsm);
        tokio::spawn(async move {
            nsm.startup_notify().await;
        });

        // Session reaper: lease expiry, unconfirmed client eviction.
        self.deps.state4.spawn_reaper();
    }

    fn register_portmap_entries(&self) {
        let snapshot = self.deps.settings.load();
        let nfs_port = self.bound.port() as u32;
        for (prog, vers) in [
            (crate::protocol::xdr::nfs3::PROGRAM, 3),
            (crate::protocol::xdr::nfs3::PROGRAM, 4),
            (mount::PROGRAM, 1),
            (mount::PROGRAM, 3),
            (nlm::PROGRAM, nlm::VERSION),
            (nsm::PROGRAM, nsm::VERSION),
        ] {
            self.deps.portmap.set(prog, vers, portmap::IPPROTO_TCP, nfs_port);
        }
        if self.portmap_bound.is_some() {
            self.deps.portmap.set(
                portmap::PROGRAM,
                2,
                portmap::IPPROTO_TCP,
                snapshot.portmapper.port as u32,
            );
        }
    }

    fn unregister_portmap_entries(&self) {
        for (prog, vers) in [
            (crate::protocol::xdr::nfs3::PROGRAM, 3),
            (crate::protocol::xdr::nfs3::PROGRAM, 4),
            (mount::PROGRAM, 1),
            (mount::PROGRAM, 3),
            (nlm::PROGRAM, nlm::VERSION),
            (nsm::PROGRAM, nsm::VERSION),
        ] {
            self.deps.portmap.unset(prog, vers);
        }
    }

    async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let done = async {
            let mut tick = tokio::time::interval(Duration::from_millis(25));
            loop {
                tick.tick().await;
                if self.registry.active() == 0 {
                    return;
                }
            }
        };
        tokio::time::timeout(deadline, done).await.is_ok()
    }
}

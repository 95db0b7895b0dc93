//! Per-connection reader loop.
//!
//! One reader per accepted socket. Records whose msg_type is REPLY are
//! routed to the connection's pending-callback table (populated when a v4.1
//! session binds this connection as a back-channel); CALL records go through
//! dispatch. Requests are dispatched sequentially — NFS clients depend on
//! ordering between dependent operations on one connection — while the
//! bounded request semaphore still caps the work the connection can queue.
//! All writes, fore- and back-channel alike, serialize through one async
//! mutex; the callback write closure captures that same mutex.
//!
//! A panicking handler loses its request but not the connection: dispatch
//! runs on a spawned task and a panic is logged at the request boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

use crate::protocol::rpc::callback::{PendingReplies, WriteFn};
use crate::protocol::rpc::context::{ConnectionControl, Deps};
use crate::protocol::rpc::dispatch::{dispatch_record, DispatchOutcome};
use crate::protocol::rpc::wire;

/// Idle deadline applied once shutdown has fired, to unblock reads fast.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Registry of live connections, keyed by connection id, for force-close.
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<u64, AbortHandle>>,
    active: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(HashMap::new()), active: AtomicUsize::new(0) })
    }

    pub fn register(&self, id: u64, abort: AbortHandle) {
        self.inner.lock().expect("registry lock").insert(id, abort);
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub fn deregister(&self, id: u64) {
        if self.inner.lock().expect("registry lock").remove(&id).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Aborts every remaining connection task; sockets close on drop.
    pub fn force_close_all(&self) {
        let handles: Vec<AbortHandle> =
            self.inner.lock().expect("registry lock").values().cloned().collect();
        if !handles.is_empty() {
            info!(count = handles.len(), "force-closing connections");
        }
        for handle in handles {
            handle.abort();
        }
    }
}

/// Owns the socket for the lifetime of the connection task.
pub struct Connection {
    id: u64,
    peer: String,
    deps: Arc<Deps>,
    control: ConnectionControl,
    request_slots: Arc<Semaphore>,
}

/// Releases registry and cap bookkeeping even when the task is aborted.
struct Cleanup {
    id: u64,
    registry: Arc<ConnectionRegistry>,
    pending: Arc<PendingReplies>,
    _cap_permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.pending.fail_all();
        self.registry.deregister(self.id);
    }
}

impl Connection {
    /// Spawns the reader loop for an accepted socket and registers it.
    pub fn spawn(
        stream: TcpStream,
        id: u64,
        deps: Arc<Deps>,
        registry: Arc<ConnectionRegistry>,
        cap_permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let settings = deps.settings.load();
        let writer = Arc::new(tokio::sync::Mutex::new(write_half));
        let write_timeout = settings.write_timeout();
        let write: WriteFn = {
            let writer = Arc::clone(&writer);
            Arc::new(move |bytes: Vec<u8>| {
                let writer = Arc::clone(&writer);
                Box::pin(async move {
                    let mut guard = writer.lock().await;
                    timeout(write_timeout, write_half_send(&mut guard, &bytes))
                        .await
                        .map_err(|_| {
                            std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline")
                        })?
                })
            })
        };

        let pending = PendingReplies::new();
        let control = ConnectionControl { conn_id: id, write, pending: Arc::clone(&pending) };
        let connection = Connection {
            id,
            peer,
            deps: Arc::clone(&deps),
            control,
            request_slots: Arc::new(Semaphore::new(settings.max_requests_per_connection)),
        };

        let cleanup = Cleanup {
            id,
            registry: Arc::clone(&registry),
            pending,
            _cap_permit: cap_permit,
        };
        // The task waits for the registration gate so its cleanup cannot
        // deregister an id that was never registered.
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let cleanup = cleanup;
            let _ = registered_rx.await;
            connection.run(read_half).await;
            drop(cleanup);
        });
        registry.register(id, task.abort_handle());
        let _ = registered_tx.send(());
    }

    async fn run(self, mut read_half: tokio::net::tcp::OwnedReadHalf) {
        info!(conn = self.id, peer = %self.peer, "connection accepted");
        loop {
            let settings = self.deps.settings.load();
            let idle = if self.deps.shutdown.is_triggered() {
                SHUTDOWN_POLL
            } else {
                settings.idle_timeout()
            };

            // Idle deadline covers waiting for the next record marker.
            let marker = tokio::select! {
                res = timeout(idle, wire::read_marker(&mut read_half)) => match res {
                    Ok(Ok(marker)) => marker,
                    Ok(Err(err)) => {
                        debug!(conn = self.id, error = %err, "read ended");
                        break;
                    }
                    Err(_elapsed) => {
                        if self.deps.shutdown.is_triggered() {
                            debug!(conn = self.id, "closing for shutdown");
                        } else {
                            info!(conn = self.id, "idle timeout, closing");
                        }
                        break;
                    }
                },
                _ = self.deps.shutdown.triggered() => {
                    // Re-enter with the shortened deadline to drain any
                    // half-read traffic before closing.
                    continue;
                }
            };

            // Per-request read deadline covers the record body.
            let record = match timeout(
                settings.read_timeout(),
                wire::read_record_body(&mut read_half, &self.deps.pool, marker),
            )
            .await
            {
                Ok(Ok(record)) => record,
                Ok(Err(err)) => {
                    debug!(conn = self.id, error = %err, "framing error, closing");
                    break;
                }
                Err(_) => {
                    debug!(conn = self.id, "read deadline exceeded, closing");
                    break;
                }
            };

            if wire::is_reply(record.as_slice()) {
                // Back-channel reply; dropped silently when no table entry
                // (or no table) matches.
                let routed = self.control.pending.route(record.as_slice());
                trace!(conn = self.id, routed, "reply record demuxed");
                continue;
            }

            if !self.process_call(record.as_slice().to_vec()).await {
                break;
            }
        }
        info!(conn = self.id, "connection closed");
    }

    /// Runs one CALL record through dispatch on its own task. Returns false
    /// when the connection must close.
    async fn process_call(&self, record: Vec<u8>) -> bool {
        let permit = match Arc::clone(&self.request_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let deps = Arc::clone(&self.deps);
        let control = self.control.clone();
        let peer = self.peer.clone();
        let conn_id = self.id;

        let task = tokio::spawn(async move {
            let _permit = permit;
            let outcome = dispatch_record(&record, &deps, &control, &peer).await;
            match outcome {
                DispatchOutcome::Reply(bytes) => {
                    if let Err(err) = (control.write)(bytes).await {
                        debug!(conn = conn_id, error = %err, "reply write failed");
                        return false;
                    }
                    true
                }
                DispatchOutcome::Drop => true,
                DispatchOutcome::Close => false,
            }
        });

        match task.await {
            Ok(keep_going) => keep_going,
            Err(join_err) if join_err.is_panic() => {
                // Request lost, connection survives.
                error!(conn = self.id, panic = ?join_err, "handler panicked");
                true
            }
            Err(_) => false,
        }
    }
}

async fn write_half_send(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
    wire::write_record(writer, bytes).await
}

//! Back-channel plumbing: routing inbound REPLY records to waiting callers
//! and issuing server-to-client calls over an existing connection.
//!
//! A connection bound as a back-channel registers a [`PendingReplies`]
//! table. Replies are matched by XID to one-shot waiters; a REPLY with no
//! waiter is dropped silently. When the connection closes, every pending
//! entry fails so callback senders never hang on a dead link.
//!
//! Senders capture the connection's serialized write closure — never the
//! connection or adapter itself — so the callback path cannot keep either
//! alive (or form a cycle) through a stray strong reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;

use crate::protocol::rpc::wire::record_xid;
use crate::protocol::xdr::rpc::{call_body, opaque_auth, rpc_body, rpc_msg};
use crate::protocol::xdr::serialize_to_vec;

/// Serialized-write closure captured from a connection.
pub type WriteFn =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, std::io::Result<()>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// No back-channel is bound, or the bound connection went away.
    #[error("callback path down")]
    PathDown,
    #[error("callback timed out")]
    Timeout,
    #[error("callback write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// XID-keyed one-shot waiters for back-channel replies.
pub struct PendingReplies {
    // `None` once the connection has closed: late registrations fail fast.
    waiters: Mutex<Option<HashMap<u32, oneshot::Sender<Vec<u8>>>>>,
}

impl PendingReplies {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { waiters: Mutex::new(Some(HashMap::new())) })
    }

    /// Registers a waiter for `xid`. `None` when the connection is closed.
    pub fn register(&self, xid: u32) -> Option<oneshot::Receiver<Vec<u8>>> {
        let mut guard = self.waiters.lock().expect("pending replies lock");
        let map = guard.as_mut()?;
        let (tx, rx) = oneshot::channel();
        map.insert(xid, tx);
        Some(rx)
    }

    pub fn unregister(&self, xid: u32) {
        if let Some(map) = self.waiters.lock().expect("pending replies lock").as_mut() {
            map.remove(&xid);
        }
    }

    /// Routes a complete REPLY record to its waiter. Returns false when no
    /// waiter matched (the record is then dropped silently).
    pub fn route(&self, record: &[u8]) -> bool {
        let Some(xid) = record_xid(record) else { return false };
        let sender = {
            let mut guard = self.waiters.lock().expect("pending replies lock");
            guard.as_mut().and_then(|map| map.remove(&xid))
        };
        match sender {
            Some(tx) => tx.send(record.to_vec()).is_ok(),
            None => {
                debug!(xid, "unmatched back-channel reply dropped");
                false
            }
        }
    }

    /// Fails every pending entry; called on connection close.
    pub fn fail_all(&self) {
        let map = self.waiters.lock().expect("pending replies lock").take();
        if let Some(map) = map {
            debug!(pending = map.len(), "failing pending back-channel replies");
        }
        // Dropping the senders wakes every waiter with RecvError.
    }
}

/// Issues calls over a bound connection and awaits their replies.
pub struct BackChannel {
    write: WriteFn,
    pending: Arc<PendingReplies>,
    next_xid: AtomicU32,
}

impl BackChannel {
    pub fn new(write: WriteFn, pending: Arc<PendingReplies>) -> Self {
        // Start away from 0 so callback XIDs are distinguishable in traces.
        Self { write, pending, next_xid: AtomicU32::new(0x4000_0000) }
    }

    /// One call round trip under a total deadline.
    pub async fn call(
        &self,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &[u8],
        deadline: Duration,
    ) -> Result<Vec<u8>, CallbackError> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let msg = rpc_msg {
            xid,
            body: rpc_body::CALL(call_body {
                rpcvers: 2,
                prog,
                vers,
                proc,
                cred: opaque_auth::default(),
                verf: opaque_auth::default(),
            }),
        };
        let mut record = serialize_to_vec(&msg)?;
        record.extend_from_slice(args);

        let rx = self.pending.register(xid).ok_or(CallbackError::PathDown)?;
        if let Err(err) = (self.write)(record).await {
            self.pending.unregister(xid);
            return Err(CallbackError::Io(err));
        }
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CallbackError::PathDown),
            Err(_) => {
                self.pending.unregister(xid);
                Err(CallbackError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_write() -> WriteFn {
        Arc::new(|_bytes| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn reply_routes_to_registered_waiter() {
        let pending = PendingReplies::new();
        let rx = pending.register(42).unwrap();
        let mut record = 42u32.to_be_bytes().to_vec();
        record.extend_from_slice(&1u32.to_be_bytes());
        assert!(pending.route(&record));
        assert_eq!(rx.await.unwrap(), record);
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped() {
        let pending = PendingReplies::new();
        let record = 7u32.to_be_bytes().to_vec();
        assert!(!pending.route(&record));
    }

    #[tokio::test]
    async fn close_fails_pending_waiters() {
        let pending = PendingReplies::new();
        let rx = pending.register(1).unwrap();
        pending.fail_all();
        assert!(rx.await.is_err());
        assert!(pending.register(2).is_none());
    }

    #[tokio::test]
    async fn call_times_out_without_reply() {
        let pending = PendingReplies::new();
        let chan = BackChannel::new(noop_write(), pending);
        let err = chan
            .call(100003, 1, 1, b"", Duration::from_millis(20))
            .await
            .expect_err("expected timeout");
        assert!(matches!(err, CallbackError::Timeout));
    }

    #[tokio::test]
    async fn call_completes_when_reply_arrives() {
        let pending = PendingReplies::new();
        let routed: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = routed.clone();
        let pending_for_writer = pending.clone();
        let write: WriteFn = Arc::new(move |bytes: Vec<u8>| {
            let sink = sink.clone();
            let pending = pending_for_writer.clone();
            Box::pin(async move {
                // Echo a reply for whatever xid was sent.
                let xid = &bytes[..4];
                let mut reply = xid.to_vec();
                reply.extend_from_slice(&1u32.to_be_bytes());
                sink.lock().unwrap().push(bytes.clone());
                pending.route(&reply);
                Ok(())
            })
        });
        let chan = BackChannel::new(write, pending);
        let reply = chan.call(100003, 1, 4, b"cbargs", Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[4..8], &1u32.to_be_bytes());
        assert!(routed.lock().unwrap()[0].ends_with(b"cbargs"));
    }
}

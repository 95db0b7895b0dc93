//! Delegation recall and directory-notification batching.
//!
//! A recall sends CB_RECALL through the holder's back-channel session and
//! arms a revocation timer: a delegation not returned within the lease time
//! is purged, and later use of its stateid fails through the usual stateid
//! classification. Directory change notifications are coalesced inside a
//! configurable window so a burst of child operations becomes one CB_NOTIFY
//! per directory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::session::Session;
use super::state::StateManager;
use crate::protocol::xdr::nfs4::{
    clientid4, nfs_cb_opnum4, nfs_fh4, stateid4, CB_NOTIFY4args, CB_RECALL4args,
    NFS4_OTHER_SIZE,
};
use crate::protocol::xdr::Serialize;
use crate::shutdown::Shutdown;
use crate::store::RawHandle;

/// A granted delegation.
#[derive(Clone, Debug)]
pub struct Delegation {
    pub other: [u8; NFS4_OTHER_SIZE],
    pub seq: u32,
    pub client_id: clientid4,
    pub handle: RawHandle,
    pub write: bool,
    pub recalled: bool,
    pub issued: Instant,
}

impl Delegation {
    pub fn stateid(&self) -> stateid4 {
        stateid4 { seqid: self.seq, other: self.other }
    }
}

/// A granted directory delegation: the holder receives CB_NOTIFY batches
/// for the notification types it subscribed to.
#[derive(Clone, Debug)]
pub struct DirDelegation {
    pub other: [u8; NFS4_OTHER_SIZE],
    pub seq: u32,
    pub client_id: clientid4,
    pub dir: RawHandle,
    pub notification_types: crate::protocol::xdr::nfs4::bitmap4,
}

impl DirDelegation {
    pub fn stateid(&self) -> stateid4 {
        stateid4 { seqid: self.seq, other: self.other }
    }
}

/// Encodes one notify4 change entry: the notification bit for `kind` plus
/// the affected child name. Entries concatenate inside a CB_NOTIFY batch.
pub fn encode_change_entry(kind: u32, name: &[u8]) -> Vec<u8> {
    let mut mask = crate::protocol::xdr::nfs4::bitmap4::new();
    crate::protocol::xdr::nfs4::bitmap_set(&mut mask, kind);
    let mut entry = Vec::with_capacity(name.len() + 16);
    // Entries are self-framing: mask, then the name as an opaque.
    if mask.serialize(&mut entry).is_ok() {
        let _ = crate::protocol::xdr::write_opaque(name, &mut entry);
    }
    entry
}

/// Sends CB_RECALL for one delegation and revokes it if the client fails to
/// return it within the lease time.
pub async fn recall(manager: Arc<StateManager>, deleg: Delegation) {
    let Some(session) = manager.delegation_session(deleg.client_id) else {
        // No back-channel: fail fast and revoke.
        warn!(client_id = deleg.client_id, "no back-channel for recall, revoking");
        manager.revoke_delegation(&deleg.other);
        return;
    };

    let args = CB_RECALL4args {
        stateid: deleg.stateid(),
        truncate: false,
        fh: nfs_fh4 { data: deleg.handle.clone() },
    };
    let mut ops = Vec::new();
    let encoded = (nfs_cb_opnum4::OP_CB_RECALL as u32)
        .serialize(&mut ops)
        .and_then(|_| args.serialize(&mut ops));
    if encoded.is_err() {
        manager.revoke_delegation(&deleg.other);
        return;
    }

    let delivered = session.callback(ops, 1).await;
    if !delivered {
        warn!(client_id = deleg.client_id, "CB_RECALL delivery failed, revoking");
        manager.revoke_delegation(&deleg.other);
        return;
    }
    debug!(client_id = deleg.client_id, "CB_RECALL delivered, awaiting DELEGRETURN");

    // Revocation timer: DELEGRETURN removes the entry; if it is still there
    // when the lease elapses, the holder loses it.
    tokio::time::sleep(Duration::from_secs(manager.lease_seconds())).await;
    manager.revoke_delegation(&deleg.other);
}

/// One pending directory notification batch.
struct PendingBatch {
    session: Arc<Session>,
    stateid: stateid4,
    changes: Vec<u8>,
    first_queued: Instant,
}

/// Coalesces directory change notifications per directory handle within the
/// batch window, then flushes them as single CB_NOTIFY calls.
pub struct DirNotifier {
    window: Duration,
    pending: Arc<Mutex<HashMap<RawHandle, PendingBatch>>>,
    shutdown: Shutdown,
}

impl DirNotifier {
    pub fn new(window: Duration, shutdown: Shutdown) -> Self {
        Self { window, pending: Arc::new(Mutex::new(HashMap::new())), shutdown }
    }

    /// Queues one encoded change entry for `dir`. The first entry in a
    /// window schedules the flush.
    pub fn push(
        &self,
        dir: &RawHandle,
        session: Arc<Session>,
        stateid: stateid4,
        change_entry: &[u8],
    ) {
        let mut pending = self.pending.lock().expect("notifier lock");
        match pending.get_mut(dir) {
            Some(batch) => {
                batch.changes.extend_from_slice(change_entry);
            }
            None => {
                pending.insert(
                    dir.clone(),
                    PendingBatch {
                        session,
                        stateid,
                        changes: change_entry.to_vec(),
                        first_queued: Instant::now(),
                    },
                );
                self.schedule_flush(dir.clone());
            }
        }
    }

    fn schedule_flush(&self, dir: RawHandle) {
        let pending = Arc::clone(&self.pending);
        let window = self.window;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = shutdown.triggered() => {}
            }
            let batch = pending.lock().expect("notifier lock").remove(&dir);
            let Some(batch) = batch else { return };
            debug!(
                queued_ms = batch.first_queued.elapsed().as_millis() as u64,
                bytes = batch.changes.len(),
                "flushing directory notification batch"
            );
            let args = CB_NOTIFY4args {
                stateid: batch.stateid,
                fh: nfs_fh4 { data: dir },
                changes: batch.changes,
            };
            let mut ops = Vec::new();
            if (nfs_cb_opnum4::OP_CB_NOTIFY as u32)
                .serialize(&mut ops)
                .and_then(|_| args.serialize(&mut ops))
                .is_ok()
            {
                batch.session.callback_detached(ops, 1);
            }
        });
    }

    /// Number of directories with a batch in flight.
    pub fn pending_dirs(&self) -> usize {
        self.pending.lock().expect("notifier lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_coalesces_into_one_batch() {
        let notifier = DirNotifier::new(Duration::from_millis(40), Shutdown::new());
        let session = Session::new([1; 16], 1, 4, 2, 0x4000_0001);
        let dir: RawHandle = b"share:dir".to_vec();
        for i in 0..10u8 {
            notifier.push(&dir, session.clone(), stateid4::default(), &[i]);
        }
        assert_eq!(notifier.pending_dirs(), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(notifier.pending_dirs(), 0);
    }

    #[tokio::test]
    async fn distinct_directories_batch_independently() {
        let notifier = DirNotifier::new(Duration::from_millis(40), Shutdown::new());
        let session = Session::new([2; 16], 1, 4, 2, 0x4000_0001);
        notifier.push(&b"share:a".to_vec(), session.clone(), stateid4::default(), &[1]);
        notifier.push(&b"share:b".to_vec(), session.clone(), stateid4::default(), &[2]);
        assert_eq!(notifier.pending_dirs(), 2);
    }
}

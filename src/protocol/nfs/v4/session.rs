//! v4.1 sessions: slot tables with exactly-once replay semantics and the
//! per-session back-channel sender.
//!
//! Each slot stores the last sequence id it completed and the reply bytes
//! it produced. A retransmission (same sequence) is answered byte-identical
//! from the cache; the successor sequence claims the slot; anything else is
//! `SEQ_MISORDERED`. A slot is busy between claim and completion, and a
//! concurrent claim answers `DELAY`.
//!
//! The back-channel sender is one worker per session. It drains a queue of
//! callback jobs, prepends CB_SEQUENCE, and writes CB_COMPOUND through the
//! bound connection's captured write closure. No bound connection means
//! jobs fail fast — the state manager may then revoke whatever state the
//! callback was protecting.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::rpc::callback::BackChannel;
use crate::protocol::rpc::context::ConnectionControl;
use crate::protocol::xdr::nfs4::{
    clientid4, sequenceid4, sessionid4, slotid4, CB_SEQUENCE4args, CB_COMPOUND,
};
use crate::protocol::xdr::{serialize_to_vec, Serialize};

/// Default fore-channel slot count.
pub const DEFAULT_FORE_SLOTS: usize = 64;
/// Default back-channel slot count.
pub const DEFAULT_BACK_SLOTS: usize = 16;
/// Total budget for one callback attempt.
pub const CALLBACK_BUDGET: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Slot {
    seq: sequenceid4,
    cached: Option<Vec<u8>>,
    busy: bool,
}

pub struct SlotTable {
    slots: Vec<Slot>,
}

/// Outcome of presenting (slot, seq) to the replay cache.
pub enum SlotCheck {
    /// Retransmission: answer with these cached bytes, verbatim.
    Replay(Vec<u8>),
    /// Fresh request; the slot is now busy until completion.
    Accepted,
    /// Sequence neither current nor successor.
    Misordered,
    /// Someone is already in flight on this (slot, seq).
    Busy,
    /// Slot id beyond the negotiated table.
    BadSlot,
    /// Retransmission of a reply that was never cached.
    RetryUncached,
}

impl SlotTable {
    pub fn new(width: usize) -> Self {
        Self { slots: vec![Slot::default(); width.max(1)] }
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn check(&mut self, slot_id: slotid4, seq: sequenceid4) -> SlotCheck {
        let Some(slot) = self.slots.get_mut(slot_id as usize) else {
            return SlotCheck::BadSlot;
        };
        if seq == slot.seq {
            return match (&slot.cached, slot.busy) {
                (_, true) => SlotCheck::Busy,
                (Some(bytes), false) => SlotCheck::Replay(bytes.clone()),
                (None, false) => SlotCheck::RetryUncached,
            };
        }
        if seq == slot.seq.wrapping_add(1) {
            if slot.busy {
                return SlotCheck::Busy;
            }
            slot.busy = true;
            return SlotCheck::Accepted;
        }
        SlotCheck::Misordered
    }

    /// Finalizes a claimed slot with the reply to be served on replay.
    pub fn complete(&mut self, slot_id: slotid4, seq: sequenceid4, reply: Vec<u8>) {
        if let Some(slot) = self.slots.get_mut(slot_id as usize) {
            slot.seq = seq;
            slot.cached = Some(reply);
            slot.busy = false;
        }
    }

    /// Releases a claimed slot without advancing it (cancelled request).
    pub fn release(&mut self, slot_id: slotid4) {
        if let Some(slot) = self.slots.get_mut(slot_id as usize) {
            slot.busy = false;
        }
    }
}

/// One queued back-channel call: pre-encoded operations to follow
/// CB_SEQUENCE inside CB_COMPOUND.
pub struct CallbackJob {
    pub ops: Vec<u8>,
    pub op_count: u32,
    /// Resolved with delivery success.
    pub done: Option<oneshot::Sender<bool>>,
}

pub struct Session {
    pub id: sessionid4,
    pub client_id: clientid4,
    pub fore: Mutex<SlotTable>,
    pub back: Mutex<SlotTable>,
    cb_program: u32,
    backchannel: Mutex<Option<Arc<BackChannel>>>,
    cb_seq: AtomicU32,
    jobs: mpsc::UnboundedSender<CallbackJob>,
}

impl Session {
    /// Creates the session and starts its callback sender worker.
    pub fn new(
        id: sessionid4,
        client_id: clientid4,
        fore_slots: usize,
        back_slots: usize,
        cb_program: u32,
    ) -> Arc<Self> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            client_id,
            fore: Mutex::new(SlotTable::new(fore_slots)),
            back: Mutex::new(SlotTable::new(back_slots)),
            cb_program,
            backchannel: Mutex::new(None),
            cb_seq: AtomicU32::new(0),
            jobs: jobs_tx,
        });
        Session::spawn_sender(Arc::downgrade(&session), jobs_rx);
        session
    }

    /// Associates a connection as this session's back-channel.
    pub fn bind_backchannel(&self, conn: &ConnectionControl) {
        let channel = BackChannel::new(conn.write.clone(), conn.pending.clone());
        *self.backchannel.lock().expect("backchannel lock") = Some(Arc::new(channel));
        debug!(conn = conn.conn_id, "back-channel bound to session");
    }

    pub fn has_backchannel(&self) -> bool {
        self.backchannel.lock().expect("backchannel lock").is_some()
    }

    /// Enqueues a callback and awaits its delivery outcome.
    pub async fn callback(&self, ops: Vec<u8>, op_count: u32) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .jobs
            .send(CallbackJob { ops, op_count, done: Some(done_tx) })
            .is_err()
        {
            return false;
        }
        done_rx.await.unwrap_or(false)
    }

    /// Enqueues a callback without waiting (notification batching).
    pub fn callback_detached(&self, ops: Vec<u8>, op_count: u32) {
        let _ = self.jobs.send(CallbackJob { ops, op_count, done: None });
    }

    /// The sender holds only a weak reference: dropping the session ends the
    /// worker, and the worker can never keep the session (or through it the
    /// adapter) alive.
    fn spawn_sender(
        session: std::sync::Weak<Session>,
        mut jobs: mpsc::UnboundedReceiver<CallbackJob>,
    ) {
        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let Some(session) = session.upgrade() else { break };
                let delivered = session.deliver(job.ops, job.op_count).await;
                if let Some(done) = job.done {
                    let _ = done.send(delivered);
                }
            }
            debug!("session callback sender finished");
        });
    }

    async fn deliver(&self, ops: Vec<u8>, op_count: u32) -> bool {
        let channel = self.backchannel.lock().expect("backchannel lock").clone();
        let Some(channel) = channel else {
            warn!("callback with no bound back-channel, failing fast");
            return false;
        };

        let seq = self.cb_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let cb_sequence = CB_SEQUENCE4args {
            csa_sessionid: self.id,
            csa_sequenceid: seq,
            csa_slotid: 0,
            csa_highest_slotid: 0,
            csa_cachethis: false,
        };

        let body = match encode_cb_compound(&cb_sequence, &ops, op_count) {
            Ok(body) => body,
            Err(_) => return false,
        };
        match channel
            .call(self.cb_program, 1, CB_COMPOUND, &body, CALLBACK_BUDGET)
            .await
        {
            Ok(_reply) => true,
            Err(err) => {
                warn!(error = %err, "back-channel callback failed");
                false
            }
        }
    }
}

fn encode_cb_compound(
    cb_sequence: &CB_SEQUENCE4args,
    ops: &[u8],
    op_count: u32,
) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(ops.len() + 64);
    // tag, minorversion, callback_ident, op count
    crate::protocol::xdr::write_opaque(b"", &mut body)?;
    1u32.serialize(&mut body)?;
    0u32.serialize(&mut body)?;
    (1 + op_count).serialize(&mut body)?;
    (crate::protocol::xdr::nfs4::nfs_cb_opnum4::OP_CB_SEQUENCE as u32).serialize(&mut body)?;
    let seq_bytes = serialize_to_vec(cb_sequence)?;
    body.extend_from_slice(&seq_bytes);
    body.extend_from_slice(ops);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_sequence_is_accepted_and_busy() {
        let mut table = SlotTable::new(4);
        assert!(matches!(table.check(0, 1), SlotCheck::Accepted));
        // Same (slot, seq) while in flight: delay.
        assert!(matches!(table.check(0, 1), SlotCheck::Busy));
        table.complete(0, 1, b"reply-1".to_vec());
        match table.check(0, 1) {
            SlotCheck::Replay(bytes) => assert_eq!(bytes, b"reply-1"),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn successor_advances_and_old_seq_misorders() {
        let mut table = SlotTable::new(1);
        assert!(matches!(table.check(0, 1), SlotCheck::Accepted));
        table.complete(0, 1, b"a".to_vec());
        assert!(matches!(table.check(0, 2), SlotCheck::Accepted));
        table.complete(0, 2, b"b".to_vec());
        // Two behind: no longer replayable.
        assert!(matches!(table.check(0, 1), SlotCheck::Misordered));
        assert!(matches!(table.check(0, 4), SlotCheck::Misordered));
    }

    #[test]
    fn slot_beyond_table_is_rejected() {
        let mut table = SlotTable::new(2);
        assert!(matches!(table.check(2, 1), SlotCheck::BadSlot));
    }

    #[test]
    fn release_keeps_sequence_for_retry() {
        let mut table = SlotTable::new(1);
        assert!(matches!(table.check(0, 1), SlotCheck::Accepted));
        table.release(0);
        // The client may retry the same sequence after a dropped reply.
        assert!(matches!(table.check(0, 1), SlotCheck::Accepted));
    }

    #[tokio::test]
    async fn callback_without_backchannel_fails_fast() {
        let session = Session::new([7; 16], 1, 4, 2, 0x4000_0001);
        assert!(!session.callback(Vec::new(), 0).await);
    }
}

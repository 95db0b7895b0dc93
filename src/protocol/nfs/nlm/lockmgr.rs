//! Advisory byte-range lock manager, shared by NLM v4 and the NFSv4 LOCK
//! operations.
//!
//! Locks are keyed on the file handle and owned by namespaced owner-id
//! strings (`nlm:<host>:<svid>:<hex>`, `v4:<clientid>:<opaque>`). Two locks
//! conflict iff their ranges overlap, the owners differ, and at least one
//! side is exclusive. A length of zero means "to end of file".
//!
//! Blocking requests queue FIFO per file handle. When an unlock opens a
//! range, waiters are granted in queue order; each grant runs its notifier
//! (the NLM_GRANTED callback) and a failed notification releases the lock
//! immediately so the queue keeps moving. Granted locks persist through the
//! state store and are reloaded on startup for reclaim.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{LockRecord, RawHandle, StateStore};

/// Callback invoked when a queued waiter is granted; returns false when the
/// holder could not be notified and the lock must be released.
pub type GrantNotifier = Arc<dyn Fn(LockRecord) -> BoxFuture<'static, bool> + Send + Sync>;

struct Waiter {
    record: LockRecord,
    notifier: GrantNotifier,
    enqueued: Instant,
}

#[derive(Default)]
struct FileLocks {
    locks: Vec<LockRecord>,
    waiters: VecDeque<Waiter>,
}

pub enum LockOutcome {
    Granted,
    /// Conflict; the holder is reported for TEST-style denials.
    Denied(LockRecord),
    /// Conflict on a blocking request; the waiter is queued.
    Blocked,
}

pub struct LockManager {
    store: Arc<dyn StateStore>,
    files: Mutex<HashMap<RawHandle, FileLocks>>,
}

fn range_end(offset: u64, length: u64) -> u64 {
    if length == 0 {
        u64::MAX
    } else {
        offset.saturating_add(length)
    }
}

fn overlaps(a: &LockRecord, b: &LockRecord) -> bool {
    a.offset < range_end(b.offset, b.length) && b.offset < range_end(a.offset, a.length)
}

fn conflicts(a: &LockRecord, b: &LockRecord) -> bool {
    a.owner != b.owner && (a.exclusive || b.exclusive) && overlaps(a, b)
}

impl LockManager {
    pub fn new(store: Arc<dyn StateStore>) -> Arc<Self> {
        Arc::new(Self { store, files: Mutex::new(HashMap::new()) })
    }

    /// Loads persisted lock records (crash recovery / reclaim base).
    pub async fn recover(&self) {
        match self.store.load_locks().await {
            Ok(records) => {
                let count = records.len();
                let mut files = self.files.lock().await;
                for record in records {
                    files.entry(record.handle.clone()).or_default().locks.push(record);
                }
                if count > 0 {
                    info!(count, "recovered persisted lock records");
                }
            }
            Err(stat) => warn!(?stat, "lock recovery failed"),
        }
    }

    /// Reports the first conflicting holder without acquiring anything.
    pub async fn test(&self, probe: &LockRecord) -> Option<LockRecord> {
        let files = self.files.lock().await;
        files
            .get(&probe.handle)
            .and_then(|f| f.locks.iter().find(|held| conflicts(held, probe)).cloned())
    }

    /// Non-blocking acquire.
    pub async fn try_lock(&self, record: LockRecord) -> LockOutcome {
        let mut files = self.files.lock().await;
        let entry = files.entry(record.handle.clone()).or_default();
        if let Some(holder) = entry.locks.iter().find(|held| conflicts(held, &record)) {
            return LockOutcome::Denied(holder.clone());
        }
        entry.locks.push(record.clone());
        drop(files);
        self.persist(&record).await;
        LockOutcome::Granted
    }

    /// Blocking acquire: on conflict the waiter queues FIFO and `notifier`
    /// fires when the range becomes free.
    pub async fn lock_or_wait(&self, record: LockRecord, notifier: GrantNotifier) -> LockOutcome {
        let mut files = self.files.lock().await;
        let entry = files.entry(record.handle.clone()).or_default();
        if entry.locks.iter().any(|held| conflicts(held, &record)) {
            entry.waiters.push_back(Waiter {
                record,
                notifier,
                enqueued: Instant::now(),
            });
            return LockOutcome::Blocked;
        }
        entry.locks.push(record.clone());
        drop(files);
        self.persist(&record).await;
        LockOutcome::Granted
    }

    /// Removes a queued waiter. True when one matched.
    pub async fn cancel(&self, record: &LockRecord) -> bool {
        let mut files = self.files.lock().await;
        let Some(entry) = files.get_mut(&record.handle) else { return false };
        let before = entry.waiters.len();
        entry
            .waiters
            .retain(|w| !(w.record.owner == record.owner && w.record.offset == record.offset && w.record.length == record.length));
        entry.waiters.len() != before
    }

    /// Removes the matching lock; idempotent (unlocking an absent range
    /// succeeds). Grants queued waiters afterwards.
    pub async fn unlock(self: &Arc<Self>, record: &LockRecord) -> bool {
        let removed = {
            let mut files = self.files.lock().await;
            match files.get_mut(&record.handle) {
                Some(entry) => {
                    let before = entry.locks.len();
                    entry.locks.retain(|held| {
                        !(held.owner == record.owner
                            && held.offset == record.offset
                            && held.length == record.length)
                    });
                    before != entry.locks.len()
                }
                None => false,
            }
        };
        if removed {
            self.unpersist(record).await;
        }
        self.process_queue(&record.handle).await;
        true
    }

    /// Drops every lock and waiter for a removed file.
    pub async fn forget_file(&self, handle: &RawHandle) {
        let dropped = self.files.lock().await.remove(handle);
        if let Some(entry) = dropped {
            for record in &entry.locks {
                self.unpersist(record).await;
            }
        }
    }

    /// Releases everything owned by ids starting with `prefix` (crashed NLM
    /// host, evicted v4 client), then drives the affected queues.
    pub async fn release_owner_prefix(self: &Arc<Self>, prefix: &str) {
        let (released, touched) = {
            let mut files = self.files.lock().await;
            let mut released = Vec::new();
            let mut touched = Vec::new();
            for (handle, entry) in files.iter_mut() {
                let before = entry.locks.len();
                entry.locks.retain(|held| {
                    if held.owner.starts_with(prefix) {
                        released.push(held.clone());
                        false
                    } else {
                        true
                    }
                });
                entry.waiters.retain(|w| !w.record.owner.starts_with(prefix));
                if entry.locks.len() != before {
                    touched.push(handle.clone());
                }
            }
            (released, touched)
        };
        if !released.is_empty() {
            info!(owner_prefix = prefix, count = released.len(), "released locks");
        }
        for record in &released {
            self.unpersist(record).await;
        }
        for handle in touched {
            self.process_queue(&handle).await;
        }
    }

    /// Grants as many queued waiters as the free ranges allow, FIFO. Grant
    /// notification runs outside the table lock; a failed notification
    /// releases the just-granted lock.
    async fn process_queue(self: &Arc<Self>, handle: &RawHandle) {
        let granted: Vec<(LockRecord, GrantNotifier, Instant)> = {
            let mut files = self.files.lock().await;
            let Some(entry) = files.get_mut(handle) else { return };
            let mut granted = Vec::new();
            let mut remaining = VecDeque::new();
            while let Some(waiter) = entry.waiters.pop_front() {
                if entry.locks.iter().any(|held| conflicts(held, &waiter.record)) {
                    remaining.push_back(waiter);
                } else {
                    entry.locks.push(waiter.record.clone());
                    granted.push((waiter.record, waiter.notifier, waiter.enqueued));
                }
            }
            entry.waiters = remaining;
            granted
        };

        for (record, notifier, enqueued) in granted {
            self.persist(&record).await;
            debug!(
                owner = %record.owner,
                waited_ms = enqueued.elapsed().as_millis() as u64,
                "lock granted from queue"
            );
            let delivered = notifier(record.clone()).await;
            if !delivered {
                warn!(owner = %record.owner, "grant notification failed, releasing lock");
                // Recursion depth is bounded by the waiter queue length.
                Box::pin(self.unlock(&record)).await;
            }
        }
    }

    async fn persist(&self, record: &LockRecord) {
        if let Err(stat) = self.store.save_lock(record).await {
            warn!(?stat, owner = %record.owner, "lock persistence failed");
        }
    }

    async fn unpersist(&self, record: &LockRecord) {
        if let Err(stat) = self.store.remove_lock(record).await {
            warn!(?stat, owner = %record.owner, "lock removal persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::nfs3::nfsstat3;
    use crate::store::{ClientRecord, NsmRegistration, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullStateStore;

    #[async_trait]
    impl StateStore for NullStateStore {
        async fn save_lock(&self, _r: &LockRecord) -> StoreResult<()> {
            Ok(())
        }
        async fn remove_lock(&self, _r: &LockRecord) -> StoreResult<()> {
            Ok(())
        }
        async fn load_locks(&self) -> StoreResult<Vec<LockRecord>> {
            Ok(Vec::new())
        }
        async fn save_nsm_registration(&self, _r: &NsmRegistration) -> StoreResult<()> {
            Ok(())
        }
        async fn remove_nsm_registration(&self, _m: &str) -> StoreResult<()> {
            Ok(())
        }
        async fn load_nsm_registrations(&self) -> StoreResult<Vec<NsmRegistration>> {
            Ok(Vec::new())
        }
        async fn bump_nsm_state(&self) -> StoreResult<i32> {
            Ok(1)
        }
        async fn nsm_state(&self) -> StoreResult<i32> {
            Err(nfsstat3::NFS3ERR_NOTSUPP)
        }
        async fn save_client(&self, _r: &ClientRecord) -> StoreResult<()> {
            Ok(())
        }
        async fn remove_client(&self, _id: u64) -> StoreResult<()> {
            Ok(())
        }
        async fn load_clients(&self) -> StoreResult<Vec<ClientRecord>> {
            Ok(Vec::new())
        }
    }

    fn record(owner: &str, offset: u64, length: u64, exclusive: bool) -> LockRecord {
        LockRecord {
            handle: b"file-1".to_vec(),
            owner: owner.to_string(),
            offset,
            length,
            exclusive,
            reclaim: false,
        }
    }

    fn manager() -> Arc<LockManager> {
        LockManager::new(Arc::new(NullStateStore))
    }

    fn always_delivered() -> GrantNotifier {
        Arc::new(|_record| Box::pin(async { true }))
    }

    #[tokio::test]
    async fn exclusive_lock_blocks_overlapping_owners() {
        let mgr = manager();
        assert!(matches!(
            mgr.try_lock(record("nlm:a:1:00", 0, 0, true)).await,
            LockOutcome::Granted
        ));
        // Overlapping exclusive from another owner: denied with the holder.
        match mgr.try_lock(record("nlm:b:1:00", 10, 5, true)).await {
            LockOutcome::Denied(holder) => assert_eq!(holder.owner, "nlm:a:1:00"),
            _ => panic!("expected denial"),
        }
        // Shared overlapping: still denied against exclusive.
        assert!(matches!(
            mgr.try_lock(record("nlm:b:1:00", 0, 1, false)).await,
            LockOutcome::Denied(_)
        ));
    }

    #[tokio::test]
    async fn shared_locks_coexist() {
        let mgr = manager();
        assert!(matches!(
            mgr.try_lock(record("nlm:a:1:00", 0, 100, false)).await,
            LockOutcome::Granted
        ));
        assert!(matches!(
            mgr.try_lock(record("nlm:b:1:00", 50, 100, false)).await,
            LockOutcome::Granted
        ));
    }

    #[tokio::test]
    async fn same_owner_overlap_is_not_a_conflict() {
        let mgr = manager();
        assert!(matches!(
            mgr.try_lock(record("nlm:a:1:00", 0, 10, true)).await,
            LockOutcome::Granted
        ));
        assert!(matches!(
            mgr.try_lock(record("nlm:a:1:00", 5, 10, true)).await,
            LockOutcome::Granted
        ));
    }

    #[tokio::test]
    async fn non_overlapping_ranges_coexist() {
        let mgr = manager();
        assert!(matches!(
            mgr.try_lock(record("nlm:a:1:00", 0, 10, true)).await,
            LockOutcome::Granted
        ));
        assert!(matches!(
            mgr.try_lock(record("nlm:b:1:00", 10, 10, true)).await,
            LockOutcome::Granted
        ));
    }

    #[tokio::test]
    async fn unlock_is_idempotent() {
        let mgr = manager();
        let rec = record("nlm:a:1:00", 0, 10, true);
        assert!(matches!(mgr.try_lock(rec.clone()).await, LockOutcome::Granted));
        assert!(mgr.unlock(&rec).await);
        // Unlocking a range that no longer exists still succeeds.
        assert!(mgr.unlock(&rec).await);
    }

    #[tokio::test]
    async fn blocked_waiters_grant_fifo_on_unlock() {
        let mgr = manager();
        let holder = record("nlm:a:1:00", 0, 0, true);
        assert!(matches!(mgr.try_lock(holder.clone()).await, LockOutcome::Granted));

        let order = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let notifier_for = |order: Arc<std::sync::Mutex<Vec<String>>>| -> GrantNotifier {
            Arc::new(move |granted: LockRecord| {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(granted.owner.clone());
                    true
                })
            })
        };

        assert!(matches!(
            mgr.lock_or_wait(record("nlm:b:1:00", 0, 0, false), notifier_for(order.clone()))
                .await,
            LockOutcome::Blocked
        ));
        assert!(matches!(
            mgr.lock_or_wait(record("nlm:c:1:00", 0, 0, false), notifier_for(order.clone()))
                .await,
            LockOutcome::Blocked
        ));

        mgr.unlock(&holder).await;
        let granted = order.lock().unwrap().clone();
        assert_eq!(granted, vec!["nlm:b:1:00".to_string(), "nlm:c:1:00".to_string()]);
    }

    #[tokio::test]
    async fn failed_grant_notification_releases_the_lock() {
        let mgr = manager();
        let holder = record("nlm:a:1:00", 0, 0, true);
        assert!(matches!(mgr.try_lock(holder.clone()).await, LockOutcome::Granted));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counting = attempts.clone();
        let failing: GrantNotifier = Arc::new(move |_rec| {
            counting.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { false })
        });
        assert!(matches!(
            mgr.lock_or_wait(record("nlm:b:1:00", 0, 0, true), failing).await,
            LockOutcome::Blocked
        ));

        mgr.unlock(&holder).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        // The failed grantee's lock is gone: a third owner can acquire.
        assert!(matches!(
            mgr.try_lock(record("nlm:c:1:00", 0, 0, true)).await,
            LockOutcome::Granted
        ));
    }

    #[tokio::test]
    async fn cancel_removes_a_waiter() {
        let mgr = manager();
        let holder = record("nlm:a:1:00", 0, 0, true);
        assert!(matches!(mgr.try_lock(holder.clone()).await, LockOutcome::Granted));
        let waiter = record("nlm:b:1:00", 0, 0, true);
        assert!(matches!(
            mgr.lock_or_wait(waiter.clone(), always_delivered()).await,
            LockOutcome::Blocked
        ));
        assert!(mgr.cancel(&waiter).await);
        assert!(!mgr.cancel(&waiter).await);
    }

    #[tokio::test]
    async fn owner_prefix_release_frees_and_grants() {
        let mgr = manager();
        assert!(matches!(
            mgr.try_lock(record("nlm:crashed-host:7:aa", 0, 0, true)).await,
            LockOutcome::Granted
        ));
        let order = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink = order.clone();
        let notifier: GrantNotifier = Arc::new(move |granted: LockRecord| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(granted.owner);
                true
            })
        });
        assert!(matches!(
            mgr.lock_or_wait(record("nlm:alive:1:bb", 0, 0, true), notifier).await,
            LockOutcome::Blocked
        ));

        mgr.release_owner_prefix("nlm:crashed-host:").await;
        assert_eq!(order.lock().unwrap().as_slice(), &["nlm:alive:1:bb".to_string()]);
    }
}

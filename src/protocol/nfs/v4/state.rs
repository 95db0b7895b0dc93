//! NFSv4 state manager: client records, sessions, open/lock/delegation
//! state, leases, the grace period, and the pseudo-fs namespace.
//!
//! Clients own their state through ids and string keys, never through
//! object references, so the client table, session table and state tables
//! form no reference cycles. The client table is sharded by client-id hash
//! with a read-biased lock per shard; the other tables are single
//! read-biased maps (writes are comparatively rare).
//!
//! Stateids are 16 bytes: a 4-byte per-state sequence counter plus 12
//! opaque bytes laid out as one kind byte, three boot-verifier bytes and an
//! 8-byte mint counter. The boot bytes distinguish a stale stateid from a
//! bad one after restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tracing::{debug, info, warn};

use super::delegation::{Delegation, DirDelegation, DirNotifier};
use super::pseudofs::PseudoFs;
use super::session::{Session, DEFAULT_BACK_SLOTS, DEFAULT_FORE_SLOTS};
use crate::protocol::nfs::nlm::lockmgr::LockManager;
use crate::protocol::xdr::nfs4::{
    cb_client4, clientid4, nfsstat4, sessionid4, stateid4, verifier4, CREATE_SESSION4resok,
    NFS4_OTHER_SIZE, NFS4_SESSIONID_SIZE,
};
use crate::settings::SettingsHandle;
use crate::shutdown::Shutdown;
use crate::store::{ClientRecord, RawHandle, Stores};

const CLIENT_SHARDS: usize = 16;

/// Stateid kind byte (first byte of the opaque `other` field).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StateKind {
    Open = 1,
    Lock = 2,
    Delegation = 3,
}

/// One v4 client record.
pub struct ClientState {
    pub client_id: clientid4,
    pub owner: Vec<u8>,
    pub verifier: verifier4,
    pub principal: String,
    pub confirmed: bool,
    /// Confirmation verifier for the v4.0 SETCLIENTID handshake.
    pub confirm_verifier: verifier4,
    pub lease_renewed: Instant,
    pub created: Instant,
    pub sessions: Vec<sessionid4>,
    /// Sequence expected by the next CREATE_SESSION.
    pub cs_sequence: u32,
    /// Cached CREATE_SESSION result for replay.
    pub cs_cached: Option<CREATE_SESSION4resok>,
    /// v4.0 callback target advertised by SETCLIENTID.
    pub callback: Option<cb_client4>,
    pub reclaim_complete: bool,
}

pub struct OpenState {
    pub other: [u8; NFS4_OTHER_SIZE],
    pub seq: u32,
    pub client_id: clientid4,
    pub handle: RawHandle,
    pub owner: Vec<u8>,
    pub share_access: u32,
    pub confirmed: bool,
}

pub struct LockState {
    pub other: [u8; NFS4_OTHER_SIZE],
    pub seq: u32,
    pub client_id: clientid4,
    pub open_other: [u8; NFS4_OTHER_SIZE],
    pub handle: RawHandle,
    /// Owner id in the shared lock table (`v4:<clientid>:<hex>`).
    pub owner_id: String,
}

struct Shard<V> {
    map: RwLock<HashMap<u64, V>>,
}

/// Client-id-hash sharded map with a read-biased lock per shard.
struct Sharded<V> {
    shards: Vec<Shard<V>>,
}

impl<V> Sharded<V> {
    fn new() -> Self {
        Self {
            shards: (0..CLIENT_SHARDS)
                .map(|_| Shard { map: RwLock::new(HashMap::new()) })
                .collect(),
        }
    }

    fn shard(&self, key: u64) -> &Shard<V> {
        &self.shards[(key % CLIENT_SHARDS as u64) as usize]
    }

    fn read<R>(&self, key: u64, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).map.read().expect("shard lock").get(&key).map(f)
    }

    fn write<R>(&self, key: u64, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard(key).map.write().expect("shard lock").get_mut(&key).map(f)
    }

    fn insert(&self, key: u64, value: V) {
        self.shard(key).map.write().expect("shard lock").insert(key, value);
    }

    fn remove(&self, key: u64) -> Option<V> {
        self.shard(key).map.write().expect("shard lock").remove(&key)
    }

    fn keys(&self) -> Vec<u64> {
        self.shards
            .iter()
            .flat_map(|s| s.map.read().expect("shard lock").keys().copied().collect::<Vec<_>>())
            .collect()
    }
}

pub struct StateManager {
    settings: SettingsHandle,
    stores: Stores,
    shutdown: Shutdown,
    locks: Arc<LockManager>,
    /// Per-boot instance verifier, also the EXCHANGE_ID server scope seed.
    server_verifier: verifier4,
    clients: Sharded<ClientState>,
    owner_index: Mutex<HashMap<Vec<u8>, clientid4>>,
    sessions: RwLock<HashMap<sessionid4, Arc<Session>>>,
    opens: RwLock<HashMap<[u8; NFS4_OTHER_SIZE], OpenState>>,
    lock_states: RwLock<HashMap<[u8; NFS4_OTHER_SIZE], LockState>>,
    delegations: Mutex<HashMap<[u8; NFS4_OTHER_SIZE], Delegation>>,
    dir_delegations: Mutex<HashMap<[u8; NFS4_OTHER_SIZE], DirDelegation>>,
    pseudofs: RwLock<PseudoFs>,
    pseudo_rebuilds: AtomicU64,
    grace_until: Mutex<Option<Instant>>,
    next_client: AtomicU64,
    next_state: AtomicU64,
    notifier: DirNotifier,
}

impl StateManager {
    pub fn new(
        settings: SettingsHandle,
        stores: Stores,
        shutdown: Shutdown,
        locks: Arc<LockManager>,
    ) -> Arc<Self> {
        let mut server_verifier = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut server_verifier);

        let shares = stores.metadata.shares();
        let pseudofs = PseudoFs::build(&shares, 1);
        let batch_window = settings.load().batch_window();

        let manager = Arc::new(Self {
            settings,
            stores,
            shutdown: shutdown.clone(),
            locks,
            server_verifier,
            clients: Sharded::new(),
            owner_index: Mutex::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            opens: RwLock::new(HashMap::new()),
            lock_states: RwLock::new(HashMap::new()),
            delegations: Mutex::new(HashMap::new()),
            dir_delegations: Mutex::new(HashMap::new()),
            pseudofs: RwLock::new(pseudofs),
            pseudo_rebuilds: AtomicU64::new(1),
            grace_until: Mutex::new(None),
            next_client: AtomicU64::new(1),
            next_state: AtomicU64::new(1),
            notifier: DirNotifier::new(batch_window, shutdown),
        });
        manager.restore_clients();
        manager
    }

    /// Reloads persisted client records so reclaim can match them.
    fn restore_clients(self: &Arc<Self>) {
        let stores = self.stores.clone();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let records = match stores.state.load_clients().await {
                Ok(records) => records,
                Err(stat) => {
                    warn!(?stat, "v4 client restore failed");
                    return;
                }
            };
            let count = records.len();
            for record in records {
                manager.adopt_restored_client(record);
            }
            if count > 0 {
                info!(count, "restored v4 client records");
            }
        });
    }

    fn adopt_restored_client(&self, record: ClientRecord) {
        self.next_client.fetch_max(record.client_id + 1, Ordering::SeqCst);
        self.owner_index
            .lock()
            .expect("owner index lock")
            .insert(record.owner.clone(), record.client_id);
        self.clients.insert(
            record.client_id,
            ClientState {
                client_id: record.client_id,
                owner: record.owner,
                verifier: record.verifier,
                principal: record.principal,
                confirmed: record.confirmed,
                confirm_verifier: [0; 8],
                lease_renewed: Instant::now(),
                created: Instant::now(),
                sessions: Vec::new(),
                cs_sequence: 1,
                cs_cached: None,
                callback: None,
                reclaim_complete: false,
            },
        );
    }

    pub fn server_verifier(&self) -> verifier4 {
        self.server_verifier
    }

    pub fn lease_seconds(&self) -> u64 {
        self.settings.load().nfs.lease_time
    }

    pub fn notifier(&self) -> &DirNotifier {
        &self.notifier
    }

    // --- grace period ---

    pub fn begin_grace(&self) {
        let window = self.settings.load().grace_period();
        *self.grace_until.lock().expect("grace lock") = Some(Instant::now() + window);
        info!(seconds = window.as_secs(), "grace period started");
    }

    pub fn in_grace(&self) -> bool {
        let mut guard = self.grace_until.lock().expect("grace lock");
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    /// Administrative "no more reclaims expected" signal.
    pub fn end_grace(&self) {
        if self.grace_until.lock().expect("grace lock").take().is_some() {
            info!("grace period ended");
        }
    }

    /// RECLAIM_COMPLETE bookkeeping: once every active client has finished
    /// reclaiming, the grace period ends early.
    pub fn reclaim_complete(&self, client_id: clientid4) -> nfsstat4 {
        let updated = self.clients.write(client_id, |client| {
            if client.reclaim_complete {
                nfsstat4::NFS4ERR_COMPLETE_ALREADY
            } else {
                client.reclaim_complete = true;
                nfsstat4::NFS4_OK
            }
        });
        let status = match updated {
            Some(status) => status,
            None => return nfsstat4::NFS4ERR_STALE_CLIENTID,
        };
        if status == nfsstat4::NFS4_OK {
            let all_done = self
                .clients
                .keys()
                .into_iter()
                .all(|id| self.clients.read(id, |c| c.reclaim_complete).unwrap_or(true));
            if all_done {
                self.end_grace();
            }
        }
        status
    }

    // --- client lifecycle ---

    fn mint_clientid(&self) -> clientid4 {
        let counter = self.next_client.fetch_add(1, Ordering::SeqCst);
        let boot = u64::from_be_bytes(self.server_verifier) & 0xffff_ffff_0000_0000;
        boot | (counter & 0xffff_ffff)
    }

    /// EXCHANGE_ID: find-or-create by owner id.
    /// Returns (client id, sequence for CREATE_SESSION, already-confirmed).
    pub fn exchange_id(
        &self,
        owner: Vec<u8>,
        verifier: verifier4,
        principal: &str,
    ) -> (clientid4, u32, bool) {
        let existing = self.owner_index.lock().expect("owner index lock").get(&owner).copied();
        if let Some(client_id) = existing {
            let same_incarnation = self
                .clients
                .read(client_id, |c| c.verifier == verifier && c.principal == principal)
                .unwrap_or(false);
            if same_incarnation {
                let (seq, confirmed) = self
                    .clients
                    .read(client_id, |c| (c.cs_sequence, c.confirmed))
                    .unwrap_or((1, false));
                return (client_id, seq, confirmed);
            }
            // New incarnation of the same owner: the old state is dead.
            self.purge_client(client_id);
        }

        let client_id = self.mint_clientid();
        let mut confirm_verifier = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut confirm_verifier);
        self.owner_index.lock().expect("owner index lock").insert(owner.clone(), client_id);
        self.clients.insert(
            client_id,
            ClientState {
                client_id,
                owner,
                verifier,
                principal: principal.to_string(),
                confirmed: false,
                confirm_verifier,
                lease_renewed: Instant::now(),
                created: Instant::now(),
                sessions: Vec::new(),
                cs_sequence: 1,
                cs_cached: None,
                callback: None,
                reclaim_complete: false,
            },
        );
        debug!(client_id, "client registered by EXCHANGE_ID");
        (client_id, 1, false)
    }

    /// v4.0 SETCLIENTID. Returns (client id, confirmation verifier).
    pub fn setclientid(
        &self,
        owner: Vec<u8>,
        verifier: verifier4,
        principal: &str,
        callback: cb_client4,
    ) -> (clientid4, verifier4) {
        let (client_id, _, _) = self.exchange_id(owner, verifier, principal);
        let confirm = self
            .clients
            .write(client_id, |client| {
                client.callback = Some(callback);
                client.confirm_verifier
            })
            .unwrap_or([0; 8]);
        (client_id, confirm)
    }

    pub fn setclientid_confirm(&self, client_id: clientid4, confirm: verifier4) -> nfsstat4 {
        match self.clients.write(client_id, |client| {
            if client.confirm_verifier == confirm {
                client.confirmed = true;
                client.lease_renewed = Instant::now();
                nfsstat4::NFS4_OK
            } else {
                nfsstat4::NFS4ERR_STALE_CLIENTID
            }
        }) {
            Some(status) => {
                if status == nfsstat4::NFS4_OK {
                    self.persist_client(client_id);
                }
                status
            }
            None => nfsstat4::NFS4ERR_STALE_CLIENTID,
        }
    }

    pub fn renew_lease(&self, client_id: clientid4) -> nfsstat4 {
        match self.clients.write(client_id, |client| client.lease_renewed = Instant::now()) {
            Some(()) => nfsstat4::NFS4_OK,
            None => nfsstat4::NFS4ERR_STALE_CLIENTID,
        }
    }

    pub fn destroy_clientid(&self, client_id: clientid4) -> nfsstat4 {
        let has_sessions =
            self.clients.read(client_id, |c| !c.sessions.is_empty()).unwrap_or(false);
        if has_sessions {
            return nfsstat4::NFS4ERR_CLID_INUSE;
        }
        if self.clients.read(client_id, |_| ()).is_none() {
            return nfsstat4::NFS4ERR_STALE_CLIENTID;
        }
        self.purge_client(client_id);
        nfsstat4::NFS4_OK
    }

    fn persist_client(&self, client_id: clientid4) {
        let record = self.clients.read(client_id, |c| ClientRecord {
            client_id,
            owner: c.owner.clone(),
            verifier: c.verifier,
            principal: c.principal.clone(),
            confirmed: c.confirmed,
            lease_start: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        });
        if let Some(record) = record {
            let store = self.stores.state.clone();
            tokio::spawn(async move {
                if let Err(stat) = store.save_client(&record).await {
                    warn!(?stat, client_id = record.client_id, "client persistence failed");
                }
            });
        }
    }

    /// Removes a client and everything it owns.
    fn purge_client(&self, client_id: clientid4) {
        let Some(client) = self.clients.remove(client_id) else { return };
        self.owner_index.lock().expect("owner index lock").remove(&client.owner);

        {
            let mut sessions = self.sessions.write().expect("session table lock");
            for id in &client.sessions {
                sessions.remove(id);
            }
        }
        self.opens.write().expect("open table lock").retain(|_, o| o.client_id != client_id);
        self.lock_states
            .write()
            .expect("lock state table lock")
            .retain(|_, l| l.client_id != client_id);
        self.delegations
            .lock()
            .expect("delegation table lock")
            .retain(|_, d| d.client_id != client_id);
        self.dir_delegations
            .lock()
            .expect("dir delegation table lock")
            .retain(|_, d| d.client_id != client_id);

        let locks = Arc::clone(&self.locks);
        let prefix = format!("v4:{client_id}:");
        tokio::spawn(async move {
            locks.release_owner_prefix(&prefix).await;
        });

        let store = self.stores.state.clone();
        tokio::spawn(async move {
            let _ = store.remove_client(client_id).await;
        });
        info!(client_id, "client purged");
    }

    // --- sessions ---

    fn mint_sessionid(&self) -> sessionid4 {
        let mut id = [0u8; NFS4_SESSIONID_SIZE];
        id[..8].copy_from_slice(&self.server_verifier);
        id[8..].copy_from_slice(&self.next_state.fetch_add(1, Ordering::SeqCst).to_be_bytes());
        id
    }

    /// CREATE_SESSION with per-client sequencing and replay of the cached
    /// result.
    pub fn create_session(
        &self,
        client_id: clientid4,
        sequence: u32,
        fore_requests: u32,
        back_requests: u32,
        cb_program: u32,
    ) -> Result<(Arc<Session>, CREATE_SESSION4resok, bool), nfsstat4> {
        enum Decision {
            Replay(CREATE_SESSION4resok),
            Misordered,
            New,
        }
        let decision = self
            .clients
            .read(client_id, |client| {
                if sequence == client.cs_sequence.wrapping_sub(1) {
                    match &client.cs_cached {
                        Some(cached) => Decision::Replay(cached.clone()),
                        None => Decision::Misordered,
                    }
                } else if sequence == client.cs_sequence {
                    Decision::New
                } else {
                    Decision::Misordered
                }
            })
            .ok_or(nfsstat4::NFS4ERR_STALE_CLIENTID)?;

        match decision {
            Decision::Replay(res) => {
                let session = self
                    .sessions
                    .read()
                    .expect("session table lock")
                    .get(&res.csr_sessionid)
                    .cloned()
                    .ok_or(nfsstat4::NFS4ERR_STALE_CLIENTID)?;
                Ok((session, res, true))
            }
            Decision::Misordered => Err(nfsstat4::NFS4ERR_SEQ_MISORDERED),
            Decision::New => {
                let id = self.mint_sessionid();
                let fore_slots = if fore_requests == 0 {
                    DEFAULT_FORE_SLOTS
                } else {
                    (fore_requests as usize).clamp(1, 256)
                };
                let back_slots = if back_requests == 0 {
                    DEFAULT_BACK_SLOTS
                } else {
                    (back_requests as usize).clamp(1, 64)
                };
                let session = Session::new(id, client_id, fore_slots, back_slots, cb_program);
                self.sessions.write().expect("session table lock").insert(id, session.clone());

                let res = CREATE_SESSION4resok {
                    csr_sessionid: id,
                    csr_sequence: sequence,
                    csr_flags: 0,
                    csr_fore_chan_attrs: Default::default(),
                    csr_back_chan_attrs: Default::default(),
                };
                self.clients.write(client_id, |client| {
                    client.sessions.push(id);
                    client.confirmed = true;
                    client.cs_sequence = sequence.wrapping_add(1);
                    client.cs_cached = Some(res.clone());
                    client.lease_renewed = Instant::now();
                });
                self.persist_client(client_id);
                Ok((session, res, false))
            }
        }
    }

    pub fn lookup_session(&self, id: &sessionid4) -> Option<Arc<Session>> {
        self.sessions.read().expect("session table lock").get(id).cloned()
    }

    pub fn destroy_session(&self, id: &sessionid4) -> nfsstat4 {
        let removed = self.sessions.write().expect("session table lock").remove(id);
        match removed {
            Some(session) => {
                self.clients.write(session.client_id, |client| {
                    client.sessions.retain(|s| s != id);
                });
                nfsstat4::NFS4_OK
            }
            None => nfsstat4::NFS4ERR_BADSESSION,
        }
    }

    // --- stateids ---

    fn mint_other(&self, kind: StateKind) -> [u8; NFS4_OTHER_SIZE] {
        let mut other = [0u8; NFS4_OTHER_SIZE];
        other[0] = kind as u8;
        other[1..4].copy_from_slice(&self.server_verifier[..3]);
        other[4..].copy_from_slice(&self.next_state.fetch_add(1, Ordering::SeqCst).to_be_bytes());
        other
    }

    /// Distinguishes stale (previous boot) stateids from unknown ones.
    pub fn classify_unknown_stateid(&self, stateid: &stateid4) -> nfsstat4 {
        if stateid.other[1..4] == self.server_verifier[..3] {
            nfsstat4::NFS4ERR_BAD_STATEID
        } else {
            nfsstat4::NFS4ERR_STALE_STATEID
        }
    }

    // --- opens ---

    /// Mints (or bumps) the open state for (client, owner, handle).
    pub fn open(
        &self,
        client_id: clientid4,
        owner: Vec<u8>,
        handle: &RawHandle,
        share_access: u32,
        confirmed: bool,
    ) -> Result<stateid4, nfsstat4> {
        if self.clients.read(client_id, |_| ()).is_none() {
            return Err(nfsstat4::NFS4ERR_STALE_CLIENTID);
        }
        self.renew_lease(client_id);

        let mut opens = self.opens.write().expect("open table lock");
        let existing = opens.values_mut().find(|o| {
            o.client_id == client_id && o.owner == owner && &o.handle == handle
        });
        if let Some(open) = existing {
            open.seq = open.seq.wrapping_add(1);
            open.share_access |= share_access;
            return Ok(stateid4 { seqid: open.seq, other: open.other });
        }

        let other = self.mint_other(StateKind::Open);
        opens.insert(
            other,
            OpenState {
                other,
                seq: 1,
                client_id,
                handle: handle.clone(),
                owner,
                share_access,
                confirmed,
            },
        );
        Ok(stateid4 { seqid: 1, other })
    }

    pub fn confirm_open(&self, stateid: &stateid4) -> Result<stateid4, nfsstat4> {
        let mut opens = self.opens.write().expect("open table lock");
        let open = opens
            .get_mut(&stateid.other)
            .ok_or_else(|| self.classify_unknown_stateid(stateid))?;
        if stateid.seqid != open.seq {
            return Err(nfsstat4::NFS4ERR_OLD_STATEID);
        }
        open.confirmed = true;
        open.seq = open.seq.wrapping_add(1);
        Ok(stateid4 { seqid: open.seq, other: open.other })
    }

    pub fn downgrade_open(
        &self,
        stateid: &stateid4,
        share_access: u32,
    ) -> Result<stateid4, nfsstat4> {
        let mut opens = self.opens.write().expect("open table lock");
        let open = opens
            .get_mut(&stateid.other)
            .ok_or_else(|| self.classify_unknown_stateid(stateid))?;
        if stateid.seqid != open.seq {
            return Err(nfsstat4::NFS4ERR_OLD_STATEID);
        }
        if share_access & !open.share_access != 0 {
            return Err(nfsstat4::NFS4ERR_INVAL);
        }
        open.share_access = share_access;
        open.seq = open.seq.wrapping_add(1);
        Ok(stateid4 { seqid: open.seq, other: open.other })
    }

    /// CLOSE: retires the open state and releases the locks held under it.
    pub fn close(&self, stateid: &stateid4) -> Result<stateid4, nfsstat4> {
        let open = {
            let mut opens = self.opens.write().expect("open table lock");
            match opens.get(&stateid.other) {
                Some(open) if stateid.seqid == open.seq => {
                    opens.remove(&stateid.other).expect("present")
                }
                Some(_) => return Err(nfsstat4::NFS4ERR_OLD_STATEID),
                None => return Err(self.classify_unknown_stateid(stateid)),
            }
        };

        let owners: Vec<String> = {
            let mut lock_states = self.lock_states.write().expect("lock state table lock");
            let owners = lock_states
                .values()
                .filter(|l| l.open_other == open.other)
                .map(|l| l.owner_id.clone())
                .collect();
            lock_states.retain(|_, l| l.open_other != open.other);
            owners
        };
        for owner in owners {
            let locks = Arc::clone(&self.locks);
            tokio::spawn(async move {
                locks.release_owner_prefix(&owner).await;
            });
        }
        self.renew_lease(open.client_id);
        Ok(stateid4 { seqid: open.seq.wrapping_add(1), other: open.other })
    }

    /// Resolves an open stateid to its file handle, accepting the special
    /// stateids for stateless access.
    pub fn resolve_open(
        &self,
        stateid: &stateid4,
        current_fh: &RawHandle,
    ) -> Result<RawHandle, nfsstat4> {
        if stateid.is_special() {
            return Ok(current_fh.clone());
        }
        if stateid.other[0] == StateKind::Delegation as u8 {
            let delegations = self.delegations.lock().expect("delegation table lock");
            let deleg = delegations
                .get(&stateid.other)
                .ok_or_else(|| self.classify_unknown_stateid(stateid))?;
            return Ok(deleg.handle.clone());
        }
        let opens = self.opens.read().expect("open table lock");
        let open = opens
            .get(&stateid.other)
            .ok_or_else(|| self.classify_unknown_stateid(stateid))?;
        if stateid.seqid != 0 && stateid.seqid != open.seq {
            return Err(nfsstat4::NFS4ERR_OLD_STATEID);
        }
        Ok(open.handle.clone())
    }

    // --- byte-range locks ---

    /// Lock-owner id string for the shared lock table.
    pub fn lock_owner_id(client_id: clientid4, owner: &[u8]) -> String {
        let mut hex = String::with_capacity(owner.len() * 2);
        for byte in owner {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("v4:{client_id}:{hex}")
    }

    /// Creates or advances the lock stateid attached to an open.
    pub fn lock_stateid(
        &self,
        client_id: clientid4,
        open_other: [u8; NFS4_OTHER_SIZE],
        handle: &RawHandle,
        owner: &[u8],
    ) -> stateid4 {
        let mut lock_states = self.lock_states.write().expect("lock state table lock");
        let owner_id = Self::lock_owner_id(client_id, owner);
        if let Some(existing) =
            lock_states.values_mut().find(|l| l.owner_id == owner_id && &l.handle == handle)
        {
            existing.seq = existing.seq.wrapping_add(1);
            return stateid4 { seqid: existing.seq, other: existing.other };
        }
        let other = self.mint_other(StateKind::Lock);
        lock_states.insert(
            other,
            LockState {
                other,
                seq: 1,
                client_id,
                open_other,
                handle: handle.clone(),
                owner_id,
            },
        );
        stateid4 { seqid: 1, other }
    }

    pub fn lookup_lock_state(&self, stateid: &stateid4) -> Option<(String, RawHandle)> {
        self.lock_states
            .read()
            .expect("lock state table lock")
            .get(&stateid.other)
            .map(|l| (l.owner_id.clone(), l.handle.clone()))
    }

    pub fn bump_lock_state(&self, stateid: &stateid4) -> Option<stateid4> {
        self.lock_states
            .write()
            .expect("lock state table lock")
            .get_mut(&stateid.other)
            .map(|l| {
                l.seq = l.seq.wrapping_add(1);
                stateid4 { seqid: l.seq, other: l.other }
            })
    }

    // --- delegations ---

    /// Grants a delegation when policy allows and the client can be
    /// recalled (a session with a bound back-channel exists).
    pub fn maybe_delegate(
        &self,
        client_id: clientid4,
        handle: &RawHandle,
        write: bool,
    ) -> Option<stateid4> {
        let snapshot = self.settings.load();
        if !snapshot.nfs.delegations_enabled {
            return None;
        }
        let recallable = self
            .clients
            .read(client_id, |c| {
                c.sessions.iter().any(|sid| {
                    self.lookup_session(sid).map(|s| s.has_backchannel()).unwrap_or(false)
                })
            })
            .unwrap_or(false);
        if !recallable {
            return None;
        }

        let mut delegations = self.delegations.lock().expect("delegation table lock");
        if delegations.len() >= snapshot.nfs.max_delegations {
            return None;
        }
        // Any existing delegation on the file blocks a new one; the recall
        // path handles the conflict instead.
        if delegations.values().any(|d| &d.handle == handle) {
            return None;
        }

        let other = self.mint_other(StateKind::Delegation);
        delegations.insert(
            other,
            Delegation {
                other,
                seq: 1,
                client_id,
                handle: handle.clone(),
                write,
                recalled: false,
                issued: Instant::now(),
            },
        );
        Some(stateid4 { seqid: 1, other })
    }

    /// Returns delegations standing in the way of `client_id` using the
    /// file, and marks them recalled.
    pub fn conflicting_delegations(
        &self,
        handle: &RawHandle,
        client_id: clientid4,
        write: bool,
    ) -> Vec<Delegation> {
        let mut delegations = self.delegations.lock().expect("delegation table lock");
        delegations
            .values_mut()
            .filter(|d| {
                &d.handle == handle && d.client_id != client_id && (write || d.write) && !d.recalled
            })
            .map(|d| {
                d.recalled = true;
                d.clone()
            })
            .collect()
    }

    pub fn delegreturn(&self, stateid: &stateid4) -> nfsstat4 {
        let removed =
            self.delegations.lock().expect("delegation table lock").remove(&stateid.other);
        if let Some(deleg) = removed {
            self.renew_lease(deleg.client_id);
            return nfsstat4::NFS4_OK;
        }
        let removed = self
            .dir_delegations
            .lock()
            .expect("dir delegation table lock")
            .remove(&stateid.other);
        match removed {
            Some(deleg) => {
                self.renew_lease(deleg.client_id);
                nfsstat4::NFS4_OK
            }
            None => self.classify_unknown_stateid(stateid),
        }
    }

    /// Revokes a delegation that was recalled but never returned. Later use
    /// of the stateid answers BAD/EXPIRED through the classify path.
    pub fn revoke_delegation(&self, other: &[u8; NFS4_OTHER_SIZE]) {
        if self.delegations.lock().expect("delegation table lock").remove(other).is_some() {
            warn!("delegation revoked after recall timeout");
        }
    }

    /// Sends CB_RECALL for every conflicting delegation and schedules
    /// revocation if the holder does not return it within the lease time.
    pub fn recall_conflicting(
        self: &Arc<Self>,
        handle: &RawHandle,
        client_id: clientid4,
        write: bool,
    ) {
        let conflicts = self.conflicting_delegations(handle, client_id, write);
        for deleg in conflicts {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                super::delegation::recall(manager, deleg).await;
            });
        }
    }

    pub fn delegation_session(&self, client_id: clientid4) -> Option<Arc<Session>> {
        let session_ids = self.clients.read(client_id, |c| c.sessions.clone())?;
        session_ids
            .iter()
            .filter_map(|sid| self.lookup_session(sid))
            .find(|s| s.has_backchannel())
    }

    // --- directory delegations ---

    /// Grants a directory delegation for GET_DIR_DELEGATION when policy
    /// allows and the holder can be notified. One delegation per
    /// (client, directory).
    pub fn grant_dir_delegation(
        &self,
        client_id: clientid4,
        dir: &RawHandle,
        notification_types: crate::protocol::xdr::nfs4::bitmap4,
    ) -> Option<stateid4> {
        let snapshot = self.settings.load();
        if !snapshot.nfs.delegations_enabled {
            return None;
        }
        if self.delegation_session(client_id).is_none() {
            return None;
        }

        let mut dir_delegations =
            self.dir_delegations.lock().expect("dir delegation table lock");
        let file_count = self.delegations.lock().expect("delegation table lock").len();
        if file_count + dir_delegations.len() >= snapshot.nfs.max_delegations {
            return None;
        }
        if let Some(existing) = dir_delegations
            .values_mut()
            .find(|d| d.client_id == client_id && &d.dir == dir)
        {
            existing.seq = existing.seq.wrapping_add(1);
            existing.notification_types = notification_types;
            return Some(existing.stateid());
        }

        let other = self.mint_other(StateKind::Delegation);
        let deleg = DirDelegation {
            other,
            seq: 1,
            client_id,
            dir: dir.clone(),
            notification_types,
        };
        let stateid = deleg.stateid();
        dir_delegations.insert(other, deleg);
        debug!(client_id, "directory delegation granted");
        Some(stateid)
    }

    /// Fans one encoded change entry out to every directory-delegation
    /// holder of `dir`; the notifier coalesces bursts per directory within
    /// the configured batch window before CB_NOTIFY goes out.
    pub fn notify_dir_change(&self, dir: &RawHandle, entry: &[u8]) {
        let holders: Vec<(clientid4, stateid4)> = {
            let dir_delegations =
                self.dir_delegations.lock().expect("dir delegation table lock");
            dir_delegations
                .values()
                .filter(|d| &d.dir == dir)
                .map(|d| (d.client_id, d.stateid()))
                .collect()
        };
        for (client_id, stateid) in holders {
            match self.delegation_session(client_id) {
                Some(session) => self.notifier.push(dir, session, stateid, entry),
                // Holder lost its back-channel: the delegation is dead.
                None => {
                    self.dir_delegations
                        .lock()
                        .expect("dir delegation table lock")
                        .remove(&stateid.other);
                    warn!(client_id, "dir delegation revoked, no back-channel");
                }
            }
        }
    }

    // --- pseudo-fs ---

    pub fn pseudofs(&self) -> std::sync::RwLockReadGuard<'_, PseudoFs> {
        self.pseudofs.read().expect("pseudo-fs lock")
    }

    /// Rebuilds the namespace from the current share list (share add or
    /// remove).
    pub fn rebuild_pseudofs(&self) {
        let shares = self.stores.metadata.shares();
        let generation = self.pseudo_rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        let rebuilt = PseudoFs::build(&shares, generation);
        *self.pseudofs.write().expect("pseudo-fs lock") = rebuilt;
        debug!(generation, "pseudo-fs rebuilt");
    }

    // --- reaper ---

    /// Periodic eviction of expired and never-confirmed clients.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let lease = manager.settings.load().lease_time();
                let tick = lease.max(Duration::from_secs(2)) / 2;
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    _ = manager.shutdown.triggered() => break,
                }
                manager.reap(lease);
            }
        });
    }

    fn reap(&self, lease: Duration) {
        let now = Instant::now();
        let mut expired = Vec::new();
        for client_id in self.clients.keys() {
            let dead = self
                .clients
                .read(client_id, |c| {
                    if c.confirmed {
                        // No SEQUENCE (or RENEW) within the lease window.
                        now.duration_since(c.lease_renewed) > lease
                    } else {
                        now.duration_since(c.created) > lease
                    }
                })
                .unwrap_or(false);
            if dead {
                expired.push(client_id);
            }
        }
        for client_id in expired {
            info!(client_id, "evicting expired client");
            self.purge_client(client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::nfs::v4::testutil::test_manager;

    #[tokio::test]
    async fn exchange_id_is_idempotent_per_owner() {
        let mgr = test_manager();
        let (id1, _, _) = mgr.exchange_id(b"owner-a".to_vec(), [1; 8], "p");
        let (id2, _, _) = mgr.exchange_id(b"owner-a".to_vec(), [1; 8], "p");
        assert_eq!(id1, id2);
        let (id3, _, _) = mgr.exchange_id(b"owner-b".to_vec(), [1; 8], "p");
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn new_incarnation_replaces_old_state() {
        let mgr = test_manager();
        let (id1, _, _) = mgr.exchange_id(b"owner".to_vec(), [1; 8], "p");
        let (id2, _, _) = mgr.exchange_id(b"owner".to_vec(), [2; 8], "p");
        assert_ne!(id1, id2);
        assert_eq!(mgr.renew_lease(id1), nfsstat4::NFS4ERR_STALE_CLIENTID);
        assert_eq!(mgr.renew_lease(id2), nfsstat4::NFS4_OK);
    }

    #[tokio::test]
    async fn create_session_replays_cached_result() {
        let mgr = test_manager();
        let (client_id, seq, _) = mgr.exchange_id(b"owner".to_vec(), [1; 8], "p");
        let (_, first, replayed) =
            mgr.create_session(client_id, seq, 32, 8, 0x4000_0001).unwrap();
        assert!(!replayed);
        let (_, second, replayed) =
            mgr.create_session(client_id, seq, 32, 8, 0x4000_0001).unwrap();
        assert!(replayed);
        assert_eq!(first.csr_sessionid, second.csr_sessionid);

        // Skipping ahead is misordered.
        assert!(matches!(
            mgr.create_session(client_id, seq + 5, 32, 8, 0x4000_0001),
            Err(nfsstat4::NFS4ERR_SEQ_MISORDERED)
        ));
    }

    #[tokio::test]
    async fn open_close_lifecycle_advances_stateid() {
        let mgr = test_manager();
        let (client_id, _, _) = mgr.exchange_id(b"owner".to_vec(), [1; 8], "p");
        let handle = b"share:file".to_vec();
        let sid = mgr.open(client_id, b"oo".to_vec(), &handle, 1, true).unwrap();
        assert_eq!(sid.seqid, 1);

        // Re-open by the same owner bumps the sequence.
        let sid2 = mgr.open(client_id, b"oo".to_vec(), &handle, 2, true).unwrap();
        assert_eq!(sid2.other, sid.other);
        assert_eq!(sid2.seqid, 2);

        let closed = mgr.close(&sid2).unwrap();
        assert_eq!(closed.seqid, 3);
        // Using it afterwards is a bad stateid (same boot).
        assert_eq!(mgr.close(&sid2), Err(nfsstat4::NFS4ERR_BAD_STATEID));
    }

    #[tokio::test]
    async fn stale_stateids_from_other_boots_are_classified() {
        let mgr = test_manager();
        let mut foreign = stateid4 { seqid: 1, other: [9; NFS4_OTHER_SIZE] };
        foreign.other[1..4].copy_from_slice(&[0xde, 0xad, 0xbe]);
        let status = mgr.classify_unknown_stateid(&foreign);
        // Only matches this boot's prefix by astronomical accident.
        assert!(matches!(
            status,
            nfsstat4::NFS4ERR_STALE_STATEID | nfsstat4::NFS4ERR_BAD_STATEID
        ));
    }

    #[tokio::test]
    async fn grace_period_begins_and_ends() {
        let mgr = test_manager();
        mgr.begin_grace();
        assert!(mgr.in_grace());
        mgr.end_grace();
        assert!(!mgr.in_grace());
    }

    #[tokio::test]
    async fn reclaim_complete_from_all_clients_ends_grace() {
        let mgr = test_manager();
        mgr.begin_grace();
        let (a, _, _) = mgr.exchange_id(b"a".to_vec(), [1; 8], "p");
        let (b, _, _) = mgr.exchange_id(b"b".to_vec(), [1; 8], "p");
        assert_eq!(mgr.reclaim_complete(a), nfsstat4::NFS4_OK);
        assert!(mgr.in_grace());
        assert_eq!(mgr.reclaim_complete(a), nfsstat4::NFS4ERR_COMPLETE_ALREADY);
        assert_eq!(mgr.reclaim_complete(b), nfsstat4::NFS4_OK);
        assert!(!mgr.in_grace());
    }

    fn bound_conn() -> crate::protocol::rpc::context::ConnectionControl {
        crate::protocol::rpc::context::ConnectionControl {
            conn_id: 1,
            write: Arc::new(|_bytes| Box::pin(async { Ok(()) })),
            pending: crate::protocol::rpc::callback::PendingReplies::new(),
        }
    }

    #[tokio::test]
    async fn dir_delegation_requires_a_back_channel() {
        let mgr = test_manager();
        let (client_id, seq, _) = mgr.exchange_id(b"owner".to_vec(), [1; 8], "p");
        let (session, _, _) = mgr.create_session(client_id, seq, 8, 4, 0x4000_0001).unwrap();

        let dir = b"export1:/dir".to_vec();
        assert!(mgr.grant_dir_delegation(client_id, &dir, Vec::new()).is_none());

        session.bind_backchannel(&bound_conn());
        let stateid = mgr.grant_dir_delegation(client_id, &dir, vec![0b1100]).unwrap();
        assert_eq!(stateid.seqid, 1);

        // A second request from the same holder renews, not duplicates.
        let renewed = mgr.grant_dir_delegation(client_id, &dir, vec![0b1100]).unwrap();
        assert_eq!(renewed.other, stateid.other);
        assert_eq!(renewed.seqid, 2);
    }

    #[tokio::test]
    async fn dir_mutations_batch_into_one_pending_notification() {
        let mgr = test_manager();
        let (client_id, seq, _) = mgr.exchange_id(b"owner".to_vec(), [1; 8], "p");
        let (session, _, _) = mgr.create_session(client_id, seq, 8, 4, 0x4000_0001).unwrap();
        session.bind_backchannel(&bound_conn());

        let dir = b"export1:/dir".to_vec();
        let stateid = mgr.grant_dir_delegation(client_id, &dir, vec![0b1100]).unwrap();

        // A burst of child operations coalesces into one pending batch.
        for i in 0..5u8 {
            mgr.notify_dir_change(&dir, &[i]);
        }
        assert_eq!(mgr.notifier().pending_dirs(), 1);

        // A directory nobody holds a delegation on stays quiet.
        mgr.notify_dir_change(&b"export1:/other".to_vec(), &[0]);
        assert_eq!(mgr.notifier().pending_dirs(), 1);

        // After DELEGRETURN the holder is gone and nothing new queues.
        assert_eq!(mgr.delegreturn(&stateid), nfsstat4::NFS4_OK);
        mgr.notify_dir_change(&b"export1:/quiet".to_vec(), &[0]);
        assert_eq!(mgr.notifier().pending_dirs(), 1);
    }

    #[tokio::test]
    async fn destroy_clientid_requires_no_sessions() {
        let mgr = test_manager();
        let (client_id, seq, _) = mgr.exchange_id(b"owner".to_vec(), [1; 8], "p");
        let (session, _, _) = mgr.create_session(client_id, seq, 8, 4, 0x4000_0001).unwrap();
        assert_eq!(mgr.destroy_clientid(client_id), nfsstat4::NFS4ERR_CLID_INUSE);
        assert_eq!(mgr.destroy_session(&session.id), nfsstat4::NFS4_OK);
        assert_eq!(mgr.destroy_clientid(client_id), nfsstat4::NFS4_OK);
    }
}

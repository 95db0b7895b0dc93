//! Interfaces to the backing stores.
//!
//! The adapter treats persistence as an external collaborator reached
//! through three narrow seams: the metadata store (tree, attributes, ACLs),
//! the content store (data bytes), and the state store (lock records, NSM
//! registrations, v4 client records). All file objects are addressed by the
//! opaque handles the metadata store mints; handles are stable across
//! adapter restarts for the same logical object.
//!
//! Attribute and status vocabulary is NFSv3's — the v4 layer converts. A
//! store signals transient pressure with `NFS3ERR_JUKEBOX` and permanent
//! failure with `NFS3ERR_IO`; the adapter never retries across a request
//! boundary.

use async_trait::async_trait;

use crate::protocol::xdr::nfs3::{
    self, fattr3, fileid3, filename3, nfs_fh3, nfspath3, nfsstat3, sattr3,
};
use crate::protocol::xdr::nfs4::nfsace4;

/// Raw store handle bytes. Real-share handles start with `<share-name>:`.
pub type RawHandle = Vec<u8>;

pub type StoreResult<T> = Result<T, nfsstat3>;

/// One exported share.
#[derive(Clone, Debug)]
pub struct Share {
    /// Export name as mounted, without slashes.
    pub name: String,
    /// Handle of the share root directory.
    pub root: RawHandle,
}

/// Whether mutating procedures are admitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capabilities {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug, Default)]
pub struct DirEntry {
    pub fileid: fileid3,
    pub name: filename3,
    pub attr: fattr3,
    pub handle: RawHandle,
    /// Opaque enumeration cookie, stable across restarts for an open
    /// directory.
    pub cookie: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ReadDirResult {
    pub entries: Vec<DirEntry>,
    pub end: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FsStat {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub avail_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
    pub avail_files: u64,
}

/// Tree, attribute, and ACL operations.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Current share list; pseudo-fs rebuilds consume this.
    fn shares(&self) -> Vec<Share>;

    async fn lookup(&self, dir: &RawHandle, name: &filename3) -> StoreResult<RawHandle>;

    /// Parent directory of `handle`; the share root is its own parent.
    async fn lookup_parent(&self, handle: &RawHandle) -> StoreResult<RawHandle>;

    async fn getattr(&self, handle: &RawHandle) -> StoreResult<fattr3>;

    async fn setattr(&self, handle: &RawHandle, attrs: sattr3) -> StoreResult<fattr3>;

    async fn create(
        &self,
        dir: &RawHandle,
        name: &filename3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)>;

    async fn create_exclusive(
        &self,
        dir: &RawHandle,
        name: &filename3,
        verifier: nfs3::createverf3,
    ) -> StoreResult<(RawHandle, fattr3)>;

    async fn mkdir(
        &self,
        dir: &RawHandle,
        name: &filename3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)>;

    async fn symlink(
        &self,
        dir: &RawHandle,
        name: &filename3,
        target: &nfspath3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)>;

    async fn mknod(
        &self,
        dir: &RawHandle,
        name: &filename3,
        ftype: nfs3::ftype3,
        spec: nfs3::specdata3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)>;

    async fn readlink(&self, handle: &RawHandle) -> StoreResult<nfspath3>;

    async fn remove(&self, dir: &RawHandle, name: &filename3) -> StoreResult<()>;

    async fn rmdir(&self, dir: &RawHandle, name: &filename3) -> StoreResult<()>;

    async fn rename(
        &self,
        from_dir: &RawHandle,
        from_name: &filename3,
        to_dir: &RawHandle,
        to_name: &filename3,
    ) -> StoreResult<()>;

    async fn link(
        &self,
        file: &RawHandle,
        dir: &RawHandle,
        name: &filename3,
    ) -> StoreResult<fattr3>;

    /// Enumerates `dir` starting after `cookie` (0 = from the beginning).
    async fn readdir(
        &self,
        dir: &RawHandle,
        cookie: u64,
        max_entries: usize,
    ) -> StoreResult<ReadDirResult>;

    async fn fsstat(&self, handle: &RawHandle) -> StoreResult<FsStat>;

    async fn get_acl(&self, handle: &RawHandle) -> StoreResult<Vec<nfsace4>>;

    async fn set_acl(&self, handle: &RawHandle, acl: Vec<nfsace4>) -> StoreResult<()>;
}

/// Data byte operations.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read(
        &self,
        handle: &RawHandle,
        offset: u64,
        count: u32,
    ) -> StoreResult<(Vec<u8>, bool)>;

    /// Returns the post-write attributes and the stability level achieved.
    async fn write(
        &self,
        handle: &RawHandle,
        offset: u64,
        data: &[u8],
        stable: nfs3::file::stable_how,
    ) -> StoreResult<(fattr3, nfs3::file::stable_how)>;

    async fn commit(&self, handle: &RawHandle, offset: u64, count: u32) -> StoreResult<fattr3>;
}

/// A persisted advisory lock record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRecord {
    pub handle: RawHandle,
    /// Namespaced owner id: `nlm:<host>:<svid>:<hex>` or
    /// `v4:<clientid>:<opaque>`.
    pub owner: String,
    pub offset: u64,
    /// 0 means "to end of file".
    pub length: u64,
    pub exclusive: bool,
    pub reclaim: bool,
}

/// A persisted NSM client registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NsmRegistration {
    pub mon_name: String,
    pub my_name: String,
    pub my_prog: u32,
    pub my_vers: u32,
    pub my_proc: u32,
    pub private: [u8; 16],
}

/// A persisted v4 client record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: u64,
    pub owner: Vec<u8>,
    pub verifier: [u8; 8],
    pub principal: String,
    pub confirmed: bool,
    /// Lease start, seconds since the epoch.
    pub lease_start: u64,
}

/// Durable adapter state: locks, NSM registrations, v4 clients, and the NSM
/// server-state counter.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_lock(&self, record: &LockRecord) -> StoreResult<()>;

    async fn remove_lock(&self, record: &LockRecord) -> StoreResult<()>;

    async fn load_locks(&self) -> StoreResult<Vec<LockRecord>>;

    async fn save_nsm_registration(&self, reg: &NsmRegistration) -> StoreResult<()>;

    async fn remove_nsm_registration(&self, mon_name: &str) -> StoreResult<()>;

    async fn load_nsm_registrations(&self) -> StoreResult<Vec<NsmRegistration>>;

    /// Increments and returns the NSM state counter (odd while up).
    async fn bump_nsm_state(&self) -> StoreResult<i32>;

    async fn nsm_state(&self) -> StoreResult<i32>;

    async fn save_client(&self, record: &ClientRecord) -> StoreResult<()>;

    async fn remove_client(&self, client_id: u64) -> StoreResult<()>;

    async fn load_clients(&self) -> StoreResult<Vec<ClientRecord>>;
}

/// The bundle of store handles threaded through the adapter.
#[derive(Clone)]
pub struct Stores {
    pub metadata: std::sync::Arc<dyn MetadataStore>,
    pub content: std::sync::Arc<dyn ContentStore>,
    pub state: std::sync::Arc<dyn StateStore>,
}

impl nfs_fh3 {
    /// Borrows the raw store handle inside a v3 wire handle.
    pub fn raw(&self) -> &RawHandle {
        &self.data
    }
}

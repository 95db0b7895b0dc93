//! Shared stub stores for unit tests of the v4 state machinery.

use std::sync::Arc;

use async_trait::async_trait;

use super::state::StateManager;
use crate::protocol::nfs::nlm::lockmgr::LockManager;
use crate::protocol::xdr::nfs3::{
    self, fattr3, filename3, nfspath3, nfsstat3, sattr3,
};
use crate::protocol::xdr::nfs4::nfsace4;
use crate::settings::{Settings, SettingsHandle};
use crate::shutdown::Shutdown;
use crate::store::{
    Capabilities, ClientRecord, ContentStore, FsStat, LockRecord, MetadataStore, NsmRegistration,
    RawHandle, ReadDirResult, Share, StateStore, StoreResult, Stores,
};

pub struct StubMetadata;

#[async_trait]
impl MetadataStore for StubMetadata {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadWrite
    }

    fn shares(&self) -> Vec<Share> {
        vec![Share { name: "export1".to_string(), root: b"export1:".to_vec() }]
    }

    async fn lookup(&self, _dir: &RawHandle, _name: &filename3) -> StoreResult<RawHandle> {
        Err(nfsstat3::NFS3ERR_NOENT)
    }

    async fn lookup_parent(&self, handle: &RawHandle) -> StoreResult<RawHandle> {
        Ok(handle.clone())
    }

    async fn getattr(&self, _handle: &RawHandle) -> StoreResult<fattr3> {
        Ok(fattr3 { fileid: 7, ..Default::default() })
    }

    async fn setattr(&self, _handle: &RawHandle, _attrs: sattr3) -> StoreResult<fattr3> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn create(
        &self,
        _dir: &RawHandle,
        _name: &filename3,
        _attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn create_exclusive(
        &self,
        _dir: &RawHandle,
        _name: &filename3,
        _verifier: nfs3::createverf3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn mkdir(
        &self,
        _dir: &RawHandle,
        _name: &filename3,
        _attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn symlink(
        &self,
        _dir: &RawHandle,
        _name: &filename3,
        _target: &nfspath3,
        _attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn mknod(
        &self,
        _dir: &RawHandle,
        _name: &filename3,
        _ftype: nfs3::ftype3,
        _spec: nfs3::specdata3,
        _attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn readlink(&self, _handle: &RawHandle) -> StoreResult<nfspath3> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn remove(&self, _dir: &RawHandle, _name: &filename3) -> StoreResult<()> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn rmdir(&self, _dir: &RawHandle, _name: &filename3) -> StoreResult<()> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn rename(
        &self,
        _from_dir: &RawHandle,
        _from_name: &filename3,
        _to_dir: &RawHandle,
        _to_name: &filename3,
    ) -> StoreResult<()> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn link(
        &self,
        _file: &RawHandle,
        _dir: &RawHandle,
        _name: &filename3,
    ) -> StoreResult<fattr3> {
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }

    async fn readdir(
        &self,
        _dir: &RawHandle,
        _cookie: u64,
        _max_entries: usize,
    ) -> StoreResult<ReadDirResult> {
        Ok(ReadDirResult { entries: Vec::new(), end: true })
    }

    async fn fsstat(&self, _handle: &RawHandle) -> StoreResult<FsStat> {
        Ok(FsStat::default())
    }

    async fn get_acl(&self, _handle: &RawHandle) -> StoreResult<Vec<nfsace4>> {
        Ok(Vec::new())
    }

    async fn set_acl(&self, _handle: &RawHandle, _acl: Vec<nfsace4>) -> StoreResult<()> {
        Ok(())
    }
}

pub struct StubContent;

#[async_trait]
impl ContentStore for StubContent {
    async fn read(
        &self,
        _handle: &RawHandle,
        _offset: u64,
        _count: u32,
    ) -> StoreResult<(Vec<u8>, bool)> {
        Ok((Vec::new(), true))
    }

    async fn write(
        &self,
        _handle: &RawHandle,
        _offset: u64,
        _data: &[u8],
        stable: nfs3::file::stable_how,
    ) -> StoreResult<(fattr3, nfs3::file::stable_how)> {
        Ok((fattr3::default(), stable))
    }

    async fn commit(&self, _handle: &RawHandle, _offset: u64, _count: u32) -> StoreResult<fattr3> {
        Ok(fattr3::default())
    }
}

pub struct StubState;

#[async_trait]
impl StateStore for StubState {
    async fn save_lock(&self, _record: &LockRecord) -> StoreResult<()> {
        Ok(())
    }

    async fn remove_lock(&self, _record: &LockRecord) -> StoreResult<()> {
        Ok(())
    }

    async fn load_locks(&self) -> StoreResult<Vec<LockRecord>> {
        Ok(Vec::new())
    }

    async fn save_nsm_registration(&self, _reg: &NsmRegistration) -> StoreResult<()> {
        Ok(())
    }

    async fn remove_nsm_registration(&self, _mon_name: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn load_nsm_registrations(&self) -> StoreResult<Vec<NsmRegistration>> {
        Ok(Vec::new())
    }

    async fn bump_nsm_state(&self) -> StoreResult<i32> {
        Ok(1)
    }

    async fn nsm_state(&self) -> StoreResult<i32> {
        Ok(1)
    }

    async fn save_client(&self, _record: &ClientRecord) -> StoreResult<()> {
        Ok(())
    }

    async fn remove_client(&self, _client_id: u64) -> StoreResult<()> {
        Ok(())
    }

    async fn load_clients(&self) -> StoreResult<Vec<ClientRecord>> {
        Ok(Vec::new())
    }
}

pub fn test_stores() -> Stores {
    Stores {
        metadata: Arc::new(StubMetadata),
        content: Arc::new(StubContent),
        state: Arc::new(StubState),
    }
}

pub fn test_manager() -> Arc<StateManager> {
    let stores = test_stores();
    let locks = LockManager::new(stores.state.clone());
    StateManager::new(
        SettingsHandle::new(Settings::default()),
        stores,
        Shutdown::new(),
        locks,
    )
}

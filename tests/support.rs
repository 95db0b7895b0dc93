//! Shared test harness: an in-memory store trio and small wire helpers.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpStream;

use nfs_tundra::pool::BufferPool;
use nfs_tundra::protocol::auth::gss::{AcceptOutcome, GssError, Krb5Mechanism};
use nfs_tundra::protocol::rpc::{read_record, write_record};
use nfs_tundra::store::{
    Capabilities, ClientRecord, ContentStore, FsStat, LockRecord, MetadataStore,
    NsmRegistration, RawHandle, ReadDirResult, Share, StateStore, StoreResult, Stores,
};
use nfs_tundra::xdr::nfs3::{
    self, fattr3, filename3, ftype3, nfspath3, nfsstat3, nfstime3, sattr3, set_gid3, set_mode3,
    set_size3, set_uid3,
};
use nfs_tundra::xdr::nfs4::nfsace4;
use nfs_tundra::xdr::rpc::{auth_flavor, auth_unix, call_body, opaque_auth, rpc_body, rpc_msg};
use nfs_tundra::xdr::{deserialize, serialize_to_vec, Serialize};

pub const EXPORT: &str = "export1";

#[derive(Clone)]
struct Node {
    attr: fattr3,
    data: Vec<u8>,
    children: BTreeMap<Vec<u8>, RawHandle>,
    parent: RawHandle,
    target: Option<nfspath3>,
    acl: Vec<nfsace4>,
}

fn root_handle() -> RawHandle {
    format!("{EXPORT}:/").into_bytes()
}

fn dir_attr(fileid: u64) -> fattr3 {
    fattr3 {
        ftype: ftype3::NF3DIR,
        mode: 0o755,
        nlink: 2,
        uid: 1000,
        gid: 1000,
        size: 4096,
        used: 4096,
        fsid: 1,
        fileid,
        atime: nfstime3 { seconds: 1, nseconds: 0 },
        mtime: nfstime3 { seconds: 1, nseconds: 0 },
        ctime: nfstime3 { seconds: 1, nseconds: 0 },
        ..Default::default()
    }
}

fn file_attr(fileid: u64, size: u64) -> fattr3 {
    fattr3 {
        ftype: ftype3::NF3REG,
        mode: 0o644,
        nlink: 1,
        uid: 1000,
        gid: 1000,
        size,
        used: size,
        fsid: 1,
        fileid,
        atime: nfstime3 { seconds: 1, nseconds: 0 },
        mtime: nfstime3 { seconds: 1, nseconds: 0 },
        ctime: nfstime3 { seconds: 1, nseconds: 0 },
        ..Default::default()
    }
}

/// In-memory metadata + content store over one export.
pub struct MemStore {
    nodes: Mutex<HashMap<RawHandle, Node>>,
    next_fileid: AtomicU64,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        let mut nodes = HashMap::new();
        nodes.insert(
            root_handle(),
            Node {
                attr: dir_attr(2),
                data: Vec::new(),
                children: BTreeMap::new(),
                parent: root_handle(),
                target: None,
                acl: Vec::new(),
            },
        );
        let store = Arc::new(Self { nodes: Mutex::new(nodes), next_fileid: AtomicU64::new(10) });
        store.add_file(&root_handle(), b"hello.txt", b"hello, tundra\n");
        store
    }

    pub fn add_file(&self, dir: &RawHandle, name: &[u8], data: &[u8]) -> RawHandle {
        let handle = child_handle(dir, name);
        let fileid = self.next_fileid.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert(
            handle.clone(),
            Node {
                attr: file_attr(fileid, data.len() as u64),
                data: data.to_vec(),
                children: BTreeMap::new(),
                parent: dir.clone(),
                target: None,
                acl: Vec::new(),
            },
        );
        nodes.get_mut(dir).unwrap().children.insert(name.to_vec(), handle.clone());
        handle
    }

    fn touch(node: &mut Node) {
        node.attr.mtime.seconds += 1;
        node.attr.ctime.seconds += 1;
    }

    fn apply_sattr(attr: &mut fattr3, sattr: &sattr3) {
        if let set_mode3::mode(mode) = sattr.mode {
            attr.mode = mode & 0o7777;
        }
        if let set_uid3::uid(uid) = sattr.uid {
            attr.uid = uid;
        }
        if let set_gid3::gid(gid) = sattr.gid {
            attr.gid = gid;
        }
        if let set_size3::size(size) = sattr.size {
            attr.size = size;
        }
    }
}

fn child_handle(dir: &RawHandle, name: &[u8]) -> RawHandle {
    let mut handle = dir.clone();
    if handle.last() != Some(&b'/') {
        handle.push(b'/');
    }
    handle.extend_from_slice(name);
    handle
}

#[async_trait]
impl MetadataStore for MemStore {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadWrite
    }

    fn shares(&self) -> Vec<Share> {
        vec![Share { name: EXPORT.to_string(), root: root_handle() }]
    }

    async fn lookup(&self, dir: &RawHandle, name: &filename3) -> StoreResult<RawHandle> {
        let nodes = self.nodes.lock().unwrap();
        let dir = nodes.get(dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        dir.children.get(name.as_ref()).cloned().ok_or(nfsstat3::NFS3ERR_NOENT)
    }

    async fn lookup_parent(&self, handle: &RawHandle) -> StoreResult<RawHandle> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(handle).map(|n| n.parent.clone()).ok_or(nfsstat3::NFS3ERR_STALE)
    }

    async fn getattr(&self, handle: &RawHandle) -> StoreResult<fattr3> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(handle).map(|n| n.attr).ok_or(nfsstat3::NFS3ERR_STALE)
    }

    async fn setattr(&self, handle: &RawHandle, attrs: sattr3) -> StoreResult<fattr3> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(handle).ok_or(nfsstat3::NFS3ERR_STALE)?;
        Self::apply_sattr(&mut node.attr, &attrs);
        if let set_size3::size(size) = attrs.size {
            node.data.resize(size as usize, 0);
        }
        Self::touch(node);
        Ok(node.attr)
    }

    async fn create(
        &self,
        dir: &RawHandle,
        name: &filename3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        let handle = child_handle(dir, name.as_ref());
        let fileid = self.next_fileid.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(dir) {
            return Err(nfsstat3::NFS3ERR_STALE);
        }
        let mut attr = file_attr(fileid, 0);
        Self::apply_sattr(&mut attr, &attrs);
        nodes.insert(
            handle.clone(),
            Node {
                attr,
                data: Vec::new(),
                children: BTreeMap::new(),
                parent: dir.clone(),
                target: None,
                acl: Vec::new(),
            },
        );
        let parent = nodes.get_mut(dir).unwrap();
        parent.children.insert(name.as_ref().to_vec(), handle.clone());
        Self::touch(parent);
        Ok((handle, attr))
    }

    async fn create_exclusive(
        &self,
        dir: &RawHandle,
        name: &filename3,
        _verifier: nfs3::createverf3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        if self.lookup(dir, name).await.is_ok() {
            return Err(nfsstat3::NFS3ERR_EXIST);
        }
        self.create(dir, name, sattr3::default()).await
    }

    async fn mkdir(
        &self,
        dir: &RawHandle,
        name: &filename3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        let handle = child_handle(dir, name.as_ref());
        let fileid = self.next_fileid.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&handle) {
            return Err(nfsstat3::NFS3ERR_EXIST);
        }
        let mut attr = dir_attr(fileid);
        Self::apply_sattr(&mut attr, &attrs);
        nodes.insert(
            handle.clone(),
            Node {
                attr,
                data: Vec::new(),
                children: BTreeMap::new(),
                parent: dir.clone(),
                target: None,
                acl: Vec::new(),
            },
        );
        let parent = nodes.get_mut(dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        parent.children.insert(name.as_ref().to_vec(), handle.clone());
        Self::touch(parent);
        Ok((handle, attr))
    }

    async fn symlink(
        &self,
        dir: &RawHandle,
        name: &filename3,
        target: &nfspath3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        let (handle, _) = self.create(dir, name, attrs).await?;
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(&handle).unwrap();
        node.attr.ftype = ftype3::NF3LNK;
        node.target = Some(target.clone());
        Ok((handle, node.attr))
    }

    async fn mknod(
        &self,
        dir: &RawHandle,
        name: &filename3,
        ftype: ftype3,
        spec: nfs3::specdata3,
        attrs: sattr3,
    ) -> StoreResult<(RawHandle, fattr3)> {
        let (handle, _) = self.create(dir, name, attrs).await?;
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(&handle).unwrap();
        node.attr.ftype = ftype;
        node.attr.rdev = spec;
        Ok((handle, node.attr))
    }

    async fn readlink(&self, handle: &RawHandle) -> StoreResult<nfspath3> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(handle).ok_or(nfsstat3::NFS3ERR_STALE)?;
        node.target.clone().ok_or(nfsstat3::NFS3ERR_INVAL)
    }

    async fn remove(&self, dir: &RawHandle, name: &filename3) -> StoreResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let parent = nodes.get_mut(dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let handle = parent.children.remove(name.as_ref()).ok_or(nfsstat3::NFS3ERR_NOENT)?;
        Self::touch(parent);
        nodes.remove(&handle);
        Ok(())
    }

    async fn rmdir(&self, dir: &RawHandle, name: &filename3) -> StoreResult<()> {
        {
            let nodes = self.nodes.lock().unwrap();
            let parent = nodes.get(dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
            let handle = parent.children.get(name.as_ref()).ok_or(nfsstat3::NFS3ERR_NOENT)?;
            let node = nodes.get(handle).ok_or(nfsstat3::NFS3ERR_STALE)?;
            if node.attr.ftype != ftype3::NF3DIR {
                return Err(nfsstat3::NFS3ERR_NOTDIR);
            }
            if !node.children.is_empty() {
                return Err(nfsstat3::NFS3ERR_NOTEMPTY);
            }
        }
        self.remove(dir, name).await
    }

    async fn rename(
        &self,
        from_dir: &RawHandle,
        from_name: &filename3,
        to_dir: &RawHandle,
        to_name: &filename3,
    ) -> StoreResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let from = nodes.get_mut(from_dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let handle = from.children.remove(from_name.as_ref()).ok_or(nfsstat3::NFS3ERR_NOENT)?;
        Self::touch(from);
        let to = nodes.get_mut(to_dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        to.children.insert(to_name.as_ref().to_vec(), handle.clone());
        Self::touch(to);
        if let Some(node) = nodes.get_mut(&handle) {
            node.parent = to_dir.clone();
        }
        Ok(())
    }

    async fn link(
        &self,
        file: &RawHandle,
        dir: &RawHandle,
        name: &filename3,
    ) -> StoreResult<fattr3> {
        let mut nodes = self.nodes.lock().unwrap();
        let attr = {
            let node = nodes.get_mut(file).ok_or(nfsstat3::NFS3ERR_STALE)?;
            node.attr.nlink += 1;
            node.attr
        };
        let parent = nodes.get_mut(dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        parent.children.insert(name.as_ref().to_vec(), file.clone());
        Self::touch(parent);
        Ok(attr)
    }

    async fn readdir(
        &self,
        dir: &RawHandle,
        cookie: u64,
        max_entries: usize,
    ) -> StoreResult<ReadDirResult> {
        let nodes = self.nodes.lock().unwrap();
        let parent = nodes.get(dir).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let mut entries = Vec::new();
        for (index, (name, handle)) in parent.children.iter().enumerate() {
            let entry_cookie = index as u64 + 3;
            if entry_cookie <= cookie {
                continue;
            }
            let attr = nodes.get(handle).map(|n| n.attr).unwrap_or_default();
            entries.push(nfs_tundra::store::DirEntry {
                fileid: attr.fileid,
                name: filename3::from(name.as_slice()),
                attr,
                handle: handle.clone(),
                cookie: entry_cookie,
            });
            if entries.len() == max_entries {
                break;
            }
        }
        let last_cookie = entries.last().map(|e| e.cookie).unwrap_or(u64::MAX);
        let end = parent.children.len() as u64 + 2 <= last_cookie;
        Ok(ReadDirResult { entries, end })
    }

    async fn fsstat(&self, _handle: &RawHandle) -> StoreResult<FsStat> {
        Ok(FsStat {
            total_bytes: 1 << 30,
            free_bytes: 1 << 29,
            avail_bytes: 1 << 29,
            total_files: 1 << 20,
            free_files: 1 << 19,
            avail_files: 1 << 19,
        })
    }

    async fn get_acl(&self, handle: &RawHandle) -> StoreResult<Vec<nfsace4>> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(handle).map(|n| n.acl.clone()).ok_or(nfsstat3::NFS3ERR_STALE)
    }

    async fn set_acl(&self, handle: &RawHandle, acl: Vec<nfsace4>) -> StoreResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(handle).ok_or(nfsstat3::NFS3ERR_STALE)?;
        node.acl = acl;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemStore {
    async fn read(
        &self,
        handle: &RawHandle,
        offset: u64,
        count: u32,
    ) -> StoreResult<(Vec<u8>, bool)> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(handle).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok((Vec::new(), true));
        }
        let end = (offset + count as usize).min(node.data.len());
        Ok((node.data[offset..end].to_vec(), end == node.data.len()))
    }

    async fn write(
        &self,
        handle: &RawHandle,
        offset: u64,
        data: &[u8],
        stable: nfs3::file::stable_how,
    ) -> StoreResult<(fattr3, nfs3::file::stable_how)> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(handle).ok_or(nfsstat3::NFS3ERR_STALE)?;
        let offset = offset as usize;
        if node.data.len() < offset + data.len() {
            node.data.resize(offset + data.len(), 0);
        }
        node.data[offset..offset + data.len()].copy_from_slice(data);
        node.attr.size = node.data.len() as u64;
        node.attr.used = node.attr.size;
        Self::touch(node);
        Ok((node.attr, stable))
    }

    async fn commit(&self, handle: &RawHandle, _offset: u64, _count: u32) -> StoreResult<fattr3> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(handle).map(|n| n.attr).ok_or(nfsstat3::NFS3ERR_STALE)
    }
}

/// In-memory durable-state stub.
pub struct MemState {
    locks: Mutex<Vec<LockRecord>>,
    registrations: Mutex<Vec<NsmRegistration>>,
    clients: Mutex<Vec<ClientRecord>>,
    nsm_state: AtomicI32,
}

impl MemState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locks: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            nsm_state: AtomicI32::new(1),
        })
    }

    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[async_trait]
impl StateStore for MemState {
    async fn save_lock(&self, record: &LockRecord) -> StoreResult<()> {
        self.locks.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn remove_lock(&self, record: &LockRecord) -> StoreResult<()> {
        self.locks.lock().unwrap().retain(|r| r != record);
        Ok(())
    }

    async fn load_locks(&self) -> StoreResult<Vec<LockRecord>> {
        Ok(self.locks.lock().unwrap().clone())
    }

    async fn save_nsm_registration(&self, reg: &NsmRegistration) -> StoreResult<()> {
        let mut regs = self.registrations.lock().unwrap();
        regs.retain(|r| r.mon_name != reg.mon_name);
        regs.push(reg.clone());
        Ok(())
    }

    async fn remove_nsm_registration(&self, mon_name: &str) -> StoreResult<()> {
        self.registrations.lock().unwrap().retain(|r| r.mon_name != mon_name);
        Ok(())
    }

    async fn load_nsm_registrations(&self) -> StoreResult<Vec<NsmRegistration>> {
        Ok(self.registrations.lock().unwrap().clone())
    }

    async fn bump_nsm_state(&self) -> StoreResult<i32> {
        Ok(self.nsm_state.fetch_add(2, Ordering::SeqCst) + 2)
    }

    async fn nsm_state(&self) -> StoreResult<i32> {
        Ok(self.nsm_state.load(Ordering::SeqCst))
    }

    async fn save_client(&self, record: &ClientRecord) -> StoreResult<()> {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|c| c.client_id != record.client_id);
        clients.push(record.clone());
        Ok(())
    }

    async fn remove_client(&self, client_id: u64) -> StoreResult<()> {
        self.clients.lock().unwrap().retain(|c| c.client_id != client_id);
        Ok(())
    }

    async fn load_clients(&self) -> StoreResult<Vec<ClientRecord>> {
        Ok(self.clients.lock().unwrap().clone())
    }
}

pub fn mem_stores() -> Stores {
    let fs = MemStore::new();
    Stores { metadata: fs.clone(), content: fs, state: MemState::new() }
}

/// Deterministic Kerberos stand-in for adapter-level tests.
pub struct TestMechanism;

impl Krb5Mechanism for TestMechanism {
    fn accept_context(
        &self,
        _state: Option<&[u8]>,
        token: &[u8],
    ) -> Result<AcceptOutcome, GssError> {
        if token == b"bad" {
            return Err(GssError { major: 0x0006_0000, minor: 1 });
        }
        Ok(AcceptOutcome {
            token: b"ap-rep".to_vec(),
            complete: true,
            session_key: b"test-session-key".to_vec(),
            principal: "alice@EXAMPLE.COM".to_string(),
            acceptor_subkey: false,
            state: Vec::new(),
        })
    }

    fn compute_mic(&self, key: &[u8], subkey: bool, data: &[u8]) -> Vec<u8> {
        let mut mic = key.to_vec();
        mic.push(data.len() as u8);
        mic.push(subkey as u8);
        mic
    }

    fn verify_mic(&self, key: &[u8], data: &[u8], mic: &[u8]) -> bool {
        mic.len() == key.len() + 2 && mic[key.len()] == data.len() as u8
    }

    fn wrap(&self, key: &[u8], _seq: u32, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ key[0]).collect()
    }

    fn unwrap(&self, key: &[u8], _seq: u32, data: &[u8]) -> Option<Vec<u8>> {
        Some(data.iter().map(|b| b ^ key[0]).collect())
    }
}

/// Binds an adapter on ephemeral ports and serves it in the background.
pub async fn start_adapter() -> std::sync::Arc<nfs_tundra::adapter::Adapter> {
    start_adapter_with(|_settings| {}).await
}

pub async fn start_adapter_with(
    tweak: impl FnOnce(&mut nfs_tundra::settings::Settings),
) -> std::sync::Arc<nfs_tundra::adapter::Adapter> {
    let mut settings = nfs_tundra::settings::Settings::default();
    settings.bind_address = "127.0.0.1".to_string();
    settings.port = 0;
    settings.portmapper.port = 0;
    tweak(&mut settings);
    let adapter = std::sync::Arc::new(
        nfs_tundra::adapter::Adapter::bind(settings, mem_stores(), Arc::new(TestMechanism))
            .await
            .expect("bind adapter"),
    );
    let serving = adapter.clone();
    tokio::spawn(async move {
        let _ = serving.serve().await;
    });
    adapter.ready().await;
    adapter
}

pub async fn connect(adapter: &nfs_tundra::adapter::Adapter) -> TcpStream {
    let stream = TcpStream::connect(adapter.bound_addr()).await.expect("connect");
    stream.set_nodelay(true).expect("nodelay");
    stream
}

/// AUTH_UNIX credential for test calls.
pub fn unix_cred(uid: u32, gid: u32) -> opaque_auth {
    let unix = auth_unix {
        stamp: 12345,
        machinename: b"testhost".to_vec(),
        uid,
        gid,
        gids: vec![gid],
    };
    opaque_auth::new(auth_flavor::AUTH_UNIX, serialize_to_vec(&unix).unwrap())
}

/// Builds one serialized CALL record.
pub fn call_record(
    xid: u32,
    prog: u32,
    vers: u32,
    proc: u32,
    cred: opaque_auth,
    args: &[u8],
) -> Vec<u8> {
    let msg = rpc_msg {
        xid,
        body: rpc_body::CALL(call_body {
            rpcvers: 2,
            prog,
            vers,
            proc,
            cred,
            verf: opaque_auth::default(),
        }),
    };
    let mut record = serialize_to_vec(&msg).unwrap();
    record.extend_from_slice(args);
    record
}

/// One call round trip over an established TCP connection.
pub async fn roundtrip(stream: &mut TcpStream, record: &[u8]) -> Vec<u8> {
    write_record(stream, record).await.expect("write call");
    let pool = BufferPool::new();
    let reply = read_record(stream, &pool).await.expect("read reply");
    reply.as_slice().to_vec()
}

/// Splits a reply into (header, offset-of-results). Panics unless the reply
/// is MSG_ACCEPTED.
pub fn parse_reply(record: &[u8]) -> (rpc_msg, usize) {
    let mut cursor = Cursor::new(record);
    let msg = deserialize::<rpc_msg>(&mut cursor).expect("parse reply");
    (msg, cursor.position() as usize)
}

//! Request context and the adapter-wide dependency bundle.
//!
//! [`Deps`] keeps all shared state in one construct-time object. No dispatch
//! table, buffer pool, context cache or registry lives in a global;
//! everything handlers reach is threaded through here.

use std::sync::Arc;

use crate::pool::BufferPool;
use crate::protocol::auth::gss::GssProcessor;
use crate::protocol::auth::Credentials;
use crate::protocol::nfs::mount::MountTable;
use crate::protocol::nfs::nlm::lockmgr::LockManager;
use crate::protocol::nfs::nsm::NsmMonitor;
use crate::protocol::nfs::portmap::PortmapRegistry;
use crate::protocol::nfs::v4::state::StateManager;
use crate::protocol::rpc::callback::{PendingReplies, WriteFn};
use crate::protocol::xdr::nfs3::writeverf3;
use crate::settings::SettingsHandle;
use crate::shutdown::Shutdown;
use crate::store::Stores;

/// Everything a handler may need, owned by the adapter.
pub struct Deps {
    pub settings: SettingsHandle,
    pub stores: Stores,
    pub gss: Arc<GssProcessor>,
    pub state4: Arc<StateManager>,
    pub locks: Arc<LockManager>,
    pub nsm: Arc<NsmMonitor>,
    pub portmap: Arc<PortmapRegistry>,
    pub mounts: Arc<MountTable>,
    pub pool: Arc<BufferPool>,
    pub shutdown: Shutdown,
    /// Per-boot write/commit verifier; changes force client re-commit after
    /// restart.
    pub write_verf: writeverf3,
}

/// Cheap-to-clone view of the connection a request arrived on, used by
/// BIND_CONN_TO_SESSION and CREATE_SESSION to bind back-channels.
#[derive(Clone)]
pub struct ConnectionControl {
    pub conn_id: u64,
    /// Serialized write closure (shares the connection's write mutex).
    pub write: WriteFn,
    /// Reply router for back-channel traffic on this connection.
    pub pending: Arc<PendingReplies>,
}

/// Per-request context handed to every handler.
pub struct RequestContext {
    pub xid: u32,
    pub client_addr: String,
    pub creds: Credentials,
    pub deps: Arc<Deps>,
    pub conn: ConnectionControl,
}

/// Handler-layer failure classification. Logical protocol errors never get
/// here — they are encoded as in-band status codes by the handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// Arguments failed to decode; answered with GARBAGE_ARGS.
    Garbage,
    /// Internal failure; answered with SYSTEM_ERR.
    System(String),
    /// Cancelled by shutdown or deadline; no reply is emitted.
    Cancelled,
}

impl From<std::io::Error> for HandlerError {
    fn from(_: std::io::Error) -> Self {
        HandlerError::Garbage
    }
}

pub type HandlerResult = Result<(), HandlerError>;

//! Adapter-surface errors.
//!
//! Only the lifecycle API (`bind`, `serve`, `stop`, settings loading)
//! surfaces this type. Wire-level failures never become `Error`: the
//! dispatch layer classifies them into a reply (`AUTH_ERROR`,
//! `PROG_MISMATCH`, `SYSTEM_ERR`, per-protocol status codes), an
//! RFC-mandated silent drop, or a connection close — see
//! `protocol::rpc::dispatch::DispatchOutcome` and
//! `protocol::rpc::context::HandlerError`.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Listener or socket failure during bind/serve.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (rejected before the adapter starts).
    #[error("configuration error: {0}")]
    Config(String),

    /// Lifecycle misuse, e.g. a second `serve` call.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

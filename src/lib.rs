//! nfs-tundra - a user-space NFS protocol adapter in Rust.
//!
//! The adapter owns a single TCP endpoint that multiplexes NFSv3, NFSv4.0
//! and 4.1, MOUNT v3, NLM v4 and NSM v1, plus an embedded portmapper on its
//! own port. Files and metadata live behind pluggable stores; this crate is
//! the protocol machinery in between: ONC-RPC framing and dispatch,
//! AUTH_NULL/AUTH_UNIX/RPCSEC_GSS authentication, the NFSv4 compound engine
//! with session slot-replay caching, back-channel callbacks, advisory
//! locking with blocking grants, and crash-recovery notification.
//!
//! ## Main components
//!
//! - [`adapter`]: listener lifecycle, accept loop, graceful shutdown.
//! - [`connection`]: per-socket reader loop, write serialization and
//!   back-channel demultiplexing.
//! - [`protocol`]: the XDR codec, RPC dispatch, auth processing and the
//!   per-program handlers.
//! - [`store`]: the seams to the metadata, content and state stores.
//! - [`settings`]: configuration with live reload.
//!
//! ## Standards
//!
//! RFC 5531 (ONC RPC v2), RFC 4506 (XDR), RFC 1813 (NFSv3 and MOUNT),
//! RFC 7530 (NFSv4.0), RFC 5661 (NFSv4.1 sessions), RFC 2203 (RPCSEC_GSS),
//! X/Open XNFS (NLM v4, NSM v1), RFC 1833 (RPCBIND).

pub mod adapter;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod settings;
pub mod shutdown;
pub mod store;

pub use protocol::xdr;

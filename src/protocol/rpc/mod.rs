//! ONC-RPC transport layer: record framing, call parsing, the dispatch
//! table, and back-channel plumbing.

pub mod callback;
pub mod client;
pub mod context;
pub mod dispatch;
pub mod wire;

pub use context::{Deps, RequestContext};
pub use wire::{
    is_reply, parse_call, read_marker, read_record, read_record_body, write_record, RpcCall,
    MAX_FRAGMENT_LENGTH,
};

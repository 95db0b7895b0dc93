//! Protocol implementations: the XDR codec, the ONC-RPC layer, the auth
//! processor, and the per-program handlers (NFSv3/v4, MOUNT, NLM, NSM,
//! portmap).

pub mod auth;
pub mod nfs;
pub mod rpc;
pub mod xdr;

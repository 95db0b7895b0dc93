//! Per-program protocol handlers.

pub mod mount;
pub mod nlm;
pub mod nsm;
pub mod portmap;
pub mod v3;
pub mod v4;

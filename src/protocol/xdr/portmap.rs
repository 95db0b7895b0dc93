//! RPCBIND / portmap protocol data types (RFC 1833).
//!
//! Version 2 `mapping` bodies are shared by the v3/v4 procedures this server
//! answers; GETPORT/DUMP semantics are identical across the spoken range.

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{Deserialize, DeserializeStruct, Serialize, SerializeStruct};

/// RPC program number of the portmap service.
pub const PROGRAM: u32 = 100000;
/// Lowest RPCBIND version answered.
pub const VERSION_LOW: u32 = 2;
/// Highest RPCBIND version answered.
pub const VERSION_HIGH: u32 = 4;

/// Protocol number for TCP.
pub const IPPROTO_TCP: u32 = 6;
/// Protocol number for UDP.
pub const IPPROTO_UDP: u32 = 17;

/// A program/version/protocol to port binding.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct mapping {
    pub prog: u32,
    pub vers: u32,
    pub prot: u32,
    pub port: u32,
}
SerializeStruct!(mapping, prog, vers, prot, port);
DeserializeStruct!(mapping, prog, vers, prot, port);

/// Portmap procedure numbers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum PortmapProgram {
    PMAPPROC_NULL = 0,
    PMAPPROC_SET = 1,
    PMAPPROC_UNSET = 2,
    PMAPPROC_GETPORT = 3,
    PMAPPROC_DUMP = 4,
    PMAPPROC_CALLIT = 5,
    INVALID = 6,
}

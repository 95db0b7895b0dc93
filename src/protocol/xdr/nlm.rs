//! NLM version 4 protocol data types (X/Open XNFS, chapter 10).
//!
//! NLM4 widens offsets and lengths to 64 bits relative to NLM1-3; only
//! version 4 is spoken here.

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{
    read_opaque_bounded, write_opaque, Deserialize, DeserializeEnum, DeserializeStruct, Serialize,
    SerializeEnum, SerializeStruct,
};

/// RPC program number of the lock manager.
pub const PROGRAM: u32 = 100021;
/// Only NLM v4 is spoken.
pub const VERSION: u32 = 4;

/// Cookies and owner handles are opaque; XNFS caps them at 1024 bytes.
pub const MAX_NETOBJ_SZ: usize = 1024;
pub const MAXNAMELEN: usize = 1025;

/// NLM procedure numbers, including the `_MSG`/`_RES` asynchronous variants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum NlmProgram {
    NLMPROC4_NULL = 0,
    NLMPROC4_TEST = 1,
    NLMPROC4_LOCK = 2,
    NLMPROC4_CANCEL = 3,
    NLMPROC4_UNLOCK = 4,
    NLMPROC4_GRANTED = 5,
    NLMPROC4_TEST_MSG = 6,
    NLMPROC4_LOCK_MSG = 7,
    NLMPROC4_CANCEL_MSG = 8,
    NLMPROC4_UNLOCK_MSG = 9,
    NLMPROC4_GRANTED_MSG = 10,
    NLMPROC4_TEST_RES = 11,
    NLMPROC4_LOCK_RES = 12,
    NLMPROC4_CANCEL_RES = 13,
    NLMPROC4_UNLOCK_RES = 14,
    NLMPROC4_GRANTED_RES = 15,
    NLMPROC4_FREE_ALL = 23,
    INVALID = 24,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nlm4_stats {
    #[default]
    NLM4_GRANTED = 0,
    NLM4_DENIED = 1,
    NLM4_DENIED_NOLOCKS = 2,
    NLM4_BLOCKED = 3,
    NLM4_DENIED_GRACE_PERIOD = 4,
    NLM4_DEADLCK = 5,
    NLM4_ROFS = 6,
    NLM4_STALE_FH = 7,
    NLM4_FBIG = 8,
    NLM4_FAILED = 9,
}
SerializeEnum!(nlm4_stats);
DeserializeEnum!(nlm4_stats);

/// Opaque variable-length object (cookies, owner handles, file handles).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct netobj(pub Vec<u8>);

impl netobj {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for netobj {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl Serialize for netobj {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for netobj {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_opaque_bounded(src, MAX_NETOBJ_SZ)?;
        Ok(())
    }
}

/// Caller host name, bounded at [`MAXNAMELEN`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct caller_name(pub Vec<u8>);

impl Serialize for caller_name {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for caller_name {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_opaque_bounded(src, MAXNAMELEN)?;
        Ok(())
    }
}

/// The lock description shared by TEST/LOCK/CANCEL/UNLOCK/GRANTED.
#[derive(Clone, Debug, Default)]
pub struct nlm4_lock {
    pub caller_name: caller_name,
    pub fh: netobj,
    pub oh: netobj,
    pub svid: u32,
    pub l_offset: u64,
    pub l_len: u64,
}
SerializeStruct!(nlm4_lock, caller_name, fh, oh, svid, l_offset, l_len);
DeserializeStruct!(nlm4_lock, caller_name, fh, oh, svid, l_offset, l_len);

/// The lock holder reported in a TEST denial.
#[derive(Clone, Debug, Default)]
pub struct nlm4_holder {
    pub exclusive: bool,
    pub svid: u32,
    pub oh: netobj,
    pub l_offset: u64,
    pub l_len: u64,
}
SerializeStruct!(nlm4_holder, exclusive, svid, oh, l_offset, l_len);
DeserializeStruct!(nlm4_holder, exclusive, svid, oh, l_offset, l_len);

#[derive(Clone, Debug, Default)]
pub struct nlm4_testargs {
    pub cookie: netobj,
    pub exclusive: bool,
    pub alock: nlm4_lock,
}
SerializeStruct!(nlm4_testargs, cookie, exclusive, alock);
DeserializeStruct!(nlm4_testargs, cookie, exclusive, alock);

/// TEST result body: `Void` when granted, the conflicting holder otherwise.
#[derive(Clone, Debug, Default)]
pub enum nlm4_testrply {
    #[default]
    Void,
    holder(nlm4_holder),
}

impl Serialize for nlm4_testrply {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            // Discriminated by nlm4_stats in the enclosing result, not by a
            // boolean: GRANTED carries nothing, DENIED carries the holder.
            nlm4_testrply::Void => nlm4_stats::NLM4_GRANTED.serialize(dest),
            nlm4_testrply::holder(h) => {
                nlm4_stats::NLM4_DENIED.serialize(dest)?;
                h.serialize(dest)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct nlm4_testres {
    pub cookie: netobj,
    pub stat: nlm4_testrply,
}
SerializeStruct!(nlm4_testres, cookie, stat);

#[derive(Clone, Debug, Default)]
pub struct nlm4_lockargs {
    pub cookie: netobj,
    pub block: bool,
    pub exclusive: bool,
    pub alock: nlm4_lock,
    pub reclaim: bool,
    pub state: u32,
}
SerializeStruct!(nlm4_lockargs, cookie, block, exclusive, alock, reclaim, state);
DeserializeStruct!(nlm4_lockargs, cookie, block, exclusive, alock, reclaim, state);

#[derive(Clone, Debug, Default)]
pub struct nlm4_cancargs {
    pub cookie: netobj,
    pub block: bool,
    pub exclusive: bool,
    pub alock: nlm4_lock,
}
SerializeStruct!(nlm4_cancargs, cookie, block, exclusive, alock);
DeserializeStruct!(nlm4_cancargs, cookie, block, exclusive, alock);

#[derive(Clone, Debug, Default)]
pub struct nlm4_unlockargs {
    pub cookie: netobj,
    pub alock: nlm4_lock,
}
SerializeStruct!(nlm4_unlockargs, cookie, alock);
DeserializeStruct!(nlm4_unlockargs, cookie, alock);

/// Generic result carrying only a status, used by LOCK/CANCEL/UNLOCK/GRANTED.
#[derive(Clone, Debug, Default)]
pub struct nlm4_res {
    pub cookie: netobj,
    pub stat: nlm4_stats,
}
SerializeStruct!(nlm4_res, cookie, stat);
DeserializeStruct!(nlm4_res, cookie, stat);

#[derive(Clone, Debug, Default)]
pub struct nlm4_notify {
    pub name: caller_name,
    pub state: u32,
}
SerializeStruct!(nlm4_notify, name, state);
DeserializeStruct!(nlm4_notify, name, state);

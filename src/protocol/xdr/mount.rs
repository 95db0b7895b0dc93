//! MOUNT version 3 protocol data types (RFC 1813 Appendix I).

#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{
    read_opaque_bounded, write_opaque, Deserialize, DeserializeEnum, DeserializeStruct, Serialize,
    SerializeEnum, SerializeStruct,
};

/// RPC program number of the MOUNT service.
pub const PROGRAM: u32 = 100005;
/// Version required by MNT; the bookkeeping procedures accept any version.
pub const VERSION: u32 = 3;

pub const MNTPATHLEN: usize = 1024;
pub const MNTNAMLEN: usize = 255;
/// Handle size limit carried in MNT results.
pub const FHSIZE3: usize = 64;

pub type fhandle3 = Vec<u8>;

/// Export or mount point path, bounded at [`MNTPATHLEN`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct dirpath(pub Vec<u8>);

impl dirpath {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for dirpath {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl Serialize for dirpath {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for dirpath {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_opaque_bounded(src, MNTPATHLEN)?;
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum mountstat3 {
    #[default]
    MNT3_OK = 0,
    MNT3ERR_PERM = 1,
    MNT3ERR_NOENT = 2,
    MNT3ERR_IO = 5,
    MNT3ERR_ACCES = 13,
    MNT3ERR_NOTDIR = 20,
    MNT3ERR_INVAL = 22,
    MNT3ERR_NAMETOOLONG = 63,
    MNT3ERR_NOTSUPP = 10004,
    MNT3ERR_SERVERFAULT = 10006,
}
SerializeEnum!(mountstat3);
DeserializeEnum!(mountstat3);

/// Body of a successful MNT reply: the root handle plus the auth flavors the
/// server will accept on the NFS program.
#[derive(Clone, Debug, Default)]
pub struct mountres3_ok {
    pub fhandle: fhandle3,
    pub auth_flavors: Vec<u32>,
}
SerializeStruct!(mountres3_ok, fhandle, auth_flavors);
DeserializeStruct!(mountres3_ok, fhandle, auth_flavors);

/// MOUNT procedure numbers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum MountProgram {
    MOUNTPROC3_NULL = 0,
    MOUNTPROC3_MNT = 1,
    MOUNTPROC3_DUMP = 2,
    MOUNTPROC3_UMNT = 3,
    MOUNTPROC3_UMNTALL = 4,
    MOUNTPROC3_EXPORT = 5,
    INVALID = 6,
}

//! Argument types for the v3 directory procedures
//! (MKDIR, SYMLINK, MKNOD, READDIR, READDIRPLUS; RFC 1813 section 3.3).
//!
//! READDIR entry chains are serialized by the handlers themselves because the
//! reply has to be truncated against the caller's byte budget while being
//! built; only the fixed argument shapes live here.

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use super::super::{
    deserialize, invalid_data, Deserialize, DeserializeStruct, Serialize, SerializeStruct,
};
use super::{
    cookie3, cookieverf3, count3, diropargs3, fileid3, filename3, ftype3, nfs_fh3, sattr3,
    specdata3, symlinkdata3,
};

#[derive(Clone, Debug, Default)]
pub struct MKDIR3args {
    pub dirops: diropargs3,
    pub attributes: sattr3,
}
SerializeStruct!(MKDIR3args, dirops, attributes);
DeserializeStruct!(MKDIR3args, dirops, attributes);

#[derive(Clone, Debug, Default)]
pub struct SYMLINK3args {
    pub dirops: diropargs3,
    pub symlink: symlinkdata3,
}
SerializeStruct!(SYMLINK3args, dirops, symlink);
DeserializeStruct!(SYMLINK3args, dirops, symlink);

#[derive(Clone, Debug, Default)]
pub struct READDIR3args {
    pub dir: nfs_fh3,
    pub cookie: cookie3,
    pub cookieverf: cookieverf3,
    pub count: count3,
}
SerializeStruct!(READDIR3args, dir, cookie, cookieverf, count);
DeserializeStruct!(READDIR3args, dir, cookie, cookieverf, count);

#[derive(Clone, Debug, Default)]
pub struct READDIRPLUS3args {
    pub dir: nfs_fh3,
    pub cookie: cookie3,
    pub cookieverf: cookieverf3,
    pub dircount: count3,
    pub maxcount: count3,
}
SerializeStruct!(READDIRPLUS3args, dir, cookie, cookieverf, dircount, maxcount);
DeserializeStruct!(READDIRPLUS3args, dir, cookie, cookieverf, dircount, maxcount);

/// One READDIR entry as serialized on the wire (value-follows chain element).
#[derive(Clone, Debug, Default)]
pub struct entry3 {
    pub fileid: fileid3,
    pub name: filename3,
    pub cookie: cookie3,
}
SerializeStruct!(entry3, fileid, name, cookie);
DeserializeStruct!(entry3, fileid, name, cookie);

#[derive(Clone, Debug, Default)]
pub struct devicedata3 {
    pub dev_attributes: sattr3,
    pub spec: specdata3,
}
SerializeStruct!(devicedata3, dev_attributes, spec);
DeserializeStruct!(devicedata3, dev_attributes, spec);

/// Type-discriminated creation data for MKNOD.
#[derive(Clone, Debug)]
pub enum mknoddata3 {
    Device(ftype3, devicedata3),
    Pipe(ftype3, sattr3),
    Other(ftype3),
}

impl Default for mknoddata3 {
    fn default() -> Self {
        mknoddata3::Other(ftype3::NF3REG)
    }
}

impl Serialize for mknoddata3 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            mknoddata3::Device(t, data) => {
                t.serialize(dest)?;
                data.serialize(dest)
            }
            mknoddata3::Pipe(t, attrs) => {
                t.serialize(dest)?;
                attrs.serialize(dest)
            }
            mknoddata3::Other(t) => t.serialize(dest),
        }
    }
}

impl Deserialize for mknoddata3 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let ftype = deserialize::<ftype3>(src)?;
        *self = match ftype {
            ftype3::NF3BLK | ftype3::NF3CHR => mknoddata3::Device(ftype, deserialize(src)?),
            ftype3::NF3SOCK | ftype3::NF3FIFO => mknoddata3::Pipe(ftype, deserialize(src)?),
            ftype3::NF3REG | ftype3::NF3DIR | ftype3::NF3LNK => {
                return Err(invalid_data(format!("mknod cannot create {ftype:?}")))
            }
        };
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MKNOD3args {
    pub dirops: diropargs3,
    pub what: mknoddata3,
}
SerializeStruct!(MKNOD3args, dirops, what);
DeserializeStruct!(MKNOD3args, dirops, what);

#[derive(Clone, Debug, Default)]
pub struct RENAME3args {
    pub from: diropargs3,
    pub to: diropargs3,
}
SerializeStruct!(RENAME3args, from, to);
DeserializeStruct!(RENAME3args, from, to);

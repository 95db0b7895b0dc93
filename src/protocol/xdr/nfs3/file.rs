//! Argument and result types for the v3 file I/O procedures
//! (READ, WRITE, COMMIT, LINK; RFC 1813 sections 3.3.6-3.3.21).

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::super::{
    Deserialize, DeserializeEnum, DeserializeStruct, Serialize, SerializeEnum, SerializeStruct,
};
use super::{
    count3, diropargs3, nfs_fh3, offset3, post_op_attr, wcc_data, writeverf3,
};

#[derive(Clone, Debug, Default)]
pub struct READ3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
}
SerializeStruct!(READ3args, file, offset, count);
DeserializeStruct!(READ3args, file, offset, count);

#[derive(Clone, Debug, Default)]
pub struct READ3resok {
    pub file_attributes: post_op_attr,
    pub count: count3,
    pub eof: bool,
    pub data: Vec<u8>,
}
SerializeStruct!(READ3resok, file_attributes, count, eof, data);
DeserializeStruct!(READ3resok, file_attributes, count, eof, data);

/// Commitment level requested by WRITE (RFC 1813 section 3.3.7).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum stable_how {
    #[default]
    UNSTABLE = 0,
    DATA_SYNC = 1,
    FILE_SYNC = 2,
}
SerializeEnum!(stable_how);
DeserializeEnum!(stable_how);

#[derive(Clone, Debug, Default)]
pub struct WRITE3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
    pub stable: stable_how,
    pub data: Vec<u8>,
}
SerializeStruct!(WRITE3args, file, offset, count, stable, data);
DeserializeStruct!(WRITE3args, file, offset, count, stable, data);

#[derive(Clone, Debug, Default)]
pub struct WRITE3resok {
    pub file_wcc: wcc_data,
    pub count: count3,
    pub committed: stable_how,
    pub verf: writeverf3,
}
SerializeStruct!(WRITE3resok, file_wcc, count, committed, verf);
DeserializeStruct!(WRITE3resok, file_wcc, count, committed, verf);

#[derive(Clone, Debug, Default)]
pub struct COMMIT3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
}
SerializeStruct!(COMMIT3args, file, offset, count);
DeserializeStruct!(COMMIT3args, file, offset, count);

#[derive(Clone, Debug, Default)]
pub struct COMMIT3resok {
    pub file_wcc: wcc_data,
    pub verf: writeverf3,
}
SerializeStruct!(COMMIT3resok, file_wcc, verf);
DeserializeStruct!(COMMIT3resok, file_wcc, verf);

#[derive(Clone, Debug, Default)]
pub struct LINK3args {
    pub file: nfs_fh3,
    pub link: diropargs3,
}
SerializeStruct!(LINK3args, file, link);
DeserializeStruct!(LINK3args, file, link);

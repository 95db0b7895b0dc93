//! Result types for the v3 file system information procedures
//! (FSSTAT, FSINFO, PATHCONF; RFC 1813 sections 3.3.18-3.3.20).

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use super::super::{Deserialize, DeserializeStruct, Serialize, SerializeStruct};
use super::{count3, nfstime3, post_op_attr, size3};

// FSINFO properties bitmask.
pub const FSF_LINK: u32 = 0x0001;
pub const FSF_SYMLINK: u32 = 0x0002;
pub const FSF_HOMOGENEOUS: u32 = 0x0008;
pub const FSF_CANSETTIME: u32 = 0x0010;

#[derive(Clone, Debug, Default)]
pub struct FSINFO3resok {
    pub obj_attributes: post_op_attr,
    pub rtmax: count3,
    pub rtpref: count3,
    pub rtmult: count3,
    pub wtmax: count3,
    pub wtpref: count3,
    pub wtmult: count3,
    pub dtpref: count3,
    pub maxfilesize: size3,
    pub time_delta: nfstime3,
    pub properties: u32,
}
SerializeStruct!(
    FSINFO3resok,
    obj_attributes,
    rtmax,
    rtpref,
    rtmult,
    wtmax,
    wtpref,
    wtmult,
    dtpref,
    maxfilesize,
    time_delta,
    properties
);
DeserializeStruct!(
    FSINFO3resok,
    obj_attributes,
    rtmax,
    rtpref,
    rtmult,
    wtmax,
    wtpref,
    wtmult,
    dtpref,
    maxfilesize,
    time_delta,
    properties
);

#[derive(Clone, Debug, Default)]
pub struct FSSTAT3resok {
    pub obj_attributes: post_op_attr,
    pub tbytes: size3,
    pub fbytes: size3,
    pub abytes: size3,
    pub tfiles: size3,
    pub ffiles: size3,
    pub afiles: size3,
    pub invarsec: u32,
}
SerializeStruct!(
    FSSTAT3resok, obj_attributes, tbytes, fbytes, abytes, tfiles, ffiles, afiles, invarsec
);
DeserializeStruct!(
    FSSTAT3resok, obj_attributes, tbytes, fbytes, abytes, tfiles, ffiles, afiles, invarsec
);

#[derive(Clone, Debug, Default)]
pub struct PATHCONF3resok {
    pub obj_attributes: post_op_attr,
    pub linkmax: u32,
    pub name_max: u32,
    pub no_trunc: bool,
    pub chown_restricted: bool,
    pub case_insensitive: bool,
    pub case_preserving: bool,
}
SerializeStruct!(
    PATHCONF3resok,
    obj_attributes,
    linkmax,
    name_max,
    no_trunc,
    chown_restricted,
    case_insensitive,
    case_preserving
);
DeserializeStruct!(
    PATHCONF3resok,
    obj_attributes,
    linkmax,
    name_max,
    no_trunc,
    chown_restricted,
    case_insensitive,
    case_preserving
);

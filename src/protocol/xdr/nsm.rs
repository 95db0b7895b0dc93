//! NSM (statd) version 1 protocol data types (X/Open XNFS, chapter 11).

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{
    read_opaque_bounded, write_opaque, Deserialize, DeserializeEnum, DeserializeStruct, Serialize,
    SerializeEnum, SerializeStruct,
};

/// RPC program number of the status monitor.
pub const PROGRAM: u32 = 100024;
/// Only NSM v1 exists.
pub const VERSION: u32 = 1;

pub const SM_MAXSTRLEN: usize = 1024;
/// Private cookie length echoed back in SM_NOTIFY.
pub const SM_PRIV_SIZE: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum NsmProgram {
    SM_NULL = 0,
    SM_STAT = 1,
    SM_MON = 2,
    SM_UNMON = 3,
    SM_UNMON_ALL = 4,
    SM_SIMU_CRASH = 5,
    SM_NOTIFY = 6,
    INVALID = 7,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum sm_res {
    #[default]
    STAT_SUCC = 0,
    STAT_FAIL = 1,
}
SerializeEnum!(sm_res);
DeserializeEnum!(sm_res);

/// Host name string, bounded at [`SM_MAXSTRLEN`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct sm_name(pub Vec<u8>);

impl Serialize for sm_name {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for sm_name {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_opaque_bounded(src, SM_MAXSTRLEN)?;
        Ok(())
    }
}

/// Identity of the local service to call back when `mon_name` changes state.
#[derive(Clone, Debug, Default)]
pub struct my_id {
    pub my_name: sm_name,
    pub my_prog: u32,
    pub my_vers: u32,
    pub my_proc: u32,
}
SerializeStruct!(my_id, my_name, my_prog, my_vers, my_proc);
DeserializeStruct!(my_id, my_name, my_prog, my_vers, my_proc);

#[derive(Clone, Debug, Default)]
pub struct mon_id {
    pub mon_name: sm_name,
    pub my_id: my_id,
}
SerializeStruct!(mon_id, mon_name, my_id);
DeserializeStruct!(mon_id, mon_name, my_id);

/// SM_MON arguments: who to watch plus an opaque private cookie.
#[derive(Clone, Debug, Default)]
pub struct mon {
    pub mon_id: mon_id,
    pub priv_: [u8; SM_PRIV_SIZE],
}
SerializeStruct!(mon, mon_id, priv_);
DeserializeStruct!(mon, mon_id, priv_);

#[derive(Clone, Debug, Default)]
pub struct sm_stat {
    pub state: i32,
}
SerializeStruct!(sm_stat, state);
DeserializeStruct!(sm_stat, state);

#[derive(Clone, Debug, Default)]
pub struct sm_stat_res {
    pub res_stat: sm_res,
    pub state: i32,
}
SerializeStruct!(sm_stat_res, res_stat, state);
DeserializeStruct!(sm_stat_res, res_stat, state);

/// SM_NOTIFY arguments announcing a state change of `mon_name`.
#[derive(Clone, Debug, Default)]
pub struct stat_chge {
    pub mon_name: sm_name,
    pub state: i32,
}
SerializeStruct!(stat_chge, mon_name, state);
DeserializeStruct!(stat_chge, mon_name, state);

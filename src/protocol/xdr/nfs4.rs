//! NFS version 4.0/4.1 data types (RFC 7530, RFC 5661).
//!
//! Only the operations the compound engine interprets are modelled; an
//! unknown opcode decodes into [`nfs_argop4::ILLEGAL`] so the engine can
//! answer `NFS4ERR_OP_ILLEGAL` without tearing down the request.

#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{
    deserialize, invalid_data, read_opaque_bounded, write_opaque, Deserialize, DeserializeEnum,
    DeserializeStruct, Serialize, SerializeEnum, SerializeStruct,
};

pub const PROGRAM: u32 = 100003;
pub const VERSION: u32 = 4;

pub const NFS4_FHSIZE: usize = 128;
pub const NFS4_VERIFIER_SIZE: usize = 8;
pub const NFS4_SESSIONID_SIZE: usize = 16;
pub const NFS4_OTHER_SIZE: usize = 12;
pub const NFS4_OPAQUE_LIMIT: usize = 1024;

pub type verifier4 = [u8; NFS4_VERIFIER_SIZE];
pub type sessionid4 = [u8; NFS4_SESSIONID_SIZE];
pub type clientid4 = u64;
pub type sequenceid4 = u32;
pub type slotid4 = u32;
pub type count4 = u32;
pub type changeid4 = u64;
pub type nfs_cookie4 = u64;
pub type mode4 = u32;
pub type acetype4 = u32;
pub type aceflag4 = u32;
pub type acemask4 = u32;

/// Status codes used by the compound engine and state manager.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat4 {
    #[default]
    NFS4_OK = 0,
    NFS4ERR_PERM = 1,
    NFS4ERR_NOENT = 2,
    NFS4ERR_IO = 5,
    NFS4ERR_ACCESS = 13,
    NFS4ERR_EXIST = 17,
    NFS4ERR_XDEV = 18,
    NFS4ERR_NOTDIR = 20,
    NFS4ERR_ISDIR = 21,
    NFS4ERR_INVAL = 22,
    NFS4ERR_FBIG = 27,
    NFS4ERR_NOSPC = 28,
    NFS4ERR_ROFS = 30,
    NFS4ERR_MLINK = 31,
    NFS4ERR_NAMETOOLONG = 63,
    NFS4ERR_NOTEMPTY = 66,
    NFS4ERR_DQUOT = 69,
    NFS4ERR_STALE = 70,
    NFS4ERR_BADHANDLE = 10001,
    NFS4ERR_BAD_COOKIE = 10003,
    NFS4ERR_NOTSUPP = 10004,
    NFS4ERR_TOOSMALL = 10005,
    NFS4ERR_SERVERFAULT = 10006,
    NFS4ERR_BADTYPE = 10007,
    NFS4ERR_DELAY = 10008,
    NFS4ERR_SAME = 10009,
    NFS4ERR_DENIED = 10010,
    NFS4ERR_EXPIRED = 10011,
    NFS4ERR_LOCKED = 10012,
    NFS4ERR_GRACE = 10013,
    NFS4ERR_FHEXPIRED = 10014,
    NFS4ERR_SHARE_DENIED = 10015,
    NFS4ERR_WRONGSEC = 10016,
    NFS4ERR_CLID_INUSE = 10017,
    NFS4ERR_RESOURCE = 10018,
    NFS4ERR_NOFILEHANDLE = 10020,
    NFS4ERR_MINOR_VERS_MISMATCH = 10021,
    NFS4ERR_STALE_CLIENTID = 10022,
    NFS4ERR_STALE_STATEID = 10023,
    NFS4ERR_OLD_STATEID = 10024,
    NFS4ERR_BAD_STATEID = 10025,
    NFS4ERR_BAD_SEQID = 10026,
    NFS4ERR_NOT_SAME = 10027,
    NFS4ERR_LOCK_RANGE = 10028,
    NFS4ERR_SYMLINK = 10029,
    NFS4ERR_RESTOREFH = 10030,
    NFS4ERR_ATTRNOTSUPP = 10032,
    NFS4ERR_NO_GRACE = 10033,
    NFS4ERR_RECLAIM_BAD = 10034,
    NFS4ERR_RECLAIM_CONFLICT = 10035,
    NFS4ERR_BADXDR = 10036,
    NFS4ERR_LOCKS_HELD = 10037,
    NFS4ERR_OPENMODE = 10038,
    NFS4ERR_BADOWNER = 10039,
    NFS4ERR_BADCHAR = 10040,
    NFS4ERR_BADNAME = 10041,
    NFS4ERR_BAD_RANGE = 10042,
    NFS4ERR_LOCK_NOTSUPP = 10043,
    NFS4ERR_OP_ILLEGAL = 10044,
    NFS4ERR_DEADLOCK = 10045,
    NFS4ERR_FILE_OPEN = 10046,
    NFS4ERR_ADMIN_REVOKED = 10047,
    NFS4ERR_CB_PATH_DOWN = 10048,
    NFS4ERR_BADSESSION = 10052,
    NFS4ERR_BADSLOT = 10053,
    NFS4ERR_COMPLETE_ALREADY = 10054,
    NFS4ERR_CONN_NOT_BOUND_TO_SESSION = 10055,
    NFS4ERR_SEQ_MISORDERED = 10063,
    NFS4ERR_SEQUENCE_POS = 10064,
    NFS4ERR_RETRY_UNCACHED_REP = 10068,
    NFS4ERR_TOO_MANY_OPS = 10070,
    NFS4ERR_OP_NOT_IN_SESSION = 10071,
    NFS4ERR_NOT_ONLY_OP = 10081,
}
SerializeEnum!(nfsstat4);
DeserializeEnum!(nfsstat4);

/// Object types (subset used by this server: regular files, directories,
/// symlinks and the node types surfaced through the store).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_ftype4 {
    #[default]
    NF4REG = 1,
    NF4DIR = 2,
    NF4BLK = 3,
    NF4CHR = 4,
    NF4LNK = 5,
    NF4SOCK = 6,
    NF4FIFO = 7,
}
SerializeEnum!(nfs_ftype4);
DeserializeEnum!(nfs_ftype4);

/// 16-byte state identifier: 4-byte sequence counter plus 12 opaque bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct stateid4 {
    pub seqid: u32,
    pub other: [u8; NFS4_OTHER_SIZE],
}
SerializeStruct!(stateid4, seqid, other);
DeserializeStruct!(stateid4, seqid, other);

impl stateid4 {
    /// The reserved all-zero stateid.
    pub fn special_zero() -> Self {
        Self::default()
    }

    /// The reserved all-ones "current/any" stateid.
    pub fn special_any() -> Self {
        Self { seqid: u32::MAX, other: [0xff; NFS4_OTHER_SIZE] }
    }

    pub fn is_special(&self) -> bool {
        *self == Self::special_zero() || *self == Self::special_any()
    }
}

/// Opaque v4 file handle, bounded at [`NFS4_FHSIZE`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct nfs_fh4 {
    pub data: Vec<u8>,
}

impl Serialize for nfs_fh4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.data, dest)
    }
}

impl Deserialize for nfs_fh4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.data = read_opaque_bounded(src, NFS4_FHSIZE)?;
        Ok(())
    }
}

/// UTF-8 string (component names, owner strings, tags).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct utf8string(pub Vec<u8>);

impl utf8string {
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for utf8string {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl Serialize for utf8string {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for utf8string {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_opaque_bounded(src, NFS4_OPAQUE_LIMIT)?;
        Ok(())
    }
}

pub type component4 = utf8string;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct nfstime4 {
    pub seconds: i64,
    pub nseconds: u32,
}
SerializeStruct!(nfstime4, seconds, nseconds);
DeserializeStruct!(nfstime4, seconds, nseconds);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct fsid4 {
    pub major: u64,
    pub minor: u64,
}
SerializeStruct!(fsid4, major, minor);
DeserializeStruct!(fsid4, major, minor);

/// Attribute bitmap: counted array of 32-bit words.
pub type bitmap4 = Vec<u32>;

/// Returns true when `attr` (a FATTR4_* number) is set in the bitmap.
pub fn bitmap_get(bitmap: &bitmap4, attr: u32) -> bool {
    let word = (attr / 32) as usize;
    word < bitmap.len() && bitmap[word] & (1 << (attr % 32)) != 0
}

/// Sets `attr` in the bitmap, growing it as needed.
pub fn bitmap_set(bitmap: &mut bitmap4, attr: u32) {
    let word = (attr / 32) as usize;
    if bitmap.len() <= word {
        bitmap.resize(word + 1, 0);
    }
    bitmap[word] |= 1 << (attr % 32);
}

// Attribute numbers served by GETATTR.
pub const FATTR4_SUPPORTED_ATTRS: u32 = 0;
pub const FATTR4_TYPE: u32 = 1;
pub const FATTR4_FH_EXPIRE_TYPE: u32 = 2;
pub const FATTR4_CHANGE: u32 = 3;
pub const FATTR4_SIZE: u32 = 4;
pub const FATTR4_LINK_SUPPORT: u32 = 5;
pub const FATTR4_SYMLINK_SUPPORT: u32 = 6;
pub const FATTR4_NAMED_ATTR: u32 = 7;
pub const FATTR4_FSID: u32 = 8;
pub const FATTR4_UNIQUE_HANDLES: u32 = 9;
pub const FATTR4_LEASE_TIME: u32 = 10;
pub const FATTR4_RDATTR_ERROR: u32 = 11;
pub const FATTR4_ACL: u32 = 12;
pub const FATTR4_FILEHANDLE: u32 = 19;
pub const FATTR4_FILEID: u32 = 20;
pub const FATTR4_MODE: u32 = 33;
pub const FATTR4_NUMLINKS: u32 = 35;
pub const FATTR4_OWNER: u32 = 36;
pub const FATTR4_OWNER_GROUP: u32 = 37;
pub const FATTR4_SPACE_USED: u32 = 45;
pub const FATTR4_TIME_ACCESS: u32 = 47;
pub const FATTR4_TIME_METADATA: u32 = 52;
pub const FATTR4_TIME_MODIFY: u32 = 53;

/// Attribute mask plus the packed attribute values it selects.
#[derive(Clone, Debug, Default)]
pub struct fattr4 {
    pub attrmask: bitmap4,
    pub attr_vals: Vec<u8>,
}
SerializeStruct!(fattr4, attrmask, attr_vals);
DeserializeStruct!(fattr4, attrmask, attr_vals);

/// before/after change attributes around a directory mutation.
#[derive(Copy, Clone, Debug, Default)]
pub struct change_info4 {
    pub atomic: bool,
    pub before: changeid4,
    pub after: changeid4,
}
SerializeStruct!(change_info4, atomic, before, after);
DeserializeStruct!(change_info4, atomic, before, after);

/// One NFSv4 access control entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct nfsace4 {
    pub acetype: acetype4,
    pub flag: aceflag4,
    pub access_mask: acemask4,
    pub who: utf8string,
}
SerializeStruct!(nfsace4, acetype, flag, access_mask, who);
DeserializeStruct!(nfsace4, acetype, flag, access_mask, who);

impl Serialize for Vec<nfsace4> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        (self.len() as u32).serialize(dest)?;
        for ace in self {
            ace.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for Vec<nfsace4> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let len = deserialize::<u32>(src)? as usize;
        if len > 1024 {
            return Err(invalid_data("ACE list too long"));
        }
        self.clear();
        for _ in 0..len {
            self.push(deserialize(src)?);
        }
        Ok(())
    }
}

// --- client and session establishment ---

#[derive(Clone, Debug, Default)]
pub struct client_owner4 {
    pub co_verifier: verifier4,
    pub co_ownerid: Vec<u8>,
}
SerializeStruct!(client_owner4, co_verifier, co_ownerid);
DeserializeStruct!(client_owner4, co_verifier, co_ownerid);

/// v4.0 SETCLIENTID callback target.
#[derive(Clone, Debug, Default)]
pub struct cb_client4 {
    pub cb_program: u32,
    pub r_netid: utf8string,
    pub r_addr: utf8string,
}
SerializeStruct!(cb_client4, cb_program, r_netid, r_addr);
DeserializeStruct!(cb_client4, cb_program, r_netid, r_addr);

#[derive(Clone, Debug, Default)]
pub struct nfs_client_id4 {
    pub verifier: verifier4,
    pub id: Vec<u8>,
}
SerializeStruct!(nfs_client_id4, verifier, id);
DeserializeStruct!(nfs_client_id4, verifier, id);

#[derive(Clone, Debug, Default)]
pub struct SETCLIENTID4args {
    pub client: nfs_client_id4,
    pub callback: cb_client4,
    pub callback_ident: u32,
}
SerializeStruct!(SETCLIENTID4args, client, callback, callback_ident);
DeserializeStruct!(SETCLIENTID4args, client, callback, callback_ident);

#[derive(Clone, Debug, Default)]
pub struct SETCLIENTID_CONFIRM4args {
    pub clientid: clientid4,
    pub setclientid_confirm: verifier4,
}
SerializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);
DeserializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);

// EXCHANGE_ID flags used by this server.
pub const EXCHGID4_FLAG_USE_NON_PNFS: u32 = 0x0001_0000;
pub const EXCHGID4_FLAG_CONFIRMED_R: u32 = 0x8000_0000;

#[derive(Clone, Debug, Default)]
pub struct EXCHANGE_ID4args {
    pub eia_clientowner: client_owner4,
    pub eia_flags: u32,
    // state_protect4_a: only SP4_NONE is accepted; the discriminant is
    // consumed during decode.
    pub eia_client_impl_id: Vec<u8>,
}

impl Deserialize for EXCHANGE_ID4args {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.eia_clientowner.deserialize(src)?;
        self.eia_flags.deserialize(src)?;
        let how = deserialize::<u32>(src)?;
        if how != 0 {
            return Err(invalid_data(format!("unsupported state_protect how {how}")));
        }
        let impl_count = deserialize::<u32>(src)?;
        if impl_count > 1 {
            return Err(invalid_data("more than one client_impl_id"));
        }
        if impl_count == 1 {
            // domain, name, build date; retained only for logging.
            let _domain = deserialize::<utf8string>(src)?;
            let _name = deserialize::<utf8string>(src)?;
            let _date = deserialize::<nfstime4>(src)?;
        }
        Ok(())
    }
}

/// Server identity block inside an EXCHANGE_ID result.
#[derive(Clone, Debug, Default)]
pub struct EXCHANGE_ID4resok {
    pub eir_clientid: clientid4,
    pub eir_sequenceid: sequenceid4,
    pub eir_flags: u32,
    pub eir_server_owner_minor: u64,
    pub eir_server_owner_major: Vec<u8>,
    pub eir_server_scope: Vec<u8>,
}

impl Serialize for EXCHANGE_ID4resok {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.eir_clientid.serialize(dest)?;
        self.eir_sequenceid.serialize(dest)?;
        self.eir_flags.serialize(dest)?;
        // state_protect4_r: SP4_NONE
        0u32.serialize(dest)?;
        self.eir_server_owner_minor.serialize(dest)?;
        self.eir_server_owner_major.serialize(dest)?;
        self.eir_server_scope.serialize(dest)?;
        // eir_server_impl_id: empty array
        0u32.serialize(dest)
    }
}

/// Fore/back channel attributes negotiated at CREATE_SESSION.
#[derive(Clone, Debug, Default)]
pub struct channel_attrs4 {
    pub ca_headerpadsize: count4,
    pub ca_maxrequestsize: count4,
    pub ca_maxresponsesize: count4,
    pub ca_maxresponsesize_cached: count4,
    pub ca_maxoperations: count4,
    pub ca_maxrequests: count4,
    pub ca_rdma_ird: Vec<u32>,
}
SerializeStruct!(
    channel_attrs4,
    ca_headerpadsize,
    ca_maxrequestsize,
    ca_maxresponsesize,
    ca_maxresponsesize_cached,
    ca_maxoperations,
    ca_maxrequests,
    ca_rdma_ird
);
DeserializeStruct!(
    channel_attrs4,
    ca_headerpadsize,
    ca_maxrequestsize,
    ca_maxresponsesize,
    ca_maxresponsesize_cached,
    ca_maxoperations,
    ca_maxrequests,
    ca_rdma_ird
);

pub const CREATE_SESSION4_FLAG_PERSIST: u32 = 0x1;
pub const CREATE_SESSION4_FLAG_CONN_BACK_CHAN: u32 = 0x2;

#[derive(Clone, Debug, Default)]
pub struct CREATE_SESSION4args {
    pub csa_clientid: clientid4,
    pub csa_sequence: sequenceid4,
    pub csa_flags: u32,
    pub csa_fore_chan_attrs: channel_attrs4,
    pub csa_back_chan_attrs: channel_attrs4,
    pub csa_cb_program: u32,
    // csa_sec_parms is consumed and ignored; the session inherits the
    // credential of the creating connection.
    pub csa_sec_parms_count: u32,
}

impl Deserialize for CREATE_SESSION4args {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.csa_clientid.deserialize(src)?;
        self.csa_sequence.deserialize(src)?;
        self.csa_flags.deserialize(src)?;
        self.csa_fore_chan_attrs.deserialize(src)?;
        self.csa_back_chan_attrs.deserialize(src)?;
        self.csa_cb_program.deserialize(src)?;
        self.csa_sec_parms_count.deserialize(src)?;
        for _ in 0..self.csa_sec_parms_count.min(16) {
            let flavor = deserialize::<u32>(src)?;
            match flavor {
                0 => {}
                1 => {
                    let _unix = deserialize::<super::rpc::auth_unix>(src)?;
                }
                other => return Err(invalid_data(format!("bad callback_sec_parms {other}"))),
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct CREATE_SESSION4resok {
    pub csr_sessionid: sessionid4,
    pub csr_sequence: sequenceid4,
    pub csr_flags: u32,
    pub csr_fore_chan_attrs: channel_attrs4,
    pub csr_back_chan_attrs: channel_attrs4,
}
SerializeStruct!(
    CREATE_SESSION4resok,
    csr_sessionid,
    csr_sequence,
    csr_flags,
    csr_fore_chan_attrs,
    csr_back_chan_attrs
);
DeserializeStruct!(
    CREATE_SESSION4resok,
    csr_sessionid,
    csr_sequence,
    csr_flags,
    csr_fore_chan_attrs,
    csr_back_chan_attrs
);

/// Channel direction requested by BIND_CONN_TO_SESSION.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum channel_dir_from_client4 {
    #[default]
    CDFC4_FORE = 1,
    CDFC4_BACK = 2,
    CDFC4_FORE_OR_BOTH = 3,
    CDFC4_BACK_OR_BOTH = 4,
}
SerializeEnum!(channel_dir_from_client4);
DeserializeEnum!(channel_dir_from_client4);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum channel_dir_from_server4 {
    #[default]
    CDFS4_FORE = 1,
    CDFS4_BACK = 2,
    CDFS4_BOTH = 3,
}
SerializeEnum!(channel_dir_from_server4);
DeserializeEnum!(channel_dir_from_server4);

#[derive(Clone, Debug, Default)]
pub struct BIND_CONN_TO_SESSION4args {
    pub bctsa_sessid: sessionid4,
    pub bctsa_dir: channel_dir_from_client4,
    pub bctsa_use_conn_in_rdma_mode: bool,
}
SerializeStruct!(BIND_CONN_TO_SESSION4args, bctsa_sessid, bctsa_dir, bctsa_use_conn_in_rdma_mode);
DeserializeStruct!(BIND_CONN_TO_SESSION4args, bctsa_sessid, bctsa_dir, bctsa_use_conn_in_rdma_mode);

#[derive(Clone, Debug, Default)]
pub struct BIND_CONN_TO_SESSION4resok {
    pub bctsr_sessid: sessionid4,
    pub bctsr_dir: channel_dir_from_server4,
    pub bctsr_use_conn_in_rdma_mode: bool,
}
SerializeStruct!(BIND_CONN_TO_SESSION4resok, bctsr_sessid, bctsr_dir, bctsr_use_conn_in_rdma_mode);
DeserializeStruct!(
    BIND_CONN_TO_SESSION4resok,
    bctsr_sessid,
    bctsr_dir,
    bctsr_use_conn_in_rdma_mode
);

#[derive(Clone, Debug, Default)]
pub struct SEQUENCE4args {
    pub sa_sessionid: sessionid4,
    pub sa_sequenceid: sequenceid4,
    pub sa_slotid: slotid4,
    pub sa_highest_slotid: slotid4,
    pub sa_cachethis: bool,
}
SerializeStruct!(
    SEQUENCE4args, sa_sessionid, sa_sequenceid, sa_slotid, sa_highest_slotid, sa_cachethis
);
DeserializeStruct!(
    SEQUENCE4args, sa_sessionid, sa_sequenceid, sa_slotid, sa_highest_slotid, sa_cachethis
);

#[derive(Clone, Debug, Default)]
pub struct SEQUENCE4resok {
    pub sr_sessionid: sessionid4,
    pub sr_sequenceid: sequenceid4,
    pub sr_slotid: slotid4,
    pub sr_highest_slotid: slotid4,
    pub sr_target_highest_slotid: slotid4,
    pub sr_status_flags: u32,
}
SerializeStruct!(
    SEQUENCE4resok,
    sr_sessionid,
    sr_sequenceid,
    sr_slotid,
    sr_highest_slotid,
    sr_target_highest_slotid,
    sr_status_flags
);
DeserializeStruct!(
    SEQUENCE4resok,
    sr_sessionid,
    sr_sequenceid,
    sr_slotid,
    sr_highest_slotid,
    sr_target_highest_slotid,
    sr_status_flags
);

// --- open / lock machinery ---

pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x1;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x2;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x3;
pub const OPEN4_SHARE_DENY_NONE: u32 = 0x0;

pub const OPEN4_RESULT_CONFIRM: u32 = 0x2;
pub const OPEN4_RESULT_LOCKTYPE_POSIX: u32 = 0x4;

#[derive(Clone, Debug, Default)]
pub struct open_owner4 {
    pub clientid: clientid4,
    pub owner: Vec<u8>,
}
SerializeStruct!(open_owner4, clientid, owner);
DeserializeStruct!(open_owner4, clientid, owner);

pub type lock_owner4 = open_owner4;

/// How OPEN names its object: ordinary lookup, or reclaim after restart.
#[derive(Clone, Debug)]
pub enum open_claim4 {
    CLAIM_NULL(component4),
    CLAIM_PREVIOUS(u32),
    CLAIM_FH,
}

impl Default for open_claim4 {
    fn default() -> Self {
        open_claim4::CLAIM_NULL(component4::default())
    }
}

impl Deserialize for open_claim4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = open_claim4::CLAIM_NULL(deserialize(src)?),
            1 => *self = open_claim4::CLAIM_PREVIOUS(deserialize(src)?),
            4 => *self = open_claim4::CLAIM_FH,
            other => return Err(invalid_data(format!("unsupported open_claim {other}"))),
        }
        Ok(())
    }
}

/// UNCHECKED/GUARDED creation attrs or EXCLUSIVE verifier.
#[derive(Clone, Debug)]
pub enum createhow4 {
    UNCHECKED(fattr4),
    GUARDED(fattr4),
    EXCLUSIVE(verifier4),
}

impl Default for createhow4 {
    fn default() -> Self {
        createhow4::UNCHECKED(fattr4::default())
    }
}

impl Deserialize for createhow4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = createhow4::UNCHECKED(deserialize(src)?),
            1 => *self = createhow4::GUARDED(deserialize(src)?),
            2 => *self = createhow4::EXCLUSIVE(deserialize(src)?),
            other => return Err(invalid_data(format!("bad createmode {other}"))),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub enum openflag4 {
    #[default]
    OPEN4_NOCREATE,
    OPEN4_CREATE(createhow4),
}

impl Deserialize for openflag4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = openflag4::OPEN4_NOCREATE,
            1 => *self = openflag4::OPEN4_CREATE(deserialize(src)?),
            other => return Err(invalid_data(format!("bad opentype {other}"))),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct OPEN4args {
    pub seqid: sequenceid4,
    pub share_access: u32,
    pub share_deny: u32,
    pub owner: open_owner4,
    pub openhow: openflag4,
    pub claim: open_claim4,
}
DeserializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);

/// Delegation granted by OPEN, if any.
#[derive(Clone, Debug, Default)]
pub enum open_delegation4 {
    #[default]
    NONE,
    READ(stateid4, nfsace4),
    WRITE(stateid4, nfsace4),
}

impl Serialize for open_delegation4 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            open_delegation4::NONE => 0u32.serialize(dest),
            open_delegation4::READ(sid, ace) => {
                1u32.serialize(dest)?;
                sid.serialize(dest)?;
                // recall flag
                false.serialize(dest)?;
                ace.serialize(dest)
            }
            open_delegation4::WRITE(sid, ace) => {
                2u32.serialize(dest)?;
                sid.serialize(dest)?;
                false.serialize(dest)?;
                // space_limit: NFS_LIMIT_SIZE, no bound
                1u32.serialize(dest)?;
                u64::MAX.serialize(dest)?;
                ace.serialize(dest)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OPEN4resok {
    pub stateid: stateid4,
    pub cinfo: change_info4,
    pub rflags: u32,
    pub attrset: bitmap4,
    pub delegation: open_delegation4,
}
SerializeStruct!(OPEN4resok, stateid, cinfo, rflags, attrset, delegation);

#[derive(Clone, Debug, Default)]
pub struct OPEN_CONFIRM4args {
    pub open_stateid: stateid4,
    pub seqid: sequenceid4,
}
SerializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);
DeserializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);

#[derive(Clone, Debug, Default)]
pub struct OPEN_DOWNGRADE4args {
    pub open_stateid: stateid4,
    pub seqid: sequenceid4,
    pub share_access: u32,
    pub share_deny: u32,
}
SerializeStruct!(OPEN_DOWNGRADE4args, open_stateid, seqid, share_access, share_deny);
DeserializeStruct!(OPEN_DOWNGRADE4args, open_stateid, seqid, share_access, share_deny);

#[derive(Clone, Debug, Default)]
pub struct CLOSE4args {
    pub seqid: sequenceid4,
    pub open_stateid: stateid4,
}
SerializeStruct!(CLOSE4args, seqid, open_stateid);
DeserializeStruct!(CLOSE4args, seqid, open_stateid);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_lock_type4 {
    #[default]
    READ_LT = 1,
    WRITE_LT = 2,
    READW_LT = 3,
    WRITEW_LT = 4,
}
SerializeEnum!(nfs_lock_type4);
DeserializeEnum!(nfs_lock_type4);

impl nfs_lock_type4 {
    pub fn is_write(self) -> bool {
        matches!(self, nfs_lock_type4::WRITE_LT | nfs_lock_type4::WRITEW_LT)
    }

    pub fn is_blocking(self) -> bool {
        matches!(self, nfs_lock_type4::READW_LT | nfs_lock_type4::WRITEW_LT)
    }
}

/// LOCK names its owner either by an open stateid (first lock) or by an
/// existing lock stateid.
#[derive(Clone, Debug)]
pub enum locker4 {
    open_owner { open_seqid: sequenceid4, open_stateid: stateid4, lock_seqid: sequenceid4, lock_owner: lock_owner4 },
    lock_owner { lock_stateid: stateid4, lock_seqid: sequenceid4 },
}

impl Default for locker4 {
    fn default() -> Self {
        locker4::lock_owner { lock_stateid: stateid4::default(), lock_seqid: 0 }
    }
}

impl Deserialize for locker4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<bool>(src)? {
            true => {
                let open_seqid = deserialize(src)?;
                let open_stateid = deserialize(src)?;
                let lock_seqid = deserialize(src)?;
                let lock_owner = deserialize(src)?;
                *self = locker4::open_owner { open_seqid, open_stateid, lock_seqid, lock_owner };
            }
            false => {
                let lock_stateid = deserialize(src)?;
                let lock_seqid = deserialize(src)?;
                *self = locker4::lock_owner { lock_stateid, lock_seqid };
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct LOCK4args {
    pub locktype: nfs_lock_type4,
    pub reclaim: bool,
    pub offset: u64,
    pub length: u64,
    pub locker: locker4,
}
DeserializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);

/// Conflicting lock description in LOCK/LOCKT denials.
#[derive(Clone, Debug, Default)]
pub struct LOCK4denied {
    pub offset: u64,
    pub length: u64,
    pub locktype: nfs_lock_type4,
    pub owner: lock_owner4,
}
SerializeStruct!(LOCK4denied, offset, length, locktype, owner);

#[derive(Clone, Debug, Default)]
pub struct LOCKT4args {
    pub locktype: nfs_lock_type4,
    pub offset: u64,
    pub length: u64,
    pub owner: lock_owner4,
}
DeserializeStruct!(LOCKT4args, locktype, offset, length, owner);

#[derive(Clone, Debug, Default)]
pub struct LOCKU4args {
    pub locktype: nfs_lock_type4,
    pub seqid: sequenceid4,
    pub lock_stateid: stateid4,
    pub offset: u64,
    pub length: u64,
}
DeserializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);

// --- remaining per-op argument shapes ---

#[derive(Clone, Debug, Default)]
pub struct READ4args {
    pub stateid: stateid4,
    pub offset: u64,
    pub count: count4,
}
DeserializeStruct!(READ4args, stateid, offset, count);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum stable_how4 {
    #[default]
    UNSTABLE4 = 0,
    DATA_SYNC4 = 1,
    FILE_SYNC4 = 2,
}
SerializeEnum!(stable_how4);
DeserializeEnum!(stable_how4);

#[derive(Clone, Debug, Default)]
pub struct WRITE4args {
    pub stateid: stateid4,
    pub offset: u64,
    pub stable: stable_how4,
    pub data: Vec<u8>,
}
DeserializeStruct!(WRITE4args, stateid, offset, stable, data);

#[derive(Clone, Debug, Default)]
pub struct COMMIT4args {
    pub offset: u64,
    pub count: count4,
}
DeserializeStruct!(COMMIT4args, offset, count);

#[derive(Clone, Debug, Default)]
pub struct READDIR4args {
    pub cookie: nfs_cookie4,
    pub cookieverf: verifier4,
    pub dircount: count4,
    pub maxcount: count4,
    pub attr_request: bitmap4,
}
DeserializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);

// Directory notification types (RFC 5661 section 20.4).
pub const NOTIFY4_CHANGE_CHILD_ATTRS: u32 = 0;
pub const NOTIFY4_CHANGE_DIR_ATTRS: u32 = 1;
pub const NOTIFY4_REMOVE_ENTRY: u32 = 2;
pub const NOTIFY4_ADD_ENTRY: u32 = 3;
pub const NOTIFY4_RENAME_ENTRY: u32 = 4;

/// GET_DIR_DELEGATION arguments (RFC 5661 section 18.39). The attr-delay
/// notices are nfstime4 values.
#[derive(Clone, Debug, Default)]
pub struct GET_DIR_DELEGATION4args {
    pub gdda_signal_deleg_avail: bool,
    pub gdda_notification_types: bitmap4,
    pub gdda_child_attr_delay: nfstime4,
    pub gdda_dir_attr_delay: nfstime4,
    pub gdda_child_attributes: bitmap4,
    pub gdda_dir_attributes: bitmap4,
}
DeserializeStruct!(
    GET_DIR_DELEGATION4args,
    gdda_signal_deleg_avail,
    gdda_notification_types,
    gdda_child_attr_delay,
    gdda_dir_attr_delay,
    gdda_child_attributes,
    gdda_dir_attributes
);
SerializeStruct!(
    GET_DIR_DELEGATION4args,
    gdda_signal_deleg_avail,
    gdda_notification_types,
    gdda_child_attr_delay,
    gdda_dir_attr_delay,
    gdda_child_attributes,
    gdda_dir_attributes
);

/// Non-fatal GET_DIR_DELEGATION outcome: a delegation, or "unavailable"
/// with a promise (or not) to signal availability later.
#[derive(Clone, Debug)]
pub enum GET_DIR_DELEGATION4res_non_fatal {
    GDD4_OK(GET_DIR_DELEGATION4resok),
    GDD4_UNAVAIL(bool),
}

impl Default for GET_DIR_DELEGATION4res_non_fatal {
    fn default() -> Self {
        GET_DIR_DELEGATION4res_non_fatal::GDD4_UNAVAIL(false)
    }
}

impl Serialize for GET_DIR_DELEGATION4res_non_fatal {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            GET_DIR_DELEGATION4res_non_fatal::GDD4_OK(resok) => {
                0u32.serialize(dest)?;
                resok.serialize(dest)
            }
            GET_DIR_DELEGATION4res_non_fatal::GDD4_UNAVAIL(will_signal) => {
                1u32.serialize(dest)?;
                will_signal.serialize(dest)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GET_DIR_DELEGATION4resok {
    pub gddr_cookieverf: verifier4,
    pub gddr_stateid: stateid4,
    pub gddr_notification: bitmap4,
    pub gddr_child_attributes: bitmap4,
    pub gddr_dir_attributes: bitmap4,
}
SerializeStruct!(
    GET_DIR_DELEGATION4resok,
    gddr_cookieverf,
    gddr_stateid,
    gddr_notification,
    gddr_child_attributes,
    gddr_dir_attributes
);

/// The operation numbers interpreted by the compound engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_opnum4 {
    OP_ACCESS = 3,
    OP_CLOSE = 4,
    OP_COMMIT = 5,
    OP_DELEGRETURN = 8,
    OP_GETATTR = 9,
    OP_GETFH = 10,
    OP_LOCK = 12,
    OP_LOCKT = 13,
    OP_LOCKU = 14,
    OP_LOOKUP = 15,
    OP_LOOKUPP = 16,
    OP_NVERIFY = 17,
    OP_OPEN = 18,
    OP_OPEN_CONFIRM = 20,
    OP_OPEN_DOWNGRADE = 21,
    OP_PUTFH = 22,
    OP_PUTPUBFH = 23,
    OP_PUTROOTFH = 24,
    OP_READ = 25,
    OP_READDIR = 26,
    OP_RENEW = 30,
    OP_RESTOREFH = 31,
    OP_SAVEFH = 32,
    OP_SETATTR = 34,
    OP_SETCLIENTID = 35,
    OP_SETCLIENTID_CONFIRM = 36,
    OP_VERIFY = 37,
    OP_WRITE = 38,
    OP_BIND_CONN_TO_SESSION = 41,
    OP_EXCHANGE_ID = 42,
    OP_CREATE_SESSION = 43,
    OP_DESTROY_SESSION = 44,
    OP_GET_DIR_DELEGATION = 46,
    OP_SEQUENCE = 53,
    OP_DESTROY_CLIENTID = 57,
    OP_RECLAIM_COMPLETE = 58,
    OP_ILLEGAL = 10044,
}

/// One decoded compound operation.
#[derive(Clone, Debug)]
pub enum nfs_argop4 {
    ACCESS(u32),
    CLOSE(CLOSE4args),
    COMMIT(COMMIT4args),
    DELEGRETURN(stateid4),
    GETATTR(bitmap4),
    GETFH,
    LOCK(LOCK4args),
    LOCKT(LOCKT4args),
    LOCKU(LOCKU4args),
    LOOKUP(component4),
    LOOKUPP,
    NVERIFY(fattr4),
    OPEN(OPEN4args),
    OPEN_CONFIRM(OPEN_CONFIRM4args),
    OPEN_DOWNGRADE(OPEN_DOWNGRADE4args),
    PUTFH(nfs_fh4),
    PUTPUBFH,
    PUTROOTFH,
    READ(READ4args),
    READDIR(READDIR4args),
    RENEW(clientid4),
    RESTOREFH,
    SAVEFH,
    SETATTR(stateid4, fattr4),
    SETCLIENTID(SETCLIENTID4args),
    SETCLIENTID_CONFIRM(SETCLIENTID_CONFIRM4args),
    VERIFY(fattr4),
    WRITE(WRITE4args),
    BIND_CONN_TO_SESSION(BIND_CONN_TO_SESSION4args),
    EXCHANGE_ID(EXCHANGE_ID4args),
    CREATE_SESSION(CREATE_SESSION4args),
    DESTROY_SESSION(sessionid4),
    GET_DIR_DELEGATION(GET_DIR_DELEGATION4args),
    SEQUENCE(SEQUENCE4args),
    DESTROY_CLIENTID(clientid4),
    RECLAIM_COMPLETE(bool),
    /// Unknown opcode; the raw number is kept for the error result.
    ILLEGAL(u32),
}

impl nfs_argop4 {
    /// Reads one operation from the stream. Unknown opcodes cannot be
    /// skipped (their length is unknowable), so they poison the rest of the
    /// request; the engine answers what it has decoded so far.
    pub fn read_from(src: &mut impl Read) -> std::io::Result<Self> {
        let opnum = deserialize::<u32>(src)?;
        use num_traits::FromPrimitive;
        let Some(op) = nfs_opnum4::from_u32(opnum) else {
            return Ok(nfs_argop4::ILLEGAL(opnum));
        };
        Ok(match op {
            nfs_opnum4::OP_ACCESS => nfs_argop4::ACCESS(deserialize(src)?),
            nfs_opnum4::OP_CLOSE => nfs_argop4::CLOSE(deserialize(src)?),
            nfs_opnum4::OP_COMMIT => nfs_argop4::COMMIT(deserialize(src)?),
            nfs_opnum4::OP_DELEGRETURN => nfs_argop4::DELEGRETURN(deserialize(src)?),
            nfs_opnum4::OP_GETATTR => nfs_argop4::GETATTR(deserialize(src)?),
            nfs_opnum4::OP_GETFH => nfs_argop4::GETFH,
            nfs_opnum4::OP_LOCK => nfs_argop4::LOCK(deserialize(src)?),
            nfs_opnum4::OP_LOCKT => nfs_argop4::LOCKT(deserialize(src)?),
            nfs_opnum4::OP_LOCKU => nfs_argop4::LOCKU(deserialize(src)?),
            nfs_opnum4::OP_LOOKUP => nfs_argop4::LOOKUP(deserialize(src)?),
            nfs_opnum4::OP_LOOKUPP => nfs_argop4::LOOKUPP,
            nfs_opnum4::OP_NVERIFY => nfs_argop4::NVERIFY(deserialize(src)?),
            nfs_opnum4::OP_OPEN => nfs_argop4::OPEN(deserialize(src)?),
            nfs_opnum4::OP_OPEN_CONFIRM => nfs_argop4::OPEN_CONFIRM(deserialize(src)?),
            nfs_opnum4::OP_OPEN_DOWNGRADE => nfs_argop4::OPEN_DOWNGRADE(deserialize(src)?),
            nfs_opnum4::OP_PUTFH => nfs_argop4::PUTFH(deserialize(src)?),
            nfs_opnum4::OP_PUTPUBFH => nfs_argop4::PUTPUBFH,
            nfs_opnum4::OP_PUTROOTFH => nfs_argop4::PUTROOTFH,
            nfs_opnum4::OP_READ => nfs_argop4::READ(deserialize(src)?),
            nfs_opnum4::OP_READDIR => nfs_argop4::READDIR(deserialize(src)?),
            nfs_opnum4::OP_RENEW => nfs_argop4::RENEW(deserialize(src)?),
            nfs_opnum4::OP_RESTOREFH => nfs_argop4::RESTOREFH,
            nfs_opnum4::OP_SAVEFH => nfs_argop4::SAVEFH,
            nfs_opnum4::OP_SETATTR => {
                nfs_argop4::SETATTR(deserialize(src)?, deserialize(src)?)
            }
            nfs_opnum4::OP_SETCLIENTID => nfs_argop4::SETCLIENTID(deserialize(src)?),
            nfs_opnum4::OP_SETCLIENTID_CONFIRM => {
                nfs_argop4::SETCLIENTID_CONFIRM(deserialize(src)?)
            }
            nfs_opnum4::OP_VERIFY => nfs_argop4::VERIFY(deserialize(src)?),
            nfs_opnum4::OP_WRITE => nfs_argop4::WRITE(deserialize(src)?),
            nfs_opnum4::OP_BIND_CONN_TO_SESSION => {
                nfs_argop4::BIND_CONN_TO_SESSION(deserialize(src)?)
            }
            nfs_opnum4::OP_EXCHANGE_ID => nfs_argop4::EXCHANGE_ID(deserialize(src)?),
            nfs_opnum4::OP_CREATE_SESSION => nfs_argop4::CREATE_SESSION(deserialize(src)?),
            nfs_opnum4::OP_DESTROY_SESSION => nfs_argop4::DESTROY_SESSION(deserialize(src)?),
            nfs_opnum4::OP_GET_DIR_DELEGATION => {
                nfs_argop4::GET_DIR_DELEGATION(deserialize(src)?)
            }
            nfs_opnum4::OP_SEQUENCE => nfs_argop4::SEQUENCE(deserialize(src)?),
            nfs_opnum4::OP_DESTROY_CLIENTID => nfs_argop4::DESTROY_CLIENTID(deserialize(src)?),
            nfs_opnum4::OP_RECLAIM_COMPLETE => nfs_argop4::RECLAIM_COMPLETE(deserialize(src)?),
            nfs_opnum4::OP_ILLEGAL => nfs_argop4::ILLEGAL(opnum),
        })
    }

    /// The opcode echoed in this operation's result.
    pub fn opnum(&self) -> u32 {
        match self {
            nfs_argop4::ACCESS(_) => nfs_opnum4::OP_ACCESS as u32,
            nfs_argop4::CLOSE(_) => nfs_opnum4::OP_CLOSE as u32,
            nfs_argop4::COMMIT(_) => nfs_opnum4::OP_COMMIT as u32,
            nfs_argop4::DELEGRETURN(_) => nfs_opnum4::OP_DELEGRETURN as u32,
            nfs_argop4::GETATTR(_) => nfs_opnum4::OP_GETATTR as u32,
            nfs_argop4::GETFH => nfs_opnum4::OP_GETFH as u32,
            nfs_argop4::LOCK(_) => nfs_opnum4::OP_LOCK as u32,
            nfs_argop4::LOCKT(_) => nfs_opnum4::OP_LOCKT as u32,
            nfs_argop4::LOCKU(_) => nfs_opnum4::OP_LOCKU as u32,
            nfs_argop4::LOOKUP(_) => nfs_opnum4::OP_LOOKUP as u32,
            nfs_argop4::LOOKUPP => nfs_opnum4::OP_LOOKUPP as u32,
            nfs_argop4::NVERIFY(_) => nfs_opnum4::OP_NVERIFY as u32,
            nfs_argop4::OPEN(_) => nfs_opnum4::OP_OPEN as u32,
            nfs_argop4::OPEN_CONFIRM(_) => nfs_opnum4::OP_OPEN_CONFIRM as u32,
            nfs_argop4::OPEN_DOWNGRADE(_) => nfs_opnum4::OP_OPEN_DOWNGRADE as u32,
            nfs_argop4::PUTFH(_) => nfs_opnum4::OP_PUTFH as u32,
            nfs_argop4::PUTPUBFH => nfs_opnum4::OP_PUTPUBFH as u32,
            nfs_argop4::PUTROOTFH => nfs_opnum4::OP_PUTROOTFH as u32,
            nfs_argop4::READ(_) => nfs_opnum4::OP_READ as u32,
            nfs_argop4::READDIR(_) => nfs_opnum4::OP_READDIR as u32,
            nfs_argop4::RENEW(_) => nfs_opnum4::OP_RENEW as u32,
            nfs_argop4::RESTOREFH => nfs_opnum4::OP_RESTOREFH as u32,
            nfs_argop4::SAVEFH => nfs_opnum4::OP_SAVEFH as u32,
            nfs_argop4::SETATTR(..) => nfs_opnum4::OP_SETATTR as u32,
            nfs_argop4::SETCLIENTID(_) => nfs_opnum4::OP_SETCLIENTID as u32,
            nfs_argop4::SETCLIENTID_CONFIRM(_) => nfs_opnum4::OP_SETCLIENTID_CONFIRM as u32,
            nfs_argop4::VERIFY(_) => nfs_opnum4::OP_VERIFY as u32,
            nfs_argop4::WRITE(_) => nfs_opnum4::OP_WRITE as u32,
            nfs_argop4::BIND_CONN_TO_SESSION(_) => nfs_opnum4::OP_BIND_CONN_TO_SESSION as u32,
            nfs_argop4::EXCHANGE_ID(_) => nfs_opnum4::OP_EXCHANGE_ID as u32,
            nfs_argop4::CREATE_SESSION(_) => nfs_opnum4::OP_CREATE_SESSION as u32,
            nfs_argop4::DESTROY_SESSION(_) => nfs_opnum4::OP_DESTROY_SESSION as u32,
            nfs_argop4::GET_DIR_DELEGATION(_) => nfs_opnum4::OP_GET_DIR_DELEGATION as u32,
            nfs_argop4::SEQUENCE(_) => nfs_opnum4::OP_SEQUENCE as u32,
            nfs_argop4::DESTROY_CLIENTID(_) => nfs_opnum4::OP_DESTROY_CLIENTID as u32,
            nfs_argop4::RECLAIM_COMPLETE(_) => nfs_opnum4::OP_RECLAIM_COMPLETE as u32,
            nfs_argop4::ILLEGAL(_) => nfs_opnum4::OP_ILLEGAL as u32,
        }
    }
}

/// A decoded COMPOUND request.
#[derive(Clone, Debug, Default)]
pub struct COMPOUND4args {
    pub tag: utf8string,
    pub minorversion: u32,
    pub argarray: Vec<nfs_argop4>,
    /// Set when an undecodable op truncated the arg array.
    pub decode_error: Option<nfsstat4>,
}

/// Cap on operations per compound, mirrored into ca_maxoperations.
pub const MAX_COMPOUND_OPS: usize = 128;

impl COMPOUND4args {
    pub fn read_from(src: &mut impl Read) -> std::io::Result<Self> {
        let tag = deserialize::<utf8string>(src)?;
        let minorversion = deserialize::<u32>(src)?;
        let count = deserialize::<u32>(src)? as usize;
        let mut args = COMPOUND4args { tag, minorversion, argarray: Vec::new(), decode_error: None };
        if count > MAX_COMPOUND_OPS {
            args.decode_error = Some(nfsstat4::NFS4ERR_TOO_MANY_OPS);
            return Ok(args);
        }
        for _ in 0..count {
            match nfs_argop4::read_from(src) {
                Ok(nfs_argop4::ILLEGAL(op)) => {
                    args.argarray.push(nfs_argop4::ILLEGAL(op));
                    // cannot resynchronize after an unknown opcode
                    break;
                }
                Ok(op) => args.argarray.push(op),
                Err(_) => {
                    args.decode_error = Some(nfsstat4::NFS4ERR_BADXDR);
                    break;
                }
            }
        }
        Ok(args)
    }
}

// --- callback program (server to client over the back-channel) ---

/// Callback procedure numbers (RFC 5661 section 20).
pub const CB_NULL: u32 = 0;
pub const CB_COMPOUND: u32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_cb_opnum4 {
    OP_CB_GETATTR = 3,
    OP_CB_RECALL = 4,
    OP_CB_NOTIFY = 6,
    OP_CB_SEQUENCE = 11,
    OP_CB_RECALL_ANY = 12,
}

#[derive(Clone, Debug, Default)]
pub struct CB_SEQUENCE4args {
    pub csa_sessionid: sessionid4,
    pub csa_sequenceid: sequenceid4,
    pub csa_slotid: slotid4,
    pub csa_highest_slotid: slotid4,
    pub csa_cachethis: bool,
}

impl Serialize for CB_SEQUENCE4args {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.csa_sessionid.serialize(dest)?;
        self.csa_sequenceid.serialize(dest)?;
        self.csa_slotid.serialize(dest)?;
        self.csa_highest_slotid.serialize(dest)?;
        self.csa_cachethis.serialize(dest)?;
        // no referring call lists
        0u32.serialize(dest)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CB_RECALL4args {
    pub stateid: stateid4,
    pub truncate: bool,
    pub fh: nfs_fh4,
}
SerializeStruct!(CB_RECALL4args, stateid, truncate, fh);

/// CB_RECALL_ANY: ask the client to return `keep` objects of the flagged types.
#[derive(Clone, Debug, Default)]
pub struct CB_RECALL_ANY4args {
    pub craa_objects_to_keep: u32,
    pub craa_type_mask: bitmap4,
}
SerializeStruct!(CB_RECALL_ANY4args, craa_objects_to_keep, craa_type_mask);

/// Directory notification batch sent through CB_NOTIFY. The individual
/// change entries are pre-encoded by the delegation layer.
#[derive(Clone, Debug, Default)]
pub struct CB_NOTIFY4args {
    pub stateid: stateid4,
    pub fh: nfs_fh4,
    pub changes: Vec<u8>,
}
SerializeStruct!(CB_NOTIFY4args, stateid, fh, changes);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stateid_special_values() {
        assert!(stateid4::special_zero().is_special());
        assert!(stateid4::special_any().is_special());
        let normal = stateid4 { seqid: 1, other: [1; NFS4_OTHER_SIZE] };
        assert!(!normal.is_special());
    }

    #[test]
    fn bitmap_set_and_get() {
        let mut bm = bitmap4::new();
        bitmap_set(&mut bm, FATTR4_TYPE);
        bitmap_set(&mut bm, FATTR4_MODE);
        assert!(bitmap_get(&bm, FATTR4_TYPE));
        assert!(bitmap_get(&bm, FATTR4_MODE));
        assert!(!bitmap_get(&bm, FATTR4_SIZE));
        assert_eq!(bm.len(), 2);
    }

    #[test]
    fn compound_decode_stops_at_unknown_opcode() {
        let mut buf = Vec::new();
        utf8string::from("t").serialize(&mut buf).unwrap();
        1u32.serialize(&mut buf).unwrap(); // minorversion
        3u32.serialize(&mut buf).unwrap(); // opcount
        (nfs_opnum4::OP_PUTROOTFH as u32).serialize(&mut buf).unwrap();
        9999u32.serialize(&mut buf).unwrap(); // unknown op
        (nfs_opnum4::OP_GETFH as u32).serialize(&mut buf).unwrap();

        let args = COMPOUND4args::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(args.argarray.len(), 2);
        assert!(matches!(args.argarray[0], nfs_argop4::PUTROOTFH));
        assert!(matches!(args.argarray[1], nfs_argop4::ILLEGAL(9999)));
    }

    #[test]
    fn get_dir_delegation_args_round_trip() {
        let mut types = bitmap4::new();
        bitmap_set(&mut types, NOTIFY4_ADD_ENTRY);
        bitmap_set(&mut types, NOTIFY4_REMOVE_ENTRY);
        let args = GET_DIR_DELEGATION4args {
            gdda_signal_deleg_avail: true,
            gdda_notification_types: types.clone(),
            gdda_child_attr_delay: nfstime4 { seconds: 1, nseconds: 0 },
            gdda_dir_attr_delay: nfstime4 { seconds: 2, nseconds: 0 },
            gdda_child_attributes: Vec::new(),
            gdda_dir_attributes: Vec::new(),
        };
        let mut buf = Vec::new();
        args.serialize(&mut buf).unwrap();
        let back = deserialize::<GET_DIR_DELEGATION4args>(&mut Cursor::new(&buf)).unwrap();
        assert!(back.gdda_signal_deleg_avail);
        assert_eq!(back.gdda_notification_types, types);
        assert_eq!(back.gdda_dir_attr_delay.seconds, 2);
    }

    #[test]
    fn sequence_args_round_trip() {
        let args = SEQUENCE4args {
            sa_sessionid: [3; NFS4_SESSIONID_SIZE],
            sa_sequenceid: 7,
            sa_slotid: 2,
            sa_highest_slotid: 31,
            sa_cachethis: true,
        };
        let mut buf = Vec::new();
        args.serialize(&mut buf).unwrap();
        let back = deserialize::<SEQUENCE4args>(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.sa_sequenceid, 7);
        assert_eq!(back.sa_slotid, 2);
        assert!(back.sa_cachethis);
    }
}

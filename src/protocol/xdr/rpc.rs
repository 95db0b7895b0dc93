//! ONC-RPC v2 message model as specified in RFC 5531, plus the RPCSEC_GSS
//! credential bodies from RFC 2203.
//!
//! Reply construction helpers at the bottom are the single place the adapter
//! builds accepted / denied replies, so XID echoing and verifier placement
//! stay uniform across protocols.

#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::{
    deserialize, invalid_data, read_opaque_bounded, write_opaque, Deserialize, DeserializeEnum,
    DeserializeStruct, Serialize, SerializeEnum, SerializeStruct,
};

/// The only RPC protocol version this adapter speaks.
pub const RPC_VERSION: u32 = 2;

/// Credential and verifier opaque bodies are capped at 400 bytes (RFC 5531).
pub const MAX_AUTH_BODY: usize = 400;

/// msg_type discriminant for calls.
pub const MSG_TYPE_CALL: u32 = 0;
/// msg_type discriminant for replies.
pub const MSG_TYPE_REPLY: u32 = 1;

/// Authentication failure codes carried in MSG_DENIED/AUTH_ERROR replies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    AUTH_OK = 0,
    /// Bad credential (seal broken or undecodable).
    #[default]
    AUTH_BADCRED = 1,
    /// Client must begin a new session.
    AUTH_REJECTEDCRED = 2,
    /// Bad verifier (seal broken).
    AUTH_BADVERF = 3,
    /// Verifier expired or replayed.
    AUTH_REJECTEDVERF = 4,
    /// Rejected for security reasons.
    AUTH_TOOWEAK = 5,
    /// Bogus response verifier.
    AUTH_INVALIDRESP = 6,
    /// Unknown failure.
    AUTH_FAILED = 7,
    /// No credentials for a GSS context.
    RPCSEC_GSS_CREDPROBLEM = 13,
    /// GSS context problem (expired or unknown handle).
    RPCSEC_GSS_CTXPROBLEM = 14,
}
SerializeEnum!(auth_stat);
DeserializeEnum!(auth_stat);

/// Authentication flavors carried in `opaque_auth.flavor`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum auth_flavor {
    #[default]
    AUTH_NULL = 0,
    AUTH_UNIX = 1,
    AUTH_SHORT = 2,
    AUTH_DES = 3,
    RPCSEC_GSS = 6,
}
SerializeEnum!(auth_flavor);
DeserializeEnum!(auth_flavor);

/// AUTH_UNIX credential body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct auth_unix {
    pub stamp: u32,
    pub machinename: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}
SerializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);
DeserializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);

/// A flavor tag plus the opaque body it qualifies. Used for both credentials
/// and verifiers in calls and replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct opaque_auth {
    pub flavor: auth_flavor,
    pub body: Vec<u8>,
}

impl Default for opaque_auth {
    fn default() -> Self {
        Self { flavor: auth_flavor::AUTH_NULL, body: Vec::new() }
    }
}

impl opaque_auth {
    pub fn new(flavor: auth_flavor, body: Vec<u8>) -> Self {
        Self { flavor, body }
    }
}

impl Serialize for opaque_auth {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.flavor.serialize(dest)?;
        write_opaque(&self.body, dest)
    }
}

impl Deserialize for opaque_auth {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.flavor.deserialize(src)?;
        self.body = read_opaque_bounded(src, MAX_AUTH_BODY)?;
        Ok(())
    }
}

/// A complete RPC message: transaction id plus call or reply body.
#[derive(Clone, Debug, Default)]
pub struct rpc_msg {
    pub xid: u32,
    pub body: rpc_body,
}
SerializeStruct!(rpc_msg, xid, body);
DeserializeStruct!(rpc_msg, xid, body);

#[derive(Clone, Debug)]
pub enum rpc_body {
    CALL(call_body),
    REPLY(reply_body),
}

impl Default for rpc_body {
    fn default() -> Self {
        rpc_body::CALL(call_body::default())
    }
}

impl Serialize for rpc_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rpc_body::CALL(v) => {
                MSG_TYPE_CALL.serialize(dest)?;
                v.serialize(dest)
            }
            rpc_body::REPLY(v) => {
                MSG_TYPE_REPLY.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rpc_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            MSG_TYPE_CALL => *self = rpc_body::CALL(deserialize(src)?),
            MSG_TYPE_REPLY => *self = rpc_body::REPLY(deserialize(src)?),
            other => return Err(invalid_data(format!("bad msg_type {other}"))),
        }
        Ok(())
    }
}

/// Header of an RPC call. Procedure arguments follow in the stream.
#[derive(Clone, Debug, Default)]
pub struct call_body {
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: opaque_auth,
    pub verf: opaque_auth,
}
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

#[derive(Clone, Debug)]
pub enum reply_body {
    MSG_ACCEPTED(accepted_reply),
    MSG_DENIED(rejected_reply),
}

impl Default for reply_body {
    fn default() -> Self {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

impl Serialize for reply_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            reply_body::MSG_ACCEPTED(v) => {
                0u32.serialize(dest)?;
                v.serialize(dest)
            }
            reply_body::MSG_DENIED(v) => {
                1u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for reply_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = reply_body::MSG_ACCEPTED(deserialize(src)?),
            1 => *self = reply_body::MSG_DENIED(deserialize(src)?),
            other => return Err(invalid_data(format!("bad reply_stat {other}"))),
        }
        Ok(())
    }
}

/// Version range advertised in PROG_MISMATCH replies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    pub low: u32,
    pub high: u32,
}
SerializeStruct!(mismatch_info, low, high);
DeserializeStruct!(mismatch_info, low, high);

#[derive(Clone, Debug, Default)]
pub struct accepted_reply {
    pub verf: opaque_auth,
    pub reply_data: accept_body,
}
SerializeStruct!(accepted_reply, verf, reply_data);
DeserializeStruct!(accepted_reply, verf, reply_data);

/// Outcome of an accepted call. SUCCESS results are appended by the caller
/// after the header is serialized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum accept_body {
    #[default]
    SUCCESS,
    PROG_UNAVAIL,
    PROG_MISMATCH(mismatch_info),
    PROC_UNAVAIL,
    GARBAGE_ARGS,
    SYSTEM_ERR,
}

impl Serialize for accept_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            accept_body::SUCCESS => 0u32.serialize(dest),
            accept_body::PROG_UNAVAIL => 1u32.serialize(dest),
            accept_body::PROG_MISMATCH(v) => {
                2u32.serialize(dest)?;
                v.serialize(dest)
            }
            accept_body::PROC_UNAVAIL => 3u32.serialize(dest),
            accept_body::GARBAGE_ARGS => 4u32.serialize(dest),
            accept_body::SYSTEM_ERR => 5u32.serialize(dest),
        }
    }
}

impl Deserialize for accept_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = accept_body::SUCCESS,
            1 => *self = accept_body::PROG_UNAVAIL,
            2 => *self = accept_body::PROG_MISMATCH(deserialize(src)?),
            3 => *self = accept_body::PROC_UNAVAIL,
            4 => *self = accept_body::GARBAGE_ARGS,
            5 => *self = accept_body::SYSTEM_ERR,
            other => return Err(invalid_data(format!("bad accept_stat {other}"))),
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum rejected_reply {
    RPC_MISMATCH(mismatch_info),
    AUTH_ERROR(auth_stat),
}

impl Default for rejected_reply {
    fn default() -> Self {
        rejected_reply::AUTH_ERROR(auth_stat::default())
    }
}

impl Serialize for rejected_reply {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rejected_reply::RPC_MISMATCH(v) => {
                0u32.serialize(dest)?;
                v.serialize(dest)
            }
            rejected_reply::AUTH_ERROR(v) => {
                1u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rejected_reply {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rejected_reply::RPC_MISMATCH(deserialize(src)?),
            1 => *self = rejected_reply::AUTH_ERROR(deserialize(src)?),
            other => return Err(invalid_data(format!("bad reject_stat {other}"))),
        }
        Ok(())
    }
}

// --- RPCSEC_GSS bodies (RFC 2203 section 5) ---

/// RPCSEC_GSS protocol version inside the credential.
pub const RPCSEC_GSS_VERS_1: u32 = 1;

/// Control procedure selector inside an RPCSEC_GSS credential.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum rpc_gss_proc {
    #[default]
    RPCSEC_GSS_DATA = 0,
    RPCSEC_GSS_INIT = 1,
    RPCSEC_GSS_CONTINUE_INIT = 2,
    RPCSEC_GSS_DESTROY = 3,
}
SerializeEnum!(rpc_gss_proc);
DeserializeEnum!(rpc_gss_proc);

/// Protection service requested for the message body.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum rpc_gss_service {
    #[default]
    rpc_gss_svc_none = 1,
    rpc_gss_svc_integrity = 2,
    rpc_gss_svc_privacy = 3,
}
SerializeEnum!(rpc_gss_service);
DeserializeEnum!(rpc_gss_service);

/// Decoded RPCSEC_GSS credential body.
#[derive(Clone, Debug, Default)]
pub struct rpc_gss_cred {
    pub version: u32,
    pub gss_proc: rpc_gss_proc,
    pub seq_num: u32,
    pub service: rpc_gss_service,
    pub handle: Vec<u8>,
}
SerializeStruct!(rpc_gss_cred, version, gss_proc, seq_num, service, handle);
DeserializeStruct!(rpc_gss_cred, version, gss_proc, seq_num, service, handle);

/// Result of a context-establishment round trip.
#[derive(Clone, Debug, Default)]
pub struct rpc_gss_init_res {
    pub handle: Vec<u8>,
    pub gss_major: u32,
    pub gss_minor: u32,
    pub seq_window: u32,
    pub gss_token: Vec<u8>,
}
SerializeStruct!(rpc_gss_init_res, handle, gss_major, gss_minor, seq_window, gss_token);
DeserializeStruct!(rpc_gss_init_res, handle, gss_major, gss_minor, seq_window, gss_token);

// --- Reply builders ---

pub fn make_success_reply(xid: u32) -> rpc_msg {
    accepted(xid, opaque_auth::default(), accept_body::SUCCESS)
}

/// Success header with an explicit reply verifier (RPCSEC_GSS data replies).
pub fn make_success_reply_with_verf(xid: u32, verf: opaque_auth) -> rpc_msg {
    accepted(xid, verf, accept_body::SUCCESS)
}

pub fn prog_unavail_reply(xid: u32) -> rpc_msg {
    accepted(xid, opaque_auth::default(), accept_body::PROG_UNAVAIL)
}

pub fn prog_mismatch_reply(xid: u32, low: u32, high: u32) -> rpc_msg {
    accepted(xid, opaque_auth::default(), accept_body::PROG_MISMATCH(mismatch_info { low, high }))
}

pub fn proc_unavail_reply(xid: u32) -> rpc_msg {
    accepted(xid, opaque_auth::default(), accept_body::PROC_UNAVAIL)
}

pub fn garbage_args_reply(xid: u32) -> rpc_msg {
    accepted(xid, opaque_auth::default(), accept_body::GARBAGE_ARGS)
}

pub fn system_err_reply(xid: u32) -> rpc_msg {
    accepted(xid, opaque_auth::default(), accept_body::SYSTEM_ERR)
}

pub fn auth_error_reply(xid: u32, stat: auth_stat) -> rpc_msg {
    rpc_msg { xid, body: rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat))) }
}

pub fn rpc_mismatch_reply(xid: u32) -> rpc_msg {
    rpc_msg {
        xid,
        body: rpc_body::REPLY(reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(
            mismatch_info { low: RPC_VERSION, high: RPC_VERSION },
        ))),
    }
}

fn accepted(xid: u32, verf: opaque_auth, reply_data: accept_body) -> rpc_msg {
    rpc_msg {
        xid,
        body: rpc_body::REPLY(reply_body::MSG_ACCEPTED(accepted_reply { verf, reply_data })),
    }
}

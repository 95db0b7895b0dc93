//! Program/version/procedure dispatch.
//!
//! Routing is table-driven: each program owns a procedure table with a name
//! (also the blocklist key) and a needs-auth flag. Version negotiation
//! answers PROG_MISMATCH with the real supported range; unknown programs and
//! procedures answer PROG_UNAVAIL / PROC_UNAVAIL. Authentication runs before
//! the handler, and RPCSEC_GSS control calls short-circuit here without
//! touching any handler.

use std::io::Cursor;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::auth::gss::GssDisposition;
use crate::protocol::auth::{self, Credentials};
use crate::protocol::nfs;
use crate::protocol::rpc::context::{
    ConnectionControl, Deps, HandlerError, RequestContext,
};
use crate::protocol::rpc::wire::{parse_call, RpcCall};
use crate::protocol::xdr::rpc::{self, auth_flavor, auth_stat, rpc_gss_cred};
use crate::protocol::xdr::{
    deserialize, mount, nfs3, nlm, nsm, portmap, serialize_to_vec, Serialize,
};

/// What the connection loop does with a processed record.
pub enum DispatchOutcome {
    /// Write this serialized reply message.
    Reply(Vec<u8>),
    /// RFC-mandated silent discard; no reply, connection stays up.
    Drop,
    /// Unrecoverable parse failure; close the connection.
    Close,
}

/// One procedure table entry.
pub struct ProcEntry {
    pub name: &'static str,
    pub needs_auth: bool,
}

const fn proc_entry(name: &'static str, needs_auth: bool) -> ProcEntry {
    ProcEntry { name, needs_auth }
}

/// NFSv3 procedures. Exempt from authentication: NULL, GETATTR, FSSTAT,
/// FSINFO, PATHCONF, MKNOD.
pub static NFS3_PROCS: &[ProcEntry] = &[
    proc_entry("NULL", false),
    proc_entry("GETATTR", false),
    proc_entry("SETATTR", true),
    proc_entry("LOOKUP", true),
    proc_entry("ACCESS", true),
    proc_entry("READLINK", true),
    proc_entry("READ", true),
    proc_entry("WRITE", true),
    proc_entry("CREATE", true),
    proc_entry("MKDIR", true),
    proc_entry("SYMLINK", true),
    proc_entry("MKNOD", false),
    proc_entry("REMOVE", true),
    proc_entry("RMDIR", true),
    proc_entry("RENAME", true),
    proc_entry("LINK", true),
    proc_entry("READDIR", true),
    proc_entry("READDIRPLUS", true),
    proc_entry("FSSTAT", false),
    proc_entry("FSINFO", false),
    proc_entry("PATHCONF", false),
    proc_entry("COMMIT", true),
];

/// NFSv4 has only NULL and COMPOUND; per-operation security is the compound
/// engine's business.
pub static NFS4_PROCS: &[ProcEntry] =
    &[proc_entry("NULL", false), proc_entry("COMPOUND", false)];

pub static MOUNT_PROCS: &[ProcEntry] = &[
    proc_entry("NULL", false),
    proc_entry("MNT", false),
    proc_entry("DUMP", false),
    proc_entry("UMNT", false),
    proc_entry("UMNTALL", false),
    proc_entry("EXPORT", false),
];

pub static NLM_PROCS: &[ProcEntry] = &[
    proc_entry("NULL", false),
    proc_entry("TEST", false),
    proc_entry("LOCK", true),
    proc_entry("CANCEL", true),
    proc_entry("UNLOCK", true),
    proc_entry("GRANTED", false),
    proc_entry("TEST_MSG", false),
    proc_entry("LOCK_MSG", true),
    proc_entry("CANCEL_MSG", true),
    proc_entry("UNLOCK_MSG", true),
    proc_entry("GRANTED_MSG", false),
    proc_entry("TEST_RES", false),
    proc_entry("LOCK_RES", false),
    proc_entry("CANCEL_RES", false),
    proc_entry("UNLOCK_RES", false),
    proc_entry("GRANTED_RES", false),
];

pub static NSM_PROCS: &[ProcEntry] = &[
    proc_entry("NULL", false),
    proc_entry("STAT", false),
    proc_entry("MON", false),
    proc_entry("UNMON", false),
    proc_entry("UNMON_ALL", false),
    proc_entry("SIMU_CRASH", false),
    proc_entry("NOTIFY", false),
];

pub static PMAP_PROCS: &[ProcEntry] = &[
    proc_entry("NULL", false),
    proc_entry("SET", false),
    proc_entry("UNSET", false),
    proc_entry("GETPORT", false),
    proc_entry("DUMP", false),
];

/// NLM FREE_ALL sits far from the contiguous procedure block.
static NLM_FREE_ALL: ProcEntry = proc_entry("FREE_ALL", false);

fn lookup_proc(prog: u32, vers: u32, proc: u32) -> Result<&'static ProcEntry, DispatchError> {
    let table: &[ProcEntry] = match prog {
        nfs3::PROGRAM => match vers {
            3 => NFS3_PROCS,
            4 => NFS4_PROCS,
            _ => return Err(DispatchError::ProgMismatch { low: 3, high: 4 }),
        },
        mount::PROGRAM => {
            // MNT speaks v3 only; the bookkeeping procedures are accepted for
            // any version a legacy client offers.
            if proc == mount::MountProgram::MOUNTPROC3_MNT as u32 && vers != mount::VERSION {
                return Err(DispatchError::ProgMismatch {
                    low: mount::VERSION,
                    high: mount::VERSION,
                });
            }
            MOUNT_PROCS
        }
        nlm::PROGRAM => {
            if vers != nlm::VERSION {
                return Err(DispatchError::ProgMismatch {
                    low: nlm::VERSION,
                    high: nlm::VERSION,
                });
            }
            if proc == nlm::NlmProgram::NLMPROC4_FREE_ALL as u32 {
                return Ok(&NLM_FREE_ALL);
            }
            NLM_PROCS
        }
        nsm::PROGRAM => {
            if vers != nsm::VERSION {
                return Err(DispatchError::ProgMismatch {
                    low: nsm::VERSION,
                    high: nsm::VERSION,
                });
            }
            NSM_PROCS
        }
        portmap::PROGRAM => {
            if !(portmap::VERSION_LOW..=portmap::VERSION_HIGH).contains(&vers) {
                return Err(DispatchError::ProgMismatch {
                    low: portmap::VERSION_LOW,
                    high: portmap::VERSION_HIGH,
                });
            }
            PMAP_PROCS
        }
        _ => return Err(DispatchError::ProgUnavail),
    };
    table.get(proc as usize).ok_or(DispatchError::ProcUnavail)
}

enum DispatchError {
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
}

/// Processes one CALL record end to end and produces the reply bytes.
pub async fn dispatch_record(
    record: &[u8],
    deps: &Arc<Deps>,
    conn: &ConnectionControl,
    client_addr: &str,
) -> DispatchOutcome {
    let call = match parse_call(record) {
        Ok(call) => call,
        Err(err) => {
            warn!(%client_addr, error = %err, "unparseable call, closing connection");
            return DispatchOutcome::Close;
        }
    };
    let xid = call.xid;

    if call.rpcvers != rpc::RPC_VERSION {
        debug!(xid, rpcvers = call.rpcvers, "RPC version mismatch");
        return reply_msg(rpc::rpc_mismatch_reply(xid));
    }

    // Authentication. GSS control calls are complete after this block.
    let (creds, args, reply_protection) = match authenticate(&call, record, deps) {
        AuthOutcome::Proceed { creds, args, reply } => (creds, args, reply),
        AuthOutcome::Control { reply_verf, reply_body } => {
            let header = rpc::make_success_reply_with_verf(xid, reply_verf);
            let mut bytes = match serialize_to_vec(&header) {
                Ok(b) => b,
                Err(_) => return reply_msg(rpc::system_err_reply(xid)),
            };
            bytes.extend_from_slice(&reply_body);
            return DispatchOutcome::Reply(bytes);
        }
        AuthOutcome::Drop => return DispatchOutcome::Drop,
        AuthOutcome::Deny(stat) => return reply_msg(rpc::auth_error_reply(xid, stat)),
    };

    let entry = match lookup_proc(call.prog, call.vers, call.proc) {
        Ok(entry) => entry,
        Err(DispatchError::ProgUnavail) => {
            debug!(xid, prog = call.prog, "program unavailable");
            return reply_msg(rpc::prog_unavail_reply(xid));
        }
        Err(DispatchError::ProgMismatch { low, high }) => {
            debug!(xid, prog = call.prog, vers = call.vers, low, high, "version mismatch");
            return reply_msg(rpc::prog_mismatch_reply(xid, low, high));
        }
        Err(DispatchError::ProcUnavail) => {
            debug!(xid, prog = call.prog, proc = call.proc, "procedure unavailable");
            return reply_msg(rpc::proc_unavail_reply(xid));
        }
    };

    if entry.needs_auth && !creds.is_authenticated() {
        debug!(xid, proc = entry.name, "unauthenticated call to protected procedure");
        return reply_msg(rpc::auth_error_reply(xid, auth_stat::AUTH_TOOWEAK));
    }

    let ctx = RequestContext {
        xid,
        client_addr: client_addr.to_string(),
        creds,
        deps: Arc::clone(deps),
        conn: conn.clone(),
    };

    // Settings blocklist: a blocked v3 procedure answers NFS3ERR_NOTSUPP
    // with an empty pre/post WCC.
    if call.prog == nfs3::PROGRAM
        && call.vers == 3
        && ctx.deps.settings.load().blocked_operations().contains(entry.name)
    {
        let mut results = Vec::with_capacity(16);
        if nfs3::nfsstat3::NFS3ERR_NOTSUPP.serialize(&mut results).is_err() {
            return reply_msg(rpc::system_err_reply(xid));
        }
        // 12 zero bytes of void attribute data after the status.
        results.extend_from_slice(&[0u8; 12]);
        return build_success(xid, &results, &reply_protection);
    }

    let mut results = Vec::with_capacity(256);
    let mut input = Cursor::new(args.as_slice());
    let handled = route(&call, &mut input, &mut results, &ctx).await;

    match handled {
        Ok(()) => build_success(xid, &results, &reply_protection),
        Err(HandlerError::Garbage) => {
            debug!(xid, proc = entry.name, "undecodable arguments");
            reply_msg(rpc::garbage_args_reply(xid))
        }
        Err(HandlerError::System(message)) => {
            warn!(xid, proc = entry.name, %message, "handler system error");
            reply_msg(rpc::system_err_reply(xid))
        }
        Err(HandlerError::Cancelled) => DispatchOutcome::Drop,
    }
}

async fn route(
    call: &RpcCall,
    input: &mut Cursor<&[u8]>,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> crate::protocol::rpc::context::HandlerResult {
    match (call.prog, call.vers) {
        (nfs3::PROGRAM, 3) => nfs::v3::handle(call.proc, input, output, ctx).await,
        (nfs3::PROGRAM, 4) => nfs::v4::handle(call.proc, input, output, ctx).await,
        (mount::PROGRAM, _) => nfs::mount::handle(call.proc, input, output, ctx).await,
        (nlm::PROGRAM, _) => nfs::nlm::handle(call.proc, input, output, ctx).await,
        (nsm::PROGRAM, _) => nfs::nsm::handle(call.proc, input, output, ctx).await,
        (portmap::PROGRAM, _) => nfs::portmap::handle(call.proc, input, output, ctx).await,
        _ => Err(HandlerError::System("routed unknown program".to_string())),
    }
}

enum AuthOutcome {
    Proceed {
        creds: Credentials,
        args: Vec<u8>,
        reply: Option<crate::protocol::auth::gss::ReplyProtection>,
    },
    Control {
        reply_verf: rpc::opaque_auth,
        reply_body: Vec<u8>,
    },
    Drop,
    Deny(auth_stat),
}

fn authenticate(call: &RpcCall, record: &[u8], deps: &Arc<Deps>) -> AuthOutcome {
    match call.cred.flavor {
        auth_flavor::RPCSEC_GSS => {
            let cred = match deserialize::<rpc_gss_cred>(&mut Cursor::new(&call.cred.body)) {
                Ok(c) => c,
                Err(_) => return AuthOutcome::Deny(auth_stat::AUTH_BADCRED),
            };
            match deps.gss.process(&cred, call.gss_header(record), &call.verf, call.args(record)) {
                GssDisposition::Control { reply_verf, reply_body } => {
                    AuthOutcome::Control { reply_verf, reply_body }
                }
                GssDisposition::Accepted(data) => AuthOutcome::Proceed {
                    creds: data.creds,
                    args: data.args,
                    reply: Some(data.reply),
                },
                GssDisposition::Drop => AuthOutcome::Drop,
                GssDisposition::Deny(stat) => AuthOutcome::Deny(stat),
            }
        }
        _ => AuthOutcome::Proceed {
            creds: auth::interpret_credential(&call.cred),
            args: call.args(record).to_vec(),
            reply: None,
        },
    }
}

fn build_success(
    xid: u32,
    results: &[u8],
    protection: &Option<crate::protocol::auth::gss::ReplyProtection>,
) -> DispatchOutcome {
    let header = match protection {
        Some(p) => rpc::make_success_reply_with_verf(xid, p.reply_verifier()),
        None => rpc::make_success_reply(xid),
    };
    let mut bytes = match serialize_to_vec(&header) {
        Ok(b) => b,
        Err(_) => return reply_msg(rpc::system_err_reply(xid)),
    };
    let body = match protection {
        Some(p) => match p.protect_results(results) {
            Ok(b) => b,
            Err(_) => return reply_msg(rpc::system_err_reply(xid)),
        },
        None => results.to_vec(),
    };
    bytes.extend_from_slice(&body);
    DispatchOutcome::Reply(bytes)
}

fn reply_msg(msg: rpc::rpc_msg) -> DispatchOutcome {
    match serialize_to_vec(&msg) {
        Ok(bytes) => DispatchOutcome::Reply(bytes),
        Err(_) => DispatchOutcome::Close,
    }
}

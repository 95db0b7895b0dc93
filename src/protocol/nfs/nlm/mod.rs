//! NLM version 4 procedure handlers (X/Open XNFS chapter 10).
//!
//! Owner ids are composed as `nlm:<host>:<svid>:<hex-owner-handle>` so the
//! lock table can be swept per crashed host by prefix. Blocking LOCK
//! requests answer NLM4_BLOCKED and are granted later through an
//! NLM_GRANTED callback to the client's own lock manager, located through
//! the client's portmapper; the callback has a 5 second total budget and a
//! failure releases the lock at once.
//!
//! The `_MSG` procedures get their `_RES` counterpart sent back as a call
//! over the same TCP connection.

pub mod lockmgr;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use num_traits::FromPrimitive;
use tracing::{debug, warn};

use crate::protocol::rpc::client;
use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};
use crate::protocol::xdr::rpc::{call_body, opaque_auth, rpc_body, rpc_msg};
use crate::protocol::xdr::nlm::{
    self, netobj, nlm4_cancargs, nlm4_holder, nlm4_lock, nlm4_lockargs, nlm4_notify, nlm4_res,
    nlm4_stats, nlm4_testargs, nlm4_testres, nlm4_testrply, nlm4_unlockargs, NlmProgram,
};
use crate::protocol::xdr::{deserialize, portmap, serialize_to_vec, Serialize};
use crate::store::LockRecord;
use lockmgr::{GrantNotifier, LockOutcome};

/// Total budget for one GRANTED callback attempt (portmap lookup included).
const GRANT_CALLBACK_BUDGET: Duration = Duration::from_secs(5);

/// Composes the namespaced owner id for an NLM lock description.
pub fn owner_id(alock: &nlm4_lock) -> String {
    let host = String::from_utf8_lossy(&alock.caller_name.0);
    let mut hex = String::with_capacity(alock.oh.0.len() * 2);
    for byte in &alock.oh.0 {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("nlm:{host}:{}:{hex}", alock.svid)
}

fn record_from(alock: &nlm4_lock, exclusive: bool, reclaim: bool) -> LockRecord {
    LockRecord {
        handle: alock.fh.0.clone(),
        owner: owner_id(alock),
        offset: alock.l_offset,
        length: alock.l_len,
        exclusive,
        reclaim,
    }
}

/// Routes one NLM call.
pub async fn handle(
    proc: u32,
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    use NlmProgram::*;
    match NlmProgram::from_u32(proc).unwrap_or(NlmProgram::INVALID) {
        NLMPROC4_NULL => Ok(()),
        NLMPROC4_TEST => {
            let args = deserialize::<nlm4_testargs>(input)?;
            let res = test(args, ctx).await;
            res.serialize(output)?;
            Ok(())
        }
        NLMPROC4_LOCK => {
            let args = deserialize::<nlm4_lockargs>(input)?;
            let res = lock(args, ctx).await;
            res.serialize(output)?;
            Ok(())
        }
        NLMPROC4_CANCEL => {
            let args = deserialize::<nlm4_cancargs>(input)?;
            let res = cancel(args, ctx).await;
            res.serialize(output)?;
            Ok(())
        }
        NLMPROC4_UNLOCK => {
            let args = deserialize::<nlm4_unlockargs>(input)?;
            let res = unlock(args, ctx).await;
            res.serialize(output)?;
            Ok(())
        }
        NLMPROC4_GRANTED => {
            // This server never blocks as an NLM client; acknowledge.
            let args = deserialize::<nlm4_testargs>(input)?;
            nlm4_res { cookie: args.cookie, stat: nlm4_stats::NLM4_GRANTED }
                .serialize(output)?;
            Ok(())
        }
        NLMPROC4_TEST_MSG => {
            let args = deserialize::<nlm4_testargs>(input)?;
            let res = test(args, ctx).await;
            send_res(ctx, NLMPROC4_TEST_RES as u32, &serialize_to_vec(&res)?).await;
            Ok(())
        }
        NLMPROC4_LOCK_MSG => {
            let args = deserialize::<nlm4_lockargs>(input)?;
            let res = lock(args, ctx).await;
            send_res(ctx, NLMPROC4_LOCK_RES as u32, &serialize_to_vec(&res)?).await;
            Ok(())
        }
        NLMPROC4_CANCEL_MSG => {
            let args = deserialize::<nlm4_cancargs>(input)?;
            let res = cancel(args, ctx).await;
            send_res(ctx, NLMPROC4_CANCEL_RES as u32, &serialize_to_vec(&res)?).await;
            Ok(())
        }
        NLMPROC4_UNLOCK_MSG => {
            let args = deserialize::<nlm4_unlockargs>(input)?;
            let res = unlock(args, ctx).await;
            send_res(ctx, NLMPROC4_UNLOCK_RES as u32, &serialize_to_vec(&res)?).await;
            Ok(())
        }
        NLMPROC4_GRANTED_MSG => {
            let args = deserialize::<nlm4_testargs>(input)?;
            let res = nlm4_res { cookie: args.cookie, stat: nlm4_stats::NLM4_GRANTED };
            send_res(ctx, NLMPROC4_GRANTED_RES as u32, &serialize_to_vec(&res)?).await;
            Ok(())
        }
        NLMPROC4_TEST_RES
        | NLMPROC4_LOCK_RES
        | NLMPROC4_CANCEL_RES
        | NLMPROC4_UNLOCK_RES
        | NLMPROC4_GRANTED_RES => {
            // Results for calls this server issued; the synchronous grant
            // path already consumed its reply, so these are informational.
            let res = deserialize::<nlm4_res>(input)?;
            debug!(xid = ctx.xid, ?res, "async NLM result received");
            Ok(())
        }
        NLMPROC4_FREE_ALL => {
            let args = deserialize::<nlm4_notify>(input)?;
            let host = String::from_utf8_lossy(&args.name.0).into_owned();
            debug!(xid = ctx.xid, %host, "nlmproc4_free_all");
            ctx.deps.locks.release_owner_prefix(&format!("nlm:{host}:")).await;
            Ok(())
        }
        INVALID => Err(HandlerError::System(format!("nlm procedure {proc} routed past table"))),
    }
}

async fn test(args: nlm4_testargs, ctx: &RequestContext) -> nlm4_testres {
    let probe = record_from(&args.alock, args.exclusive, false);
    debug!(xid = ctx.xid, owner = %probe.owner, "nlmproc4_test");
    match ctx.deps.locks.test(&probe).await {
        None => nlm4_testres { cookie: args.cookie, stat: nlm4_testrply::Void },
        Some(holder) => nlm4_testres {
            cookie: args.cookie,
            stat: nlm4_testrply::holder(nlm4_holder {
                exclusive: holder.exclusive,
                svid: args.alock.svid,
                oh: netobj(holder.owner.into_bytes()),
                l_offset: holder.offset,
                l_len: holder.length,
            }),
        },
    }
}

async fn lock(args: nlm4_lockargs, ctx: &RequestContext) -> nlm4_res {
    let record = record_from(&args.alock, args.exclusive, args.reclaim);
    debug!(
        xid = ctx.xid,
        owner = %record.owner,
        block = args.block,
        reclaim = args.reclaim,
        "nlmproc4_lock"
    );

    let stat = if args.block {
        let notifier = granted_notifier(ctx, &args);
        match ctx.deps.locks.lock_or_wait(record, notifier).await {
            LockOutcome::Granted => nlm4_stats::NLM4_GRANTED,
            LockOutcome::Blocked => nlm4_stats::NLM4_BLOCKED,
            LockOutcome::Denied(_) => nlm4_stats::NLM4_DENIED,
        }
    } else {
        match ctx.deps.locks.try_lock(record).await {
            LockOutcome::Granted => nlm4_stats::NLM4_GRANTED,
            LockOutcome::Denied(_) | LockOutcome::Blocked => nlm4_stats::NLM4_DENIED,
        }
    };
    nlm4_res { cookie: args.cookie, stat }
}

async fn cancel(args: nlm4_cancargs, ctx: &RequestContext) -> nlm4_res {
    let record = record_from(&args.alock, args.exclusive, false);
    debug!(xid = ctx.xid, owner = %record.owner, "nlmproc4_cancel");
    let stat = if ctx.deps.locks.cancel(&record).await {
        nlm4_stats::NLM4_GRANTED
    } else {
        nlm4_stats::NLM4_DENIED
    };
    nlm4_res { cookie: args.cookie, stat }
}

async fn unlock(args: nlm4_unlockargs, ctx: &RequestContext) -> nlm4_res {
    let record = record_from(&args.alock, false, false);
    debug!(xid = ctx.xid, owner = %record.owner, "nlmproc4_unlock");
    ctx.deps.locks.unlock(&record).await;
    nlm4_res { cookie: args.cookie, stat: nlm4_stats::NLM4_GRANTED }
}

/// Builds the notifier that delivers NLM_GRANTED to the blocked client: the
/// client's portmapper resolves its lock manager port, then the callback is
/// issued there. Both legs share the 5 second budget.
fn granted_notifier(ctx: &RequestContext, args: &nlm4_lockargs) -> GrantNotifier {
    let host = ctx.client_addr.split(':').next().unwrap_or("127.0.0.1").to_string();
    let callback_args = nlm4_testargs {
        cookie: args.cookie.clone(),
        exclusive: args.exclusive,
        alock: args.alock.clone(),
    };
    Arc::new(move |_granted: LockRecord| {
        let host = host.clone();
        let callback_args = callback_args.clone();
        Box::pin(async move { send_granted(&host, &callback_args).await })
    })
}

async fn send_granted(host: &str, args: &nlm4_testargs) -> bool {
    let attempt = async {
        // Resolve the client's NLM port through its portmapper.
        let getport = portmap::mapping {
            prog: nlm::PROGRAM,
            vers: nlm::VERSION,
            prot: portmap::IPPROTO_TCP,
            port: 0,
        };
        let reply = client::call_once(
            &format!("{host}:111"),
            portmap::PROGRAM,
            2,
            portmap::PortmapProgram::PMAPPROC_GETPORT as u32,
            &serialize_to_vec(&getport).ok()?,
            GRANT_CALLBACK_BUDGET,
        )
        .await
        .ok()?;
        let port = deserialize::<u32>(&mut std::io::Cursor::new(&reply)).ok()?;
        if port == 0 || port > u16::MAX as u32 {
            return None;
        }

        let reply = client::call_once(
            &format!("{host}:{port}"),
            nlm::PROGRAM,
            nlm::VERSION,
            NlmProgram::NLMPROC4_GRANTED as u32,
            &serialize_to_vec(args).ok()?,
            GRANT_CALLBACK_BUDGET,
        )
        .await
        .ok()?;
        let res = deserialize::<nlm4_res>(&mut std::io::Cursor::new(&reply)).ok()?;
        Some(res.stat == nlm4_stats::NLM4_GRANTED)
    };
    match tokio::time::timeout(GRANT_CALLBACK_BUDGET, attempt).await {
        Ok(Some(accepted)) => accepted,
        Ok(None) => {
            warn!(%host, "NLM_GRANTED callback failed");
            false
        }
        Err(_) => {
            warn!(%host, "NLM_GRANTED callback timed out");
            false
        }
    }
}

/// Sends an asynchronous `_RES` message back over the inbound connection.
async fn send_res(ctx: &RequestContext, proc: u32, results: &[u8]) {
    let msg = rpc_msg {
        // New transaction: _RES messages are calls in their own right.
        xid: ctx.xid.wrapping_add(0x8000_0000),
        body: rpc_body::CALL(call_body {
            rpcvers: 2,
            prog: nlm::PROGRAM,
            vers: nlm::VERSION,
            proc,
            cred: opaque_auth::default(),
            verf: opaque_auth::default(),
        }),
    };
    let Ok(mut record) = serialize_to_vec(&msg) else { return };
    record.extend_from_slice(results);
    if let Err(err) = (ctx.conn.write)(record).await {
        warn!(error = %err, "failed to send NLM _RES message");
    }
}

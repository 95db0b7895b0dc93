//! The COMPOUND interpreter (RFC 7530 section 14, RFC 5661 section 2.10).
//!
//! Operations run in order against per-request state (current and saved
//! file handles, current stateid, and the v4.1 session binding). The first
//! non-OK status stops execution; the reply carries every completed result
//! plus the failing one, under the compound status.
//!
//! When the request opens with SEQUENCE, the session slot-replay cache
//! provides exactly-once semantics: a retransmission is answered with the
//! byte-identical cached reply, the successor sequence claims the slot, and
//! everything else is SEQ_MISORDERED. A busy slot answers DELAY.

use std::io::Read;
use std::sync::Arc;

use tracing::{debug, trace};

use super::ops;
use super::session::{Session, SlotCheck};
use crate::protocol::rpc::context::{HandlerError, HandlerResult, RequestContext};
use crate::protocol::xdr::nfs4::{
    clientid4, nfs_argop4, nfsstat4, sequenceid4, slotid4, stateid4, utf8string, COMPOUND4args,
    SEQUENCE4args, SEQUENCE4resok,
};
use crate::protocol::xdr::{Serialize};
use crate::store::RawHandle;

/// Per-compound execution state.
pub struct CompoundState {
    pub minor: u32,
    pub current_fh: Option<RawHandle>,
    pub saved_fh: Option<RawHandle>,
    pub current_stateid: stateid4,
    /// Bound by SEQUENCE: (session, slot, sequence).
    pub session: Option<(Arc<Session>, slotid4, sequenceid4)>,
    /// Client whose lease this request renews.
    pub client_id: Option<clientid4>,
}

impl CompoundState {
    fn new(minor: u32) -> Self {
        Self {
            minor,
            current_fh: None,
            saved_fh: None,
            current_stateid: stateid4::special_zero(),
            session: None,
            client_id: None,
        }
    }

    /// The current file handle or the status every op maps its absence to.
    pub fn fh(&self) -> Result<&RawHandle, nfsstat4> {
        self.current_fh.as_ref().ok_or(nfsstat4::NFS4ERR_NOFILEHANDLE)
    }
}

/// Executes one COMPOUND call.
pub async fn execute(
    input: &mut impl Read,
    output: &mut Vec<u8>,
    ctx: &RequestContext,
) -> HandlerResult {
    let args = COMPOUND4args::read_from(input)?;
    debug!(
        xid = ctx.xid,
        tag = %args.tag.as_str(),
        minor = args.minorversion,
        ops = args.argarray.len(),
        "compound"
    );

    if args.minorversion > 1 {
        return finish(output, nfsstat4::NFS4ERR_MINOR_VERS_MISMATCH, &args.tag, &[], 0);
    }
    if let Some(status) = args.decode_error {
        return finish(output, status, &args.tag, &[], 0);
    }

    let mut state = CompoundState::new(args.minorversion);
    let mut results: Vec<u8> = Vec::with_capacity(512);
    let mut completed: u32 = 0;
    let mut overall = nfsstat4::NFS4_OK;

    for (index, op) in args.argarray.iter().enumerate() {
        // SEQUENCE is only legal as the first operation.
        if let nfs_argop4::SEQUENCE(seq_args) = op {
            if index != 0 {
                overall = write_result_header(
                    &mut results,
                    op.opnum(),
                    nfsstat4::NFS4ERR_SEQUENCE_POS,
                )?;
                completed += 1;
                break;
            }
            match begin_sequence(seq_args, &mut state, ctx, &args, output).await? {
                SequenceOutcome::Replayed => return Ok(()),
                SequenceOutcome::Failed(status) => {
                    overall = write_result_header(&mut results, op.opnum(), status)?;
                    completed += 1;
                    break;
                }
                SequenceOutcome::Accepted(resok) => {
                    (op.opnum()).serialize(&mut results)?;
                    nfsstat4::NFS4_OK.serialize(&mut results)?;
                    resok.serialize(&mut results)?;
                    completed += 1;
                    continue;
                }
            }
        }

        if ctx.deps.shutdown.is_triggered() {
            release_slot(&state);
            return Err(HandlerError::Cancelled);
        }

        let mut body = Vec::new();
        let status = ops::run(op, &mut state, ctx, &mut body).await;
        trace!(op = op.opnum(), ?status, "compound op");
        op.opnum().serialize(&mut results)?;
        status.serialize(&mut results)?;
        results.extend_from_slice(&body);
        completed += 1;
        if status != nfsstat4::NFS4_OK {
            overall = status;
            break;
        }
    }

    finish(output, overall, &args.tag, &results, completed)?;

    // Cache the finished reply for slot replay.
    if let Some((session, slot, seq)) = &state.session {
        session.fore.lock().expect("slot table lock").complete(*slot, *seq, output.clone());
    }
    if let Some(client_id) = state.client_id {
        ctx.deps.state4.renew_lease(client_id);
    }
    Ok(())
}

enum SequenceOutcome {
    /// Cached reply already written to the output.
    Replayed,
    Accepted(SEQUENCE4resok),
    Failed(nfsstat4),
}

async fn begin_sequence(
    args: &SEQUENCE4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    compound: &COMPOUND4args,
    output: &mut Vec<u8>,
) -> Result<SequenceOutcome, HandlerError> {
    if compound.minorversion == 0 {
        return Ok(SequenceOutcome::Failed(nfsstat4::NFS4ERR_NOTSUPP));
    }
    let Some(session) = ctx.deps.state4.lookup_session(&args.sa_sessionid) else {
        return Ok(SequenceOutcome::Failed(nfsstat4::NFS4ERR_BADSESSION));
    };

    let check = session
        .fore
        .lock()
        .expect("slot table lock")
        .check(args.sa_slotid, args.sa_sequenceid);
    match check {
        SlotCheck::Replay(bytes) => {
            debug!(slot = args.sa_slotid, seq = args.sa_sequenceid, "slot replay");
            output.extend_from_slice(&bytes);
            Ok(SequenceOutcome::Replayed)
        }
        SlotCheck::Busy => Ok(SequenceOutcome::Failed(nfsstat4::NFS4ERR_DELAY)),
        SlotCheck::Misordered => Ok(SequenceOutcome::Failed(nfsstat4::NFS4ERR_SEQ_MISORDERED)),
        SlotCheck::BadSlot => Ok(SequenceOutcome::Failed(nfsstat4::NFS4ERR_BADSLOT)),
        SlotCheck::RetryUncached => {
            Ok(SequenceOutcome::Failed(nfsstat4::NFS4ERR_RETRY_UNCACHED_REP))
        }
        SlotCheck::Accepted => {
            let width = session.fore.lock().expect("slot table lock").width() as u32;
            let resok = SEQUENCE4resok {
                sr_sessionid: args.sa_sessionid,
                sr_sequenceid: args.sa_sequenceid,
                sr_slotid: args.sa_slotid,
                sr_highest_slotid: width - 1,
                sr_target_highest_slotid: width - 1,
                sr_status_flags: 0,
            };
            state.client_id = Some(session.client_id);
            state.session = Some((session, args.sa_slotid, args.sa_sequenceid));
            Ok(SequenceOutcome::Accepted(resok))
        }
    }
}

fn release_slot(state: &CompoundState) {
    if let Some((session, slot, _)) = &state.session {
        session.fore.lock().expect("slot table lock").release(*slot);
    }
}

fn write_result_header(
    results: &mut Vec<u8>,
    opnum: u32,
    status: nfsstat4,
) -> Result<nfsstat4, HandlerError> {
    opnum.serialize(results)?;
    status.serialize(results)?;
    Ok(status)
}

fn finish(
    output: &mut Vec<u8>,
    status: nfsstat4,
    tag: &utf8string,
    results: &[u8],
    count: u32,
) -> HandlerResult {
    status.serialize(output)?;
    tag.serialize(output)?;
    count.serialize(output)?;
    output.extend_from_slice(results);
    Ok(())
}

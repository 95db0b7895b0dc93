//! Client and session lifecycle operations: EXCHANGE_ID, CREATE_SESSION,
//! BIND_CONN_TO_SESSION, DESTROY_SESSION, DESTROY_CLIENTID,
//! RECLAIM_COMPLETE, and the v4.0 lineage (SETCLIENTID, its confirmation,
//! RENEW).

use tracing::debug;

use super::OpResult;
use crate::protocol::nfs::v4::compound::CompoundState;
use crate::protocol::rpc::context::RequestContext;
use crate::protocol::xdr::nfs4::{
    channel_dir_from_client4, channel_dir_from_server4, clientid4, nfsstat4, sessionid4,
    BIND_CONN_TO_SESSION4args, BIND_CONN_TO_SESSION4resok, CREATE_SESSION4args,
    EXCHANGE_ID4args, EXCHANGE_ID4resok, SETCLIENTID4args, SETCLIENTID_CONFIRM4args,
    CREATE_SESSION4_FLAG_CONN_BACK_CHAN, EXCHGID4_FLAG_CONFIRMED_R, EXCHGID4_FLAG_USE_NON_PNFS,
};
use crate::protocol::xdr::Serialize;

pub(super) fn exchange_id(
    args: &EXCHANGE_ID4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    if state.minor == 0 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    let principal = ctx.creds.principal.clone().unwrap_or_default();
    let (client_id, sequence, confirmed) = ctx.deps.state4.exchange_id(
        args.eia_clientowner.co_ownerid.clone(),
        args.eia_clientowner.co_verifier,
        &principal,
    );
    state.client_id = Some(client_id);
    debug!(xid = ctx.xid, client_id, confirmed, "exchange_id4");

    let mut flags = EXCHGID4_FLAG_USE_NON_PNFS;
    if confirmed {
        flags |= EXCHGID4_FLAG_CONFIRMED_R;
    }
    let verifier = ctx.deps.state4.server_verifier();
    let res = EXCHANGE_ID4resok {
        eir_clientid: client_id,
        eir_sequenceid: sequence,
        eir_flags: flags,
        eir_server_owner_minor: 0,
        eir_server_owner_major: verifier.to_vec(),
        eir_server_scope: verifier.to_vec(),
    };
    res.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn create_session(
    args: &CREATE_SESSION4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    if state.minor == 0 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    let (session, mut res, replayed) = ctx.deps.state4.create_session(
        args.csa_clientid,
        args.csa_sequence,
        args.csa_fore_chan_attrs.ca_maxrequests,
        args.csa_back_chan_attrs.ca_maxrequests,
        args.csa_cb_program,
    )?;

    if !replayed && args.csa_flags & CREATE_SESSION4_FLAG_CONN_BACK_CHAN != 0 {
        session.bind_backchannel(&ctx.conn);
        res.csr_flags |= CREATE_SESSION4_FLAG_CONN_BACK_CHAN;
    }
    res.csr_fore_chan_attrs = args.csa_fore_chan_attrs.clone();
    res.csr_fore_chan_attrs.ca_maxrequests =
        session.fore.lock().expect("slot table lock").width() as u32;
    res.csr_back_chan_attrs = args.csa_back_chan_attrs.clone();

    state.client_id = Some(args.csa_clientid);
    debug!(xid = ctx.xid, client_id = args.csa_clientid, replayed, "create_session4");
    res.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn bind_conn_to_session(
    args: &BIND_CONN_TO_SESSION4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    if state.minor == 0 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    let session = ctx
        .deps
        .state4
        .lookup_session(&args.bctsa_sessid)
        .ok_or(nfsstat4::NFS4ERR_BADSESSION)?;

    let dir = match args.bctsa_dir {
        channel_dir_from_client4::CDFC4_FORE => channel_dir_from_server4::CDFS4_FORE,
        channel_dir_from_client4::CDFC4_BACK => {
            session.bind_backchannel(&ctx.conn);
            channel_dir_from_server4::CDFS4_BACK
        }
        channel_dir_from_client4::CDFC4_FORE_OR_BOTH
        | channel_dir_from_client4::CDFC4_BACK_OR_BOTH => {
            session.bind_backchannel(&ctx.conn);
            channel_dir_from_server4::CDFS4_BOTH
        }
    };
    debug!(xid = ctx.xid, conn = ctx.conn.conn_id, ?dir, "bind_conn_to_session4");

    let res = BIND_CONN_TO_SESSION4resok {
        bctsr_sessid: args.bctsa_sessid,
        bctsr_dir: dir,
        bctsr_use_conn_in_rdma_mode: false,
    };
    res.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn destroy_session(id: &sessionid4, ctx: &RequestContext) -> OpResult {
    match ctx.deps.state4.destroy_session(id) {
        nfsstat4::NFS4_OK => Ok(()),
        status => Err(status),
    }
}

pub(super) fn destroy_clientid(client_id: clientid4, ctx: &RequestContext) -> OpResult {
    match ctx.deps.state4.destroy_clientid(client_id) {
        nfsstat4::NFS4_OK => Ok(()),
        status => Err(status),
    }
}

pub(super) fn setclientid(
    args: &SETCLIENTID4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
    out: &mut Vec<u8>,
) -> OpResult {
    if state.minor >= 1 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    let principal = ctx.creds.principal.clone().unwrap_or_default();
    let (client_id, confirm) = ctx.deps.state4.setclientid(
        args.client.id.clone(),
        args.client.verifier,
        &principal,
        args.callback.clone(),
    );
    state.client_id = Some(client_id);
    debug!(xid = ctx.xid, client_id, "setclientid4");
    client_id.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    confirm.serialize(out).map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)
}

pub(super) fn setclientid_confirm(
    args: &SETCLIENTID_CONFIRM4args,
    state: &mut CompoundState,
    ctx: &RequestContext,
) -> OpResult {
    if state.minor >= 1 {
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    state.client_id = Some(args.clientid);
    match ctx.deps.state4.setclientid_confirm(args.clientid, args.setclientid_confirm) {
        nfsstat4::NFS4_OK => Ok(()),
        status => Err(status),
    }
}

pub(super) fn renew(
    client_id: clientid4,
    state: &mut CompoundState,
    ctx: &RequestContext,
) -> OpResult {
    if state.minor >= 1 {
        // Sessions renew through SEQUENCE.
        return Err(nfsstat4::NFS4ERR_NOTSUPP);
    }
    state.client_id = Some(client_id);
    match ctx.deps.state4.renew_lease(client_id) {
        nfsstat4::NFS4_OK => Ok(()),
        status => Err(status),
    }
}

pub(super) fn reclaim_complete(state: &mut CompoundState, ctx: &RequestContext) -> OpResult {
    let client_id = state.client_id.ok_or(nfsstat4::NFS4ERR_OP_NOT_IN_SESSION)?;
    match ctx.deps.state4.reclaim_complete(client_id) {
        nfsstat4::NFS4_OK => Ok(()),
        status => Err(status),
    }
}

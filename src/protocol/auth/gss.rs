//! RPCSEC_GSS processor (RFC 2203) over a pluggable Kerberos v5 mechanism.
//!
//! The processor owns the protocol: context establishment rounds, the
//! per-context sliding sequence window, integrity/privacy unwrapping of call
//! bodies, and the MIC-bearing reply verifier. Token cryptography (RFC 4121)
//! lives behind [`Krb5Mechanism`] so deployments can plug a real keytab-backed
//! acceptor while tests use a deterministic one.
//!
//! Sequence violations are silently discarded per RFC 2203 section 5.3.3.1 —
//! no reply, connection stays up.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::auth::identity::IdentityMapper;
use crate::protocol::auth::Credentials;
use crate::protocol::xdr::rpc::{
    auth_flavor, auth_stat, opaque_auth, rpc_gss_cred, rpc_gss_init_res, rpc_gss_proc,
    rpc_gss_service,
};
use crate::protocol::xdr::{deserialize, serialize_to_vec, write_opaque, Serialize};
use crate::settings::KerberosSettings;

/// GSS major status: success.
pub const GSS_S_COMPLETE: u32 = 0;
/// GSS major status: another token exchange round is required.
pub const GSS_S_CONTINUE_NEEDED: u32 = 1;
/// GSS major status: the context has expired.
pub const GSS_S_CONTEXT_EXPIRED: u32 = 0x000c_0000;
/// GSS major status: token integrity check failed.
pub const GSS_S_BAD_SIG: u32 = 0x0006_0000;

/// Default sliding sequence window width.
pub const DEFAULT_SEQ_WINDOW: u32 = 128;

#[derive(Debug, thiserror::Error)]
#[error("gss failure: major {major:#x} minor {minor}")]
pub struct GssError {
    pub major: u32,
    pub minor: u32,
}

/// Outcome of feeding one client token to the acceptor.
pub struct AcceptOutcome {
    /// Token to return to the client (may be empty when complete).
    pub token: Vec<u8>,
    /// False when another CONTINUE_INIT round is required.
    pub complete: bool,
    /// Negotiated session key, present once complete.
    pub session_key: Vec<u8>,
    /// Authenticated initiator principal, present once complete.
    pub principal: String,
    /// True when the acceptor emitted a subkey in AP-REP.
    pub acceptor_subkey: bool,
    /// Opaque mechanism state carried between establishment rounds.
    pub state: Vec<u8>,
}

/// The Kerberos v5 mechanism seam (RFC 4121 token operations).
pub trait Krb5Mechanism: Send + Sync {
    /// Feeds one initiator token to the acceptor.
    fn accept_context(&self, state: Option<&[u8]>, token: &[u8])
        -> Result<AcceptOutcome, GssError>;

    /// Computes a MIC over `data` with the session key.
    fn compute_mic(&self, session_key: &[u8], acceptor_subkey: bool, data: &[u8]) -> Vec<u8>;

    /// Verifies a MIC over `data`.
    fn verify_mic(&self, session_key: &[u8], data: &[u8], mic: &[u8]) -> bool;

    /// Seals `data` for privacy protection.
    fn wrap(&self, session_key: &[u8], seq_num: u32, data: &[u8]) -> Vec<u8>;

    /// Unseals a privacy-protected body. `None` on decryption failure.
    fn unwrap(&self, session_key: &[u8], seq_num: u32, data: &[u8]) -> Option<Vec<u8>>;
}

/// Established (or in-progress) security context.
struct GssContext {
    session_key: Vec<u8>,
    principal: String,
    acceptor_subkey: bool,
    established: bool,
    /// Mechanism state while establishment is still in progress.
    mech_state: Vec<u8>,
    window: SequenceWindow,
}

/// RFC 2203 sliding window over accepted sequence numbers.
struct SequenceWindow {
    width: u32,
    high: u32,
    /// Bit i set = `high - i` was seen. Bit 0 is `high` itself.
    seen: u128,
    started: bool,
}

impl SequenceWindow {
    fn new(width: u32) -> Self {
        Self { width: width.min(128), high: 0, seen: 0, started: false }
    }

    /// Admits `seq` or reports that the message must be dropped.
    fn admit(&mut self, seq: u32) -> bool {
        if !self.started {
            self.started = true;
            self.high = seq;
            self.seen = 1;
            return true;
        }
        if seq > self.high {
            let shift = seq - self.high;
            self.seen = if shift >= 128 { 0 } else { self.seen << shift };
            self.seen |= 1;
            self.high = seq;
            return true;
        }
        let age = self.high - seq;
        if age >= self.width {
            // below the window
            return false;
        }
        let bit = 1u128 << age;
        if self.seen & bit != 0 {
            // replay
            return false;
        }
        self.seen |= bit;
        true
    }
}

/// What the dispatch layer should do with a call after GSS processing.
pub enum GssDisposition {
    /// Control call (INIT/CONTINUE_INIT/DESTROY) fully handled; the reply
    /// body and verifier are ready.
    Control { reply_verf: opaque_auth, reply_body: Vec<u8> },
    /// DATA call accepted: identity bound, argument bytes replaced with the
    /// verified/decrypted payload.
    Accepted(Box<AcceptedData>),
    /// Silent discard (sequence drift or replay).
    Drop,
    /// Reject with MSG_DENIED/AUTH_ERROR.
    Deny(auth_stat),
}

pub struct AcceptedData {
    pub creds: Credentials,
    pub args: Vec<u8>,
    /// Context needed to protect the reply.
    pub reply: ReplyProtection,
}

/// Everything needed to emit the reply for a GSS DATA call.
#[derive(Clone)]
pub struct ReplyProtection {
    pub service: rpc_gss_service,
    pub seq_num: u32,
    session_key: Vec<u8>,
    acceptor_subkey: bool,
    mechanism: Arc<dyn Krb5Mechanism>,
}

impl ReplyProtection {
    /// Reply verifier: MIC over the big-endian sequence number.
    pub fn reply_verifier(&self) -> opaque_auth {
        let mic = self.mechanism.compute_mic(
            &self.session_key,
            self.acceptor_subkey,
            &self.seq_num.to_be_bytes(),
        );
        opaque_auth::new(auth_flavor::RPCSEC_GSS, mic)
    }

    /// Wraps already-serialized procedure results for the negotiated service.
    pub fn protect_results(&self, results: &[u8]) -> std::io::Result<Vec<u8>> {
        match self.service {
            rpc_gss_service::rpc_gss_svc_none => Ok(results.to_vec()),
            rpc_gss_service::rpc_gss_svc_integrity => {
                let mut body = Vec::with_capacity(results.len() + 4);
                self.seq_num.serialize(&mut body)?;
                body.extend_from_slice(results);
                let mic = self.mechanism.compute_mic(&self.session_key, self.acceptor_subkey, &body);
                let mut out = Vec::with_capacity(body.len() + mic.len() + 16);
                write_opaque(&body, &mut out)?;
                write_opaque(&mic, &mut out)?;
                Ok(out)
            }
            rpc_gss_service::rpc_gss_svc_privacy => {
                let mut body = Vec::with_capacity(results.len() + 4);
                self.seq_num.serialize(&mut body)?;
                body.extend_from_slice(results);
                let sealed = self.mechanism.wrap(&self.session_key, self.seq_num, &body);
                let mut out = Vec::with_capacity(sealed.len() + 8);
                write_opaque(&sealed, &mut out)?;
                Ok(out)
            }
        }
    }
}

/// Process-wide GSS context table with handle allocation, a context cap and
/// TTL eviction.
pub struct GssProcessor {
    mechanism: Arc<dyn Krb5Mechanism>,
    mapper: Arc<dyn IdentityMapper>,
    contexts: moka::sync::Cache<u32, Arc<Mutex<GssContext>>>,
    next_handle: AtomicU32,
    anonymous: (u32, u32),
}

impl GssProcessor {
    pub fn new(
        mechanism: Arc<dyn Krb5Mechanism>,
        mapper: Arc<dyn IdentityMapper>,
        settings: &KerberosSettings,
    ) -> Self {
        Self {
            mechanism,
            mapper,
            contexts: moka::sync::Cache::builder()
                .max_capacity(settings.max_contexts)
                .time_to_idle(Duration::from_secs(settings.context_ttl))
                .build(),
            next_handle: AtomicU32::new(1),
            anonymous: (settings.anonymous_uid, settings.anonymous_gid),
        }
    }

    /// Drives one RPCSEC_GSS call.
    ///
    /// `header` must cover the serialized RPC header from the xid through
    /// the credential (the span the DATA verifier MIC signs); `verf` is the
    /// call verifier; `args` the raw procedure arguments.
    pub fn process(
        &self,
        cred: &rpc_gss_cred,
        header: &[u8],
        verf: &opaque_auth,
        args: &[u8],
    ) -> GssDisposition {
        if cred.version != crate::protocol::xdr::rpc::RPCSEC_GSS_VERS_1 {
            return GssDisposition::Deny(auth_stat::AUTH_BADCRED);
        }
        match cred.gss_proc {
            rpc_gss_proc::RPCSEC_GSS_INIT | rpc_gss_proc::RPCSEC_GSS_CONTINUE_INIT => {
                self.establish(cred, args)
            }
            rpc_gss_proc::RPCSEC_GSS_DESTROY => self.destroy(cred),
            rpc_gss_proc::RPCSEC_GSS_DATA => self.data(cred, header, verf, args),
        }
    }

    fn handle_of(cred: &rpc_gss_cred) -> Option<u32> {
        if cred.handle.len() != 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            cred.handle[0],
            cred.handle[1],
            cred.handle[2],
            cred.handle[3],
        ]))
    }

    fn establish(&self, cred: &rpc_gss_cred, args: &[u8]) -> GssDisposition {
        // INIT args carry exactly one opaque: the initiator token.
        let token = match deserialize::<Vec<u8>>(&mut Cursor::new(args)) {
            Ok(t) => t,
            Err(_) => return GssDisposition::Deny(auth_stat::AUTH_BADCRED),
        };

        let (handle, prior_state) = match cred.gss_proc {
            rpc_gss_proc::RPCSEC_GSS_INIT => (self.next_handle.fetch_add(1, Ordering::Relaxed), None),
            _ => {
                let Some(handle) = Self::handle_of(cred) else {
                    return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM);
                };
                let Some(ctx) = self.contexts.get(&handle) else {
                    return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM);
                };
                let state = ctx.lock().expect("gss context lock").mech_state.clone();
                (handle, Some(state))
            }
        };

        let outcome = match self.mechanism.accept_context(prior_state.as_deref(), &token) {
            Ok(o) => o,
            Err(err) => {
                warn!(major = err.major, minor = err.minor, "GSS accept failed");
                // An expired context mid-negotiation is a context problem;
                // everything else (bad MIC, undecodable token) is a
                // credential problem.
                let stat = if err.major == GSS_S_CONTEXT_EXPIRED {
                    auth_stat::RPCSEC_GSS_CTXPROBLEM
                } else {
                    auth_stat::RPCSEC_GSS_CREDPROBLEM
                };
                return GssDisposition::Deny(stat);
            }
        };

        let context = Arc::new(Mutex::new(GssContext {
            session_key: outcome.session_key.clone(),
            principal: outcome.principal.clone(),
            acceptor_subkey: outcome.acceptor_subkey,
            established: outcome.complete,
            mech_state: outcome.state,
            window: SequenceWindow::new(DEFAULT_SEQ_WINDOW),
        }));
        self.contexts.insert(handle, context);

        let res = rpc_gss_init_res {
            handle: handle.to_be_bytes().to_vec(),
            gss_major: if outcome.complete { GSS_S_COMPLETE } else { GSS_S_CONTINUE_NEEDED },
            gss_minor: 0,
            seq_window: DEFAULT_SEQ_WINDOW,
            gss_token: outcome.token,
        };
        let reply_body = match serialize_to_vec(&res) {
            Ok(b) => b,
            Err(_) => return GssDisposition::Deny(auth_stat::AUTH_FAILED),
        };

        // The reply verifier signs (major, minor, handle, seq_window) with
        // the fresh session key, using the subkey flag negotiated in AP-REP.
        let reply_verf = if outcome.complete {
            let mut signed = Vec::with_capacity(res.handle.len() + 16);
            let encoded = res
                .gss_major
                .serialize(&mut signed)
                .and_then(|_| res.gss_minor.serialize(&mut signed))
                .and_then(|_| write_opaque(&res.handle, &mut signed))
                .and_then(|_| res.seq_window.serialize(&mut signed));
            if encoded.is_err() {
                return GssDisposition::Deny(auth_stat::AUTH_FAILED);
            }
            let mic = self.mechanism.compute_mic(
                &outcome.session_key,
                outcome.acceptor_subkey,
                &signed,
            );
            opaque_auth::new(auth_flavor::RPCSEC_GSS, mic)
        } else {
            opaque_auth::default()
        };

        GssDisposition::Control { reply_verf, reply_body }
    }

    fn destroy(&self, cred: &rpc_gss_cred) -> GssDisposition {
        let Some(handle) = Self::handle_of(cred) else {
            return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM);
        };
        if self.contexts.get(&handle).is_none() {
            return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM);
        }
        self.contexts.invalidate(&handle);
        debug!(handle, "GSS context destroyed");
        GssDisposition::Control { reply_verf: opaque_auth::default(), reply_body: Vec::new() }
    }

    fn data(
        &self,
        cred: &rpc_gss_cred,
        header: &[u8],
        verf: &opaque_auth,
        args: &[u8],
    ) -> GssDisposition {
        let Some(handle) = Self::handle_of(cred) else {
            return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM);
        };
        let Some(ctx) = self.contexts.get(&handle) else {
            // Unknown or TTL-evicted handle: the client must renegotiate.
            return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM);
        };
        let mut ctx = ctx.lock().expect("gss context lock");
        if !ctx.established {
            return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM);
        }

        // The call verifier is a MIC over the RPC header through the
        // credential.
        if !self.mechanism.verify_mic(&ctx.session_key, header, &verf.body) {
            return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM);
        }

        if !ctx.window.admit(cred.seq_num) {
            debug!(handle, seq = cred.seq_num, "GSS sequence violation, dropping");
            return GssDisposition::Drop;
        }

        let args = match cred.service {
            rpc_gss_service::rpc_gss_svc_none => args.to_vec(),
            rpc_gss_service::rpc_gss_svc_integrity => {
                let mut cursor = Cursor::new(args);
                let (Ok(body), Ok(mic)) =
                    (deserialize::<Vec<u8>>(&mut cursor), deserialize::<Vec<u8>>(&mut cursor))
                else {
                    return GssDisposition::Deny(auth_stat::AUTH_BADCRED);
                };
                if !self.mechanism.verify_mic(&ctx.session_key, &body, &mic) {
                    return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM);
                }
                match Self::strip_seq(&body, cred.seq_num) {
                    Some(inner) => inner,
                    None => return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM),
                }
            }
            rpc_gss_service::rpc_gss_svc_privacy => {
                let sealed = match deserialize::<Vec<u8>>(&mut Cursor::new(args)) {
                    Ok(s) => s,
                    Err(_) => return GssDisposition::Deny(auth_stat::AUTH_BADCRED),
                };
                let Some(body) = self.mechanism.unwrap(&ctx.session_key, cred.seq_num, &sealed)
                else {
                    return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM);
                };
                match Self::strip_seq(&body, cred.seq_num) {
                    Some(inner) => inner,
                    None => return GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM),
                }
            }
        };

        let identity = self.mapper.map(&ctx.principal);
        let (uid, gid, gids) = match identity {
            Some(id) => (id.uid, id.gid, id.gids),
            None => (self.anonymous.0, self.anonymous.1, Vec::new()),
        };
        let mut creds = Credentials::anonymous();
        creds.flavor = auth_flavor::RPCSEC_GSS;
        creds.uid = uid;
        creds.gid = gid;
        creds.gids.extend(gids.into_iter().take(16));
        creds.principal = Some(ctx.principal.clone());

        GssDisposition::Accepted(Box::new(AcceptedData {
            creds,
            args,
            reply: ReplyProtection {
                service: cred.service,
                seq_num: cred.seq_num,
                session_key: ctx.session_key.clone(),
                acceptor_subkey: ctx.acceptor_subkey,
                mechanism: Arc::clone(&self.mechanism),
            },
        }))
    }

    /// The protected body embeds the sequence number ahead of the real
    /// arguments; it must match the credential's.
    fn strip_seq(body: &[u8], expected_seq: u32) -> Option<Vec<u8>> {
        if body.len() < 4 {
            return None;
        }
        let seq = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        if seq != expected_seq {
            return None;
        }
        Some(body[4..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::auth::identity::{LocalIdentity, StaticMap};
    use crate::settings::IdentityEntry;

    /// Deterministic mechanism: MIC = key XOR-folded over data length and a
    /// tag; wrap = data XOR key byte. Enough to exercise the protocol.
    pub struct TestMechanism;

    impl Krb5Mechanism for TestMechanism {
        fn accept_context(
            &self,
            state: Option<&[u8]>,
            token: &[u8],
        ) -> Result<AcceptOutcome, GssError> {
            if token == b"bad" {
                return Err(GssError { major: GSS_S_BAD_SIG, minor: 9 });
            }
            if token == b"expired" {
                return Err(GssError { major: GSS_S_CONTEXT_EXPIRED, minor: 0 });
            }
            if token == b"round1" && state.is_none() {
                return Ok(AcceptOutcome {
                    token: b"challenge".to_vec(),
                    complete: false,
                    session_key: Vec::new(),
                    principal: String::new(),
                    acceptor_subkey: false,
                    state: b"round1-state".to_vec(),
                });
            }
            Ok(AcceptOutcome {
                token: b"ap-rep".to_vec(),
                complete: true,
                session_key: b"sekrit".to_vec(),
                principal: "alice@EXAMPLE.COM".to_string(),
                acceptor_subkey: true,
                state: Vec::new(),
            })
        }

        fn compute_mic(&self, key: &[u8], subkey: bool, data: &[u8]) -> Vec<u8> {
            let mut mic = key.to_vec();
            mic.push(data.len() as u8);
            mic.push(subkey as u8);
            mic
        }

        fn verify_mic(&self, key: &[u8], data: &[u8], mic: &[u8]) -> bool {
            !key.is_empty() && mic.len() == key.len() + 2 && mic[key.len()] == data.len() as u8
        }

        fn wrap(&self, key: &[u8], _seq: u32, data: &[u8]) -> Vec<u8> {
            data.iter().map(|b| b ^ key[0]).collect()
        }

        fn unwrap(&self, key: &[u8], _seq: u32, data: &[u8]) -> Option<Vec<u8>> {
            Some(data.iter().map(|b| b ^ key[0]).collect())
        }
    }

    fn processor() -> GssProcessor {
        let mut settings = KerberosSettings::default();
        settings.identity_table = vec![IdentityEntry {
            principal: "alice@EXAMPLE.COM".to_string(),
            uid: 1000,
            gid: 1000,
            gids: vec![10],
        }];
        GssProcessor::new(
            Arc::new(TestMechanism),
            Arc::new(StaticMap::new(settings.identity_table.clone())),
            &settings,
        )
    }

    fn init_cred() -> rpc_gss_cred {
        rpc_gss_cred {
            version: 1,
            gss_proc: rpc_gss_proc::RPCSEC_GSS_INIT,
            seq_num: 0,
            service: rpc_gss_service::rpc_gss_svc_none,
            handle: Vec::new(),
        }
    }

    fn establish(processor: &GssProcessor) -> u32 {
        let args = serialize_to_vec(&b"ap-req".to_vec()).unwrap();
        match processor.process(&init_cred(), &[], &opaque_auth::default(), &args) {
            GssDisposition::Control { reply_body, .. } => {
                let res =
                    deserialize::<rpc_gss_init_res>(&mut Cursor::new(&reply_body)).unwrap();
                assert_eq!(res.gss_major, GSS_S_COMPLETE);
                assert_eq!(res.seq_window, DEFAULT_SEQ_WINDOW);
                u32::from_be_bytes(res.handle.try_into().unwrap())
            }
            _ => panic!("expected control reply"),
        }
    }

    fn data_cred(handle: u32, seq: u32) -> rpc_gss_cred {
        rpc_gss_cred {
            version: 1,
            gss_proc: rpc_gss_proc::RPCSEC_GSS_DATA,
            seq_num: seq,
            service: rpc_gss_service::rpc_gss_svc_none,
            handle: handle.to_be_bytes().to_vec(),
        }
    }

    fn verf_for(header: &[u8]) -> opaque_auth {
        opaque_auth::new(
            auth_flavor::RPCSEC_GSS,
            TestMechanism.compute_mic(b"sekrit", true, header),
        )
    }

    #[test]
    fn init_issues_handle_and_window() {
        let p = processor();
        let handle = establish(&p);
        assert!(handle >= 1);
    }

    #[test]
    fn data_call_binds_mapped_identity() {
        let p = processor();
        let handle = establish(&p);
        let header = b"rpcheader".to_vec();
        match p.process(&data_cred(handle, 1), &header, &verf_for(&header), b"args") {
            GssDisposition::Accepted(data) => {
                assert_eq!(data.creds.uid, 1000);
                assert_eq!(data.creds.principal.as_deref(), Some("alice@EXAMPLE.COM"));
                assert_eq!(data.args, b"args");
            }
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn replayed_sequence_number_is_silently_dropped() {
        let p = processor();
        let handle = establish(&p);
        let header = b"h".to_vec();
        let verf = verf_for(&header);
        assert!(matches!(
            p.process(&data_cred(handle, 5), &header, &verf, b""),
            GssDisposition::Accepted(_)
        ));
        assert!(matches!(
            p.process(&data_cred(handle, 5), &header, &verf, b""),
            GssDisposition::Drop
        ));
    }

    #[test]
    fn sequence_below_window_is_dropped() {
        let p = processor();
        let handle = establish(&p);
        let header = b"h".to_vec();
        let verf = verf_for(&header);
        assert!(matches!(
            p.process(&data_cred(handle, 1000), &header, &verf, b""),
            GssDisposition::Accepted(_)
        ));
        assert!(matches!(
            p.process(&data_cred(handle, 1000 - DEFAULT_SEQ_WINDOW), &header, &verf, b""),
            GssDisposition::Drop
        ));
        // Still inside the window: accepted.
        assert!(matches!(
            p.process(&data_cred(handle, 1000 - DEFAULT_SEQ_WINDOW + 1), &header, &verf, b""),
            GssDisposition::Accepted(_)
        ));
    }

    #[test]
    fn expired_acceptor_reports_a_context_problem() {
        let p = processor();
        let args = serialize_to_vec(&b"expired".to_vec()).unwrap();
        assert!(matches!(
            p.process(&init_cred(), &[], &opaque_auth::default(), &args),
            GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM)
        ));
        // A broken token stays a credential problem.
        let args = serialize_to_vec(&b"bad".to_vec()).unwrap();
        assert!(matches!(
            p.process(&init_cred(), &[], &opaque_auth::default(), &args),
            GssDisposition::Deny(auth_stat::RPCSEC_GSS_CREDPROBLEM)
        ));
    }

    #[test]
    fn unknown_handle_is_a_context_problem() {
        let p = processor();
        let header = b"h".to_vec();
        assert!(matches!(
            p.process(&data_cred(77, 1), &header, &opaque_auth::default(), b""),
            GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM)
        ));
    }

    #[test]
    fn destroy_frees_the_context() {
        let p = processor();
        let handle = establish(&p);
        let mut cred = data_cred(handle, 1);
        cred.gss_proc = rpc_gss_proc::RPCSEC_GSS_DESTROY;
        assert!(matches!(
            p.process(&cred, &[], &opaque_auth::default(), &[]),
            GssDisposition::Control { .. }
        ));
        let header = b"h".to_vec();
        assert!(matches!(
            p.process(&data_cred(handle, 2), &header, &verf_for(&header), b""),
            GssDisposition::Deny(auth_stat::RPCSEC_GSS_CTXPROBLEM)
        ));
    }

    #[test]
    fn integrity_body_is_unwrapped_and_verified() {
        let p = processor();
        let handle = establish(&p);
        let mut cred = data_cred(handle, 3);
        cred.service = rpc_gss_service::rpc_gss_svc_integrity;

        let mut body = Vec::new();
        3u32.serialize(&mut body).unwrap();
        body.extend_from_slice(b"payload");
        let mic = TestMechanism.compute_mic(b"sekrit", true, &body);
        let mut args = Vec::new();
        write_opaque(&body, &mut args).unwrap();
        write_opaque(&mic, &mut args).unwrap();

        let header = b"h".to_vec();
        match p.process(&cred, &header, &verf_for(&header), &args) {
            GssDisposition::Accepted(data) => assert_eq!(data.args, b"payload"),
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn privacy_body_is_unsealed() {
        let p = processor();
        let handle = establish(&p);
        let mut cred = data_cred(handle, 4);
        cred.service = rpc_gss_service::rpc_gss_svc_privacy;

        let mut body = Vec::new();
        4u32.serialize(&mut body).unwrap();
        body.extend_from_slice(b"secret-args");
        let sealed = TestMechanism.wrap(b"sekrit", 4, &body);
        let mut args = Vec::new();
        write_opaque(&sealed, &mut args).unwrap();

        let header = b"h".to_vec();
        match p.process(&cred, &header, &verf_for(&header), &args) {
            GssDisposition::Accepted(data) => assert_eq!(data.args, b"secret-args"),
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn reply_protection_wraps_results_for_integrity() {
        let p = processor();
        let handle = establish(&p);
        let header = b"h".to_vec();
        let mut cred = data_cred(handle, 9);
        cred.service = rpc_gss_service::rpc_gss_svc_integrity;

        let mut body = Vec::new();
        9u32.serialize(&mut body).unwrap();
        let mic = TestMechanism.compute_mic(b"sekrit", true, &body);
        let mut args = Vec::new();
        write_opaque(&body, &mut args).unwrap();
        write_opaque(&mic, &mut args).unwrap();

        let GssDisposition::Accepted(data) = p.process(&cred, &header, &verf_for(&header), &args)
        else {
            panic!("expected acceptance");
        };
        let protected = data.reply.protect_results(b"results").unwrap();
        let mut cursor = Cursor::new(&protected);
        let wrapped_body = deserialize::<Vec<u8>>(&mut cursor).unwrap();
        assert_eq!(&wrapped_body[..4], &9u32.to_be_bytes());
        assert_eq!(&wrapped_body[4..], b"results");
        let verf = data.reply.reply_verifier();
        assert_eq!(verf.flavor, auth_flavor::RPCSEC_GSS);
    }

    #[test]
    fn multi_round_establishment_carries_state() {
        let p = processor();
        let args1 = serialize_to_vec(&b"round1".to_vec()).unwrap();
        let handle = match p.process(&init_cred(), &[], &opaque_auth::default(), &args1) {
            GssDisposition::Control { reply_body, .. } => {
                let res =
                    deserialize::<rpc_gss_init_res>(&mut Cursor::new(&reply_body)).unwrap();
                assert_eq!(res.gss_major, GSS_S_CONTINUE_NEEDED);
                assert_eq!(res.gss_token, b"challenge");
                u32::from_be_bytes(res.handle.try_into().unwrap())
            }
            _ => panic!("expected control reply"),
        };

        let mut cont = init_cred();
        cont.gss_proc = rpc_gss_proc::RPCSEC_GSS_CONTINUE_INIT;
        cont.handle = handle.to_be_bytes().to_vec();
        let args2 = serialize_to_vec(&b"ap-req-2".to_vec()).unwrap();
        match p.process(&cont, &[], &opaque_auth::default(), &args2) {
            GssDisposition::Control { reply_body, .. } => {
                let res =
                    deserialize::<rpc_gss_init_res>(&mut Cursor::new(&reply_body)).unwrap();
                assert_eq!(res.gss_major, GSS_S_COMPLETE);
            }
            _ => panic!("expected control reply"),
        }
    }
}

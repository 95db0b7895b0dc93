//! Request authentication.
//!
//! AUTH_NULL and AUTH_UNIX are interpreted inline; RPCSEC_GSS is driven by
//! [`gss::GssProcessor`]. A malformed AUTH_UNIX body is treated as "no
//! credentials" rather than rejected — handlers then apply default anonymous
//! access, which matches how permissive NFS servers behave toward broken
//! legacy clients.

pub mod gss;
pub mod identity;

use std::io::Cursor;

use smallvec::SmallVec;

use crate::protocol::xdr::rpc::{auth_flavor, auth_unix, opaque_auth};
use crate::protocol::xdr::{deserialize};

/// Identity bound to a request after credential processing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub flavor: auth_flavor,
    pub uid: u32,
    pub gid: u32,
    pub gids: SmallVec<[u32; 16]>,
    pub machine_name: Option<String>,
    /// GSS principal, when the request arrived under RPCSEC_GSS.
    pub principal: Option<String>,
}

impl Credentials {
    /// The identity used when no credential (or a broken one) is presented.
    pub fn anonymous() -> Self {
        Self {
            flavor: auth_flavor::AUTH_NULL,
            uid: u32::MAX,
            gid: u32::MAX,
            gids: SmallVec::new(),
            machine_name: None,
            principal: None,
        }
    }

    pub fn from_unix(unix: auth_unix) -> Self {
        let mut gids: SmallVec<[u32; 16]> = SmallVec::new();
        gids.extend(unix.gids.iter().copied().take(16));
        Self {
            flavor: auth_flavor::AUTH_UNIX,
            uid: unix.uid,
            gid: unix.gid,
            gids,
            machine_name: Some(String::from_utf8_lossy(&unix.machinename).into_owned()),
            principal: None,
        }
    }

    /// True when an actual identity (not the anonymous fallback) is bound.
    pub fn is_authenticated(&self) -> bool {
        self.flavor != auth_flavor::AUTH_NULL || self.principal.is_some()
    }

    pub fn is_member_of(&self, gid: u32) -> bool {
        self.gid == gid || self.gids.contains(&gid)
    }
}

/// Interprets an AUTH_NULL or AUTH_UNIX credential.
///
/// RPCSEC_GSS credentials are routed to the GSS processor by the dispatch
/// layer before this is consulted.
pub fn interpret_credential(cred: &opaque_auth) -> Credentials {
    match cred.flavor {
        auth_flavor::AUTH_UNIX => {
            match deserialize::<auth_unix>(&mut Cursor::new(&cred.body)) {
                Ok(unix) => Credentials::from_unix(unix),
                // Malformed body: degrade, do not reject.
                Err(_) => Credentials::anonymous(),
            }
        }
        _ => Credentials::anonymous(),
    }
}

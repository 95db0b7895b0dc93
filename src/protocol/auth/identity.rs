//! Principal-to-local-identity mapping for RPCSEC_GSS.
//!
//! Strategies are pluggable behind [`IdentityMapper`]; any of them can be
//! wrapped in a TTL cache keyed by the principal string so hot principals
//! skip the lookup path.

use std::sync::Arc;
use std::time::Duration;

use crate::settings::{IdentityEntry, IdentityMappingMode, KerberosSettings};

/// Resolved local identity for a principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalIdentity {
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}

pub trait IdentityMapper: Send + Sync {
    /// Maps a principal such as `alice@EXAMPLE.COM`. `None` means the
    /// caller falls back to the anonymous identity.
    fn map(&self, principal: &str) -> Option<LocalIdentity>;
}

/// Static `principal -> identity` table.
pub struct StaticMap {
    entries: Vec<IdentityEntry>,
}

impl StaticMap {
    pub fn new(entries: Vec<IdentityEntry>) -> Self {
        Self { entries }
    }
}

impl IdentityMapper for StaticMap {
    fn map(&self, principal: &str) -> Option<LocalIdentity> {
        self.entries.iter().find(|e| e.principal == principal).map(|e| LocalIdentity {
            uid: e.uid,
            gid: e.gid,
            gids: e.gids.clone(),
        })
    }
}

/// Callback used by [`RealmStrip`] to resolve a bare user name.
pub type NameResolver = Arc<dyn Fn(&str) -> Option<LocalIdentity> + Send + Sync>;

/// Strips `@REALM` when the realm matches and resolves the bare name.
pub struct RealmStrip {
    realm: String,
    resolver: NameResolver,
}

impl RealmStrip {
    pub fn new(realm: String, resolver: NameResolver) -> Self {
        Self { realm, resolver }
    }
}

impl IdentityMapper for RealmStrip {
    fn map(&self, principal: &str) -> Option<LocalIdentity> {
        let (name, realm) = principal.split_once('@')?;
        if !realm.eq_ignore_ascii_case(&self.realm) {
            return None;
        }
        (self.resolver)(name)
    }
}

/// TTL cache wrapper, usable around any mapper. Negative results are cached
/// too, so repeated unknown principals do not hammer the inner mapper.
pub struct CachedMapper {
    inner: Arc<dyn IdentityMapper>,
    cache: moka::sync::Cache<String, Option<LocalIdentity>>,
}

impl CachedMapper {
    pub fn new(inner: Arc<dyn IdentityMapper>, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: moka::sync::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl IdentityMapper for CachedMapper {
    fn map(&self, principal: &str) -> Option<LocalIdentity> {
        self.cache
            .get_with(principal.to_string(), || self.inner.map(principal))
    }
}

/// Builds the mapper described by the kerberos settings block.
pub fn mapper_from_settings(settings: &KerberosSettings) -> Arc<dyn IdentityMapper> {
    let inner: Arc<dyn IdentityMapper> = match settings.identity_mapping {
        IdentityMappingMode::Static => Arc::new(StaticMap::new(settings.identity_table.clone())),
        IdentityMappingMode::RealmStrip => {
            let table = StaticMap::new(settings.identity_table.clone());
            let realm = settings.realm.clone().unwrap_or_default();
            Arc::new(RealmStrip::new(
                realm.clone(),
                Arc::new(move |name: &str| table.map(&format!("{name}@{realm}"))),
            ))
        }
    };
    Arc::new(CachedMapper::new(inner, 4096, Duration::from_secs(300)))
}

//! Adapter configuration and hot-reload plumbing.
//!
//! The full settings tree deserializes from TOML. A [`SettingsHandle`] wraps
//! a watch channel: readers load the current snapshot without locking, the
//! reload path swaps in a new snapshot and every holder observes it on the
//! next read. Lease time, grace period, delegation policy, the notification
//! batch window and the operation blocklist all propagate live; listener
//! addresses only take effect at start.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;

use crate::error::Error;

fn default_port() -> u16 {
    2049
}

fn default_max_requests() -> usize {
    100
}

fn default_read_secs() -> u64 {
    300
}

fn default_write_secs() -> u64 {
    30
}

fn default_idle_secs() -> u64 {
    300
}

fn default_shutdown_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_portmap_port() -> u16 {
    10111
}

fn default_lease_secs() -> u64 {
    90
}

fn default_batch_window_ms() -> u64 {
    50
}

fn default_max_contexts() -> u64 {
    1024
}

fn default_context_ttl_secs() -> u64 {
    8 * 3600
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Per-request read deadline, seconds.
    pub read: u64,
    /// Per-reply write deadline, seconds.
    pub write: u64,
    /// Idle connection reaper, seconds.
    pub idle: u64,
    /// Graceful drain window, seconds.
    pub shutdown: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: default_read_secs(),
            write: default_write_secs(),
            idle: default_idle_secs(),
            shutdown: default_shutdown_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortmapSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for PortmapSettings {
    fn default() -> Self {
        Self { enabled: default_true(), port: default_portmap_port() }
    }
}

/// Identity mapping strategy selector for RPCSEC_GSS principals.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMappingMode {
    /// Static `principal -> identity` table with an anonymous fallback.
    #[default]
    Static,
    /// Strip `@REALM` for the configured realm and resolve the bare name.
    RealmStrip,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdentityEntry {
    pub principal: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub gids: Vec<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KerberosSettings {
    pub keytab: Option<String>,
    pub service_principal: Option<String>,
    pub max_contexts: u64,
    pub context_ttl: u64,
    pub identity_mapping: IdentityMappingMode,
    pub realm: Option<String>,
    pub identity_table: Vec<IdentityEntry>,
    /// UID/GID applied when no mapping matches.
    pub anonymous_uid: u32,
    pub anonymous_gid: u32,
}

impl Default for KerberosSettings {
    fn default() -> Self {
        Self {
            keytab: None,
            service_principal: None,
            max_contexts: default_max_contexts(),
            context_ttl: default_context_ttl_secs(),
            identity_mapping: IdentityMappingMode::default(),
            realm: None,
            identity_table: Vec::new(),
            anonymous_uid: 65534,
            anonymous_gid: 65534,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NfsSettings {
    /// v4 lease duration, seconds.
    pub lease_time: u64,
    /// v4 grace window, seconds. Defaults to the lease time when zero.
    pub grace_period: u64,
    pub delegations_enabled: bool,
    pub max_delegations: usize,
    /// Directory delegation notification batch window, milliseconds.
    pub dir_deleg_batch_window_ms: u64,
    /// Procedure names answered with NFS3ERR_NOTSUPP.
    pub blocked_operations: Vec<String>,
}

impl Default for NfsSettings {
    fn default() -> Self {
        Self {
            lease_time: default_lease_secs(),
            grace_period: 0,
            delegations_enabled: true,
            max_delegations: 1024,
            dir_deleg_batch_window_ms: default_batch_window_ms(),
            blocked_operations: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub port: u16,
    pub bind_address: String,
    /// Global connection cap; 0 means unlimited.
    pub max_connections: usize,
    pub max_requests_per_connection: usize,
    pub timeouts: Timeouts,
    pub portmapper: PortmapSettings,
    pub kerberos: KerberosSettings,
    pub nfs: NfsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: "0.0.0.0".to_string(),
            max_connections: 0,
            max_requests_per_connection: default_max_requests(),
            timeouts: Timeouts::default(),
            portmapper: PortmapSettings::default(),
            kerberos: KerberosSettings::default(),
            nfs: NfsSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| Error::config(format!("bad settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.timeouts.shutdown == 0 {
            return Err(Error::config("timeouts.shutdown must be positive"));
        }
        if self.max_requests_per_connection == 0 {
            return Err(Error::config("max_requests_per_connection must be positive"));
        }
        if self.nfs.lease_time == 0 {
            return Err(Error::config("nfs.lease_time must be positive"));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.read)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.write)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.idle)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.shutdown)
    }

    pub fn lease_time(&self) -> Duration {
        Duration::from_secs(self.nfs.lease_time)
    }

    pub fn grace_period(&self) -> Duration {
        if self.nfs.grace_period == 0 {
            self.lease_time()
        } else {
            Duration::from_secs(self.nfs.grace_period)
        }
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.nfs.dir_deleg_batch_window_ms)
    }

    pub fn blocked_operations(&self) -> HashSet<String> {
        self.nfs.blocked_operations.iter().map(|s| s.to_ascii_uppercase()).collect()
    }
}

/// Shared, hot-reloadable view of the settings.
#[derive(Clone)]
pub struct SettingsHandle {
    rx: watch::Receiver<Arc<Settings>>,
    tx: Arc<watch::Sender<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        let (tx, rx) = watch::channel(Arc::new(settings));
        Self { rx, tx: Arc::new(tx) }
    }

    /// Loads the current snapshot without blocking writers.
    pub fn load(&self) -> Arc<Settings> {
        self.rx.borrow().clone()
    }

    /// Swaps in new settings after validation; all holders observe them on
    /// their next `load`.
    pub fn reload(&self, settings: Settings) -> Result<(), Error> {
        settings.validate()?;
        self.tx.send_replace(Arc::new(settings));
        Ok(())
    }

    /// A receiver that can await changes (used by the v4 state manager).
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.port, 2049);
        assert_eq!(s.max_connections, 0);
        assert_eq!(s.max_requests_per_connection, 100);
        assert_eq!(s.timeouts.read, 300);
        assert_eq!(s.timeouts.write, 30);
        assert_eq!(s.timeouts.idle, 300);
        assert_eq!(s.timeouts.shutdown, 30);
        assert!(s.portmapper.enabled);
        assert_eq!(s.portmapper.port, 10111);
        assert_eq!(s.nfs.dir_deleg_batch_window_ms, 50);
    }

    #[test]
    fn zero_shutdown_timeout_is_rejected() {
        let mut s = Settings::default();
        s.timeouts.shutdown = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn toml_round_trip_with_blocklist() {
        let s = Settings::from_toml(
            r#"
            port = 3049
            [nfs]
            lease_time = 60
            blocked_operations = ["Write", "remove"]
            "#,
        )
        .unwrap();
        assert_eq!(s.port, 3049);
        assert_eq!(s.nfs.lease_time, 60);
        let blocked = s.blocked_operations();
        assert!(blocked.contains("WRITE"));
        assert!(blocked.contains("REMOVE"));
    }

    #[test]
    fn grace_period_defaults_to_lease_time() {
        let s = Settings::default();
        assert_eq!(s.grace_period(), s.lease_time());
    }

    #[test]
    fn reload_is_observed_by_existing_handles() {
        let handle = SettingsHandle::new(Settings::default());
        let other = handle.clone();
        let mut next = Settings::default();
        next.nfs.lease_time = 42;
        handle.reload(next).unwrap();
        assert_eq!(other.load().nfs.lease_time, 42);
    }
}

//! Configuring Herald.
//!
//! The configuration file is TOML.  It is deliberately small: it names the
//! zones, how they are sourced and secured, and where runtime files live.
//! Everything here is read once at startup and again on `reload`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use camino::Utf8PathBuf;
use herald_wire::Name;
use serde::Deserialize;

use crate::util::deserialize_duration_from_secs;

//----------- Config -----------------------------------------------------------

/// The server configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Addresses to serve DNS on.
    #[serde(default = "default_listen")]
    pub listen: Vec<SocketAddr>,

    /// The control channel.
    #[serde(default)]
    pub control: ControlConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where journals are kept.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: Utf8PathBuf,

    /// TSIG keys, by name.
    #[serde(default, rename = "key")]
    pub keys: Vec<TsigKeyConfig>,

    /// The served zones.
    #[serde(default, rename = "zone")]
    pub zones: Vec<ZoneConfig>,
}

impl Config {
    /// Load the configuration from a TOML file.
    pub fn load(path: &Utf8PathBuf) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("could not read '{path}': {err}"))?;
        toml::from_str(&text).map_err(|err| format!("could not parse '{path}': {err}"))
    }

    /// The configuration of a single zone.
    pub fn zone(&self, name: &Name) -> Option<&ZoneConfig> {
        self.zones.iter().find(|zone| &zone.name == name)
    }
}

fn default_listen() -> Vec<SocketAddr> {
    vec!["127.0.0.1:53".parse().expect("a valid socket address")]
}

fn default_journal_dir() -> Utf8PathBuf {
    "journal".into()
}

//----------- ControlConfig ----------------------------------------------------

/// Configuration of the control channel.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    /// The UNIX socket path to listen on.
    ///
    /// Mutually exclusive with `listen_tcp`; if neither is set, the control
    /// channel is disabled.
    pub listen: Option<Utf8PathBuf>,

    /// A TCP address to listen on instead of a UNIX socket.
    pub listen_tcp: Option<SocketAddr>,

    /// The TSIG key controllers must present.
    ///
    /// Mandatory for TCP; optional over a UNIX socket, where filesystem
    /// permissions already gate access.
    pub key: Option<Name>,
}

//----------- LoggingConfig ----------------------------------------------------

/// Configuration of logging.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// The minimum level to log.
    #[serde(default)]
    pub level: LogLevel,

    /// Where log output goes.
    #[serde(default)]
    pub target: LogTarget,

    /// Additional per-module filter directives.
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

/// A log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// A log output target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LogTarget {
    /// Log to standard error.
    #[default]
    Stderr,

    /// Append to a file.
    File(Utf8PathBuf),
}

//----------- TsigKeyConfig ----------------------------------------------------

/// A configured TSIG key.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TsigKeyConfig {
    /// The key name.
    pub name: Name,

    /// The MAC algorithm (e.g. `hmac-sha256`).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// The shared secret, base64-encoded.
    pub secret: String,
}

fn default_algorithm() -> String {
    "hmac-sha256".into()
}

//----------- ZoneConfig -------------------------------------------------------

/// The configuration of a single zone.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    /// The zone name.
    pub name: Name,

    /// The zone file.
    ///
    /// For a primary zone, it is loaded at startup; for a secondary zone it
    /// is where FLUSH persists the transferred contents.
    pub file: Option<Utf8PathBuf>,

    /// The masters to transfer the zone from.
    ///
    /// A zone with at least one master is a secondary zone.
    #[serde(default, rename = "master")]
    pub masters: Vec<MasterConfig>,

    /// Addresses to send NOTIFY to when the zone changes.
    #[serde(default)]
    pub notify: Vec<SocketAddr>,

    /// Who may transfer the zone.
    #[serde(default)]
    pub allow_transfer: Vec<AclEntryConfig>,

    /// Who may send dynamic updates.
    #[serde(default)]
    pub allow_update: Vec<AclEntryConfig>,

    /// Who may send NOTIFY for this zone.
    #[serde(default)]
    pub allow_notify: Vec<AclEntryConfig>,

    /// DNSSEC settings; absent means the zone is served unsigned.
    pub dnssec: Option<DnssecConfig>,

    /// How long modified contents may stay unflushed, in seconds.
    ///
    /// Zero means every update is flushed to the zone file immediately.
    #[serde(
        default = "default_dbsync_timeout",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub dbsync_timeout: Duration,
}

impl ZoneConfig {
    /// A minimal configuration for `name`, used by tests and reloads.
    pub fn minimal(name: Name) -> Self {
        Self {
            name,
            file: None,
            masters: Vec::new(),
            notify: Vec::new(),
            allow_transfer: Vec::new(),
            allow_update: Vec::new(),
            allow_notify: Vec::new(),
            dnssec: None,
            dbsync_timeout: default_dbsync_timeout(),
        }
    }

    /// Whether this zone is a secondary.
    pub fn is_secondary(&self) -> bool {
        !self.masters.is_empty()
    }
}

fn default_dbsync_timeout() -> Duration {
    Duration::from_secs(3600)
}

//----------- MasterConfig -----------------------------------------------------

/// A master server a secondary zone transfers from.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    /// The master's address.
    pub addr: SocketAddr,

    /// The TSIG key to sign transfer traffic with.
    pub key: Option<Name>,

    /// A local address to bind outgoing connections to.
    pub source: Option<IpAddr>,
}

//----------- AclEntryConfig ---------------------------------------------------

/// One entry of an access control list.
///
/// An entry matches when the peer address is within `addr` (if given) and
/// the request is signed with `key` (if given).  An entry with neither
/// matches everything, which is only sensible on trusted interfaces.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclEntryConfig {
    /// The network the peer must come from.
    pub addr: Option<ipnet::IpNet>,

    /// The TSIG key the request must be signed with.
    pub key: Option<Name>,
}

//----------- DnssecConfig -----------------------------------------------------

/// DNSSEC settings for a zone.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnssecConfig {
    /// The directory holding the zone's key pairs.
    pub key_dir: Utf8PathBuf,

    /// How long generated signatures are valid, in seconds.
    #[serde(
        default = "default_sig_validity",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub sig_validity: Duration,

    /// How long before expiry signatures are refreshed, in seconds.
    #[serde(
        default = "default_sig_refresh",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub sig_refresh: Duration,
}

fn default_sig_validity() -> Duration {
    // Two weeks, the customary default.
    Duration::from_secs(14 * 24 * 3600)
}

fn default_sig_refresh() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_example() {
        let config: Config = toml::from_str(
            r#"
            listen = ["127.0.0.1:5300"]
            journal_dir = "/var/lib/herald/journal"

            [control]
            listen = "/run/herald/control.sock"

            [logging]
            level = "debug"

            [[key]]
            name = "xfer-key."
            algorithm = "hmac-sha256"
            secret = "c2VjcmV0c2VjcmV0c2VjcmV0c2VjcmV0"

            [[zone]]
            name = "example.org."
            file = "zones/example.org.zone"
            notify = ["192.0.2.10:53"]
            allow_update = [{ addr = "192.0.2.0/24", key = "xfer-key." }]

            [[zone]]
            name = "example.net."
            [[zone.master]]
            addr = "192.0.2.1:53"
            key = "xfer-key."
            "#,
        )
        .unwrap();

        assert_eq!(config.zones.len(), 2);
        assert!(!config.zones[0].is_secondary());
        assert!(config.zones[1].is_secondary());
        assert_eq!(
            config.control.listen.as_deref(),
            Some(camino::Utf8Path::new("/run/herald/control.sock"))
        );
        let entry = &config.zones[0].allow_update[0];
        assert!(entry.addr.unwrap().contains(&"192.0.2.7".parse::<IpAddr>().unwrap()));
    }
}

//! Configuration model and index-aligned resolution.
//!
//! A relay is configured with two parallel arrays: bindings (where to
//! listen) and listenings (the default target for each binding). Values come
//! from an optional JSON file and are then overridden per index from the
//! command line. Scalar settings are shared read-only by every session.

use crate::error::{RelayError, RelayResult};
use crate::route::DEFAULT_ROUTE_HEADER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_BIND_PORT: u16 = 8880;
pub const DEFAULT_TARGET_HOST: &str = "127.0.0.1";
pub const DEFAULT_TARGET_PORT: u16 = 22;
pub const DEFAULT_BUFFER_SIZE: usize = 4096 * 4;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RESPONSE: &str =
    "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

/// A configured listen address/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub address: String,
    pub port: u16,
}

impl Binding {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Socket address string suitable for `TcpListener::bind`.
    pub fn socket_addr(&self) -> String {
        join_host_port(&self.address, self.port)
    }
}

impl Default for Binding {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_ADDR, DEFAULT_BIND_PORT)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr())
    }
}

/// A destination host/port. Used both for the per-binding default target
/// ("listening") and for a destination named by the routing header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address string suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr())
    }
}

/// Bracket IPv6 literals so the result parses as `host:port`.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// A command-line `index:host:port` override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEndpoint {
    pub index: usize,
    pub host: String,
    pub port: u16,
}

impl FromStr for IndexedEndpoint {
    type Err = RelayError;

    /// Parse `index:host:port`. The host may be an IPv6 literal, with or
    /// without brackets, since the port is split off the right-hand side.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RelayError::InvalidEndpoint(format!("expected index:host:port, got '{s}'"));

        let (index, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;

        let index: usize = index.trim().parse().map_err(|_| invalid())?;
        let port = parse_port(port.trim()).ok_or_else(invalid)?;
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            index,
            host: host.to_string(),
            port,
        })
    }
}

/// Parse a port in the range 1-65535.
pub(crate) fn parse_port(s: &str) -> Option<u16> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// JSON configuration file structure.
///
/// `bindings` and `listenings` are required; every scalar is optional and
/// falls back to the built-in default.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub bindings: Vec<Binding>,
    pub listenings: Vec<Target>,
    /// Relay buffer size in bytes.
    pub buffer: Option<usize>,
    /// Idle timeout in seconds.
    pub timeout: Option<u64>,
    /// Handshake text written to the client after the target is dialed.
    pub response: Option<String>,
    pub route_header: Option<String>,
    /// Target dial timeout in seconds.
    pub connect_timeout: Option<u64>,
}

impl ConfigFile {
    pub fn from_json(content: &str) -> RelayResult<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Shared, read-only settings for every listener and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Maximum bytes read per chunk, per direction.
    pub buffer_size: usize,
    /// Maximum time with no bytes forwarded before a tunnel is closed.
    pub idle_timeout: Duration,
    /// Bytes written verbatim to the client once the target is connected.
    pub response: Vec<u8>,
    /// Header name (matched case-insensitively) that reroutes a session.
    pub route_header: String,
    /// Bound on the target dial. `None` leaves it to the OS.
    pub connect_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            response: DEFAULT_RESPONSE.as_bytes().to_vec(),
            route_header: DEFAULT_ROUTE_HEADER.to_string(),
            connect_timeout: None,
        }
    }
}

/// Command-line scalar overrides. They win over file values.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub buffer_size: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub route_header: Option<String>,
}

/// Resolved configuration: index-aligned bindings and default targets plus
/// the shared settings. Immutable once built.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bindings: Vec<Binding>,
    pub targets: Vec<Target>,
    pub settings: Settings,
}

impl RelayConfig {
    /// Merge the optional file with command-line overrides.
    ///
    /// File values are the base. An override at index `i` replaces entry
    /// `i`, padding the array with defaults when it is shorter. Targets are
    /// finally padded to the number of bindings.
    pub fn resolve(
        file: Option<ConfigFile>,
        bind_overrides: &[IndexedEndpoint],
        listen_overrides: &[IndexedEndpoint],
        overrides: SettingsOverrides,
    ) -> RelayResult<Self> {
        let mut settings = Settings::default();
        let (mut bindings, mut targets) = match file {
            Some(file) => {
                if let Some(buffer) = file.buffer {
                    settings.buffer_size = buffer;
                }
                if let Some(timeout) = file.timeout {
                    settings.idle_timeout = Duration::from_secs(timeout);
                }
                if let Some(response) = file.response {
                    settings.response = response.into_bytes();
                }
                if let Some(header) = file.route_header {
                    settings.route_header = header;
                }
                settings.connect_timeout = file.connect_timeout.map(Duration::from_secs);
                (file.bindings, file.listenings)
            }
            None => (Vec::new(), Vec::new()),
        };

        apply_overrides(&mut bindings, bind_overrides, |o| Binding::new(&o.host, o.port));
        apply_overrides(&mut targets, listen_overrides, |o| Target::new(&o.host, o.port));

        if targets.len() < bindings.len() {
            debug!(
                bindings = bindings.len(),
                targets = targets.len(),
                "padding missing default targets"
            );
            targets.resize_with(bindings.len(), Target::default);
        }

        if let Some(v) = overrides.buffer_size {
            settings.buffer_size = v;
        }
        if let Some(v) = overrides.idle_timeout_secs {
            settings.idle_timeout = Duration::from_secs(v);
        }
        if let Some(v) = overrides.connect_timeout_secs {
            settings.connect_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = overrides.route_header {
            settings.route_header = v;
        }

        let config = Self {
            bindings,
            targets,
            settings,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RelayResult<()> {
        if self.bindings.is_empty() {
            return Err(RelayError::Config("no bindings configured".into()));
        }
        for (i, b) in self.bindings.iter().enumerate() {
            if b.port == 0 {
                return Err(RelayError::Config(format!("binding {i}: port must be 1-65535")));
            }
            if b.address.is_empty() {
                return Err(RelayError::Config(format!("binding {i}: empty address")));
            }
        }
        for (i, t) in self.targets.iter().enumerate() {
            if t.port == 0 {
                return Err(RelayError::Config(format!("listening {i}: port must be 1-65535")));
            }
            if t.host.is_empty() {
                return Err(RelayError::Config(format!("listening {i}: empty host")));
            }
        }
        if self.settings.buffer_size == 0 {
            return Err(RelayError::Config("buffer size must be positive".into()));
        }
        if self.settings.idle_timeout.is_zero() {
            return Err(RelayError::Config("timeout must be positive".into()));
        }
        if self.settings.route_header.trim().is_empty() {
            return Err(RelayError::Config("route header name is empty".into()));
        }
        Ok(())
    }

    /// The default target paired with binding `index`.
    pub fn target_for(&self, index: usize) -> Target {
        self.targets.get(index).cloned().unwrap_or_default()
    }
}

/// Replace entries by index, growing `entries` with `T::default()` first if
/// an index lies past the end.
fn apply_overrides<T, F>(entries: &mut Vec<T>, overrides: &[IndexedEndpoint], make: F)
where
    T: Default,
    F: Fn(&IndexedEndpoint) -> T,
{
    for o in overrides {
        if entries.len() <= o.index {
            entries.resize_with(o.index + 1, T::default);
        }
        entries[o.index] = make(o);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> IndexedEndpoint {
        s.parse().unwrap()
    }

    #[test]
    fn parse_indexed_endpoint() {
        let e = ep("1:0.0.0.0:8080");
        assert_eq!(e.index, 1);
        assert_eq!(e.host, "0.0.0.0");
        assert_eq!(e.port, 8080);
    }

    #[test]
    fn parse_indexed_endpoint_ipv6() {
        assert_eq!(ep("0:[::1]:22").host, "::1");
        assert_eq!(ep("0:::1:22").host, "::1");
    }

    #[test]
    fn parse_indexed_endpoint_rejects_malformed() {
        assert!("0:127.0.0.1".parse::<IndexedEndpoint>().is_err());
        assert!("x:127.0.0.1:22".parse::<IndexedEndpoint>().is_err());
        assert!("0:127.0.0.1:port".parse::<IndexedEndpoint>().is_err());
        assert!("0:127.0.0.1:0".parse::<IndexedEndpoint>().is_err());
        assert!("0:127.0.0.1:70000".parse::<IndexedEndpoint>().is_err());
        assert!("0::22".parse::<IndexedEndpoint>().is_err());
        assert!("".parse::<IndexedEndpoint>().is_err());
    }

    #[test]
    fn cli_only_config() {
        let cfg = RelayConfig::resolve(
            None,
            &[ep("0:0.0.0.0:80")],
            &[ep("0:127.0.0.1:22")],
            SettingsOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.bindings, vec![Binding::new("0.0.0.0", 80)]);
        assert_eq!(cfg.targets, vec![Target::new("127.0.0.1", 22)]);
        assert_eq!(cfg.settings, Settings::default());
    }

    #[test]
    fn override_past_end_pads_with_defaults() {
        let file = ConfigFile::from_json(
            r#"{"bindings":[{"address":"10.0.0.1","port":1000}],
                "listenings":[{"host":"backend","port":2000}]}"#,
        )
        .unwrap();
        let cfg = RelayConfig::resolve(
            Some(file),
            &[ep("2:0.0.0.0:3000")],
            &[],
            SettingsOverrides::default(),
        )
        .unwrap();

        assert_eq!(cfg.bindings.len(), 3);
        assert_eq!(cfg.bindings[0], Binding::new("10.0.0.1", 1000));
        assert_eq!(cfg.bindings[1], Binding::default());
        assert_eq!(cfg.bindings[2], Binding::new("0.0.0.0", 3000));

        assert_eq!(cfg.targets.len(), 3);
        assert_eq!(cfg.targets[0], Target::new("backend", 2000));
        assert_eq!(cfg.targets[1], Target::default());
        assert_eq!(cfg.targets[2], Target::default());
    }

    #[test]
    fn override_replaces_only_its_index() {
        let file = ConfigFile::from_json(
            r#"{"bindings":[{"address":"a","port":1},{"address":"b","port":2}],
                "listenings":[{"host":"x","port":10},{"host":"y","port":20}]}"#,
        )
        .unwrap();
        let cfg = RelayConfig::resolve(
            Some(file),
            &[ep("1:c:3")],
            &[ep("0:z:30")],
            SettingsOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.bindings, vec![Binding::new("a", 1), Binding::new("c", 3)]);
        assert_eq!(cfg.targets, vec![Target::new("z", 30), Target::new("y", 20)]);
    }

    #[test]
    fn later_override_wins_for_same_index() {
        let cfg = RelayConfig::resolve(
            None,
            &[ep("0:a:1"), ep("0:b:2")],
            &[],
            SettingsOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.bindings, vec![Binding::new("b", 2)]);
    }

    #[test]
    fn file_scalars_and_cli_precedence() {
        let file = ConfigFile::from_json(
            r#"{"bindings":[{"address":"0.0.0.0","port":80}],
                "listenings":[],
                "buffer":1024,
                "timeout":5,
                "response":"HTTP/1.1 200 OK\r\n\r\n",
                "connect_timeout":3}"#,
        )
        .unwrap();
        let cfg = RelayConfig::resolve(
            Some(file),
            &[],
            &[],
            SettingsOverrides {
                buffer_size: Some(2048),
                route_header: Some("X-Target".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.settings.buffer_size, 2048);
        assert_eq!(cfg.settings.idle_timeout, Duration::from_secs(5));
        assert_eq!(cfg.settings.response, b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
        assert_eq!(cfg.settings.route_header, "X-Target");
        assert_eq!(cfg.settings.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(cfg.target_for(0), Target::default());
    }

    #[test]
    fn missing_required_field_is_error() {
        assert!(ConfigFile::from_json(r#"{"bindings":[]}"#).is_err());
        assert!(ConfigFile::from_json(r#"{"bindings":[{"address":"a"}],"listenings":[]}"#).is_err());
        assert!(ConfigFile::from_json("not json").is_err());
    }

    #[test]
    fn validation_failures() {
        let none = |o: SettingsOverrides| RelayConfig::resolve(None, &[ep("0:a:1")], &[], o);

        assert!(RelayConfig::resolve(None, &[], &[], SettingsOverrides::default()).is_err());
        assert!(none(SettingsOverrides {
            buffer_size: Some(0),
            ..Default::default()
        })
        .is_err());
        assert!(none(SettingsOverrides {
            idle_timeout_secs: Some(0),
            ..Default::default()
        })
        .is_err());
        assert!(none(SettingsOverrides {
            route_header: Some(" ".into()),
            ..Default::default()
        })
        .is_err());

        let file = ConfigFile::from_json(
            r#"{"bindings":[{"address":"0.0.0.0","port":0}],"listenings":[]}"#,
        )
        .unwrap();
        assert!(RelayConfig::resolve(Some(file), &[], &[], SettingsOverrides::default()).is_err());
    }

    #[test]
    fn socket_addr_brackets_ipv6() {
        assert_eq!(Target::new("::1", 22).socket_addr(), "[::1]:22");
        assert_eq!(Binding::new("0.0.0.0", 80).to_string(), "0.0.0.0:80");
    }
}

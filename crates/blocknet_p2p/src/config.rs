//! Network configuration for a blockchain node's P2P layer.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::PeerAddress;
use crate::error::NetworkError;

/// Default service port; discovery probes the same port on every candidate.
pub const DEFAULT_PORT: u16 = 8888;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Configuration for the P2P networking layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on for incoming peer connections.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// Host other nodes should use to reach us. Derived from the listen
    /// address or the local interfaces when unset.
    pub advertise_host: Option<String>,

    /// Whether subnet discovery runs on start.
    pub discovery_enabled: bool,

    /// Subnet sweep tuning.
    pub discovery: DiscoveryConfig,

    /// Timeout for establishing an outbound connection.
    #[serde(with = "duration_ms_serde")]
    pub connect_timeout: Duration,

    /// Timeout for writing one envelope to a peer.
    #[serde(with = "duration_ms_serde")]
    pub write_timeout: Duration,

    /// A peer that sends nothing for this long is dropped.
    #[serde(with = "duration_ms_serde")]
    pub idle_timeout: Duration,

    /// Interval between keep-alive registrations sent to every peer.
    #[serde(with = "duration_ms_serde")]
    pub keepalive_interval: Duration,

    /// How long `stop()` waits for background tasks before aborting them.
    #[serde(with = "duration_ms_serde")]
    pub shutdown_grace: Duration,

    /// Largest accepted frame, in bytes.
    pub max_frame_len: usize,

    /// Peers paired once on startup.
    pub known_peers: Vec<PeerAddress>,
}

/// Tuning for the subnet sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum number of candidate pairings in flight.
    pub fan_out: usize,

    /// Cap on candidates probed per interface.
    pub max_candidates_per_interface: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            fan_out: 32,
            max_candidates_per_interface: 1024,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            advertise_host: None,
            discovery_enabled: true,
            discovery: DiscoveryConfig::default(),
            connect_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(90),
            keepalive_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            known_peers: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// Default config listening on the given port.
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Self::default()
        }
    }

    /// Config for an isolated node on loopback with an ephemeral port and
    /// discovery disabled. Used for running several nodes in one process.
    pub fn loopback() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            discovery_enabled: false,
            ..Self::default()
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.discovery.fan_out == 0 {
            return Err(NetworkError::Config("discovery.fan_out must be > 0".into()));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("write_timeout", self.write_timeout),
            ("idle_timeout", self.idle_timeout),
            ("keepalive_interval", self.keepalive_interval),
        ] {
            if value.is_zero() {
                return Err(NetworkError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.keepalive_interval >= self.idle_timeout {
            return Err(NetworkError::Config(
                "keepalive_interval must be shorter than idle_timeout".into(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(NetworkError::Config("max_frame_len must be > 0".into()));
        }
        Ok(())
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<NetworkConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert!(config.discovery_enabled);
        assert_eq!(config.discovery.fan_out, 32);
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert!(config.known_peers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_port() {
        let config = NetworkConfig::with_port(9100);
        assert_eq!(config.listen_addr.port(), 9100);
        assert!(config.listen_addr.ip().is_unspecified());
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let mut config = NetworkConfig::default();
        config.keepalive_interval = config.idle_timeout;
        assert!(matches!(config.validate(), Err(NetworkError::Config(_))));

        let mut config = NetworkConfig::default();
        config.discovery.fan_out = 0;
        assert!(config.validate().is_err());

        let mut config = NetworkConfig::default();
        config.write_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: NetworkConfig =
            serde_json::from_str(r#"{"listen_addr":"127.0.0.1:7000","idle_timeout":1500}"#)
                .unwrap();
        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.idle_timeout, Duration::from_millis(1500));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("p2p.json");

        let mut saved = NetworkConfig::default();
        saved.discovery.fan_out = 8;
        saved.known_peers = vec![PeerAddress::new("192.168.1.100", 8888)];
        saved.save_to_file(&path).unwrap();

        let loaded = NetworkConfig::load_or_default(&path);
        assert_eq!(loaded.discovery.fan_out, 8);
        assert_eq!(loaded.known_peers, saved.known_peers);
    }

    #[test]
    fn test_config_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = NetworkConfig::load_or_default(&dir.path().join("missing.json"));
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
    }
}

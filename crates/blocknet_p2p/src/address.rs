//! Peer addressing: the host/port pair that keys the registry.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::DEFAULT_PORT;
use crate::error::NetworkError;

/// The network address of a peer node.
///
/// Two addresses are equal only when both host and port match exactly, so
/// `localhost:8888` and `127.0.0.1:8888` are distinct registry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        Self { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host parsed as an IP address, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Parse a registration payload. A bare host means the peer listens on
    /// the default service port.
    pub fn parse_advertised(s: &str) -> Result<Self, NetworkError> {
        let s = s.trim();
        match s.parse::<Self>() {
            Ok(addr) => Ok(addr),
            Err(_) if !s.is_empty() && !s.contains(char::is_whitespace) => {
                if s.parse::<IpAddr>().is_ok() || !s.contains(':') {
                    Ok(Self::new(s, DEFAULT_PORT))
                } else {
                    Err(NetworkError::InvalidAddress(s.to_string()))
                }
            }
            Err(e) => Err(e),
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for PeerAddress {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::InvalidAddress(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        // An unbracketed IPv6 literal has no unambiguous port separator.
        if !host.starts_with('[') && host.contains(':') {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: PeerAddress = "192.168.1.20:8888".parse().unwrap();
        assert_eq!(addr.host(), "192.168.1.20");
        assert_eq!(addr.port(), 8888);
        assert_eq!(addr.to_string(), "192.168.1.20:8888");
    }

    #[test]
    fn test_ipv6_brackets() {
        let addr: PeerAddress = "[::1]:9000".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:9000");
        assert!(addr.ip().unwrap().is_loopback());
    }

    #[test]
    fn test_equality_requires_host_and_port() {
        let a = PeerAddress::new("10.0.0.1", 8888);
        assert_eq!(a, PeerAddress::new("10.0.0.1", 8888));
        assert_ne!(a, PeerAddress::new("10.0.0.1", 8889));
        assert_ne!(a, PeerAddress::new("10.0.0.2", 8888));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("no-port".parse::<PeerAddress>().is_err());
        assert!("host:notaport".parse::<PeerAddress>().is_err());
        assert!(":8888".parse::<PeerAddress>().is_err());
        assert!("::1:8888".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_advertised_bare_host_uses_default_port() {
        let addr = PeerAddress::parse_advertised("10.1.2.3").unwrap();
        assert_eq!(addr, PeerAddress::new("10.1.2.3", DEFAULT_PORT));

        let addr = PeerAddress::parse_advertised(" 10.1.2.3:7000 ").unwrap();
        assert_eq!(addr.port(), 7000);

        assert!(PeerAddress::parse_advertised("").is_err());
    }

    #[test]
    fn test_from_socket_addr() {
        let sock: SocketAddr = "127.0.0.1:4040".parse().unwrap();
        assert_eq!(PeerAddress::from(sock), PeerAddress::new("127.0.0.1", 4040));
    }

    #[test]
    fn test_serde_as_string() {
        let addr = PeerAddress::new("10.0.0.7", 8888);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.7:8888\"");
        let back: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}

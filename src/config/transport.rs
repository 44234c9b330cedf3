//! Transport configuration types
//!
//! Defines socket options applied to every dialed connection and the TLS
//! settings used when a session is connected with TLS.

use serde::{Deserialize, Serialize};

/// Default TCP_NODELAY setting
fn default_nodelay() -> bool {
    true
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// TLS configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Name used for SNI and certificate verification instead of the
    /// target host
    #[serde(default)]
    pub hostname: Option<String>,

    /// Extra PEM file of trusted root certificates
    #[serde(default)]
    pub trusted_root: Option<String>,

    /// Accept any server certificate (testing only)
    #[serde(default)]
    pub skip_verify: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert!(config.nodelay);
        assert_eq!(config.keepalive_secs, 20);
        assert_eq!(config.keepalive_interval, 8);
    }

    #[test]
    fn test_tcp_config_serde_defaults_match() {
        let config: TcpConfig = toml::from_str("").unwrap();
        assert_eq!(config, TcpConfig::default());
    }

    #[test]
    fn test_tls_config_default() {
        let config = TlsConfig::default();
        assert!(config.hostname.is_none());
        assert!(config.trusted_root.is_none());
        assert!(!config.skip_verify);
    }
}

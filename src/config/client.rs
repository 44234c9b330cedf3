//! Client configuration types
//!
//! Defines the main configuration structures for a Chainsock session.

use super::{TcpConfig, TlsConfig};
use crate::helper::DEFAULT_TIMEOUT_MS;
use crate::proxy::{ProxyDescriptor, MAX_PROXY_CHAIN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default operation timeout in milliseconds
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Client configuration
    #[serde(default)]
    pub client: ClientConfig,
}

/// Client configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for each connect, send, recv or readline, in milliseconds
    /// (0 disables the deadline)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Proxy chain in dialing order, as `type://[user:pass@]host:port`
    #[serde(default)]
    pub proxies: Vec<String>,

    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,

    /// TLS settings
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            proxies: Vec::new(),
            tcp: TcpConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Operation timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.proxies.len() > MAX_PROXY_CHAIN {
            return Err(format!(
                "At most {} proxies can be chained, got {}",
                MAX_PROXY_CHAIN,
                self.proxies.len()
            ));
        }
        for proxy in &self.proxies {
            proxy
                .parse::<ProxyDescriptor>()
                .map_err(|e| format!("Invalid proxy {:?}: {}", proxy, e))?;
        }
        Ok(())
    }
}

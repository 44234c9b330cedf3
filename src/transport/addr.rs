//! Endpoint handling and name resolution
//!
//! An [`Endpoint`] is a validated host/port pair naming a proxy hop or the
//! final target. Resolution goes through the [`Resolver`] trait so tests
//! and callers can substitute their own lookup.

use crate::error::{ChainsockError, InternalError, Result};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Longest hostname accepted for any endpoint
pub const MAX_HOSTNAME_LEN: usize = 255;

/// Host and port of a proxy hop or target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, validating the host
    ///
    /// Brackets around an IPv6 literal are stripped.
    #[track_caller]
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(ChainsockError::internal(InternalError::NullArgument));
        }
        if host.len() > MAX_HOSTNAME_LEN {
            return Err(ChainsockError::internal(InternalError::HostnameTooLong));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    /// Host name or address literal, without brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host as an IP address, if it is a literal
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// `host:port` with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        match self.ip() {
            Some(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

impl FromStr for Endpoint {
    type Err = ChainsockError;

    /// Parse `host:port` or `[v6]:port`
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ChainsockError::internal(InternalError::NullArgument))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ChainsockError::internal(InternalError::NullArgument))?;
        // an unbracketed IPv6 literal would have been split in the middle
        if host.contains(':') && !host.starts_with('[') {
            return Err(ChainsockError::internal(InternalError::NullArgument));
        }
        Endpoint::new(host, port)
    }
}

/// Name resolution used to turn hostnames into socket addresses
pub trait Resolver: fmt::Debug + Send + Sync {
    /// Resolve `host` to the addresses it may be reached at on `port`
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok((host, port).to_socket_addrs()?.collect())
    }
}

/// Resolver answering from a fixed table, unknown names fail
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Create a resolver with no entries
    pub fn new() -> Self {
        Self::default()
    }

    /// Add addresses for a hostname
    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.entries
            .entry(host.to_ascii_lowercase())
            .or_default()
            .extend_from_slice(addrs);
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .map(|ips| ips.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("failed to lookup address information: {}", host),
                )
            })
    }
}

/// Resolve an endpoint to its socket addresses
///
/// Address literals are returned as is without consulting the resolver.
pub fn resolve_endpoint(endpoint: &Endpoint, resolver: &dyn Resolver) -> Result<Vec<SocketAddr>> {
    if let Some(ip) = endpoint.ip() {
        return Ok(vec![SocketAddr::new(ip, endpoint.port())]);
    }

    let addrs = resolver
        .resolve(endpoint.host(), endpoint.port())
        .map_err(|e| ChainsockError::resolver(&e))?;

    if addrs.is_empty() {
        let e = io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for: {}", endpoint.host()),
        );
        return Err(ChainsockError::resolver(&e));
    }

    Ok(addrs)
}

//! Proxy registry and handshakes
//!
//! A [`ProxyChain`] is the ordered list of proxies a session tunnels
//! through. Each hop is described by a [`ProxyDescriptor`], built either
//! field by field or parsed from a `type://[user:pass@]host:port` string.
//! The per-protocol handshakes live in the submodules and are driven by
//! [`establish`].

mod chain;
pub mod consts;
mod http;
mod socks4;
mod socks5;

pub use chain::establish;

use crate::error::{ChainsockError, InternalError, Result};
use crate::transport::deadline::{recv_exact, send_all};
use crate::transport::{Deadline, Endpoint, Resolver, TimedStream};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Maximum number of proxies in a chain
pub const MAX_PROXY_CHAIN: usize = 16;

/// Longest username or password accepted for any proxy
pub const MAX_CREDENTIAL_LEN: usize = 255;

/// Proxy protocol of a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    /// No proxy; not accepted in a chain
    None,
    /// SOCKS4 with optional user id
    Socks4,
    /// SOCKS5 with optional username/password
    Socks5,
    /// HTTP CONNECT with optional basic auth
    Http,
}

impl ProxyType {
    /// URL scheme naming this type
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::None => "none",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
            ProxyType::Http => "http",
        }
    }

    /// Look up a proxy type by URL scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "socks4" => Some(ProxyType::Socks4),
            "socks5" => Some(ProxyType::Socks5),
            "http" => Some(ProxyType::Http),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Credentials presented to a proxy
///
/// For SOCKS4 only the username is used, as the user id.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username, or SOCKS4 user id
    pub username: String,
    /// Password, empty when none was given
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One hop of a proxy chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    proxy_type: ProxyType,
    endpoint: Endpoint,
    credentials: Option<Credentials>,
}

impl ProxyDescriptor {
    /// Create a descriptor, validating every field
    ///
    /// Fails with [`InternalError::NullArgument`] for [`ProxyType::None`],
    /// an empty host, port 0 or a password without a username,
    /// [`InternalError::HostnameTooLong`] for hosts over 255 bytes and
    /// [`InternalError::Socks5AuthExceedSize`] for credentials over 255
    /// bytes. A SOCKS4 password is ignored.
    #[track_caller]
    pub fn new(
        proxy_type: ProxyType,
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        if proxy_type == ProxyType::None || port == 0 {
            return Err(ChainsockError::internal(InternalError::NullArgument));
        }
        let endpoint = Endpoint::new(host, port)?;

        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());
        for field in [username, password].into_iter().flatten() {
            if field.len() > MAX_CREDENTIAL_LEN {
                return Err(ChainsockError::internal(
                    InternalError::Socks5AuthExceedSize,
                ));
            }
        }

        let credentials = match (username, password) {
            (None, None) => None,
            (None, Some(_)) => return Err(ChainsockError::internal(InternalError::NullArgument)),
            (Some(user), pass) => Some(Credentials {
                username: user.to_string(),
                password: match proxy_type {
                    ProxyType::Socks4 => String::new(),
                    _ => pass.unwrap_or_default().to_string(),
                },
            }),
        };

        Ok(ProxyDescriptor {
            proxy_type,
            endpoint,
            credentials,
        })
    }

    /// Protocol spoken with this proxy
    pub fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    /// Where the proxy listens
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Credentials, if any
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Negotiate a tunnel through this proxy to `next`
    ///
    /// `stream` must already be connected to this proxy. On success every
    /// byte the proxy sent during the handshake has been consumed.
    pub fn negotiate<S: TimedStream>(
        &self,
        stream: &mut S,
        next: &Endpoint,
        resolver: &dyn Resolver,
        deadline: Deadline,
    ) -> Result<()> {
        match self.proxy_type {
            ProxyType::Socks4 => socks4::negotiate(
                stream,
                next,
                self.credentials.as_ref().map(|c| c.username.as_str()),
                resolver,
                deadline,
            ),
            ProxyType::Socks5 => socks5::negotiate(stream, next, self.credentials.as_ref(), deadline),
            ProxyType::Http => http::negotiate(stream, next, self.credentials.as_ref(), deadline),
            ProxyType::None => Err(ChainsockError::internal(InternalError::NullArgument)),
        }
    }
}

impl fmt::Display for ProxyDescriptor {
    /// Renders the proxy URL without its password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.proxy_type)?;
        if let Some(ref creds) = self.credentials {
            write!(f, "{}@", creds.username)?;
        }
        write!(f, "{}", self.endpoint)
    }
}

/// Write a complete handshake message
fn send_request<S: TimedStream>(stream: &mut S, request: &[u8], deadline: Deadline) -> Result<()> {
    send_all(stream, request, 0, deadline)?;
    Ok(())
}

/// Read exactly `buf.len()` handshake bytes
///
/// A proxy hanging up in the middle of a reply is reported as
/// [`InternalError::ProxyUnexpectedResponse`].
fn recv_reply<S: TimedStream>(stream: &mut S, buf: &mut [u8], deadline: Deadline) -> Result<()> {
    match recv_exact(stream, buf, 0, deadline) {
        Ok(_) => Ok(()),
        Err(e) if e.error.internal_kind() == Some(InternalError::RemoteDisconnected) => Err(
            ChainsockError::internal(InternalError::ProxyUnexpectedResponse),
        ),
        Err(e) => Err(e.error),
    }
}

/// Whether the authority of a URL string spells out a port
///
/// `Url::port` hides ports equal to the scheme default, so the raw string
/// is checked instead.
fn authority_has_port(proxy_url: &str) -> bool {
    let Some((_, rest)) = proxy_url.split_once("://") else {
        return false;
    };
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

    let port = match host_port.rfind(']') {
        Some(end) => host_port[end + 1..].strip_prefix(':'),
        None => host_port.rsplit_once(':').map(|(_, port)| port),
    };
    port.is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

fn decode_userinfo(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ChainsockError::internal(InternalError::InvalidProxyUrl))
}

impl FromStr for ProxyDescriptor {
    type Err = ChainsockError;

    /// Parse `type://[user[:pass]@]host:port`
    fn from_str(proxy_url: &str) -> Result<Self> {
        let invalid = || ChainsockError::internal(InternalError::InvalidProxyUrl);

        let url = Url::parse(proxy_url).map_err(|_| invalid())?;
        let proxy_type = ProxyType::from_scheme(url.scheme()).ok_or_else(invalid)?;

        if url.query().is_some() || url.fragment().is_some() || !matches!(url.path(), "" | "/") {
            return Err(invalid());
        }
        if !authority_has_port(proxy_url) {
            return Err(invalid());
        }

        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = url
            .port_or_known_default()
            .filter(|p| *p != 0)
            .ok_or_else(invalid)?;

        let username = decode_userinfo(url.username())?;
        let password = url.password().map(decode_userinfo).transpose()?;
        if proxy_type == ProxyType::Socks4 && password.is_some() {
            return Err(invalid());
        }

        ProxyDescriptor::new(
            proxy_type,
            host,
            port,
            Some(username.as_str()),
            password.as_deref(),
        )
    }
}

/// Ordered list of proxies, dialed first to last
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyChain {
    proxies: Vec<ProxyDescriptor>,
}

impl ProxyChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validated descriptor
    ///
    /// Fails with [`InternalError::ExceedProxyLimit`] when the chain is
    /// full; the chain is left unchanged on any error.
    #[track_caller]
    pub fn push(&mut self, proxy: ProxyDescriptor) -> Result<()> {
        if self.proxies.len() >= MAX_PROXY_CHAIN {
            return Err(ChainsockError::internal(InternalError::ExceedProxyLimit));
        }
        self.proxies.push(proxy);
        Ok(())
    }

    /// Validate and append a proxy
    #[track_caller]
    pub fn add_proxy(
        &mut self,
        proxy_type: ProxyType,
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        if self.proxies.len() >= MAX_PROXY_CHAIN {
            return Err(ChainsockError::internal(InternalError::ExceedProxyLimit));
        }
        let proxy = ProxyDescriptor::new(proxy_type, host, port, username, password)?;
        self.push(proxy)
    }

    /// Parse a proxy URL and append it
    #[track_caller]
    pub fn add_proxy_from_str(&mut self, proxy_url: &str) -> Result<()> {
        if self.proxies.len() >= MAX_PROXY_CHAIN {
            return Err(ChainsockError::internal(InternalError::ExceedProxyLimit));
        }
        let proxy = proxy_url.parse::<ProxyDescriptor>()?;
        self.push(proxy)
    }

    /// Number of proxies
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Whether the chain is empty (direct connection)
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Proxy at `index`
    pub fn get(&self, index: usize) -> Option<&ProxyDescriptor> {
        self.proxies.get(index)
    }

    /// Iterate over the proxies in dialing order
    pub fn iter(&self) -> std::slice::Iter<'_, ProxyDescriptor> {
        self.proxies.iter()
    }

    /// Remove all proxies
    pub fn clear(&mut self) {
        self.proxies.clear();
    }
}

impl<'a> IntoIterator for &'a ProxyChain {
    type Item = &'a ProxyDescriptor;
    type IntoIter = std::slice::Iter<'a, ProxyDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.proxies.iter()
    }
}

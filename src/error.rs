//! Error types for Chainsock
//!
//! Every failure, whatever layer produced it, is reported as a single
//! [`ChainsockError`]: the subsystem it came from, a domain-specific detail,
//! the source location that raised it and the proxy hop (if any) that was
//! being dialed or negotiated at the time.

use std::fmt;
use std::io;
use std::panic::Location;
use thiserror::Error;

/// Result type used throughout Chainsock
pub type Result<T> = std::result::Result<T, ChainsockError>;

/// Subsystem an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// Chainsock's own logic: limits, protocol violations, timeouts
    Internal,
    /// Operating system socket layer
    System,
    /// Name resolution
    Resolver,
    /// TLS library
    Tls,
}

impl ErrorDomain {
    /// Short lowercase name of the domain
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorDomain::Internal => "internal",
            ErrorDomain::System => "system",
            ErrorDomain::Resolver => "resolver",
            ErrorDomain::Tls => "tls",
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages for the internal error codes, indexed by code.
///
/// Code 0 is "no error"; the remaining entries line up with [`InternalError`].
const INTERNAL_MESSAGES: [&str; 28] = [
    "no error",
    "null argument",
    "maximum number of proxies exceeded",
    "TLS requested but TLS support is not compiled in",
    "no socket, connect first",
    "operation timed out",
    "supplied buffer is too small",
    "generic TLS error",
    "SOCKS4 proxy requires authentication which is not supported",
    "SOCKS5 username and password are limited to 255 bytes",
    "SOCKS4 cannot address IPv6 hosts",
    "proxy sent an unexpected response",
    "proxy could not connect to the target",
    "proxy authentication failed",
    "read operation timed out",
    "write operation timed out",
    "connect operation timed out",
    "proxy reported a general failure",
    "proxy reported network unreachable",
    "proxy reported host unreachable",
    "proxy reported connection refused",
    "proxy reported TTL expired",
    "proxy does not support the command",
    "proxy does not support the address type",
    "remote side closed the connection",
    "no proxy storage available",
    "hostname exceeds 255 bytes",
    "invalid proxy URL",
];

/// Conditions detected by Chainsock itself
///
/// The discriminants are stable and double as the numeric error code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InternalError {
    /// A required argument was missing or empty
    #[error("null argument")]
    NullArgument = 1,
    /// The proxy chain is already at capacity
    #[error("maximum number of proxies exceeded")]
    ExceedProxyLimit = 2,
    /// TLS was requested but the crate was built without TLS support
    #[error("TLS requested but TLS support is not compiled in")]
    NoTls = 3,
    /// The session has no connected socket
    #[error("no socket, connect first")]
    NoSocket = 4,
    /// Generic timeout
    #[error("operation timed out")]
    HitTimeout = 5,
    /// A line did not fit into the supplied buffer
    #[error("supplied buffer is too small")]
    OutOfBuffer = 6,
    /// TLS setup failed outside of the TLS library itself
    #[error("generic TLS error")]
    TlsGeneric = 7,
    /// SOCKS4 proxy demanded identd authentication
    #[error("SOCKS4 proxy requires authentication which is not supported")]
    Socks4NoAuth = 8,
    /// SOCKS5 credentials exceed the wire format limit
    #[error("SOCKS5 username and password are limited to 255 bytes")]
    Socks5AuthExceedSize = 9,
    /// SOCKS4 next hop only resolves to IPv6
    #[error("SOCKS4 cannot address IPv6 hosts")]
    Socks4NoIp6 = 10,
    /// Malformed or unexpected proxy response
    #[error("proxy sent an unexpected response")]
    ProxyUnexpectedResponse = 11,
    /// Proxy refused or failed to reach the next hop
    #[error("proxy could not connect to the target")]
    TargetProxyConnectFailed = 12,
    /// Proxy rejected the offered credentials
    #[error("proxy authentication failed")]
    ProxyAuthFailed = 13,
    /// Deadline elapsed while reading
    #[error("read operation timed out")]
    HitReadTimeout = 14,
    /// Deadline elapsed while writing
    #[error("write operation timed out")]
    HitWriteTimeout = 15,
    /// Deadline elapsed while connecting
    #[error("connect operation timed out")]
    HitConnectTimeout = 16,
    /// SOCKS5 general server failure
    #[error("proxy reported a general failure")]
    ProxyGeneralFailure = 17,
    /// SOCKS5 network unreachable
    #[error("proxy reported network unreachable")]
    TargetProxyNetUnreachable = 18,
    /// SOCKS5 host unreachable
    #[error("proxy reported host unreachable")]
    TargetProxyHostUnreachable = 19,
    /// SOCKS5 connection refused
    #[error("proxy reported connection refused")]
    TargetProxyConnRefused = 20,
    /// SOCKS5 TTL expired
    #[error("proxy reported TTL expired")]
    TargetProxyTtlExpired = 21,
    /// SOCKS5 command not supported
    #[error("proxy does not support the command")]
    ProxyCommandNotSupported = 22,
    /// SOCKS5 address type not supported
    #[error("proxy does not support the address type")]
    ProxyAddressTypeNotSupported = 23,
    /// Peer closed the connection before the transfer completed
    #[error("remote side closed the connection")]
    RemoteDisconnected = 24,
    /// No proxy storage attached
    #[error("no proxy storage available")]
    NoProxyStorage = 25,
    /// Hostname longer than 255 bytes
    #[error("hostname exceeds 255 bytes")]
    HostnameTooLong = 26,
    /// Proxy URL string could not be parsed
    #[error("invalid proxy URL")]
    InvalidProxyUrl = 27,
}

impl InternalError {
    /// Numeric code of this condition
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human readable message for this condition
    pub fn message(self) -> &'static str {
        INTERNAL_MESSAGES[self as usize]
    }

    /// Look up a condition by numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        use InternalError::*;
        let err = match code {
            1 => NullArgument,
            2 => ExceedProxyLimit,
            3 => NoTls,
            4 => NoSocket,
            5 => HitTimeout,
            6 => OutOfBuffer,
            7 => TlsGeneric,
            8 => Socks4NoAuth,
            9 => Socks5AuthExceedSize,
            10 => Socks4NoIp6,
            11 => ProxyUnexpectedResponse,
            12 => TargetProxyConnectFailed,
            13 => ProxyAuthFailed,
            14 => HitReadTimeout,
            15 => HitWriteTimeout,
            16 => HitConnectTimeout,
            17 => ProxyGeneralFailure,
            18 => TargetProxyNetUnreachable,
            19 => TargetProxyHostUnreachable,
            20 => TargetProxyConnRefused,
            21 => TargetProxyTtlExpired,
            22 => ProxyCommandNotSupported,
            23 => ProxyAddressTypeNotSupported,
            24 => RemoteDisconnected,
            25 => NoProxyStorage,
            26 => HostnameTooLong,
            27 => InvalidProxyUrl,
            _ => return None,
        };
        Some(err)
    }

    /// Whether this condition is one of the deadline timeouts
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            InternalError::HitTimeout
                | InternalError::HitReadTimeout
                | InternalError::HitWriteTimeout
                | InternalError::HitConnectTimeout
        )
    }
}

/// Message for an internal error code, including code 0
pub fn internal_message(code: i32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|idx| INTERNAL_MESSAGES.get(idx).copied())
        .unwrap_or("unknown error")
}

/// Domain specific part of an error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    /// Chainsock condition
    #[error("{0}")]
    Internal(InternalError),

    /// OS level failure with its errno (0 if the OS gave none)
    #[error("{message}")]
    System {
        /// Raw OS error code
        code: i32,
        /// Message reported by the OS
        message: String,
    },

    /// Name resolution failure
    #[error("{message}")]
    Resolver {
        /// Raw resolver code (0 if unavailable)
        code: i32,
        /// Message reported by the resolver
        message: String,
    },

    /// Failure reported by the TLS library
    #[error("{message}")]
    Tls {
        /// Message reported by the TLS library
        message: String,
    },
}

impl ErrorDetail {
    /// Domain of this detail
    pub fn domain(&self) -> ErrorDomain {
        match self {
            ErrorDetail::Internal(_) => ErrorDomain::Internal,
            ErrorDetail::System { .. } => ErrorDomain::System,
            ErrorDetail::Resolver { .. } => ErrorDomain::Resolver,
            ErrorDetail::Tls { .. } => ErrorDomain::Tls,
        }
    }

    /// Numeric code; TLS failures carry none and report 0
    pub fn code(&self) -> i32 {
        match self {
            ErrorDetail::Internal(err) => err.code(),
            ErrorDetail::System { code, .. } | ErrorDetail::Resolver { code, .. } => *code,
            ErrorDetail::Tls { .. } => 0,
        }
    }
}

/// Unified Chainsock error
///
/// Carries the domain specific [`ErrorDetail`], the source location where
/// the failure was detected and the index of the proxy hop that failed
/// (`None` when the failure concerns the target or no hop at all).
#[derive(Debug, Clone)]
pub struct ChainsockError {
    detail: ErrorDetail,
    location: &'static Location<'static>,
    hop: Option<usize>,
}

impl ChainsockError {
    /// Build an error from a detail, recording the caller's location
    #[track_caller]
    pub fn new(detail: ErrorDetail) -> Self {
        ChainsockError {
            detail,
            location: Location::caller(),
            hop: None,
        }
    }

    /// Internal condition
    #[track_caller]
    pub fn internal(err: InternalError) -> Self {
        Self::new(ErrorDetail::Internal(err))
    }

    /// OS level failure
    #[track_caller]
    pub fn system(err: &io::Error) -> Self {
        Self::new(ErrorDetail::System {
            code: err.raw_os_error().unwrap_or(0),
            message: err.to_string(),
        })
    }

    /// Name resolution failure
    #[track_caller]
    pub fn resolver(err: &io::Error) -> Self {
        Self::new(ErrorDetail::Resolver {
            code: err.raw_os_error().unwrap_or(0),
            message: err.to_string(),
        })
    }

    /// TLS library failure
    #[track_caller]
    pub fn tls(message: impl fmt::Display) -> Self {
        Self::new(ErrorDetail::Tls {
            message: message.to_string(),
        })
    }

    /// Classify an I/O error raised while transferring data.
    ///
    /// Socket timeouts become `timeout`, an unexpected EOF becomes
    /// [`InternalError::RemoteDisconnected`], errors wrapping a TLS library
    /// error land in the TLS domain and everything else is a system error.
    #[track_caller]
    pub fn from_io(err: &io::Error, timeout: InternalError) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => return Self::internal(timeout),
            io::ErrorKind::UnexpectedEof => {
                return Self::internal(InternalError::RemoteDisconnected)
            }
            _ => {}
        }

        if let Some(message) = tls_cause(err) {
            return Self::tls(message);
        }

        Self::system(err)
    }

    /// Attach the index of the proxy hop that failed
    pub fn at_hop(mut self, hop: usize) -> Self {
        self.hop = Some(hop);
        self
    }

    /// Domain of this error
    pub fn domain(&self) -> ErrorDomain {
        self.detail.domain()
    }

    /// Numeric code, meaningful within the domain
    pub fn code(&self) -> i32 {
        self.detail.code()
    }

    /// Domain specific detail
    pub fn detail(&self) -> &ErrorDetail {
        &self.detail
    }

    /// The internal condition, if this is an internal error
    pub fn internal_kind(&self) -> Option<InternalError> {
        match self.detail {
            ErrorDetail::Internal(err) => Some(err),
            _ => None,
        }
    }

    /// Domain specific message
    pub fn message(&self) -> String {
        self.detail.to_string()
    }

    /// Source location that raised the error
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Index of the failed proxy hop, `None` for the target
    pub fn hop(&self) -> Option<usize> {
        self.hop
    }

    /// Whether this is one of the deadline timeouts
    pub fn is_timeout(&self) -> bool {
        self.internal_kind().is_some_and(InternalError::is_timeout)
    }

    /// Three part message: domain, message and the hop that failed
    pub fn detailed(&self) -> String {
        match self.hop {
            Some(hop) => format!("{} (at proxy #{})", self, hop),
            None => format!("{} (at target)", self),
        }
    }
}

/// Message of the TLS library error wrapped inside an I/O error, if any
#[cfg(feature = "rustls-tls")]
fn tls_cause(err: &io::Error) -> Option<String> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map(|tls_err| tls_err.to_string())
}

#[cfg(not(feature = "rustls-tls"))]
fn tls_cause(_err: &io::Error) -> Option<String> {
    None
}

impl fmt::Display for ChainsockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.domain(), self.detail)
    }
}

impl std::error::Error for ChainsockError {}

impl PartialEq for ChainsockError {
    fn eq(&self, other: &Self) -> bool {
        self.detail == other.detail && self.hop == other.hop
    }
}

impl From<InternalError> for ChainsockError {
    #[track_caller]
    fn from(err: InternalError) -> Self {
        ChainsockError::internal(err)
    }
}

/// A transfer that failed after moving some bytes
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error} after {transferred} bytes")]
pub struct TransferError {
    /// Bytes moved before the failure
    pub transferred: usize,
    /// What went wrong
    pub error: ChainsockError,
}

impl TransferError {
    /// Wrap an error with the number of bytes already transferred
    pub fn new(transferred: usize, error: ChainsockError) -> Self {
        TransferError { transferred, error }
    }
}

impl From<TransferError> for ChainsockError {
    fn from(err: TransferError) -> Self {
        err.error
    }
}

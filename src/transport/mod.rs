//! Transport module for Chainsock
//!
//! This module provides the blocking socket layer the proxy handshakes and
//! the session run on: endpoint resolution, deadline-bounded dialing and
//! transfers, socket options and the optional TLS wrapper.

mod addr;
pub mod deadline;
#[cfg(test)]
pub(crate) mod mock;
mod tcp;
#[cfg(feature = "rustls-tls")]
pub mod tls;

pub use addr::{
    resolve_endpoint, Endpoint, Resolver, StaticResolver, SystemResolver, MAX_HOSTNAME_LEN,
};
pub use deadline::Deadline;
pub use tcp::dial;

use crate::config::TcpConfig;
use crate::error::{ChainsockError, InternalError, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// How long a closing session waits for a TLS close_notify to be written
const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

/// Socket options for configuring connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// A blocking byte stream whose operations can be bounded in time
///
/// Deadline-bounded transfers set the remaining time before every
/// underlying read or write; an elapsed timeout must surface as
/// `WouldBlock` or `TimedOut`.
pub trait TimedStream: Read + Write {
    /// Apply `timeout` to subsequent reads and writes, `None` blocks forever
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimedStream for TcpStream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// An established connection, either plain or wrapped in TLS
pub enum Stream {
    /// Plain TCP (possibly tunneled through proxies)
    Plain(TcpStream),
    /// TLS session over the TCP connection
    #[cfg(feature = "rustls-tls")]
    Tls(Box<tls::TlsStream>),
}

impl Stream {
    /// The underlying TCP socket
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => &tls.sock,
        }
    }

    /// Whether the stream is encrypted
    pub fn is_tls(&self) -> bool {
        !matches!(self, Stream::Plain(_))
    }

    /// Check without blocking whether data can be read
    ///
    /// Decrypted TLS data waiting in the session counts as readable. A peer
    /// that has closed the connection is reported as
    /// [`InternalError::RemoteDisconnected`].
    pub fn poll_readable(&mut self) -> Result<bool> {
        let tcp = match self {
            Stream::Plain(tcp) => &*tcp,
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => {
                if tls::has_plaintext(tls)? {
                    return Ok(true);
                }
                &tls.sock
            }
        };
        peek_socket(tcp)
    }

    /// Close the connection, sending a TLS close_notify when applicable
    pub fn close(self) {
        let tcp = match self {
            Stream::Plain(tcp) => tcp,
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => {
                let mut tls = *tls;
                let _ = tls.sock.set_write_timeout(Some(CLOSE_NOTIFY_TIMEOUT));
                tls::close_notify(&mut tls);
                tls.sock
            }
        };
        let _ = tcp.shutdown(Shutdown::Both);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("tls", &self.is_tls())
            .field("peer", &self.tcp().peer_addr().ok())
            .finish()
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.write(buf),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.flush(),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

impl TimedStream for Stream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.set_io_timeout(timeout),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(tls) => tls.sock.set_io_timeout(timeout),
        }
    }
}

/// Non-blocking one byte peek on a socket
fn peek_socket(tcp: &TcpStream) -> Result<bool> {
    tcp.set_nonblocking(true)
        .map_err(|e| ChainsockError::system(&e))?;
    let mut byte = [0u8; 1];
    let peeked = tcp.peek(&mut byte);
    tcp.set_nonblocking(false)
        .map_err(|e| ChainsockError::system(&e))?;

    match peeked {
        Ok(0) => Err(ChainsockError::internal(InternalError::RemoteDisconnected)),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(ChainsockError::system(&e)),
    }
}

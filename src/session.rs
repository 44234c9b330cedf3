//! Session facade
//!
//! A [`Session`] owns the proxy chain, timeout and socket options, and once
//! connected the (possibly TLS wrapped) stream plus a carry-over buffer
//! used by [`Session::readline`]. Every fallible operation returns its
//! error directly and also stores it as the session's last error.

use crate::config::{ClientConfig, TlsConfig};
use crate::error::{ChainsockError, InternalError, Result, TransferError};
use crate::helper::{find_newline, trim_line_ending, DEFAULT_TIMEOUT_MS, READ_CHUNK_SIZE};
use crate::proxy::{self, ProxyChain, ProxyType};
use crate::transport::deadline::{recv_exact, recv_some, send_all};
use crate::transport::{Deadline, Endpoint, Resolver, SocketOpts, Stream, SystemResolver};
use bytes::{Buf, BytesMut};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "rustls-tls")]
use crate::transport::tls;

/// A client connection, direct or through a proxy chain, optionally TLS
#[derive(Debug)]
pub struct Session {
    chain: ProxyChain,
    timeout: Duration,
    socket_opts: SocketOpts,
    resolver: Arc<dyn Resolver>,
    tls_config: TlsConfig,
    #[cfg(feature = "rustls-tls")]
    tls_context: Option<Arc<rustls::ClientConfig>>,
    stream: Option<Stream>,
    target: Option<Endpoint>,
    carry: BytesMut,
    last_error: Option<ChainsockError>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a disconnected session without proxies
    pub fn new() -> Self {
        Session {
            chain: ProxyChain::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            socket_opts: SocketOpts::default(),
            resolver: Arc::new(SystemResolver),
            tls_config: TlsConfig::default(),
            #[cfg(feature = "rustls-tls")]
            tls_context: None,
            stream: None,
            target: None,
            carry: BytesMut::new(),
            last_error: None,
        }
    }

    /// Build a session from configuration
    ///
    /// Proxies are added in order; the first invalid entry fails the build.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut chain = ProxyChain::new();
        for proxy in &config.proxies {
            chain.add_proxy_from_str(proxy)?;
        }

        Ok(Session::new()
            .with_chain(chain)
            .with_timeout(config.timeout())
            .with_socket_opts(SocketOpts::from_tcp_config(&config.tcp))
            .with_tls_config(config.tls.clone()))
    }

    /// Replace the proxy chain
    pub fn with_chain(mut self, chain: ProxyChain) -> Self {
        self.chain = chain;
        self
    }

    /// Set the per-operation timeout, zero disables it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set socket options for dialed connections
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Use a custom resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the TLS configuration
    pub fn with_tls_config(mut self, config: TlsConfig) -> Self {
        self.tls_config = config;
        #[cfg(feature = "rustls-tls")]
        {
            self.tls_context = None;
        }
        self
    }

    /// Change the per-operation timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The per-operation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The proxy chain
    pub fn chain(&self) -> &ProxyChain {
        &self.chain
    }

    /// Append a proxy to the chain
    ///
    /// Takes effect on the next [`Session::connect`].
    #[track_caller]
    pub fn add_proxy(
        &mut self,
        proxy_type: ProxyType,
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let result = self
            .chain
            .add_proxy(proxy_type, host, port, username, password);
        self.record(result)
    }

    /// Parse a `type://[user:pass@]host:port` proxy URL and append it
    #[track_caller]
    pub fn add_proxy_from_str(&mut self, proxy_url: &str) -> Result<()> {
        let result = self.chain.add_proxy_from_str(proxy_url);
        self.record(result)
    }

    /// Connect to `host:port` through the proxy chain
    ///
    /// Any previous connection is closed first. With `use_tls` a TLS
    /// session is negotiated with the target once the tunnel is up. The
    /// session counts as connected only if every step succeeds.
    pub fn connect(&mut self, host: &str, port: u16, use_tls: bool) -> Result<()> {
        self.disconnect();
        let result = self.connect_inner(host, port, use_tls);
        if let Err(ref e) = result {
            warn!("Connection to {}:{} failed: {}", host, port, e.detailed());
        }
        self.record(result)
    }

    fn connect_inner(&mut self, host: &str, port: u16, use_tls: bool) -> Result<()> {
        if use_tls && !cfg!(feature = "rustls-tls") {
            return Err(ChainsockError::internal(InternalError::NoTls));
        }

        let target = Endpoint::new(host, port)?;
        self.target = Some(target.clone());
        let deadline = Deadline::after(self.timeout);

        let tcp = proxy::establish(
            &self.chain,
            &target,
            self.resolver.as_ref(),
            &self.socket_opts,
            deadline,
        )?;

        let stream = if use_tls {
            self.start_tls(tcp, &target, deadline)?
        } else {
            Stream::Plain(tcp)
        };

        info!(
            "Connected to {} through {} proxies{}",
            target,
            self.chain.len(),
            if use_tls { " (TLS)" } else { "" }
        );
        self.stream = Some(stream);
        Ok(())
    }

    #[cfg(feature = "rustls-tls")]
    fn start_tls(&mut self, tcp: TcpStream, target: &Endpoint, deadline: Deadline) -> Result<Stream> {
        let config = match self.tls_context {
            Some(ref config) => config.clone(),
            None => {
                let config = tls::build_client_config(&self.tls_config)?;
                self.tls_context = Some(config.clone());
                config
            }
        };

        let hostname = self
            .tls_config
            .hostname
            .as_deref()
            .unwrap_or_else(|| target.host());
        let stream = tls::handshake(config, hostname, tcp, deadline)?;
        Ok(Stream::Tls(Box::new(stream)))
    }

    #[cfg(not(feature = "rustls-tls"))]
    fn start_tls(
        &mut self,
        _tcp: TcpStream,
        _target: &Endpoint,
        _deadline: Deadline,
    ) -> Result<Stream> {
        Err(ChainsockError::internal(InternalError::NoTls))
    }

    /// Send all of `buf`, in chunks of at most `chunk_size` bytes (0 for
    /// no limit)
    ///
    /// On failure the error reports how many bytes were sent.
    pub fn send(&mut self, buf: &[u8], chunk_size: usize) -> std::result::Result<usize, TransferError> {
        let deadline = Deadline::after(self.timeout);
        let result = match self.stream {
            Some(ref mut stream) => send_all(stream, buf, chunk_size, deadline),
            None => Err(no_socket()),
        };
        self.record_transfer(result)
    }

    /// Fill all of `buf`, in chunks of at most `chunk_size` bytes (0 for no
    /// limit)
    ///
    /// Bytes left over from [`Session::readline`] are returned first. On
    /// failure the error reports how many bytes were received.
    pub fn recv(&mut self, buf: &mut [u8], chunk_size: usize) -> std::result::Result<usize, TransferError> {
        let deadline = Deadline::after(self.timeout);
        let result = match self.stream {
            Some(ref mut stream) => {
                let carried = buf.len().min(self.carry.len());
                buf[..carried].copy_from_slice(&self.carry[..carried]);
                self.carry.advance(carried);

                recv_exact(stream, &mut buf[carried..], chunk_size, deadline)
                    .map(|n| n + carried)
                    .map_err(|e| TransferError::new(e.transferred + carried, e.error))
            }
            None => Err(no_socket()),
        };
        self.record_transfer(result)
    }

    /// Read one line into `buf`, returning its length without the `\n` or
    /// `\r\n` terminator
    ///
    /// Bytes received past the terminator stay buffered for the next call.
    /// A line that does not fit fails with [`InternalError::OutOfBuffer`];
    /// its first `buf.len()` bytes are copied into `buf` and consumed, the
    /// rest stays buffered.
    pub fn readline(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = self.readline_inner(buf);
        self.record(result)
    }

    fn readline_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(ref mut stream) = self.stream else {
            return Err(ChainsockError::internal(InternalError::NoSocket));
        };
        if buf.is_empty() {
            return Err(ChainsockError::internal(InternalError::OutOfBuffer));
        }

        let deadline = Deadline::after(self.timeout);
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(pos) = find_newline(&self.carry) {
                let line = trim_line_ending(&self.carry[..=pos]);
                if line.len() > buf.len() {
                    return Err(overflow(&mut self.carry, buf));
                }
                let len = line.len();
                buf[..len].copy_from_slice(line);
                self.carry.advance(pos + 1);
                return Ok(len);
            }

            // a trailing '\r' may still turn out to be part of the terminator
            let pending = self.carry.len() - usize::from(self.carry.ends_with(b"\r"));
            if pending > buf.len() {
                return Err(overflow(&mut self.carry, buf));
            }

            let n = recv_some(stream, &mut chunk, deadline)?;
            self.carry.extend_from_slice(&chunk[..n]);
        }
    }

    /// Whether data can be read without blocking
    ///
    /// Buffered bytes count as readable. A peer that has closed the
    /// connection fails with [`InternalError::RemoteDisconnected`].
    pub fn peek(&mut self) -> Result<bool> {
        let result = match self.stream {
            Some(_) if !self.carry.is_empty() => Ok(true),
            Some(ref mut stream) => stream.poll_readable(),
            None => Err(ChainsockError::internal(InternalError::NoSocket)),
        };
        self.record(result)
    }

    /// Close the connection
    ///
    /// Sends a TLS close_notify when applicable. Buffered bytes are
    /// discarded but the buffer allocation is kept. Calling this on a
    /// disconnected session does nothing.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
            debug!("Disconnected from {:?}", self.target);
        }
        self.carry.clear();
    }

    /// Disconnect and release buffers, TLS context and the last error
    ///
    /// The chain, timeout and options are kept, so the session behaves like
    /// a freshly built one.
    pub fn clear(&mut self) {
        self.disconnect();
        self.carry = BytesMut::new();
        #[cfg(feature = "rustls-tls")]
        {
            self.tls_context = None;
        }
        self.target = None;
        self.last_error = None;
    }

    /// Whether the session holds an established connection
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the established connection is TLS
    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().is_some_and(Stream::is_tls)
    }

    /// The target of the current or last connection attempt
    pub fn target(&self) -> Option<&Endpoint> {
        self.target.as_ref()
    }

    /// Error of the most recent operation
    ///
    /// Every operation overwrites the slot; a successful one resets it to
    /// `None`.
    pub fn last_error(&self) -> Option<&ChainsockError> {
        self.last_error.as_ref()
    }

    /// Forget the most recent error
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Index of the proxy that caused the most recent error
    pub fn failed_hop(&self) -> Option<usize> {
        self.last_error.as_ref().and_then(ChainsockError::hop)
    }

    /// Most recent error with the address of the hop that caused it
    pub fn error_detailed(&self) -> Option<String> {
        let err = self.last_error.as_ref()?;
        let place = match err.hop() {
            Some(hop) => match self.chain.get(hop) {
                Some(proxy) => format!("proxy #{} {}", hop, proxy.endpoint()),
                None => format!("proxy #{}", hop),
            },
            None => match self.target {
                Some(ref target) => format!("target {}", target),
                None => "target".to_string(),
            },
        };
        Some(format!("{} (at {})", err, place))
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = result.as_ref().err().cloned();
        result
    }

    fn record_transfer(
        &mut self,
        result: std::result::Result<usize, TransferError>,
    ) -> std::result::Result<usize, TransferError> {
        self.last_error = result.as_ref().err().map(|e| e.error.clone());
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[track_caller]
fn no_socket() -> TransferError {
    TransferError::new(0, ChainsockError::internal(InternalError::NoSocket))
}

/// Hand out the first `buf.len()` bytes of an oversized line
#[track_caller]
fn overflow(carry: &mut BytesMut, buf: &mut [u8]) -> ChainsockError {
    let len = buf.len();
    buf.copy_from_slice(&carry[..len]);
    carry.advance(len);
    ChainsockError::internal(InternalError::OutOfBuffer)
}

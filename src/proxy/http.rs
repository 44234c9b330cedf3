//! HTTP CONNECT client handshake
//!
//! The response is read one byte at a time so that nothing past the blank
//! line ending the headers is taken off the socket; those bytes already
//! belong to the tunnel.

use super::consts::HTTP_CONNECT_VERSION;
use super::{send_request, Credentials};
use crate::error::{ChainsockError, InternalError, Result};
use crate::helper::{trim_line_ending, MAX_HANDSHAKE_LINE};
use crate::transport::deadline::recv_until;
use crate::transport::{Deadline, Endpoint, TimedStream};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, trace};

/// Build the CONNECT request for `next`
fn build_request(next: &Endpoint, credentials: Option<&Credentials>) -> String {
    let authority = next.authority();
    let mut request = format!(
        "CONNECT {} {}\r\nHost: {}\r\n",
        authority, HTTP_CONNECT_VERSION, authority
    );
    if let Some(credentials) = credentials {
        let token = STANDARD.encode(format!(
            "{}:{}",
            credentials.username, credentials.password
        ));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    request
}

/// Read one line, without its terminator
///
/// Lines longer than `limit` fail with [`InternalError::OutOfBuffer`].
fn read_line<S: TimedStream>(stream: &mut S, limit: usize, deadline: Deadline) -> Result<String> {
    let line = recv_until(stream, b'\n', limit, deadline).map_err(|e| {
        match e.error.internal_kind() {
            Some(InternalError::RemoteDisconnected) => {
                ChainsockError::internal(InternalError::ProxyUnexpectedResponse)
            }
            _ => e.error,
        }
    })?;
    Ok(String::from_utf8_lossy(trim_line_ending(&line)).into_owned())
}

/// Parse `HTTP/x.y NNN reason` into the status code
fn parse_status_line(line: &str) -> Result<u16> {
    let unexpected = || ChainsockError::internal(InternalError::ProxyUnexpectedResponse);

    let mut parts = line.split_whitespace();
    let version = parts.next().ok_or_else(unexpected)?;
    let code = parts.next().ok_or_else(unexpected)?;

    let valid_version = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .is_some_and(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        });
    if !valid_version || code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unexpected());
    }

    code.parse().map_err(|_| unexpected())
}

/// Consume header lines up to and including the blank line
fn drain_headers<S: TimedStream>(stream: &mut S, deadline: Deadline) -> Result<()> {
    loop {
        let header = read_line(stream, MAX_HANDSHAKE_LINE, deadline)?;
        if header.is_empty() {
            return Ok(());
        }
        trace!("HTTP proxy header: {}", header);
    }
}

/// Ask the HTTP proxy on `stream` to open a tunnel to `next`
pub(super) fn negotiate<S: TimedStream>(
    stream: &mut S,
    next: &Endpoint,
    credentials: Option<&Credentials>,
    deadline: Deadline,
) -> Result<()> {
    debug!("HTTP CONNECT to {}", next);
    send_request(stream, build_request(next, credentials).as_bytes(), deadline)?;

    let status_line = read_line(stream, MAX_HANDSHAKE_LINE, deadline)?;
    let status = parse_status_line(&status_line)?;
    let headers = drain_headers(stream, deadline);

    if !(200..300).contains(&status) {
        debug!("HTTP proxy refused CONNECT: {}", status_line);
        return Err(ChainsockError::internal(
            InternalError::TargetProxyConnectFailed,
        ));
    }
    headers
}

//! SOCKS5 client handshake
//!
//! Method negotiation, optional username/password sub-negotiation (RFC 1929)
//! and the CONNECT request. The next hop is sent as a domain name unless it
//! is an address literal, so names are resolved by the proxy.

use super::consts::*;
use super::{recv_reply, send_request, Credentials, MAX_CREDENTIAL_LEN};
use crate::error::{ChainsockError, InternalError, Result};
use crate::transport::{Deadline, Endpoint, TimedStream, MAX_HOSTNAME_LEN};
use std::net::IpAddr;
use tracing::debug;

fn unexpected() -> ChainsockError {
    ChainsockError::internal(InternalError::ProxyUnexpectedResponse)
}

/// Method selection greeting
fn build_greeting(with_password: bool) -> Vec<u8> {
    if with_password {
        vec![
            SOCKS5_VERSION,
            2,
            SOCKS5_AUTH_METHOD_NONE,
            SOCKS5_AUTH_METHOD_PASSWORD,
        ]
    } else {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }
}

/// Username/password sub-negotiation request
fn build_auth_request(credentials: &Credentials) -> Result<Vec<u8>> {
    let user = credentials.username.as_bytes();
    let pass = credentials.password.as_bytes();
    if user.len() > MAX_CREDENTIAL_LEN || pass.len() > MAX_CREDENTIAL_LEN {
        return Err(ChainsockError::internal(
            InternalError::Socks5AuthExceedSize,
        ));
    }

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(SOCKS5_AUTH_VERSION);
    request.push(user.len() as u8);
    request.extend_from_slice(user);
    request.push(pass.len() as u8);
    request.extend_from_slice(pass);
    Ok(request)
}

/// CONNECT request for `next`
fn build_connect_request(next: &Endpoint) -> Result<Vec<u8>> {
    let mut request = vec![SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, SOCKS5_RESERVED];

    match next.ip() {
        Some(IpAddr::V4(ip)) => {
            request.push(SOCKS5_ADDR_TYPE_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Some(IpAddr::V6(ip)) => {
            request.push(SOCKS5_ADDR_TYPE_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        None => {
            let host = next.host().as_bytes();
            if host.len() > MAX_HOSTNAME_LEN {
                return Err(ChainsockError::internal(InternalError::HostnameTooLong));
            }
            request.push(SOCKS5_ADDR_TYPE_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host);
        }
    }

    request.extend_from_slice(&next.port().to_be_bytes());
    Ok(request)
}

/// Map a CONNECT reply status to its error, `None` for success
fn reply_error(status: u8) -> Option<InternalError> {
    let err = match status {
        SOCKS5_REPLY_SUCCEEDED => return None,
        SOCKS5_REPLY_GENERAL_FAILURE => InternalError::ProxyGeneralFailure,
        SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => InternalError::ProxyAuthFailed,
        SOCKS5_REPLY_NETWORK_UNREACHABLE => InternalError::TargetProxyNetUnreachable,
        SOCKS5_REPLY_HOST_UNREACHABLE => InternalError::TargetProxyHostUnreachable,
        SOCKS5_REPLY_CONNECTION_REFUSED => InternalError::TargetProxyConnRefused,
        SOCKS5_REPLY_TTL_EXPIRED => InternalError::TargetProxyTtlExpired,
        SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => InternalError::ProxyCommandNotSupported,
        SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => InternalError::ProxyAddressTypeNotSupported,
        _ => InternalError::ProxyUnexpectedResponse,
    };
    Some(err)
}

fn authenticate<S: TimedStream>(
    stream: &mut S,
    credentials: &Credentials,
    deadline: Deadline,
) -> Result<()> {
    send_request(stream, &build_auth_request(credentials)?, deadline)?;

    let mut reply = [0u8; 2];
    recv_reply(stream, &mut reply, deadline)?;
    if reply[0] != SOCKS5_AUTH_VERSION {
        return Err(unexpected());
    }
    if reply[1] != SOCKS5_AUTH_SUCCESS {
        return Err(ChainsockError::internal(InternalError::ProxyAuthFailed));
    }
    Ok(())
}

/// Consume the bound address and port that follow a successful reply
fn skip_bound_addr<S: TimedStream>(stream: &mut S, atyp: u8, deadline: Deadline) -> Result<()> {
    let addr_len = match atyp {
        SOCKS5_ADDR_TYPE_IPV4 => 4,
        SOCKS5_ADDR_TYPE_IPV6 => 16,
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let mut len = [0u8; 1];
            recv_reply(stream, &mut len, deadline)?;
            len[0] as usize
        }
        _ => return Err(unexpected()),
    };

    let mut rest = vec![0u8; addr_len + 2];
    recv_reply(stream, &mut rest, deadline)
}

/// Ask the SOCKS5 proxy on `stream` to connect to `next`
pub(super) fn negotiate<S: TimedStream>(
    stream: &mut S,
    next: &Endpoint,
    credentials: Option<&Credentials>,
    deadline: Deadline,
) -> Result<()> {
    send_request(stream, &build_greeting(credentials.is_some()), deadline)?;

    let mut choice = [0u8; 2];
    recv_reply(stream, &mut choice, deadline)?;
    if choice[0] != SOCKS5_VERSION {
        return Err(unexpected());
    }

    match (choice[1], credentials) {
        (SOCKS5_AUTH_METHOD_NONE, _) => {}
        (SOCKS5_AUTH_METHOD_PASSWORD, Some(credentials)) => {
            debug!("SOCKS5 proxy requested username/password authentication");
            authenticate(stream, credentials, deadline)?;
        }
        (SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE, _) => {
            return Err(ChainsockError::internal(InternalError::ProxyAuthFailed))
        }
        _ => return Err(unexpected()),
    }

    debug!("SOCKS5 CONNECT to {}", next);
    send_request(stream, &build_connect_request(next)?, deadline)?;

    let mut header = [0u8; 4];
    recv_reply(stream, &mut header, deadline)?;
    if header[0] != SOCKS5_VERSION {
        return Err(unexpected());
    }
    if let Some(err) = reply_error(header[1]) {
        return Err(ChainsockError::internal(err));
    }

    skip_bound_addr(stream, header[3], deadline)
}

//! SOCKS4 client handshake
//!
//! SOCKS4 only addresses IPv4 hosts, so the next hop is resolved locally.

use super::consts::*;
use super::{recv_reply, send_request};
use crate::error::{ChainsockError, InternalError, Result};
use crate::transport::{resolve_endpoint, Deadline, Endpoint, Resolver, TimedStream};
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Pick the IPv4 address SOCKS4 will ask the proxy to connect to
///
/// IPv6 literals and names resolving only to IPv6 fail with
/// [`InternalError::Socks4NoIp6`].
fn next_hop_ipv4(next: &Endpoint, resolver: &dyn Resolver) -> Result<Ipv4Addr> {
    match next.ip() {
        Some(IpAddr::V4(ip)) => Ok(ip),
        Some(IpAddr::V6(_)) => Err(ChainsockError::internal(InternalError::Socks4NoIp6)),
        None => resolve_endpoint(next, resolver)?
            .into_iter()
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| ChainsockError::internal(InternalError::Socks4NoIp6)),
    }
}

/// Build a CONNECT request
fn build_request(ip: Ipv4Addr, port: u16, user_id: Option<&str>) -> Vec<u8> {
    let user_id = user_id.unwrap_or_default().as_bytes();
    let mut request = Vec::with_capacity(9 + user_id.len());
    request.push(SOCKS4_VERSION);
    request.push(SOCKS4_CMD_CONNECT);
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&ip.octets());
    request.extend_from_slice(user_id);
    request.push(0x00);
    request
}

/// Check the 8 byte reply
fn parse_reply(reply: &[u8; SOCKS4_REPLY_LEN]) -> Result<()> {
    if reply[0] != SOCKS4_REPLY_VERSION {
        return Err(ChainsockError::internal(
            InternalError::ProxyUnexpectedResponse,
        ));
    }

    let err = match reply[1] {
        SOCKS4_REPLY_GRANTED => return Ok(()),
        SOCKS4_REPLY_REJECTED => InternalError::TargetProxyConnectFailed,
        SOCKS4_REPLY_IDENTD_UNREACHABLE | SOCKS4_REPLY_IDENTD_MISMATCH => {
            InternalError::Socks4NoAuth
        }
        _ => InternalError::ProxyUnexpectedResponse,
    };
    Err(ChainsockError::internal(err))
}

/// Ask the SOCKS4 proxy on `stream` to connect to `next`
pub(super) fn negotiate<S: TimedStream>(
    stream: &mut S,
    next: &Endpoint,
    user_id: Option<&str>,
    resolver: &dyn Resolver,
    deadline: Deadline,
) -> Result<()> {
    let ip = next_hop_ipv4(next, resolver)?;
    debug!("SOCKS4 CONNECT to {}:{} ({})", ip, next.port(), next.host());

    send_request(stream, &build_request(ip, next.port(), user_id), deadline)?;

    let mut reply = [0u8; SOCKS4_REPLY_LEN];
    recv_reply(stream, &mut reply, deadline)?;
    parse_reply(&reply)
}

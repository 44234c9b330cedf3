//! TCP dialing
//!
//! Opens plain TCP connections to an endpoint under a deadline, trying each
//! resolved address in turn.

use super::{resolve_endpoint, Deadline, Endpoint, Resolver, SocketOpts};
use crate::error::{ChainsockError, InternalError, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, warn};

/// Connect to `endpoint` before the deadline
///
/// Every resolved address is attempted in order; the error of the last
/// attempt is returned when none succeeds. A deadline that elapses while
/// connecting yields [`InternalError::HitConnectTimeout`].
pub fn dial(
    endpoint: &Endpoint,
    resolver: &dyn Resolver,
    opts: &SocketOpts,
    deadline: Deadline,
) -> Result<TcpStream> {
    let addrs = resolve_endpoint(endpoint, resolver)?;
    let mut last_err = None;

    for addr in addrs {
        if deadline.is_expired() {
            return Err(ChainsockError::internal(InternalError::HitConnectTimeout));
        }

        match connect_addr(addr, deadline) {
            Ok(stream) => {
                if let Err(e) = opts.apply(&stream) {
                    warn!("Failed to apply socket options: {}", e);
                }
                debug!("TCP connection established to {} ({})", endpoint, addr);
                return Ok(stream);
            }
            Err(e) => {
                warn!("Failed to connect to {} ({}): {}", endpoint, addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ChainsockError::internal(InternalError::HitConnectTimeout)))
}

fn connect_addr(addr: SocketAddr, deadline: Deadline) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ChainsockError::system(&e))?;
    let target = SockAddr::from(addr);

    let connected = match deadline.socket_timeout() {
        Some(timeout) => socket.connect_timeout(&target, timeout),
        None => socket.connect(&target),
    };

    match connected {
        Ok(()) => Ok(TcpStream::from(socket)),
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Err(ChainsockError::internal(InternalError::HitConnectTimeout))
        }
        Err(e) => Err(ChainsockError::system(&e)),
    }
}

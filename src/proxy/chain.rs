//! Proxy chain establishment
//!
//! Dials the first proxy (or the target when the chain is empty) and then
//! asks each proxy in turn to open a tunnel to the following hop. Failures
//! carry the index of the proxy being dialed or negotiated with.

use super::ProxyChain;
use crate::error::Result;
use crate::transport::{dial, Deadline, Endpoint, Resolver, SocketOpts};
use std::net::TcpStream;
use tracing::debug;

/// Open a connection to `target` through every proxy of `chain`
///
/// The whole chain shares one deadline. On failure the partially built
/// tunnel is closed before returning.
pub fn establish(
    chain: &ProxyChain,
    target: &Endpoint,
    resolver: &dyn Resolver,
    opts: &SocketOpts,
    deadline: Deadline,
) -> Result<TcpStream> {
    let Some(first) = chain.get(0) else {
        debug!("Connecting to {} directly", target);
        return dial(target, resolver, opts, deadline);
    };

    debug!("Dialing proxy #0 {}", first);
    let mut stream = dial(first.endpoint(), resolver, opts, deadline).map_err(|e| e.at_hop(0))?;

    for (hop, proxy) in chain.iter().enumerate() {
        let next = chain.get(hop + 1).map_or(target, |p| p.endpoint());
        debug!(
            "Negotiating {} tunnel through proxy #{} to {}",
            proxy.proxy_type(),
            hop,
            next
        );
        proxy
            .negotiate(&mut stream, next, resolver, deadline)
            .map_err(|e| e.at_hop(hop))?;
    }

    debug!("Tunnel to {} established through {} proxies", target, chain.len());
    Ok(stream)
}

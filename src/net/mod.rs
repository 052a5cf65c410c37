//! TCP networking objects for the worker pool.

pub mod tcp;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves `host:port` to an ordered candidate address list. Accepts both
/// names and literal addresses; connection attempts walk the list in order.
pub(crate) fn resolve_host(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    Ok(candidates)
}

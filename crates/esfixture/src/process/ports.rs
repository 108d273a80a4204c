//! Port allocation and availability probing.
//!
//! A dynamic port is obtained by binding `host:0` and releasing the listener
//! straight away. Another process may claim the port before the server binds
//! it. The server then reports an address-in-use failure, which surfaces as
//! [`ProcessError::PortInUse`].

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::error::ProcessError;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Asks the operating system for a free port on `host`.
pub(super) fn allocate_port(host: &str) -> Result<u16, ProcessError> {
    let allocation_error = |source| ProcessError::PortAllocation {
        host: host.to_owned(),
        source,
    };
    let listener = TcpListener::bind((host, 0)).map_err(allocation_error)?;
    let port = listener.local_addr().map_err(allocation_error)?.port();
    drop(listener);
    Ok(port)
}

/// Fails when something already accepts connections on `host:port`.
pub(super) fn ensure_port_available(host: &str, port: u16) -> Result<(), ProcessError> {
    if port_accepts_connections(host, port) {
        return Err(ProcessError::PortInUse {
            host: host.to_owned(),
            port,
            log_tail: None,
        });
    }
    Ok(())
}

/// Whether a listener currently accepts connections on `host:port`.
fn port_accepts_connections(host: &str, port: u16) -> bool {
    resolve_tcp(host, port)
        .and_then(|address| TcpStream::connect_timeout(&address, CONNECT_TIMEOUT))
        .is_ok()
}

fn resolve_tcp(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved address"))
}

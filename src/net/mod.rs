//! Networking primitives
//!
//! The types provided in this module are non-blocking by default and are
//! designed to be portable across all supported platforms. As long as the
//! portability guidelines are followed, the behavior should be identical no
//! matter the target platform.

use std::io;
use std::net::SocketAddr;

mod tcp;
pub use self::tcp::{TcpListener, TcpStream};

mod udp;
pub use self::udp::UdpSocket;

#[cfg(unix)]
mod uds;
#[cfg(unix)]
pub use self::uds::{UnixDatagram, UnixListener, UnixStream};

/// Convert a [`socket2::SockAddr`] back into a [`std::net::SocketAddr`],
/// erroring out on exotic address families `socket2` accepts but `std`
/// doesn't.
pub(crate) fn convert_address(address: socket2::SockAddr) -> io::Result<SocketAddr> {
    address
        .as_socket()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address family"))
}

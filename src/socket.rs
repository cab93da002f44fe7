//! Timed connect, listeners and accept helpers (§3 `Address`, §4.1, §4.9).

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use relaycat::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use relaycat::{Events, Interest, Poll, Token};

use crate::error::{RelayError, RelayResult};

/// An address family filter, derived from `--ipv4-only`/`--ipv6-only`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressFilter {
    pub ipv4_only: bool,
    pub ipv6_only: bool,
}

impl AddressFilter {
    fn accepts(&self, addr: &SocketAddr) -> bool {
        match addr {
            SocketAddr::V4(_) => !self.ipv6_only,
            SocketAddr::V6(_) => !self.ipv4_only,
        }
    }
}

/// Resolves `host:port` to an ordered address list honoring `filter`
/// (§3: "a resolver step produces an ordered address list for
/// connect-fallback").
pub fn resolve(host: &str, port: u16, filter: AddressFilter) -> RelayResult<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| RelayError::UnknownHost)?
        .filter(|addr| filter.accepts(addr))
        .collect();
    if addrs.is_empty() {
        Err(RelayError::UnknownHost)
    } else {
        Ok(addrs)
    }
}

const CONNECT_TOKEN: Token = Token(0);

/// Attempts a non-blocking connect to `addr`, waiting up to `timeout` for
/// writability and then reading `SO_ERROR` (§4.1 steps 3-5).
fn try_connect(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1);
    poll.registry()
        .register(&mut stream, CONNECT_TOKEN, Interest::WRITABLE)?;
    poll.poll(&mut events, Some(timeout))?;

    if events.iter().next().is_none() {
        return Err(io::Error::from(io::ErrorKind::TimedOut));
    }

    match stream.take_error()? {
        Some(err) => Err(err),
        None => Ok(stream),
    }
}

/// `open_tcp_client` (§4.1): tries each resolved address in turn, returning
/// the first success, else the last observed error, else `UnknownHost`.
pub fn open_tcp_client(
    host: &str,
    port: u16,
    timeout: Duration,
    filter: AddressFilter,
) -> RelayResult<TcpStream> {
    let addrs = resolve(host, port, filter)?;
    let mut last_err: Option<io::Error> = None;

    for addr in addrs {
        match try_connect(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(RelayError::from_io(err)),
        None => Err(RelayError::UnknownHost),
    }
}

/// `open_tcp_listener` (§4.1): bind + listen. `relaycat::net::TcpListener`
/// already enables `SO_REUSEADDR` and binds non-blocking; `SO_REUSEPORT` is
/// best-effort and silently skipped where the platform lacks it.
pub fn open_tcp_listener(addr: SocketAddr) -> RelayResult<TcpListener> {
    TcpListener::bind(addr).map_err(RelayError::from_io)
}

/// `accept_connection` (§4.1): polls with `timeout` (if non-zero) then
/// accepts; a `None` timeout means blocking accept.
pub fn accept_connection(
    listener: &mut TcpListener,
    timeout: Option<Duration>,
) -> RelayResult<(TcpStream, SocketAddr)> {
    let mut poll = Poll::new().map_err(RelayError::from_io)?;
    let mut events = Events::with_capacity(1);
    poll.registry()
        .register(listener, CONNECT_TOKEN, Interest::READABLE)
        .map_err(RelayError::from_io)?;

    loop {
        poll.poll(&mut events, timeout).map_err(RelayError::from_io)?;
        if events.iter().next().is_none() && timeout.is_some() {
            return Err(RelayError::ConnectionTimeout);
        }
        match listener.accept() {
            Ok(pair) => return Ok(pair),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
            Err(err) => return Err(RelayError::from_io(err)),
        }
    }
}

/// `open_unix_client`/`open_unix_listener` (§4.9): path validation has
/// already run in [`crate::config::Config::validate`]; this just opens the
/// socket, removing a stale listener file first.
pub fn open_unix_client(path: &Path) -> RelayResult<UnixStream> {
    UnixStream::connect(path).map_err(RelayError::from_io)
}

pub fn open_unix_listener(path: &Path) -> RelayResult<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(RelayError::from_io)?;
        }
    }
    if path.exists() {
        std::fs::remove_file(path).map_err(RelayError::from_io)?;
    }
    UnixListener::bind(path).map_err(RelayError::from_io)
}

pub fn cleanup_unix_listener(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Opens an SCTP client socket (Linux only; §4.1 "SCTP"). Other platforms
/// never reach here because `Config::validate` rejects `--sctp` up front.
#[cfg(target_os = "linux")]
pub fn open_sctp_client(addr: SocketAddr, timeout: Duration) -> RelayResult<socket2::Socket> {
    use socket2::{Domain, Protocol, SockAddr, Socket, Type};

    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::from(libc::IPPROTO_SCTP)))
        .map_err(RelayError::from_io)?;
    socket.set_nonblocking(true).map_err(RelayError::from_io)?;

    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS) => {
            wait_writable(&socket, timeout)?;
            if let Some(err) = socket.take_error().map_err(RelayError::from_io)? {
                return Err(RelayError::from_io(err));
            }
        }
        Err(err) => return Err(RelayError::from_io(err)),
    }

    Ok(socket)
}

#[cfg(target_os = "linux")]
fn wait_writable(socket: &socket2::Socket, timeout: Duration) -> RelayResult<()> {
    use relaycat::unix::SourceFd;
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    let mut poll = Poll::new().map_err(RelayError::from_io)?;
    let mut events = Events::with_capacity(1);
    poll.registry()
        .register(&mut SourceFd(&fd), CONNECT_TOKEN, Interest::WRITABLE)
        .map_err(RelayError::from_io)?;
    poll.poll(&mut events, Some(timeout)).map_err(RelayError::from_io)?;
    if events.iter().next().is_none() {
        return Err(RelayError::ConnectionTimeout);
    }
    Ok(())
}

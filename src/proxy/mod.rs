//! Proxy-protocol clients (§4.8): establish an underlying TCP connection
//! through an intermediate proxy, returning a ready-to-use socket.

mod connect;
mod socks4;
mod socks5;

use std::time::Duration;

use relaycat::net::TcpStream;

use crate::config::{Config, ProxyType};
use crate::error::{RelayError, RelayResult};
use crate::socket::{open_tcp_client, AddressFilter};

/// 30-second read timeout guarding each proxy recv (§4.8).
pub const PROXY_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Parses `--proxy host:port` and dispatches to the configured proxy type,
/// returning a connected socket to `target_host:target_port` as seen by the
/// far side of the proxy.
pub fn connect_via_proxy(cfg: &Config, target_host: &str, target_port: u16) -> RelayResult<TcpStream> {
    let proxy_addr = cfg
        .proxy
        .as_deref()
        .ok_or_else(|| RelayError::InvalidConfiguration("--proxy is required".into()))?;
    let (proxy_host, proxy_port) = split_host_port(proxy_addr)?;

    let connect_timeout = Duration::from_millis(cfg.connect_timeout);
    let stream = open_tcp_client(proxy_host, proxy_port, connect_timeout, AddressFilter::default())?;

    match cfg.proxy_type {
        ProxyType::Socks5 => socks5::handshake(stream, target_host, target_port, cfg),
        ProxyType::Socks4 => socks4::handshake(stream, target_host, target_port, cfg),
        ProxyType::Connect => connect::handshake(stream, target_host, target_port, cfg),
    }
}

fn split_host_port(addr: &str) -> RelayResult<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| RelayError::InvalidConfiguration("--proxy must be host:port".into()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RelayError::InvalidConfiguration("invalid proxy port".into()))?;
    Ok((host, port))
}

/// §4.8 step 6 / open question: loops a `recv`-like closure until at least
/// `min` bytes have been read into `buf`, honoring `deadline`.
pub(crate) fn read_at_least(
    mut recv: impl FnMut(&mut [u8]) -> std::io::Result<usize>,
    buf: &mut [u8],
    min: usize,
    deadline: std::time::Instant,
) -> RelayResult<usize> {
    let mut filled = 0;
    while filled < min {
        if std::time::Instant::now() >= deadline {
            return Err(RelayError::ProxyTimeout);
        }
        match recv(&mut buf[filled..]) {
            Ok(0) => return Err(RelayError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) => return Err(RelayError::from_io(err)),
        }
    }
    Ok(filled)
}

/// Either an address (for ATYP selection) or a too-long domain name.
pub(crate) enum TargetAddress<'a> {
    V4(std::net::Ipv4Addr),
    V6(std::net::Ipv6Addr),
    Domain(&'a str),
}

pub(crate) fn classify_target(host: &str) -> RelayResult<TargetAddress<'_>> {
    if let Ok(addr) = host.parse::<std::net::Ipv4Addr>() {
        return Ok(TargetAddress::V4(addr));
    }
    if let Ok(addr) = host.parse::<std::net::Ipv6Addr>() {
        return Ok(TargetAddress::V6(addr));
    }
    if host.len() > 255 {
        return Err(RelayError::DomainNameTooLong);
    }
    Ok(TargetAddress::Domain(host))
}

//! SOCKS4 / SOCKS4A — shares the connect/timeout scaffolding with SOCKS5
//! but differs in message formatting and reply parsing (§4.8).

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::time::Instant;

use relaycat::net::TcpStream;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

use super::{read_at_least, PROXY_READ_TIMEOUT};

const VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const REQUEST_GRANTED: u8 = 0x5a;
/// SOCKS4A's "invalid IP" sentinel: 0.0.0.x with x != 0 signals the server
/// to resolve the hostname that follows the user-id field.
const SOCKS4A_SENTINEL: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

pub(crate) fn handshake(
    mut stream: TcpStream,
    target_host: &str,
    target_port: u16,
    cfg: &Config,
) -> RelayResult<TcpStream> {
    let deadline = Instant::now() + PROXY_READ_TIMEOUT;
    let user = cfg.proxy_user.as_deref().unwrap_or("");

    let mut req = vec![VERSION, CMD_CONNECT];
    req.extend_from_slice(&target_port.to_be_bytes());

    let domain = match target_host.parse::<Ipv4Addr>() {
        Ok(addr) => {
            req.extend_from_slice(&addr.octets());
            None
        }
        Err(_) => {
            req.extend_from_slice(&SOCKS4A_SENTINEL.octets());
            Some(target_host)
        }
    };

    req.extend_from_slice(user.as_bytes());
    req.push(0);
    if let Some(host) = domain {
        req.extend_from_slice(host.as_bytes());
        req.push(0);
    }

    stream.write_all(&req).map_err(RelayError::from_io)?;

    let mut reply = [0u8; 8];
    read_at_least(|b| stream.read(b), &mut reply, 8, deadline)?;

    if reply[1] != REQUEST_GRANTED {
        return Err(RelayError::ProxyRequestRejected);
    }
    Ok(stream)
}

//! SOCKS5 (RFC 1928, with RFC 1929 authentication) — §4.8.

use std::io::{Read, Write};
use std::time::Instant;

use relaycat::net::TcpStream;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

use super::{classify_target, read_at_least, TargetAddress, PROXY_READ_TIMEOUT};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

pub(crate) fn handshake(
    mut stream: TcpStream,
    target_host: &str,
    target_port: u16,
    cfg: &Config,
) -> RelayResult<TcpStream> {
    let deadline = Instant::now() + PROXY_READ_TIMEOUT;
    let have_creds = cfg.proxy_user.is_some() && cfg.proxy_pass.is_some();

    // Step 2: method selection.
    let methods: &[u8] = if have_creds {
        &[METHOD_NO_AUTH, METHOD_USERNAME_PASSWORD]
    } else {
        &[METHOD_NO_AUTH]
    };
    let mut req = vec![VERSION, methods.len() as u8];
    req.extend_from_slice(methods);
    write_all(&mut stream, &req)?;

    // Step 3: method response.
    let mut resp = [0u8; 2];
    read_at_least(|b| stream.read(b), &mut resp, 2, deadline)?;
    if resp[0] != VERSION {
        return Err(RelayError::InvalidProxyResponse);
    }
    match resp[1] {
        METHOD_NO_AUTH => {}
        METHOD_USERNAME_PASSWORD if have_creds => authenticate(&mut stream, cfg, deadline)?,
        METHOD_USERNAME_PASSWORD => return Err(RelayError::AuthenticationRequired),
        METHOD_NO_ACCEPTABLE => return Err(RelayError::NoAcceptableAuthMethod),
        _ => return Err(RelayError::InvalidProxyResponse),
    }

    // Step 5: CONNECT request.
    let mut req = vec![VERSION, CMD_CONNECT, 0x00];
    match classify_target(target_host)? {
        TargetAddress::V4(addr) => {
            req.push(ATYP_V4);
            req.extend_from_slice(&addr.octets());
        }
        TargetAddress::V6(addr) => {
            req.push(ATYP_V6);
            req.extend_from_slice(&addr.octets());
        }
        TargetAddress::Domain(name) => {
            req.push(ATYP_DOMAIN);
            req.push(name.len() as u8);
            req.extend_from_slice(name.as_bytes());
        }
    }
    req.extend_from_slice(&target_port.to_be_bytes());
    write_all(&mut stream, &req)?;

    // Step 6: reply.
    let mut head = [0u8; 4];
    read_at_least(|b| stream.read(b), &mut head, 4, deadline)?;
    if head[0] != VERSION {
        return Err(RelayError::InvalidProxyResponse);
    }
    if head[3] == 0 {
        return Err(RelayError::InvalidProxyResponse);
    }
    let addr_len = match head[3] {
        ATYP_V4 => 4,
        ATYP_V6 => 16,
        ATYP_DOMAIN => {
            let mut len_byte = [0u8; 1];
            read_at_least(|b| stream.read(b), &mut len_byte, 1, deadline)?;
            len_byte[0] as usize
        }
        _ => return Err(RelayError::InvalidProxyResponse),
    };
    let mut tail = vec![0u8; addr_len + 2];
    if addr_len + 2 > 0 {
        read_at_least(|b| stream.read(b), &mut tail, addr_len + 2, deadline)?;
    }

    map_reply_code(head[1])?;
    Ok(stream)
}

fn authenticate(stream: &mut TcpStream, cfg: &Config, deadline: Instant) -> RelayResult<()> {
    let user = cfg.proxy_user.as_deref().unwrap_or_default();
    let pass = cfg.proxy_pass.as_deref().unwrap_or_default();
    if user.len() > 255 {
        return Err(RelayError::UsernameTooLong);
    }
    if pass.len() > 255 {
        return Err(RelayError::PasswordTooLong);
    }

    let mut req = vec![0x01u8, user.len() as u8];
    req.extend_from_slice(user.as_bytes());
    req.push(pass.len() as u8);
    req.extend_from_slice(pass.as_bytes());
    write_all(stream, &req)?;

    let mut resp = [0u8; 2];
    read_at_least(|b| stream.read(b), &mut resp, 2, deadline)?;
    if resp[1] != 0 {
        return Err(RelayError::AuthenticationFailed);
    }
    Ok(())
}

fn map_reply_code(rep: u8) -> RelayResult<()> {
    match rep {
        0x00 => Ok(()),
        _ => Err(RelayError::ProxyRequestRejected),
    }
}

fn write_all(stream: &mut TcpStream, buf: &[u8]) -> RelayResult<()> {
    stream.write_all(buf).map_err(RelayError::from_io)
}

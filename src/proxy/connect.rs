//! HTTP CONNECT (RFC 7231 §4.3.6) — shares connect/timeout scaffolding with
//! SOCKS5 but differs in message formatting and reply parsing (§4.8).

use std::io::{Read, Write};
use std::time::Instant;

use relaycat::net::TcpStream;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

use super::PROXY_READ_TIMEOUT;

pub(crate) fn handshake(
    mut stream: TcpStream,
    target_host: &str,
    target_port: u16,
    cfg: &Config,
) -> RelayResult<TcpStream> {
    let deadline = Instant::now() + PROXY_READ_TIMEOUT;

    let mut request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
        host = target_host,
        port = target_port,
    );
    if let (Some(user), Some(pass)) = (&cfg.proxy_user, &cfg.proxy_pass) {
        let creds = base64_encode(format!("{user}:{pass}").as_bytes());
        request.push_str(&format!("Proxy-Authorization: Basic {creds}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).map_err(RelayError::from_io)?;

    let status_line = read_status_line(&mut stream, deadline)?;
    if !is_success_status(&status_line) {
        return Err(RelayError::ProxyRequestRejected);
    }
    Ok(stream)
}

/// Reads bytes one at a time until `\r\n\r\n` (end of headers) or the
/// deadline passes, returning just the status line for validation.
fn read_status_line(stream: &mut TcpStream, deadline: Instant) -> RelayResult<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if Instant::now() >= deadline {
            return Err(RelayError::ProxyTimeout);
        }
        match stream.read(&mut byte) {
            Ok(0) => return Err(RelayError::ConnectionClosed),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n\r\n") {
                    break;
                }
                if buf.len() > 8192 {
                    return Err(RelayError::InvalidProxyResponse);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) => return Err(RelayError::from_io(err)),
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().unwrap_or_default().to_string();
    Ok(status_line)
}

fn is_success_status(status_line: &str) -> bool {
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .is_some_and(|code| (200..300).contains(&code))
}

/// Minimal base64 encoder for `Proxy-Authorization: Basic`, avoiding a new
/// dependency for a single 3-byte-to-4-char table lookup.
fn base64_encode(input: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();
        out.push(TABLE[(b0 >> 2) as usize] as char);
        out.push(TABLE[(((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4)) as usize] as char);
        out.push(match b1 {
            Some(b1) => TABLE[(((b1 & 0x0f) << 2) | (b2.unwrap_or(0) >> 6)) as usize] as char,
            None => '=',
        });
        out.push(match b2 {
            Some(b2) => TABLE[(b2 & 0x3f) as usize] as char,
            None => '=',
        });
    }
    out
}

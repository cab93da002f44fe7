//! The bidirectional relay (§4.2): two concurrent byte pumps between stdio
//! and a peer endpoint, plaintext or TLS, with flow control, optional CRLF
//! translation, and hex-dump/file logging.

use std::io::{self, Read, Write};
use std::time::Duration;

use relaycat::net::TcpStream;
use relaycat::{event, Events, Interest, Poll, Registry, Token};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::hexdump::HexDumper;
use crate::tls::TlsConnection;
use crate::timeout::TimeoutTracker;

const STDIN_TOKEN: Token = Token(0);
const PEER_TOKEN: Token = Token(1);
const BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_STDIN_IDLE_SECS: u64 = 30;

/// Either a plaintext socket or a TLS-wrapped one; both implement
/// `event::Source` by delegating to the underlying `TcpStream`.
pub enum Peer {
    Plain(TcpStream),
    Tls(TlsConnection),
}

impl Peer {
    fn read(&mut self, buf: &mut [u8]) -> RelayResult<usize> {
        match self {
            Peer::Plain(s) => s.read(buf).map_err(RelayError::from_io),
            Peer::Tls(t) => t.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> RelayResult<usize> {
        match self {
            Peer::Plain(s) => s.write(buf).map_err(RelayError::from_io),
            Peer::Tls(t) => t.write(buf),
        }
    }

    fn close(&mut self) {
        if let Peer::Tls(t) = self {
            t.close();
        }
    }
}

impl event::Source for Peer {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Peer::Plain(s) => s.register(registry, token, interests),
            Peer::Tls(t) => t.socket_mut().register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Peer::Plain(s) => s.reregister(registry, token, interests),
            Peer::Tls(t) => t.socket_mut().reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Peer::Plain(s) => s.deregister(registry),
            Peer::Tls(t) => t.socket_mut().deregister(registry),
        }
    }
}

/// Optional sinks for received bytes (§4.2 step 5).
pub struct Sinks<'a> {
    pub output: Option<&'a mut dyn Write>,
    pub hex_dump: Option<(&'a mut HexDumper, &'a mut dyn Write)>,
}

/// `bidirectional_transfer` (§4.2). Drives stdin<->peer until both
/// directions are closed, an idle timeout fires, or a fatal error occurs.
pub fn bidirectional_transfer(mut peer: Peer, cfg: &Config, mut sinks: Sinks<'_>) -> RelayResult<()> {
    let mut poll = Poll::new().map_err(RelayError::from_io)?;
    let mut events = Events::with_capacity(8);

    let stdin_fd = 0;
    #[cfg(unix)]
    let mut stdin_source = relaycat::unix::SourceFd(&stdin_fd);

    let mut stdin_closed = false;
    let mut peer_closed = false;
    let mut stdin_registered = false;

    let send_only = cfg.send_only;
    let recv_only = cfg.recv_only;

    poll.registry()
        .register(&mut peer, PEER_TOKEN, peer_interest(peer_closed, send_only))
        .map_err(RelayError::from_io)?;

    if !recv_only {
        poll.registry()
            .register(&mut stdin_source, STDIN_TOKEN, Interest::READABLE)
            .map_err(RelayError::from_io)?;
        stdin_registered = true;
    }

    // §4.2 step 2: an explicit `--idle-timeout` always wins; absent that, an
    // interactive stdin waits forever, and a non-interactive one gets the
    // 30s default.
    let mut tracker = if cfg.idle_timeout > 0 {
        TimeoutTracker::with_idle(cfg.idle_timeout)
    } else if stdin_is_tty() {
        TimeoutTracker::new(None, None, None)
    } else {
        TimeoutTracker::with_idle(DEFAULT_STDIN_IDLE_SECS * 1000)
    };

    let mut in_buf = [0u8; BUFFER_SIZE];
    let mut out_buf = [0u8; BUFFER_SIZE];

    let result = loop {
        if stdin_closed && peer_closed {
            break Ok(());
        }

        if stdin_registered && (recv_only || stdin_closed) {
            let _ = poll.registry().deregister(&mut stdin_source);
            stdin_registered = false;
        } else if !stdin_registered && !recv_only && !stdin_closed {
            if poll
                .registry()
                .register(&mut stdin_source, STDIN_TOKEN, Interest::READABLE)
                .is_ok()
            {
                stdin_registered = true;
            }
        }

        if let Err(err) = poll
            .registry()
            .reregister(&mut peer, PEER_TOKEN, peer_interest(peer_closed, send_only))
        {
            break Err(RelayError::from_io(err));
        }

        let timeout = tracker.next_poll_timeout().or(Some(Duration::from_secs(u64::MAX)));
        if let Err(err) = poll.poll(&mut events, timeout) {
            break Err(RelayError::from_io(err));
        }

        if events.iter().next().is_none() {
            // §4.5: in the bidirectional relay a timeout simply ends the
            // loop rather than propagating as an error exit (contrast the
            // exec session, which treats it as a hard failure).
            if tracker.check().is_some() {
                break Ok(());
            }
            continue;
        }

        let mut stdin_ready = false;
        let mut peer_ready = false;
        let mut peer_errored = false;
        for event in events.iter() {
            if event.token() == STDIN_TOKEN && event.is_readable() {
                stdin_ready = true;
            }
            if event.token() == PEER_TOKEN {
                if event.is_read_closed() || event.is_error() {
                    peer_errored = true;
                }
                if event.is_readable() {
                    peer_ready = true;
                }
            }
        }

        if peer_errored {
            peer_closed = true;
            continue;
        }

        // Tie-break (§4.2): stdin -> peer is processed first.
        if stdin_ready && !stdin_closed && !recv_only {
            match io::stdin().read(&mut in_buf) {
                Ok(0) => {
                    stdin_closed = true;
                    if cfg.close_on_eof {
                        break Ok(());
                    }
                }
                Ok(n) => {
                    tracker.mark_activity();
                    let payload = if cfg.crlf {
                        crlf_translate(&in_buf[..n])
                    } else {
                        in_buf[..n].to_vec()
                    };
                    match peer.write(&payload) {
                        Ok(_) => {}
                        Err(err) if err.is_recoverable() => {}
                        Err(err) => break Err(err),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => break Err(RelayError::from_io(err)),
            }
        }

        if peer_ready && !peer_closed && !send_only {
            match peer.read(&mut out_buf) {
                Ok(0) => peer_closed = true,
                Ok(n) => {
                    tracker.mark_activity();
                    deliver(&out_buf[..n], &mut sinks)?;
                }
                Err(err) if err.is_recoverable() => {}
                Err(err) if err.is_peer_closed() => peer_closed = true,
                Err(err) => break Err(err),
            }
        }
    };

    peer.close();
    result
}

/// Whether stdin is an interactive terminal (§4.2 step 2): an interactive
/// session with no traffic waits forever rather than hitting the 30s
/// default meant for piped/redirected input.
#[cfg(unix)]
fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(0) == 1 }
}

#[cfg(not(unix))]
fn stdin_is_tty() -> bool {
    false
}

fn peer_interest(peer_closed: bool, send_only: bool) -> Interest {
    let mut interest = Interest::WRITABLE;
    if !peer_closed && !send_only {
        interest = interest.add(Interest::READABLE);
    }
    interest
}

/// Substitutes `\n` -> `\r\n`. Returns a freshly-allocated buffer only when
/// at least one `\n` was found (§4.2 "freed iff its pointer differs").
fn crlf_translate(input: &[u8]) -> Vec<u8> {
    if !input.contains(&b'\n') {
        return input.to_vec();
    }
    let mut out = Vec::with_capacity(input.len() + input.len() / 8);
    for &b in input {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

fn deliver(data: &[u8], sinks: &mut Sinks<'_>) -> RelayResult<()> {
    match &mut sinks.hex_dump {
        Some((dumper, sink)) => {
            if dumper.dump(data, *sink).is_err() {
                let _ = io::stderr().write_all(data);
            }
        }
        None => {
            let _ = io::stdout().write_all(data);
            if let Some(output) = sinks.output.as_mut() {
                let _ = output.write_all(data);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_translate_leaves_input_without_newlines_untouched() {
        assert_eq!(crlf_translate(b"no newline"), b"no newline".to_vec());
    }

    #[test]
    fn crlf_translate_inserts_cr_before_lf() {
        assert_eq!(crlf_translate(b"a\nb"), b"a\r\nb".to_vec());
    }
}

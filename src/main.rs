//! `relaycat`: a cross-platform, connection-oriented netcat-class relay.

mod error;
mod config;
mod logging;
mod timeout;
mod ring;
mod bufferpool;
mod flow;
mod socket;
mod hexdump;
mod tls;
mod proxy;
mod relay;
mod exec;
mod broker;

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use clap::Parser;

use config::Config;
use error::{RelayError, RelayResult};
use relay::{Peer, Sinks};
use socket::AddressFilter;

fn main() {
    let cfg = Config::parse();
    logging::init(cfg.verbose, cfg.quiet);

    if let Err(err) = cfg.validate() {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }

    match run(&cfg) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if !err.is_peer_closed() {
                log::error!("{err}");
            }
            std::process::exit(err.exit_code());
        }
    }
}

fn run(cfg: &Config) -> RelayResult<()> {
    if cfg.broker || cfg.chat {
        return run_broker(cfg);
    }

    if let Some(path) = &cfg.unix {
        return run_unix(cfg, path);
    }

    if cfg.udp {
        return run_udp(cfg);
    }

    run_tcp_like(cfg)
}

/// TCP and SCTP converge on a `net::TcpStream`-shaped peer, via the raw-fd
/// reinterpretation in [`run_sctp_client`] for the latter.
fn run_tcp_like(cfg: &Config) -> RelayResult<()> {
    let filter = AddressFilter { ipv4_only: cfg.ipv4_only, ipv6_only: cfg.ipv6_only };
    let connect_timeout = Duration::from_millis(cfg.connect_timeout);

    let stream = if cfg.listen {
        let host = cfg.host.as_deref().unwrap_or("0.0.0.0");
        let port = cfg.port.ok_or(RelayError::UnknownHost)?;
        let addr = socket::resolve(host, port, filter)?
            .into_iter()
            .next()
            .ok_or(RelayError::UnknownHost)?;
        let mut listener = socket::open_tcp_listener(addr)?;
        let (stream, _peer_addr) = socket::accept_connection(&mut listener, None)?;
        stream
    } else {
        let host = cfg.host.as_deref().ok_or(RelayError::UnknownHost)?;
        let port = cfg.port.ok_or(RelayError::UnknownHost)?;

        if cfg.sctp {
            return run_sctp_client(cfg, host, port);
        }

        if cfg.proxy.is_some() {
            proxy::connect_via_proxy(cfg, host, port)?
        } else {
            socket::open_tcp_client(host, port, connect_timeout, filter)?
        }
    };

    dispatch_stream(cfg, stream)
}

#[cfg(target_os = "linux")]
fn run_sctp_client(cfg: &Config, host: &str, port: u16) -> RelayResult<()> {
    use std::os::unix::io::{FromRawFd, IntoRawFd};

    let filter = AddressFilter { ipv4_only: cfg.ipv4_only, ipv6_only: cfg.ipv6_only };
    let connect_timeout = Duration::from_millis(cfg.connect_timeout);
    let addr = socket::resolve(host, port, filter)?
        .into_iter()
        .next()
        .ok_or(RelayError::UnknownHost)?;
    let raw = socket::open_sctp_client(addr, connect_timeout)?;
    // SCTP has no dedicated `Peer` variant; reusing `TcpStream`'s raw-fd
    // conversion lets it flow through the same plaintext relay path.
    let stream = unsafe { relaycat::net::TcpStream::from_raw_fd(raw.into_raw_fd()) };
    dispatch_stream(cfg, stream)
}

#[cfg(not(target_os = "linux"))]
fn run_sctp_client(_cfg: &Config, _host: &str, _port: u16) -> RelayResult<()> {
    Err(RelayError::PlatformNotSupported)
}

/// Wraps `stream` in TLS if requested, then runs the exec session or the
/// bidirectional relay, depending on `--exec`.
fn dispatch_stream(cfg: &Config, stream: relaycat::net::TcpStream) -> RelayResult<()> {
    if let Some(command) = &cfg.exec {
        return run_exec(cfg, stream, command);
    }

    let peer = build_peer(cfg, stream)?;
    run_relay(cfg, peer)
}

fn build_peer(cfg: &Config, stream: relaycat::net::TcpStream) -> RelayResult<Peer> {
    if !cfg.ssl {
        return Ok(Peer::Plain(stream));
    }
    let conn = if cfg.listen {
        tls::TlsConnection::accept(stream, cfg)?
    } else {
        let server_name = cfg.host.as_deref().unwrap_or("localhost");
        tls::TlsConnection::connect(stream, server_name, cfg)?
    };
    Ok(Peer::Tls(conn))
}

fn run_relay(cfg: &Config, peer: Peer) -> RelayResult<()> {
    let mut output_file = cfg
        .output
        .as_ref()
        .map(|path| open_output_file(path, cfg.append))
        .transpose()?;

    let mut hex_dumper = cfg.hex_dump.is_some().then(hexdump::HexDumper::new);
    let mut hex_file = match &cfg.hex_dump {
        Some(path) if !path.as_os_str().is_empty() => Some(open_output_file(path, true)?),
        _ => None,
    };
    let mut stderr = std::io::stderr();

    let hex_dump = match (&mut hex_dumper, &mut hex_file) {
        (Some(dumper), Some(file)) => Some((dumper, file as &mut dyn Write)),
        (Some(dumper), None) => Some((dumper, &mut stderr as &mut dyn Write)),
        (None, _) => None,
    };

    let sinks = Sinks {
        output: output_file.as_mut().map(|f| f as &mut dyn Write),
        hex_dump,
    };

    relay::bidirectional_transfer(peer, cfg, sinks)
}

fn run_exec(cfg: &Config, stream: relaycat::net::TcpStream, command: &str) -> RelayResult<()> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| RelayError::InvalidConfiguration("--exec command must not be empty".into()))?;
    let child = Command::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(RelayError::from_io)?;

    exec::run_exec_session(cfg, stream, child)
}

fn run_unix(cfg: &Config, path: &std::path::Path) -> RelayResult<()> {
    // Unix-domain peers are always plaintext; reinterpreting as a
    // `TcpStream` lets them flow through the same exec/relay dispatch as
    // every other transport.
    use std::os::unix::io::{FromRawFd, IntoRawFd};

    let stream = if cfg.listen {
        let listener = socket::open_unix_listener(path)?;
        let result = loop {
            match listener.accept() {
                Ok((stream, _addr)) => break Ok(stream),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) => break Err(RelayError::from_io(err)),
            }
        };
        socket::cleanup_unix_listener(path);
        result?
    } else {
        socket::open_unix_client(path)?
    };

    let tcp_shaped = unsafe { relaycat::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };
    dispatch_stream(cfg, tcp_shaped)
}

fn run_udp(cfg: &Config) -> RelayResult<()> {
    let host = cfg.host.as_deref().ok_or(RelayError::UnknownHost)?;
    let port = cfg.port.ok_or(RelayError::UnknownHost)?;
    let filter = AddressFilter { ipv4_only: cfg.ipv4_only, ipv6_only: cfg.ipv6_only };

    if cfg.listen {
        let bind_addr: std::net::SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
        let socket = relaycat::net::UdpSocket::bind(bind_addr).map_err(RelayError::from_io)?;
        run_udp_relay(cfg, socket, None)
    } else {
        let addr = socket::resolve(host, port, filter)?
            .into_iter()
            .next()
            .ok_or(RelayError::UnknownHost)?;
        let bind_addr: std::net::SocketAddr =
            if filter.ipv6_only { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
        let socket = relaycat::net::UdpSocket::bind(bind_addr).map_err(RelayError::from_io)?;
        run_udp_relay(cfg, socket, Some(addr))
    }
}

/// A datagram-oriented echo of the bidirectional relay's algorithm: no
/// stream framing, so each successful recv/read becomes one independent
/// send/write rather than being pumped through a byte ring.
fn run_udp_relay(
    cfg: &Config,
    mut socket: relaycat::net::UdpSocket,
    mut peer_addr: Option<std::net::SocketAddr>,
) -> RelayResult<()> {
    use relaycat::{Events, Interest, Poll, Token};

    const STDIN_TOKEN: Token = Token(0);
    const SOCKET_TOKEN: Token = Token(1);

    let mut poll = Poll::new().map_err(RelayError::from_io)?;
    let mut events = Events::with_capacity(8);

    let stdin_fd = 0;
    #[cfg(unix)]
    let mut stdin_source = relaycat::unix::SourceFd(&stdin_fd);

    poll.registry()
        .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)
        .map_err(RelayError::from_io)?;
    if !cfg.recv_only {
        poll.registry()
            .register(&mut stdin_source, STDIN_TOKEN, Interest::READABLE)
            .map_err(RelayError::from_io)?;
    }

    let mut tracker = timeout::TimeoutTracker::with_idle(cfg.idle_timeout);
    let mut in_buf = [0u8; 64 * 1024];
    let mut out_buf = [0u8; 64 * 1024];

    loop {
        let timeout = tracker.next_poll_timeout();
        poll.poll(&mut events, timeout).map_err(RelayError::from_io)?;

        if events.iter().next().is_none() {
            // §4.5: a timeout ends the relay cleanly, same as the TCP path.
            if tracker.check().is_some() {
                return Ok(());
            }
            continue;
        }

        for ev in events.iter() {
            if ev.token() == STDIN_TOKEN && ev.is_readable() && !cfg.recv_only {
                match std::io::Read::read(&mut std::io::stdin(), &mut in_buf) {
                    Ok(0) if cfg.close_on_eof => return Ok(()),
                    Ok(0) => {}
                    Ok(n) => {
                        tracker.mark_activity();
                        if let Some(addr) = peer_addr {
                            let _ = socket.send_to(&in_buf[..n], addr);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(RelayError::from_io(err)),
                }
            }
            if ev.token() == SOCKET_TOKEN && ev.is_readable() && !cfg.send_only {
                match socket.recv_from(&mut out_buf) {
                    Ok((n, from)) => {
                        tracker.mark_activity();
                        if peer_addr.is_none() {
                            peer_addr = Some(from);
                        }
                        std::io::stdout().write_all(&out_buf[..n]).map_err(RelayError::from_io)?;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(RelayError::from_io(err)),
                }
            }
        }
    }
}

fn run_broker(cfg: &Config) -> RelayResult<()> {
    let host = cfg.host.as_deref().unwrap_or("0.0.0.0");
    let port = cfg.port.ok_or(RelayError::UnknownHost)?;
    let filter = AddressFilter { ipv4_only: cfg.ipv4_only, ipv6_only: cfg.ipv6_only };
    let addr = socket::resolve(host, port, filter)?
        .into_iter()
        .next()
        .ok_or(RelayError::UnknownHost)?;
    let listener = socket::open_tcp_listener(addr)?;

    let mode = if cfg.chat { broker::Mode::Chat } else { broker::Mode::Broker };
    let mut server = broker::BrokerServer::new(mode, listener, cfg);
    server.run()
}

fn open_output_file(path: &std::path::Path, append: bool) -> RelayResult<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(RelayError::from_io)
}

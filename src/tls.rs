//! `TlsConnection` (§3, §4.2 "TLS specifics"): a `rustls`-backed transport
//! wrapper exposing non-blocking `read`/`write`/`close` over the crate's own
//! `net::TcpStream`.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};

use relaycat::net::TcpStream;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};

enum Role {
    Client(ClientConnection),
    Server(ServerConnection),
}

/// A TLS-wrapped `TcpStream`. Owns the socket; closed (close-notify sent)
/// before the socket handle is released, per §4.2's cleanup contract.
pub struct TlsConnection {
    role: Role,
    socket: TcpStream,
}

impl TlsConnection {
    /// Client-side handshake initiation. The handshake itself is driven
    /// lazily by `read`/`write`, same as plaintext I/O, so callers can
    /// register the socket with `Poll` immediately.
    pub fn connect(socket: TcpStream, server_name: &str, cfg: &Config) -> RelayResult<Self> {
        let client_cfg = build_client_config(cfg)?;
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| RelayError::InvalidConfiguration("invalid TLS server name".into()))?;
        let conn = ClientConnection::new(Arc::new(client_cfg), name)
            .map_err(|_| RelayError::HandshakeFailed)?;
        Ok(TlsConnection { role: Role::Client(conn), socket })
    }

    /// Server-side handshake initiation after `accept`.
    pub fn accept(socket: TcpStream, cfg: &Config) -> RelayResult<Self> {
        let server_cfg = build_server_config(cfg)?;
        let conn = ServerConnection::new(Arc::new(server_cfg)).map_err(|_| RelayError::HandshakeFailed)?;
        Ok(TlsConnection { role: Role::Server(conn), socket })
    }

    /// Pumps ciphertext I/O then decrypts into `buf`. Mirrors §3's
    /// `TlsConnection.read` result classification: recoverable errors
    /// (`WouldBlock`, `BufferTooSmall`, `NetworkTimeout`) vs. fatal ones.
    pub fn read(&mut self, buf: &mut [u8]) -> RelayResult<usize> {
        self.pump_io()?;
        let result = match &mut self.role {
            Role::Client(c) => c.reader().read(buf),
            Role::Server(c) => c.reader().read(buf),
        };
        match result {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(RelayError::WouldBlock),
            Err(err) => Err(classify_io_error(err)),
        }
    }

    /// Encrypts `buf` and pumps ciphertext out. A partial write is treated
    /// as recoverable; the unwritten tail is discarded for this iteration
    /// (§4.2 "Tie-breaks & edge cases").
    pub fn write(&mut self, buf: &[u8]) -> RelayResult<usize> {
        let writer_result = match &mut self.role {
            Role::Client(c) => c.writer().write(buf),
            Role::Server(c) => c.writer().write(buf),
        };
        let n = writer_result.map_err(classify_io_error)?;
        match self.pump_io() {
            Ok(()) => Ok(n),
            Err(RelayError::WouldBlock) => Ok(n),
            Err(err) => Err(err),
        }
    }

    /// Sends a close-notify alert and flushes it, per the cleanup contract.
    pub fn close(&mut self) {
        match &mut self.role {
            Role::Client(c) => c.send_close_notify(),
            Role::Server(c) => c.send_close_notify(),
        }
        let _ = self.pump_io();
    }

    pub fn socket(&self) -> &TcpStream {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    /// Drives handshake/ciphertext I/O to/from the socket without blocking.
    fn pump_io(&mut self) -> RelayResult<()> {
        loop {
            let (wants_read, wants_write) = match &self.role {
                Role::Client(c) => (c.wants_read(), c.wants_write()),
                Role::Server(c) => (c.wants_read(), c.wants_write()),
            };
            if !wants_read && !wants_write {
                return Ok(());
            }

            let mut progressed = false;

            if wants_write {
                let result = match &mut self.role {
                    Role::Client(c) => c.write_tls(&mut self.socket),
                    Role::Server(c) => c.write_tls(&mut self.socket),
                };
                match result {
                    Ok(0) => {}
                    Ok(_) => progressed = true,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(classify_io_error(err)),
                }
            }

            if wants_read {
                let result = match &mut self.role {
                    Role::Client(c) => c.read_tls(&mut self.socket),
                    Role::Server(c) => c.read_tls(&mut self.socket),
                };
                match result {
                    Ok(0) => return Err(RelayError::ConnectionClosed),
                    Ok(_) => {
                        let processed = match &mut self.role {
                            Role::Client(c) => c.process_new_packets(),
                            Role::Server(c) => c.process_new_packets(),
                        };
                        processed.map_err(|_| RelayError::AlertReceived)?;
                        progressed = true;
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(classify_io_error(err)),
                }
            }

            if !progressed {
                return Err(RelayError::WouldBlock);
            }
        }
    }
}

fn classify_io_error(err: io::Error) -> RelayError {
    match err.kind() {
        io::ErrorKind::WouldBlock => RelayError::WouldBlock,
        io::ErrorKind::TimedOut => RelayError::NetworkTimeout,
        io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof => RelayError::ConnectionResetByPeer,
        _ => RelayError::InvalidState,
    }
}

fn build_client_config(cfg: &Config) -> RelayResult<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(ca_path) = &cfg.ca {
        for cert in load_certs(ca_path)? {
            roots.add(cert).map_err(|_| RelayError::CertificateVerificationFailed)?;
        }
    }

    let builder = ClientConfig::builder();
    let config = if cfg.verify_tls() {
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification))
            .with_no_client_auth()
    };
    Ok(config)
}

fn build_server_config(cfg: &Config) -> RelayResult<ServerConfig> {
    let cert_path = cfg
        .cert
        .as_ref()
        .ok_or_else(|| RelayError::InvalidConfiguration("--cert is required for --ssl -l".into()))?;
    let key_path = cfg
        .key
        .as_ref()
        .ok_or_else(|| RelayError::InvalidConfiguration("--key is required for --ssl -l".into()))?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|_| RelayError::InvalidConfiguration("invalid certificate/key pair".into()))
}

fn load_certs(path: &std::path::Path) -> RelayResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(RelayError::from_io)?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RelayError::InvalidConfiguration("unreadable certificate file".into()))
}

fn load_key(path: &std::path::Path) -> RelayResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(RelayError::from_io)?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|_| RelayError::InvalidConfiguration("unreadable key file".into()))?
        .ok_or_else(|| RelayError::InvalidConfiguration("no private key found".into()))
}

/// `--no-verify` support. Insecure by construction; only reachable when the
/// user explicitly asked for it.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::DigitallySignedStruct;

    #[derive(Debug)]
    pub(super) struct NoVerification;

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

//! CLI surface and validated configuration (§6, §3 `Config`).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProxyType {
    Socks5,
    Socks4,
    Connect,
}

/// A cross-platform, connection-oriented netcat-class relay.
#[derive(Debug, Parser)]
#[command(name = "relaycat", version, about)]
pub struct Config {
    /// Host or address to connect to, or to bind when listening.
    pub host: Option<String>,

    /// Port to connect to, or to bind when listening.
    pub port: Option<u16>,

    /// Listen for an incoming connection instead of connecting out.
    #[arg(short = 'l', long)]
    pub listen: bool,

    /// Use UDP instead of TCP.
    #[arg(short = 'u', long)]
    pub udp: bool,

    /// Use SCTP instead of TCP.
    #[arg(long)]
    pub sctp: bool,

    /// Use a Unix-domain socket at the given path instead of TCP/UDP.
    #[arg(short = 'U', long, value_name = "PATH")]
    pub unix: Option<PathBuf>,

    /// Only send; never read from the peer.
    #[arg(long, conflicts_with = "recv_only")]
    pub send_only: bool,

    /// Only receive; never write to the peer.
    #[arg(long, conflicts_with = "send_only")]
    pub recv_only: bool,

    /// Append raw received bytes to this file.
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Append to `--output` instead of truncating.
    #[arg(long, requires = "output")]
    pub append: bool,

    /// Hex-dump received bytes, optionally to a file instead of stderr.
    #[arg(short = 'x', long, value_name = "PATH", num_args = 0..=1, default_missing_value = "")]
    pub hex_dump: Option<PathBuf>,

    /// Run as a broker, relaying every client's bytes to all others.
    #[arg(long, conflicts_with = "chat")]
    pub broker: bool,

    /// Run as a line-oriented chat server with a nickname registry.
    #[arg(long, conflicts_with = "broker")]
    pub chat: bool,

    /// Maximum number of simultaneously connected clients in broker/chat mode.
    #[arg(long, default_value_t = 50)]
    pub max_clients: usize,

    /// Translate outgoing `\n` to `\r\n`.
    #[arg(long)]
    pub crlf: bool,

    /// Terminate as soon as stdin reaches EOF instead of waiting on the peer.
    #[arg(long)]
    pub close_on_eof: bool,

    /// Disconnect/terminate after this many milliseconds of inactivity (0 disables).
    #[arg(long, default_value_t = 0)]
    pub idle_timeout: u64,

    /// Abort a connection attempt after this many milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub connect_timeout: u64,

    /// Only attempt IPv4 addresses.
    #[arg(long, conflicts_with = "ipv6_only")]
    pub ipv4_only: bool,

    /// Only attempt IPv6 addresses.
    #[arg(long, conflicts_with = "ipv4_only")]
    pub ipv6_only: bool,

    /// Increase verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all non-fatal output.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Wrap the connection in TLS.
    #[arg(long)]
    pub ssl: bool,

    /// TLS certificate chain (PEM) for server mode.
    #[arg(long, requires = "ssl", value_name = "PATH")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM) for server mode.
    #[arg(long, requires = "ssl", value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Extra CA certificate bundle (PEM) to trust, in addition to the bundled roots.
    #[arg(long, value_name = "PATH")]
    pub ca: Option<PathBuf>,

    /// Verify the peer's TLS certificate (default: on).
    #[arg(long, default_value_t = true, overrides_with = "no_verify")]
    pub verify: bool,

    /// Disable TLS certificate verification (insecure).
    #[arg(long)]
    pub no_verify: bool,

    /// Connect through a proxy at `host:port`.
    #[arg(long, value_name = "HOST:PORT")]
    pub proxy: Option<String>,

    /// Proxy protocol to speak.
    #[arg(long, value_enum, default_value_t = ProxyType::Socks5, requires = "proxy")]
    pub proxy_type: ProxyType,

    /// Username for proxy authentication.
    #[arg(long, requires = "proxy")]
    pub proxy_user: Option<String>,

    /// Password for proxy authentication.
    #[arg(long, requires = "proxy")]
    pub proxy_pass: Option<String>,

    /// Spawn this command and relay its stdio instead of our own.
    #[arg(short = 'e', long, value_name = "COMMAND")]
    pub exec: Option<String>,

    /// Per-direction ring buffer capacity for exec sessions, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub exec_ring_capacity: usize,

    /// Upper bound on total buffered-but-unsent bytes across an exec
    /// session's three rings before the session aborts.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_total_buffer_bytes: u64,

    /// Percent of `max-total-buffer-bytes` at which exec reads pause (0 disables).
    #[arg(long, default_value_t = 80)]
    pub flow_pause_percent: u8,

    /// Percent of `max-total-buffer-bytes` at which paused exec reads resume.
    #[arg(long, default_value_t = 50)]
    pub flow_resume_percent: u8,

    /// Never use the io_uring exec backend even if the platform supports it.
    #[arg(long)]
    pub no_io_uring: bool,
}

impl Config {
    /// Runs the checks `clap`'s declarative attributes can't express.
    pub fn validate(&self) -> RelayResult<()> {
        if self.send_only && self.recv_only {
            return Err(RelayError::ConflictingIoModes);
        }

        if self.sctp && !cfg!(target_os = "linux") {
            return Err(RelayError::PlatformNotSupported);
        }

        if self.unix.is_some() && !cfg!(unix) {
            return Err(RelayError::PlatformNotSupported);
        }

        if let Some(path) = &self.unix {
            validate_unix_path(path)?;
        }

        if (self.broker || self.chat) && self.max_clients == 0 {
            return Err(RelayError::InvalidConfiguration(
                "--max-clients must be at least 1".into(),
            ));
        }

        if self.ssl && self.listen && (self.cert.is_none() || self.key.is_none()) {
            return Err(RelayError::InvalidConfiguration(
                "--ssl in listen mode requires --cert and --key".into(),
            ));
        }

        Ok(())
    }

    /// Whether TLS certificate verification should be performed, accounting
    /// for both `--verify`/`--no-verify` and their interaction via `clap`'s
    /// `overrides_with`.
    pub fn verify_tls(&self) -> bool {
        self.verify && !self.no_verify
    }
}

fn validate_unix_path(path: &std::path::Path) -> RelayResult<()> {
    let s = path.to_str().ok_or(RelayError::InvalidPathCharacters)?;
    if s.is_empty() {
        return Err(RelayError::InvalidPath);
    }
    if s.len() > 108 {
        return Err(RelayError::PathTooLong);
    }
    if s.as_bytes().contains(&0) {
        return Err(RelayError::PathContainsNull);
    }
    if s.chars().any(|c| c.is_control()) {
        return Err(RelayError::InvalidPathCharacters);
    }
    Ok(())
}

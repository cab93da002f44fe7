//! The typed error taxonomy shared by every relay mode.
//!
//! Every fallible operation in the binary's module tree returns
//! [`RelayResult`]. Call sites dispatch on [`RelayError::kind`] rather than
//! matching individual variants, so new variants can be added to a kind
//! without touching every consumer.

use std::fmt;
use std::io;

/// Coarse classification of a [`RelayError`], matching the retry/propagation
/// rules each category gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bounded-retry, never surfaced to the user.
    Transient,
    /// The peer (or our own side) closed a direction; not an error exit.
    PeerClosed,
    /// A protocol violation or TLS/auth failure; ends the loop.
    Protocol,
    /// Misconfiguration or exhausted resource; ends the loop.
    Resource,
    /// A deadline fired.
    Timeout,
    /// Failure writing the output or hex-dump log.
    OutputIo,
    /// Unix-domain socket path or filesystem problem.
    UnixPath,
    /// Broker/chat client socket error (idle timeout, reset).
    ClientSocket,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // --- transient / recoverable -----------------------------------------
    #[error("operation would block")]
    WouldBlock,
    #[error("network operation timed out")]
    NetworkTimeout,
    #[error("buffer too small for this operation")]
    BufferTooSmall,
    #[error("output file is locked")]
    FileLocked,

    // --- peer-closed --------------------------------------------------
    #[error("connection closed")]
    ConnectionClosed,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("connection reset by peer")]
    ConnectionResetByPeer,

    // --- protocol / semantic --------------------------------------------
    #[error("TLS alert received from peer")]
    AlertReceived,
    #[error("TLS connection in invalid state")]
    InvalidState,
    #[error("TLS handshake failed")]
    HandshakeFailed,
    #[error("TLS certificate verification failed")]
    CertificateVerificationFailed,
    #[error("malformed proxy response")]
    InvalidProxyResponse,
    #[error("proxy offered no acceptable authentication method")]
    NoAcceptableAuthMethod,
    #[error("proxy authentication failed")]
    AuthenticationFailed,
    #[error("proxy requires authentication but no credentials were given")]
    AuthenticationRequired,
    #[error("proxy rejected the connect request")]
    ProxyRequestRejected,
    #[error("proxy username exceeds 255 bytes")]
    UsernameTooLong,
    #[error("proxy password exceeds 255 bytes")]
    PasswordTooLong,
    #[error("domain name exceeds 255 bytes")]
    DomainNameTooLong,
    #[error("TLS was requested but the connection was not built with TLS support")]
    TlsNotEnabled,

    // --- resource / config ------------------------------------------------
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("flow control limit exceeded")]
    FlowControlTriggered,
    #[error("buffer pool exhausted")]
    PoolExhausted,
    #[error("invalid buffer id")]
    InvalidBufferId,
    #[error("buffer already free")]
    BufferAlreadyFree,
    #[error("read completed without a provided buffer")]
    BufferNotProvided,
    #[error("invalid buffer group")]
    InvalidBufferGroup,
    #[error("--send-only and --recv-only are mutually exclusive")]
    ConflictingIoModes,
    #[error("line too long")]
    MessageTooLong,
    #[error("host could not be resolved")]
    UnknownHost,

    // --- timeout ----------------------------------------------------------
    #[error("execution timeout elapsed")]
    TimeoutExecution,
    #[error("idle timeout elapsed")]
    TimeoutIdle,
    #[error("connection timeout elapsed")]
    TimeoutConnection,
    #[error("connect attempt timed out")]
    ConnectionTimeout,
    #[error("proxy handshake timed out")]
    ProxyTimeout,

    // --- output I/O ---------------------------------------------------
    #[error("disk full")]
    DiskFull,
    #[error("insufficient permissions")]
    InsufficientPermissions,
    #[error("output directory not found")]
    DirectoryNotFound,
    #[error("output path too long")]
    PathTooLong,
    #[error("invalid output path")]
    InvalidOutputPath,
    #[error("output path is a directory")]
    IsDirectory,
    #[error("filesystem error: {0}")]
    FileSystemError(String),

    // --- unix-domain path ---------------------------------------------
    #[error("invalid unix socket path")]
    InvalidPath,
    #[error("unix socket path contains a NUL byte")]
    PathContainsNull,
    #[error("unix socket path contains control characters")]
    InvalidPathCharacters,
    #[error("permission denied")]
    PermissionDenied,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("not supported on this platform")]
    PlatformNotSupported,
    #[error("invalid operation")]
    InvalidOperation,

    // --- client socket (broker/chat) --------------------------------------
    #[error("client socket error: {0}")]
    ClientSocketError(String),

    /// Catch-all for a bare `io::Error` that doesn't map cleanly onto a more
    /// specific variant above.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        use RelayError::*;
        match self {
            WouldBlock | NetworkTimeout | BufferTooSmall | FileLocked => ErrorKind::Transient,
            ConnectionClosed | BrokenPipe | ConnectionResetByPeer => ErrorKind::PeerClosed,
            AlertReceived
            | InvalidState
            | HandshakeFailed
            | CertificateVerificationFailed
            | InvalidProxyResponse
            | NoAcceptableAuthMethod
            | AuthenticationFailed
            | AuthenticationRequired
            | ProxyRequestRejected
            | UsernameTooLong
            | PasswordTooLong
            | DomainNameTooLong
            | TlsNotEnabled => ErrorKind::Protocol,
            OutOfMemory
            | InvalidConfiguration(_)
            | FlowControlTriggered
            | PoolExhausted
            | InvalidBufferId
            | BufferAlreadyFree
            | BufferNotProvided
            | InvalidBufferGroup
            | ConflictingIoModes
            | MessageTooLong
            | UnknownHost => ErrorKind::Resource,
            TimeoutExecution | TimeoutIdle | TimeoutConnection | ConnectionTimeout
            | ProxyTimeout => ErrorKind::Timeout,
            DiskFull
            | InsufficientPermissions
            | DirectoryNotFound
            | PathTooLong
            | InvalidOutputPath
            | IsDirectory
            | FileSystemError(_) => ErrorKind::OutputIo,
            InvalidPath
            | PathContainsNull
            | InvalidPathCharacters
            | PermissionDenied
            | ConnectionRefused
            | ResourceExhausted
            | PlatformNotSupported
            | InvalidOperation => ErrorKind::UnixPath,
            ClientSocketError(_) => ErrorKind::ClientSocket,
            Io(err) => io_error_kind(err),
        }
    }

    /// Whether the caller should simply retry on the next wait cycle.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether the affected direction should be treated as EOF/closed rather
    /// than a hard error.
    pub fn is_peer_closed(&self) -> bool {
        self.kind() == ErrorKind::PeerClosed
    }

    /// Maps a raw `io::Error` onto the taxonomy above. Prefer this over
    /// the blanket `From<io::Error>` impl when the call site knows more
    /// about which category the error belongs to.
    pub fn from_io(err: io::Error) -> RelayError {
        match err.kind() {
            io::ErrorKind::WouldBlock => RelayError::WouldBlock,
            io::ErrorKind::TimedOut => RelayError::NetworkTimeout,
            io::ErrorKind::BrokenPipe => RelayError::BrokenPipe,
            io::ErrorKind::ConnectionReset => RelayError::ConnectionResetByPeer,
            io::ErrorKind::ConnectionRefused => RelayError::ConnectionRefused,
            io::ErrorKind::PermissionDenied => RelayError::PermissionDenied,
            _ => RelayError::Io(err),
        }
    }

    /// The process exit code this error should map to (§6: "non-zero with
    /// an OS-style category"). Numeric values are not otherwise meaningful.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Transient | ErrorKind::PeerClosed => 0,
            ErrorKind::Protocol => 1,
            ErrorKind::Resource => 2,
            ErrorKind::Timeout => 3,
            ErrorKind::OutputIo => 4,
            ErrorKind::UnixPath => 5,
            ErrorKind::ClientSocket => 6,
        }
    }
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorKind::Transient,
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof => {
            ErrorKind::PeerClosed
        }
        io::ErrorKind::PermissionDenied => ErrorKind::UnixPath,
        _ => ErrorKind::Resource,
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::PeerClosed => "peer-closed",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Resource => "resource",
            ErrorKind::Timeout => "timeout",
            ErrorKind::OutputIo => "output-io",
            ErrorKind::UnixPath => "unix-path",
            ErrorKind::ClientSocket => "client-socket",
        };
        f.write_str(s)
    }
}

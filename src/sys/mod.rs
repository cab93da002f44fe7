//! Platform-specific bindings backing the public `event`, `net` and `Waker`
//! APIs.
//!
//! Only Unix (epoll or poll(2)) is implemented for now; a Windows IOCP-backed
//! module can be added as `mod windows;` following the same shape.

/// Backlog size passed to `listen(2)` for stream listeners.
pub(crate) const LISTEN_BACKLOG_SIZE: u32 = 1024;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use self::unix::{
    event, tcp, udp, uds, Event, Events, IoSourceState, Selector, Socket, SocketAddr, SourceFd,
    Waker,
};

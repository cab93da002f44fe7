#[cfg(not(target_os = "haiku"))]
mod datagram;
#[cfg(not(target_os = "haiku"))]
pub use self::datagram::UnixDatagram;

mod listener;
pub use self::listener::UnixListener;

mod stream;
pub use self::stream::UnixStream;

mod addr;
pub use self::addr::SocketAddr;

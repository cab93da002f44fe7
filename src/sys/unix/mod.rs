mod selector;
pub(crate) use self::selector::{event, Event, Events, IoSourceState, Selector};

mod sourcefd;
pub use self::sourcefd::SourceFd;

mod waker;
pub(crate) use self::waker::Waker;

pub(crate) mod pipe;

mod net;
mod socket;
pub(crate) use self::socket::Socket;

pub(crate) mod tcp;
pub(crate) mod udp;
pub(crate) mod uds;
pub(crate) use self::uds::SocketAddr;

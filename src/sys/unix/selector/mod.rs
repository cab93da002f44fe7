#[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux", target_os = "redox"))]
mod epoll;

#[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux", target_os = "redox"))]
pub(crate) use self::epoll::{event, Event, Events, IoSourceState, Selector};

#[cfg(not(any(target_os = "android", target_os = "illumos", target_os = "linux", target_os = "redox")))]
mod poll;

#[cfg(not(any(target_os = "android", target_os = "illumos", target_os = "linux", target_os = "redox")))]
pub(crate) use self::poll::{event, Event, Events, Selector};

#[cfg(not(any(target_os = "android", target_os = "illumos", target_os = "linux", target_os = "redox")))]
pub(crate) use self::poll::IoSourceState;

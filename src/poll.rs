use std::time::Duration;
use std::{fmt, io};

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;

use crate::{event, sys, Events, Interest, Token};

/// Polls for readiness events on all registered [`event::Source`]s.
///
/// `Poll` allows a program to monitor a large number of file descriptors /
/// sockets, waiting until one or more become ready for some class of
/// operation, e.g. reading or writing. A type is considered ready if it is
/// possible to immediately perform a corresponding operation.
///
/// To use `Poll`, a source must first be registered with the `Poll` instance
/// via the [`Registry`] returned by [`Poll::registry`], supplying readiness
/// interest. A [`Token`] is also passed, which is returned with any readiness
/// event that the source later produces, allowing the event to be associated
/// back to its source.
pub struct Poll {
    registry: Registry,
}

impl Poll {
    /// Return a new `Poll` handle.
    ///
    /// This starts a new selector backed by the OS (`epoll` on Linux, a
    /// `poll(2)`-based selector elsewhere) and returns a handle on which
    /// events can be polled for.
    pub fn new() -> io::Result<Poll> {
        sys::Selector::new().map(|selector| Poll {
            registry: Registry { selector },
        })
    }

    /// Wait for readiness events to appear for registered sources.
    ///
    /// Blocks the current thread until at least one readiness event is
    /// received or the given `timeout` elapses. A `timeout` of `None` means
    /// `poll` blocks indefinitely.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.registry.selector.select(events.sys(), timeout)
    }

    /// Returns a reference to the `Registry`.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for Poll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poll").finish()
    }
}

#[cfg(unix)]
impl std::os::unix::io::AsRawFd for Poll {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.registry.selector.as_raw_fd()
    }
}

/// Registers I/O resources with a [`Poll`] instance.
pub struct Registry {
    selector: sys::Selector,
}

impl Registry {
    /// Register a source with `Registry`, associating `token` with the
    /// readiness events the caller is interested in.
    pub fn register<S>(&self, source: &mut S, token: Token, interests: Interest) -> io::Result<()>
    where
        S: event::Source + ?Sized,
    {
        trace!("registering event source with poller: token={:?}", token);
        source.register(self, token, interests)
    }

    /// Re-register a source, changing the interests or token used.
    pub fn reregister<S>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()>
    where
        S: event::Source + ?Sized,
    {
        trace!("reregistering event source with poller: token={:?}", token);
        source.reregister(self, token, interests)
    }

    /// Deregister a source, no more events will be generated for it.
    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: event::Source + ?Sized,
    {
        trace!("deregistering event source from poller");
        source.deregister(self)
    }

    /// Creates a new independently owned `Registry` talking to the same
    /// selector.
    pub fn try_clone(&self) -> io::Result<Registry> {
        self.selector
            .try_clone()
            .map(|selector| Registry { selector })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish()
    }
}

#[cfg(unix)]
impl std::os::unix::io::AsRawFd for Registry {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.selector.as_raw_fd()
    }
}

pub(crate) fn selector(registry: &Registry) -> &sys::Selector {
    &registry.selector
}

/// Guards against registering the same `event::Source` implementation with
/// more than one `Poll`/`Registry`, which would silently produce events on
/// the wrong selector.
#[cfg(debug_assertions)]
#[derive(Debug)]
pub(crate) struct SelectorId {
    id: AtomicUsize,
}

#[cfg(debug_assertions)]
impl SelectorId {
    pub(crate) fn new() -> SelectorId {
        SelectorId {
            id: AtomicUsize::new(0),
        }
    }

    pub(crate) fn associate_selector(&self, registry: &Registry) -> io::Result<()> {
        let selector_id = registry.selector.id();

        if self.id.compare_exchange(0, selector_id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
            && self.id.load(Ordering::Relaxed) != selector_id
        {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "I/O source already registered with a different `Registry`",
            ))
        } else {
            Ok(())
        }
    }
}

use std::num::NonZeroU16;
use std::{fmt, ops};

/// Interest used in registering.
///
/// Interest are used in [registering] [`event::Source`]s with [`Poll`], they
/// indicate what readiness should be monitored for. For example if a socket is
/// registered with [readable] interests and the socket becomes writable, no
/// event will be returned from a call to [`poll`].
///
/// The size of `Option<Interest>` should be identical to itself.
///
/// ```
/// use std::mem::size_of;
/// use relaycat::Interest;
///
/// assert_eq!(size_of::<Option<Interest>>(), size_of::<Interest>());
/// ```
///
/// [registering]: crate::Registry::register
/// [`event::Source`]: crate::event::Source
/// [`Poll`]: crate::Poll
/// [readable]: Interest::READABLE
/// [`poll`]: crate::Poll::poll
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Interest(NonZeroU16);

// These must be unique.
const READABLE: u16 = 0b0_001;
const WRITABLE: u16 = 0b0_010;
// The following are not available on all platforms.
#[cfg_attr(
    not(any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos"
    )),
    allow(dead_code)
)]
const AIO: u16 = 0b0_100;
#[cfg_attr(not(target_os = "freebsd"), allow(dead_code))]
const LIO: u16 = 0b1_000;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
const READ_CLOSED: u16 = 0b001_0000;
#[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
const WRITE_CLOSED: u16 = 0b010_0000;

impl Interest {
    /// Returns a `Interest` set representing readable interests.
    pub const READABLE: Interest = Interest(unsafe { NonZeroU16::new_unchecked(READABLE) });

    /// Returns a `Interest` set representing writable interests.
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU16::new_unchecked(WRITABLE) });

    /// Returns a `Interest` set representing AIO completion interests.
    #[cfg(any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos"
    ))]
    pub const AIO: Interest = Interest(unsafe { NonZeroU16::new_unchecked(AIO) });

    /// Returns a `Interest` set representing LIO completion interests.
    #[cfg(target_os = "freebsd")]
    pub const LIO: Interest = Interest(unsafe { NonZeroU16::new_unchecked(LIO) });

    /// Returns a `Interest` set representing read_closed interests.    
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
    pub const READ_CLOSED: Interest = Interest(unsafe { NonZeroU16::new_unchecked(READ_CLOSED) });

    /// Returns a `Interest` set representing write_closed interests.    
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
    pub const WRITE_CLOSED: Interest =
        Interest(unsafe { NonZeroU16::new_unchecked(WRITE_CLOSED) });

    /// Add together two `Interest`.
    ///
    /// This does the same thing as the `BitOr` implementation, but is a
    /// constant function.
    ///
    /// ```
    /// use relaycat::Interest;
    ///
    /// const INTERESTS: Interest = Interest::READABLE.add(Interest::WRITABLE);
    /// # fn silent_dead_code_warning(_: Interest) { }
    /// # silent_dead_code_warning(INTERESTS)
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU16::new_unchecked(self.0.get() | other.0.get()) })
    }

    /// Returns true if the value includes readable readiness.
    pub const fn is_readable(self) -> bool {
        (self.0.get() & READABLE) != 0
    }

    /// Returns true if the value includes writable readiness.
    pub const fn is_writable(self) -> bool {
        (self.0.get() & WRITABLE) != 0
    }

    /// Returns true if `Interest` contains AIO readiness
    pub const fn is_aio(self) -> bool {
        (self.0.get() & AIO) != 0
    }

    /// Returns true if `Interest` contains LIO readiness
    pub const fn is_lio(self) -> bool {
        (self.0.get() & LIO) != 0
    }

    /// Returns true if the value includes read close readiness.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
    pub const fn is_read_closed(self) -> bool {
        (self.0.get() & READ_CLOSED) != 0
    }

    /// Returns true if the value includes write close readiness.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
    pub const fn is_write_closed(self) -> bool {
        (self.0.get() & WRITE_CLOSED) != 0
    }
}

impl ops::BitOr for Interest {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        Interest(unsafe { NonZeroU16::new_unchecked(self.0.get() | other.0.get()) })
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 = (*self | other).0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        if self.is_readable() {
            if one {
                write!(fmt, " | ")?
            }
            write!(fmt, "READABLE")?;
            one = true
        }
        if self.is_writable() {
            if one {
                write!(fmt, " | ")?
            }
            write!(fmt, "WRITABLE")?;
            one = true
        }
        #[cfg(any(
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "ios",
            target_os = "macos"
        ))]
        {
            if self.is_aio() {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "AIO")?;
                one = true
            }
        }
        #[cfg(any(target_os = "freebsd"))]
        {
            if self.is_lio() {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "LIO")?;
                one = true
            }
        }
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
        {
            if self.is_read_closed() {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "READ_CLOSED")?;
                one = true
            }
        }
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "solaris"))]
        {
            if self.is_write_closed() {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "WRITE_CLOSED")?;
                one = true
            }
        }
        debug_assert!(one, "printing empty interests");
        Ok(())
    }
}

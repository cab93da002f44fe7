use std::io;
use std::os::fd::RawFd;

/// Create a non-blocking, close-on-exec anonymous pipe.
///
/// Returns `[receiver, sender]` to match the read/write order of `pipe(2)`.
pub(crate) fn new_raw() -> io::Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1, -1];

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "fuchsia",
        target_os = "hermit",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "redox",
        target_os = "solaris",
    ))]
    syscall!(pipe2(
        fds.as_mut_ptr(),
        libc::O_CLOEXEC | libc::O_NONBLOCK
    ))?;

    #[cfg(any(target_os = "ios", target_os = "macos", target_os = "tvos", target_os = "visionos", target_os = "watchos"))]
    {
        syscall!(pipe(fds.as_mut_ptr()))?;
        for fd in fds {
            syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
            syscall!(fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK))?;
        }
    }

    Ok(fds)
}

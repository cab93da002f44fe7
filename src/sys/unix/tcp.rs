use std::io;
use std::mem;
use std::mem::MaybeUninit;
use std::net::{self, SocketAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use crate::sys::unix::net::{from_socket_addr, to_socket_addr};

pub(crate) fn new_for_addr(address: SocketAddr) -> io::Result<RawFd> {
    let domain = match address {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    let socket_type = libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
    #[cfg(not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd"
    )))]
    let socket_type = libc::SOCK_STREAM;

    let socket = syscall!(socket(domain, socket_type, 0))?;

    #[cfg(any(target_os = "ios", target_os = "macos", target_os = "netbsd", target_os = "solaris"))]
    {
        syscall!(fcntl(socket, libc::F_SETFL, libc::O_NONBLOCK))?;
        syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC))?;
    }

    Ok(socket)
}

pub(crate) fn bind(socket: &net::TcpListener, addr: SocketAddr) -> io::Result<()> {
    let (raw_addr, raw_addr_length) = from_socket_addr(&addr);
    syscall!(bind(socket.as_raw_fd(), raw_addr, raw_addr_length))?;
    Ok(())
}

pub(crate) fn connect(socket: &net::TcpStream, addr: SocketAddr) -> io::Result<()> {
    let (raw_addr, raw_addr_length) = from_socket_addr(&addr);

    match syscall!(connect(socket.as_raw_fd(), raw_addr, raw_addr_length)) {
        Err(err) if err.raw_os_error() != Some(libc::EINPROGRESS) => Err(err),
        _ => Ok(()),
    }
}

pub(crate) fn listen(socket: &net::TcpListener, backlog: u32) -> io::Result<()> {
    let backlog = backlog.try_into().unwrap_or(i32::MAX);
    syscall!(listen(socket.as_raw_fd(), backlog)).map(|_| ())
}

pub(crate) fn set_reuseaddr(socket: &net::TcpListener, reuseaddr: bool) -> io::Result<()> {
    let value: libc::c_int = i32::from(reuseaddr);
    syscall!(setsockopt(
        socket.as_raw_fd(),
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &value as *const libc::c_int as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn accept(listener: &net::TcpListener) -> io::Result<(net::TcpStream, SocketAddr)> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::uninit();
    let mut length = mem::size_of_val(&storage) as libc::socklen_t;

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "openbsd"
    ))]
    let stream = {
        let flags = libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
        syscall!(accept4(
            listener.as_raw_fd(),
            storage.as_mut_ptr() as *mut _,
            &mut length,
            flags,
        ))?
    };

    #[cfg(any(
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "solaris"
    ))]
    let stream = {
        let socket = syscall!(accept(
            listener.as_raw_fd(),
            storage.as_mut_ptr() as *mut _,
            &mut length,
        ))?;
        syscall!(fcntl(socket, libc::F_SETFL, libc::O_NONBLOCK))?;
        syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC))?;
        socket
    };

    // SAFETY: `accept`/`accept4` initialised `storage` for us.
    let addr = unsafe { to_socket_addr(storage.as_ptr())? };
    let stream = unsafe { net::TcpStream::from_raw_fd(stream) };
    Ok((stream, addr))
}

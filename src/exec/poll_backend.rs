//! The portable poll-based [`ExecBackend`] (§4.3 "Poll backend").

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::process::Child;
use std::time::Duration;

use relaycat::net::TcpStream;
use relaycat::unix::SourceFd;
use relaycat::{Events, Interest, Poll, Token};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::flow::FlowState;
use crate::ring::IoRingBuffer;
use crate::timeout::TimeoutTracker;

use super::{validate_buffer_budget, ExecBackend, SessionState};

const SOCKET_TOKEN: Token = Token(0);
const STDIN_TOKEN: Token = Token(1);
const STDOUT_TOKEN: Token = Token(2);
const STDERR_TOKEN: Token = Token(3);

pub(crate) struct PollBackend {
    stdin_ring: IoRingBuffer,
    stdout_ring: IoRingBuffer,
    stderr_ring: IoRingBuffer,
    flow: FlowState,
    tracker: TimeoutTracker,
    state: SessionState,
}

impl PollBackend {
    pub fn new(cfg: &Config) -> RelayResult<Self> {
        validate_buffer_budget(cfg, cfg.exec_ring_capacity)?;
        let flow = FlowState::new(cfg.max_total_buffer_bytes, cfg.flow_pause_percent, cfg.flow_resume_percent);
        let tracker = TimeoutTracker::with_idle(cfg.idle_timeout);
        Ok(PollBackend {
            stdin_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            stdout_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            stderr_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            flow,
            tracker,
            state: SessionState::default(),
        })
    }

    fn total_buffered(&self) -> u64 {
        (self.stdin_ring.available_read() + self.stdout_ring.available_read() + self.stderr_ring.available_read())
            as u64
    }

    fn socket_interest(&self) -> Interest {
        let mut interest = Interest::WRITABLE;
        let can_read = !self.state.socket_read_closed
            && !self.state.child_stdin_closed
            && self.stdin_ring.available_write() > 0
            && !self.flow.should_pause();
        if can_read {
            interest = interest.add(Interest::READABLE);
        }
        interest
    }
}

impl ExecBackend for PollBackend {
    fn run(&mut self, socket: &mut TcpStream, child: &mut Child) -> RelayResult<()> {
        let stdin_fd = child.stdin.as_ref().map(|s| s.as_raw_fd());
        let stdout_fd = child.stdout.as_ref().map(|s| s.as_raw_fd());
        let stderr_fd = child.stderr.as_ref().map(|s| s.as_raw_fd());
        self.state.child_stdin_closed = stdin_fd.is_none();
        self.state.child_stdout_closed = stdout_fd.is_none();
        self.state.child_stderr_closed = stderr_fd.is_none();

        for fd in [stdin_fd, stdout_fd, stderr_fd].into_iter().flatten() {
            set_nonblocking(fd).map_err(RelayError::from_io)?;
        }

        let mut poll = Poll::new().map_err(RelayError::from_io)?;
        let mut events = Events::with_capacity(8);

        poll.registry()
            .register(socket, SOCKET_TOKEN, self.socket_interest())
            .map_err(RelayError::from_io)?;

        let result = self.drive(&mut poll, &mut events, socket, stdin_fd, stdout_fd, stderr_fd);
        let flush_result = self.final_flush(socket);
        result.and(flush_result)
    }
}

impl PollBackend {
    fn drive(
        &mut self,
        poll: &mut Poll,
        events: &mut Events,
        socket: &mut TcpStream,
        stdin_fd: Option<i32>,
        stdout_fd: Option<i32>,
        stderr_fd: Option<i32>,
    ) -> RelayResult<()> {
        let mut stdin_registered = false;
        let mut stdout_registered = false;
        let mut stderr_registered = false;

        loop {
            let continuing = self.state.should_continue(
                !self.stdout_ring.is_empty(),
                !self.stderr_ring.is_empty(),
                !self.stdin_ring.is_empty(),
            );
            if !continuing {
                return Ok(());
            }

            self.flow.update(self.total_buffered())?;

            poll.registry()
                .reregister(socket, SOCKET_TOKEN, self.socket_interest())
                .map_err(RelayError::from_io)?;

            sync_registration(
                poll,
                &mut stdin_registered,
                stdin_fd,
                STDIN_TOKEN,
                !self.state.child_stdin_closed && self.stdin_ring.available_read() > 0,
                Interest::WRITABLE,
            )?;
            sync_registration(
                poll,
                &mut stdout_registered,
                stdout_fd,
                STDOUT_TOKEN,
                !self.state.child_stdout_closed && self.stdout_ring.available_write() > 0 && !self.flow.should_pause(),
                Interest::READABLE,
            )?;
            sync_registration(
                poll,
                &mut stderr_registered,
                stderr_fd,
                STDERR_TOKEN,
                !self.state.child_stderr_closed && self.stderr_ring.available_write() > 0 && !self.flow.should_pause(),
                Interest::READABLE,
            )?;

            let timeout = self.tracker.next_poll_timeout();
            poll.poll(events, timeout).map_err(RelayError::from_io)?;

            if events.iter().next().is_none() {
                if let Some(expiry) = self.tracker.check() {
                    return Err(expiry.as_error());
                }
                continue;
            }

            // Dispatch order: socket, child_stdin, child_stdout, child_stderr (§4.3).
            let mut socket_readable = false;
            let mut socket_writable = false;
            let mut stdin_writable = false;
            let mut stdin_closed = false;
            let mut stdout_readable = false;
            let mut stdout_closed = false;
            let mut stderr_readable = false;
            let mut stderr_closed = false;

            for event in events.iter() {
                match event.token() {
                    SOCKET_TOKEN => {
                        if event.is_read_closed() {
                            self.state.socket_read_closed = true;
                        }
                        if event.is_write_closed() || event.is_error() {
                            self.state.socket_read_closed = true;
                            self.state.socket_write_closed = true;
                        }
                        socket_readable |= event.is_readable();
                        socket_writable |= event.is_writable();
                    }
                    STDIN_TOKEN => {
                        stdin_closed |= event.is_read_closed() || event.is_error();
                        stdin_writable |= event.is_writable();
                    }
                    STDOUT_TOKEN => {
                        stdout_closed |= event.is_read_closed() || event.is_error();
                        stdout_readable |= event.is_readable();
                    }
                    STDERR_TOKEN => {
                        stderr_closed |= event.is_read_closed() || event.is_error();
                        stderr_readable |= event.is_readable();
                    }
                    _ => {}
                }
            }

            if socket_readable {
                self.pump_socket_read(socket)?;
            }
            if socket_writable {
                self.pump_socket_write(socket)?;
            }
            if stdin_closed {
                self.state.child_stdin_closed = true;
            }
            if stdin_writable {
                if let Some(fd) = stdin_fd {
                    pump_write(fd, &mut self.stdin_ring, &mut self.tracker, &mut self.state.child_stdin_closed)?;
                }
            }
            if stdout_closed {
                self.state.child_stdout_closed = true;
            }
            if stdout_readable {
                if let Some(fd) = stdout_fd {
                    pump_read(fd, &mut self.stdout_ring, &mut self.tracker)?;
                }
            }
            if stderr_closed {
                self.state.child_stderr_closed = true;
            }
            if stderr_readable {
                if let Some(fd) = stderr_fd {
                    pump_read(fd, &mut self.stderr_ring, &mut self.tracker)?;
                }
            }
        }
    }

    fn pump_socket_read(&mut self, socket: &mut TcpStream) -> RelayResult<()> {
        loop {
            if self.stdin_ring.available_write() == 0 {
                return Ok(());
            }
            let slice = self.stdin_ring.writable_slice();
            match socket.read(slice) {
                Ok(0) => {
                    self.state.socket_read_closed = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.stdin_ring.commit_write(n)?;
                    self.tracker.mark_activity();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(RelayError::from_io(err)),
            }
        }
    }

    fn pump_socket_write(&mut self, socket: &mut TcpStream) -> RelayResult<()> {
        for ring in [&mut self.stdout_ring, &mut self.stderr_ring] {
            while !ring.is_empty() {
                let slice = ring.readable_slice();
                match socket.write(slice) {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        ring.consume(n)?;
                        self.tracker.mark_activity();
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(err)
                        if matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) =>
                    {
                        self.state.socket_write_closed = true;
                        return Ok(());
                    }
                    Err(err) => return Err(RelayError::from_io(err)),
                }
            }
        }
        Ok(())
    }

    /// Drains stdout/stderr to the socket with a short per-attempt deadline,
    /// then half-closes the socket's write side once both outputs are
    /// closed and drained (§4.6 "final flush").
    fn final_flush(&mut self, socket: &mut TcpStream) -> RelayResult<()> {
        let deadline = std::time::Instant::now() + Duration::from_millis(100);
        while std::time::Instant::now() < deadline
            && !self.state.socket_write_closed
            && (!self.stdout_ring.is_empty() || !self.stderr_ring.is_empty())
        {
            if self.pump_socket_write(socket).is_err() {
                break;
            }
        }

        if self.state.child_stdout_closed
            && self.state.child_stderr_closed
            && self.stdout_ring.is_empty()
            && self.stderr_ring.is_empty()
            && !self.state.socket_write_closed
        {
            let _ = socket.shutdown(std::net::Shutdown::Write);
            self.state.socket_write_closed = true;
        }
        Ok(())
    }
}

fn pump_read(fd: i32, ring: &mut IoRingBuffer, tracker: &mut TimeoutTracker) -> RelayResult<()> {
    loop {
        if ring.available_write() == 0 {
            return Ok(());
        }
        let slice = ring.writable_slice();
        match raw_read(fd, slice) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                ring.commit_write(n)?;
                tracker.mark_activity();
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(RelayError::from_io(err)),
        }
    }
}

fn pump_write(fd: i32, ring: &mut IoRingBuffer, tracker: &mut TimeoutTracker, closed: &mut bool) -> RelayResult<()> {
    while !ring.is_empty() {
        let slice = ring.readable_slice();
        match raw_write(fd, slice) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                ring.consume(n)?;
                tracker.mark_activity();
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                *closed = true;
                return Ok(());
            }
            Err(err) => return Err(RelayError::from_io(err)),
        }
    }
    Ok(())
}

fn raw_read(fd: i32, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn raw_write(fd: i32, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn set_nonblocking(fd: i32) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn sync_registration(
    poll: &mut Poll,
    registered: &mut bool,
    fd: Option<i32>,
    token: Token,
    want: bool,
    interest: Interest,
) -> RelayResult<()> {
    let Some(fd) = fd else { return Ok(()) };
    let mut source = SourceFd(&fd);
    match (*registered, want) {
        (false, true) => {
            poll.registry().register(&mut source, token, interest).map_err(RelayError::from_io)?;
            *registered = true;
        }
        (true, false) => {
            let _ = poll.registry().deregister(&mut source);
            *registered = false;
        }
        _ => {}
    }
    Ok(())
}

//! The Linux io_uring [`ExecBackend`] (§4.3): a plain-buffer variant and a
//! provided-buffers variant selected at construction time by kernel version.

use std::io;
use std::os::unix::io::AsRawFd;
use std::process::Child;
use std::time::Duration;

use io_uring::{opcode, squeue, types, IoUring};

use relaycat::net::TcpStream;

use crate::bufferpool::{FixedBufferPool, ProvidedStream};
use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::flow::FlowState;
use crate::ring::IoRingBuffer;
use crate::timeout::TimeoutTracker;

use super::{validate_buffer_budget, ExecBackend, SessionState};

const RING_ENTRIES: u32 = 64;

/// user_data tags, one per logical slot (§4.3 "five `*_pending` booleans").
const TAG_SOCKET_READ: u64 = 1;
const TAG_SOCKET_WRITE: u64 = 2;
const TAG_STDIN_WRITE: u64 = 3;
const TAG_STDOUT_READ: u64 = 4;
const TAG_STDERR_READ: u64 = 5;

const BGID_STDIN: u16 = 0;
const BGID_STDOUT: u16 = 1;
const BGID_STDERR: u16 = 2;

#[derive(Default)]
struct Pending {
    socket_read: bool,
    socket_write: bool,
    stdin_write: bool,
    stdout_read: bool,
    stderr_read: bool,
}

/// Whichever of stdout/stderr has data, stdout preferred (§4.3).
enum WriteSource {
    Stdout,
    Stderr,
}

pub(crate) struct IoUringBackend {
    ring: IoUring,
    provided: bool,
    stdin_ring: IoRingBuffer,
    stdout_ring: IoRingBuffer,
    stderr_ring: IoRingBuffer,
    stdin_stream: Option<ProvidedStream>,
    stdout_stream: Option<ProvidedStream>,
    stderr_stream: Option<ProvidedStream>,
    flow: FlowState,
    tracker: TimeoutTracker,
    state: SessionState,
    pending: Pending,
    in_flight_write: Option<WriteSource>,
}

impl IoUringBackend {
    /// Probes for ring-creation capability; provided-buffers mode is chosen
    /// when the kernel reports >= 5.7 (best-effort `uname` check).
    pub fn new(cfg: &Config) -> RelayResult<Self> {
        validate_buffer_budget(cfg, cfg.exec_ring_capacity)?;
        let ring = IoUring::new(RING_ENTRIES).map_err(RelayError::from_io)?;
        let provided = kernel_supports_provided_buffers();

        let flow = FlowState::new(cfg.max_total_buffer_bytes, cfg.flow_pause_percent, cfg.flow_resume_percent);
        let tracker = TimeoutTracker::with_idle(cfg.idle_timeout);

        let mut backend = IoUringBackend {
            ring,
            provided,
            stdin_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            stdout_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            stderr_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            stdin_stream: provided.then(|| ProvidedStream::new(BGID_STDIN)),
            stdout_stream: provided.then(|| ProvidedStream::new(BGID_STDOUT)),
            stderr_stream: provided.then(|| ProvidedStream::new(BGID_STDERR)),
            flow,
            tracker,
            state: SessionState::default(),
            pending: Pending::default(),
            in_flight_write: None,
        };

        if provided {
            backend.provide_buffers(BGID_STDIN)?;
            backend.provide_buffers(BGID_STDOUT)?;
            backend.provide_buffers(BGID_STDERR)?;
        }

        Ok(backend)
    }

    fn provide_buffers(&mut self, bgid: u16) -> RelayResult<()> {
        let stream = match bgid {
            BGID_STDIN => self.stdin_stream.as_mut(),
            BGID_STDOUT => self.stdout_stream.as_mut(),
            _ => self.stderr_stream.as_mut(),
        }
        .expect("provided-buffers streams allocated when `provided` is set");

        let ids: Vec<u16> = stream.pool.available_ids().collect();
        for id in ids {
            let buf = stream.pool.buffer_mut(id)?;
            let entry = opcode::ProvideBuffers::new(buf.as_mut_ptr(), buf.len() as i32, 1, bgid, id)
                .build()
                .user_data(0);
            unsafe {
                self.ring
                    .submission()
                    .push(&entry)
                    .map_err(|_| RelayError::InvalidConfiguration("io_uring submission queue full".into()))?;
            }
        }
        self.ring.submit().map_err(RelayError::from_io)?;
        Ok(())
    }

    fn total_buffered(&self) -> u64 {
        if self.provided {
            let stdin = self.stdin_stream.as_ref().map(|s| s.chain.available_read()).unwrap_or(0);
            let stdout = self.stdout_stream.as_ref().map(|s| s.chain.available_read()).unwrap_or(0);
            let stderr = self.stderr_stream.as_ref().map(|s| s.chain.available_read()).unwrap_or(0);
            (stdin + stdout + stderr) as u64
        } else {
            (self.stdin_ring.available_read() + self.stdout_ring.available_read() + self.stderr_ring.available_read())
                as u64
        }
    }

    fn stdout_has_data(&self) -> bool {
        if self.provided {
            self.stdout_stream.as_ref().map(|s| !s.chain.is_empty()).unwrap_or(false)
        } else {
            !self.stdout_ring.is_empty()
        }
    }

    fn stderr_has_data(&self) -> bool {
        if self.provided {
            self.stderr_stream.as_ref().map(|s| !s.chain.is_empty()).unwrap_or(false)
        } else {
            !self.stderr_ring.is_empty()
        }
    }

    fn stdin_has_data(&self) -> bool {
        if self.provided {
            self.stdin_stream.as_ref().map(|s| !s.chain.is_empty()).unwrap_or(false)
        } else {
            !self.stdin_ring.is_empty()
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_pass(&mut self, socket_fd: i32, stdin_fd: Option<i32>, stdout_fd: Option<i32>, stderr_fd: Option<i32>) {
        if !self.pending.socket_read
            && !self.state.socket_read_closed
            && !self.state.child_stdin_closed
            && !self.flow.should_pause()
            && (self.provided || self.stdin_ring.available_write() > 0)
        {
            self.submit_read(TAG_SOCKET_READ, socket_fd, BGID_STDIN);
            self.pending.socket_read = true;
        }

        if !self.pending.socket_write && !self.state.socket_write_closed {
            let source = if self.stdout_has_data() {
                Some(WriteSource::Stdout)
            } else if self.stderr_has_data() {
                Some(WriteSource::Stderr)
            } else {
                None
            };
            if let Some(source) = source {
                self.submit_socket_write(socket_fd, source);
            }
        }

        if !self.pending.stdin_write && !self.state.child_stdin_closed && self.stdin_has_data() {
            if let Some(fd) = stdin_fd {
                self.submit_stdin_write(fd);
            }
        }

        if !self.pending.stdout_read
            && !self.state.child_stdout_closed
            && !self.flow.should_pause()
            && (self.provided || self.stdout_ring.available_write() > 0)
        {
            if let Some(fd) = stdout_fd {
                self.submit_read(TAG_STDOUT_READ, fd, BGID_STDOUT);
                self.pending.stdout_read = true;
            }
        }

        if !self.pending.stderr_read
            && !self.state.child_stderr_closed
            && !self.flow.should_pause()
            && (self.provided || self.stderr_ring.available_write() > 0)
        {
            if let Some(fd) = stderr_fd {
                self.submit_read(TAG_STDERR_READ, fd, BGID_STDERR);
                self.pending.stderr_read = true;
            }
        }

        let _ = self.ring.submit();
    }

    fn submit_read(&mut self, tag: u64, fd: i32, bgid: u16) {
        if self.provided {
            let entry = opcode::Read::new(types::Fd(fd), std::ptr::null_mut(), 0)
                .buf_group(bgid)
                .build()
                .flags(squeue::Flags::BUFFER_SELECT)
                .user_data(tag);
            let _ = unsafe { self.ring.submission().push(&entry) };
        } else {
            let target = match tag {
                TAG_SOCKET_READ => &mut self.stdin_ring,
                TAG_STDOUT_READ => &mut self.stdout_ring,
                _ => &mut self.stderr_ring,
            };
            let slice = target.writable_slice();
            let entry = opcode::Read::new(types::Fd(fd), slice.as_mut_ptr(), slice.len() as u32)
                .build()
                .user_data(tag);
            let _ = unsafe { self.ring.submission().push(&entry) };
        }
    }

    fn submit_socket_write(&mut self, socket_fd: i32, source: WriteSource) {
        let slice: &[u8] = match (&source, self.provided) {
            (WriteSource::Stdout, false) => self.stdout_ring.readable_slice(),
            (WriteSource::Stderr, false) => self.stderr_ring.readable_slice(),
            (WriteSource::Stdout, true) => {
                let stream = self.stdout_stream.as_ref().unwrap();
                let (id, offset, len) = stream.chain.readable_segment().expect("stdout_has_data checked");
                &stream.pool.buffer(id).expect("valid id")[offset..offset + len]
            }
            (WriteSource::Stderr, true) => {
                let stream = self.stderr_stream.as_ref().unwrap();
                let (id, offset, len) = stream.chain.readable_segment().expect("stderr_has_data checked");
                &stream.pool.buffer(id).expect("valid id")[offset..offset + len]
            }
        };
        let entry = opcode::Write::new(types::Fd(socket_fd), slice.as_ptr(), slice.len() as u32)
            .build()
            .user_data(TAG_SOCKET_WRITE);
        let _ = unsafe { self.ring.submission().push(&entry) };
        self.pending.socket_write = true;
        self.in_flight_write = Some(source);
    }

    fn submit_stdin_write(&mut self, fd: i32) {
        let slice: &[u8] = if self.provided {
            let stream = self.stdin_stream.as_ref().unwrap();
            let (id, offset, len) = stream.chain.readable_segment().expect("stdin_has_data checked");
            &stream.pool.buffer(id).expect("valid id")[offset..offset + len]
        } else {
            self.stdin_ring.readable_slice()
        };
        let entry = opcode::Write::new(types::Fd(fd), slice.as_ptr(), slice.len() as u32)
            .build()
            .user_data(TAG_STDIN_WRITE);
        let _ = unsafe { self.ring.submission().push(&entry) };
        self.pending.stdin_write = true;
    }

    fn handle_completion(&mut self, tag: u64, result: i32, flags: u32) -> RelayResult<()> {
        match tag {
            TAG_SOCKET_READ => {
                self.pending.socket_read = false;
                if result < 0 {
                    return Err(RelayError::from_io(io::Error::from_raw_os_error(-result)));
                } else if result == 0 {
                    self.state.socket_read_closed = true;
                } else if self.provided {
                    commit_provided(&mut self.stdin_stream, result, flags)?;
                    self.tracker.mark_activity();
                } else {
                    self.stdin_ring.commit_write(result as usize)?;
                    self.tracker.mark_activity();
                }
            }
            TAG_STDOUT_READ => {
                self.pending.stdout_read = false;
                if result < 0 {
                    self.state.child_stdout_closed = true;
                } else if result == 0 {
                    self.state.child_stdout_closed = true;
                } else if self.provided {
                    commit_provided(&mut self.stdout_stream, result, flags)?;
                    self.tracker.mark_activity();
                } else {
                    self.stdout_ring.commit_write(result as usize)?;
                    self.tracker.mark_activity();
                }
            }
            TAG_STDERR_READ => {
                self.pending.stderr_read = false;
                if result < 0 {
                    self.state.child_stderr_closed = true;
                } else if result == 0 {
                    self.state.child_stderr_closed = true;
                } else if self.provided {
                    commit_provided(&mut self.stderr_stream, result, flags)?;
                    self.tracker.mark_activity();
                } else {
                    self.stderr_ring.commit_write(result as usize)?;
                    self.tracker.mark_activity();
                }
            }
            TAG_STDIN_WRITE => {
                self.pending.stdin_write = false;
                if result < 0 {
                    self.state.child_stdin_closed = true;
                } else {
                    self.consume(WriteSourceKind::Stdin, result as usize)?;
                    self.tracker.mark_activity();
                }
            }
            TAG_SOCKET_WRITE => {
                self.pending.socket_write = false;
                let source = self.in_flight_write.take();
                if result < 0 {
                    self.state.socket_write_closed = true;
                } else if let Some(source) = source {
                    let kind = match source {
                        WriteSource::Stdout => WriteSourceKind::Stdout,
                        WriteSource::Stderr => WriteSourceKind::Stderr,
                    };
                    self.consume(kind, result as usize)?;
                    self.tracker.mark_activity();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn consume(&mut self, kind: WriteSourceKind, n: usize) -> RelayResult<()> {
        if self.provided {
            let stream = match kind {
                WriteSourceKind::Stdin => self.stdin_stream.as_mut(),
                WriteSourceKind::Stdout => self.stdout_stream.as_mut(),
                WriteSourceKind::Stderr => self.stderr_stream.as_mut(),
            }
            .unwrap();
            let bgid = stream.pool.bgid();
            stream.chain.consume(n, &mut stream.pool)?;
            self.provide_buffers(bgid)
        } else {
            let ring = match kind {
                WriteSourceKind::Stdin => &mut self.stdin_ring,
                WriteSourceKind::Stdout => &mut self.stdout_ring,
                WriteSourceKind::Stderr => &mut self.stderr_ring,
            };
            ring.consume(n)
        }
    }
}

#[derive(Clone, Copy)]
enum WriteSourceKind {
    Stdin,
    Stdout,
    Stderr,
}

/// Extracts the kernel-selected buffer id from the CQE's `flags` (the
/// `IORING_CQE_F_BUFFER` bit plus the id in the high 16 bits) and appends the
/// completed read to the stream's chain. `result` is the byte count read.
fn commit_provided(stream: &mut Option<ProvidedStream>, result: i32, flags: u32) -> RelayResult<()> {
    const CQE_F_BUFFER: u32 = 1 << 0;
    const CQE_BUFFER_SHIFT: u32 = 16;

    if flags & CQE_F_BUFFER == 0 {
        return Err(RelayError::BufferNotProvided);
    }
    let buffer_id = (flags >> CQE_BUFFER_SHIFT) as u16;
    let stream = stream.as_mut().expect("provided-buffers stream present");
    stream.chain.commit_provided_buffer(buffer_id, result.max(0) as usize);
    Ok(())
}

impl ExecBackend for IoUringBackend {
    fn run(&mut self, socket: &mut TcpStream, child: &mut Child) -> RelayResult<()> {
        let socket_fd = socket.as_raw_fd();
        let stdin_fd = child.stdin.as_ref().map(|s| s.as_raw_fd());
        let stdout_fd = child.stdout.as_ref().map(|s| s.as_raw_fd());
        let stderr_fd = child.stderr.as_ref().map(|s| s.as_raw_fd());
        self.state.child_stdin_closed = stdin_fd.is_none();
        self.state.child_stdout_closed = stdout_fd.is_none();
        self.state.child_stderr_closed = stderr_fd.is_none();

        loop {
            let continuing = self.state.should_continue(
                self.stdout_has_data(),
                self.stderr_has_data(),
                self.stdin_has_data(),
            );
            if !continuing {
                break;
            }

            self.flow.update(self.total_buffered())?;
            self.submit_pass(socket_fd, stdin_fd, stdout_fd, stderr_fd);

            let timeout_ms = self.tracker.next_poll_timeout().map(|d| d.as_millis() as u32);
            let wait_result = match timeout_ms {
                Some(ms) => {
                    let ts = types::Timespec::new().sec((ms / 1000) as u64).nsec((ms % 1000) * 1_000_000);
                    let args = types::SubmitArgs::new().timespec(&ts);
                    self.ring.submitter().submit_with_args(1, &args)
                }
                None => self.ring.submit_and_wait(1),
            };

            match wait_result {
                Ok(_) => {}
                Err(err) if err.raw_os_error() == Some(libc::ETIME) => {
                    if let Some(expiry) = self.tracker.check() {
                        return Err(expiry.as_error());
                    }
                    continue;
                }
                Err(err) => return Err(RelayError::from_io(err)),
            }

            let completions: Vec<(u64, i32, u32)> = self
                .ring
                .completion()
                .map(|cqe| (cqe.user_data(), cqe.result(), cqe.flags()))
                .collect();
            for (tag, result, flags) in completions {
                self.handle_completion(tag, result, flags)?;
            }
        }

        self.final_flush(socket_fd)
    }
}

impl IoUringBackend {
    fn final_flush(&mut self, socket_fd: i32) -> RelayResult<()> {
        let deadline = std::time::Instant::now() + Duration::from_millis(100);
        while std::time::Instant::now() < deadline
            && !self.state.socket_write_closed
            && (self.stdout_has_data() || self.stderr_has_data())
        {
            if !self.pending.socket_write {
                let source = if self.stdout_has_data() {
                    WriteSource::Stdout
                } else {
                    WriteSource::Stderr
                };
                self.submit_socket_write(socket_fd, source);
                let _ = self.ring.submit();
            }
            if self.ring.submit_and_wait(1).is_err() {
                break;
            }
            let completions: Vec<(u64, i32, u32)> = self
                .ring
                .completion()
                .map(|cqe| (cqe.user_data(), cqe.result(), cqe.flags()))
                .collect();
            for (tag, result, flags) in completions {
                let _ = self.handle_completion(tag, result, flags);
            }
        }

        if self.state.child_stdout_closed
            && self.state.child_stderr_closed
            && !self.stdout_has_data()
            && !self.stderr_has_data()
            && !self.state.socket_write_closed
        {
            unsafe {
                libc::shutdown(socket_fd, libc::SHUT_WR);
            }
            self.state.socket_write_closed = true;
        }
        Ok(())
    }
}

/// Best-effort kernel version probe (`uname(2)`); falls back to the plain
/// variant on any parse failure.
fn kernel_supports_provided_buffers() -> bool {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return false;
    }
    let release = unsafe { std::ffi::CStr::from_ptr(uts.release.as_ptr()) };
    let release = release.to_string_lossy();
    let mut parts = release.split(['.', '-']);
    let major: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor) >= (5, 7)
}

//! The Windows IOCP exec backend (§4.3 "IOCP backend").
//!
//! The peer socket is associated with the completion port directly and
//! driven with real overlapped `WSARecv`/`WSASend`. Anonymous child stdio
//! pipes created by `std::process::Command` are *not* opened with
//! `FILE_FLAG_OVERLAPPED`, so they cannot be driven through
//! `GetQueuedCompletionStatus` the same way. Each pipe direction instead
//! runs a small blocking worker thread that calls `PostQueuedCompletionStatus`
//! when it makes progress — the same bridge the teacher's own
//! `IocpWaker::post` (`sys/windows/iocp_handler.rs`) uses to inject a
//! non-IOCP-native signal into `GetQueuedCompletionStatus`.

use std::io::{Read, Write};
use std::mem::zeroed;
use std::net::Shutdown;
use std::os::windows::io::AsRawSocket;
use std::process::Child;
use std::ptr::null_mut;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::{WSAGetLastError, WSARecv, WSASend, SOCKET, WSABUF, WSA_IO_PENDING};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, OVERLAPPED,
};

use relaycat::net::TcpStream;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::flow::FlowState;
use crate::ring::IoRingBuffer;
use crate::timeout::TimeoutTracker;

use super::{validate_buffer_budget, ExecBackend, SessionState};

const SOCKET_KEY: usize = 1;
const STDIN_ACK_KEY: usize = 2;
const STDOUT_DATA_KEY: usize = 3;
const STDERR_DATA_KEY: usize = 4;

const PIPE_CHUNK: usize = 16 * 1024;

/// One outcome posted by a pipe reader thread.
enum PipeEvent {
    Data(Vec<u8>),
    Closed,
}

fn spawn_reader(mut source: impl Read + Send + 'static, port: HANDLE, key: usize) -> (Receiver<PipeEvent>, JoinHandle<()>) {
    let (tx, rx) = sync_channel(1);
    let handle = std::thread::spawn(move || loop {
        let mut buf = vec![0u8; PIPE_CHUNK];
        match source.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(PipeEvent::Closed);
                post(port, 0, key);
                return;
            }
            Ok(n) => {
                buf.truncate(n);
                if tx.send(PipeEvent::Data(buf)).is_err() {
                    return;
                }
                post(port, n as u32, key);
            }
            Err(_) => {
                let _ = tx.send(PipeEvent::Closed);
                post(port, 0, key);
                return;
            }
        }
    });
    (rx, handle)
}

/// A blocking writer thread for the child's stdin. Accepts at most one
/// chunk in flight (`sync_channel(1)`), which is this backend's substitute
/// for the byte-ring used by the poll/io_uring backends.
fn spawn_writer(mut sink: impl Write + Send + 'static, port: HANDLE) -> (SyncSender<Vec<u8>>, Receiver<()>, JoinHandle<()>) {
    let (data_tx, data_rx) = sync_channel::<Vec<u8>>(1);
    let (ack_tx, ack_rx) = sync_channel::<()>(1);
    let handle = std::thread::spawn(move || {
        while let Ok(chunk) = data_rx.recv() {
            let ok = sink.write_all(&chunk).is_ok();
            let _ = ack_tx.send(());
            post(port, if ok { chunk.len() as u32 } else { 0 }, STDIN_ACK_KEY);
            if !ok {
                return;
            }
        }
    });
    (data_tx, ack_rx, handle)
}

fn post(port: HANDLE, bytes: u32, key: usize) {
    unsafe {
        PostQueuedCompletionStatus(port, bytes, key, null_mut());
    }
}

struct SocketOp {
    overlapped: OVERLAPPED,
}

impl SocketOp {
    fn new() -> Self {
        SocketOp { overlapped: unsafe { zeroed() } }
    }
}

pub(crate) struct IocpBackend {
    port: HANDLE,
    socket_out_ring: IoRingBuffer,
    flow: FlowState,
    tracker: TimeoutTracker,
    state: SessionState,
}

impl IocpBackend {
    pub fn new(cfg: &Config) -> RelayResult<Self> {
        validate_buffer_budget(cfg, cfg.exec_ring_capacity)?;
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(RelayError::from_io(std::io::Error::last_os_error()));
        }
        let flow = FlowState::new(cfg.max_total_buffer_bytes, cfg.flow_pause_percent, cfg.flow_resume_percent);
        Ok(IocpBackend {
            port,
            socket_out_ring: IoRingBuffer::with_capacity(cfg.exec_ring_capacity),
            flow,
            tracker: TimeoutTracker::with_idle(cfg.idle_timeout),
            state: SessionState::default(),
        })
    }
}

impl Drop for IocpBackend {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}

impl ExecBackend for IocpBackend {
    fn run(&mut self, socket: &mut TcpStream, child: &mut Child) -> RelayResult<()> {
        let raw_socket = socket.as_raw_socket() as SOCKET;
        if unsafe { CreateIoCompletionPort(raw_socket as HANDLE, self.port, SOCKET_KEY, 0) } == 0 {
            return Err(RelayError::from_io(std::io::Error::last_os_error()));
        }

        let mut threads = Vec::new();
        let (stdin_tx, stdin_ack_rx) = match child.stdin.take() {
            Some(stdin) => {
                let (tx, ack_rx, handle) = spawn_writer(stdin, self.port);
                threads.push(handle);
                self.state.child_stdin_closed = false;
                (Some(tx), Some(ack_rx))
            }
            None => {
                self.state.child_stdin_closed = true;
                (None, None)
            }
        };

        let mut stdout_rx = child.stdout.take().map(|s| {
            let (rx, handle) = spawn_reader(s, self.port, STDOUT_DATA_KEY);
            threads.push(handle);
            rx
        });
        self.state.child_stdout_closed = stdout_rx.is_none();

        let mut stderr_rx = child.stderr.take().map(|s| {
            let (rx, handle) = spawn_reader(s, self.port, STDERR_DATA_KEY);
            threads.push(handle);
            rx
        });
        self.state.child_stderr_closed = stderr_rx.is_none();

        let mut read_op = SocketOp::new();
        let mut write_op = SocketOp::new();
        let mut read_pending = false;
        let mut write_pending = false;
        let mut stdin_inflight = false;
        let mut read_buf = vec![0u8; PIPE_CHUNK];

        let result = (|| -> RelayResult<()> {
            loop {
                let continuing =
                    self.state.should_continue(!self.socket_out_ring.is_empty(), false, stdin_tx.is_some());
                if !continuing {
                    return Ok(());
                }

                self.flow.update(self.socket_out_ring.available_read() as u64)?;

                if !read_pending
                    && !self.state.socket_read_closed
                    && !self.state.child_stdin_closed
                    && !stdin_inflight
                    && !self.flow.should_pause()
                {
                    let mut wsabuf = WSABUF { len: read_buf.len() as u32, buf: read_buf.as_mut_ptr() };
                    let mut recvd = 0u32;
                    let mut flags = 0u32;
                    let rc = unsafe {
                        WSARecv(raw_socket, &mut wsabuf, 1, &mut recvd, &mut flags, &mut read_op.overlapped, None)
                    };
                    if rc == 0 || unsafe { WSAGetLastError() } == WSA_IO_PENDING {
                        read_pending = true;
                    } else {
                        return Err(RelayError::from_io(std::io::Error::last_os_error()));
                    }
                }

                if !write_pending && !self.socket_out_ring.is_empty() && !self.state.socket_write_closed {
                    let slice = self.socket_out_ring.readable_slice();
                    let wsabuf = WSABUF { len: slice.len() as u32, buf: slice.as_ptr() as *mut u8 };
                    let mut sent = 0u32;
                    let rc = unsafe { WSASend(raw_socket, &wsabuf, 1, &mut sent, 0, &mut write_op.overlapped, None) };
                    if rc == 0 || unsafe { WSAGetLastError() } == WSA_IO_PENDING {
                        write_pending = true;
                    } else {
                        self.state.socket_write_closed = true;
                    }
                }

                let timeout_ms = self
                    .tracker
                    .next_poll_timeout()
                    .map(|d| d.as_millis().min(u128::from(u32::MAX)) as u32)
                    .unwrap_or(u32::MAX);

                let mut bytes_transferred = 0u32;
                let mut completion_key = 0usize;
                let mut overlapped_ptr: *mut OVERLAPPED = null_mut();
                let ok = unsafe {
                    GetQueuedCompletionStatus(
                        self.port,
                        &mut bytes_transferred,
                        &mut completion_key,
                        &mut overlapped_ptr,
                        timeout_ms,
                    )
                } != 0;

                if !ok && overlapped_ptr.is_null() {
                    // Either the wait timed out or there is nothing in
                    // flight yet; either way, check our own deadlines.
                    if self.tracker.check().is_some() {
                        return Ok(());
                    }
                    continue;
                }
                self.tracker.mark_activity();

                match completion_key {
                    SOCKET_KEY => {
                        if overlapped_ptr == &mut read_op.overlapped as *mut OVERLAPPED {
                            read_pending = false;
                            if bytes_transferred == 0 {
                                self.state.socket_read_closed = true;
                            } else if let Some(tx) = &stdin_tx {
                                let chunk = read_buf[..bytes_transferred as usize].to_vec();
                                if tx.send(chunk).is_ok() {
                                    stdin_inflight = true;
                                } else {
                                    self.state.child_stdin_closed = true;
                                }
                            }
                        } else if overlapped_ptr == &mut write_op.overlapped as *mut OVERLAPPED {
                            write_pending = false;
                            if bytes_transferred == 0 {
                                self.state.socket_write_closed = true;
                            } else {
                                self.socket_out_ring.consume(bytes_transferred as usize)?;
                            }
                        }
                    }
                    STDIN_ACK_KEY => {
                        stdin_inflight = false;
                        if let Some(ack_rx) = &stdin_ack_rx {
                            let _ = ack_rx.try_recv();
                        }
                        if bytes_transferred == 0 {
                            self.state.child_stdin_closed = true;
                        }
                    }
                    STDOUT_DATA_KEY => {
                        drain_pipe_events(&mut stdout_rx, &mut self.socket_out_ring, &mut self.state.child_stdout_closed)?
                    }
                    STDERR_DATA_KEY => {
                        drain_pipe_events(&mut stderr_rx, &mut self.socket_out_ring, &mut self.state.child_stderr_closed)?
                    }
                    _ => {}
                }
            }
        })();

        let flush_result = self.final_flush(socket, &mut write_op, raw_socket, &mut write_pending);
        drop(stdin_tx);
        for handle in threads {
            let _ = handle.join();
        }
        result.and(flush_result)
    }
}

impl IocpBackend {
    /// Drains `socket_out_ring` to the socket with a short per-attempt
    /// deadline, then half-closes the socket's write side (§4.6 "final
    /// flush"), mirroring the poll and io_uring backends.
    fn final_flush(
        &mut self,
        socket: &mut TcpStream,
        write_op: &mut SocketOp,
        raw_socket: SOCKET,
        write_pending: &mut bool,
    ) -> RelayResult<()> {
        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline && !self.state.socket_write_closed && !self.socket_out_ring.is_empty() {
            if !*write_pending {
                let slice = self.socket_out_ring.readable_slice();
                if slice.is_empty() {
                    break;
                }
                let wsabuf = WSABUF { len: slice.len() as u32, buf: slice.as_ptr() as *mut u8 };
                let mut sent = 0u32;
                let rc = unsafe { WSASend(raw_socket, &wsabuf, 1, &mut sent, 0, &mut write_op.overlapped, None) };
                if rc == 0 || unsafe { WSAGetLastError() } == WSA_IO_PENDING {
                    *write_pending = true;
                } else {
                    break;
                }
            }
            let mut bytes_transferred = 0u32;
            let mut completion_key = 0usize;
            let mut overlapped_ptr: *mut OVERLAPPED = null_mut();
            let ok = unsafe {
                GetQueuedCompletionStatus(self.port, &mut bytes_transferred, &mut completion_key, &mut overlapped_ptr, 100)
            } != 0;
            if ok && overlapped_ptr == &mut write_op.overlapped as *mut OVERLAPPED {
                *write_pending = false;
                if bytes_transferred == 0 {
                    break;
                }
                self.socket_out_ring.consume(bytes_transferred as usize)?;
            } else {
                break;
            }
        }

        if self.state.child_stdout_closed
            && self.state.child_stderr_closed
            && self.socket_out_ring.is_empty()
            && !self.state.socket_write_closed
        {
            let _ = socket.shutdown(Shutdown::Write);
            self.state.socket_write_closed = true;
        }
        Ok(())
    }
}

fn drain_pipe_events(rx: &mut Option<Receiver<PipeEvent>>, ring: &mut IoRingBuffer, closed: &mut bool) -> RelayResult<()> {
    let Some(receiver) = rx else { return Ok(()) };
    loop {
        match receiver.try_recv() {
            Ok(PipeEvent::Data(chunk)) => {
                if chunk.len() > ring.available_write() {
                    return Err(RelayError::FlowControlTriggered);
                }
                ring.writable_slice()[..chunk.len()].copy_from_slice(&chunk);
                ring.commit_write(chunk.len())?;
            }
            Ok(PipeEvent::Closed) => *closed = true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
        }
    }
}

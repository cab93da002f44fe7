//! The exec session (§4.6): conducts I/O between a peer socket and a
//! spawned child's stdin/stdout/stderr, via one of three interchangeable
//! [`ExecBackend`] implementations (§4.3).

mod poll_backend;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
mod io_uring_backend;

#[cfg(windows)]
mod iocp_backend;

use std::process::Child;

use relaycat::net::TcpStream;

use crate::config::Config;
use crate::error::{ErrorKind, RelayResult};

/// Five independent half-close flags tracked by the exec session (§3).
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SessionState {
    pub socket_read_closed: bool,
    pub socket_write_closed: bool,
    pub child_stdin_closed: bool,
    pub child_stdout_closed: bool,
    pub child_stderr_closed: bool,
}

impl SessionState {
    /// The loop continuation predicate from §4.6.
    pub fn should_continue(&self, stdout_has_data: bool, stderr_has_data: bool, stdin_has_data: bool) -> bool {
        (!self.socket_write_closed && (stdout_has_data || stderr_has_data))
            || !self.child_stdout_closed
            || !self.child_stderr_closed
            || (!self.child_stdin_closed && stdin_has_data)
            || (!self.socket_read_closed && !self.child_stdin_closed)
    }
}

/// Implemented by each of the three platform backends. `run` owns the event
/// loop for the whole session's lifetime; it returns once every stream is
/// closed or a configured deadline fires.
pub(crate) trait ExecBackend {
    fn run(&mut self, socket: &mut TcpStream, child: &mut Child) -> RelayResult<()>;
}

/// `max_total_buffer_bytes >= sum(capacities)` check (§4.6 step 4). All
/// three backends use the same three-ring capacity budget.
fn validate_buffer_budget(cfg: &Config, per_ring_capacity: usize) -> RelayResult<()> {
    let total_capacity = per_ring_capacity as u64 * 3;
    if cfg.max_total_buffer_bytes < total_capacity {
        return Err(crate::error::RelayError::InvalidConfiguration(format!(
            "--max-total-buffer-bytes ({}) is smaller than the combined ring capacity ({total_capacity})",
            cfg.max_total_buffer_bytes,
        )));
    }
    Ok(())
}

/// Picks IOCP on Windows, io_uring on Linux when the feature is enabled and
/// a ring can be set up, else the portable poll backend (§4.3 "Backend
/// selection").
fn select_backend(cfg: &Config) -> RelayResult<Box<dyn ExecBackend>> {
    #[cfg(windows)]
    {
        return Ok(Box::new(iocp_backend::IocpBackend::new(cfg)?));
    }

    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    {
        if !cfg.no_io_uring {
            if let Ok(backend) = io_uring_backend::IoUringBackend::new(cfg) {
                return Ok(Box::new(backend));
            }
        }
    }

    #[cfg(unix)]
    {
        return Ok(Box::new(poll_backend::PollBackend::new(cfg)?));
    }

    #[allow(unreachable_code)]
    {
        unreachable!("every supported target selects a backend above")
    }
}

/// Runs the exec session to completion. The session never spawns `child`;
/// it only conducts I/O, killing it best-effort on timeout (§4.6).
pub fn run_exec_session(cfg: &Config, mut socket: TcpStream, mut child: Child) -> RelayResult<()> {
    let mut backend = select_backend(cfg)?;
    let result = backend.run(&mut socket, &mut child);

    if let Err(err) = &result {
        if err.kind() == ErrorKind::Timeout {
            let _ = child.kill();
        }
    }
    let _ = child.wait();
    result
}

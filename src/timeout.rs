//! `TimeoutTracker` (§3, §4.5): execution / idle / connection deadlines.

use std::time::{Duration, Instant};

/// Which deadline expired, in the priority order `check()` reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Execution,
    Idle,
    Connection,
}

/// Tracks up to three independent deadlines and computes the next poll
/// timeout as the minimum remaining budget.
#[derive(Debug)]
pub struct TimeoutTracker {
    start: Instant,
    last_activity: Instant,
    execution: Option<Duration>,
    idle: Option<Duration>,
    connection: Option<Duration>,
}

impl TimeoutTracker {
    pub fn new(execution: Option<Duration>, idle: Option<Duration>, connection: Option<Duration>) -> Self {
        let now = Instant::now();
        TimeoutTracker {
            start: now,
            last_activity: now,
            execution,
            idle,
            connection,
        }
    }

    /// A tracker with only an idle timeout set, the common case for the
    /// bidirectional relay (§4.5: "in the bidirectional relay it simply ends
    /// the loop").
    pub fn with_idle(idle_timeout_ms: u64) -> Self {
        let idle = (idle_timeout_ms > 0).then(|| Duration::from_millis(idle_timeout_ms));
        TimeoutTracker::new(None, idle, None)
    }

    /// Records I/O activity, resetting the idle deadline.
    pub fn mark_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The first deadline that has expired, in priority order
    /// execution -> idle -> connection, or `None` if none has.
    pub fn check(&self) -> Option<Expiry> {
        let now = Instant::now();
        if let Some(budget) = self.execution {
            if now.duration_since(self.start) >= budget {
                return Some(Expiry::Execution);
            }
        }
        if let Some(budget) = self.idle {
            if now.duration_since(self.last_activity) >= budget {
                return Some(Expiry::Idle);
            }
        }
        if let Some(budget) = self.connection {
            if now.duration_since(self.start) >= budget {
                return Some(Expiry::Connection);
            }
        }
        None
    }

    /// The minimum remaining time to any configured deadline, or `None`
    /// ("infinite") if no deadline is configured.
    pub fn next_poll_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        let remaining = |started_at: Instant, budget: Duration| -> Duration {
            budget.saturating_sub(now.duration_since(started_at))
        };

        [
            self.execution.map(|b| remaining(self.start, b)),
            self.idle.map(|b| remaining(self.last_activity, b)),
            self.connection.map(|b| remaining(self.start, b)),
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

impl Expiry {
    pub fn as_error(self) -> crate::error::RelayError {
        use crate::error::RelayError;
        match self {
            Expiry::Execution => RelayError::TimeoutExecution,
            Expiry::Idle => RelayError::TimeoutIdle,
            Expiry::Connection => RelayError::TimeoutConnection,
        }
    }
}

//! `FlowState` (§3, §4.4): hysteretic pause/resume over total buffered bytes.

use crate::error::{RelayError, RelayResult};

#[derive(Debug)]
pub struct FlowState {
    pause_threshold_bytes: u64,
    resume_threshold_bytes: u64,
    max_total_buffer_bytes: u64,
    paused: bool,
}

impl FlowState {
    /// `pause_percent`/`resume_percent` are in `0..=100`; `resume` is forced
    /// strictly below `pause` by at least `max(1, pause / 4)` (§4.4). A zero
    /// `pause_percent` disables flow control entirely.
    pub fn new(max_total_buffer_bytes: u64, pause_percent: u8, resume_percent: u8) -> Self {
        let pct = |p: u8| (max_total_buffer_bytes * p as u64) / 100;
        let pause = pct(pause_percent).min(max_total_buffer_bytes);
        let mut resume = pct(resume_percent).min(max_total_buffer_bytes);
        if pause > 0 {
            let min_gap = (pause / 4).max(1);
            if resume + min_gap > pause {
                resume = pause.saturating_sub(min_gap);
            }
        }
        FlowState {
            pause_threshold_bytes: pause,
            resume_threshold_bytes: resume,
            max_total_buffer_bytes,
            paused: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pause_threshold_bytes > 0
    }

    /// Updates the pause/resume switch for a new total-buffered figure and
    /// returns whether the session must abort because `total` burst past
    /// `max_total_buffer_bytes` despite flow control (§5 "Backpressure").
    pub fn update(&mut self, total: u64) -> RelayResult<()> {
        if total > self.max_total_buffer_bytes {
            return Err(RelayError::FlowControlTriggered);
        }
        if !self.is_enabled() {
            return Ok(());
        }
        if total >= self.pause_threshold_bytes {
            self.paused = true;
        } else if total <= self.resume_threshold_bytes {
            self.paused = false;
        }
        Ok(())
    }

    pub fn should_pause(&self) -> bool {
        self.is_enabled() && self.paused
    }
}

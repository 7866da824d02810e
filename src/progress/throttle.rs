//! Rate-limits status renders to what the chat's edit endpoint tolerates.

use std::time::{Duration, Instant};

/// Rate-limiter for progress updates.
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    /// Whether enough time has passed to emit another update. Records the
    /// emit when it returns true.
    pub fn should_emit(&mut self) -> bool {
        self.check(Instant::now(), false)
    }

    /// Like [`should_emit`](Self::should_emit), but `force` always passes.
    pub fn should_emit_or(&mut self, force: bool) -> bool {
        self.check(Instant::now(), force)
    }

    fn check(&mut self, now: Instant, force: bool) -> bool {
        match self.last_emit {
            Some(last) if !force && now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    pub const fn reset(&mut self) {
        self.last_emit = None;
    }
}

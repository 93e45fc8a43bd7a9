//! Fixed one-hour invocation counter.
//!
//! The window does not slide: once more than an hour has elapsed since the
//! window started, the next tick resets it and counts itself as the first
//! call of the new window. Reaching the warning threshold is reported exactly
//! once per window; the tracker never blocks an invocation.

use serde::{Deserialize, Serialize};

pub const WINDOW_SECS: u64 = 3600;
pub const DEFAULT_WARN_PER_HOUR: u32 = 50;

/// Rate settings (`[rate]` in `.ralph/config.toml`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Invocations per window at which a warning is raised.
    pub warn_per_hour: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            warn_per_hour: DEFAULT_WARN_PER_HOUR,
        }
    }
}

/// Result of a single [`RateWindow::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateTick {
    pub count_this_window: u32,
    /// True only on the tick that reached the warning threshold.
    pub warned: bool,
    /// True when this tick opened a new window.
    pub window_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    window_start: u64,
    count_in_window: u32,
    warn_threshold: u32,
}

impl RateWindow {
    /// Open a window at `now` (epoch seconds).
    pub fn new(warn_threshold: u32, now: u64) -> Self {
        Self {
            window_start: now,
            count_in_window: 0,
            warn_threshold,
        }
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn count_in_window(&self) -> u32 {
        self.count_in_window
    }

    /// Count one invocation at `now`, resetting the window first if it expired.
    pub fn tick(&mut self, now: u64) -> RateTick {
        let window_reset = now.saturating_sub(self.window_start) > WINDOW_SECS;
        if window_reset {
            self.count_in_window = 0;
            self.window_start = now;
        }
        self.count_in_window += 1;
        RateTick {
            count_this_window: self.count_in_window,
            warned: self.count_in_window == self.warn_threshold,
            window_reset,
        }
    }
}

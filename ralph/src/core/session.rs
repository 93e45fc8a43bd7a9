//! Session identity: operating mode, target branch, and iteration bounds.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::core::breaker::BreakerConfig;

/// Operating mode selected on the command line.
///
/// The mode only selects which instruction template the worker receives; the
/// control loop behaves identically in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Build,
    Plan,
    ScopedPlan,
    Audit,
    Archive,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Build => "build",
            Mode::Plan => "plan",
            Mode::ScopedPlan => "scoped-plan",
            Mode::Audit => "audit",
            Mode::Archive => "archive",
        }
    }

    /// File name of the instruction template for this mode.
    pub fn prompt_file_name(&self) -> String {
        format!("PROMPT_{}.md", self.as_str())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of the loop controller. Immutable once the loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Project identifier used in notifications (work tree directory name).
    pub project: String,
    /// Session start, epoch seconds.
    pub started_at: u64,
    pub mode: Mode,
    pub branch: String,
    /// Maximum iteration count (0 = unbounded).
    pub max_iterations: u32,
    pub breaker: BreakerConfig,
}

impl Session {
    /// Stable identifier derived from the start time (`20260101-120000`).
    pub fn id(&self) -> String {
        let started = i64::try_from(self.started_at).unwrap_or(i64::MAX);
        match DateTime::from_timestamp(started, 0) {
            Some(ts) => ts.format("%Y%m%d-%H%M%S").to_string(),
            None => self.started_at.to_string(),
        }
    }

    /// Seconds elapsed since the session started.
    pub fn elapsed_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.started_at)
    }

    pub fn is_bounded(&self) -> bool {
        self.max_iterations > 0
    }
}

/// Render a duration in seconds as `1h 02m 03s` / `4m 05s` / `6s`.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

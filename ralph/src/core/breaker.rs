//! Circuit breaker halting the loop on sustained stagnation or failure.
//!
//! The breaker starts `Closed` and moves to `Tripped` at most once per session.
//! Two independent streaks feed it:
//!
//! - consecutive successful iterations that produced no new revision
//! - consecutive failed worker invocations
//!
//! Either streak reaching its threshold trips the breaker. Each streak resets
//! to zero as soon as its own signal turns positive.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NO_PROGRESS_THRESHOLD: u32 = 3;
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Breaker configuration (`[breaker]` in `.ralph/config.toml`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// When false, [`CircuitBreaker::evaluate`] always reports `Closed`.
    pub enabled: bool,
    pub no_progress_threshold: u32,
    pub error_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            no_progress_threshold: DEFAULT_NO_PROGRESS_THRESHOLD,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Tripped,
}

/// What the progress check said about the last iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    /// Head revision moved.
    Advanced,
    /// Head revision is identical to the previous observation.
    Unchanged,
    /// No comparison was made (failed invocation, or the probe had nothing to report).
    Unknown,
}

/// A threshold that was reached when the breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripCondition {
    NoProgress { count: u32, threshold: u32 },
    RepeatedErrors { count: u32, threshold: u32 },
}

impl fmt::Display for TripCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripCondition::NoProgress { count, threshold } => write!(
                f,
                "no new commits for {count} consecutive iterations (threshold {threshold})"
            ),
            TripCondition::RepeatedErrors { count, threshold } => write!(
                f,
                "worker failed {count} consecutive times (threshold {threshold})"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_no_progress: u32,
    consecutive_errors: u32,
    tripped_by: Vec<TripCondition>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_no_progress: 0,
            consecutive_errors: 0,
            tripped_by: Vec::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn consecutive_no_progress(&self) -> u32 {
        self.consecutive_no_progress
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Conditions that caused the trip (empty while closed).
    pub fn trip_conditions(&self) -> &[TripCondition] {
        &self.tripped_by
    }

    /// Fold one iteration's outcome into both streaks.
    ///
    /// The streaks are independent: a successful invocation that produced no
    /// commit clears the error streak and extends the no-progress streak in
    /// the same call.
    pub fn record_outcome(&mut self, progress: ProgressSignal, invocation_error: bool) {
        if invocation_error {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }

        match progress {
            ProgressSignal::Advanced => self.consecutive_no_progress = 0,
            ProgressSignal::Unchanged => self.consecutive_no_progress += 1,
            ProgressSignal::Unknown => {}
        }
    }

    /// Check both thresholds. Once tripped, stays tripped.
    pub fn evaluate(&mut self) -> BreakerState {
        if !self.config.enabled {
            return BreakerState::Closed;
        }
        if self.state == BreakerState::Tripped {
            return BreakerState::Tripped;
        }

        let mut conditions = Vec::new();
        if self.consecutive_no_progress >= self.config.no_progress_threshold {
            conditions.push(TripCondition::NoProgress {
                count: self.consecutive_no_progress,
                threshold: self.config.no_progress_threshold,
            });
        }
        if self.consecutive_errors >= self.config.error_threshold {
            conditions.push(TripCondition::RepeatedErrors {
                count: self.consecutive_errors,
                threshold: self.config.error_threshold,
            });
        }

        if !conditions.is_empty() {
            self.state = BreakerState::Tripped;
            self.tripped_by = conditions;
        }
        self.state
    }

    /// Operator-facing explanation of a trip, with remediation steps.
    ///
    /// Returns `None` while the breaker is closed.
    pub fn diagnostic(&self) -> Option<String> {
        if self.tripped_by.is_empty() {
            return None;
        }
        let rule = "=".repeat(64);
        let mut out = String::new();
        out.push_str(&rule);
        out.push_str("\n CIRCUIT BREAKER TRIPPED - loop halted\n");
        out.push_str(&rule);
        out.push('\n');
        for condition in &self.tripped_by {
            out.push_str(&format!("\n Cause: {condition}\n"));
            out.push_str(" Suggested next steps:\n");
            for step in remediation(condition) {
                out.push_str(&format!("   - {step}\n"));
            }
        }
        out.push_str("\n Re-run with --no-circuit-breaker to disable this check,\n");
        out.push_str(" or raise the limit with --circuit-breaker-threshold <n>.\n");
        out.push_str(&rule);
        out.push('\n');
        Some(out)
    }
}

fn remediation(condition: &TripCondition) -> &'static [&'static str] {
    match condition {
        TripCondition::NoProgress { .. } => &[
            "review the worker log for the last iterations",
            "check whether the plan is complete or blocked; regenerate it with `ralph plan`",
            "make sure the worker is allowed to commit on this branch",
        ],
        TripCondition::RepeatedErrors { .. } => &[
            "run the worker command by hand to see the failure",
            "check credentials, network access, and usage limits",
            "fix the environment before restarting the loop",
        ],
    }
}

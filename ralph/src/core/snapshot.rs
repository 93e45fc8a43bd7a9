//! Status snapshot consumed by external monitors.
//!
//! A snapshot is a pure projection of loop state at a point in time. It is
//! rebuilt from scratch for every publish and written whole; there is no
//! incremental patching.

use serde::{Deserialize, Serialize};

use crate::core::session::format_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
}

/// Machine-readable status artifact (`.ralph/status.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Epoch seconds at which the snapshot was taken.
    pub timestamp: u64,
    pub iteration: u32,
    /// 0 = unbounded.
    pub max_iterations: u32,
    pub mode: String,
    pub branch: String,
    pub total_commits: u32,
    pub consecutive_no_progress: u32,
    pub consecutive_errors: u32,
    /// No-progress threshold.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_enabled: bool,
    pub iterations_this_hour: u32,
    pub status: RunStatus,
    /// Why the loop stopped (`max_iterations`, `circuit_breaker`, ...). Only
    /// present once `status` is `stopped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl StatusSnapshot {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// One-line summary for console monitoring.
    pub fn digest(&self) -> String {
        let status = match (&self.status, &self.stop_reason) {
            (RunStatus::Running, _) => "running".to_string(),
            (RunStatus::Stopped, Some(reason)) => format!("stopped ({reason})"),
            (RunStatus::Stopped, None) => "stopped".to_string(),
        };
        format!(
            "[{}] iter {} | commits {} | no-progress {}/{} | errors {} | {}/h | {}",
            self.mode,
            self.iteration_label(),
            self.total_commits,
            self.consecutive_no_progress,
            self.circuit_breaker_threshold,
            self.consecutive_errors,
            self.iterations_this_hour,
            status,
        )
    }

    /// Multi-line view used by `ralph status`.
    pub fn render(&self, now: u64) -> String {
        let breaker = if self.circuit_breaker_enabled {
            format!(
                "enabled (no-progress {}/{}, errors {})",
                self.consecutive_no_progress,
                self.circuit_breaker_threshold,
                self.consecutive_errors
            )
        } else {
            "disabled".to_string()
        };
        let mut status = match self.status {
            RunStatus::Running => "running".to_string(),
            RunStatus::Stopped => "stopped".to_string(),
        };
        if let Some(reason) = &self.stop_reason {
            status.push_str(&format!(" ({reason})"));
        }

        let mut out = String::new();
        out.push_str(&format!("status:      {status}\n"));
        out.push_str(&format!("mode:        {}\n", self.mode));
        out.push_str(&format!("branch:      {}\n", self.branch));
        out.push_str(&format!("iteration:   {}\n", self.iteration_label()));
        out.push_str(&format!("commits:     {}\n", self.total_commits));
        out.push_str(&format!("breaker:     {breaker}\n"));
        out.push_str(&format!("this hour:   {}\n", self.iterations_this_hour));
        out.push_str(&format!(
            "updated:     {} ago\n",
            format_duration(now.saturating_sub(self.timestamp))
        ));
        out
    }

    fn iteration_label(&self) -> String {
        if self.max_iterations > 0 {
            format!("{}/{}", self.iteration, self.max_iterations)
        } else {
            self.iteration.to_string()
        }
    }
}

//! Loop configuration stored under `.ralph/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::breaker::BreakerConfig;
use crate::core::rate::RateConfig;

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values below; command-line flags are applied on top with
/// [`RalphConfig::apply_overrides`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RalphConfig {
    pub worker: WorkerConfig,
    pub breaker: BreakerConfig,
    pub rate: RateConfig,
    #[serde(rename = "loop")]
    pub looping: LoopConfig,
    pub notify: NotifyConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker command line; the instruction payload is written to its stdin.
    pub command: Vec<String>,
    /// Kill the worker after this many seconds. Unset = wait indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
                "--verbose".to_string(),
            ],
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause between iterations.
    pub delay_secs: u64,
    /// Push the branch after an iteration that produced commits.
    pub push: bool,
    pub remote: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            delay_secs: 2,
            push: true,
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Also notify on every iteration start/completion.
    pub per_iteration: bool,
    pub webhook_url: Option<String>,
    /// Desktop notifications via `notify-send` / `osascript`.
    pub desktop: bool,
    /// Upper bound for delivering one notification to one channel.
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            per_iteration: false,
            webhook_url: None,
            desktop: false,
            timeout_secs: 5,
        }
    }
}

/// Paths relative to the project root unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub status_file: PathBuf,
    pub log_dir: PathBuf,
    /// Directory containing `PROMPT_<mode>.md` templates.
    pub prompt_dir: PathBuf,
    /// Creating this file requests a graceful stop after the current iteration.
    pub stop_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            status_file: PathBuf::from(".ralph/status.json"),
            log_dir: PathBuf::from(".ralph/logs"),
            prompt_dir: PathBuf::from("."),
            stop_file: PathBuf::from(".ralph/STOP"),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub no_circuit_breaker: bool,
    pub circuit_breaker_threshold: Option<u32>,
    pub webhook_url: Option<String>,
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        if self.worker.timeout_secs == Some(0) {
            return Err(anyhow!("worker.timeout_secs must be > 0 when set"));
        }
        if self.breaker.no_progress_threshold == 0 {
            return Err(anyhow!("breaker.no_progress_threshold must be > 0"));
        }
        if self.breaker.error_threshold == 0 {
            return Err(anyhow!("breaker.error_threshold must be > 0"));
        }
        if self.rate.warn_per_hour == 0 {
            return Err(anyhow!("rate.warn_per_hour must be > 0"));
        }
        if self.looping.push && self.looping.remote.trim().is_empty() {
            return Err(anyhow!("loop.remote must be set when loop.push is enabled"));
        }
        if self.notify.timeout_secs == 0 {
            return Err(anyhow!("notify.timeout_secs must be > 0"));
        }
        if let Some(url) = &self.notify.webhook_url
            && reqwest::Url::parse(url).is_err()
        {
            return Err(anyhow!("notify.webhook_url is not a valid URL: {url}"));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if overrides.no_circuit_breaker {
            self.breaker.enabled = false;
        }
        if let Some(threshold) = overrides.circuit_breaker_threshold {
            self.breaker.no_progress_threshold = threshold;
        }
        if let Some(url) = &overrides.webhook_url {
            self.notify.webhook_url = Some(url.clone());
        }
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker.timeout_secs.map(Duration::from_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.looping.delay_secs)
    }
}

/// Default config location for a project root.
pub fn default_config_path(root: &Path) -> PathBuf {
    root.join(".ralph").join("config.toml")
}

/// Resolve a configured path against the project root.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RalphConfig::default()`. Validation is left
/// to the caller so that command-line overrides can be applied first.
pub fn load_config(path: &Path) -> Result<RalphConfig> {
    if !path.exists() {
        return Ok(RalphConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

//! Lifecycle notifications to external channels.
//!
//! Delivery is best-effort: every channel is tried independently, each attempt
//! is bounded by a timeout, and failures are logged and dropped. Nothing in
//! this module can fail the loop.

mod desktop;
mod webhook;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

pub use desktop::DesktopChannel;
pub use webhook::WebhookChannel;

use crate::core::session::format_duration;
use crate::io::config::NotifyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    IterationStarted,
    IterationCompleted,
    MaxIterationsReached,
    CircuitBreakerTripped,
    Interrupted,
    /// Graceful stop requested by the operator.
    SessionStopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::IterationStarted => "iteration_started",
            EventKind::IterationCompleted => "iteration_completed",
            EventKind::MaxIterationsReached => "max_iterations_reached",
            EventKind::CircuitBreakerTripped => "circuit_breaker_tripped",
            EventKind::Interrupted => "interrupted",
            EventKind::SessionStopped => "session_stopped",
        }
    }

    /// Per-iteration events are opt-in; everything else is always attempted.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(
            self,
            EventKind::IterationStarted | EventKind::IterationCompleted
        )
    }

    fn headline(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session started",
            EventKind::IterationStarted => "iteration started",
            EventKind::IterationCompleted => "iteration completed",
            EventKind::MaxIterationsReached => "max iterations reached",
            EventKind::CircuitBreakerTripped => "CIRCUIT BREAKER TRIPPED",
            EventKind::Interrupted => "interrupted",
            EventKind::SessionStopped => "session stopped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub event: EventKind,
    pub title: String,
    pub project: String,
    pub branch: String,
    pub mode: String,
    pub duration_secs: u64,
    pub iteration: u32,
    pub total_commits: u32,
    pub last_revision: Option<String>,
    /// Extra detail (e.g. which breaker threshold tripped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Notification {
    /// Build the human-readable title for `event`.
    pub fn title_for(event: EventKind, project: &str, iteration: u32) -> String {
        match event {
            EventKind::IterationStarted | EventKind::IterationCompleted => {
                format!("[ralph] {project}: {} #{iteration}", event.headline())
            }
            _ => format!("[ralph] {project}: {}", event.headline()),
        }
    }

    /// Multi-line body shared by channels that render plain text.
    pub fn body(&self) -> String {
        let mut out = format!(
            "{} on {} | iteration {} | {} commit(s) | {}",
            self.mode,
            self.branch,
            self.iteration,
            self.total_commits,
            format_duration(self.duration_secs)
        );
        if let Some(rev) = &self.last_revision {
            out.push_str(&format!(" | head {rev}"));
        }
        if let Some(detail) = &self.detail {
            out.push('\n');
            out.push_str(detail);
        }
        out
    }
}

/// A single delivery transport.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Fans notifications out to every configured channel.
pub struct Notifier {
    channels: Vec<Box<dyn NotificationChannel>>,
    per_iteration: bool,
    timeout: Duration,
}

impl Notifier {
    pub fn new(per_iteration: bool, timeout: Duration) -> Self {
        Self {
            channels: Vec::new(),
            per_iteration,
            timeout,
        }
    }

    /// A notifier with no channels.
    pub fn disabled() -> Self {
        Self::new(false, Duration::from_secs(1))
    }

    /// Build channels from `[notify]` config.
    pub fn from_config(cfg: &NotifyConfig) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        let mut notifier = Self::new(cfg.per_iteration, timeout);
        if let Some(url) = &cfg.webhook_url {
            notifier = notifier.with_channel(WebhookChannel::new(url, timeout)?);
        }
        if cfg.desktop {
            notifier = notifier.with_channel(DesktopChannel::new());
        }
        Ok(notifier)
    }

    pub fn with_channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channels.push(Box::new(channel));
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Whether `event` would be sent at all under the current settings.
    pub fn wants(&self, event: EventKind) -> bool {
        !self.channels.is_empty() && (event.is_lifecycle() || self.per_iteration)
    }

    /// Deliver to every channel. Never fails.
    pub async fn notify(&self, notification: &Notification) {
        if !self.wants(notification.event) {
            return;
        }
        for channel in &self.channels {
            match tokio::time::timeout(self.timeout, channel.deliver(notification)).await {
                Ok(Ok(())) => {
                    debug!(channel = channel.name(), event = %notification.event, "notification delivered");
                }
                Ok(Err(err)) => {
                    warn!(channel = channel.name(), event = %notification.event, err = %format!("{err:#}"), "notification failed");
                }
                Err(_) => {
                    warn!(
                        channel = channel.name(),
                        event = %notification.event,
                        timeout_secs = self.timeout.as_secs_f32(),
                        "notification timed out"
                    );
                }
            }
        }
    }
}

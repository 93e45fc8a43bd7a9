//! Desktop channel: local OS notification via `osascript` or `notify-send`.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;

use super::{Notification, NotificationChannel};

#[derive(Debug, Clone, Default)]
pub struct DesktopChannel;

impl DesktopChannel {
    pub fn new() -> Self {
        Self
    }
}

fn desktop_command(title: &str, body: &str) -> Command {
    if cfg!(target_os = "macos") {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(body),
            escape_applescript(title)
        );
        let mut cmd = Command::new("osascript");
        cmd.arg("-e").arg(script);
        cmd
    } else {
        let mut cmd = Command::new("notify-send");
        cmd.arg("--app-name=ralph").arg(title).arg(body);
        cmd
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let output = desktop_command(&notification.title, &notification.body())
            .kill_on_drop(true)
            .output()
            .await
            .context("spawn desktop notifier")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("desktop notifier failed: {}", stderr.trim()));
        }
        Ok(())
    }
}

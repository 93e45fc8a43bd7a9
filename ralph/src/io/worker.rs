//! Worker abstraction for one invocation per iteration.
//!
//! The [`Worker`] trait decouples the loop controller from the actual worker
//! backend (an external command by default). Tests use scripted workers that
//! return predetermined outcomes without spawning processes.
//!
//! The controller never inspects what the worker printed; only the exit
//! status matters. Output is written to a per-iteration log file.

use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Parameters for a single worker invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// 1-based iteration index.
    pub iteration: u32,
    /// Working directory for the worker process.
    pub workdir: PathBuf,
    /// Mode-specific instructions fed to the worker.
    pub payload: String,
    /// Where worker stdout/stderr go.
    pub log_path: PathBuf,
    /// Kill the worker after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// Abstraction over worker backends.
///
/// `Ok(())` means the worker exited successfully; any error counts as a failed
/// invocation.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<()>;
}

/// Worker that spawns a configured command and writes the payload to stdin.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
}

impl CommandWorker {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("worker command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Worker for CommandWorker {
    #[instrument(skip_all, fields(iteration = request.iteration, program = %self.program))]
    async fn invoke(&self, request: &InvocationRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting worker");

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let log = fs::File::create(&request.log_path)
            .with_context(|| format!("create worker log {}", request.log_path.display()))?;
        let log_err = log.try_clone().context("clone worker log handle")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn worker {}", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        if let Err(err) = stdin.write_all(request.payload.as_bytes()).await {
            // The worker may exit before reading everything; its exit status decides.
            warn!(err = %err, "failed to write full payload to worker stdin");
        }
        drop(stdin);

        let status = match request.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status.context("wait for worker")?,
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "worker timed out, killing");
                    child.kill().await.context("kill worker")?;
                    return Err(anyhow!("worker timed out after {timeout:?}"));
                }
            },
            None => child.wait().await.context("wait for worker")?,
        };

        if !status.success() {
            warn!(exit_code = ?status.code(), "worker failed");
            return Err(anyhow!("worker exited with status {:?}", status.code()));
        }

        debug!("worker completed successfully");
        Ok(())
    }
}

//! Test-only doubles: scripted worker and version control, recording
//! notification channels, and throwaway git repositories.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;

use crate::io::git::VersionControl;
use crate::io::worker::{InvocationRequest, Worker};
use crate::notify::{EventKind, Notification, NotificationChannel};

/// In-memory repository: a linear list of revisions plus recorded pushes.
#[derive(Debug, Default)]
pub struct ScriptedVcs {
    history: Mutex<Vec<String>>,
    pushes: Mutex<Vec<(String, String)>>,
    probe_fails: AtomicBool,
    push_fails: AtomicBool,
}

impl ScriptedVcs {
    /// Repository whose head is `initial` (None = no commits yet).
    pub fn new(initial: Option<&str>) -> Arc<Self> {
        let vcs = Self::default();
        if let Some(rev) = initial {
            vcs.commit(rev);
        }
        Arc::new(vcs)
    }

    pub fn commit(&self, revision: &str) {
        self.history
            .lock()
            .expect("history lock")
            .push(revision.to_string());
    }

    pub fn head(&self) -> Option<String> {
        self.history.lock().expect("history lock").last().cloned()
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.probe_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_push_fails(&self, fails: bool) {
        self.push_fails.store(fails, Ordering::SeqCst);
    }

    /// `(remote, branch)` pairs pushed so far.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().expect("push lock").clone()
    }
}

impl VersionControl for ScriptedVcs {
    fn head_revision(&self) -> Result<Option<String>> {
        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted probe failure"));
        }
        Ok(self.head())
    }

    fn commits_between(&self, base: &str, head: &str) -> Result<u32> {
        let history = self.history.lock().expect("history lock");
        let base_idx = history
            .iter()
            .position(|rev| rev == base)
            .ok_or_else(|| anyhow!("unknown revision {base}"))?;
        let head_idx = history
            .iter()
            .position(|rev| rev == head)
            .ok_or_else(|| anyhow!("unknown revision {head}"))?;
        Ok(u32::try_from(head_idx.saturating_sub(base_idx))?)
    }

    fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        if self.push_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("scripted push failure"));
        }
        self.pushes
            .lock()
            .expect("push lock")
            .push((remote.to_string(), branch.to_string()));
        Ok(())
    }
}

/// What a scripted worker does on one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedStep {
    /// Exit successfully without committing.
    Succeed,
    /// Commit each listed revision, then exit successfully.
    Commit(Vec<String>),
    /// Exit with an error.
    Fail,
}

impl ScriptedStep {
    pub fn commit(revision: &str) -> Self {
        ScriptedStep::Commit(vec![revision.to_string()])
    }
}

/// Worker that replays queued steps; once the queue is empty every further
/// invocation succeeds without committing.
pub struct ScriptedWorker {
    vcs: Arc<ScriptedVcs>,
    steps: Mutex<VecDeque<ScriptedStep>>,
    calls: AtomicU32,
}

impl ScriptedWorker {
    pub fn new(vcs: Arc<ScriptedVcs>, steps: Vec<ScriptedStep>) -> Self {
        Self {
            vcs,
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(&self, _request: &InvocationRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or(ScriptedStep::Succeed);
        match step {
            ScriptedStep::Succeed => Ok(()),
            ScriptedStep::Commit(revisions) => {
                for rev in &revisions {
                    self.vcs.commit(rev);
                }
                Ok(())
            }
            ScriptedStep::Fail => Err(anyhow!("scripted worker failure")),
        }
    }
}

/// Channel that records every delivered notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingChannel {
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().expect("recording lock").clone()
    }

    pub fn events(&self) -> Vec<EventKind> {
        self.notifications().iter().map(|n| n.event).collect()
    }

    pub fn count(&self, event: EventKind) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        self.received
            .lock()
            .expect("recording lock")
            .push(notification.clone());
        Ok(())
    }
}

/// Channel whose deliveries always fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingChannel;

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn deliver(&self, _notification: &Notification) -> Result<()> {
        Err(anyhow!("channel unavailable"))
    }
}

/// Deterministic notification for channel tests.
pub fn notification(event: EventKind) -> Notification {
    Notification {
        event,
        title: Notification::title_for(event, "demo", 1),
        project: "demo".to_string(),
        branch: "main".to_string(),
        mode: "build".to_string(),
        duration_secs: 90,
        iteration: 1,
        total_commits: 0,
        last_revision: None,
        detail: None,
    }
}

/// Throwaway git repository on branch `main` with a local identity.
pub struct TestRepo {
    root: tempfile::TempDir,
    work: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let root = tempfile::tempdir().context("create tempdir")?;
        let work = root.path().join("work");
        fs::create_dir_all(&work).context("create work dir")?;
        git(&work, &["init", "--quiet"])?;
        git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        git(&work, &["config", "user.email", "ralph@example.com"])?;
        git(&work, &["config", "user.name", "Ralph Test"])?;
        git(&work, &["config", "commit.gpgsign", "false"])?;
        Ok(Self { root, work })
    }

    pub fn path(&self) -> &Path {
        &self.work
    }

    /// Write `name`, commit it, and return the new full revision.
    pub fn commit_file(&self, name: &str, contents: &str) -> Result<String> {
        fs::write(self.work.join(name), contents).with_context(|| format!("write {name}"))?;
        git(&self.work, &["add", "-A"])?;
        git(&self.work, &["commit", "--quiet", "-m", &format!("update {name}")])?;
        Ok(git(&self.work, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Set a repository-local git config value.
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        git(&self.work, &["config", key, value])?;
        Ok(())
    }

    /// Create a bare repository next to the work tree and register it as `name`.
    pub fn add_bare_remote(&self, name: &str) -> Result<PathBuf> {
        let remote = self.root.path().join(format!("{name}.git"));
        fs::create_dir_all(&remote).context("create remote dir")?;
        git(&remote, &["init", "--bare", "--quiet"])?;
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        let remote_str = remote.to_string_lossy().to_string();
        git(&self.work, &["remote", "add", name, &remote_str])?;
        Ok(remote)
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

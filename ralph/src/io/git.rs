//! Git adapter for the loop controller.
//!
//! The controller never mutates the work tree: it only reads the head revision
//! to detect progress and, optionally, pushes the branch after the worker
//! committed. We keep a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::progress::display_revision;

/// Abbreviated or full hex object id as printed by `git rev-parse`.
static REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{4,64}$").expect("valid revision regex"));

/// Read access to the repository the worker operates on, plus branch push.
pub trait VersionControl {
    /// Current head revision of the active branch, or `None` when the
    /// repository has no commits yet.
    fn head_revision(&self) -> Result<Option<String>>;

    /// Number of commits reachable from `head` but not from `base`.
    fn commits_between(&self, base: &str, head: &str) -> Result<u32>;

    /// Publish `branch` to `remote`.
    fn push_branch(&self, remote: &str, branch: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Fail unless `workdir` is inside a git work tree.
    pub fn ensure_work_tree(&self) -> Result<()> {
        let out = self
            .run_capture(&["rev-parse", "--is-inside-work-tree"])
            .with_context(|| format!("{} is not a git repository", self.workdir.display()))?;
        if out.trim() != "true" {
            return Err(anyhow!(
                "{} is not inside a git work tree",
                self.workdir.display()
            ));
        }
        Ok(())
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        // `symbolic-ref` also works on an unborn branch, unlike `rev-parse --abbrev-ref`.
        let out = self
            .run_capture(&["symbolic-ref", "--short", "-q", "HEAD"])
            .map_err(|_| anyhow!("detached HEAD (refuse to run)"))?;
        let name = out.trim().to_string();
        if name.is_empty() {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Return the full HEAD object id, or `None` on an unborn branch.
    ///
    /// Never abbreviated: `--short` output grows with the object count and
    /// `core.abbrev`, so the same commit could compare unequal.
    pub fn head_sha(&self) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if !output.status.success() {
            // `--verify --quiet` exits 1 without output when HEAD has no commit.
            if output.stdout.is_empty() && output.stderr.is_empty() {
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git rev-parse HEAD failed: {}", stderr.trim()));
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !REVISION_RE.is_match(&sha) {
            return Err(anyhow!("unexpected revision from git rev-parse: '{sha}'"));
        }
        Ok(Some(sha))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    #[instrument(skip_all)]
    fn head_revision(&self) -> Result<Option<String>> {
        let head = self.head_sha()?;
        debug!(revision = ?head.as_deref().map(display_revision), "head revision");
        Ok(head)
    }

    fn commits_between(&self, base: &str, head: &str) -> Result<u32> {
        let range = format!("{base}..{head}");
        let out = self.run_capture(&["rev-list", "--count", &range])?;
        out.trim()
            .parse::<u32>()
            .with_context(|| format!("parse commit count '{}'", out.trim()))
    }

    /// Push `branch`; on failure retry once with `--set-upstream` for branches
    /// that were never pushed.
    #[instrument(skip_all, fields(remote = %remote, branch = %branch))]
    fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        match self.run_checked(&["push", remote, branch]) {
            Ok(_) => {
                debug!("pushed branch");
                Ok(())
            }
            Err(err) => {
                debug!(err = %err, "plain push failed, retrying with upstream");
                self.run_checked(&["push", "--set-upstream", remote, branch])
                    .with_context(|| format!("push {branch} to {remote}"))?;
                Ok(())
            }
        }
    }
}

//! Status artifact publishing and the read-only accessor used by monitors.
//!
//! Every publish replaces the whole file atomically (temp file + rename) so a
//! concurrent reader sees either the previous snapshot or the new one, never
//! a partial write.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::snapshot::StatusSnapshot;

#[derive(Debug, Clone)]
pub struct StatusPublisher {
    path: PathBuf,
}

impl StatusPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the status artifact with `snapshot`.
    pub fn publish(&self, snapshot: &StatusSnapshot) -> Result<()> {
        debug!(
            path = %self.path.display(),
            iteration = snapshot.iteration,
            status = ?snapshot.status,
            "publishing status"
        );
        let mut buf = serde_json::to_string_pretty(snapshot).context("serialize status")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

/// Read the most recently published snapshot.
pub fn read_status(path: &Path) -> Result<StatusSnapshot> {
    if !path.exists() {
        bail!("status file not found at {}", path.display());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read status {}", path.display()))?;
    let snapshot = serde_json::from_str(&contents)
        .with_context(|| format!("parse status {}", path.display()))?;
    Ok(snapshot)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("status path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp status {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace status {}", path.display()))?;
    Ok(())
}

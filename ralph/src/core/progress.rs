//! Progress detection by comparing head revisions across iterations.
//!
//! A new revision is the only proxy for progress: the worker is expected to
//! commit when it gets something done. The detector never talks to version
//! control itself; the loop controller probes the head revision and feeds the
//! result in.

use serde::Serialize;

/// Progress bookkeeping owned by [`ProgressDetector`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    /// Last head revision observed (None until the repository has a commit).
    pub last_known_revision: Option<String>,
    pub consecutive_no_progress_count: u32,
    /// Commits observed this session.
    pub total_progress_events: u32,
}

/// Outcome of a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressResult {
    pub advanced: bool,
    /// Commits added since the previous observation (0 when not advanced).
    pub delta_count: u32,
}

/// Head revision as reported by the version-control probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadObservation {
    pub revision: String,
    /// Commits between the last known revision and `revision`, when the probe
    /// could count them.
    pub commits_since_last: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressDetector {
    state: ProgressState,
}

impl ProgressDetector {
    /// Start tracking from the head revision at session start.
    pub fn new(initial_revision: Option<String>) -> Self {
        Self {
            state: ProgressState {
                last_known_revision: initial_revision.filter(|rev| !rev.is_empty()),
                ..ProgressState::default()
            },
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn last_known_revision(&self) -> Option<&str> {
        self.state.last_known_revision.as_deref()
    }

    /// Compare `head` with the last known revision and update counters.
    ///
    /// An empty revision is treated as "no revision" by callers and must not
    /// reach this method; see [`ProgressDetector::observe_head`].
    pub fn observe(&mut self, head: &HeadObservation) -> ProgressResult {
        if self.state.last_known_revision.as_deref() == Some(head.revision.as_str()) {
            self.state.consecutive_no_progress_count += 1;
            return ProgressResult {
                advanced: false,
                delta_count: 0,
            };
        }

        // A moved head always counts as at least one progress event, even when
        // the probe could not count commits or history was rewritten.
        let delta_count = head.commits_since_last.unwrap_or(1).max(1);
        self.state.total_progress_events += delta_count;
        self.state.consecutive_no_progress_count = 0;
        self.state.last_known_revision = Some(head.revision.clone());
        ProgressResult {
            advanced: true,
            delta_count,
        }
    }

    /// Like [`ProgressDetector::observe`], but skips the comparison when the
    /// probe produced no usable revision. Returns `None` when skipped.
    pub fn observe_head(&mut self, head: Option<&HeadObservation>) -> Option<ProgressResult> {
        let head = head.filter(|h| !h.revision.trim().is_empty())?;
        Some(self.observe(head))
    }
}

/// Length of revisions shown to operators.
pub const DISPLAY_REVISION_LEN: usize = 7;

/// Shorten a full revision for logs and notifications. Comparisons always use
/// the full revision, since abbreviated ids change length as a repository grows.
pub fn display_revision(revision: &str) -> &str {
    revision.get(..DISPLAY_REVISION_LEN).unwrap_or(revision)
}

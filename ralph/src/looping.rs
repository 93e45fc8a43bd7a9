//! Loop controller: one worker invocation per iteration until a stop condition.
//!
//! State machine: `Init -> Running -> Stopped(reason)`. Each pass:
//!
//! 1. stop if the iteration limit is exceeded (or an interrupt / stop request
//!    is pending)
//! 2. count the invocation in the rate window
//! 3. invoke the worker and wait for it
//! 4. on success, compare head revisions; on failure, skip the comparison
//! 5. feed both outcomes to the circuit breaker and stop if it trips
//! 6. publish status, notify, push new commits
//! 7. sleep the inter-iteration delay (interruptible)
//!
//! Nothing that happens inside an iteration is fatal. Failures turn into
//! breaker counters or log lines; only a breaker trip, the iteration limit, a
//! stop request, or an interrupt ends the loop.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::core::breaker::{BreakerState, CircuitBreaker, ProgressSignal};
use crate::core::progress::{HeadObservation, ProgressDetector, display_revision};
use crate::core::rate::RateWindow;
use crate::core::session::{Session, format_duration};
use crate::core::snapshot::{RunStatus, StatusSnapshot};
use crate::io::clock::epoch_now;
use crate::io::git::VersionControl;
use crate::io::status::StatusPublisher;
use crate::io::worker::{InvocationRequest, Worker};
use crate::notify::{EventKind, Notification, Notifier};

/// Reason why [`run_loop`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The configured `max_iterations` were all executed.
    MaxIterations,
    /// The circuit breaker tripped.
    CircuitBreaker,
    /// An interrupt signal arrived.
    Interrupted,
    /// The operator requested a graceful stop via the stop file.
    Normal,
}

impl LoopStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStop::MaxIterations => "max_iterations",
            LoopStop::CircuitBreaker => "circuit_breaker",
            LoopStop::Interrupted => "interrupted",
            LoopStop::Normal => "normal",
        }
    }

    fn event(&self) -> EventKind {
        match self {
            LoopStop::MaxIterations => EventKind::MaxIterationsReached,
            LoopStop::CircuitBreaker => EventKind::CircuitBreakerTripped,
            LoopStop::Interrupted => EventKind::Interrupted,
            LoopStop::Normal => EventKind::SessionStopped,
        }
    }
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Init,
    Running,
    Stopped(LoopStop),
}

/// All mutable session state, owned by the controller and passed explicitly
/// to each component.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub session: Session,
    pub phase: LoopPhase,
    /// Index of the current (or last started) iteration; 0 before the first.
    pub iteration: u32,
    pub progress: ProgressDetector,
    pub breaker: CircuitBreaker,
    pub rate: RateWindow,
    /// Rate warning not yet attached to a delivered notification.
    pub pending_rate_warning: Option<String>,
}

impl LoopState {
    pub fn new(
        session: Session,
        initial_revision: Option<String>,
        warn_per_hour: u32,
        now: u64,
    ) -> Self {
        let breaker = CircuitBreaker::new(session.breaker);
        Self {
            session,
            phase: LoopPhase::Init,
            iteration: 0,
            progress: ProgressDetector::new(initial_revision),
            breaker,
            rate: RateWindow::new(warn_per_hour, now),
            pending_rate_warning: None,
        }
    }

    pub fn total_commits(&self) -> u32 {
        self.progress.state().total_progress_events
    }

    /// Project the current state into a status snapshot.
    pub fn snapshot(&self, now: u64) -> StatusSnapshot {
        let (status, stop_reason) = match self.phase {
            LoopPhase::Stopped(stop) => (RunStatus::Stopped, Some(stop.as_str().to_string())),
            LoopPhase::Init | LoopPhase::Running => (RunStatus::Running, None),
        };
        StatusSnapshot {
            timestamp: now,
            iteration: self.iteration,
            max_iterations: self.session.max_iterations,
            mode: self.session.mode.as_str().to_string(),
            branch: self.session.branch.clone(),
            total_commits: self.total_commits(),
            consecutive_no_progress: self.breaker.consecutive_no_progress(),
            consecutive_errors: self.breaker.consecutive_errors(),
            circuit_breaker_threshold: self.breaker.config().no_progress_threshold,
            circuit_breaker_enabled: self.breaker.is_enabled(),
            iterations_this_hour: self.rate.count_in_window(),
            status,
            stop_reason,
        }
    }

    pub fn notification(&self, event: EventKind, now: u64, detail: Option<String>) -> Notification {
        Notification {
            event,
            title: Notification::title_for(event, &self.session.project, self.iteration),
            project: self.session.project.clone(),
            branch: self.session.branch.clone(),
            mode: self.session.mode.as_str().to_string(),
            duration_secs: self.session.elapsed_secs(now),
            iteration: self.iteration,
            total_commits: self.total_commits(),
            last_revision: self
                .progress
                .last_known_revision()
                .map(|rev| display_revision(rev).to_string()),
            detail,
        }
    }
}

/// Settings that do not change during a session.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Working tree the worker runs in.
    pub workdir: PathBuf,
    /// Rendered instruction payload, identical for every iteration.
    pub instructions: String,
    /// Directory for per-iteration worker logs.
    pub log_dir: PathBuf,
    pub delay: Duration,
    pub worker_timeout: Option<Duration>,
    /// Remote to push to after progress; `None` disables pushing.
    pub push_remote: Option<String>,
    /// Existence of this file requests a graceful stop.
    pub stop_file: Option<PathBuf>,
    /// Print a one-line status digest after every publish.
    pub monitor: bool,
}

/// Collaborators of the loop controller.
pub struct LoopContext<'a, W, V> {
    pub worker: &'a W,
    pub vcs: &'a V,
    pub publisher: &'a StatusPublisher,
    pub notifier: &'a Notifier,
    pub settings: &'a LoopSettings,
}

/// Summary of a loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub stop: LoopStop,
    pub state: LoopState,
}

impl LoopOutcome {
    /// Human-readable session summary printed at exit.
    pub fn summary(&self, now: u64) -> String {
        let state = &self.state;
        format!(
            "ralph stopped ({}) after {} iteration(s): {} commit(s) on {} in {}",
            self.stop,
            state.iteration,
            state.total_commits(),
            state.session.branch,
            format_duration(state.session.elapsed_secs(now)),
        )
    }
}

/// Run iterations until a stop condition is reached.
///
/// `shutdown` flips to `true` when an interrupt arrives. An in-flight worker
/// invocation is never cancelled; the interrupt takes effect at the next
/// check (loop start or the inter-iteration delay).
#[instrument(skip_all, fields(mode = %state.session.mode, branch = %state.session.branch))]
pub async fn run_loop<W: Worker, V: VersionControl>(
    mut state: LoopState,
    ctx: &LoopContext<'_, W, V>,
    mut shutdown: watch::Receiver<bool>,
) -> LoopOutcome {
    state.phase = LoopPhase::Running;
    info!(
        max_iterations = state.session.max_iterations,
        revision = ?state.progress.last_known_revision().map(display_revision),
        "session started"
    );
    ctx.publish(&state);
    ctx.notify(&mut state, EventKind::SessionStarted, None).await;

    let mut index = 1u32;
    let stop = loop {
        if *shutdown.borrow() {
            break LoopStop::Interrupted;
        }
        if ctx.take_stop_request() {
            break LoopStop::Normal;
        }
        if state.session.is_bounded() && index > state.session.max_iterations {
            break LoopStop::MaxIterations;
        }

        state.iteration = index;
        let tick = state.rate.tick(epoch_now());
        if tick.warned {
            warn!(
                count = tick.count_this_window,
                "invocation rate reached the hourly warning threshold"
            );
            state.pending_rate_warning = Some(format!(
                "rate warning: {} invocations this hour",
                tick.count_this_window
            ));
        }
        info!(iteration = index, this_hour = tick.count_this_window, "iteration started");
        ctx.publish(&state);
        ctx.notify(&mut state, EventKind::IterationStarted, None).await;

        let request = InvocationRequest {
            iteration: index,
            workdir: ctx.settings.workdir.clone(),
            payload: ctx.settings.instructions.clone(),
            log_path: ctx.settings.log_dir.join(format!("iteration-{index}.log")),
            timeout: ctx.settings.worker_timeout,
        };
        let succeeded = match ctx.worker.invoke(&request).await {
            Ok(()) => true,
            Err(err) => {
                warn!(iteration = index, err = %format!("{err:#}"), "worker invocation failed");
                false
            }
        };

        let advanced = if succeeded {
            let signal = check_progress(ctx.vcs, &mut state.progress);
            state.breaker.record_outcome(signal, false);
            signal == ProgressSignal::Advanced
        } else {
            // Progress is only meaningful after a successful run.
            state.breaker.record_outcome(ProgressSignal::Unknown, true);
            false
        };

        if state.breaker.evaluate() == BreakerState::Tripped {
            break LoopStop::CircuitBreaker;
        }
        ctx.publish(&state);

        if succeeded {
            info!(
                iteration = index,
                commits = state.total_commits(),
                no_progress = state.breaker.consecutive_no_progress(),
                "iteration completed"
            );
            ctx.notify(&mut state, EventKind::IterationCompleted, None)
                .await;
            if advanced {
                ctx.push(&state.session.branch);
            }
        }

        index += 1;
        if state.session.is_bounded() && index > state.session.max_iterations {
            // Skip the delay; the next pass stops on the limit.
            continue;
        }
        if interruptible_delay(ctx.settings.delay, &mut shutdown).await {
            break LoopStop::Interrupted;
        }
    };

    finish(state, ctx, stop).await
}

async fn finish<W: Worker, V: VersionControl>(
    mut state: LoopState,
    ctx: &LoopContext<'_, W, V>,
    stop: LoopStop,
) -> LoopOutcome {
    state.phase = LoopPhase::Stopped(stop);
    info!(stop = %stop, iteration = state.iteration, commits = state.total_commits(), "session stopped");
    ctx.publish(&state);

    let detail = match stop {
        LoopStop::CircuitBreaker => Some(
            state
                .breaker
                .trip_conditions()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    };
    ctx.notify(&mut state, stop.event(), detail).await;
    LoopOutcome { stop, state }
}

/// Probe the head revision and feed it to the detector.
///
/// Probe failures and empty repositories skip the comparison; they never count
/// as lack of progress.
fn check_progress<V: VersionControl>(vcs: &V, detector: &mut ProgressDetector) -> ProgressSignal {
    let revision = match vcs.head_revision() {
        Ok(Some(rev)) => rev,
        Ok(None) => {
            warn!("repository has no commits yet, skipping progress check");
            return ProgressSignal::Unknown;
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "revision probe failed, skipping progress check");
            return ProgressSignal::Unknown;
        }
    };

    let commits_since_last = match detector.last_known_revision() {
        Some(prev) if prev == revision => Some(0),
        Some(prev) => match vcs.commits_between(prev, &revision) {
            Ok(count) => Some(count),
            Err(err) => {
                debug!(err = %err, "could not count new commits");
                None
            }
        },
        None => None,
    };

    let head = HeadObservation {
        revision,
        commits_since_last,
    };
    match detector.observe_head(Some(&head)) {
        Some(result) if result.advanced => {
            info!(revision = %display_revision(&head.revision), new_commits = result.delta_count, "progress detected");
            ProgressSignal::Advanced
        }
        Some(_) => {
            info!(
                revision = %display_revision(&head.revision),
                streak = detector.state().consecutive_no_progress_count,
                "no new commits"
            );
            ProgressSignal::Unchanged
        }
        None => {
            warn!("revision probe returned an empty revision, skipping progress check");
            ProgressSignal::Unknown
        }
    }
}

/// Sleep for `delay` unless an interrupt arrives first. Returns true when
/// interrupted.
async fn interruptible_delay(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        Ok(_) = shutdown.wait_for(|stop| *stop) => true,
    }
}

impl<W: Worker, V: VersionControl> LoopContext<'_, W, V> {
    fn publish(&self, state: &LoopState) {
        let snapshot = state.snapshot(epoch_now());
        if let Err(err) = self.publisher.publish(&snapshot) {
            warn!(err = %format!("{err:#}"), "failed to publish status");
        }
        if self.settings.monitor {
            eprintln!("{}", snapshot.digest());
        }
    }

    /// Send `event`. A pending rate warning rides along in the detail of the
    /// first notification that is actually sent.
    async fn notify(&self, state: &mut LoopState, event: EventKind, detail: Option<String>) {
        if !self.notifier.wants(event) {
            return;
        }
        let detail = match (detail, state.pending_rate_warning.take()) {
            (Some(detail), Some(warning)) => Some(format!("{detail}; {warning}")),
            (detail, warning) => detail.or(warning),
        };
        let notification = state.notification(event, epoch_now(), detail);
        self.notifier.notify(&notification).await;
    }

    fn push(&self, branch: &str) {
        let Some(remote) = &self.settings.push_remote else {
            return;
        };
        match self.vcs.push_branch(remote, branch) {
            Ok(()) => info!(remote = %remote, branch = %branch, "pushed"),
            Err(err) => warn!(
                remote = %remote,
                branch = %branch,
                err = %format!("{err:#}"),
                "push failed, will retry after the next commit"
            ),
        }
    }

    /// Consume a pending stop request, if any.
    fn take_stop_request(&self) -> bool {
        let Some(path) = &self.settings.stop_file else {
            return false;
        };
        if !path.exists() {
            return false;
        }
        info!(path = %path.display(), "stop requested");
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), err = %err, "failed to remove stop file");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::breaker::BreakerConfig;
    use crate::core::session::Mode;
    use crate::io::status::read_status;
    use crate::test_support::{RecordingChannel, ScriptedStep, ScriptedVcs, ScriptedWorker};

    fn session(max_iterations: u32) -> Session {
        Session {
            project: "demo".to_string(),
            started_at: epoch_now(),
            mode: Mode::Build,
            branch: "feature/x".to_string(),
            max_iterations,
            breaker: BreakerConfig::default(),
        }
    }

    fn settings(dir: &std::path::Path) -> LoopSettings {
        LoopSettings {
            workdir: dir.to_path_buf(),
            instructions: "do the work".to_string(),
            log_dir: dir.join("logs"),
            delay: Duration::ZERO,
            worker_timeout: None,
            push_remote: Some("origin".to_string()),
            stop_file: Some(dir.join("STOP")),
            monitor: false,
        }
    }

    #[tokio::test]
    async fn failed_invocation_skips_progress_and_push() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        let worker = ScriptedWorker::new(vcs.clone(), vec![ScriptedStep::Fail]);
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let recorder = RecordingChannel::default();
        let notifier = Notifier::new(true, Duration::from_secs(1)).with_channel(recorder.clone());
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = run_loop(LoopState::new(session(1), vcs.head(), 50, epoch_now()), &ctx, rx).await;

        assert_eq!(outcome.stop, LoopStop::MaxIterations);
        assert_eq!(outcome.state.breaker.consecutive_errors(), 1);
        assert_eq!(outcome.state.breaker.consecutive_no_progress(), 0);
        assert_eq!(recorder.count(EventKind::IterationCompleted), 0);
        assert!(vcs.pushes().is_empty());
    }

    #[tokio::test]
    async fn progress_pushes_branch_and_tolerates_push_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        let worker = ScriptedWorker::new(
            vcs.clone(),
            vec![ScriptedStep::commit("r1"), ScriptedStep::commit("r2")],
        );
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let notifier = Notifier::disabled();
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        vcs.set_push_fails(true);
        let outcome = run_loop(LoopState::new(session(1), vcs.head(), 50, epoch_now()), &ctx, rx.clone()).await;
        assert_eq!(outcome.stop, LoopStop::MaxIterations);
        assert!(vcs.pushes().is_empty());
        assert_eq!(outcome.state.breaker.consecutive_errors(), 0);

        vcs.set_push_fails(false);
        let outcome = run_loop(LoopState::new(session(1), vcs.head(), 50, epoch_now()), &ctx, rx).await;
        assert_eq!(outcome.state.total_commits(), 1);
        assert_eq!(
            vcs.pushes(),
            vec![("origin".to_string(), "feature/x".to_string())]
        );
    }

    #[tokio::test]
    async fn probe_failure_does_not_count_as_no_progress() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        vcs.set_probe_fails(true);
        let worker = ScriptedWorker::new(vcs.clone(), Vec::new());
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let notifier = Notifier::disabled();
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = run_loop(LoopState::new(session(5), vcs.head(), 50, epoch_now()), &ctx, rx).await;
        assert_eq!(outcome.stop, LoopStop::MaxIterations);
        assert_eq!(worker.calls(), 5);
        assert_eq!(outcome.state.breaker.consecutive_no_progress(), 0);
    }

    #[tokio::test]
    async fn empty_repository_does_not_trip_before_first_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(None);
        let worker = ScriptedWorker::new(
            vcs.clone(),
            vec![
                ScriptedStep::Succeed,
                ScriptedStep::Succeed,
                ScriptedStep::Succeed,
                ScriptedStep::commit("first"),
            ],
        );
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let notifier = Notifier::disabled();
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = run_loop(LoopState::new(session(4), None, 50, epoch_now()), &ctx, rx).await;
        assert_eq!(outcome.stop, LoopStop::MaxIterations);
        assert_eq!(outcome.state.total_commits(), 1);
        assert_eq!(outcome.state.progress.last_known_revision(), Some("first"));
    }

    #[tokio::test]
    async fn stop_file_ends_session_normally() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        let worker = ScriptedWorker::new(vcs.clone(), Vec::new());
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let recorder = RecordingChannel::default();
        let notifier = Notifier::new(false, Duration::from_secs(1)).with_channel(recorder.clone());
        let settings = settings(temp.path());
        fs::write(temp.path().join("STOP"), "").expect("stop file");
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = run_loop(LoopState::new(session(0), vcs.head(), 50, epoch_now()), &ctx, rx).await;
        assert_eq!(outcome.stop, LoopStop::Normal);
        assert_eq!(worker.calls(), 0);
        assert!(!temp.path().join("STOP").exists());
        assert_eq!(
            recorder.events(),
            vec![EventKind::SessionStarted, EventKind::SessionStopped]
        );
        let status = read_status(publisher.path()).expect("status");
        assert_eq!(status.stop_reason.as_deref(), Some("normal"));
    }

    #[tokio::test]
    async fn breaker_notification_names_the_condition() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        let worker = ScriptedWorker::new(vcs.clone(), vec![ScriptedStep::Fail; 5]);
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let recorder = RecordingChannel::default();
        let notifier = Notifier::new(false, Duration::from_secs(1)).with_channel(recorder.clone());
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = run_loop(LoopState::new(session(0), vcs.head(), 50, epoch_now()), &ctx, rx).await;
        assert_eq!(outcome.stop, LoopStop::CircuitBreaker);
        assert_eq!(worker.calls(), 5);

        let tripped = recorder
            .notifications()
            .into_iter()
            .find(|n| n.event == EventKind::CircuitBreakerTripped)
            .expect("trip notification");
        assert!(
            tripped
                .detail
                .as_deref()
                .is_some_and(|d| d.contains("worker failed 5 consecutive times"))
        );
    }

    #[tokio::test]
    async fn rate_warning_rides_on_next_lifecycle_notification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        let worker = ScriptedWorker::new(
            vcs.clone(),
            vec![
                ScriptedStep::commit("r1"),
                ScriptedStep::commit("r2"),
                ScriptedStep::commit("r3"),
            ],
        );
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let recorder = RecordingChannel::default();
        let notifier = Notifier::new(false, Duration::from_secs(1)).with_channel(recorder.clone());
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        let outcome = run_loop(LoopState::new(session(3), vcs.head(), 2, epoch_now()), &ctx, rx).await;

        assert_eq!(outcome.stop, LoopStop::MaxIterations);
        assert_eq!(outcome.state.pending_rate_warning, None);
        let details: Vec<Option<String>> = recorder
            .notifications()
            .into_iter()
            .map(|n| n.detail)
            .collect();
        assert_eq!(
            details,
            vec![
                None,
                Some("rate warning: 2 invocations this hour".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn rate_warning_is_sent_once_with_per_iteration_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("r0"));
        let worker = ScriptedWorker::new(
            vcs.clone(),
            vec![
                ScriptedStep::commit("r1"),
                ScriptedStep::commit("r2"),
                ScriptedStep::commit("r3"),
            ],
        );
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let recorder = RecordingChannel::default();
        let notifier = Notifier::new(true, Duration::from_secs(1)).with_channel(recorder.clone());
        let settings = settings(temp.path());
        let ctx = LoopContext {
            worker: &worker,
            vcs: &*vcs,
            publisher: &publisher,
            notifier: &notifier,
            settings: &settings,
        };
        let (_tx, rx) = watch::channel(false);

        run_loop(LoopState::new(session(3), vcs.head(), 2, epoch_now()), &ctx, rx).await;

        let warned: Vec<(EventKind, u32)> = recorder
            .notifications()
            .into_iter()
            .filter(|n| n.detail.as_deref().is_some_and(|d| d.contains("rate warning")))
            .map(|n| (n.event, n.iteration))
            .collect();
        assert_eq!(warned, vec![(EventKind::IterationStarted, 2)]);
    }

    #[test]
    fn notifications_show_abbreviated_revision() {
        let full = "8e80db197ae0c1b6b3f2a6d1f0e9c8b7a6d5e4f3";
        let state = LoopState::new(session(1), Some(full.to_string()), 50, 100);
        let n = state.notification(EventKind::SessionStarted, 100, None);
        assert_eq!(n.last_revision.as_deref(), Some("8e80db1"));
        assert_eq!(state.progress.last_known_revision(), Some(full));
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut state = LoopState::new(session(10), Some("abc".to_string()), 50, 100);
        state.iteration = 2;
        state.rate.tick(100);
        state.rate.tick(101);
        state.breaker.record_outcome(ProgressSignal::Unchanged, false);

        let snap = state.snapshot(200);
        assert_eq!(snap.timestamp, 200);
        assert_eq!(snap.iteration, 2);
        assert_eq!(snap.max_iterations, 10);
        assert_eq!(snap.mode, "build");
        assert_eq!(snap.consecutive_no_progress, 1);
        assert_eq!(snap.iterations_this_hour, 2);
        assert_eq!(snap.status, RunStatus::Running);
        assert_eq!(snap.stop_reason, None);

        state.phase = LoopPhase::Stopped(LoopStop::Interrupted);
        let snap = state.snapshot(201);
        assert_eq!(snap.status, RunStatus::Stopped);
        assert_eq!(snap.stop_reason.as_deref(), Some("interrupted"));
    }
}

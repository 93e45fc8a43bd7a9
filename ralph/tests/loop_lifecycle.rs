//! Loop-level tests for full session lifecycles.
//!
//! These drive `run_loop` through several iterations with scripted workers and
//! an in-memory repository, then check the stop reason, the published status
//! artifact, and the notifications that went out.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;

use ralph::core::breaker::BreakerConfig;
use ralph::core::session::{Mode, Session};
use ralph::core::snapshot::RunStatus;
use ralph::io::clock::epoch_now;
use ralph::io::status::{StatusPublisher, read_status};
use ralph::looping::{LoopContext, LoopOutcome, LoopSettings, LoopState, LoopStop, run_loop};
use ralph::notify::{EventKind, Notifier};
use ralph::test_support::{RecordingChannel, ScriptedStep, ScriptedVcs, ScriptedWorker};

fn session(max_iterations: u32, breaker: BreakerConfig) -> Session {
    Session {
        project: "demo".to_string(),
        started_at: epoch_now(),
        mode: Mode::Build,
        branch: "feature/loop".to_string(),
        max_iterations,
        breaker,
    }
}

fn settings(dir: &Path, delay: Duration) -> LoopSettings {
    LoopSettings {
        workdir: dir.to_path_buf(),
        instructions: "pick the next task\n".to_string(),
        log_dir: dir.join("logs"),
        delay,
        worker_timeout: None,
        push_remote: None,
        stop_file: None,
        monitor: false,
    }
}

/// Everything a scripted session needs, kept alive for the test's duration.
struct Harness {
    temp: tempfile::TempDir,
    vcs: std::sync::Arc<ScriptedVcs>,
    worker: ScriptedWorker,
    publisher: StatusPublisher,
    recorder: RecordingChannel,
    notifier: Notifier,
    settings: LoopSettings,
}

impl Harness {
    fn new(steps: Vec<ScriptedStep>, delay: Duration) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let vcs = ScriptedVcs::new(Some("a000001"));
        let worker = ScriptedWorker::new(vcs.clone(), steps);
        let publisher = StatusPublisher::new(temp.path().join("status.json"));
        let recorder = RecordingChannel::default();
        let notifier =
            Notifier::new(false, Duration::from_secs(1)).with_channel(recorder.clone());
        let settings = settings(temp.path(), delay);
        Self {
            temp,
            vcs,
            worker,
            publisher,
            recorder,
            notifier,
            settings,
        }
    }

    fn context(&self) -> LoopContext<'_, ScriptedWorker, ScriptedVcs> {
        LoopContext {
            worker: &self.worker,
            vcs: &*self.vcs,
            publisher: &self.publisher,
            notifier: &self.notifier,
            settings: &self.settings,
        }
    }

    fn state(&self, session: Session) -> LoopState {
        LoopState::new(session, self.vcs.head(), 50, epoch_now())
    }

    async fn run(&self, session: Session) -> LoopOutcome {
        let (_tx, rx) = watch::channel(false);
        run_loop(self.state(session), &self.context(), rx).await
    }
}

/// Threshold 3, three successful iterations with an unchanged head:
/// the breaker trips after iteration 3 and no fourth invocation happens.
#[tokio::test]
async fn unchanged_head_trips_breaker_after_threshold() {
    let harness = Harness::new(Vec::new(), Duration::ZERO);
    let outcome = harness.run(session(0, BreakerConfig::default())).await;

    assert_eq!(outcome.stop, LoopStop::CircuitBreaker);
    assert_eq!(harness.worker.calls(), 3);
    assert_eq!(outcome.state.iteration, 3);

    let status = read_status(harness.publisher.path()).expect("status");
    assert_eq!(status.status, RunStatus::Stopped);
    assert_eq!(status.iteration, 3);
    assert_eq!(status.consecutive_no_progress, 3);
    assert_eq!(status.consecutive_errors, 0);
    assert_eq!(status.stop_reason.as_deref(), Some("circuit_breaker"));
    assert_eq!(harness.recorder.count(EventKind::CircuitBreakerTripped), 1);

    let diagnostic = outcome.state.breaker.diagnostic().expect("diagnostic");
    assert!(diagnostic.contains("no new commits for 3 consecutive iterations"));
}

/// Error threshold 5, iterations 1-4 fail and iteration 5 commits:
/// the error streak resets at iteration 5 and the breaker stays closed.
#[tokio::test]
async fn success_with_new_revision_resets_error_streak() {
    let mut steps = vec![ScriptedStep::Fail; 4];
    steps.push(ScriptedStep::commit("b000005"));
    let harness = Harness::new(steps, Duration::ZERO);

    let outcome = harness.run(session(5, BreakerConfig::default())).await;

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    assert_eq!(harness.worker.calls(), 5);
    assert_eq!(outcome.state.breaker.consecutive_errors(), 0);
    assert_eq!(outcome.state.breaker.consecutive_no_progress(), 0);
    assert!(outcome.state.breaker.trip_conditions().is_empty());
    assert_eq!(outcome.state.total_commits(), 1);

    let status = read_status(harness.publisher.path()).expect("status");
    assert_eq!(status.total_commits, 1);
    assert_eq!(status.consecutive_errors, 0);
    assert_eq!(harness.recorder.count(EventKind::MaxIterationsReached), 1);
}

/// `max_iterations = 1`: exactly one invocation, never an iteration 2.
#[tokio::test]
async fn single_iteration_limit_runs_once() {
    let harness = Harness::new(vec![ScriptedStep::commit("c000001")], Duration::from_secs(3600));

    let outcome = harness.run(session(1, BreakerConfig::default())).await;

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    assert_eq!(harness.worker.calls(), 1);
    assert_eq!(outcome.state.iteration, 1);
    assert_eq!(
        harness.recorder.events(),
        vec![EventKind::SessionStarted, EventKind::MaxIterationsReached]
    );

    let status = read_status(harness.publisher.path()).expect("status");
    assert_eq!(status.status, RunStatus::Stopped);
    assert_eq!(status.iteration, 1);
    assert_eq!(status.max_iterations, 1);
    assert_eq!(status.iterations_this_hour, 1);
}

/// Interrupt during the delay between iterations 2 and 3: final status is
/// stopped at iteration 2 and `interrupted` is sent exactly once.
#[tokio::test(start_paused = true)]
async fn interrupt_during_delay_freezes_iteration() {
    let harness = Harness::new(
        vec![
            ScriptedStep::commit("d000001"),
            ScriptedStep::commit("d000002"),
            ScriptedStep::commit("d000003"),
        ],
        Duration::from_secs(10),
    );
    let (tx, rx) = watch::channel(false);
    let ctx = harness.context();

    // Iteration 1 runs at t=0 and iteration 2 at t=10; t=15 lands in the
    // delay that follows iteration 2.
    let interrupter = async {
        tokio::time::sleep(Duration::from_secs(15)).await;
        tx.send(true).expect("send interrupt");
    };
    let (outcome, ()) = tokio::join!(
        run_loop(harness.state(session(0, BreakerConfig::default())), &ctx, rx),
        interrupter
    );

    assert_eq!(outcome.stop, LoopStop::Interrupted);
    assert_eq!(harness.worker.calls(), 2);
    assert_eq!(outcome.state.iteration, 2);

    let status = read_status(harness.publisher.path()).expect("status");
    assert_eq!(status.status, RunStatus::Stopped);
    assert_eq!(status.iteration, 2);
    assert_eq!(status.total_commits, 2);
    assert_eq!(status.stop_reason.as_deref(), Some("interrupted"));
    assert_eq!(harness.recorder.count(EventKind::Interrupted), 1);
}

/// An interrupt that is already pending stops the loop before any invocation.
#[tokio::test]
async fn pending_interrupt_stops_before_first_iteration() {
    let harness = Harness::new(Vec::new(), Duration::ZERO);
    let (_tx, rx) = watch::channel(true);

    let outcome = run_loop(
        harness.state(session(5, BreakerConfig::default())),
        &harness.context(),
        rx,
    )
    .await;

    assert_eq!(outcome.stop, LoopStop::Interrupted);
    assert_eq!(harness.worker.calls(), 0);
    let status = read_status(harness.publisher.path()).expect("status");
    assert_eq!(status.iteration, 0);
    assert_eq!(status.status, RunStatus::Stopped);
}

/// A disabled breaker lets a stalled session run to its iteration limit.
#[tokio::test]
async fn disabled_breaker_runs_to_limit() {
    let harness = Harness::new(vec![ScriptedStep::Fail; 8], Duration::ZERO);
    let breaker = BreakerConfig {
        enabled: false,
        ..BreakerConfig::default()
    };

    let outcome = harness.run(session(10, breaker)).await;

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    assert_eq!(harness.worker.calls(), 10);
    assert_eq!(outcome.state.breaker.consecutive_errors(), 0);
    assert_eq!(outcome.state.breaker.consecutive_no_progress(), 2);

    let status = read_status(harness.publisher.path()).expect("status");
    assert!(!status.circuit_breaker_enabled);
}

/// Raised no-progress threshold from the command line is honoured and shown.
#[tokio::test]
async fn custom_threshold_is_published() {
    let harness = Harness::new(Vec::new(), Duration::ZERO);
    let breaker = BreakerConfig {
        no_progress_threshold: 5,
        ..BreakerConfig::default()
    };

    let outcome = harness.run(session(0, breaker)).await;

    assert_eq!(outcome.stop, LoopStop::CircuitBreaker);
    assert_eq!(harness.worker.calls(), 5);
    let status = read_status(harness.publisher.path()).expect("status");
    assert_eq!(status.circuit_breaker_threshold, 5);
}

/// Multi-commit iterations add every new commit to the session total.
#[tokio::test]
async fn commit_counts_accumulate_across_iterations() {
    let harness = Harness::new(
        vec![
            ScriptedStep::Commit(vec!["e1".into(), "e2".into(), "e3".into()]),
            ScriptedStep::Succeed,
            ScriptedStep::commit("e4"),
        ],
        Duration::ZERO,
    );

    let outcome = harness.run(session(3, BreakerConfig::default())).await;

    assert_eq!(outcome.state.total_commits(), 4);
    assert_eq!(outcome.state.progress.last_known_revision(), Some("e4"));
    assert!(outcome.summary(epoch_now()).contains("4 commit(s) on feature/loop"));
    assert!(harness.temp.path().join("status.json").exists());
}

//! Supervisory loop for an autonomous coding worker.
//!
//! Runs the worker repeatedly against the current git branch, publishes a
//! status snapshot to `.ralph/status.json`, and stops on the iteration limit,
//! a circuit-breaker trip, a stop request, or an interrupt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use ralph::core::session::{Mode, Session};
use ralph::exit_codes;
use ralph::io::clock::epoch_now;
use ralph::io::config::{
    ConfigOverrides, RalphConfig, default_config_path, load_config, resolve,
};
use ralph::io::git::{Git, VersionControl};
use ralph::io::prompt::{PromptVars, load_instructions};
use ralph::io::status::{StatusPublisher, read_status};
use ralph::io::worker::CommandWorker;
use ralph::logging;
use ralph::looping::{LoopContext, LoopSettings, LoopState, LoopStop, run_loop};
use ralph::notify::Notifier;

/// Branches a scoped plan must never run on.
const PROTECTED_BRANCHES: [&str; 2] = ["main", "master"];

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Run an autonomous coding worker in a loop until it stops making progress"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Maximum iterations for the default build mode (0 = unbounded).
    max_iterations: Option<u32>,

    #[command(flatten)]
    opts: GlobalOpts,
}

#[derive(Args, Debug, Default)]
struct GlobalOpts {
    /// Print a one-line status digest after every status update.
    #[arg(long, global = true)]
    monitor: bool,

    /// Never stop on the circuit breaker.
    #[arg(long, global = true)]
    no_circuit_breaker: bool,

    /// Stop after this many consecutive iterations without a new commit.
    #[arg(long, value_name = "N", global = true)]
    circuit_breaker_threshold: Option<u32>,

    /// Config file (default: .ralph/config.toml).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Webhook that receives lifecycle notifications.
    #[arg(long, env = "RALPH_WEBHOOK_URL", value_name = "URL", global = true)]
    webhook_url: Option<String>,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Implement planned work, one task per iteration (default).
    Build {
        /// Maximum iterations (0 = unbounded).
        max_iterations: Option<u32>,
    },
    /// Update the implementation plan without writing code.
    Plan {
        /// Maximum iterations (0 = unbounded).
        max_iterations: Option<u32>,
    },
    /// Plan a single piece of work on a feature branch.
    PlanWork {
        /// What to plan for.
        description: String,
        /// Maximum iterations (0 = unbounded).
        max_iterations: Option<u32>,
    },
    /// Review the codebase; extra flags are passed to the instructions.
    Audit {
        /// Maximum iterations (0 = unbounded).
        #[arg(short = 'n', long = "iterations", value_name = "N")]
        max_iterations: Option<u32>,
        /// Audit flags, e.g. `--security --deps`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        flags: Vec<String>,
    },
    /// Archive completed work (one iteration unless given).
    Done {
        /// Maximum iterations (0 = unbounded).
        max_iterations: Option<u32>,
    },
    /// Print the status of the current or last session.
    Status {
        /// Keep refreshing until the session stops.
        #[arg(long)]
        watch: bool,
        /// Seconds between refreshes with --watch.
        #[arg(long, default_value_t = 2, value_name = "SECS")]
        interval: u64,
    },
    /// Ask a running session to stop before its next iteration.
    Stop,
}

/// Mode-specific parameters resolved from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModeRequest {
    mode: Mode,
    max_iterations: u32,
    work_description: Option<String>,
    audit_flags: Vec<String>,
}

impl ModeRequest {
    fn new(mode: Mode, max_iterations: Option<u32>) -> Self {
        Self {
            mode,
            max_iterations: max_iterations.unwrap_or(0),
            work_description: None,
            audit_flags: Vec::new(),
        }
    }
}

/// Map the command line to a loop mode. `None` for non-loop commands.
fn mode_request(cli: &Cli) -> Result<Option<ModeRequest>> {
    let request = match &cli.command {
        None => ModeRequest::new(Mode::Build, cli.max_iterations),
        Some(Command::Build { max_iterations }) => {
            ModeRequest::new(Mode::Build, max_iterations.or(cli.max_iterations))
        }
        Some(Command::Plan { max_iterations }) => ModeRequest::new(Mode::Plan, *max_iterations),
        Some(Command::PlanWork {
            description,
            max_iterations,
        }) => {
            let description = description.trim();
            if description.is_empty() {
                bail!("plan-work requires a non-empty work description");
            }
            ModeRequest {
                work_description: Some(description.to_string()),
                ..ModeRequest::new(Mode::ScopedPlan, *max_iterations)
            }
        }
        Some(Command::Audit {
            max_iterations,
            flags,
        }) => ModeRequest {
            audit_flags: flags.clone(),
            ..ModeRequest::new(Mode::Audit, *max_iterations)
        },
        Some(Command::Done { max_iterations }) => {
            ModeRequest::new(Mode::Archive, Some(max_iterations.unwrap_or(1)))
        }
        Some(Command::Status { .. } | Command::Stop) => return Ok(None),
    };
    Ok(Some(request))
}

fn ensure_branch_allowed(mode: Mode, branch: &str) -> Result<()> {
    if mode == Mode::ScopedPlan && PROTECTED_BRANCHES.contains(&branch) {
        bail!("plan-work must run on a feature branch, not '{branch}'");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.opts.verbose);
    match run(cli).await {
        Ok(()) => std::process::exit(exit_codes::OK),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = std::env::current_dir().context("resolve current directory")?;
    let config_path = cli
        .opts
        .config
        .as_deref()
        .map_or_else(|| default_config_path(&root), |path| resolve(&root, path));
    let mut cfg = load_config(&config_path)?;
    cfg.apply_overrides(&ConfigOverrides {
        no_circuit_breaker: cli.opts.no_circuit_breaker,
        circuit_breaker_threshold: cli.opts.circuit_breaker_threshold,
        webhook_url: cli.opts.webhook_url.clone(),
    });
    cfg.validate()
        .with_context(|| format!("invalid config {}", config_path.display()))?;

    match &cli.command {
        Some(Command::Status { watch, interval }) => {
            let path = resolve(&root, &cfg.paths.status_file);
            return cmd_status(&path, *watch, Duration::from_secs((*interval).max(1))).await;
        }
        Some(Command::Stop) => return cmd_stop(&resolve(&root, &cfg.paths.stop_file)),
        _ => {}
    }

    let request = mode_request(&cli)?.ok_or_else(|| anyhow!("not a loop command"))?;
    cmd_loop(&root, &cfg, request, cli.opts.monitor).await
}

async fn cmd_loop(root: &Path, cfg: &RalphConfig, request: ModeRequest, monitor: bool) -> Result<()> {
    let git = Git::new(root);
    git.ensure_work_tree()?;
    let branch = git.current_branch()?;
    ensure_branch_allowed(request.mode, &branch)?;

    let instructions = load_instructions(
        &resolve(root, &cfg.paths.prompt_dir),
        &PromptVars {
            mode: request.mode,
            branch: branch.clone(),
            work_description: request.work_description.clone(),
            audit_flags: request.audit_flags.clone(),
            max_iterations: request.max_iterations,
        },
    )?;
    let worker = CommandWorker::new(&cfg.worker.command)?;
    let notifier = Notifier::from_config(&cfg.notify)?;

    let project = root
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    let session = Session {
        project,
        started_at: epoch_now(),
        mode: request.mode,
        branch,
        max_iterations: request.max_iterations,
        breaker: cfg.breaker,
    };

    let initial_revision = match git.head_revision() {
        Ok(rev) => rev,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "could not read starting revision");
            None
        }
    };

    let stop_file = resolve(root, &cfg.paths.stop_file);
    // A stale request from an earlier session must not stop this one.
    if stop_file.exists() {
        std::fs::remove_file(&stop_file)
            .with_context(|| format!("remove stale stop file {}", stop_file.display()))?;
    }

    let settings = LoopSettings {
        workdir: root.to_path_buf(),
        instructions,
        log_dir: resolve(root, &cfg.paths.log_dir).join(session.id()),
        delay: cfg.delay(),
        worker_timeout: cfg.worker_timeout(),
        push_remote: cfg.looping.push.then(|| cfg.looping.remote.clone()),
        stop_file: Some(stop_file),
        monitor,
    };
    let publisher = StatusPublisher::new(resolve(root, &cfg.paths.status_file));

    info!(
        session = %session.id(),
        worker = worker.program(),
        channels = ?notifier.channel_names(),
        status = %publisher.path().display(),
        logs = %settings.log_dir.display(),
        "starting session"
    );

    let state = LoopState::new(session, initial_revision, cfg.rate.warn_per_hour, epoch_now());
    let ctx = LoopContext {
        worker: &worker,
        vcs: &git,
        publisher: &publisher,
        notifier: &notifier,
        settings: &settings,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                info!("interrupt received, stopping after the current iteration");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => warn!(err = %format!("{err:#}"), "signal handling unavailable"),
        }
    });

    let outcome = run_loop(state, &ctx, shutdown_rx).await;

    println!("{}", outcome.summary(epoch_now()));
    if outcome.stop == LoopStop::CircuitBreaker
        && let Some(diagnostic) = outcome.state.breaker.diagnostic()
    {
        eprintln!("{diagnostic}");
    }
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl-c")?;
    Ok(())
}

async fn cmd_status(path: &Path, watch: bool, interval: Duration) -> Result<()> {
    loop {
        let snapshot = read_status(path)?;
        if watch {
            // Clear the screen so the view refreshes in place.
            print!("\x1b[2J\x1b[H");
        }
        println!("{}", snapshot.render(epoch_now()));
        if !watch || !snapshot.is_running() {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

fn cmd_stop(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, "").with_context(|| format!("write {}", path.display()))?;
    println!("stop requested; the session ends before its next iteration");
    Ok(())
}

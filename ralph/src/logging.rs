//! Operator-facing tracing for the loop.
//!
//! - **Tracing (this module)**: session and iteration events on stderr,
//!   filtered by `RUST_LOG`. Defaults to `ralph=info`, or `ralph=debug` with
//!   `--verbose`.
//!
//! - **Worker logs (`io/worker`)**: raw worker output in
//!   `.ralph/logs/<session-id>/iteration-<n>.log`. Always written, unaffected
//!   by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "ralph=debug" } else { "ralph=info" }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the default when set:
/// ```bash
/// RUST_LOG=ralph=trace ralph build 5
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

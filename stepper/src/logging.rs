//! Diagnostic tracing for step controller runs.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. It is separate from the
//! run artifacts (`session.json`, `steps/<n>.json` written by `io::run_state` and
//! `io::step_log`), which are always written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber: `RUST_LOG` filter, compact stderr output.
///
/// Returns `false` when a subscriber was already installed (tests, embedding);
/// the existing one is kept.
///
/// ```bash
/// RUST_LOG=stepper=debug stepper run --question "How many rows?"
/// ```
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(filter_from(std::env::var("RUST_LOG").ok().as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .is_ok()
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

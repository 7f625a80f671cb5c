//! Tracing initialisation for codesmith binaries.
//!
//! Call [`init_tracing`] once at startup. Later calls are ignored because
//! the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read for the filter directive; falls back to `RUST_LOG`.
pub const LOG_ENV: &str = "CODESMITH_LOG";

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber.
///
/// * `json`: newline-delimited JSON lines instead of the human format.
/// * `level`: verbosity when neither `CODESMITH_LOG` nor `RUST_LOG` is set.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(filter(level));
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

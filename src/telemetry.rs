//! Log output for harness runs
//!
//! Events carry `test`, `step`, `namespace` and `resource` fields. Filter them
//! with `RUST_LOG` (e.g. `RUST_LOG=seppo_harness=debug` to see poll rounds and
//! diffs).
//!
//! # Example
//!
//! ```no_run
//! use seppo_harness::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber filtered by `RUST_LOG` (default: info)
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    init_logging_with("info");
}

/// Like [`init_logging`], with `default_directive` when `RUST_LOG` is unset
pub fn init_logging_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

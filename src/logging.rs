//! # Logging
//!
//! Subscriber bootstrap for binaries. The library itself only emits `tracing`
//! events and never installs a subscriber.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over `level`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(format!("warn,minvar_rs={level},minvar={level}")))
    .unwrap_or_else(|_| EnvFilter::new("warn,minvar_rs=info"));

  fmt()
    .with_env_filter(filter)
    .with_target(false)
    .try_init()
    .is_ok()
}

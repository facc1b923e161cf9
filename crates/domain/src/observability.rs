//! Idempotent tracing init.
//!
//! Called at the top of every cycle; the `Once` guard makes repeated
//! calls (daemon poll loop, tests, manual runs) harmless.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber once.
///
/// Honors `RUST_LOG`; defaults to `info` for the `reverie` crates when
/// unset. `try_init` failures (another subscriber already installed,
/// e.g. by a test harness) are ignored.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

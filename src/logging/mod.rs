//! # Logging Module
//!
//! Tracing subscriber setup for the proxy.
//!
//! ## Features
//!
//! - **Env Filter**: Level directives from `STOREPROXY_LOG_LEVEL` or `RUST_LOG`
//! - **Audit Target**: Audit records arrive on the `storeproxy::audit` target and can be filtered separately
//! - **Idempotent**: A second initialisation is ignored

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber with `directives`, falling back to `info`
pub fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("Invalid log directives '{}': {}, using 'info'", directives, e);
        EnvFilter::new("info")
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

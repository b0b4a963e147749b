//! Tracing setup with a reloadable level filter.
//!
//! Lock and cache events are emitted under the `latchkey` target. Connection
//! pool internals are capped at `warn` unless `RUST_LOG` says otherwise.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

const QUIET_DEPENDENCIES: &[&str] = &["redis", "deadpool", "deadpool_redis"];

/// Builds the filter directives for `level`.
fn directives(level: &str) -> String {
    let mut out = level.to_ascii_lowercase();
    for target in QUIET_DEPENDENCIES {
        out.push_str(&format!(",{target}=warn"));
    }
    out
}

pub fn init_tracing(config: &LoggingConfig) {
    init_tracing_with_level(&config.level);
}

pub fn init_tracing_with_level(level: &str) {
    // RUST_LOG wins over the configured level.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(directives(level)));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Apply a new logging level at runtime. Returns `false` if tracing was not
/// initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|f| {
                *f = EnvFilter::new(directives(level));
            })
            .is_ok(),
        None => false,
    }
}

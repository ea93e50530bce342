// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing_subscriber::{fmt, EnvFilter};

/// Directives used when `RUST_LOG` is unset or does not parse.
pub const DEFAULT_LOG_FILTER: &str = "info";

pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global `fmt` subscriber. A second call leaves the first one in place.
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(log_filter())
        .with_target(false)
        .compact()
        .try_init();
}

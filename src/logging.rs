//! Tracing subscriber setup for binaries and tests that want log
//! output.
//!
//! Two entry points: [`init_logging`] installs the subscriber with an
//! explicit filter directive, [`init_from_env`] reads `RUST_LOG` and
//! falls back to the crate default when the variable is unset or does
//! not parse. Installation is global and happens at most once per
//! process; a second call fails with `InvalidArgument`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, SwapError};

/// Filter directive used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "swapmap=info";

/// Initializes the global tracing subscriber with the given filter
/// directive (e.g. `"swapmap=debug"`).
pub fn init_logging(directive: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| SwapError::InvalidArgument(format!("invalid log directive: {e}")))?;
    install(filter)
}

/// Initializes the global tracing subscriber from `RUST_LOG`, falling
/// back to [`DEFAULT_DIRECTIVE`].
pub fn init_from_env() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVE))
        .map_err(|e| SwapError::InvalidArgument(format!("invalid log directive: {e}")))?;
    install(filter)
}

fn install(filter: EnvFilter) -> Result<()> {
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| SwapError::InvalidArgument("logging already initialized".into()))
}

//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries call [`init`] once to
//! install a stderr subscriber; `RUST_LOG` takes precedence over the
//! configured level.

use crate::error::{HidError, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber with `default_level` as the fallback filter.
///
/// Calling this a second time is an error.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| HidError::Config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| HidError::Config(format!("logging already initialised: {e}")))
}

//! Logging setup.
//!
//! Every component logs through `tracing` with structured fields. Frontends
//! that do not install their own subscriber can call [`init_tracing`].
//!
//! ```rust,no_run
//! netplay_resilience::logging::init_tracing().expect("tracing already initialized");
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

use crate::error::types::{ResilienceError, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "netplay_resilience=info";

/// Install a global compact fmt subscriber filtered by `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .compact(),
        )
        .try_init()
        .map_err(|err| ResilienceError::Internal(format!("tracing init failed: {err}")))?;

    info!("Netplay resilience logging initialized");
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0

//! Structured logging setup and the engine's Prometheus metrics surface.

mod error;
mod metrics;

pub use error::TelemetryError;
pub use metrics::EngineMetrics;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber: an `env-filter` driven by
/// `RUST_LOG` (defaulting to `info`), writing formatted events to stdout.
///
/// Returns an error instead of panicking if a subscriber is already
/// installed, so callers (tests, multiple engine instances in one process)
/// can call this defensively.
pub fn init_tracing() -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|source| TelemetryError::SubscriberAlreadyInstalled { source })
}

// SPDX-License-Identifier: Apache-2.0

//! Errors for the telemetry crate.

/// Errors the telemetry crate surfaces.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    /// `init_tracing` was called after a global subscriber was already
    /// installed.
    #[error("a tracing subscriber is already installed: {source}")]
    SubscriberAlreadyInstalled {
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },

    /// A metric could not be registered (e.g. a name collision within the
    /// same process registry).
    #[error("failed to register metric {name}: {source}")]
    MetricRegistration {
        /// The metric name that failed to register.
        name: &'static str,
        #[source]
        source: prometheus::Error,
    },
}

// SPDX-License-Identifier: Apache-2.0

//! Errors for the engine crate.

/// Errors the engine crate surfaces.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A lifecycle method was called from the wrong state (start twice,
    /// offer after shutdown, `awaitTermination` before `start`).
    #[error("illegal engine state transition: {message}")]
    IllegalState {
        /// What was attempted and why it is not valid from the current
        /// state.
        message: String,
    },

    /// Failed to spawn a loop's OS thread.
    #[error("failed to spawn loop thread '{thread_name}': {source}")]
    ThreadSpawnError {
        /// Name of the thread that failed to spawn.
        thread_name: String,
        #[source]
        source: std::io::Error,
    },

    /// A loop thread panicked; the thread is joined and the panic payload
    /// captured as a string.
    #[error("loop thread '{thread_name}' panicked: {panic_message}")]
    ThreadPanic {
        /// Name of the thread that panicked.
        thread_name: String,
        /// Panic message, best-effort formatted.
        panic_message: String,
    },

    /// The I/O back-end reported an unrecoverable error; the owning loop
    /// is marked TERMINATED and the engine proceeds with the rest.
    #[error("I/O back-end failure on loop {loop_id}: {source}")]
    BackendFailure {
        /// Which loop observed the failure.
        loop_id: String,
        #[source]
        source: tpc_io::IoError,
    },

    /// The config was rejected by validation before the engine could be
    /// constructed from it.
    #[error("invalid engine configuration: {0}")]
    Config(#[from] tpc_config::ConfigError),
}

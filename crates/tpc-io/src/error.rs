// SPDX-License-Identifier: Apache-2.0

//! Errors for the I/O back-end crate.

/// Errors an I/O back-end driver surfaces. A `BackendFailure` (an
/// unrecoverable error from the underlying OS facility) is fatal to the
/// loop that owns the backend; the engine marks that loop terminated and
/// proceeds with the rest.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// The underlying selector/ring reported an unrecoverable OS error.
    #[error("I/O back-end failure: {0}")]
    BackendFailure(#[from] std::io::Error),

    /// `modify`/`unregister` referenced a token that was never registered
    /// or has already been unregistered.
    #[error("unknown registration token")]
    UnknownToken,
}

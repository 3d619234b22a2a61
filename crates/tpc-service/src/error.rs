// SPDX-License-Identifier: Apache-2.0

//! Errors for the request-service layer.

/// Errors the request-service layer surfaces.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    /// No connection registered under the given id.
    #[error("no connection registered for id {0:?}")]
    ConnectionNotFound(crate::connection::ConnectionId),

    /// A connection id was registered twice without an intervening
    /// deregister.
    #[error("connection id {0:?} is already registered")]
    DuplicateConnection(crate::connection::ConnectionId),

    /// The engine rejected the request (partition's loop queue full, or
    /// not running).
    #[error("request rejected: target loop queue is full or not accepting work")]
    Rejected,
}

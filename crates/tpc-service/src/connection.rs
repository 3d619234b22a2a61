// SPDX-License-Identifier: Apache-2.0

//! Per-loop connection multiplexing. Concrete transport (TCP, TLS) is an
//! external collaborator — only the interface between the engine and a
//! connection is modelled here: a [`Connection`] trait plus a registry
//! that owns a loop's live connections by a stable id.

use std::collections::HashMap;

use tpc_buffer::Frame;

use crate::error::ServiceError;

/// A stable identifier for one multiplexed connection, scoped to the loop
/// that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What the request layer needs from a connection: the ability to hand it
/// a response frame and to be told to close. No socket/TLS details here —
/// concrete transports implement this trait on whatever they actually are.
pub trait Connection: Send {
    /// Writes `frame` to this connection's peer. Implementations own their
    /// own backpressure/buffering policy.
    fn send(&self, frame: Frame) -> Result<(), ServiceError>;

    /// Closes the connection. Idempotent.
    fn close(&self);
}

/// Owns every live connection on one loop, addressed by [`ConnectionId`].
/// Not `Sync` by convention — callable only from the owning loop thread,
/// matching the engine's task-queue ownership policy (§5).
#[derive(Default)]
pub struct ConnectionMultiplexer<C: Connection> {
    connections: HashMap<ConnectionId, C>,
}

impl<C: Connection> ConnectionMultiplexer<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Registers a newly-accepted connection. Fails if `id` is already in
    /// use.
    pub fn register(&mut self, id: ConnectionId, connection: C) -> Result<(), ServiceError> {
        if self.connections.contains_key(&id) {
            return Err(ServiceError::DuplicateConnection(id));
        }
        self.connections.insert(id, connection);
        Ok(())
    }

    /// Removes and returns a connection, e.g. on disconnect.
    pub fn deregister(&mut self, id: ConnectionId) -> Option<C> {
        self.connections.remove(&id)
    }

    /// Looks up a connection by id.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&C> {
        self.connections.get(&id)
    }

    /// Sends `frame` to `id`'s connection.
    pub fn send(&self, id: ConnectionId, frame: Frame) -> Result<(), ServiceError> {
        self.get(id).ok_or(ServiceError::ConnectionNotFound(id))?.send(frame)
    }

    /// Number of connections currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// `true` if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct RecordingConnection {
        sent: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    impl Connection for RecordingConnection {
        fn send(&self, _frame: Frame) -> Result<(), ServiceError> {
            self.sent.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_then_send_reaches_the_connection() {
        let pool = tpc_buffer::SerialPool::new(8);
        let mut mux = ConnectionMultiplexer::new();
        let sent = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let id = ConnectionId::new(1);
        mux.register(
            id,
            RecordingConnection {
                sent: sent.clone(),
                closed,
            },
        )
        .unwrap();

        mux.send(id, pool.allocate()).unwrap();
        assert!(sent.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut mux = ConnectionMultiplexer::new();
        let id = ConnectionId::new(1);
        mux.register(
            id,
            RecordingConnection {
                sent: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicBool::new(false)),
            },
        )
        .unwrap();
        let err = mux.register(
            id,
            RecordingConnection {
                sent: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicBool::new(false)),
            },
        );
        assert!(matches!(err, Err(ServiceError::DuplicateConnection(_))));
    }

    #[test]
    fn send_to_unknown_id_is_connection_not_found() {
        let pool = tpc_buffer::SerialPool::new(8);
        let mux: ConnectionMultiplexer<RecordingConnection> = ConnectionMultiplexer::new();
        let err = mux.send(ConnectionId::new(99), pool.allocate());
        assert!(matches!(err, Err(ServiceError::ConnectionNotFound(_))));
    }

    #[test]
    fn deregister_removes_and_returns() {
        let mut mux = ConnectionMultiplexer::new();
        let id = ConnectionId::new(1);
        let closed = Arc::new(AtomicBool::new(false));
        mux.register(
            id,
            RecordingConnection {
                sent: Arc::new(AtomicBool::new(false)),
                closed: closed.clone(),
            },
        )
        .unwrap();
        assert_eq!(mux.len(), 1);
        let removed = mux.deregister(id).unwrap();
        removed.close();
        assert!(closed.load(Ordering::SeqCst));
        assert!(mux.is_empty());
    }
}

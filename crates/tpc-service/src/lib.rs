// SPDX-License-Identifier: Apache-2.0

//! Thin request-service layer atop the engine core: the frame call-ID
//! wire invariant, per-loop connection multiplexing, and a router that
//! dispatches requests onto the partitioned engine loop.
//!
//! Concrete transports (TCP, TLS) and application request semantics are
//! out of scope here — this crate only models the interfaces a service
//! built on the engine needs to fill in.

pub mod call_id;
pub mod connection;
pub mod error;
pub mod request;
pub mod router;

pub use call_id::{call_id, set_call_id, OFFSET_REQ_CALL_ID};
pub use connection::{Connection, ConnectionId, ConnectionMultiplexer};
pub use error::ServiceError;
pub use request::{RequestKey, RequestOp};
pub use router::RequestRouter;

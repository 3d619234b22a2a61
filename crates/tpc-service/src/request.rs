// SPDX-License-Identifier: Apache-2.0

//! Application-level request operations. Concrete request types (what a
//! "get" or "put" actually does) belong to whatever service is built on
//! top — only the interface the router dispatches through is modelled
//! here.

use tpc_buffer::Frame;

use crate::call_id::call_id;
use crate::connection::ConnectionId;

/// One unit of application work extracted from an inbound frame. Runs as
/// an engine task on the partition's loop; implementations decide how to
/// interpret the frame body and where to send the response.
pub trait RequestOp: Send + 'static {
    /// Executes the operation. `frame` is the inbound request frame,
    /// still carrying its call-ID header.
    fn execute(self: Box<Self>, frame: Frame);
}

/// Identifies one in-flight request for response correlation: which
/// connection it arrived on, and its wire call ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub connection: ConnectionId,
    pub call_id: u64,
}

impl RequestKey {
    /// Derives a `RequestKey` from the connection a frame arrived on and
    /// the frame's own call-ID header.
    #[must_use]
    pub fn from_frame(connection: ConnectionId, frame: &Frame) -> Self {
        Self {
            connection,
            call_id: call_id(frame),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

//! The frame wire invariant the request layer owns: an 8-byte call ID at
//! a fixed offset, used for in-flight request/response correlation. The
//! engine core never reads or writes this region.

use tpc_buffer::Frame;

/// Byte offset of the call-ID field within every frame. Fixed at the
/// front of the frame so a partial read of the header is enough to
/// correlate a response without waiting on the rest of the payload.
pub const OFFSET_REQ_CALL_ID: usize = 0;

const CALL_ID_LEN: usize = 8;

/// Reads the call ID from `frame`, independent of its read/write cursors.
#[must_use]
pub fn call_id(frame: &Frame) -> u64 {
    let mut buf = [0u8; CALL_ID_LEN];
    frame.read_at(OFFSET_REQ_CALL_ID, &mut buf);
    u64::from_be_bytes(buf)
}

/// Stamps `id` into `frame`'s call-ID region, independent of its
/// read/write cursors.
pub fn set_call_id(frame: &Frame, id: u64) {
    frame.write_at(OFFSET_REQ_CALL_ID, &id.to_be_bytes());
}

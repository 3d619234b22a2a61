// SPDX-License-Identifier: Apache-2.0

//! Bounded queue primitives, plus the one genuinely cross-thread queue in
//! this workspace: the task queue's optional "global"/concurrent queue.

pub mod concurrent;
pub mod error;
pub mod heap;
pub mod ring;

pub use concurrent::{ConcurrentReceiver, ConcurrentSender};
pub use error::{RecvError, SendError};
pub use heap::BoundedPriorityQueue;
pub use ring::RingQueue;

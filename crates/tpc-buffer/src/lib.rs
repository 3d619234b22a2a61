// SPDX-License-Identifier: Apache-2.0

//! Frame / buffer pool.
//!
//! A [`Frame`] is a reference-counted byte buffer: the refcount is the
//! strong count of the `Arc` backing it, so `acquire` is `Frame::clone` and
//! `release` is simply dropping the last handle. When the last handle goes
//! away the backing storage is handed back to the allocator that produced
//! it (or dropped, for the unpooled allocator).
//!
//! Three allocator variants are provided: [`SerialPool`] (intended for
//! single-loop-thread use), [`ParallelPool`] (genuinely cross-thread: built
//! on one thread, freed on another), and [`Unpooled`]. All three share one
//! `parking_lot::Mutex`-guarded free list; the serial/parallel split is a
//! usage-pattern distinction (serial pools are never handed to more than
//! one loop), not a different synchronization primitive — see `DESIGN.md`
//! for why a single `Send + Sync` `Frame` type rules out an unsynchronized
//! fast path without `unsafe` code.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Number of buffers a [`SerialPool`] preallocates the first time it is
/// drained.
pub const SERIAL_PREALLOC_COUNT: usize = 4096;

/// A completion handle associated with a frame (e.g. a response promise).
/// Modelled only as an opaque callback; the engine's deadline scheduler has
/// its own completion type (`tpc_scheduler::Completion`) — this one exists
/// purely so `Frame` can carry "an optional associated completion handle"
/// per the data model without depending on the scheduler crate.
pub type CompletionHandle = Arc<dyn Fn() + Send + Sync>;

/// Allocator back-reference a frame returns itself to on release.
pub trait FramePool: fmt::Debug + Send + Sync {
    /// Returns backing storage to the pool (or drops it).
    fn reclaim(&self, data: BytesMut);
}

struct FrameState {
    data: BytesMut,
    min_size: usize,
    read_cursor: usize,
    write_cursor: usize,
    next: Option<Frame>,
    completion: Option<CompletionHandle>,
}

impl FrameState {
    fn clean(data: BytesMut, min_size: usize) -> Self {
        Self {
            data,
            min_size,
            read_cursor: 0,
            write_cursor: 0,
            next: None,
            completion: None,
        }
    }
}

struct FrameBox {
    state: Mutex<FrameState>,
    allocator: Arc<dyn FramePool>,
}

impl Drop for FrameBox {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.read_cursor = 0;
        state.write_cursor = 0;
        state.next = None;
        state.completion = None;
        let data = std::mem::take(&mut state.data);
        self.allocator.reclaim(data);
    }
}

/// A reference-counted byte buffer obtained from a [`FramePool`].
///
/// Cloning a `Frame` is an "acquire" (refcount increment); dropping the
/// last clone is a "release" that returns the backing storage to the
/// originating pool in a clean state (cursor 0, chain links `None`,
/// completion `None`).
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameBox>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Frame")
            .field("len", &state.data.len())
            .field("read_cursor", &state.read_cursor)
            .field("write_cursor", &state.write_cursor)
            .field("has_next", &state.next.is_some())
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

impl Frame {
    fn new(data: BytesMut, min_size: usize, allocator: Arc<dyn FramePool>) -> Self {
        Self {
            inner: Arc::new(FrameBox {
                state: Mutex::new(FrameState::clean(data, min_size)),
                allocator,
            }),
        }
    }

    /// Number of live handles to this frame.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Backing capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().data.capacity()
    }

    /// Read cursor position.
    #[must_use]
    pub fn read_cursor(&self) -> usize {
        self.inner.state.lock().read_cursor
    }

    /// Write cursor position.
    #[must_use]
    pub fn write_cursor(&self) -> usize {
        self.inner.state.lock().write_cursor
    }

    /// Advances the write cursor by `n` bytes, writing `bytes` into the
    /// backing storage at the current write cursor. Grows the backing
    /// buffer if necessary.
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.inner.state.lock();
        let cursor = state.write_cursor;
        let needed = cursor + bytes.len();
        if state.data.len() < needed {
            state.data.resize(needed, 0);
        }
        state.data[cursor..needed].copy_from_slice(bytes);
        state.write_cursor = needed;
    }

    /// Reads up to `buf.len()` unread bytes into `buf`, advancing the read
    /// cursor, and returns the number of bytes copied.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut state = self.inner.state.lock();
        let available = state.write_cursor.saturating_sub(state.read_cursor);
        let n = available.min(buf.len());
        let start = state.read_cursor;
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        state.read_cursor += n;
        n
    }

    /// Writes `bytes` at a fixed `offset`, independent of the read/write
    /// cursors — for fixed-offset wire fields (e.g. the call-ID region the
    /// request layer reserves at the front of every frame).
    pub fn write_at(&self, offset: usize, bytes: &[u8]) {
        let mut state = self.inner.state.lock();
        let needed = offset + bytes.len();
        if state.data.len() < needed {
            state.data.resize(needed, 0);
        }
        state.data[offset..needed].copy_from_slice(bytes);
    }

    /// Reads `buf.len()` bytes at a fixed `offset`, independent of the
    /// read/write cursors.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) {
        let state = self.inner.state.lock();
        let end = offset + buf.len();
        buf.copy_from_slice(&state.data[offset..end]);
    }

    /// Sets the intrusive `next` chain link, for building frame chains.
    pub fn set_next(&self, next: Option<Frame>) {
        self.inner.state.lock().next = next;
    }

    /// Takes the intrusive `next` chain link.
    pub fn take_next(&self) -> Option<Frame> {
        self.inner.state.lock().next.take()
    }

    /// Attaches a completion handle to this frame.
    pub fn set_completion(&self, completion: CompletionHandle) {
        self.inner.state.lock().completion = Some(completion);
    }

    /// Fires and clears the completion handle, if any.
    pub fn fire_completion(&self) {
        let completion = self.inner.state.lock().completion.take();
        if let Some(completion) = completion {
            completion();
        }
    }

    /// `true` once the frame's state is "clean" — only ever true right
    /// after allocation, since writes immediately dirty the cursors.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        let state = self.inner.state.lock();
        state.read_cursor == 0 && state.write_cursor == 0 && state.next.is_none() && state.completion.is_none()
    }
}

fn ensure_capacity(data: &mut BytesMut, min_size: usize) {
    if data.capacity() < min_size {
        data.reserve(min_size - data.capacity());
    }
}

/// Single-owner frame pool: an O(1) stack intended for use from exactly one
/// loop thread. Grows lazily in blocks of [`SERIAL_PREALLOC_COUNT`] the
/// first time it is drained; the backing array doubles on overflow.
#[derive(Debug)]
pub struct SerialPool {
    free: Mutex<Vec<BytesMut>>,
    min_size: usize,
}

impl SerialPool {
    /// Creates a new serial pool whose frames are at least `min_size`
    /// bytes.
    #[must_use]
    pub fn new(min_size: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            min_size,
        })
    }

    fn refill(free: &mut Vec<BytesMut>, min_size: usize) {
        let grow_by = if free.capacity() == 0 {
            SERIAL_PREALLOC_COUNT
        } else {
            free.capacity()
        };
        free.reserve(grow_by);
        for _ in 0..grow_by {
            free.push(BytesMut::with_capacity(min_size));
        }
    }

    /// Allocates a frame with at least the pool's configured minimum size.
    pub fn allocate(self: &Arc<Self>) -> Frame {
        self.allocate_with_capacity(self.min_size)
    }

    /// Allocates a frame with at least `min_size` bytes of capacity.
    pub fn allocate_with_capacity(self: &Arc<Self>, min_size: usize) -> Frame {
        let mut free = self.free.lock();
        if free.is_empty() {
            Self::refill(&mut free, self.min_size.max(min_size));
        }
        let mut data = free.pop().expect("refilled above");
        ensure_capacity(&mut data, min_size);
        data.clear();
        drop(free);
        Frame::new(data, min_size, self.clone())
    }

    /// Returns a frame to the pool explicitly (equivalent to dropping the
    /// last handle, exposed for symmetry with `allocate`).
    pub fn free(&self, frame: Frame) {
        drop(frame);
    }
}

impl FramePool for SerialPool {
    fn reclaim(&self, data: BytesMut) {
        self.free.lock().push(data);
    }
}

/// Cross-thread-safe frame pool: frames built on one thread may be freed
/// on another. Bounded capacity; frames freed when the pool is full simply
/// drop their backing storage.
#[derive(Debug)]
pub struct ParallelPool {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
    min_size: usize,
}

impl ParallelPool {
    /// Creates a new bounded parallel pool.
    #[must_use]
    pub fn new(min_size: usize, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            min_size,
        })
    }

    /// Allocates a frame with at least the pool's configured minimum size.
    pub fn allocate(self: &Arc<Self>) -> Frame {
        self.allocate_with_capacity(self.min_size)
    }

    /// Allocates a frame with at least `min_size` bytes of capacity.
    pub fn allocate_with_capacity(self: &Arc<Self>, min_size: usize) -> Frame {
        let mut data = {
            let mut free = self.free.lock();
            free.pop()
        }
        .unwrap_or_else(|| BytesMut::with_capacity(min_size));
        ensure_capacity(&mut data, min_size);
        data.clear();
        Frame::new(data, min_size, self.clone())
    }

    /// Explicit free, symmetric with `allocate`.
    pub fn free(&self, frame: Frame) {
        drop(frame);
    }
}

impl FramePool for ParallelPool {
    fn reclaim(&self, data: BytesMut) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(data);
        }
        // else: at capacity, drop the backing storage.
    }
}

/// Allocator variant that constructs on every allocate and discards on
/// every free — no pooling at all.
#[derive(Debug)]
pub struct Unpooled;

impl Unpooled {
    /// Returns a shared handle to the unpooled allocator.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Allocates a frame of exactly `min_size` bytes.
    pub fn allocate_with_capacity(self: &Arc<Self>, min_size: usize) -> Frame {
        Frame::new(BytesMut::with_capacity(min_size), min_size, self.clone())
    }
}

impl FramePool for Unpooled {
    fn reclaim(&self, _data: BytesMut) {
        // Dropped along with the BytesMut.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_free_is_clean() {
        let pool = SerialPool::new(64);
        let frame = pool.allocate();
        frame.write(b"hello");
        assert!(!frame.is_clean());
        drop(frame);

        let frame2 = pool.allocate();
        assert!(frame2.is_clean());
    }

    #[test]
    fn serial_pool_grows_by_doubling() {
        let pool = SerialPool::new(8);
        let mut frames = Vec::new();
        for _ in 0..(SERIAL_PREALLOC_COUNT + 1) {
            frames.push(pool.allocate());
        }
        assert_eq!(frames.len(), SERIAL_PREALLOC_COUNT + 1);
    }

    #[test]
    fn parallel_pool_drops_over_capacity() {
        let pool = ParallelPool::new(8, 1);
        let a = pool.allocate();
        let b = pool.allocate();
        drop(a);
        drop(b);
        // Only one slot is retained; the second reclaim silently drops.
        let mut count = 0;
        while pool.free.lock().pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn parallel_pool_frame_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Frame>();
    }

    #[test]
    fn unpooled_allocate_and_drop() {
        let allocator = Unpooled::new();
        let frame = allocator.allocate_with_capacity(16);
        assert!(frame.capacity() >= 16);
        drop(frame);
    }

    #[test]
    fn refcount_tracks_clones() {
        let pool = SerialPool::new(8);
        let frame = pool.allocate();
        assert_eq!(frame.ref_count(), 1);
        let acquired = frame.clone();
        assert_eq!(frame.ref_count(), 2);
        drop(acquired);
        assert_eq!(frame.ref_count(), 1);
    }

    #[test]
    fn fixed_offset_access_is_independent_of_cursors() {
        let pool = SerialPool::new(16);
        let frame = pool.allocate();
        frame.write_at(0, &42u64.to_be_bytes());
        assert_eq!(frame.read_cursor(), 0);
        assert_eq!(frame.write_cursor(), 0);

        let mut buf = [0u8; 8];
        frame.read_at(0, &mut buf);
        assert_eq!(u64::from_be_bytes(buf), 42);
    }

    #[test]
    fn frame_chain_and_completion() {
        let pool = SerialPool::new(8);
        let head = pool.allocate();
        let tail = pool.allocate();
        head.set_next(Some(tail.clone()));
        let taken = head.take_next().unwrap();
        assert_eq!(taken.capacity(), tail.capacity());
        assert!(head.take_next().is_none());

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        head.set_completion(Arc::new(move || {
            fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        head.fire_completion();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}

//! Recycled pixel buffers
//!
//! The capture callback thread takes buffers and the consumer thread gives
//! them back when a frame is dropped, so the free list is a lock-free
//! `ArrayQueue`.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pool of reusable frame buffers
pub struct FramePool {
    free: ArrayQueue<Vec<u8>>,
    buffer_len: usize,
    allocated: AtomicUsize,
    reused: AtomicUsize,
}

impl FramePool {
    /// Create a pool retaining up to `capacity` idle buffers of `buffer_len` bytes
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            buffer_len,
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Take a buffer, reusing an idle one when available
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let data = match self.free.pop() {
            Some(mut data) => {
                data.clear();
                self.reused.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_len)
            }
        };

        PooledBuffer {
            data,
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, data: Vec<u8>) {
        // Surplus buffers beyond the idle capacity are freed.
        let _ = self.free.push(data);
    }

    /// Idle buffers currently held
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Buffers allocated since creation
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Acquisitions served from the free list
    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }
}

/// Thread-safe handle to a frame pool
pub type SharedFramePool = Arc<FramePool>;

/// Create a new shared frame pool
pub fn create_shared_pool(capacity: usize, buffer_len: usize) -> SharedFramePool {
    Arc::new(FramePool::new(capacity, buffer_len))
}

/// Buffer on loan from a [`FramePool`], returned on drop
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: SharedFramePool,
}

impl PooledBuffer {
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.give_back(data);
    }
}

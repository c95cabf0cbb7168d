//! Reusable relay buffers
//!
//! Every relay direction checks out one fixed-size buffer for its whole
//! lifetime. The buffer goes back to the pool when the [`PooledBuffer`] guard
//! is dropped, so it is returned on every exit path, including task abort.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use lazy_static::lazy_static;

/// Capacity of each relay buffer (32 KiB)
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Idle buffers kept around; anything beyond this is freed on return
const MAX_IDLE_BUFFERS: usize = 1024;

lazy_static! {
    /// Process-wide pool shared by all relay directions
    pub static ref BUFFER_POOL: BufferPool = BufferPool::new(BUFFER_SIZE, MAX_IDLE_BUFFERS);
}

/// Bounded pool of equally sized byte buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Box<[u8]>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_size,
            max_idle,
        }
    }

    /// Take a buffer out of the pool, allocating one if none is idle.
    ///
    /// The returned buffer always spans the full capacity.
    pub fn checkout(&self) -> PooledBuffer<'_> {
        let buf = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice());

        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    /// Number of buffers currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn give_back(&self, buf: Box<[u8]>) {
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]
pub struct PooledBuffer<'a> {
    buf: Option<Box<[u8]>>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

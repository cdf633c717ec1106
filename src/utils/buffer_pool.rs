//! # Buffer Pool
//!
//! Recycles the scratch buffers used to serialize response payloads, so a
//! busy handler does not allocate a fresh `Vec` for every chunk.
//!
//! ## Usage
//! ```rust
//! use reqresp_core::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(4);
//! {
//!     let mut buffer = pool.acquire();
//!     buffer.extend_from_slice(b"payload");
//! } // returned to the pool here, cleared
//! assert_eq!(pool.available(), 4);
//! ```

use std::sync::{Arc, Mutex};

/// Buffers that grew beyond this capacity are freed instead of pooled.
const MAX_POOLED_CAPACITY: usize = 16 * 1024;

/// Capacity of freshly allocated buffers.
const INITIAL_CAPACITY: usize = 1024;

type Shelf = Arc<Mutex<Vec<Vec<u8>>>>;

/// A buffer that goes back to its pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    shelf: Shelf,
    max_idle: usize,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if self.buffer.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        self.buffer.clear();
        if let Ok(mut shelf) = self.shelf.lock() {
            if shelf.len() < self.max_idle {
                shelf.push(std::mem::take(&mut self.buffer));
            }
        }
    }
}

/// Thread-safe pool of serialization buffers, cheap to clone
#[derive(Clone)]
pub struct BufferPool {
    shelf: Shelf,
    max_idle: usize,
}

impl BufferPool {
    /// Create a pool holding up to `max_idle` idle buffers, all preallocated
    pub fn new(max_idle: usize) -> Self {
        let buffers = (0..max_idle)
            .map(|_| Vec::with_capacity(INITIAL_CAPACITY))
            .collect();
        Self {
            shelf: Arc::new(Mutex::new(buffers)),
            max_idle,
        }
    }

    /// Take an empty buffer, allocating when the pool is drained
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .shelf
            .lock()
            .ok()
            .and_then(|mut shelf| shelf.pop())
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY));

        PooledBuffer {
            buffer,
            shelf: self.shelf.clone(),
            max_idle: self.max_idle,
        }
    }

    /// Number of idle buffers
    pub fn available(&self) -> usize {
        self.shelf.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(32)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

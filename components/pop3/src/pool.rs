//! Session buffer free-list (§4.8): a bounded pool of pre-allocated
//! [`Buffer`]s so steady-state traffic doesn't churn the allocator once
//! the working set of concurrent sessions has been reached.
//!
//! The original design keeps the free-list behind the single-threaded
//! reactor's own lock-free discipline; a `tokio::sync::Mutex` gives the
//! same bounded-reuse behavior across worker threads without the
//! session having to know which thread it's running on.

use tokio::sync::Mutex;

use crate::buffer::Buffer;

/// Buffers above this count are simply dropped on release rather than
/// pooled — bounds the pool's worst-case idle memory (§4.8).
pub const MAX_POOLED_BUFFERS: usize = 50;

pub struct BufferPool {
    capacity: usize,
    free: Mutex<Vec<Buffer>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        BufferPool {
            capacity,
            free: Mutex::new(Vec::with_capacity(MAX_POOLED_BUFFERS)),
        }
    }

    /// Takes a buffer from the free-list, or allocates a fresh one if
    /// the list is empty.
    pub async fn acquire(&self) -> Buffer {
        let mut free = self.free.lock().await;
        free.pop().unwrap_or_else(|| Buffer::with_capacity(self.capacity))
    }

    /// Returns a buffer to the pool for reuse. `buf` is reset first so
    /// the next acquirer never observes a previous session's bytes.
    /// Dropped instead of pooled once the free-list is at capacity.
    pub async fn release(&self, mut buf: Buffer) {
        buf.reset();
        let mut free = self.free.lock().await;
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(buf);
        }
    }

    pub async fn pooled_count(&self) -> usize {
        self.free.lock().await.len()
    }
}

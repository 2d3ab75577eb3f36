//! Tiered buffer pool for message bytes. Buffers at or below the small
//! tier are recycled; larger buffers are allocated per-message and dropped
//! on release rather than pooled.

use std::sync::Arc;

use parking_lot::Mutex;

/// Buffers this size or smaller are drawn from, and returned to, the pool.
pub const SMALL_TIER: usize = 64 * 1024;

/// Caps how many idle small buffers the pool holds onto; excess recycled
/// buffers are simply dropped rather than grown without bound.
const MAX_IDLE_BUFFERS: usize = 256;

#[derive(Default)]
struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
}

/// Shared handle to the pool; cheap to clone.
#[derive(Clone, Default)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a buffer of exactly `len` bytes, reusing pooled capacity
    /// when available. Never blocks: on exhaustion it allocates fresh.
    pub fn acquire(&self, bytes: &[u8]) -> PooledBuffer {
        let len = bytes.len();
        let mut data = if len <= SMALL_TIER {
            self.inner.idle.lock().pop().unwrap_or_default()
        } else {
            Vec::new()
        };
        data.clear();
        data.extend_from_slice(bytes);
        PooledBuffer {
            data: Some(data),
            pool: Some(self.inner.clone()),
        }
    }
}

impl PoolInner {
    fn recycle(&self, mut data: Vec<u8>) {
        if data.capacity() > SMALL_TIER {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_BUFFERS {
            data.clear();
            idle.push(data);
        }
    }
}

/// An owned buffer drawn from a [`BufferPool`]. Dropping it, or calling
/// [`release`](Self::release) explicitly, returns the capacity to the pool.
/// Both are idempotent: a buffer whose data has already been taken is a
/// no-op on a second release.
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// Builds a buffer that does not belong to any pool (used by tests and
    /// by oversized, per-message allocations).
    pub fn unpooled(data: Vec<u8>) -> Self {
        Self { data: Some(data), pool: None }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn release(self) {
        // Drop does the work; this just makes the intent explicit at call sites.
        drop(self);
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let (Some(data), Some(pool)) = (self.data.take(), self.pool.take()) {
            pool.recycle(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_buffer_is_recycled() {
        let pool = BufferPool::new();
        {
            let buf = pool.acquire(&[1, 2, 3, 4]);
            assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        }
        assert_eq!(pool.inner.idle.lock().len(), 1);
        let buf2 = pool.acquire(&[9, 9]);
        assert_eq!(buf2.as_slice(), &[9, 9]);
        assert_eq!(pool.inner.idle.lock().len(), 0);
    }

    #[test]
    fn oversized_buffer_is_not_pooled() {
        let pool = BufferPool::new();
        let big = vec![0u8; SMALL_TIER + 1];
        {
            let buf = pool.acquire(&big);
            assert_eq!(buf.as_slice().len(), big.len());
        }
        assert_eq!(pool.inner.idle.lock().len(), 0);
    }

    #[test]
    fn explicit_release_recycles_same_as_drop() {
        let pool = BufferPool::new();
        let buf = pool.acquire(&[1, 2, 3]);
        buf.release();
        assert_eq!(pool.inner.idle.lock().len(), 1);
    }
}

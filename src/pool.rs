//! Size-bucketed buffer pool for request reads and reply builds.
//!
//! Buffers are drawn from lock-free free lists, one per size class, and
//! returned exactly once when the [`PooledBuf`] guard drops. A class whose
//! free list is empty allocates fresh; a class whose free list is full lets
//! the buffer fall to the global allocator instead of growing without bound.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Size classes in bytes. Records larger than the biggest class are
/// rejected earlier by the framing layer.
const CLASSES: [usize; 4] = [4 * 1024, 64 * 1024, 256 * 1024, 1024 * 1024];

/// Buffers retained per size class.
const PER_CLASS: usize = 32;

#[derive(Debug)]
pub struct BufferPool {
    classes: [ArrayQueue<Vec<u8>>; CLASSES.len()],
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            classes: std::array::from_fn(|_| ArrayQueue::new(PER_CLASS)),
        })
    }

    /// Acquires a buffer of at least `len` bytes, zero-extended to `len`.
    pub fn acquire(self: &Arc<Self>, len: usize) -> PooledBuf {
        let class = CLASSES.iter().position(|c| *c >= len);
        let mut data = match class {
            Some(idx) => self.classes[idx].pop().unwrap_or_else(|| Vec::with_capacity(CLASSES[idx])),
            None => Vec::with_capacity(len),
        };
        data.clear();
        data.resize(len, 0);
        PooledBuf { data, class, pool: Arc::clone(self) }
    }
}

/// Exclusive owner of a pooled buffer between acquire and release.
#[derive(Debug)]
pub struct PooledBuf {
    data: Vec<u8>,
    class: Option<usize>,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grows the buffer in place (multi-fragment record assembly). The
    /// buffer still returns to its original size class on release.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(idx) = self.class {
            let data = std::mem::take(&mut self.data);
            // On a full free list the buffer is simply freed.
            let _ = self.pool.classes[idx].push(data);
        }
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_requested_length() {
        let pool = BufferPool::new();
        let buf = pool.acquire(10);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn release_recycles_into_the_class() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire(100);
            buf.as_mut_slice()[0] = 0xAA;
        }
        // Reacquired buffer must be re-zeroed regardless of prior contents.
        let buf = pool.acquire(100);
        assert_eq!(buf.as_slice()[0], 0);
    }

    #[test]
    fn oversized_request_bypasses_classes() {
        let pool = BufferPool::new();
        let buf = pool.acquire(CLASSES[CLASSES.len() - 1] + 1);
        assert_eq!(buf.len(), CLASSES[CLASSES.len() - 1] + 1);
    }
}

//! Size-classed buffer pools for the steady-state no-allocation decode path
//! (§5: "Packet buffers come from pools keyed by size class").

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

// Layer 3: Internal module imports
// (none)

/// Size classes a pooled buffer may belong to, ascending.
const SIZE_CLASSES: [usize; 8] = [64, 256, 1024, 4096, 16_384, 65_536, 262_144, 1_048_576];

/// How many spare buffers each size class retains before further releases
/// are simply dropped instead of recycled.
const SLOTS_PER_CLASS: usize = 64;

struct Class {
    capacity: usize,
    slots: ArrayQueue<BytesMut>,
}

/// A pool of reusable `BytesMut` buffers keyed by size class.
///
/// `acquire(len)` finds the smallest class that fits `len` and either pops
/// a recycled buffer or allocates fresh; `release` (done automatically when
/// a `PooledBuffer` drops) returns it to its class for reuse.
pub struct BufferPool {
    classes: Vec<Class>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        let classes = SIZE_CLASSES
            .iter()
            .map(|&capacity| Class {
                capacity,
                slots: ArrayQueue::new(SLOTS_PER_CLASS),
            })
            .collect();
        Arc::new(Self { classes })
    }

    fn class_index_for(&self, len: usize) -> Option<usize> {
        self.classes.iter().position(|c| c.capacity >= len)
    }

    /// Acquire a buffer with at least `len` bytes of spare capacity.
    pub fn acquire(self: &Arc<Self>, len: usize) -> PooledBuffer {
        match self.class_index_for(len) {
            Some(idx) => {
                let mut buf = self.classes[idx]
                    .slots
                    .pop()
                    .unwrap_or_else(|| BytesMut::with_capacity(self.classes[idx].capacity));
                buf.clear();
                PooledBuffer {
                    buf,
                    class_idx: Some(idx),
                    pool: Arc::clone(self),
                }
            }
            None => PooledBuffer {
                buf: BytesMut::with_capacity(len),
                class_idx: None,
                pool: Arc::clone(self),
            },
        }
    }
}

/// A `BytesMut` on loan from a `BufferPool`; returns to its size class on
/// drop. Derefs to `BytesMut` for ordinary use.
pub struct PooledBuffer {
    buf: BytesMut,
    class_idx: Option<usize>,
    pool: Arc<BufferPool>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(idx) = self.class_idx {
            let buf = std::mem::take(&mut self.buf);
            let _ = self.pool.classes[idx].slots.push(buf);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn acquires_smallest_fitting_class() {
        let pool = BufferPool::new();
        let buf = pool.acquire(100);
        assert!(buf.capacity() >= 100);
    }

    #[test]
    fn oversize_request_falls_back_to_exact_allocation() {
        let pool = BufferPool::new();
        let buf = pool.acquire(2_000_000);
        assert!(buf.capacity() >= 2_000_000);
    }

    #[test]
    fn released_buffer_is_recycled() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire(64);
            buf.extend_from_slice(b"hello");
        }
        let buf2 = pool.acquire(64);
        assert_eq!(buf2.len(), 0, "recycled buffer must be cleared");
    }
}

//! Scratch buffers for block assembly.
//!
//! Appends serialize every block into a heap buffer before the single
//! write syscall. Page-sized buffers are recycled through a bounded pool;
//! anything larger is a one-shot allocation. The pool is owned by the
//! engine so its lifecycle is explicit and tests stay deterministic.

use parking_lot::Mutex;

/// Assumed page size; requests at or below this are pooled.
pub const PAGE_SIZE: usize = 4096;

pub struct BufferPool {
    limit: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// `limit` bounds how many idle buffers are retained.
    pub fn new(limit: usize) -> BufferPool {
        BufferPool {
            limit: limit.max(1),
            free: Mutex::new(Vec::new()),
        }
    }

    /// A zero-filled buffer of exactly `size` bytes.
    pub fn get(&self, size: usize) -> Vec<u8> {
        if size > PAGE_SIZE {
            return vec![0; size];
        }
        let mut buf = match self.free.lock().pop() {
            Some(buf) => buf,
            None => Vec::with_capacity(PAGE_SIZE),
        };
        buf.clear();
        buf.resize(size, 0);
        buf
    }

    /// Return a buffer; oversized ones are dropped, and the pool never
    /// grows past its limit.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.capacity() > PAGE_SIZE {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.limit {
            free.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_recycled() {
        let pool = BufferPool::new(4);
        let buf = pool.get(100);
        assert_eq!(buf.len(), 100);
        let cap = buf.capacity();
        pool.put(buf);

        let again = pool.get(64);
        assert_eq!(again.len(), 64);
        assert_eq!(again.capacity(), cap);
    }

    #[test]
    fn oversized_buffers_bypass_the_pool() {
        let pool = BufferPool::new(4);
        let big = pool.get(PAGE_SIZE + 1);
        assert_eq!(big.len(), PAGE_SIZE + 1);
        pool.put(big);
        assert!(pool.free.lock().is_empty());
    }

    #[test]
    fn pool_is_bounded() {
        let pool = BufferPool::new(2);
        for _ in 0..8 {
            pool.put(Vec::with_capacity(PAGE_SIZE));
        }
        assert_eq!(pool.free.lock().len(), 2);
    }

    #[test]
    fn buffers_come_back_zeroed() {
        let pool = BufferPool::new(1);
        let mut buf = pool.get(16);
        buf.iter_mut().for_each(|b| *b = 0xAA);
        pool.put(buf);
        assert!(pool.get(16).iter().all(|&b| b == 0));
    }
}

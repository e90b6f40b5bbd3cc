//! Fixed-size reusable byte buffers backed by a thread-safe free list.
//!
//! One concrete `Buffer` type rather than a pluggable trait pair: the
//! pool always hands out fixed-capacity regions, so the extra trait
//! indirection would be unearned abstraction here.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::Destination;
use crate::error::{codes, CoreError, ErrorCategory};

/// Default buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// A fixed-capacity byte region leased from a [`BufferPool`]. Tracks a
/// valid `[start, end)` slice into its backing allocation and may carry a
/// UDP destination, making it the unit both TCP bytes and UDP datagrams
/// flow through the pipeline in.
pub struct Buffer {
    pool: Arc<BufferPool>,
    data: Box<[u8]>,
    start: usize,
    end: usize,
    udp: Option<Destination>,
}

impl Buffer {
    fn new(pool: Arc<BufferPool>, data: Box<[u8]>) -> Self {
        Self {
            pool,
            data,
            start: 0,
            end: 0,
            udp: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Reserves `n` writable bytes at the end of the valid slice and
    /// returns them for the caller to fill. Fails if capacity is exceeded.
    pub fn extend(&mut self, n: usize) -> Result<&mut [u8], CoreError> {
        let new_end = self
            .end
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| {
                CoreError::new(
                    codes::BUFFER_EXHAUSTED,
                    ErrorCategory::Internal,
                    format!(
                        "cannot extend buffer by {n} bytes: capacity {} exceeded (end={})",
                        self.data.len(),
                        self.end
                    ),
                )
            })?;
        let slice = &mut self.data[self.end..new_end];
        self.end = new_end;
        Ok(slice)
    }

    /// Reads from `src`, appending up to `self.capacity() - self.len()`
    /// bytes. Returns `0` on EOF rather than an error; EOF yields an
    /// empty `MultiBuffer`, not an error, all the way up the stack.
    pub fn read_from(&mut self, src: &mut impl Read) -> io::Result<usize> {
        let writable = self.data.len() - self.end;
        if writable == 0 {
            return Ok(0);
        }
        let n = src.read(&mut self.data[self.end..])?;
        self.end += n;
        Ok(n)
    }

    pub fn write_to(&self, dst: &mut impl Write) -> io::Result<usize> {
        dst.write(self.as_slice())
    }

    pub fn udp(&self) -> Option<&Destination> {
        self.udp.as_ref()
    }

    pub fn set_udp(&mut self, dest: Destination) {
        self.udp = Some(dest);
    }

    /// A buffer carrying a UDP destination is a datagram; writers must not
    /// coalesce it with neighboring buffers.
    pub fn is_datagram(&self) -> bool {
        self.udp.is_some()
    }

    /// Returns the buffer to its originating pool. Consuming `self` by
    /// value means a second release is a compile error rather than a
    /// runtime one: ownership already rules out double-releasing.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let reclaimed = std::mem::replace(&mut self.data, Box::new([]));
        self.pool.reclaim(reclaimed);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("udp", &self.udp)
            .finish()
    }
}

/// Point-in-time pool occupancy, exposed through the observability facade
/// as `buffer.pool.in_use` / `buffer.pool.capacity` gauges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub free_list_len: usize,
    pub buffer_capacity: usize,
}

/// Process-wide, thread-safe free list of fixed-capacity allocations.
/// Deliberately an explicit instance created once at startup and handed
/// to every component that needs it, rather than implicit global state.
pub struct BufferPool {
    buffer_capacity: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    in_use: AtomicUsize,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_capacity,
            free: Mutex::new(Vec::new()),
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn with_default_capacity() -> Arc<Self> {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// Obtains a buffer from the pool, allocating a new backing region only
    /// if the free list is empty.
    pub fn acquire(self: &Arc<Self>) -> Buffer {
        let data = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_capacity].into_boxed_slice());
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Buffer::new(Arc::clone(self), data)
    }

    fn reclaim(&self, data: Box<[u8]>) {
        if !data.is_empty() {
            self.free.lock().push(data);
        }
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_use: self.in_use.load(Ordering::Acquire),
            free_list_len: self.free.lock().len(),
            buffer_capacity: self.buffer_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_returns_to_free_list() {
        let pool = BufferPool::new(64);
        assert_eq!(pool.stats().in_use, 0);
        let buf = pool.acquire();
        assert_eq!(pool.stats().in_use, 1);
        buf.release();
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.free_list_len, 1);
    }

    #[test]
    fn extend_fails_past_capacity() {
        let pool = BufferPool::new(4);
        let mut buf = pool.acquire();
        assert!(buf.extend(4).is_ok());
        assert!(buf.extend(1).is_err());
    }

    #[test]
    fn zero_length_write_is_noop() {
        let pool = BufferPool::new(16);
        let buf = pool.acquire();
        let mut sink = Vec::new();
        let n = buf.write_to(&mut sink).unwrap();
        assert_eq!(n, 0);
        assert!(sink.is_empty());
    }
}

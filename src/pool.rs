//! Reusable scratch-buffer pool with size-classed idle lists.
//!
//! Queries rent float buffers here instead of allocating on the hot path.
//! Buffers are grouped into power-of-two size classes; each class keeps its
//! own mutex-guarded idle list so rent/return under concurrent queries only
//! contend when they hit the same class. A rented buffer has exactly one
//! owner until it is returned, so no synchronization is needed on the buffer
//! itself.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::error;

/// Capacity of the smallest size class, in floats.
pub const MIN_CLASS_LEN: usize = 64;

/// Most power-of-two size classes a pool can manage.
const MAX_CLASSES: usize = 28;

/// Idle buffers kept per class before returns start being dropped.
const DEFAULT_MAX_IDLE_PER_CLASS: usize = 8;

/// Errors from pool operations.
#[derive(Debug, PartialEq, Eq)]
pub enum PoolError {
    /// No size class can satisfy the request, or the system refused a fresh
    /// allocation while renting. The pool never hands out an undersized
    /// buffer instead.
    PoolExhausted,
    /// A returned buffer's capacity matches no known size class, which means
    /// it was not produced by this pool.
    ForeignBuffer { capacity: usize },
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::PoolExhausted => write!(f, "buffer pool exhausted"),
            PoolError::ForeignBuffer { capacity } => {
                write!(f, "returned buffer capacity {} matches no size class", capacity)
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// A mutable float region with a physical capacity and a logical length.
///
/// Only the first `logical_len` floats are meaningful; the rest is spare
/// capacity left over from the size class rounding.
#[derive(Debug)]
pub struct ScratchBuffer {
    data: Vec<f32>,
    logical_len: usize,
}

impl ScratchBuffer {
    /// Allocate a detached buffer of exactly `capacity` floats. Fails with
    /// `PoolExhausted` instead of aborting when the system is out of memory.
    pub fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| PoolError::PoolExhausted)?;
        data.resize(capacity, 0.0);
        Ok(Self {
            data,
            logical_len: 0,
        })
    }

    /// Physical size of the region.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of floats currently meaningful.
    pub fn logical_len(&self) -> usize {
        self.logical_len
    }

    /// Mark the first `len` floats as meaningful.
    ///
    /// # Panics
    /// Panics if `len` exceeds the physical capacity.
    pub fn set_logical_len(&mut self, len: usize) {
        assert!(
            len <= self.data.len(),
            "logical length {} exceeds capacity {}",
            len,
            self.data.len()
        );
        self.logical_len = len;
    }

    /// The meaningful prefix of the region.
    pub fn filled(&self) -> &[f32] {
        &self.data[..self.logical_len]
    }

    /// The whole region, for writers that fill it before calling
    /// [`set_logical_len`](Self::set_logical_len).
    pub fn space(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Snapshot of pool effectiveness counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    /// Rents satisfied from an idle list.
    pub hits: u64,
    /// Rents that had to allocate.
    pub misses: u64,
    /// Buffers allocated over the pool's lifetime.
    pub created: u64,
    /// Returns dropped because the class's idle list was full.
    pub evictions: u64,
    /// Buffers currently rented out.
    pub outstanding: usize,
    /// Buffers currently idle across all classes.
    pub idle: usize,
}

/// Size-classed pool of reusable [`ScratchBuffer`]s.
#[derive(Debug)]
pub struct BufferPool {
    classes: Vec<Mutex<Vec<ScratchBuffer>>>,
    max_idle_per_class: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    created: AtomicU64,
    evictions: AtomicU64,
    outstanding: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE_PER_CLASS)
    }

    /// Pool that keeps at most `max_idle_per_class` idle buffers per class.
    pub fn with_max_idle(max_idle_per_class: usize) -> Self {
        Self::with_limits(max_idle_per_class, MAX_CLASSES)
    }

    /// Pool restricted to the first `num_classes` size classes, so the
    /// largest rentable buffer is `MIN_CLASS_LEN << (num_classes - 1)`
    /// floats. Requests beyond that fail with `PoolExhausted`.
    ///
    /// # Panics
    /// Panics if `num_classes` is zero or above the supported maximum.
    pub fn with_limits(max_idle_per_class: usize, num_classes: usize) -> Self {
        assert!(
            (1..=MAX_CLASSES).contains(&num_classes),
            "num_classes {} outside 1..={}",
            num_classes,
            MAX_CLASSES
        );
        let mut classes = Vec::with_capacity(num_classes);
        for _ in 0..num_classes {
            classes.push(Mutex::new(Vec::new()));
        }
        Self {
            classes,
            max_idle_per_class,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            created: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn class_capacity(class: usize) -> usize {
        MIN_CLASS_LEN << class
    }

    /// Smallest class whose capacity covers `min_len`, if any.
    fn class_for(&self, min_len: usize) -> Option<usize> {
        (0..self.classes.len()).find(|&class| Self::class_capacity(class) >= min_len)
    }

    /// Rent a buffer with `capacity >= min_len`. Never blocks beyond the
    /// class lock; the buffer is returned automatically when the guard drops.
    pub fn rent(&self, min_len: usize) -> Result<ScratchGuard<'_>, PoolError> {
        let class = self.class_for(min_len).ok_or(PoolError::PoolExhausted)?;

        let reused = {
            let mut idle = self.classes[class].lock();
            idle.pop()
        };

        let buf = match reused {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let buf = ScratchBuffer::with_capacity(Self::class_capacity(class))?;
                self.created.fetch_add(1, Ordering::Relaxed);
                buf
            }
        };

        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(ScratchGuard {
            pool: self,
            buf: Some(buf),
        })
    }

    /// Return a buffer to its size class's idle list.
    ///
    /// Buffers whose capacity matches no class were fabricated outside the
    /// pool; returning one is a logic error and is reported, not absorbed.
    pub fn give_back(&self, mut buf: ScratchBuffer) -> Result<(), PoolError> {
        let capacity = buf.capacity();
        let class = match self.class_for(capacity) {
            Some(class) if Self::class_capacity(class) == capacity => class,
            _ => return Err(PoolError::ForeignBuffer { capacity }),
        };

        buf.set_logical_len(0);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);

        let mut idle = self.classes[class].lock();
        if idle.len() < self.max_idle_per_class {
            idle.push(buf);
        } else {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.classes.iter().map(|c| c.lock().len()).sum();
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            idle,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of a rented buffer.
///
/// The buffer goes back to the pool when the guard drops, on every exit path
/// including panics, so a failed gather or kernel can never leak it.
#[derive(Debug)]
pub struct ScratchGuard<'a> {
    pool: &'a BufferPool,
    buf: Option<ScratchBuffer>,
}

impl ScratchGuard<'_> {
    /// Return the buffer eagerly, surfacing any pool error. Dropping the
    /// guard does the same but can only log.
    pub fn give_back(mut self) -> Result<(), PoolError> {
        match self.buf.take() {
            Some(buf) => self.pool.give_back(buf),
            None => Ok(()),
        }
    }
}

impl std::ops::Deref for ScratchGuard<'_> {
    type Target = ScratchBuffer;

    fn deref(&self) -> &ScratchBuffer {
        self.buf.as_ref().expect("buffer present until guard drops")
    }
}

impl std::ops::DerefMut for ScratchGuard<'_> {
    fn deref_mut(&mut self) -> &mut ScratchBuffer {
        self.buf.as_mut().expect("buffer present until guard drops")
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if let Err(e) = self.pool.give_back(buf) {
                error!(error = %e, "dropping scratch buffer the pool refused");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_rounds_up_to_a_size_class() {
        let pool = BufferPool::new();
        let guard = pool.rent(100).unwrap();
        assert_eq!(guard.capacity(), 128);
        assert_eq!(guard.logical_len(), 0);
    }

    #[test]
    fn returned_buffer_is_reused() {
        let pool = BufferPool::new();
        {
            let _guard = pool.rent(64).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.idle, 1);

        let _guard = pool.rent(64).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.outstanding, 1);
    }

    #[test]
    fn return_resets_logical_len() {
        let pool = BufferPool::new();
        {
            let mut guard = pool.rent(64).unwrap();
            guard.set_logical_len(10);
        }
        let guard = pool.rent(64).unwrap();
        assert_eq!(guard.logical_len(), 0);
    }

    #[test]
    fn foreign_buffer_return_is_signaled() {
        let pool = BufferPool::new();
        let foreign = ScratchBuffer::with_capacity(100).unwrap();
        assert_eq!(
            pool.give_back(foreign),
            Err(PoolError::ForeignBuffer { capacity: 100 })
        );
    }

    #[test]
    fn idle_list_is_capped() {
        let pool = BufferPool::with_max_idle(2);
        let a = pool.rent(64).unwrap();
        let b = pool.rent(64).unwrap();
        let c = pool.rent(64).unwrap();
        a.give_back().unwrap();
        b.give_back().unwrap();
        c.give_back().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn request_beyond_every_class_is_pool_exhausted() {
        let pool = BufferPool::new();
        let err = pool.rent(usize::MAX).unwrap_err();
        assert_eq!(err, PoolError::PoolExhausted);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn class_limit_caps_the_largest_rentable_buffer() {
        let pool = BufferPool::with_limits(8, 1);
        assert_eq!(pool.rent(64).unwrap().capacity(), 64);
        assert_eq!(pool.rent(65).unwrap_err(), PoolError::PoolExhausted);
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn logical_len_cannot_exceed_capacity() {
        let mut buf = ScratchBuffer::with_capacity(8).unwrap();
        buf.set_logical_len(9);
    }
}

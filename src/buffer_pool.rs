//! Fixed-count pre-allocated byte buffers with utilization/peak/hit/miss counters (C1).
//!
//! Acquire scans an availability bitmap under a single mutex; release marks a buffer
//! free again. Cleanup is idempotent and deliberately does not destroy the mutex, so a
//! pool can be reinitialized in place — see the Open Question decision in DESIGN.md
//! about whether statistics survive a reinit (they don't).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::logging::Throttle;

pub const DEFAULT_BUFFER_COUNT: usize = 50;
pub const DEFAULT_BUFFER_SIZE: usize = 32768;

const UTILIZATION_WARNING_PERCENT: u32 = 80;

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub current_used: usize,
    pub utilization_percent: u32,
    pub peak: usize,
    pub total_requests: u64,
}

struct Inner {
    buffers: Vec<Arc<Mutex<Vec<u8>>>>,
    free: Vec<bool>,
    hits: u64,
    misses: u64,
    peak: usize,
    initialized: bool,
}

/// A handle to a buffer checked out of the pool. Carries its own clone of the slot's
/// `Arc<Mutex<Vec<u8>>>` so [`BufferPool::buffer_mut`] can hand back a guard that writes
/// through to the pool's storage without holding the pool-wide lock for the duration of
/// the read. Dropping it without calling [`BufferPool::release`] is fine; the pool simply
/// never reclaims the slot until an explicit release (matching the spec's "one acquire,
/// one matching release" contract, which is enforced by callers, not by `Drop`, to mirror
/// the C original's manual lifecycle).
pub struct PooledBuffer {
    pub index: usize,
    slot: Arc<Mutex<Vec<u8>>>,
}

pub struct BufferPool {
    inner: std::sync::Mutex<Inner>,
    buffer_size: usize,
    capacity: usize,
    warn_throttle: Throttle,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        BufferPool {
            inner: std::sync::Mutex::new(Inner {
                buffers: (0..capacity).map(|_| Arc::new(Mutex::new(vec![0u8; buffer_size]))).collect(),
                free: vec![true; capacity],
                hits: 0,
                misses: 0,
                peak: 0,
                initialized: true,
            }),
            buffer_size,
            capacity,
            warn_throttle: Throttle::new(Duration::from_secs(30)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE)
    }

    /// Re-init of an already-initialized pool is a no-op that returns success.
    pub fn init(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.initialized {
            return;
        }
        inner.buffers = (0..self.capacity).map(|_| Arc::new(Mutex::new(vec![0u8; self.buffer_size]))).collect();
        inner.free = vec![true; self.capacity];
        inner.initialized = true;
    }

    /// Frees buffers and marks the pool uninitialized but preserves the mutex so
    /// `init` can follow. Counters reset to zero (Open Question decision, see
    /// DESIGN.md): a reinitialized pool does not preserve prior statistics.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffers.clear();
        inner.free.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.peak = 0;
        inner.initialized = false;
    }

    pub fn acquire(&self) -> Option<PooledBuffer> {
        let mut inner = self.inner.lock().unwrap();
        let found = inner.free.iter().position(|&free| free);
        match found {
            Some(index) => {
                inner.free[index] = false;
                inner.hits += 1;
                let used = inner.free.iter().filter(|&&f| !f).count();
                if used > inner.peak {
                    inner.peak = used;
                }
                self.maybe_warn(used, inner.free.len());
                Some(PooledBuffer { index, slot: Arc::clone(&inner.buffers[index]) })
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn release(&self, buffer: PooledBuffer) {
        let mut inner = self.inner.lock().unwrap();
        if buffer.index < inner.free.len() {
            inner.free[buffer.index] = true;
        }
        // A release for an index outside the current pool (e.g. after cleanup) is a
        // no-op debug event, not an error.
    }

    /// Locks the pooled slot and hands back a guard that writes straight through to
    /// `inner.buffers[buffer.index]`, so reads into it are visible to the next acquirer
    /// of the same slot. Locks only the slot's own mutex, not the pool-wide one.
    pub fn buffer_mut<'a>(&self, buffer: &'a PooledBuffer) -> MutexGuard<'a, Vec<u8>> {
        buffer.slot.lock().unwrap()
    }

    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock().unwrap();
        let used = inner.free.iter().filter(|&&f| !f).count();
        let total = inner.free.len().max(1);
        BufferPoolStats {
            hits: inner.hits,
            misses: inner.misses,
            current_used: used,
            utilization_percent: (used as u32 * 100) / total as u32,
            peak: inner.peak,
            total_requests: inner.hits + inner.misses,
        }
    }

    fn maybe_warn(&self, used: usize, total: usize) {
        if total == 0 {
            return;
        }
        let utilization = (used as u32 * 100) / total as u32;
        if utilization >= UTILIZATION_WARNING_PERCENT && self.warn_throttle.should_fire() {
            tracing::warn!(utilization, "buffer pool utilization crossed warning threshold");
        }
    }
}

//! Thread-aware pool of reusable matrix buffers.
//!
//! Caching is switched on per thread. A thread with caching enabled gets a
//! pooled buffer of the requested shape whenever one is free, a buffer being
//! free when the pool holds its only handle. Newly allocated buffers join the
//! pool. The pool is trimmed when it exceeds the memory budget and less than
//! half of it is in use.
//!
//! # Example
//!
//! ```rust,ignore
//! use mser::{Depth, DepthChannel, MatCache};
//!
//! let cache = MatCache::new();
//! let _scope = cache.scoped_enable();
//! let a = cache.get(&[480, 640], DepthChannel::new(Depth::F32, 1));
//! drop(a);
//! // Reuses the buffer of `a`.
//! let b = cache.get(&[480, 640], DepthChannel::new(Depth::F32, 1));
//! ```

use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{DepthChannel, Mat};

/// Default memory budget of the pool in bytes (1 GiB).
pub const DEFAULT_BUDGET: usize = 1 << 30;

/// Counters and memory usage of a [`MatCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Number of `get` calls, cached or not.
    pub get_count: u64,
    /// Number of `get` calls served from the pool.
    pub hit_count: u64,
    /// Number of pooled buffers.
    pub entries: usize,
    /// Bytes held by all pooled buffers.
    pub cached_bytes: usize,
    /// Bytes of pooled buffers also held outside the pool.
    pub used_bytes: usize,
}

#[derive(Debug)]
struct CacheState {
    pool: Vec<Mat>,
    /// Caching flag of every thread that ever set one.
    threads: HashMap<ThreadId, bool>,
    budget: usize,
    get_count: u64,
    hit_count: u64,
}

impl CacheState {
    fn memory(&self) -> (usize, usize) {
        self.pool.iter().fold((0, 0), |(total, used), mat| {
            let bytes = mat.element_size() * mat.element_number();
            let used = if mat.reference_count() > 1 { used + bytes } else { used };
            (total + bytes, used)
        })
    }

    /// Drop free buffers in pool order while the pool is over budget and less
    /// than half of it is in use.
    fn reclaim(&mut self) {
        let (mut total, used) = self.memory();
        if total <= self.budget || total <= used * 2 {
            return;
        }

        tracing::info!(
            "Releasing matrix cache memory: total={} bytes, used={} bytes, budget={} bytes",
            total,
            used,
            self.budget
        );

        let retain = used * 2;
        let mut i = 0;
        while i < self.pool.len() {
            let mat = &self.pool[i];
            if mat.reference_count() > 1 {
                i += 1;
                continue;
            }
            total -= mat.element_size() * mat.element_number();
            self.pool.remove(i);
            if total <= retain {
                break;
            }
        }

        tracing::info!(
            "Matrix cache memory after release: total={} bytes, {} entries",
            total,
            self.pool.len()
        );
    }
}

/// Pool of reusable [`Mat`] buffers shared by all threads.
///
/// Every operation runs under one lock.
#[derive(Debug)]
pub struct MatCache {
    state: Mutex<CacheState>,
}

impl Default for MatCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MatCache {
    /// Create an empty cache with [`DEFAULT_BUDGET`].
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_BUDGET)
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                pool: Vec::new(),
                threads: HashMap::new(),
                budget,
                get_count: 0,
                hit_count: 0,
            }),
        }
    }

    /// Switch caching on or off for the calling thread.
    pub fn enable(&self, enable: bool) {
        let mut state = self.state.lock();
        if state.threads.insert(thread::current().id(), enable).is_some() {
            state.reclaim();
        }
    }

    /// Whether caching is on for the calling thread.
    pub fn is_enabled(&self) -> bool {
        let state = self.state.lock();
        state
            .threads
            .get(&thread::current().id())
            .copied()
            .unwrap_or(false)
    }

    /// Enable caching for the calling thread until the returned guard drops.
    ///
    /// The previous state, including never having set one, is restored on
    /// drop, also during unwinding.
    pub fn scoped_enable(&self) -> CacheScope<'_> {
        let previous = {
            let mut state = self.state.lock();
            state.threads.insert(thread::current().id(), true)
        };
        CacheScope {
            cache: self,
            previous,
            _not_send: PhantomData,
        }
    }

    fn restore(&self, previous: Option<bool>) {
        let mut state = self.state.lock();
        let id = thread::current().id();
        match previous {
            Some(enable) => {
                state.threads.insert(id, enable);
            }
            None => {
                state.threads.remove(&id);
            }
        }
        state.reclaim();
    }

    /// Matrix of the given shape and type.
    ///
    /// With caching enabled for the calling thread, a free pooled buffer of
    /// the same shape and type is returned when available; its contents are
    /// left as they were. Otherwise a zeroed buffer is allocated, and pooled
    /// when caching is enabled.
    pub fn get(&self, sizes: &[usize], depth_channel: DepthChannel) -> Mat {
        assert!(!sizes.is_empty(), "matrix needs at least one dimension");

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.get_count += 1;

        let enabled = state
            .threads
            .get(&thread::current().id())
            .copied()
            .unwrap_or(false);
        if !enabled {
            return Mat::new(sizes, depth_channel);
        }

        let free = state.pool.iter_mut().find(|mat| {
            mat.reference_count() == 1
                && mat.depth_channel() == depth_channel
                && mat.sizes() == sizes
        });
        if let Some(mat) = free {
            mat.detach();
            state.hit_count += 1;
            return mat.clone();
        }

        let mat = Mat::new(sizes, depth_channel);
        state.pool.push(mat.clone());
        state.reclaim();
        mat
    }

    /// Matrix of the same shape and type as `like`.
    pub fn get_like(&self, like: &Mat) -> Mat {
        self.get(like.sizes(), like.depth_channel())
    }

    /// Change the memory budget and trim the pool to it.
    pub fn set_budget(&self, budget: usize) {
        let mut state = self.state.lock();
        state.budget = budget;
        state.reclaim();
    }

    pub fn budget(&self) -> usize {
        self.state.lock().budget
    }

    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock();
        let (cached_bytes, used_bytes) = state.memory();
        CacheStatistics {
            get_count: state.get_count,
            hit_count: state.hit_count,
            entries: state.pool.len(),
            cached_bytes,
            used_bytes,
        }
    }

    /// Log the current statistics.
    pub fn report_statistics(&self) {
        let stats = self.statistics();
        tracing::info!(
            "Matrix cache: gets={}, hits={}, entries={}, cached={} bytes, used={} bytes",
            stats.get_count,
            stats.hit_count,
            stats.entries,
            stats.cached_bytes,
            stats.used_bytes
        );
    }
}

/// Guard returned by [`MatCache::scoped_enable`].
///
/// Bound to the thread that created it.
#[must_use = "caching is disabled again as soon as the scope is dropped"]
pub struct CacheScope<'a> {
    cache: &'a MatCache,
    previous: Option<bool>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CacheScope<'_> {
    fn drop(&mut self) {
        self.cache.restore(self.previous);
    }
}

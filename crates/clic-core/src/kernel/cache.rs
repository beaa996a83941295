//! Thread-safe compiled program caching.
//!
//! Programs are keyed by device, kernel name and variant. A hit is reused as
//! is; a failed compilation is never stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::device::DeviceId;
use crate::error::ClicResult;
use crate::shape::Dimensionality;

/// Part of the cache key that changes the generated preamble.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ProgramVariant {
    pub dim: Dimensionality,
    /// Per-parameter `name:kind` signature, e.g. `src:f32:image,scalar:f32`.
    pub signature: String,
}

/// Cache key for program lookup.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ProgramKey {
    pub device: DeviceId,
    pub kernel: String,
    pub variant: ProgramVariant,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Compiled program cache of one device.
#[derive(Debug)]
pub(crate) struct ProgramCache<P> {
    programs: RwLock<HashMap<ProgramKey, Arc<P>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self {
            programs: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached program for `key`, compiling it with `compile` on a miss.
    ///
    /// The write lock is held while compiling so one key never compiles twice.
    pub fn get_or_try_insert_with(
        &self,
        key: &ProgramKey,
        compile: impl FnOnce() -> ClicResult<P>,
    ) -> ClicResult<Arc<P>> {
        // Try read lock first (fast path)
        {
            let programs = self.programs.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(program) = programs.get(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(program));
            }
        }

        let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(program) = programs.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(program));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(kernel = %key.kernel, dim = %key.variant.dim, device = %key.device, "compiling program");
        let program = Arc::new(compile()?);
        programs.insert(key.clone(), Arc::clone(&program));
        Ok(program)
    }

    pub fn contains(&self, key: &ProgramKey) -> bool {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.programs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops every cached program; statistics are kept.
    pub fn clear(&self) {
        self.programs.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

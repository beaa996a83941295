//! Kernel descriptors consumed by [`execute`](crate::execute).
//!
//! A kernel is opaque source text plus an entry symbol. Sources can be given
//! once for every backend or split per backend and per dimensionality:
//!
//! ```ignore
//! let kernel = KernelInfo::new("add_image_and_scalar")
//!     .with_source(BackendKind::Wgpu, WGSL_SOURCE)
//!     .with_source(BackendKind::Cuda, CUDA_SOURCE)
//!     .with_variant(BackendKind::Wgpu, Dimensionality::Three, WGSL_SOURCE_3D);
//! ```

mod cache;
mod params;
mod preamble;
mod signature;

pub use cache::{CacheStats, ProgramKey, ProgramVariant};
pub use params::{ParameterList, ParameterValue, RangeArray};
pub use preamble::{DispatchInfo, MAX_ARRAYS};
pub use signature::{Formal, FormalKind, ImageAccess, Signature};

pub(crate) use cache::ProgramCache;
pub(crate) use preamble::{assemble, generate};
pub(crate) use signature::{ArgDesc, ArgKind, BindPlan, SlotPlan};

use std::sync::Arc;

use crate::backend::BackendKind;
use crate::error::{ClicError, ClicResult};
use crate::shape::Dimensionality;

#[derive(Debug, Clone)]
struct KernelSource {
    backend: Option<BackendKind>,
    dim: Option<Dimensionality>,
    text: Arc<str>,
}

/// Kernel name (entry symbol) and its source variants. Immutable once built.
#[derive(Debug, Clone)]
pub struct KernelInfo {
    name: String,
    sources: Vec<KernelSource>,
}

impl KernelInfo {
    /// Kernel without sources; add them with the `with_*` builders.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sources: Vec::new() }
    }

    /// Kernel with one source used for every backend and dimensionality.
    pub fn from_source(name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        Self::new(name).with_generic(source)
    }

    pub fn with_generic(self, source: impl Into<Arc<str>>) -> Self {
        self.with(None, None, source)
    }

    /// Source for every dimensionality on `backend`.
    pub fn with_source(self, backend: BackendKind, source: impl Into<Arc<str>>) -> Self {
        self.with(Some(backend), None, source)
    }

    /// Source specialized for one dimensionality on `backend`.
    pub fn with_variant(self, backend: BackendKind, dim: Dimensionality, source: impl Into<Arc<str>>) -> Self {
        self.with(Some(backend), Some(dim), source)
    }

    fn with(mut self, backend: Option<BackendKind>, dim: Option<Dimensionality>, source: impl Into<Arc<str>>) -> Self {
        // A later source for the same slot replaces the earlier one
        self.sources.retain(|s| !(s.backend == backend && s.dim == dim));
        self.sources.push(KernelSource { backend, dim, text: source.into() });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source for `backend` and `dim`.
    ///
    /// Lookup order on the backend's own sources, then on generic ones:
    /// exact dimensionality, the nearest higher dimensionality, no
    /// dimensionality.
    pub fn resolve(&self, backend: BackendKind, dim: Dimensionality) -> ClicResult<&str> {
        let rank = |source: &KernelSource| -> Option<(u8, u8)> {
            let scope = match source.backend {
                Some(b) if b == backend => 0,
                Some(_) => return None,
                None => 1,
            };
            let fit = match source.dim {
                Some(d) if d == dim => 0,
                Some(d) if d > dim => d.get() as u8 - dim.get() as u8,
                Some(_) => return None,
                None => 4,
            };
            Some((scope, fit))
        };

        self.sources
            .iter()
            .filter_map(|source| rank(source).map(|r| (r, source)))
            .min_by_key(|(r, _)| *r)
            .map(|(_, source)| &*source.text)
            .ok_or_else(|| {
                ClicError::compile(&self.name, format!("no {backend} source for a {dim} dispatch"))
            })
    }
}

//! Process-wide backend selection.

use std::sync::{OnceLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::detect::{first_compiled, select_best_backend};
use super::{Backend, BackendKind};
use crate::config::ENV_BACKEND;
use crate::error::{ClicError, ClicResult};

static INSTANCE: OnceLock<BackendManager> = OnceLock::new();

#[derive(Debug, Clone, Copy)]
struct ManagerState {
    kind: BackendKind,
    generation: u64,
}

/// Holds the single active backend of the process.
///
/// Every switch to a different backend bumps a generation counter. Backends,
/// devices and arrays remember the generation they were created under and
/// fail with [`ClicError::StaleHandle`] once it is no longer current.
#[derive(Debug)]
pub struct BackendManager {
    state: RwLock<ManagerState>,
}

impl BackendManager {
    /// The process-wide manager, created on first use.
    ///
    /// The initial backend comes from `CLIC_BACKEND` when it names a compiled
    /// backend, otherwise from [`select_best_backend`].
    pub fn instance() -> &'static BackendManager {
        INSTANCE.get_or_init(|| {
            let kind = initial_backend();
            info!(backend = %kind, "Backend manager initialized");
            BackendManager::new(kind)
        })
    }

    pub(crate) fn new(kind: BackendKind) -> Self {
        Self {
            state: RwLock::new(ManagerState { kind, generation: 0 }),
        }
    }

    fn state(&self) -> ManagerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Selects the active backend by name.
    ///
    /// Selecting the active backend again is a no-op and keeps existing
    /// handles valid; any other switch invalidates them.
    pub fn set_backend(&'static self, name: &str) -> ClicResult<Backend> {
        let kind: BackendKind = name.parse()?;
        if !kind.is_compiled() {
            return Err(ClicError::UnsupportedBackend(name.to_string()));
        }
        let generation = self.switch(kind);
        Ok(Backend::new(kind, generation, self))
    }

    pub(crate) fn switch(&self, kind: BackendKind) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.kind != kind {
            state.kind = kind;
            state.generation += 1;
            debug!(backend = %kind, generation = state.generation, "Backend switched");
        }
        state.generation
    }

    /// Capability object for the active backend.
    pub fn backend(&'static self) -> Backend {
        let state = self.state();
        Backend::new(state.kind, state.generation, self)
    }

    pub fn active(&self) -> BackendKind {
        self.state().kind
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Compiled-in backend names.
    pub fn available_backends(&self) -> Vec<&'static str> {
        BackendKind::compiled().into_iter().map(|kind| kind.name()).collect()
    }

    pub(crate) fn is_current(&self, kind: BackendKind, generation: u64) -> bool {
        let state = self.state();
        state.kind == kind && state.generation == generation
    }

    pub(crate) fn ensure_current(&self, kind: BackendKind, generation: u64) -> ClicResult<()> {
        let state = self.state();
        if state.kind == kind && state.generation == generation {
            Ok(())
        } else {
            Err(ClicError::StaleHandle {
                backend: kind,
                created: generation,
                current: state.generation,
            })
        }
    }
}

fn initial_backend() -> BackendKind {
    if let Ok(name) = std::env::var(ENV_BACKEND) {
        match name.parse::<BackendKind>() {
            Ok(kind) if kind.is_compiled() => return kind,
            _ => warn!(value = %name, "Ignoring {ENV_BACKEND}: not a compiled backend"),
        }
    }
    match BackendKind::compiled().as_slice() {
        [only] => *only,
        [] => first_compiled(),
        _ => select_best_backend(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(kind: BackendKind) -> &'static BackendManager {
        Box::leak(Box::new(BackendManager::new(kind)))
    }

    #[test]
    fn test_instance_is_singleton() {
        let a = BackendManager::instance();
        let b = BackendManager::instance();
        assert!(std::ptr::eq(a, b));
        assert!(a.active().is_compiled());
    }

    #[test]
    fn test_reselect_keeps_generation() {
        let manager = local(first_compiled());
        let before = manager.backend();
        let again = manager.set_backend(first_compiled().name()).unwrap();
        assert_eq!(before, again);
        assert!(manager.is_current(before.kind(), before.generation()));
    }

    #[test]
    fn test_unknown_backend() {
        let manager = local(first_compiled());
        assert_eq!(
            manager.set_backend("metal").unwrap_err(),
            ClicError::UnsupportedBackend("metal".into())
        );
        assert_eq!(manager.generation(), 0);
    }

    #[test]
    fn test_switch_invalidates_backend() {
        let manager = local(BackendKind::Wgpu);
        let backend = manager.backend();
        manager.switch(BackendKind::Cuda);
        assert_eq!(manager.generation(), 1);

        let err = backend.devices(crate::device::DeviceType::All).unwrap_err();
        assert_eq!(
            err,
            ClicError::StaleHandle { backend: BackendKind::Wgpu, created: 0, current: 1 }
        );
        assert!(err.invalidates_device());

        // Switching back does not revive old handles
        manager.switch(BackendKind::Wgpu);
        assert_eq!(manager.generation(), 2);
        assert!(!manager.is_current(BackendKind::Wgpu, 0));
    }

    #[test]
    fn test_available_names() {
        let names = local(first_compiled()).available_backends();
        assert_eq!(names.contains(&"wgpu"), cfg!(feature = "wgpu"));
        assert_eq!(names.contains(&"cuda"), cfg!(feature = "cuda"));
    }
}

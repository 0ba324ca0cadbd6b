use crate::tree::TreeError;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Controls whether tree mutators may run.
///
/// Cloning the gate aliases the same flag, so one handle can be shared by
/// every tree a processor owns. The gate is a per-processor value passed
/// through context rather than a process-wide global; two processors never
/// fight over each other's gates.
#[derive(Clone, Debug, Default)]
pub struct MutationGate {
    open: Arc<AtomicBool>,
}

impl MutationGate {
    /// A fresh gate, closed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fails with [`TreeError::GateClosed`] unless the gate is open.
    pub fn ensure_open(&self) -> Result<(), TreeError> {
        if self.is_open() { Ok(()) } else { Err(TreeError::GateClosed) }
    }

    /// Opens the gate until the returned scope is dropped, then restores the
    /// state the gate had on entry. Restoration also runs during unwinds.
    pub fn open_scope(&self) -> OpenScope {
        let was_open = self.open.swap(true, Ordering::AcqRel);
        OpenScope { open: self.open.clone(), was_open }
    }
}

/// Keeps a [`MutationGate`] open for the duration of a scope.
#[must_use = "the gate closes again as soon as the scope is dropped"]
pub struct OpenScope {
    open: Arc<AtomicBool>,
    was_open: bool,
}

impl Drop for OpenScope {
    fn drop(&mut self) {
        self.open.store(self.was_open, Ordering::Release);
    }
}

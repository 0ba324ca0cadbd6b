//! Lazy per-class loading and the weak/strong tree cache.

use crate::oracle::ClassInfo;
use classtree::{MutationGate, Tree};
use parking_lot::Mutex;
use std::{
    fs::File,
    io::Read as _,
    path::PathBuf,
    sync::{Arc, Weak},
};
use tracing::trace;

/// The bytecode reader contract. Implementations parse raw classfiles into
/// tree form; the processor opens the mutation gate around `parse` so the
/// reader can fill children.
pub trait Frontend: Send + Sync + 'static {
    /// Parses a full classfile into a tree bound to `gate`.
    fn parse(&self, name: &str, bytes: &[u8], gate: &MutationGate) -> crate::Result<Tree>;

    /// Parses only the class header: superclass and the interface bit.
    fn read_header(&self, bytes: &[u8]) -> crate::Result<ClassInfo>;
}

/// The host supplying bytecode for types the processor was never given,
/// consulted by subtype queries.
pub trait Platform: Send + Sync + 'static {
    fn class_bytecode(&self, internal_name: &str) -> crate::Result<Vec<u8>>;
}

/// Reproduces the original bytecode stream of one class on demand.
pub(crate) enum BytecodeSource {
    InMemory(Arc<Vec<u8>>),
    /// Re-opens the archive every time, so a jar deleted mid-run surfaces
    /// as an I/O error rather than stale bytes.
    JarEntry { archive: PathBuf, name: String },
}

impl BytecodeSource {
    pub(crate) fn load(&self) -> crate::Result<Vec<u8>> {
        match self {
            BytecodeSource::InMemory(bytes) => Ok(bytes.as_ref().clone()),
            BytecodeSource::JarEntry { archive, name } => {
                let file = File::open(archive)?;
                let mut zip = zip::ZipArchive::new(file)?;
                let mut entry = zip.by_name(name)?;
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

/// Per-class slot owning the bytecode source, a weak reference to the last
/// parsed snapshot, and the strong `modified` tree once a write has touched
/// the class.
///
/// Not internally concurrent; the engine serializes access per provider.
pub(crate) struct ClassProvider {
    name: String,
    source: BytecodeSource,
    snapshot: Weak<Mutex<Tree>>,
    modified: Option<Arc<Mutex<Tree>>>,
}

impl ClassProvider {
    pub(crate) fn new(name: impl Into<String>, source: BytecodeSource) -> Self {
        Self { name: name.into(), source, snapshot: Weak::new(), modified: None }
    }

    /// The current tree: the modified one if any write pinned it, else the
    /// live weak snapshot, else a fresh parse (with the gate opened for the
    /// duration and restored afterwards).
    pub(crate) fn get(
        &mut self,
        frontend: &dyn Frontend,
        gate: &MutationGate,
    ) -> crate::Result<Arc<Mutex<Tree>>> {
        if let Some(modified) = &self.modified {
            return Ok(modified.clone());
        }
        if let Some(snapshot) = self.snapshot.upgrade() {
            return Ok(snapshot);
        }
        trace!(class = %self.name, "parsing");
        let bytes = self.source.load()?;
        let tree = {
            let _open = gate.open_scope();
            frontend.parse(&self.name, &bytes, gate)?
        };
        let tree = Arc::new(Mutex::new(tree));
        self.snapshot = Arc::downgrade(&tree);
        Ok(tree)
    }

    /// Pins the current tree as the live modified version. From here on
    /// every read returns this exact instance.
    pub(crate) fn promote(
        &mut self,
        frontend: &dyn Frontend,
        gate: &MutationGate,
    ) -> crate::Result<Arc<Mutex<Tree>>> {
        let tree = self.get(frontend, gate)?;
        self.modified = Some(tree.clone());
        Ok(tree)
    }

    pub(crate) fn modified_tree(&self) -> Option<&Arc<Mutex<Tree>>> {
        self.modified.as_ref()
    }

    pub(crate) fn bytes(&self) -> crate::Result<Vec<u8>> {
        self.source.load()
    }
}

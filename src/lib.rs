#![forbid(unsafe_code)]
#![deny(clippy::all)]

//! A processor that coordinates independently authored bytecode
//! transformers over a corpus of classfiles.
//!
//! Transformers observe the [`classtree`] model of each class and schedule
//! edits through [captures](crate::NodeCapture); the processor orders the
//! transformers into rounds and applies their writes so that later rounds
//! see the effects of earlier ones. Processing is phased:
//!
//! - **apply**: every transformer declares its round and write
//!   dependencies, sequentially.
//! - **read**: the transformers of the current round run in parallel,
//!   queueing class callbacks, captures and writes; queued class requests
//!   drain in waves until a whole wave requests nothing new.
//! - **write**: scheduled writes apply in parallel, one worker per class,
//!   with reference captures resolved against each class's pinned tree
//!   first.
//!
//! The mutation gate stays closed outside the write phase, so a transformer
//! that tries to edit a tree it is merely reading fails loudly.
//!
//! The actual classfile reader and writer stay outside this crate, behind
//! the [`Frontend`] contract; hosts that can produce bytecode for unknown
//! types plug in as a [`Platform`].

mod capture;
mod error;
mod oracle;
mod phase;
mod provider;
mod schedule;
mod transformer;

pub use crate::{
    capture::{NodeCapture, NodeRef, SliceCapture, SliceRef},
    error::{Error, Result},
    oracle::{ClassInfo, OBJECT},
    phase::Phase,
    provider::{Frontend, Platform},
    schedule::{NO_WRITE, READ_VANILLA},
    transformer::{ClassView, Cx, Transformer},
};
pub use classtree::{Fragment, FragmentList, MutationGate, NodeId, Scalar, Tag, Tree, TreeError};

use crate::{
    capture::PendingRef,
    provider::{BytecodeSource, ClassProvider},
    transformer::{Queued, WriteOp},
};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::{
    collections::{BTreeSet, HashMap},
    io::Cursor,
    path::Path,
    sync::Arc,
};
use tracing::{debug, info};

/// The driver-facing processor: registers inputs, schedules transformers,
/// runs the phase engine and reports what changed.
pub struct Processor {
    pub(crate) frontend: Arc<dyn Frontend>,
    pub(crate) platform: Option<Arc<dyn Platform>>,
    pub(crate) gate: MutationGate,
    pub(crate) current_phase: Mutex<Phase>,
    pub(crate) transformers: Vec<Arc<dyn Transformer>>,
    pub(crate) anchors: Vec<String>,
    pub(crate) round_dependents: Mutex<HashMap<String, Vec<String>>>,
    pub(crate) write_dependents: Mutex<HashMap<String, Vec<String>>>,
    pub(crate) classes: HashMap<String, Mutex<ClassProvider>>,
    pub(crate) requested: Mutex<HashMap<String, Vec<Queued>>>,
    pub(crate) ref_captures: Mutex<HashMap<String, Vec<PendingRef>>>,
    pub(crate) writes: Mutex<HashMap<String, Vec<WriteOp>>>,
    pub(crate) modified: Mutex<BTreeSet<String>>,
    pub(crate) info_cache: Mutex<HashMap<String, Arc<ClassInfo>>>,
    config: HashMap<String, String>,
    up_to_date: bool,
}

impl Processor {
    pub fn new(frontend: Arc<dyn Frontend>) -> Self {
        Self {
            frontend,
            platform: None,
            gate: MutationGate::new(),
            current_phase: Mutex::new(Phase::Idle),
            transformers: Vec::new(),
            anchors: schedule::default_anchors(),
            round_dependents: Mutex::new(HashMap::new()),
            write_dependents: Mutex::new(HashMap::new()),
            classes: HashMap::new(),
            requested: Mutex::new(HashMap::new()),
            ref_captures: Mutex::new(HashMap::new()),
            writes: Mutex::new(HashMap::new()),
            modified: Mutex::new(BTreeSet::new()),
            info_cache: Mutex::new(HashMap::new()),
            config: HashMap::new(),
            up_to_date: true,
        }
    }

    pub fn with_platform(frontend: Arc<dyn Frontend>, platform: Arc<dyn Platform>) -> Self {
        let mut processor = Self::new(frontend);
        processor.platform = Some(platform);
        processor
    }

    /// Registers a transformer. Ids are expected to be unique; dependency
    /// declarations refer to them.
    pub fn add_transformer(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    /// Streams a jar, recording every `.class` entry as a lazily re-read
    /// provider, and returns the archive's base64 SHA-1. When the checksum
    /// differs from `old_checksum` the cache is invalidated; a matching
    /// checksum leaves it untouched, so an up-to-date processor stays a
    /// no-op.
    pub fn add_jar(
        &mut self,
        path: impl AsRef<Path>,
        old_checksum: Option<&str>,
    ) -> crate::Result<String> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let checksum = base64::encode(Sha1::digest(&bytes));

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes))?;
        let mut recorded = 0usize;
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            let entry_name = entry.name().to_string();
            if let Some(class_name) = entry_name.strip_suffix(".class") {
                self.classes.insert(
                    class_name.to_string(),
                    Mutex::new(ClassProvider::new(
                        class_name,
                        BytecodeSource::JarEntry {
                            archive: path.to_path_buf(),
                            name: entry_name.clone(),
                        },
                    )),
                );
                recorded += 1;
            }
        }
        info!(jar = %path.display(), classes = recorded, %checksum, "added jar");

        if old_checksum != Some(checksum.as_str()) {
            self.invalidate_cache();
        }
        Ok(checksum)
    }

    /// Registers a single class from raw bytecode and unconditionally
    /// invalidates the cache.
    pub fn add_class(&mut self, name: &str, bytecode: Vec<u8>) {
        self.classes.insert(
            name.to_string(),
            Mutex::new(ClassProvider::new(name, BytecodeSource::InMemory(Arc::new(bytecode)))),
        );
        self.invalidate_cache();
    }

    pub fn add_config(&mut self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Replaces the anchor sequence used for round computation.
    pub fn set_anchors(&mut self, anchors: Vec<String>) {
        self.anchors = anchors;
    }

    pub fn invalidate_cache(&mut self) {
        self.up_to_date = false;
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    /// Drops every registered input, transformer and cache. The processor
    /// behaves as freshly constructed afterwards.
    pub fn close(&mut self) {
        self.transformers.clear();
        self.classes.clear();
        self.config.clear();
        self.round_dependents.lock().clear();
        self.write_dependents.lock().clear();
        self.requested.lock().clear();
        self.ref_captures.lock().clear();
        self.writes.lock().clear();
        self.modified.lock().clear();
        self.info_cache.lock().clear();
        self.up_to_date = true;
    }

    /// Runs the full phase engine, unless the inputs are unchanged since
    /// the last run, in which case this is a no-op.
    pub fn process(&mut self) -> crate::Result<()> {
        if self.up_to_date {
            debug!("inputs unchanged, nothing to process");
            return Ok(());
        }
        self.run()?;
        self.up_to_date = true;
        Ok(())
    }

    /// Names of every class a write has touched, sorted.
    pub fn modified_class_names(&self) -> Vec<String> {
        self.modified.lock().iter().cloned().collect()
    }

    /// Resolves a class tree right now, outside any phase. Reads pin
    /// nothing: the tree stays weakly cached until a write promotes it.
    pub fn find_class_now(&self, name: &str) -> crate::Result<Arc<Mutex<Tree>>> {
        let provider =
            self.classes.get(name).ok_or_else(|| Error::UnknownClass(name.to_string()))?;
        provider.lock().get(self.frontend.as_ref(), &self.gate)
    }
}

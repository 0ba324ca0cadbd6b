//! The transformer contract and the phase-checked handle transformers use
//! to talk to the engine.

use crate::{
    capture::{NodeCapture, NodeRef, PendingRef, SliceCapture, SliceRef},
    error::Error,
    phase::Phase,
    Processor,
};
use classtree::{Fragment, FragmentList, NodeId, Tree, TreeError};
use std::sync::Arc;

/// A unit of transformation work.
///
/// `apply` declares scheduling dependencies; `read` observes class trees and
/// schedules captures and writes. There is no write hook: write effects are
/// scheduled during `read` and applied by the engine in the write phase.
pub trait Transformer: Send + Sync + 'static {
    /// Stable identifier, referenced by dependency declarations of other
    /// transformers.
    fn id(&self) -> &str;

    fn apply(&self, _cx: &Cx<'_>) -> crate::Result<()> {
        Ok(())
    }

    fn read(&self, _cx: &Cx<'_>) -> crate::Result<()> {
        Ok(())
    }
}

/// A class callback queued by [`Cx::with_class`] and friends, drained during
/// the read fixpoint.
pub(crate) struct Queued {
    pub(crate) transformer: String,
    pub(crate) run: Box<dyn FnOnce(&ClassView<'_>) -> crate::Result<()> + Send>,
}

/// One scheduled write: the originating transformer, a reference target, and
/// the supplier producing the replacement when the write is applied.
pub(crate) enum WriteOp {
    Node {
        transformer: String,
        target: Arc<NodeRef>,
        supply: Box<dyn FnOnce() -> Fragment + Send>,
    },
    Slice {
        transformer: String,
        target: Arc<SliceRef>,
        supply: Box<dyn FnOnce() -> FragmentList + Send>,
    },
}

impl WriteOp {
    pub(crate) fn transformer(&self) -> &str {
        match self {
            WriteOp::Node { transformer, .. } | WriteOp::Slice { transformer, .. } => transformer,
        }
    }

    pub(crate) fn class_name(&self) -> &str {
        match self {
            WriteOp::Node { target, .. } => target.class_name(),
            WriteOp::Slice { target, .. } => target.class_name(),
        }
    }
}

/// The engine handle passed to both transformer hooks. Every operation is
/// legal in exactly one phase and fails with [`Error::PhaseViolation`]
/// anywhere else.
pub struct Cx<'a> {
    processor: &'a Processor,
    id: &'a str,
}

impl<'a> Cx<'a> {
    pub(crate) fn new(processor: &'a Processor, id: &'a str) -> Self {
        Self { processor, id }
    }

    /// Id of the transformer this handle belongs to.
    pub fn id(&self) -> &str {
        self.id
    }

    /// Configuration supplied by the driver. Legal in any phase.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.processor.config_value(key)
    }

    /// Declares that `parent` runs in an earlier round than this
    /// transformer.
    pub fn add_round_dependency(&self, parent: &str) -> crate::Result<()> {
        self.ensure_phase(Phase::Apply, "add_round_dependency")?;
        self.round_edge(parent, self.id);
        Ok(())
    }

    /// Declares that `child` runs in a later round than this transformer.
    pub fn add_round_dependent(&self, child: &str) -> crate::Result<()> {
        self.ensure_phase(Phase::Apply, "add_round_dependent")?;
        self.round_edge(self.id, child);
        Ok(())
    }

    /// Declares that `parent`'s writes apply before this transformer's
    /// within a class.
    pub fn add_write_dependency(&self, parent: &str) -> crate::Result<()> {
        self.ensure_phase(Phase::Apply, "add_write_dependency")?;
        self.write_edge(parent, self.id);
        Ok(())
    }

    /// Declares that `child`'s writes apply after this transformer's within
    /// a class.
    pub fn add_write_dependent(&self, child: &str) -> crate::Result<()> {
        self.ensure_phase(Phase::Apply, "add_write_dependent")?;
        self.write_edge(self.id, child);
        Ok(())
    }

    /// Queues `callback` against the named class. The callback runs during
    /// the read fixpoint, after the round's transformer fan-out, and may
    /// itself request further classes.
    pub fn with_class(
        &self,
        name: &str,
        callback: impl FnOnce(&ClassView<'_>) -> crate::Result<()> + Send + 'static,
    ) -> crate::Result<()> {
        self.ensure_phase(Phase::Read, "with_class")?;
        if !self.processor.classes.contains_key(name) {
            return Err(Error::UnknownClass(name.to_string()));
        }
        self.processor
            .requested
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Queued { transformer: self.id.to_string(), run: Box::new(callback) });
        Ok(())
    }

    /// Queues `callback` against every class whose name satisfies the
    /// predicate.
    pub fn with_classes(
        &self,
        mut predicate: impl FnMut(&str) -> bool,
        callback: impl Fn(&ClassView<'_>) -> crate::Result<()> + Send + Sync + 'static,
    ) -> crate::Result<()> {
        self.ensure_phase(Phase::Read, "with_classes")?;
        let mut names: Vec<&String> =
            self.processor.classes.keys().filter(|n| predicate(n)).collect();
        names.sort();
        let callback = Arc::new(callback);
        let mut requested = self.processor.requested.lock();
        for name in names {
            let callback = callback.clone();
            requested.entry(name.clone()).or_default().push(Queued {
                transformer: self.id.to_string(),
                run: Box::new(move |view| callback(view)),
            });
        }
        Ok(())
    }

    /// Queues `callback` against every class under the given internal-name
    /// prefix.
    pub fn with_classes_prefixed(
        &self,
        prefix: &str,
        callback: impl Fn(&ClassView<'_>) -> crate::Result<()> + Send + Sync + 'static,
    ) -> crate::Result<()> {
        let prefix = prefix.to_string();
        self.with_classes(move |name| name.starts_with(&prefix), callback)
    }

    /// Queues `callback` against every class the processor holds.
    pub fn with_all_classes(
        &self,
        callback: impl Fn(&ClassView<'_>) -> crate::Result<()> + Send + Sync + 'static,
    ) -> crate::Result<()> {
        self.with_classes(|_| true, callback)
    }

    /// Schedules a node replacement. The target must be a reference
    /// capture; the supplier runs when the write is applied, under the
    /// write phase's open gate. Overlapping writes are not diagnosed; the
    /// write-dependency order decides who applies last.
    pub fn add_write(
        &self,
        target: &NodeCapture,
        supply: impl FnOnce() -> Fragment + Send + 'static,
    ) -> crate::Result<()> {
        self.ensure_phase(Phase::Read, "add_write")?;
        let target = match target {
            NodeCapture::Reference(r) => r.clone(),
            NodeCapture::Copy(_) => return Err(Error::InvalidCaptureTarget),
        };
        self.push_write(WriteOp::Node {
            transformer: self.id.to_string(),
            target,
            supply: Box::new(supply),
        });
        Ok(())
    }

    /// Schedules a slice replacement: the captured range is removed and the
    /// supplied list inserted at its start.
    pub fn add_slice_write(
        &self,
        target: &SliceCapture,
        supply: impl FnOnce() -> FragmentList + Send + 'static,
    ) -> crate::Result<()> {
        self.ensure_phase(Phase::Read, "add_slice_write")?;
        let target = match target {
            SliceCapture::Reference(r) => r.clone(),
            SliceCapture::Copy(_) => return Err(Error::InvalidCaptureTarget),
        };
        self.push_write(WriteOp::Slice {
            transformer: self.id.to_string(),
            target,
            supply: Box::new(supply),
        });
        Ok(())
    }

    /// Replaces the target with the content of a copy capture.
    pub fn substitute(
        &self,
        target: &NodeCapture,
        source: &NodeCapture,
    ) -> crate::Result<()> {
        let snapshot = match source {
            NodeCapture::Copy(fragment) => fragment.clone(),
            NodeCapture::Reference(_) => return Err(Error::InvalidCaptureTarget),
        };
        self.add_write(target, move || (*snapshot).clone())
    }

    /// Replaces the target range with the content of a copy slice capture.
    pub fn substitute_slice(
        &self,
        target: &SliceCapture,
        source: &SliceCapture,
    ) -> crate::Result<()> {
        let snapshot = match source {
            SliceCapture::Copy(list) => list.clone(),
            SliceCapture::Reference(_) => return Err(Error::InvalidCaptureTarget),
        };
        self.add_slice_write(target, move || (*snapshot).clone())
    }

    pub(crate) fn ensure_phase(&self, expected: Phase, op: &'static str) -> crate::Result<()> {
        let current = self.processor.phase();
        if current != expected {
            return Err(Error::PhaseViolation { op, phase: current });
        }
        Ok(())
    }

    pub(crate) fn register_ref(&self, pending: PendingRef) {
        self.processor
            .ref_captures
            .lock()
            .entry(pending.class_name().to_string())
            .or_default()
            .push(pending);
    }

    fn round_edge(&self, parent: &str, child: &str) {
        self.processor
            .round_dependents
            .lock()
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
    }

    fn write_edge(&self, parent: &str, child: &str) {
        self.processor
            .write_dependents
            .lock()
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
    }

    fn push_write(&self, op: WriteOp) {
        self.processor
            .writes
            .lock()
            .entry(op.class_name().to_string())
            .or_default()
            .push(op);
    }
}

/// One class's tree as seen by a queued callback. Capture constructors live
/// here because they need the live tree; like every read operation they are
/// only legal in the read phase.
pub struct ClassView<'a> {
    name: &'a str,
    tree: &'a Tree,
    cx: &'a Cx<'a>,
}

impl<'a> ClassView<'a> {
    pub(crate) fn new(name: &'a str, tree: &'a Tree, cx: &'a Cx<'a>) -> Self {
        Self { name, tree, cx }
    }

    /// Internal name of the viewed class.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn tree(&self) -> &Tree {
        self.tree
    }

    /// The engine handle, for requesting further classes or scheduling
    /// writes from inside a callback.
    pub fn cx(&self) -> &Cx<'a> {
        self.cx
    }

    /// Snapshots a node. The result never changes, whatever later rounds do
    /// to the tree.
    pub fn copy_node(&self, node: NodeId) -> crate::Result<NodeCapture> {
        self.cx.ensure_phase(Phase::Read, "copy_node")?;
        Ok(NodeCapture::Copy(Arc::new(self.tree.fragment(node))))
    }

    /// Snapshots the half-open list range `[start, end)`.
    pub fn copy_slice(
        &self,
        list: NodeId,
        start: usize,
        end: usize,
    ) -> crate::Result<SliceCapture> {
        self.cx.ensure_phase(Phase::Read, "copy_slice")?;
        Ok(SliceCapture::Copy(Arc::new(FragmentList::of_range(self.tree, list, start, end)?)))
    }

    /// Captures a node by path, to be resolved against the class's modified
    /// tree when writes are prepared.
    pub fn ref_node(&self, node: NodeId) -> crate::Result<NodeCapture> {
        self.cx.ensure_phase(Phase::Read, "ref_node")?;
        let reference = Arc::new(NodeRef::new(
            self.name.to_string(),
            self.tree.path_from_root(node)?,
        ));
        self.cx.register_ref(PendingRef::Node(reference.clone()));
        Ok(NodeCapture::Reference(reference))
    }

    /// Captures a list range by path, with independent endpoint
    /// inclusivity. Resolution normalizes to the half-open form.
    pub fn ref_slice(
        &self,
        list: NodeId,
        start: usize,
        end: usize,
        start_inclusive: bool,
        end_inclusive: bool,
    ) -> crate::Result<SliceCapture> {
        self.cx.ensure_phase(Phase::Read, "ref_slice")?;
        if self.tree.list_elem(list).is_none() {
            return Err(Error::Tree(TreeError::NotAList { found: self.tree.kind(list) }));
        }
        let reference = Arc::new(SliceRef::new(
            self.name.to_string(),
            self.tree.path_from_root(list)?,
            start,
            end,
            start_inclusive,
            end_inclusive,
        ));
        self.cx.register_ref(PendingRef::Slice(reference.clone()));
        Ok(SliceCapture::Reference(reference))
    }
}

//! Captures quote a region of a class tree during a read so it can be
//! rewritten later.
//!
//! Copy captures snapshot deeply at construction and never change again.
//! Reference captures remember where a node lives (owning class plus the
//! child-index path from the root) and resolve against the current modified
//! tree when writes are prepared, so they observe the effects of earlier
//! rounds.

use classtree::{Fragment, FragmentList, NodeId, Tree, TreeError};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// A single node captured from a class tree.
#[derive(Clone, Debug)]
pub enum NodeCapture {
    /// Detached deep snapshot, independent of later tree changes.
    Copy(Arc<Fragment>),
    /// Lazy path into the owning class, resolved at write time.
    Reference(Arc<NodeRef>),
}

impl NodeCapture {
    /// The snapshot held by a copy capture.
    pub fn snapshot(&self) -> Option<&Fragment> {
        match self {
            NodeCapture::Copy(fragment) => Some(fragment),
            NodeCapture::Reference(_) => None,
        }
    }

    /// The owning class of a reference capture.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            NodeCapture::Copy(_) => None,
            NodeCapture::Reference(r) => Some(r.class_name()),
        }
    }
}

/// A list range captured from a class tree.
#[derive(Clone, Debug)]
pub enum SliceCapture {
    Copy(Arc<FragmentList>),
    Reference(Arc<SliceRef>),
}

impl SliceCapture {
    pub fn snapshot(&self) -> Option<&FragmentList> {
        match self {
            SliceCapture::Copy(list) => Some(list),
            SliceCapture::Reference(_) => None,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            SliceCapture::Copy(_) => None,
            SliceCapture::Reference(r) => Some(r.class_name()),
        }
    }
}

/// Resolution descriptor of a reference node capture: the path indices were
/// recorded at capture time and are walked against the owning class's
/// current tree during write preparation. A path invalidated by an earlier
/// structural change fails fast instead of resolving somewhere surprising.
#[derive(Debug)]
pub struct NodeRef {
    class: String,
    path: Vec<usize>,
    resolved: OnceCell<NodeId>,
}

impl NodeRef {
    pub(crate) fn new(class: String, path: Vec<usize>) -> Self {
        Self { class, path, resolved: OnceCell::new() }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Walks the recorded path once and caches the live node.
    pub(crate) fn resolve(&self, tree: &Tree) -> Result<NodeId, TreeError> {
        if let Some(id) = self.resolved.get() {
            return Ok(*id);
        }
        let id = tree.at_path(&self.path)?;
        Ok(*self.resolved.get_or_init(|| id))
    }
}

/// Resolution descriptor of a reference slice capture. Endpoints carry
/// independent inclusivity flags and are normalized to the half-open form
/// `[start, end)` during resolution: an exclusive start is bumped past its
/// node, an inclusive end is bumped to cover its node.
#[derive(Debug)]
pub struct SliceRef {
    class: String,
    path: Vec<usize>,
    start: usize,
    end: usize,
    start_inclusive: bool,
    end_inclusive: bool,
    resolved: OnceCell<(NodeId, usize, usize)>,
}

impl SliceRef {
    pub(crate) fn new(
        class: String,
        path: Vec<usize>,
        start: usize,
        end: usize,
        start_inclusive: bool,
        end_inclusive: bool,
    ) -> Self {
        Self { class, path, start, end, start_inclusive, end_inclusive, resolved: OnceCell::new() }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub(crate) fn resolve(&self, tree: &Tree) -> Result<(NodeId, usize, usize), TreeError> {
        if let Some(range) = self.resolved.get() {
            return Ok(*range);
        }
        let list = tree.at_path(&self.path)?;
        if tree.list_elem(list).is_none() {
            return Err(TreeError::NotAList { found: tree.kind(list) });
        }
        let start = if self.start_inclusive { self.start } else { self.start + 1 };
        let end = if self.end_inclusive { self.end + 1 } else { self.end };
        let len = tree.children(list).len();
        if start > end || end > len {
            return Err(TreeError::OutOfRange { index: start.max(end), len });
        }
        Ok(*self.resolved.get_or_init(|| (list, start, end)))
    }
}

/// A reference capture pending resolution, sharded by owning class in the
/// processor.
#[derive(Clone, Debug)]
pub(crate) enum PendingRef {
    Node(Arc<NodeRef>),
    Slice(Arc<SliceRef>),
}

impl PendingRef {
    pub(crate) fn class_name(&self) -> &str {
        match self {
            PendingRef::Node(r) => r.class_name(),
            PendingRef::Slice(r) => r.class_name(),
        }
    }

    pub(crate) fn resolve(&self, tree: &Tree) -> Result<(), TreeError> {
        match self {
            PendingRef::Node(r) => r.resolve(tree).map(|_| ()),
            PendingRef::Slice(r) => r.resolve(tree).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classtree::{layout, MutationGate, Tree};

    fn tree_with_four_modifiers() -> (Tree, Vec<usize>) {
        let gate = MutationGate::new();
        let _open = gate.open_scope();
        let mut tree =
            Tree::new_class("com/example/A", "java/lang/Object", gate.clone()).unwrap();
        let mods = tree.class_child(layout::class::MODIFIERS);
        for m in &[10, 20, 30, 40] {
            tree.push_int(mods, *m).unwrap();
        }
        let path = tree.path_from_root(mods).unwrap();
        (tree, path)
    }

    fn resolve(start: usize, end: usize, si: bool, ei: bool) -> (usize, usize) {
        let (tree, path) = tree_with_four_modifiers();
        let slice = SliceRef::new("com/example/A".into(), path, start, end, si, ei);
        let (_, start, end) = slice.resolve(&tree).unwrap();
        (start, end)
    }

    #[test]
    fn endpoints_normalize_to_half_open() {
        assert_eq!(resolve(1, 3, true, false), (1, 3));
        assert_eq!(resolve(1, 2, true, true), (1, 3));
        assert_eq!(resolve(0, 3, false, false), (1, 3));
        assert_eq!(resolve(0, 2, false, true), (1, 3));
    }

    #[test]
    fn out_of_range_slices_fail_fast() {
        let (tree, path) = tree_with_four_modifiers();
        let slice = SliceRef::new("com/example/A".into(), path, 2, 4, true, true);
        assert_eq!(
            slice.resolve(&tree),
            Err(TreeError::OutOfRange { index: 5, len: 4 })
        );
    }

    #[test]
    fn node_resolution_is_cached() {
        let (tree, path) = tree_with_four_modifiers();
        let mods = tree.at_path(&path).unwrap();
        let target = tree.children(mods)[2];
        let node = NodeRef::new("com/example/A".into(), tree.path_from_root(target).unwrap());
        assert_eq!(node.resolve(&tree).unwrap(), target);
        assert_eq!(node.resolve(&tree).unwrap(), target);
    }
}

use crate::tree::{NodeId, Payload, Scalar, Tag, Tree, TreeError};

/// A detached deep snapshot of a subtree.
///
/// Fragments carry no parent links and share no structure with the tree they
/// were taken from, so they stay valid however the source tree changes. They
/// are the interchange value between trees: snapshot here, materialize there.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fragment {
    Value(Scalar),
    List { elem: Tag, children: Vec<Fragment> },
    Composite { tag: Tag, children: Vec<Fragment> },
}

impl Fragment {
    /// Deep snapshot of the subtree under `node`.
    pub fn of(tree: &Tree, node: NodeId) -> Self {
        match tree.payload(node) {
            Payload::Value(s) => Fragment::Value(s.clone()),
            Payload::List { elem, children } => Fragment::List {
                elem: *elem,
                children: children.iter().map(|c| Fragment::of(tree, *c)).collect(),
            },
            Payload::Composite { tag, children } => Fragment::Composite {
                tag: *tag,
                children: children.iter().map(|c| Fragment::of(tree, *c)).collect(),
            },
        }
    }

    /// A string value fragment.
    pub fn str(v: impl Into<String>) -> Self {
        Fragment::Value(Scalar::Str(v.into()))
    }

    /// An integer value fragment.
    pub fn int(v: i64) -> Self {
        Fragment::Value(Scalar::Int(v))
    }

    pub fn tag(&self) -> Tag {
        match self {
            Fragment::Value(_) => Tag::Value,
            Fragment::List { .. } => Tag::List,
            Fragment::Composite { tag, .. } => *tag,
        }
    }
}

/// A detached snapshot of a list range, tagged with the element type so it
/// can only be grafted into compatible lists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FragmentList {
    elem: Tag,
    items: Vec<Fragment>,
}

impl FragmentList {
    /// Builds a list snapshot from loose fragments. Every item must carry
    /// the element tag.
    pub fn new(elem: Tag, items: Vec<Fragment>) -> Result<Self, TreeError> {
        for item in &items {
            if item.tag() != elem {
                return Err(TreeError::VariantMismatch { expected: elem, found: item.tag() });
            }
        }
        Ok(Self { elem, items })
    }

    /// Deep snapshot of the half-open range `[start, end)` of a list node.
    pub fn of_range(
        tree: &Tree,
        list: NodeId,
        start: usize,
        end: usize,
    ) -> Result<Self, TreeError> {
        let elem = match tree.list_elem(list) {
            Some(elem) => elem,
            None => return Err(TreeError::NotAList { found: tree.kind(list) }),
        };
        let children = tree.children(list);
        if start > end || end > children.len() {
            return Err(TreeError::OutOfRange { index: start.max(end), len: children.len() });
        }
        let items = children[start..end].iter().map(|c| Fragment::of(tree, *c)).collect();
        Ok(Self { elem, items })
    }

    pub fn elem(&self) -> Tag {
        self.elem
    }

    pub fn items(&self) -> &[Fragment] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MutationGate;

    #[test]
    fn list_snapshots_enforce_their_element_tag() {
        let err = FragmentList::new(Tag::Method, vec![Fragment::int(0)]).unwrap_err();
        assert_eq!(err, TreeError::VariantMismatch { expected: Tag::Method, found: Tag::Value });
    }

    #[test]
    fn range_snapshots_validate_bounds() {
        let gate = MutationGate::new();
        let _open = gate.open_scope();
        let mut tree =
            Tree::new_class("com/example/A", "java/lang/Object", gate.clone()).unwrap();
        let mods = tree.class_child(crate::layout::class::MODIFIERS);
        tree.push_int(mods, 1).unwrap();
        tree.push_int(mods, 2).unwrap();

        let slice = FragmentList::of_range(&tree, mods, 0, 2).unwrap();
        assert_eq!(slice.items(), &[Fragment::int(1), Fragment::int(2)]);
        assert_eq!(
            FragmentList::of_range(&tree, mods, 1, 3),
            Err(TreeError::OutOfRange { index: 3, len: 2 })
        );
        assert_eq!(
            FragmentList::of_range(&tree, tree.root(), 0, 0),
            Err(TreeError::NotAList { found: Tag::Class })
        );
    }
}

use crate::{
    fragment::{Fragment, FragmentList},
    gate::MutationGate,
};
use std::fmt::{Debug, Formatter, Result as FmtResult, Write as _};

/// Index of a node within its tree's arena.
///
/// Ids are only meaningful together with the [`Tree`] that issued them; they
/// are never reused, so an id stays valid for the life of its tree even after
/// the node it names has been detached.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a value node. Immutable in place; replacing one goes through
/// [`Tree::copy_from`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

/// Type tag of a node, shared by list element typing and composite
/// discrimination.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Tag {
    Value,
    List,
    Named,
    Class,
    Method,
    Field,
    Parameter,
    Instruction,
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("tree mutation attempted while the gate is closed")]
    GateClosed,

    #[error("expected a {expected:?} node, found a {found:?}")]
    VariantMismatch { expected: Tag, found: Tag },

    #[error("index {index} is out of range for a list of length {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("{found:?} nodes have no list operations")]
    NotAList { found: Tag },

    #[error("no child at step {step} of the recorded path")]
    BadPath { step: usize },

    #[error("node is no longer attached to its tree")]
    Detached,
}

/// Fixed child positions of the composite variants.
pub mod layout {
    pub mod class {
        pub const NAME: usize = 0;
        pub const SUPERCLASS: usize = 1;
        pub const MODIFIERS: usize = 2;
        pub const INTERFACES: usize = 3;
        pub const ATTRIBUTES: usize = 4;
        pub const FIELDS: usize = 5;
        pub const METHODS: usize = 6;
        pub const INNER_CLASSES: usize = 7;
    }

    pub mod method {
        pub const NAME: usize = 0;
        pub const DESCRIPTOR: usize = 1;
        pub const MODIFIERS: usize = 2;
        pub const PARAMETERS: usize = 3;
        pub const INSTRUCTIONS: usize = 4;
    }

    pub mod field {
        pub const NAME: usize = 0;
        pub const DESCRIPTOR: usize = 1;
        pub const MODIFIERS: usize = 2;
    }

    pub mod parameter {
        pub const NAME: usize = 0;
        pub const DESCRIPTOR: usize = 1;
    }

    pub mod instruction {
        pub const OPCODE: usize = 0;
        pub const OPERANDS: usize = 1;
    }

    pub mod named {
        pub const NAME: usize = 0;
        pub const VALUE: usize = 1;
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Payload {
    Value(Scalar),
    List { elem: Tag, children: Vec<NodeId> },
    Composite { tag: Tag, children: Vec<NodeId> },
}

impl Payload {
    fn tag(&self) -> Tag {
        match self {
            Payload::Value(_) => Tag::Value,
            Payload::List { .. } => Tag::List,
            Payload::Composite { tag, .. } => *tag,
        }
    }

    fn children(&self) -> &[NodeId] {
        match self {
            Payload::Value(_) => &[],
            Payload::List { children, .. } | Payload::Composite { children, .. } => children,
        }
    }
}

struct Slot {
    parent: Option<NodeId>,
    payload: Payload,
}

/// The tree of one class: an arena of nodes rooted at the class composite.
///
/// Detached nodes (the previous content of a [`copy_from`](Tree::copy_from)
/// target, or a removed list range) keep their slots but become unreachable;
/// trees are rebuilt per parse, so slots are not reclaimed.
pub struct Tree {
    gate: MutationGate,
    slots: Vec<Slot>,
}

impl Tree {
    /// Creates a class tree with the fixed child layout and empty member
    /// lists. The gate must be open, as during any parse.
    pub fn new_class(
        name: &str,
        superclass: &str,
        gate: MutationGate,
    ) -> Result<Self, TreeError> {
        gate.ensure_open()?;
        let mut tree = Tree { gate, slots: Vec::new() };
        let root = tree.alloc(None, Payload::Composite { tag: Tag::Class, children: Vec::new() });
        let children = vec![
            tree.alloc(Some(root), Payload::Value(Scalar::Str(name.to_string()))),
            tree.alloc(Some(root), Payload::Value(Scalar::Str(superclass.to_string()))),
            tree.alloc(Some(root), Payload::List { elem: Tag::Value, children: Vec::new() }),
            tree.alloc(Some(root), Payload::List { elem: Tag::Value, children: Vec::new() }),
            tree.alloc(Some(root), Payload::List { elem: Tag::Named, children: Vec::new() }),
            tree.alloc(Some(root), Payload::List { elem: Tag::Field, children: Vec::new() }),
            tree.alloc(Some(root), Payload::List { elem: Tag::Method, children: Vec::new() }),
            tree.alloc(Some(root), Payload::List { elem: Tag::Value, children: Vec::new() }),
        ];
        tree.set_children(root, children);
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn gate(&self) -> &MutationGate {
        &self.gate
    }

    pub fn kind(&self, id: NodeId) -> Tag {
        self.slots[id.index()].payload.tag()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.index()].parent
    }

    /// The ordered child view. Empty for value nodes; always exactly
    /// `[name, value]` for named nodes.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slots[id.index()].payload.children()
    }

    pub fn value(&self, id: NodeId) -> Option<&Scalar> {
        match &self.slots[id.index()].payload {
            Payload::Value(s) => Some(s),
            _ => None,
        }
    }

    /// Element tag of a list node.
    pub fn list_elem(&self, id: NodeId) -> Option<Tag> {
        match &self.slots[id.index()].payload {
            Payload::List { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Child indices from the root down to `id`. Fails for nodes that have
    /// been detached by an earlier mutation.
    pub fn path_from_root(&self, id: NodeId) -> Result<Vec<usize>, TreeError> {
        let mut steps = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let position = self
                .children(parent)
                .iter()
                .position(|c| *c == current)
                .ok_or(TreeError::Detached)?;
            steps.push(position);
            current = parent;
        }
        if current != self.root() {
            return Err(TreeError::Detached);
        }
        steps.reverse();
        Ok(steps)
    }

    /// Walks child indices from the root. The inverse of
    /// [`path_from_root`](Tree::path_from_root) as long as the path has not
    /// been structurally invalidated in between.
    pub fn at_path(&self, path: &[usize]) -> Result<NodeId, TreeError> {
        let mut current = self.root();
        for (step, &index) in path.iter().enumerate() {
            current = self
                .children(current)
                .get(index)
                .copied()
                .ok_or(TreeError::BadPath { step })?;
        }
        Ok(current)
    }

    /// Detached deep snapshot of the subtree under `id`.
    pub fn fragment(&self, id: NodeId) -> Fragment {
        Fragment::of(self, id)
    }

    /// Recursively replaces the content of `target` with a deep copy of the
    /// fragment. The target keeps its identity and parent; its previous
    /// children are detached. Variants must match, including list element
    /// tags.
    pub fn copy_from(&mut self, target: NodeId, src: &Fragment) -> Result<(), TreeError> {
        self.gate.ensure_open()?;
        let expected = self.kind(target);
        if expected != src.tag() {
            return Err(TreeError::VariantMismatch { expected, found: src.tag() });
        }
        if let (Payload::List { elem, .. }, Fragment::List { elem: src_elem, .. }) =
            (&self.slots[target.index()].payload, src)
        {
            if elem != src_elem {
                return Err(TreeError::VariantMismatch { expected: *elem, found: *src_elem });
            }
        }

        for child in self.slots[target.index()].payload.children().to_vec() {
            self.slots[child.index()].parent = None;
        }
        let payload = match src {
            Fragment::Value(s) => Payload::Value(s.clone()),
            Fragment::List { elem, children } => {
                let children = self.materialize_all(target, children);
                Payload::List { elem: *elem, children }
            }
            Fragment::Composite { tag, children } => {
                let children = self.materialize_all(target, children);
                Payload::Composite { tag: *tag, children }
            }
        };
        self.slots[target.index()].payload = payload;
        Ok(())
    }

    /// Inserts deep copies of the fragment list's items at `index`, shifting
    /// the existing children right. `index` may equal the current length.
    pub fn insert_copy(
        &mut self,
        list: NodeId,
        index: usize,
        src: &FragmentList,
    ) -> Result<(), TreeError> {
        self.gate.ensure_open()?;
        let (elem, len) = self.list_header(list)?;
        if src.elem() != elem {
            return Err(TreeError::VariantMismatch { expected: elem, found: src.elem() });
        }
        if index > len {
            return Err(TreeError::OutOfRange { index, len });
        }
        let fresh: Vec<NodeId> =
            src.items().iter().map(|item| self.materialize(Some(list), item)).collect();
        match &mut self.slots[list.index()].payload {
            Payload::List { children, .. } => {
                for (offset, id) in fresh.into_iter().enumerate() {
                    children.insert(index + offset, id);
                }
            }
            _ => unreachable!("list header was just checked"),
        }
        Ok(())
    }

    /// Removes the half-open range `[start, end)`. A no-op when
    /// `start == end`. The removed nodes are detached, not reclaimed.
    pub fn remove(&mut self, list: NodeId, start: usize, end: usize) -> Result<(), TreeError> {
        self.gate.ensure_open()?;
        let (_, len) = self.list_header(list)?;
        if start > end || end > len {
            return Err(TreeError::OutOfRange { index: start.max(end), len });
        }
        if start == end {
            return Ok(());
        }
        let removed: Vec<NodeId> = match &mut self.slots[list.index()].payload {
            Payload::List { children, .. } => {
                children.splice(start..end, std::iter::empty()).collect()
            }
            _ => unreachable!("list header was just checked"),
        };
        for id in removed {
            self.slots[id.index()].parent = None;
        }
        Ok(())
    }

    /// Appends a method composite with empty modifier, parameter and
    /// instruction lists to the class's method list.
    pub fn push_method(&mut self, name: &str, descriptor: &str) -> Result<NodeId, TreeError> {
        self.gate.ensure_open()?;
        let list = self.class_child(layout::class::METHODS);
        let id =
            self.alloc(Some(list), Payload::Composite { tag: Tag::Method, children: Vec::new() });
        let children = vec![
            self.alloc(Some(id), Payload::Value(Scalar::Str(name.to_string()))),
            self.alloc(Some(id), Payload::Value(Scalar::Str(descriptor.to_string()))),
            self.alloc(Some(id), Payload::List { elem: Tag::Value, children: Vec::new() }),
            self.alloc(Some(id), Payload::List { elem: Tag::Parameter, children: Vec::new() }),
            self.alloc(Some(id), Payload::List { elem: Tag::Instruction, children: Vec::new() }),
        ];
        self.set_children(id, children);
        self.append(list, id);
        Ok(id)
    }

    /// Appends a field composite to the class's field list.
    pub fn push_field(&mut self, name: &str, descriptor: &str) -> Result<NodeId, TreeError> {
        self.gate.ensure_open()?;
        let list = self.class_child(layout::class::FIELDS);
        let id =
            self.alloc(Some(list), Payload::Composite { tag: Tag::Field, children: Vec::new() });
        let children = vec![
            self.alloc(Some(id), Payload::Value(Scalar::Str(name.to_string()))),
            self.alloc(Some(id), Payload::Value(Scalar::Str(descriptor.to_string()))),
            self.alloc(Some(id), Payload::List { elem: Tag::Value, children: Vec::new() }),
        ];
        self.set_children(id, children);
        self.append(list, id);
        Ok(id)
    }

    /// Appends a parameter composite to a method's parameter list.
    pub fn push_parameter(
        &mut self,
        method: NodeId,
        name: &str,
        descriptor: &str,
    ) -> Result<NodeId, TreeError> {
        self.gate.ensure_open()?;
        self.expect_kind(method, Tag::Method)?;
        let list = self.children(method)[layout::method::PARAMETERS];
        let id = self
            .alloc(Some(list), Payload::Composite { tag: Tag::Parameter, children: Vec::new() });
        let children = vec![
            self.alloc(Some(id), Payload::Value(Scalar::Str(name.to_string()))),
            self.alloc(Some(id), Payload::Value(Scalar::Str(descriptor.to_string()))),
        ];
        self.set_children(id, children);
        self.append(list, id);
        Ok(id)
    }

    /// Appends an instruction composite to a method's instruction list.
    pub fn push_instruction(
        &mut self,
        method: NodeId,
        opcode: i64,
        operands: &[&str],
    ) -> Result<NodeId, TreeError> {
        self.gate.ensure_open()?;
        self.expect_kind(method, Tag::Method)?;
        let list = self.children(method)[layout::method::INSTRUCTIONS];
        let id = self
            .alloc(Some(list), Payload::Composite { tag: Tag::Instruction, children: Vec::new() });
        let opcode_node = self.alloc(Some(id), Payload::Value(Scalar::Int(opcode)));
        let operand_list =
            self.alloc(Some(id), Payload::List { elem: Tag::Value, children: Vec::new() });
        let operand_nodes: Vec<NodeId> = operands
            .iter()
            .map(|o| self.alloc(Some(operand_list), Payload::Value(Scalar::Str(o.to_string()))))
            .collect();
        self.set_children(operand_list, operand_nodes);
        self.set_children(id, vec![opcode_node, operand_list]);
        self.append(list, id);
        Ok(id)
    }

    /// Appends an integer value node to a list of values.
    pub fn push_int(&mut self, list: NodeId, v: i64) -> Result<NodeId, TreeError> {
        self.push_value(list, Scalar::Int(v))
    }

    /// Appends a string value node to a list of values.
    pub fn push_str(&mut self, list: NodeId, v: &str) -> Result<NodeId, TreeError> {
        self.push_value(list, Scalar::Str(v.to_string()))
    }

    /// Appends a named node (exactly `[name, value]`) to a list of named
    /// nodes.
    pub fn push_named(
        &mut self,
        list: NodeId,
        name: &str,
        value: Scalar,
    ) -> Result<NodeId, TreeError> {
        self.gate.ensure_open()?;
        let (elem, _) = self.list_header(list)?;
        if elem != Tag::Named {
            return Err(TreeError::VariantMismatch { expected: Tag::Named, found: elem });
        }
        let id =
            self.alloc(Some(list), Payload::Composite { tag: Tag::Named, children: Vec::new() });
        let children = vec![
            self.alloc(Some(id), Payload::Value(Scalar::Str(name.to_string()))),
            self.alloc(Some(id), Payload::Value(value)),
        ];
        self.set_children(id, children);
        self.append(list, id);
        Ok(id)
    }

    /// A fixed child of the class root, addressed by [`layout::class`].
    pub fn class_child(&self, index: usize) -> NodeId {
        self.children(self.root())[index]
    }

    pub fn class_name(&self) -> &str {
        self.expect_str(self.class_child(layout::class::NAME))
    }

    /// Internal name of the direct superclass; empty at the root of the
    /// hierarchy.
    pub fn superclass(&self) -> &str {
        self.expect_str(self.class_child(layout::class::SUPERCLASS))
    }

    pub fn modifier_values(&self) -> Vec<i64> {
        self.children(self.class_child(layout::class::MODIFIERS))
            .iter()
            .filter_map(|id| self.value(*id).and_then(Scalar::as_int))
            .collect()
    }

    pub fn methods(&self) -> &[NodeId] {
        self.children(self.class_child(layout::class::METHODS))
    }

    pub fn fields(&self) -> &[NodeId] {
        self.children(self.class_child(layout::class::FIELDS))
    }

    /// First method whose name child matches.
    pub fn method_named(&self, name: &str) -> Option<NodeId> {
        self.methods().iter().copied().find(|m| self.name_of(*m) == Some(name))
    }

    /// The name child of a composite, when it has one.
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        let first = *self.children(id).first()?;
        self.value(first).and_then(Scalar::as_str)
    }

    /// Indented textual dump of the whole tree, mostly useful in test
    /// failures and trace output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root(), 0, &mut out);
        out
    }

    pub(crate) fn payload(&self, id: NodeId) -> &Payload {
        &self.slots[id.index()].payload
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        match self.payload(id) {
            Payload::Value(s) => {
                let _ = writeln!(out, "{:?}", s);
            }
            Payload::List { elem, children } => {
                let _ = writeln!(out, "list[{:?}]", elem);
                for child in children {
                    self.render_node(*child, depth + 1, out);
                }
            }
            Payload::Composite { tag, children } => {
                let _ = writeln!(out, "{:?}", tag);
                for child in children {
                    self.render_node(*child, depth + 1, out);
                }
            }
        }
    }

    fn push_value(&mut self, list: NodeId, value: Scalar) -> Result<NodeId, TreeError> {
        self.gate.ensure_open()?;
        let (elem, _) = self.list_header(list)?;
        if elem != Tag::Value {
            return Err(TreeError::VariantMismatch { expected: Tag::Value, found: elem });
        }
        let id = self.alloc(Some(list), Payload::Value(value));
        self.append(list, id);
        Ok(id)
    }

    fn list_header(&self, list: NodeId) -> Result<(Tag, usize), TreeError> {
        match &self.slots[list.index()].payload {
            Payload::List { elem, children } => Ok((*elem, children.len())),
            other => Err(TreeError::NotAList { found: other.tag() }),
        }
    }

    fn expect_kind(&self, id: NodeId, expected: Tag) -> Result<(), TreeError> {
        let found = self.kind(id);
        if found != expected {
            return Err(TreeError::VariantMismatch { expected, found });
        }
        Ok(())
    }

    fn expect_str(&self, id: NodeId) -> &str {
        match self.value(id).and_then(Scalar::as_str) {
            Some(s) => s,
            None => panic!("malformed class layout at {:?}", id),
        }
    }

    fn materialize(&mut self, parent: Option<NodeId>, frag: &Fragment) -> NodeId {
        match frag {
            Fragment::Value(s) => self.alloc(parent, Payload::Value(s.clone())),
            Fragment::List { elem, children } => {
                let id =
                    self.alloc(parent, Payload::List { elem: *elem, children: Vec::new() });
                let children = self.materialize_all(id, children);
                self.set_children(id, children);
                id
            }
            Fragment::Composite { tag, children } => {
                let id =
                    self.alloc(parent, Payload::Composite { tag: *tag, children: Vec::new() });
                let children = self.materialize_all(id, children);
                self.set_children(id, children);
                id
            }
        }
    }

    fn materialize_all(&mut self, parent: NodeId, frags: &[Fragment]) -> Vec<NodeId> {
        frags.iter().map(|f| self.materialize(Some(parent), f)).collect()
    }

    fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        match &mut self.slots[id.index()].payload {
            Payload::List { children: slot, .. } | Payload::Composite { children: slot, .. } => {
                *slot = children;
            }
            Payload::Value(_) => unreachable!("value nodes have no children"),
        }
    }

    fn append(&mut self, list: NodeId, id: NodeId) {
        match &mut self.slots[list.index()].payload {
            Payload::List { children, .. } => children.push(id),
            _ => unreachable!("append targets are validated as lists"),
        }
    }

    fn alloc(&mut self, parent: Option<NodeId>, payload: Payload) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Slot { parent, payload });
        id
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.slots.len()
    }
}

impl Debug for Tree {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (MutationGate, Tree) {
        let gate = MutationGate::new();
        let mut tree = {
            let _open = gate.open_scope();
            Tree::new_class("com/example/Greeter", "java/lang/Object", gate.clone()).unwrap()
        };
        let _open = gate.open_scope();
        let mods = tree.class_child(layout::class::MODIFIERS);
        tree.push_int(mods, 0x21).unwrap();
        let greet = tree.push_method("greet", "(Ljava/lang/String;)V").unwrap();
        tree.push_parameter(greet, "who", "Ljava/lang/String;").unwrap();
        tree.push_instruction(greet, 25, &["who"]).unwrap();
        tree.push_instruction(greet, 182, &["java/io/PrintStream", "println"]).unwrap();
        tree.push_instruction(greet, 177, &[]).unwrap();
        tree.push_field("greeting", "Ljava/lang/String;").unwrap();
        (gate, tree)
    }

    #[test]
    fn every_node_walks_back_to_the_root() {
        let (_gate, tree) = sample();
        for raw in 0..tree.node_count() {
            let id = NodeId(raw as u32);
            if tree.parent(id).is_none() {
                assert_eq!(id, tree.root());
                continue;
            }
            let mut current = id;
            while let Some(parent) = tree.parent(current) {
                assert!(
                    tree.children(parent).contains(&current),
                    "{:?} missing from its parent's child list",
                    current
                );
                current = parent;
            }
            assert_eq!(current, tree.root());
        }
    }

    #[test]
    fn named_nodes_have_exactly_name_and_value() {
        let (gate, mut tree) = sample();
        let _open = gate.open_scope();
        let attrs = tree.class_child(layout::class::ATTRIBUTES);
        let named = tree.push_named(attrs, "Signature", Scalar::from("Ljava/lang/Object;")).unwrap();
        let children = tree.children(named);
        assert_eq!(children.len(), 2);
        assert_eq!(tree.name_of(named), Some("Signature"));
        assert_eq!(
            tree.value(children[layout::named::VALUE]).and_then(Scalar::as_str),
            Some("Ljava/lang/Object;")
        );
    }

    #[test]
    fn copy_from_replaces_content_and_detaches_the_old() {
        let (gate, mut tree) = sample();
        let greet = tree.method_named("greet").unwrap();
        let old_name = tree.children(greet)[layout::method::NAME];
        let _open = gate.open_scope();
        tree.copy_from(old_name, &Fragment::str("salute")).unwrap();
        assert_eq!(tree.name_of(greet), Some("salute"));

        // replacing the whole method swaps its children out
        let replacement = {
            let donor_gate = MutationGate::new();
            let _open = donor_gate.open_scope();
            let mut donor =
                Tree::new_class("com/example/Donor", "java/lang/Object", donor_gate.clone())
                    .unwrap();
            let m = donor.push_method("farewell", "()V").unwrap();
            donor.fragment(m)
        };
        let old_children = tree.children(greet).to_vec();
        tree.copy_from(greet, &replacement).unwrap();
        assert_eq!(tree.name_of(greet), Some("farewell"));
        for old in old_children {
            assert_eq!(tree.parent(old), None);
            assert!(tree.path_from_root(old).is_err());
        }
    }

    #[test]
    fn deep_copies_are_equal_but_share_nothing() {
        let (gate, mut tree) = sample();
        let greet = tree.method_named("greet").unwrap();
        let snapshot = tree.fragment(greet);
        assert_eq!(snapshot, tree.fragment(greet));

        // mutating the source afterwards must not show through
        let _open = gate.open_scope();
        let name = tree.children(greet)[layout::method::NAME];
        tree.copy_from(name, &Fragment::str("changed")).unwrap();
        assert_ne!(snapshot, tree.fragment(greet));
        match &snapshot {
            Fragment::Composite { tag: Tag::Method, children } => {
                assert_eq!(children[layout::method::NAME], Fragment::str("greet"));
            }
            other => panic!("expected a method snapshot, got {:?}", other),
        }
    }

    #[test]
    fn mutators_fail_while_the_gate_is_closed() {
        let (_gate, mut tree) = sample();
        let greet = tree.method_named("greet").unwrap();
        let name = tree.children(greet)[layout::method::NAME];
        let mods = tree.class_child(layout::class::MODIFIERS);

        assert_eq!(tree.copy_from(name, &Fragment::str("nope")), Err(TreeError::GateClosed));
        assert_eq!(tree.remove(mods, 0, 1), Err(TreeError::GateClosed));
        assert_eq!(
            tree.insert_copy(mods, 0, &FragmentList::new(Tag::Value, vec![]).unwrap()),
            Err(TreeError::GateClosed)
        );
        assert_eq!(tree.push_method("m", "()V").err(), Some(TreeError::GateClosed));
    }

    #[test]
    fn remove_is_half_open_and_tolerates_empty_ranges() {
        let (gate, mut tree) = sample();
        let _open = gate.open_scope();
        let inner = tree.class_child(layout::class::INNER_CLASSES);
        for name in &["A", "B", "C", "D"] {
            tree.push_str(inner, name).unwrap();
        }
        tree.remove(inner, 2, 2).unwrap();
        assert_eq!(tree.children(inner).len(), 4);
        tree.remove(inner, 1, 3).unwrap();
        let left: Vec<&str> = tree
            .children(inner)
            .iter()
            .filter_map(|id| tree.value(*id).and_then(Scalar::as_str))
            .collect();
        assert_eq!(left, ["A", "D"]);
        assert_eq!(
            tree.remove(inner, 1, 5),
            Err(TreeError::OutOfRange { index: 5, len: 2 })
        );
    }

    #[test]
    fn slice_replacement_keeps_the_flanks() {
        let (gate, mut tree) = sample();
        let _open = gate.open_scope();
        let inner = tree.class_child(layout::class::INNER_CLASSES);
        for name in &["a", "b", "c", "d"] {
            tree.push_str(inner, name).unwrap();
        }
        let replacement = FragmentList::new(
            Tag::Value,
            vec![Fragment::str("x"), Fragment::str("y"), Fragment::str("z")],
        )
        .unwrap();
        tree.remove(inner, 1, 3).unwrap();
        tree.insert_copy(inner, 1, &replacement).unwrap();
        let names: Vec<&str> = tree
            .children(inner)
            .iter()
            .filter_map(|id| tree.value(*id).and_then(Scalar::as_str))
            .collect();
        assert_eq!(names, ["a", "x", "y", "z", "d"]);
        for child in tree.children(inner).to_vec() {
            assert_eq!(tree.parent(child), Some(inner));
        }
    }

    #[test]
    fn element_tags_must_match_on_insert() {
        let (gate, mut tree) = sample();
        let _open = gate.open_scope();
        let mods = tree.class_child(layout::class::MODIFIERS);
        let methods = tree.class_child(layout::class::METHODS);
        let method_frags = FragmentList::of_range(&tree, methods, 0, 1).unwrap();
        assert_eq!(
            tree.insert_copy(mods, 0, &method_frags),
            Err(TreeError::VariantMismatch { expected: Tag::Value, found: Tag::Method })
        );
    }

    #[test]
    fn paths_round_trip() {
        let (_gate, tree) = sample();
        let greet = tree.method_named("greet").unwrap();
        let instructions = tree.children(greet)[layout::method::INSTRUCTIONS];
        let second = tree.children(instructions)[1];
        let path = tree.path_from_root(second).unwrap();
        assert_eq!(tree.at_path(&path).unwrap(), second);
        assert!(tree.at_path(&[9]).is_err());
    }

    #[test]
    fn render_shows_the_shape() {
        let (_gate, tree) = sample();
        let rendered = tree.render();
        assert!(rendered.starts_with("Class\n"));
        assert!(rendered.contains("Str(\"greet\")"));
        assert!(rendered.contains("list[Instruction]"));
    }
}

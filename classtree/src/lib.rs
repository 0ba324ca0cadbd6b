#![forbid(unsafe_code)]
#![deny(clippy::all)]

//! A tree model of bytecode classes.
//!
//! Every class lives in its own [`Tree`]: an arena of nodes addressed by
//! [`NodeId`], with parent back-links kept consistent with the ordered child
//! lists at all times. Leaves are [`Scalar`] value nodes, sequences are list
//! nodes carrying an element [`Tag`], and everything else is a fixed-layout
//! composite (class, method, field, parameter, instruction, or the two-child
//! named node).
//!
//! Mutation is only permitted while the tree's [`MutationGate`] is open. The
//! gate is a cloneable handle shared by every tree a processor owns, so a
//! single scope can open mutation for a parse or a write pass and restore the
//! previous state on the way out:
//!
//! ```
//! use classtree::{MutationGate, Tree};
//!
//! let gate = MutationGate::new();
//! let tree = {
//!     let _open = gate.open_scope();
//!     Tree::new_class("com/example/Greeter", "java/lang/Object", gate.clone()).unwrap()
//! };
//! // the gate is closed again, mutators now fail
//! assert!(tree.gate().ensure_open().is_err());
//! ```
//!
//! Detached deep snapshots are [`Fragment`]s (and [`FragmentList`]s for list
//! ranges). A fragment never shares structure with the tree it was taken
//! from, which makes it the interchange value for cross-tree copies and for
//! replacements applied long after the snapshot was taken.

mod fragment;
mod gate;
mod tree;

pub use crate::{
    fragment::{Fragment, FragmentList},
    gate::{MutationGate, OpenScope},
    tree::{layout, NodeId, Scalar, Tag, Tree, TreeError},
};

//! Subtype queries over the single-inheritance superclass graph, backed by a
//! header cache that answers from the live tree for classes already written.

use crate::{error::Error, Processor};
use std::{collections::HashSet, sync::Arc};
use tracing::trace;

/// Root of the class hierarchy, the fallback answer for every query that
/// leaves the single-inheritance chain.
pub const OBJECT: &str = "java/lang/Object";

const ACC_INTERFACE: i64 = 0x0200;

/// Cached header of one class: direct superclass and whether the class is an
/// interface. Keyed by internal name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClassInfo {
    /// `None` at the root of the hierarchy.
    pub superclass: Option<String>,
    pub is_interface: bool,
}

impl Processor {
    /// Least common ancestor of two types in the superclass graph. Falls
    /// back to [`OBJECT`] when either side is the root or an interface, or
    /// when the chains never meet.
    pub fn common_super_class(&self, type1: &str, type2: &str) -> crate::Result<String> {
        if type1 == OBJECT || type2 == OBJECT {
            return Ok(OBJECT.to_string());
        }
        if type1 == type2 {
            return Ok(type1.to_string());
        }
        if self.is_derived_from(type1, type2)? {
            return Ok(type2.to_string());
        }
        if self.is_derived_from(type2, type1)? {
            return Ok(type1.to_string());
        }
        if self.class_info(type1)?.is_interface || self.class_info(type2)?.is_interface {
            return Ok(OBJECT.to_string());
        }

        // walk type1's chain upward until it dominates type2
        let mut seen = HashSet::new();
        let mut current = type1.to_string();
        loop {
            current = match &self.class_info(&current)?.superclass {
                Some(superclass) => superclass.clone(),
                None => return Ok(OBJECT.to_string()),
            };
            if current == OBJECT || !seen.insert(current.clone()) {
                return Ok(OBJECT.to_string());
            }
            if self.is_derived_from(type2, &current)? {
                return Ok(current);
            }
        }
    }

    /// Whether `subtype`'s superclass chain passes through `supertype`. A
    /// revisited name means a malformed cycle and answers `false`.
    pub fn is_derived_from(&self, subtype: &str, supertype: &str) -> crate::Result<bool> {
        let mut seen = HashSet::new();
        let mut current = self.class_info(subtype)?.superclass.clone();
        while let Some(name) = current {
            if name == supertype {
                return Ok(true);
            }
            if name == OBJECT || !seen.insert(name.clone()) {
                return Ok(false);
            }
            current = self.class_info(&name)?.superclass.clone();
        }
        Ok(false)
    }

    /// Cached header lookup. Classes the processor holds answer from their
    /// live tree once modified, from their raw header otherwise; everything
    /// else is fetched from the platform.
    pub fn class_info(&self, name: &str) -> crate::Result<Arc<ClassInfo>> {
        if let Some(info) = self.info_cache.lock().get(name) {
            return Ok(info.clone());
        }
        trace!(class = %name, "loading class header");
        let info = Arc::new(self.load_class_info(name)?);
        Ok(self.info_cache.lock().entry(name.to_string()).or_insert(info).clone())
    }

    fn load_class_info(&self, name: &str) -> crate::Result<ClassInfo> {
        if let Some(provider) = self.classes.get(name) {
            let provider = provider.lock();
            if let Some(tree) = provider.modified_tree() {
                let tree = tree.lock();
                let superclass = match tree.superclass() {
                    "" => None,
                    s => Some(s.to_string()),
                };
                let is_interface =
                    tree.modifier_values().iter().any(|m| m & ACC_INTERFACE != 0);
                return Ok(ClassInfo { superclass, is_interface });
            }
            let bytes = provider.bytes()?;
            return self.frontend.read_header(&bytes);
        }
        let platform =
            self.platform.as_ref().ok_or_else(|| Error::TypeNotPresent(name.to_string()))?;
        let bytes = platform.class_bytecode(name)?;
        self.frontend.read_header(&bytes)
    }
}

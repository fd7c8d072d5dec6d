//! Struct Layout Resolution
//!
//! This module flattens (possibly nested) struct-typed values into a linear
//! sequence of `(offset, size)` entries, keyed by dotted member path. The
//! running offset after the last member is the aggregate's total byte size,
//! used both for copy sizing and for heap allocation sizing.
//!
//! Layouts are computed once per concrete struct and cached by mangled name;
//! stores share them by reference.

use crate::common::types::{StructRegistry, Type, WORD};
use std::collections::HashMap;
use std::rc::Rc;

/// One flattened leaf: where a primitive field lives inside its aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    /// Byte offset from the aggregate's base.
    pub offset: u64,
    /// Leaf size in bytes.
    pub size: u64,
}

/// The flattened layout of one bound value.
///
/// Nested structs-within-structs are fully expanded: every entry is a
/// primitive leaf, addressed by its dotted path from the root
/// (`"pos.x"`, `"a.b.c"`). A non-struct value flattens to a single entry
/// with an empty path.
#[derive(Clone, Debug, Default)]
pub struct StructLayout {
    entries: Vec<FieldSlot>,
    index: HashMap<String, usize>,
    /// Total byte size of the aggregate.
    pub size: u64,
}

impl StructLayout {
    /// Flatten `ty` into a layout.
    ///
    /// Panics if a member's size cannot be determined at compile time
    /// (a variadic parameter reaching this point is a compiler-internal
    /// error: the semantic phase must have resolved every field).
    pub fn compute(ty: &Type, registry: &StructRegistry) -> StructLayout {
        let mut layout = StructLayout::default();
        layout.visit("", ty, registry);
        layout
    }

    fn visit(&mut self, path: &str, ty: &Type, registry: &StructRegistry) {
        match ty {
            Type::Struct(name) => {
                let def = registry
                    .get(name)
                    .unwrap_or_else(|| panic!("unresolved struct `{}` during layout", name));
                for (member, member_ty) in &def.fields {
                    let child = if path.is_empty() {
                        member.clone()
                    } else {
                        format!("{}.{}", path, member)
                    };
                    self.visit(&child, member_ty, registry);
                }
            }
            _ => {
                let size = leaf_size(ty).unwrap_or_else(|| {
                    panic!("size of `{}` not known at compile time", ty)
                });
                let slot = FieldSlot {
                    offset: self.size,
                    size,
                };
                self.index.insert(path.to_string(), self.entries.len());
                self.entries.push(slot);
                self.size += size;
            }
        }
    }

    /// Look up the leaf slot for a dotted member path.
    pub fn slot(&self, path: &str) -> Option<FieldSlot> {
        self.index.get(path).map(|&i| self.entries[i])
    }

    /// Byte offset of a top-level member, flattened or not: the offset of
    /// the member itself if it is a leaf, or of its first flattened leaf.
    pub fn member_offset(&self, member: &str) -> Option<u64> {
        if let Some(slot) = self.slot(member) {
            return Some(slot.offset);
        }
        let prefix = format!("{}.", member);
        self.index
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(_, &i)| self.entries[i].offset)
            .min()
    }

    pub fn entries(&self) -> &[FieldSlot] {
        &self.entries
    }
}

/// Size in bytes of a primitive leaf, when known.
///
/// Reference types occupy one pointer-width word inside an aggregate.
fn leaf_size(ty: &Type) -> Option<u64> {
    match ty {
        Type::Str | Type::Array(_) => Some(WORD),
        Type::Struct(_) => None,
        _ => ty.native_size_bits().map(|bits| bits as u64 / 8),
    }
}

/// Memoizing layout cache, one per compilation session.
///
/// Concrete struct layouts are computed once and shared; other types are
/// cheap single-leaf layouts computed on demand.
#[derive(Debug, Default)]
pub struct LayoutCache {
    by_name: HashMap<String, Rc<StructLayout>>,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    pub fn layout_of(&mut self, ty: &Type, registry: &StructRegistry) -> Rc<StructLayout> {
        match ty {
            Type::Struct(name) => {
                if let Some(cached) = self.by_name.get(name) {
                    return Rc::clone(cached);
                }
                let layout = Rc::new(StructLayout::compute(ty, registry));
                self.by_name.insert(name.clone(), Rc::clone(&layout));
                layout
            }
            _ => Rc::new(StructLayout::compute(ty, registry)),
        }
    }
}

//! Type definitions.
//!
//! A [`TypeDef`] is an immutable value: changing a class attribute or a
//! declared attribute produces a new *generation* of the same type (same
//! [`TypeHandle`]), never an in-place edit. Definitions are shared as
//! [`TypeRef`] (`Arc<TypeDef>`).
//!
//! ## Identity
//!
//! Two definitions may share a `type_id` yet come from different places: one
//! fixed in code (static) and one rebuilt from the graph (dynamic). They are
//! told apart by their handle, not their id:
//!
//! ```text
//! static  Entity  (handle 3)  ──┐
//!                               ├── same id, TypeRef::same() == false
//! dynamic Entity  (handle 41) ──┘
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeSpec;
use crate::error::{Result, TypeError};
use crate::value::Value;
use crate::{TypeId, ID_KEY, TYPE_TAG};

// ============================================================================
// Handles
// ============================================================================

static NEXT_TYPE_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(NonZeroU64);

impl TypeHandle {
    pub fn fresh() -> Self {
        let raw = NEXT_TYPE_HANDLE.fetch_add(1, Ordering::Relaxed);
        // Counter starts at 1 and would need 2^64 allocations to wrap.
        TypeHandle(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Declared in code, fixed for the process lifetime.
    Static,
    /// Created at runtime or rebuilt from the graph.
    Dynamic,
}

// ============================================================================
// TypeDef
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub handle: TypeHandle,
    pub id: TypeId,
    pub origin: Origin,
    pub bases: Vec<TypeId>,
    /// Class-level scalars declared on this type (not inherited ones).
    pub class_attributes: BTreeMap<String, Value>,
    /// Attributes declared directly on this type.
    pub declared_attributes: BTreeMap<String, AttributeSpec>,
    pub generation: u64,
}

pub type TypeRef = Arc<TypeDef>;

impl TypeDef {
    pub fn new(id: impl Into<TypeId>, origin: Origin, bases: Vec<TypeId>, members: Members) -> Self {
        Self {
            handle: TypeHandle::fresh(),
            id: id.into(),
            origin,
            bases,
            class_attributes: members.class_attributes,
            declared_attributes: members.attributes,
            generation: 0,
        }
    }

    /// Definitions are the same type iff they share a handle.
    pub fn same(&self, other: &TypeDef) -> bool {
        self.handle == other.handle
    }

    pub fn is_static(&self) -> bool {
        self.origin == Origin::Static
    }

    /// Reject reserved names. Run before a definition is registered.
    pub fn validate(&self) -> Result<()> {
        for name in self.class_attributes.keys() {
            if name == TYPE_TAG || name == ID_KEY {
                return Err(TypeError::ReservedAttribute {
                    type_id: self.id.clone(),
                    name: name.clone(),
                });
            }
        }
        if self.declared_attributes.contains_key(TYPE_TAG) {
            return Err(TypeError::ReservedAttribute {
                type_id: self.id.clone(),
                name: TYPE_TAG.to_string(),
            });
        }
        Ok(())
    }

    fn next_generation(&self) -> TypeDef {
        let mut next = self.clone();
        next.generation += 1;
        next
    }

    /// New generation with `name` set (or removed, for `Null`).
    pub fn with_class_attribute(&self, name: impl Into<String>, value: impl Into<Value>) -> TypeDef {
        let mut next = self.next_generation();
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            next.class_attributes.remove(&name);
        } else {
            next.class_attributes.insert(name, value);
        }
        next
    }

    pub fn with_class_attributes(&self, attrs: BTreeMap<String, Value>) -> TypeDef {
        let mut next = self.next_generation();
        next.class_attributes = attrs;
        next
    }

    pub fn with_attribute(&self, name: impl Into<String>, spec: AttributeSpec) -> TypeDef {
        let mut next = self.next_generation();
        next.declared_attributes.insert(name.into(), spec);
        next
    }

    pub fn without_attribute(&self, name: &str) -> TypeDef {
        let mut next = self.next_generation();
        next.declared_attributes.remove(name);
        next
    }

    pub fn with_bases(&self, bases: Vec<TypeId>) -> TypeDef {
        let mut next = self.next_generation();
        next.bases = bases;
        next
    }

    /// Same contents, fresh identity and the given origin.
    pub fn reborn(&self, origin: Origin) -> TypeDef {
        TypeDef {
            handle: TypeHandle::fresh(),
            origin,
            generation: 0,
            ..self.clone()
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Attribute and class-attribute members of a type under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Members {
    pub attributes: BTreeMap<String, AttributeSpec>,
    pub class_attributes: BTreeMap<String, Value>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.attributes.insert(name.into(), spec);
        self
    }

    pub fn class_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.class_attributes.insert(name.into(), value.into());
        self
    }
}

/// A static type declaration, collected before registration.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub id: TypeId,
    pub bases: Vec<TypeId>,
    pub members: Members,
}

impl TypeDecl {
    pub fn new<B: Into<TypeId>>(id: impl Into<TypeId>, bases: impl IntoIterator<Item = B>) -> Self {
        Self {
            id: id.into(),
            bases: bases.into_iter().map(Into::into).collect(),
            members: Members::default(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.members = self.members.attribute(name, spec);
        self
    }

    pub fn class_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.members = self.members.class_attribute(name, value);
        self
    }

    pub fn into_static(self) -> TypeDef {
        TypeDef::new(self.id, Origin::Static, self.bases, self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_keep_identity() {
        let t = TypeDecl::new("Thing", ["Entity"]).into_static();
        let t2 = t.with_class_attribute("colour", "red");
        assert!(t.same(&t2));
        assert_eq!(t2.generation, t.generation + 1);
        assert!(t.class_attributes.is_empty());
        let t3 = t2.with_class_attribute("colour", Value::Null);
        assert!(!t3.class_attributes.contains_key("colour"));
    }

    #[test]
    fn reborn_types_are_distinct() {
        let t = TypeDecl::new("Thing", ["Entity"]).into_static();
        let d = t.reborn(Origin::Dynamic);
        assert_eq!(t.id, d.id);
        assert!(!t.same(&d));
    }

    #[test]
    fn reserved_names_are_rejected() {
        let t = TypeDecl::new("Thing", ["Entity"])
            .class_attribute("id", "x")
            .into_static();
        assert!(matches!(t.validate(), Err(TypeError::ReservedAttribute { .. })));

        let t = TypeDecl::new("Thing", ["Entity"])
            .attribute(TYPE_TAG, AttributeSpec::string())
            .into_static();
        assert!(matches!(t.validate(), Err(TypeError::ReservedAttribute { .. })));
    }
}

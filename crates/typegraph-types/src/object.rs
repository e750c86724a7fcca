//! Persistable objects.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeSpec;
use crate::error::{Result, TypeError};
use crate::registry::RegistrySnapshot;
use crate::types::TypeRef;
use crate::value::{Properties, Value};
use crate::TypeId;

/// Where a loaded object lives: the store that produced it and the element
/// id inside that store. Attached explicitly to objects read from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub store_token: u64,
    pub element_id: u32,
}

/// An instance of a registered type. Values are kept in native form.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub type_ref: TypeRef,
    pub values: Properties,
    pub handle: Option<ObjectHandle>,
}

impl Instance {
    /// A fresh instance with every resolved attribute at its initial value.
    pub fn new(registry: &RegistrySnapshot, type_id: &str) -> Result<Self> {
        let type_ref = registry.get_class_by_id(type_id)?;
        let descriptor = registry.get_descriptor_by_id(type_id)?;
        let values = descriptor
            .attributes
            .iter()
            .map(|(name, r)| (name.clone(), r.spec.initial_value()))
            .collect();
        Ok(Self {
            type_ref,
            values,
            handle: None,
        })
    }

    /// An instance with exactly the given values and no construction
    /// side effects.
    pub fn from_parts(type_ref: TypeRef, values: Properties) -> Self {
        Self {
            type_ref,
            values,
            handle: None,
        }
    }

    pub fn type_id(&self) -> &TypeId {
        &self.type_ref.id
    }

    pub fn get(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(name).unwrap_or(&NULL)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }
}

/// An attribute declaration read back from its graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    pub name: String,
    pub spec: AttributeSpec,
}

/// An instance of a relationship type connecting two objects.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipInstance {
    pub instance: Instance,
    pub start: Option<Box<Persistable>>,
    pub end: Option<Box<Persistable>>,
}

impl RelationshipInstance {
    pub fn new(registry: &RegistrySnapshot, type_id: &str) -> Result<Self> {
        let descriptor = registry.get_descriptor_by_id(type_id)?;
        if !descriptor.is_relationship {
            return Err(TypeError::UnsupportedTypeError(format!(
                "`{type_id}` is not a relationship type"
            )));
        }
        Ok(Self {
            instance: Instance::new(registry, type_id)?,
            start: None,
            end: None,
        })
    }

    pub fn between(mut self, start: impl Into<Persistable>, end: impl Into<Persistable>) -> Self {
        self.start = Some(Box::new(start.into()));
        self.end = Some(Box::new(end.into()));
        self
    }

    pub fn type_id(&self) -> &TypeId {
        self.instance.type_id()
    }
}

/// Everything the mapper knows how to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum Persistable {
    Type(TypeRef),
    Attribute(AttributeDecl),
    Instance(Instance),
    Relationship(RelationshipInstance),
}

impl Persistable {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Persistable::Type(t) => format!("type {}", t.id),
            Persistable::Attribute(a) => format!("attribute {}", a.name),
            Persistable::Instance(i) => format!("{} instance", i.type_id()),
            Persistable::Relationship(r) => format!("{} relationship", r.type_id()),
        }
    }

    pub fn handle(&self) -> Option<ObjectHandle> {
        match self {
            Persistable::Instance(i) => i.handle,
            Persistable::Relationship(r) => r.instance.handle,
            Persistable::Type(_) | Persistable::Attribute(_) => None,
        }
    }

    pub fn as_type(&self) -> Option<&TypeRef> {
        match self {
            Persistable::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Persistable::Instance(i) => Some(i),
            _ => None,
        }
    }
}

impl From<TypeRef> for Persistable {
    fn from(t: TypeRef) -> Self {
        Persistable::Type(t)
    }
}

impl From<Instance> for Persistable {
    fn from(i: Instance) -> Self {
        Persistable::Instance(i)
    }
}

impl From<RelationshipInstance> for Persistable {
    fn from(r: RelationshipInstance) -> Self {
        Persistable::Relationship(r)
    }
}

impl From<AttributeDecl> for Persistable {
    fn from(a: AttributeDecl) -> Self {
        Persistable::Attribute(a)
    }
}

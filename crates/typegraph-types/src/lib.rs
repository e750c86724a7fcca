//! Typegraph type system
//!
//! Values, attribute specifications, type definitions and the registry that
//! resolves them. Nothing in this crate talks to a graph store.
//!
//! ```text
//! TypeCollector ──► TypeRegistry ──► RegistrySnapshot (Arc, copy-on-write)
//!                        │                 │
//!                  create_type()     Descriptor per type
//!                                    (C3 linearization, resolved attributes)
//! ```

pub mod attribute;
pub mod collector;
pub mod descriptor;
pub mod error;
pub mod linearize;
pub mod object;
pub mod registry;
pub mod types;
pub mod value;

pub use attribute::{AttributeKind, AttributeSpec};
pub use collector::{builtin_types, TypeCollector};
pub use descriptor::{Descriptor, ResolvedAttribute};
pub use error::{LinearizationError, Result, TypeError, ValueError};
pub use linearize::{c3_linearize, linearize_hierarchy};
pub use object::{AttributeDecl, Instance, ObjectHandle, Persistable, RelationshipInstance};
pub use registry::{RegistrySnapshot, TypeRegistry};
pub use types::{Members, Origin, TypeDecl, TypeDef, TypeHandle, TypeRef};
pub use value::{Properties, Value};

/// Type identifier.
pub type TypeId = String;

// ============================================================================
// Well-known names
// ============================================================================

/// Reserved property naming the type a property map deserializes to.
pub const TYPE_TAG: &str = "__type__";
/// Property holding a type's id (and the TypeSystem node's id).
pub const ID_KEY: &str = "id";

/// Metatype of all persisted types; also the label on type nodes.
pub const PERSISTABLE_TYPE: &str = "PersistableType";
/// Root of every persisted hierarchy.
pub const ROOT_TYPE: &str = "AttributedBase";
pub const ENTITY_TYPE: &str = "Entity";
pub const RELATIONSHIP_TYPE: &str = "Relationship";
pub const IS_A: &str = "IsA";
pub const INSTANCE_OF: &str = "InstanceOf";
pub const DECLARED_ON: &str = "DeclaredOn";
pub const DEFINES: &str = "Defines";
/// Label and tag of the node anchoring the persisted type system.
pub const TYPE_SYSTEM: &str = "TypeSystem";

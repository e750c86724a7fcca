//! Typegraph storage: typed objects and their type hierarchy on a graph
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Manager                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐   ┌─────────────┐   ┌──────────────────────┐  │
//! │  │ GraphMapper  │   │ Hierarchy   │   │ VersionCache         │  │
//! │  │ dicts,       │   │ Consistency │   │ TypeSystem.version   │  │
//! │  │ lookups,     │   │ Engine      │   │ + loaded registries  │  │
//! │  │ merges       │   │ (reparent)  │   │                      │  │
//! │  └──────┬───────┘   └──────┬──────┘   └──────────┬───────────┘  │
//! │         └──────────────────┼─────────────────────┘              │
//! │                            ▼                                    │
//! │                 RegistrySnapshot (typegraph-types)              │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              ▼
//!                    GraphStore (typegraph-store)
//! ```
//!
//! ## Key Features
//!
//! - **Types are data**: every persisted type is a `PersistableType` node
//!   linked to its bases by ordered `ISA` edges.
//! - **Idempotent**: saving a type merges it and all its ancestors.
//! - **Versioned**: structural writes bump a token on the TypeSystem node so
//!   other processes know when to reload.
//! - **Safe reparenting**: base changes are validated (cycles, C3,
//!   inherited attributes) before anything is written.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod manager;
pub mod mapper;
pub mod queries;
pub mod version;


pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use hierarchy::{
    registry_with_base_change, validate_base_change, HierarchyConsistencyEngine, ReparentPlan,
};
pub use manager::{HierarchyEntry, Manager};
pub use mapper::{get_changes, GraphMapper, Subject, TypeRelationship};
pub use queries::{parameter_map, CreateRelationship, MatchClause, NodeLookup};
pub use version::{structural_digest, CacheKey, VersionCache};

//! Typegraph store: the property-graph collaborator
//!
//! The persistence layer talks to a graph through the [`GraphStore`] trait:
//!
//! ```text
//! ┌──────────────────────┐        ┌────────────────────────────────┐
//! │  typegraph-storage   │        │  GraphStore                    │
//! │  (mapper, manager)   │──────► │  - create / merge / delete     │
//! └──────────────────────┘        │  - indexed exact-match lookup  │
//!                                 │  - neighbour traversal         │
//!                                 │  - unique indexes              │
//!                                 │  - raw query passthrough       │
//!                                 └───────────────┬────────────────┘
//!                                                 │
//!                                     ┌───────────┴──────────┐
//!                                     │ MemoryGraph          │
//!                                     │ (roaring label index,│
//!                                     │  bincode snapshots)  │
//!                                     └──────────────────────┘
//! ```
//!
//! Every trait call is atomic with respect to other calls on the same store.
//! There are no multi-call transactions.

pub mod branding;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod vocab;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use typegraph_types::{Properties, Value};

pub use branding::StoreToken;
pub use error::{Result, StoreError};
pub use memory::MemoryGraph;
pub use pattern::{
    MergeAnchor, MergeEdge, MergeNode, MergeOutcome, MergePattern, NodeIdentity, Param, Params,
};
pub use vocab::{Symbol, Vocabulary};

// ============================================================================
// Records
// ============================================================================

pub type NodeId = u32;
pub type RelId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub labels: BTreeSet<String>,
    pub properties: Properties,
}

impl NodeRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelRecord {
    pub id: RelId,
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    pub properties: Properties,
}

impl RelRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A unique index over `(label, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub label: String,
    pub key: String,
    pub entries: usize,
}

/// One cell of a raw query result row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Node(NodeRecord),
    Relationship(RelRecord),
    Value(Value),
    List(Vec<RowValue>),
}

pub type Row = Vec<RowValue>;

// ============================================================================
// Store interface
// ============================================================================

pub trait GraphStore: Send + Sync {
    /// Identity of this store instance.
    fn token(&self) -> StoreToken;

    fn create_node(&self, labels: &[String], properties: Properties) -> Result<NodeId>;

    fn create_relationship(
        &self,
        start: NodeId,
        rel_type: &str,
        end: NodeId,
        properties: Properties,
    ) -> Result<RelId>;

    /// Create-if-absent over a multi-node/edge pattern.
    fn merge(&self, pattern: &MergePattern, params: &Params) -> Result<MergeOutcome>;

    /// Exact-match lookup of the single node with `label` and `key = value`.
    fn lookup(&self, label: &str, key: &str, value: &Value) -> Result<Option<NodeRecord>>;

    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>>;

    fn relationship(&self, id: RelId) -> Result<Option<RelRecord>>;

    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeRecord>>;

    fn relationships(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<RelRecord>>;

    /// Replace all properties of a node.
    fn set_properties(&self, id: NodeId, properties: Properties) -> Result<()>;

    /// Merge `changes` into a node's properties; `Null` removes a key.
    fn update_properties(&self, id: NodeId, changes: &Properties) -> Result<()>;

    fn set_labels(&self, id: NodeId, labels: &[String]) -> Result<()>;

    fn set_relationship_properties(&self, id: RelId, properties: Properties) -> Result<()>;

    /// Delete a node and every relationship touching it.
    fn delete_node(&self, id: NodeId) -> Result<()>;

    fn delete_relationship(&self, id: RelId) -> Result<()>;

    /// Create a unique index. Creating an existing index is a no-op.
    fn create_index(&self, label: &str, key: &str) -> Result<()>;

    fn drop_index(&self, label: &str, key: &str) -> Result<()>;

    /// Fails with [`StoreError::IndexNotFound`] when absent.
    fn index_info(&self, label: &str, key: &str) -> Result<IndexInfo>;

    fn indexes(&self) -> Result<Vec<IndexInfo>>;

    /// Raw query passthrough.
    fn execute(&self, query: &str, params: &Params) -> Result<Vec<Row>>;

    /// Remove every node, relationship and index.
    fn clear(&self) -> Result<()>;
}

//! In-memory property graph.
//!
//! `MemoryGraph` keeps nodes and edges in ordered maps guarded by one
//! `RwLock`, so each [`GraphStore`] call is atomic. Labels and relationship
//! types are interned; a roaring bitmap per label serves label scans and
//! unique indexes map canonical value keys to node ids.
//!
//! ## Snapshot format
//!
//! ```text
//! "TGMG" | version u32 | vocab len u64 | vocabulary | state len u64 | state
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use ahash::AHashMap;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use typegraph_types::{Properties, Value};

use crate::error::{Result, StoreError};
use crate::vocab::{Symbol, Vocabulary};
use crate::pattern::{MergePattern, MergeOutcome, NodeIdentity, Param, Params};
use crate::{
    Direction, GraphStore, IndexInfo, NodeId, NodeRecord, RelId, RelRecord, Row, StoreToken,
};

const SNAPSHOT_MAGIC: &[u8; 4] = b"TGMG";
const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredNode {
    labels: BTreeSet<Symbol>,
    properties: Properties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEdge {
    rel_type: Symbol,
    start: NodeId,
    end: NodeId,
    properties: Properties,
}

/// Unique index: canonical value key -> node.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct UniqueIndex {
    entries: AHashMap<String, NodeId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphState {
    nodes: BTreeMap<NodeId, StoredNode>,
    edges: BTreeMap<RelId, StoredEdge>,
    next_node: NodeId,
    next_edge: RelId,
    /// label -> nodes carrying it
    label_index: HashMap<Symbol, RoaringBitmap>,
    outgoing: HashMap<NodeId, BTreeSet<RelId>>,
    incoming: HashMap<NodeId, BTreeSet<RelId>>,
    indexes: BTreeMap<(Symbol, String), UniqueIndex>,
}

impl GraphState {
    fn node(&self, id: NodeId) -> Result<&StoredNode> {
        self.nodes.get(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn edge(&self, id: RelId) -> Result<&StoredEdge> {
        self.edges.get(&id).ok_or(StoreError::RelationshipNotFound(id))
    }

    fn nodes_with_label(&self, label: Symbol) -> impl Iterator<Item = NodeId> + '_ {
        self.label_index
            .get(&label)
            .into_iter()
            .flat_map(|bitmap| bitmap.iter())
    }

    fn find_by_key(&self, label: Option<Symbol>, key: &str, value: &Value) -> Option<NodeId> {
        if let Some(label) = label {
            if let Some(index) = self.indexes.get(&(label, key.to_string())) {
                return index.entries.get(&value.index_key()).copied();
            }
            return self
                .nodes_with_label(label)
                .find(|id| self.nodes[id].properties.get(key) == Some(value));
        }
        self.nodes
            .iter()
            .find(|(_, n)| n.properties.get(key) == Some(value))
            .map(|(id, _)| *id)
    }

    /// Index entries `node` would occupy with the given labels and props.
    fn index_keys(
        &self,
        labels: &BTreeSet<Symbol>,
        properties: &Properties,
    ) -> Vec<((Symbol, String), String, Value)> {
        self.indexes
            .keys()
            .filter(|(label, _)| labels.contains(label))
            .filter_map(|(label, key)| {
                let value = properties.get(key).filter(|v| !v.is_null())?;
                Some(((*label, key.clone()), value.index_key(), value.clone()))
            })
            .collect()
    }

    /// Fail if another node already owns one of the index entries.
    fn check_unique(
        &self,
        id: NodeId,
        labels: &BTreeSet<Symbol>,
        properties: &Properties,
        vocab: &Vocabulary,
    ) -> Result<()> {
        for ((label, key), entry, value) in self.index_keys(labels, properties) {
            let owner = self
                .indexes
                .get(&(label, key.clone()))
                .and_then(|index| index.entries.get(&entry));
            if let Some(owner) = owner {
                if *owner != id {
                    return Err(StoreError::UniqueConstraint {
                        label: vocab.resolve(label),
                        key,
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    fn unindex(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        for (index_key, entry, _) in self.index_keys(&node.labels, &node.properties) {
            if let Some(index) = self.indexes.get_mut(&index_key) {
                if index.entries.get(&entry) == Some(&id) {
                    index.entries.remove(&entry);
                }
            }
        }
        for label in &node.labels {
            if let Some(bitmap) = self.label_index.get_mut(label) {
                bitmap.remove(id);
            }
        }
    }

    fn index(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        for (index_key, entry, _) in self.index_keys(&node.labels, &node.properties) {
            if let Some(index) = self.indexes.get_mut(&index_key) {
                index.entries.insert(entry, id);
            }
        }
        for label in &node.labels {
            self.label_index.entry(*label).or_default().insert(id);
        }
    }

    /// Replace a node's labels and properties, enforcing unique indexes.
    fn put_node(
        &mut self,
        id: NodeId,
        node: StoredNode,
        vocab: &Vocabulary,
    ) -> Result<()> {
        self.check_unique(id, &node.labels, &node.properties, vocab)?;
        self.unindex(id);
        self.nodes.insert(id, node);
        self.index(id);
        Ok(())
    }

    fn insert_node(&mut self, node: StoredNode, vocab: &Vocabulary) -> Result<NodeId> {
        let id = self.next_node;
        self.put_node(id, node, vocab)?;
        self.next_node += 1;
        Ok(id)
    }

    fn insert_edge(&mut self, edge: StoredEdge) -> Result<RelId> {
        self.node(edge.start)?;
        self.node(edge.end)?;
        let id = self.next_edge;
        self.next_edge += 1;
        self.outgoing.entry(edge.start).or_default().insert(id);
        self.incoming.entry(edge.end).or_default().insert(id);
        self.edges.insert(id, edge);
        Ok(id)
    }

    fn remove_edge(&mut self, id: RelId) -> Result<()> {
        let edge = self
            .edges
            .remove(&id)
            .ok_or(StoreError::RelationshipNotFound(id))?;
        if let Some(ids) = self.outgoing.get_mut(&edge.start) {
            ids.remove(&id);
        }
        if let Some(ids) = self.incoming.get_mut(&edge.end) {
            ids.remove(&id);
        }
        Ok(())
    }

    fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        let touching: BTreeSet<RelId> = self
            .outgoing
            .get(&id)
            .into_iter()
            .chain(self.incoming.get(&id))
            .flatten()
            .copied()
            .collect();
        for rel in touching {
            self.remove_edge(rel)?;
        }
        self.unindex(id);
        self.nodes.remove(&id);
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        Ok(())
    }

    fn edges_of(&self, node: NodeId, direction: Direction) -> Vec<RelId> {
        let out = self.outgoing.get(&node).into_iter().flatten();
        let inc = self.incoming.get(&node).into_iter().flatten();
        let ids: BTreeSet<RelId> = match direction {
            Direction::Outgoing => out.copied().collect(),
            Direction::Incoming => inc.copied().collect(),
            Direction::Both => out.chain(inc).copied().collect(),
        };
        ids.into_iter().collect()
    }
}

// ============================================================================
// MemoryGraph
// ============================================================================

#[derive(Debug)]
pub struct MemoryGraph {
    token: StoreToken,
    vocab: Vocabulary,
    state: RwLock<GraphState>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            token: StoreToken::new(),
            vocab: Vocabulary::new(),
            state: RwLock::new(GraphState::default()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.state.read().edges.len()
    }

    fn intern_labels(&self, labels: &[String]) -> BTreeSet<Symbol> {
        labels.iter().map(|l| self.vocab.symbol(l)).collect()
    }

    fn node_record(&self, id: NodeId, node: &StoredNode) -> NodeRecord {
        NodeRecord {
            id,
            labels: self.vocab.resolve_all(&node.labels).into_iter().collect(),
            properties: node.properties.clone(),
        }
    }

    fn rel_record(&self, id: RelId, edge: &StoredEdge) -> RelRecord {
        RelRecord {
            id,
            rel_type: self.vocab.resolve(edge.rel_type),
            start: edge.start,
            end: edge.end,
            properties: edge.properties.clone(),
        }
    }

    fn map_param<'p>(params: &'p Params, name: &str) -> Result<&'p Properties> {
        match params.get(name) {
            Some(Param::Map(map)) => Ok(map),
            _ => Err(StoreError::MissingParameter(name.to_string())),
        }
    }

    fn scalar_param<'p>(params: &'p Params, name: &str) -> Result<&'p Value> {
        match params.get(name) {
            Some(Param::Value(value)) => Ok(value),
            _ => Err(StoreError::MissingParameter(name.to_string())),
        }
    }

    fn merge_in(
        &self,
        state: &mut GraphState,
        pattern: &MergePattern,
        params: &Params,
        created: &mut (Vec<NodeId>, Vec<RelId>),
    ) -> Result<MergeOutcome> {
        let mut outcome = MergeOutcome::default();

        if let Some(anchor) = &pattern.anchor {
            let value = Self::scalar_param(params, &anchor.param)?;
            let label = self.vocab.symbol(&anchor.label);
            let id = state
                .find_by_key(Some(label), &anchor.key, value)
                .ok_or_else(|| StoreError::AnchorNotFound {
                    label: anchor.label.clone(),
                    key: anchor.key.clone(),
                })?;
            outcome.bound.insert(anchor.alias.clone(), id);
        }

        for node in &pattern.nodes {
            let props = Self::map_param(params, &node.props_param)?;
            let label = node.label.as_ref().map(|l| self.vocab.symbol(l));
            let key_value = |key: &str| {
                props
                    .get(key)
                    .ok_or_else(|| StoreError::MissingParameter(format!("{}.{key}", node.props_param)))
            };
            let existing = match &node.identity {
                NodeIdentity::Key { key } => state.find_by_key(label, key, key_value(key)?),
                NodeIdentity::Edge {
                    rel_type,
                    target,
                    key,
                } => {
                    let target_id = *outcome
                        .bound
                        .get(target)
                        .ok_or_else(|| StoreError::UnknownAlias(target.clone()))?;
                    let rel_type = self.vocab.symbol(rel_type);
                    let value = key_value(key)?;
                    state
                        .incoming
                        .get(&target_id)
                        .into_iter()
                        .flatten()
                        .filter_map(|rel| state.edges.get(rel))
                        .filter(|edge| edge.rel_type == rel_type)
                        .map(|edge| edge.start)
                        .find(|start| {
                            let n = &state.nodes[start];
                            label.map_or(true, |l| n.labels.contains(&l))
                                && n.properties.get(key) == Some(value)
                        })
                }
            };
            let id = match existing {
                Some(id) => id,
                None => {
                    let stored = StoredNode {
                        labels: label.into_iter().collect(),
                        properties: strip_nulls(props.clone()),
                    };
                    let id = state.insert_node(stored, &self.vocab)?;
                    created.0.push(id);
                    outcome.created_nodes += 1;
                    id
                }
            };
            outcome.bound.insert(node.alias.clone(), id);
        }

        for edge in &pattern.edges {
            let from = *outcome
                .bound
                .get(&edge.from)
                .ok_or_else(|| StoreError::UnknownAlias(edge.from.clone()))?;
            let to = *outcome
                .bound
                .get(&edge.to)
                .ok_or_else(|| StoreError::UnknownAlias(edge.to.clone()))?;
            let props = match &edge.props_param {
                Some(p) => Self::map_param(params, p)?.clone(),
                None => Properties::new(),
            };
            let rel_type = self.vocab.symbol(&edge.rel_type);
            let exists = state
                .outgoing
                .get(&from)
                .into_iter()
                .flatten()
                .filter_map(|rel| state.edges.get(rel))
                .any(|e| e.rel_type == rel_type && e.end == to && e.properties == props);
            if !exists {
                let id = state.insert_edge(StoredEdge {
                    rel_type,
                    start: from,
                    end: to,
                    properties: props,
                })?;
                created.1.push(id);
                outcome.created_edges += 1;
            }
        }

        Ok(outcome)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let vocab_bytes = self.vocab.to_bytes()?;
        let state_bytes = bincode::serialize(&*self.state.read())?;

        let mut out = Vec::with_capacity(24 + vocab_bytes.len() + state_bytes.len());
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        out.extend_from_slice(&(vocab_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&vocab_bytes);
        out.extend_from_slice(&(state_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&state_bytes);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || &bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(StoreError::Snapshot("not a MemoryGraph snapshot".into()));
        }
        let version = read_u32(bytes, 4)?;
        if version != SNAPSHOT_VERSION {
            return Err(StoreError::Snapshot(format!(
                "unsupported snapshot version {version}"
            )));
        }
        let mut offset = 8;
        let vocab = Vocabulary::from_bytes(read_section(bytes, &mut offset)?)?;
        let state_bytes = read_section(bytes, &mut offset)?;
        let state: GraphState = bincode::deserialize(state_bytes)?;
        Ok(Self {
            token: StoreToken::new(),
            vocab,
            state: RwLock::new(state),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        debug!(path = %path.display(), "saved graph snapshot");
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StoreError::Snapshot("truncated header".into()))
}

fn read_section<'b>(bytes: &'b [u8], offset: &mut usize) -> Result<&'b [u8]> {
    let len = bytes
        .get(*offset..*offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| StoreError::Snapshot("truncated section length".into()))?;
    let start = *offset + 8;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .ok_or_else(|| StoreError::Snapshot(format!("section length {len} out of range")))?;
    let section = bytes
        .get(start..end)
        .ok_or_else(|| StoreError::Snapshot("truncated section".into()))?;
    *offset = end;
    Ok(section)
}

// ============================================================================
// GraphStore
// ============================================================================

impl GraphStore for MemoryGraph {
    fn token(&self) -> StoreToken {
        self.token
    }

    fn create_node(&self, labels: &[String], properties: Properties) -> Result<NodeId> {
        let node = StoredNode {
            labels: self.intern_labels(labels),
            properties: strip_nulls(properties),
        };
        self.state.write().insert_node(node, &self.vocab)
    }

    fn create_relationship(
        &self,
        start: NodeId,
        rel_type: &str,
        end: NodeId,
        properties: Properties,
    ) -> Result<RelId> {
        let edge = StoredEdge {
            rel_type: self.vocab.symbol(rel_type),
            start,
            end,
            properties: strip_nulls(properties),
        };
        self.state.write().insert_edge(edge)
    }

    fn merge(&self, pattern: &MergePattern, params: &Params) -> Result<MergeOutcome> {
        let mut state = self.state.write();
        let mut created = (Vec::new(), Vec::new());
        match self.merge_in(&mut state, pattern, params, &mut created) {
            Ok(outcome) => {
                debug!(
                    created_nodes = outcome.created_nodes,
                    created_edges = outcome.created_edges,
                    pattern = %pattern,
                    "merge"
                );
                Ok(outcome)
            }
            Err(err) => {
                // undo partial writes so the merge stays all-or-nothing
                for rel in created.1 {
                    let _ = state.remove_edge(rel);
                }
                for node in created.0 {
                    let _ = state.remove_node(node);
                }
                Err(err)
            }
        }
    }

    fn lookup(&self, label: &str, key: &str, value: &Value) -> Result<Option<NodeRecord>> {
        let Some(label) = self.vocab.find(label) else {
            return Ok(None);
        };
        let state = self.state.read();
        Ok(state
            .find_by_key(Some(label), key, value)
            .and_then(|id| state.nodes.get(&id).map(|n| self.node_record(id, n))))
    }

    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        let state = self.state.read();
        Ok(state.nodes.get(&id).map(|n| self.node_record(id, n)))
    }

    fn relationship(&self, id: RelId) -> Result<Option<RelRecord>> {
        let state = self.state.read();
        Ok(state.edges.get(&id).map(|e| self.rel_record(id, e)))
    }

    fn nodes_with_label(&self, label: &str) -> Result<Vec<NodeRecord>> {
        let Some(label) = self.vocab.find(label) else {
            return Ok(Vec::new());
        };
        let state = self.state.read();
        Ok(state
            .nodes_with_label(label)
            .filter_map(|id| state.nodes.get(&id).map(|n| self.node_record(id, n)))
            .collect())
    }

    fn relationships(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<RelRecord>> {
        let state = self.state.read();
        state.node(node)?;
        let wanted = match rel_type {
            Some(t) => match self.vocab.find(t) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(state
            .edges_of(node, direction)
            .into_iter()
            .filter_map(|id| state.edges.get(&id).map(|e| (id, e)))
            .filter(|(_, e)| wanted.map_or(true, |w| e.rel_type == w))
            .map(|(id, e)| self.rel_record(id, e))
            .collect())
    }

    fn set_properties(&self, id: NodeId, properties: Properties) -> Result<()> {
        let mut state = self.state.write();
        let node = StoredNode {
            labels: state.node(id)?.labels.clone(),
            properties: strip_nulls(properties),
        };
        state.put_node(id, node, &self.vocab)
    }

    fn update_properties(&self, id: NodeId, changes: &Properties) -> Result<()> {
        let mut state = self.state.write();
        let mut node = state.node(id)?.clone();
        for (key, value) in changes {
            if value.is_null() {
                node.properties.remove(key);
            } else {
                node.properties.insert(key.clone(), value.clone());
            }
        }
        state.put_node(id, node, &self.vocab)
    }

    fn set_labels(&self, id: NodeId, labels: &[String]) -> Result<()> {
        let labels = self.intern_labels(labels);
        let mut state = self.state.write();
        let node = StoredNode {
            labels,
            properties: state.node(id)?.properties.clone(),
        };
        state.put_node(id, node, &self.vocab)
    }

    fn set_relationship_properties(&self, id: RelId, properties: Properties) -> Result<()> {
        let mut state = self.state.write();
        state.edge(id)?;
        if let Some(edge) = state.edges.get_mut(&id) {
            edge.properties = strip_nulls(properties);
        }
        Ok(())
    }

    fn delete_node(&self, id: NodeId) -> Result<()> {
        self.state.write().remove_node(id)
    }

    fn delete_relationship(&self, id: RelId) -> Result<()> {
        self.state.write().remove_edge(id)
    }

    fn create_index(&self, label: &str, key: &str) -> Result<()> {
        let label_id = self.vocab.symbol(label);
        let mut state = self.state.write();
        let index_key = (label_id, key.to_string());
        if state.indexes.contains_key(&index_key) {
            return Ok(());
        }
        let mut index = UniqueIndex::default();
        for id in state.nodes_with_label(label_id) {
            let Some(value) = state.nodes[&id].properties.get(key).filter(|v| !v.is_null()) else {
                continue;
            };
            if index.entries.insert(value.index_key(), id).is_some() {
                return Err(StoreError::UniqueConstraint {
                    label: label.to_string(),
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }
        state.indexes.insert(index_key, index);
        debug!(label, key, "created unique index");
        Ok(())
    }

    fn drop_index(&self, label: &str, key: &str) -> Result<()> {
        let not_found = || StoreError::IndexNotFound {
            label: label.to_string(),
            key: key.to_string(),
        };
        let label_id = self.vocab.find(label).ok_or_else(not_found)?;
        self.state
            .write()
            .indexes
            .remove(&(label_id, key.to_string()))
            .map(|_| ())
            .ok_or_else(not_found)
    }

    fn index_info(&self, label: &str, key: &str) -> Result<IndexInfo> {
        let not_found = || StoreError::IndexNotFound {
            label: label.to_string(),
            key: key.to_string(),
        };
        let label_id = self.vocab.find(label).ok_or_else(not_found)?;
        let state = self.state.read();
        let index = state
            .indexes
            .get(&(label_id, key.to_string()))
            .ok_or_else(not_found)?;
        Ok(IndexInfo {
            label: label.to_string(),
            key: key.to_string(),
            entries: index.entries.len(),
        })
    }

    fn indexes(&self) -> Result<Vec<IndexInfo>> {
        let state = self.state.read();
        Ok(state
            .indexes
            .iter()
            .map(|((label, key), index)| IndexInfo {
                label: self.vocab.resolve(*label),
                key: key.clone(),
                entries: index.entries.len(),
            })
            .collect())
    }

    fn execute(&self, query: &str, _params: &Params) -> Result<Vec<Row>> {
        debug!(query, "raw query rejected");
        Err(StoreError::Unsupported(
            "MemoryGraph does not evaluate query text".into(),
        ))
    }

    fn clear(&self) -> Result<()> {
        *self.state.write() = GraphState::default();
        Ok(())
    }
}

fn strip_nulls(properties: Properties) -> Properties {
    properties.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{MergeAnchor, MergeEdge, MergeNode};

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let g = MemoryGraph::new();
        g.create_index("Thing", "code").unwrap();
        g.create_node(&labels(&["Thing"]), props(&[("code", "a".into())]))
            .unwrap();
        let err = g
            .create_node(&labels(&["Thing"]), props(&[("code", "a".into())]))
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueConstraint { .. }));
        assert_eq!(g.node_count(), 1);

        // other labels are unconstrained
        g.create_node(&labels(&["Other"]), props(&[("code", "a".into())]))
            .unwrap();
    }

    #[test]
    fn update_properties_removes_nulls_and_reindexes() {
        let g = MemoryGraph::new();
        g.create_index("Thing", "code").unwrap();
        let id = g
            .create_node(&labels(&["Thing"]), props(&[("code", "a".into()), ("x", 1.into())]))
            .unwrap();
        g.update_properties(id, &props(&[("code", "b".into()), ("x", Value::Null)]))
            .unwrap();

        let node = g.node(id).unwrap().unwrap();
        assert_eq!(node.get("x"), None);
        assert!(g.lookup("Thing", "code", &"a".into()).unwrap().is_none());
        assert_eq!(g.lookup("Thing", "code", &"b".into()).unwrap().unwrap().id, id);
    }

    #[test]
    fn delete_node_detaches_relationships() {
        let g = MemoryGraph::new();
        let a = g.create_node(&[], Properties::new()).unwrap();
        let b = g.create_node(&[], Properties::new()).unwrap();
        g.create_relationship(a, "KNOWS", b, Properties::new()).unwrap();
        g.delete_node(b).unwrap();
        assert!(g.relationships(a, Direction::Both, None).unwrap().is_empty());
        assert_eq!(g.relationship_count(), 0);
    }

    #[test]
    fn merge_is_idempotent() {
        let g = MemoryGraph::new();
        g.create_node(&labels(&["Root"]), props(&[("id", "r".into())]))
            .unwrap();

        let pattern = MergePattern {
            anchor: Some(MergeAnchor {
                alias: "root".into(),
                label: "Root".into(),
                key: "id".into(),
                param: "root_id".into(),
            }),
            nodes: vec![
                MergeNode {
                    alias: "t".into(),
                    label: Some("T".into()),
                    props_param: "t_props".into(),
                    identity: NodeIdentity::Key { key: "id".into() },
                },
                MergeNode {
                    alias: "a".into(),
                    label: None,
                    props_param: "a_props".into(),
                    identity: NodeIdentity::Edge {
                        rel_type: "ON".into(),
                        target: "t".into(),
                        key: "name".into(),
                    },
                },
            ],
            edges: vec![
                MergeEdge {
                    from: "root".into(),
                    rel_type: "HAS".into(),
                    to: "t".into(),
                    props_param: Some("has_props".into()),
                },
                MergeEdge {
                    from: "a".into(),
                    rel_type: "ON".into(),
                    to: "t".into(),
                    props_param: None,
                },
            ],
        };
        let mut params = Params::new();
        params.insert("root_id".into(), Param::Value("r".into()));
        params.insert("t_props".into(), Param::Map(props(&[("id", "T1".into())])));
        params.insert(
            "a_props".into(),
            Param::Map(props(&[("name", "size".into()), ("tags", vec!["x", "y"].into())])),
        );
        params.insert("has_props".into(), Param::Map(props(&[("n", 0.into())])));

        let first = g.merge(&pattern, &params).unwrap();
        assert_eq!((first.created_nodes, first.created_edges), (2, 2));
        let second = g.merge(&pattern, &params).unwrap();
        assert!(!second.created_anything());
        assert_eq!(first.bound, second.bound);
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn failed_merge_leaves_no_trace() {
        let g = MemoryGraph::new();
        let pattern = MergePattern {
            anchor: None,
            nodes: vec![MergeNode {
                alias: "t".into(),
                label: Some("T".into()),
                props_param: "t_props".into(),
                identity: NodeIdentity::Key { key: "id".into() },
            }],
            edges: vec![MergeEdge {
                from: "t".into(),
                rel_type: "X".into(),
                to: "missing".into(),
                props_param: None,
            }],
        };
        let mut params = Params::new();
        params.insert("t_props".into(), Param::Map(props(&[("id", "T1".into())])));
        let err = g.merge(&pattern, &params).unwrap_err();
        assert!(matches!(err, StoreError::UnknownAlias(_)));
        assert_eq!(g.node_count(), 0);
    }

    #[test]
    fn missing_index_info_is_not_found() {
        let g = MemoryGraph::new();
        assert!(matches!(
            g.index_info("TypeSystem", "id"),
            Err(StoreError::IndexNotFound { .. })
        ));
        g.create_index("TypeSystem", "id").unwrap();
        assert_eq!(g.index_info("TypeSystem", "id").unwrap().entries, 0);
        g.drop_index("TypeSystem", "id").unwrap();
        assert!(g.drop_index("TypeSystem", "id").is_err());
    }

    #[test]
    fn raw_queries_are_unsupported() {
        let g = MemoryGraph::new();
        assert!(matches!(
            g.execute("MATCH (n) RETURN n", &Params::new()),
            Err(StoreError::Unsupported(_))
        ));
    }
}

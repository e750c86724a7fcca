//! Structural versioning and type reloads.
//!
//! The TypeSystem node carries a `version` token. Every structural write
//! (types, IsA edges, attribute declarations) replaces it with a fresh
//! random token; instance writes never touch it. A process compares the
//! token its registry was loaded at with the live one to decide whether a
//! reload is needed.
//!
//! ```text
//! (TypeSystem {version}) -DEFINES-> (root) <-ISA- (sub) <-ISA- ...
//!                                      ^
//!                                      └-DECLAREDON- (attr)
//! ```
//!
//! Loaded registries are kept in a [`VersionCache`] keyed by store, type
//! system and the static types of the loading process, so managers sharing
//! a cache reuse a snapshot while its token is still current.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use typegraph_store::{Direction, GraphStore, NodeId, NodeRecord, StoreError, StoreToken};
use typegraph_types::{
    AttributeSpec, Members, Origin, Properties, RegistrySnapshot, TypeDef, TypeId, TypeRef,
    Value, DECLARED_ON, DEFINES, ID_KEY, IS_A, TYPE_SYSTEM, TYPE_TAG,
};

use crate::error::Result;
use crate::mapper::relationship_label;

/// Property on the TypeSystem node holding the structural version.
pub const VERSION_KEY: &str = "version";

pub fn fresh_version() -> String {
    Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Version token
// ============================================================================

fn type_system_node(store: &dyn GraphStore, type_system_id: &str) -> Result<Option<NodeRecord>> {
    Ok(store.lookup(TYPE_SYSTEM, ID_KEY, &Value::from(type_system_id))?)
}

/// The live structural version, or `None` before bootstrap.
pub fn structural_version(store: &dyn GraphStore, type_system_id: &str) -> Result<Option<String>> {
    Ok(type_system_node(store, type_system_id)?
        .and_then(|n| n.get(VERSION_KEY).and_then(Value::as_str).map(str::to_string)))
}

/// Replace the structural version with a fresh token and return it.
pub fn invalidate(store: &dyn GraphStore, type_system_id: &str) -> Result<String> {
    let node = type_system_node(store, type_system_id)?.ok_or_else(|| {
        StoreError::AnchorNotFound {
            label: TYPE_SYSTEM.to_string(),
            key: ID_KEY.to_string(),
        }
    })?;
    let version = fresh_version();
    let mut changes = Properties::new();
    changes.insert(VERSION_KEY.to_string(), Value::from(version.as_str()));
    store.update_properties(node.id, &changes)?;
    tracing::debug!(type_system = %type_system_id, version = %version, "structural version bumped");
    Ok(version)
}

// ============================================================================
// Loading
// ============================================================================

/// Read the persisted type hierarchy, ancestors before descendants.
///
/// Starts at the types the TypeSystem node DEFINES and walks incoming ISA
/// edges breadth-first. Bases are ordered by `base_index`.
pub fn load_persisted_types(store: &dyn GraphStore, type_system_id: &str) -> Result<Vec<TypeDef>> {
    let Some(ts) = type_system_node(store, type_system_id)? else {
        return Ok(Vec::new());
    };

    let isa = relationship_label(IS_A);
    let mut queue: VecDeque<NodeId> = store
        .relationships(ts.id, Direction::Outgoing, Some(&relationship_label(DEFINES)))?
        .into_iter()
        .map(|r| r.end)
        .collect();
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut loaded: BTreeMap<TypeId, TypeDef> = BTreeMap::new();

    while let Some(node_id) = queue.pop_front() {
        if !visited.insert(node_id) {
            continue;
        }
        let Some(node) = store.node(node_id)? else {
            continue;
        };
        let Some(type_id) = node.get(ID_KEY).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };

        let mut base_edges = store.relationships(node_id, Direction::Outgoing, Some(&isa))?;
        base_edges.sort_by_key(|r| r.get("base_index").and_then(Value::as_int).unwrap_or(0));
        let mut bases = Vec::with_capacity(base_edges.len());
        for edge in &base_edges {
            if let Some(base) = store.node(edge.end)? {
                if let Some(id) = base.get(ID_KEY).and_then(Value::as_str) {
                    bases.push(id.to_string());
                }
            }
        }

        let mut members = Members::new();
        for (name, value) in &node.properties {
            if name != TYPE_TAG && name != ID_KEY {
                members = members.class_attribute(name.clone(), value.clone());
            }
        }
        for edge in store.relationships(
            node_id,
            Direction::Incoming,
            Some(&relationship_label(DECLARED_ON)),
        )? {
            let Some(attr) = store.node(edge.start)? else {
                continue;
            };
            match AttributeSpec::from_properties(&attr.properties) {
                Some((name, spec)) => members = members.attribute(name, spec),
                None => tracing::warn!(
                    type_id = %type_id,
                    node = attr.id,
                    "skipping malformed attribute node"
                ),
            }
        }

        loaded.insert(
            type_id.clone(),
            TypeDef::new(type_id, Origin::Dynamic, bases, members),
        );

        for edge in store.relationships(node_id, Direction::Incoming, Some(&isa))? {
            queue.push_back(edge.start);
        }
    }

    Ok(ancestors_first(loaded))
}

/// Kahn's algorithm over the loaded types; ties broken by id.
fn ancestors_first(mut loaded: BTreeMap<TypeId, TypeDef>) -> Vec<TypeDef> {
    let mut placed: BTreeSet<TypeId> = BTreeSet::new();
    let mut out = Vec::with_capacity(loaded.len());
    loop {
        let ready: Vec<TypeId> = loaded
            .values()
            .filter(|d| {
                d.bases
                    .iter()
                    .all(|b| placed.contains(b) || !loaded.contains_key(b))
            })
            .map(|d| d.id.clone())
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            if let Some(def) = loaded.remove(&id) {
                placed.insert(id);
                out.push(def);
            }
        }
    }
    // leftovers sit on a cycle; the registry rejects them on build
    out.extend(loaded.into_values());
    out
}

/// Whether two definitions have the same persisted content.
pub fn same_content(a: &TypeDef, b: &TypeDef) -> bool {
    a.id == b.id
        && a.bases == b.bases
        && a.class_attributes == b.class_attributes
        && a.declared_attributes == b.declared_attributes
}

/// SHA-256 over the canonical persisted hierarchy, `"sha256:<hex>"`.
pub fn structural_digest(store: &dyn GraphStore, type_system_id: &str) -> Result<String> {
    let mut types = load_persisted_types(store, type_system_id)?;
    types.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(digest_types(types.iter()))
}

fn digest_types<'a>(types: impl Iterator<Item = &'a TypeDef>) -> String {
    let mut hasher = Sha256::new();
    for def in types {
        hasher.update(def.id.as_bytes());
        hasher.update([0u8]);
        for base in &def.bases {
            hasher.update(b"isa:");
            hasher.update(base.as_bytes());
            hasher.update([0u8]);
        }
        for (name, value) in &def.class_attributes {
            hasher.update(format!("class:{name}={value:?}").as_bytes());
            hasher.update([0u8]);
        }
        for (name, spec) in &def.declared_attributes {
            hasher.update(format!("attr:{name}={spec:?}").as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([1u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256:");
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub store: StoreToken,
    pub type_system_id: String,
    /// Digest of the loading process's static types.
    pub static_fingerprint: String,
}

impl CacheKey {
    pub fn new(store: StoreToken, type_system_id: &str, static_types: &BTreeMap<TypeId, TypeRef>) -> Self {
        Self {
            store,
            type_system_id: type_system_id.to_string(),
            static_fingerprint: digest_types(static_types.values().map(|t| t.as_ref())),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    version: String,
    snapshot: Arc<RegistrySnapshot>,
}

/// Loaded registries by structural version.
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn shared() -> Arc<VersionCache> {
        static SHARED: OnceLock<Arc<VersionCache>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(VersionCache::new())).clone()
    }

    /// The cached snapshot for `key`, if it was loaded at `version`.
    pub fn get(&self, key: &CacheKey, version: &str) -> Option<Arc<RegistrySnapshot>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| e.version == version)
            .map(|e| e.snapshot.clone())
    }

    pub fn put(&self, key: CacheKey, version: String, snapshot: Arc<RegistrySnapshot>) {
        self.entries
            .write()
            .insert(key, CacheEntry { version, snapshot });
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typegraph_store::MemoryGraph;
    use typegraph_types::TypeRegistry;

    fn type_system(store: &MemoryGraph) {
        let mut props = Properties::new();
        props.insert(TYPE_TAG.into(), TYPE_SYSTEM.into());
        props.insert(ID_KEY.into(), TYPE_SYSTEM.into());
        props.insert(VERSION_KEY.into(), "v0".into());
        store.create_node(&[TYPE_SYSTEM.to_string()], props).unwrap();
    }

    #[test]
    fn invalidate_replaces_the_token() {
        let store = MemoryGraph::new();
        assert_eq!(structural_version(&store, TYPE_SYSTEM).unwrap(), None);
        assert!(invalidate(&store, TYPE_SYSTEM).is_err());

        type_system(&store);
        assert_eq!(structural_version(&store, TYPE_SYSTEM).unwrap().as_deref(), Some("v0"));
        let v1 = invalidate(&store, TYPE_SYSTEM).unwrap();
        assert_eq!(v1.len(), 32);
        assert_eq!(structural_version(&store, TYPE_SYSTEM).unwrap(), Some(v1));
    }

    #[test]
    fn empty_store_loads_nothing() {
        let store = MemoryGraph::new();
        assert!(load_persisted_types(&store, TYPE_SYSTEM).unwrap().is_empty());
        type_system(&store);
        assert!(load_persisted_types(&store, TYPE_SYSTEM).unwrap().is_empty());
    }

    #[test]
    fn cache_hits_only_at_the_same_version() {
        let cache = VersionCache::new();
        let reg = TypeRegistry::new();
        let snap = reg.snapshot();
        let key = CacheKey::new(StoreToken::new(), TYPE_SYSTEM, snap.static_types());
        cache.put(key.clone(), "a".into(), snap.clone());
        assert!(cache.get(&key, "a").is_some());
        assert!(cache.get(&key, "b").is_none());

        let other = CacheKey::new(StoreToken::new(), TYPE_SYSTEM, snap.static_types());
        assert_ne!(key, other);
        assert_eq!(key.static_fingerprint, other.static_fingerprint);
        assert!(cache.get(&other, "a").is_none());
    }

    #[test]
    fn ancestors_come_first() {
        let def = |id: &str, bases: &[&str]| {
            TypeDef::new(
                id,
                Origin::Dynamic,
                bases.iter().map(|b| b.to_string()).collect(),
                Members::new(),
            )
        };
        let mut loaded = BTreeMap::new();
        for d in [def("A", &["Z"]), def("B", &["A"]), def("Z", &[]), def("C", &["B", "Z"])] {
            loaded.insert(d.id.clone(), d);
        }
        let order: Vec<TypeId> = ancestors_first(loaded).into_iter().map(|d| d.id).collect();
        assert_eq!(order, vec!["Z", "A", "B", "C"]);
    }
}

//! The type registry.
//!
//! The registry publishes immutable [`RegistrySnapshot`]s. Every mutation
//! builds the next snapshot from the current one (recomputing descriptors)
//! and swaps it in under a short write lock, so readers holding an
//! `Arc<RegistrySnapshot>` never observe a half-built hierarchy.
//!
//! ## Static vs dynamic
//!
//! - `get_class_by_id` prefers the static definition.
//! - `get_descriptor_by_id` (and therefore attribute resolution) prefers
//!   the dynamic definition, which reflects the latest persisted state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collector::{builtin_types, TypeCollector};
use crate::descriptor::Descriptor;
use crate::error::{Result, TypeError};
use crate::linearize::c3_linearize;
use crate::object::Instance;
use crate::types::{Members, Origin, TypeDef, TypeRef};
use crate::value::Value;
use crate::TypeId;

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    static_types: BTreeMap<TypeId, TypeRef>,
    dynamic_types: BTreeMap<TypeId, TypeRef>,
    descriptors: BTreeMap<TypeId, Arc<Descriptor>>,
    /// Upper-cased edge label -> relationship type id.
    relationship_labels: BTreeMap<String, TypeId>,
    types_in_db: BTreeSet<TypeId>,
    source_version: Option<String>,
}

impl RegistrySnapshot {
    /// Build a snapshot from definitions, computing every descriptor.
    pub fn build(
        static_types: BTreeMap<TypeId, TypeRef>,
        dynamic_types: BTreeMap<TypeId, TypeRef>,
    ) -> Result<Self> {
        let mut snapshot = RegistrySnapshot {
            static_types,
            dynamic_types,
            ..Default::default()
        };
        snapshot.recompute()?;
        Ok(snapshot)
    }

    fn effective(&self, id: &str) -> Option<&TypeRef> {
        self.dynamic_types
            .get(id)
            .or_else(|| self.static_types.get(id))
    }

    fn recompute(&mut self) -> Result<()> {
        let ids: BTreeSet<&TypeId> = self
            .static_types
            .keys()
            .chain(self.dynamic_types.keys())
            .collect();

        let mut descriptors = BTreeMap::new();
        let mut labels: BTreeMap<String, TypeId> = BTreeMap::new();
        for id in ids {
            let Some(def) = self.effective(id) else {
                continue;
            };
            def.validate()?;
            let linearization = c3_linearize(id, |t| self.effective(t).map(|d| d.bases.clone()))?;
            let descriptor = Descriptor::compute(def.clone(), linearization, |t| self.effective(t));

            if descriptor.is_relationship {
                if !descriptor.unique_attributes.is_empty() {
                    return Err(TypeError::InvalidType {
                        type_id: id.clone(),
                        reason: "relationship types may not have unique attributes".into(),
                    });
                }
                let label = id.to_uppercase();
                if let Some(existing) = labels.get(&label) {
                    if existing != id {
                        return Err(TypeError::TypeAlreadyCollected(id.clone()));
                    }
                }
                labels.insert(label, id.clone());
            }
            descriptors.insert(id.clone(), Arc::new(descriptor));
        }

        self.descriptors = descriptors;
        self.relationship_labels = labels;
        Ok(())
    }

    fn next(&self) -> RegistrySnapshot {
        let mut next = self.clone();
        next.generation += 1;
        next
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Structural version this snapshot was loaded at, if any.
    pub fn source_version(&self) -> Option<&str> {
        self.source_version.as_deref()
    }

    pub fn with_source_version(mut self, version: Option<String>) -> Self {
        self.source_version = version;
        self
    }

    pub fn with_types_in_db(mut self, ids: BTreeSet<TypeId>) -> Self {
        self.types_in_db = ids;
        self
    }

    pub fn static_types(&self) -> &BTreeMap<TypeId, TypeRef> {
        &self.static_types
    }

    pub fn dynamic_types(&self) -> &BTreeMap<TypeId, TypeRef> {
        &self.dynamic_types
    }

    pub fn get_class_by_id(&self, id: &str) -> Result<TypeRef> {
        self.static_types
            .get(id)
            .or_else(|| self.dynamic_types.get(id))
            .cloned()
            .ok_or_else(|| TypeError::UnknownType(id.to_string()))
    }

    pub fn get_descriptor_by_id(&self, id: &str) -> Result<Arc<Descriptor>> {
        self.descriptors
            .get(id)
            .cloned()
            .ok_or_else(|| TypeError::UnknownType(id.to_string()))
    }

    pub fn is_static_type(&self, id: &str) -> bool {
        self.static_types.contains_key(id)
    }

    pub fn is_dynamic_type(&self, id: &str) -> bool {
        self.dynamic_types.contains_key(id)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    /// Whether `def` is one of the definitions held by this snapshot.
    pub fn holds(&self, def: &TypeDef) -> bool {
        [self.static_types.get(&def.id), self.dynamic_types.get(&def.id)]
            .into_iter()
            .flatten()
            .any(|t| t.same(def))
    }

    pub fn registered_types(&self) -> Vec<TypeId> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.descriptors.values()
    }

    pub fn labels_for_type(&self, id: &str) -> Result<Vec<TypeId>> {
        Ok(self.get_descriptor_by_id(id)?.labels())
    }

    /// `(label, key)` pairs needing a unique index: the unique attributes
    /// declared directly on `id`.
    pub fn constraints_for_type(&self, id: &str) -> Result<Vec<(TypeId, String)>> {
        let descriptor = self.get_descriptor_by_id(id)?;
        Ok(descriptor
            .declared_attributes
            .iter()
            .filter(|(_, spec)| spec.unique)
            .map(|(name, _)| (id.to_string(), name.clone()))
            .collect())
    }

    /// `(index label, key, primitive value)` for every non-null unique
    /// attribute of `obj`.
    pub fn index_entries(&self, obj: &Instance) -> Result<Vec<(TypeId, String, Value)>> {
        let descriptor = self.get_descriptor_by_id(obj.type_id())?;
        let mut entries = Vec::new();
        for (owner, name) in &descriptor.unique_attributes {
            let value = obj.get(name);
            if value.is_null() {
                continue;
            }
            let spec = descriptor
                .attribute(name)
                .ok_or_else(|| TypeError::UnknownType(owner.clone()))?;
            entries.push((owner.clone(), name.clone(), spec.kind.to_primitive(value)?));
        }
        Ok(entries)
    }

    /// Relationship type for an edge label (case-insensitive).
    pub fn relationship_type_id(&self, label: &str) -> Option<&TypeId> {
        self.relationship_labels.get(&label.to_uppercase())
    }

    pub fn types_in_db(&self) -> &BTreeSet<TypeId> {
        &self.types_in_db
    }

    pub fn is_in_db(&self, id: &str) -> bool {
        self.types_in_db.contains(id)
    }

    /// `(type, bases)` for every registered type, bases before subtypes.
    pub fn hierarchy(&self) -> Vec<(TypeId, Vec<TypeId>)> {
        let mut order: Vec<(usize, &TypeId)> = self
            .descriptors
            .iter()
            .map(|(id, d)| (d.linearization.len(), id))
            .collect();
        order.sort();
        order
            .into_iter()
            .filter_map(|(_, id)| self.effective(id).map(|d| (id.clone(), d.bases.clone())))
            .collect()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug)]
pub struct TypeRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TypeRegistry {
    /// An independent registry starting from the same snapshot.
    fn clone(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }
}

impl TypeRegistry {
    /// A registry holding the builtin types.
    pub fn new() -> Self {
        let static_types = builtin_types()
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d.into_static())))
            .collect();
        // builtins are a fixed, linearizable hierarchy
        let snapshot = RegistrySnapshot::build(static_types, BTreeMap::new()).unwrap_or_default();
        Self::from_snapshot(Arc::new(snapshot))
    }

    /// Builtins plus everything in `collector`, registered statically.
    pub fn with_collected(collector: TypeCollector) -> Result<Self> {
        let registry = Self::new();
        let defs = collector
            .into_decls()
            .into_iter()
            .map(|d| d.into_static())
            .collect();
        registry.register_all(defs, false)?;
        Ok(registry)
    }

    pub fn from_snapshot(snapshot: Arc<RegistrySnapshot>) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    /// Swap in a snapshot built elsewhere (e.g. by a reload).
    pub fn replace_snapshot(&self, snapshot: Arc<RegistrySnapshot>) {
        *self.current.write() = snapshot;
    }

    fn update<T>(&self, f: impl FnOnce(&mut RegistrySnapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.current.write();
        let mut next = guard.next();
        let out = f(&mut next)?;
        next.recompute()?;
        *guard = Arc::new(next);
        Ok(out)
    }

    pub fn register(&self, def: TypeDef, dynamic: bool) -> Result<TypeRef> {
        let mut refs = self.register_all(vec![def], dynamic)?;
        refs.pop()
            .ok_or_else(|| TypeError::UnsupportedTypeError("empty registration".into()))
    }

    /// Register several definitions atomically, in any order.
    pub fn register_all(&self, defs: Vec<TypeDef>, dynamic: bool) -> Result<Vec<TypeRef>> {
        self.update(|next| {
            let mut refs = Vec::with_capacity(defs.len());
            for mut def in defs {
                def.origin = if dynamic { Origin::Dynamic } else { Origin::Static };
                let map = if dynamic {
                    &mut next.dynamic_types
                } else {
                    &mut next.static_types
                };
                if map.contains_key(&def.id) {
                    return Err(TypeError::TypeAlreadyRegistered(def.id));
                }
                let def = Arc::new(def);
                map.insert(def.id.clone(), def.clone());
                refs.push(def);
            }
            Ok(refs)
        })
    }

    /// Create and register a new dynamic type. Does not touch the graph.
    pub fn create_type<B: Into<TypeId>>(
        &self,
        id: impl Into<TypeId>,
        bases: impl IntoIterator<Item = B>,
        members: Members,
    ) -> Result<TypeRef> {
        let bases: Vec<TypeId> = bases.into_iter().map(Into::into).collect();
        let snapshot = self.snapshot();
        if let Some(missing) = bases.iter().find(|b| !snapshot.is_registered(b)) {
            return Err(TypeError::UnknownType(missing.clone()));
        }
        let def = TypeDef::new(id, Origin::Dynamic, bases, members);
        self.register(def, true)
    }

    /// Replace a held definition with a newer generation of it.
    pub fn replace_type(&self, def: TypeDef) -> Result<TypeRef> {
        self.update(|next| {
            let def = Arc::new(def);
            for map in [&mut next.static_types, &mut next.dynamic_types] {
                if map.get(&def.id).is_some_and(|held| held.same(&def)) {
                    map.insert(def.id.clone(), def.clone());
                    return Ok(def);
                }
            }
            Err(TypeError::UnknownType(def.id.clone()))
        })
    }

    /// Insert or overwrite the dynamic definition for `def.id`.
    pub fn upsert_dynamic(&self, mut def: TypeDef) -> Result<TypeRef> {
        def.origin = Origin::Dynamic;
        self.update(|next| {
            let def = Arc::new(def);
            next.dynamic_types.insert(def.id.clone(), def.clone());
            Ok(def)
        })
    }

    pub fn remove_dynamic(&self, id: &str) -> Result<Option<TypeRef>> {
        self.update(|next| {
            next.types_in_db.remove(id);
            Ok(next.dynamic_types.remove(id))
        })
    }

    pub fn mark_in_db(&self, ids: impl IntoIterator<Item = TypeId>) {
        let mut guard = self.current.write();
        let mut next = guard.next();
        next.types_in_db.extend(ids);
        *guard = Arc::new(next);
    }

    pub fn get_class_by_id(&self, id: &str) -> Result<TypeRef> {
        self.snapshot().get_class_by_id(id)
    }

    pub fn get_descriptor_by_id(&self, id: &str) -> Result<Arc<Descriptor>> {
        self.snapshot().get_descriptor_by_id(id)
    }

    pub fn is_static_type(&self, id: &str) -> bool {
        self.snapshot().is_static_type(id)
    }

    pub fn is_dynamic_type(&self, id: &str) -> bool {
        self.snapshot().is_dynamic_type(id)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.snapshot().is_registered(id)
    }

    pub fn registered_types(&self) -> Vec<TypeId> {
        self.snapshot().registered_types()
    }

    pub fn labels_for_type(&self, id: &str) -> Result<Vec<TypeId>> {
        self.snapshot().labels_for_type(id)
    }

    pub fn constraints_for_type(&self, id: &str) -> Result<Vec<(TypeId, String)>> {
        self.snapshot().constraints_for_type(id)
    }

    pub fn index_entries(&self, obj: &Instance) -> Result<Vec<(TypeId, String, Value)>> {
        self.snapshot().index_entries(obj)
    }

    pub fn relationship_type_id(&self, label: &str) -> Option<TypeId> {
        self.snapshot().relationship_type_id(label).cloned()
    }
}

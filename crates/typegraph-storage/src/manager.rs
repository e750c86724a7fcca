//! The persistence manager.
//!
//! `Manager` ties the registry, the mapper, the hierarchy engine and the
//! version cache to one [`GraphStore`] and one TypeSystem node.
//!
//! ```text
//!            save / get / delete / update_type
//!                        │
//!                        ▼
//! ┌──────────────┐   ┌────────┐   ┌─────────────┐
//! │ TypeRegistry │◄──│Manager │──►│ GraphStore  │
//! │  (snapshots) │   └────────┘   └─────────────┘
//! └──────────────┘        │
//!        ▲                ▼
//!        └────────── VersionCache (shared per process)
//! ```
//!
//! Structural writes bump the TypeSystem version and reload the registry.
//! Instance and plain relationship writes leave the version alone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use typegraph_store::{
    Direction, GraphStore, MergeNode, MergePattern, NodeIdentity, NodeRecord, Param, Params, Row,
    RowValue, StoreError,
};
use typegraph_types::{
    AttributeSpec, Instance, Members, ObjectHandle, Persistable, Properties, RegistrySnapshot,
    RelationshipInstance, TypeCollector, TypeDef, TypeError, TypeId, TypeRef, TypeRegistry, Value,
    DECLARED_ON, ID_KEY, INSTANCE_OF, IS_A, PERSISTABLE_TYPE, TYPE_SYSTEM, TYPE_TAG,
};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::hierarchy::{levels, subclasses_of, HierarchyConsistencyEngine};
use crate::mapper::{get_changes, relationship_label, GraphMapper};
use crate::queries::NodeLookup;
use crate::version::{self, CacheKey, VersionCache, VERSION_KEY};

/// One row of [`Manager::get_type_hierarchy`].
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyEntry {
    pub type_id: TypeId,
    pub bases: Vec<TypeId>,
    pub class_attributes: BTreeMap<String, Value>,
    pub attributes: BTreeMap<String, AttributeSpec>,
}

pub struct Manager {
    store: Arc<dyn GraphStore>,
    config: ManagerConfig,
    registry: TypeRegistry,
    /// Static definitions; replaced only when a static type is saved with
    /// changed members.
    static_types: RwLock<BTreeMap<TypeId, TypeRef>>,
    cache: Arc<VersionCache>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("store", &self.store.token())
            .field("config", &self.config)
            .field("generation", &self.registry.snapshot().generation())
            .finish()
    }
}

impl Manager {
    /// A manager with only the builtin static types.
    pub fn new(store: Arc<dyn GraphStore>, config: ManagerConfig) -> Result<Self> {
        Self::with_types(store, config, TypeCollector::new())
    }

    /// A manager whose static types are the builtins plus `collector`.
    pub fn with_types(
        store: Arc<dyn GraphStore>,
        config: ManagerConfig,
        collector: TypeCollector,
    ) -> Result<Self> {
        if config.type_system_id.is_empty() {
            return Err(Error::Config("type_system_id must not be empty".into()));
        }
        let registry = TypeRegistry::with_collected(collector)?;
        let static_types = RwLock::new(registry.snapshot().static_types().clone());
        let cache = if config.share_type_cache {
            VersionCache::shared()
        } else {
            Arc::new(VersionCache::new())
        };
        let manager = Self {
            store,
            config,
            registry,
            static_types,
            cache,
        };
        if !manager.config.skip_setup {
            manager.bootstrap()?;
        }
        Ok(manager)
    }

    /// Use `cache` instead of the configured one.
    pub fn with_cache(mut self, cache: Arc<VersionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot()
    }

    fn type_system_id(&self) -> &str {
        &self.config.type_system_id
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.store.token(), self.type_system_id(), &self.static_types.read())
    }

    // ========================================================================
    // Bootstrap and versioning
    // ========================================================================

    fn bootstrap(&self) -> Result<()> {
        for (label, key) in [(TYPE_SYSTEM, ID_KEY), (PERSISTABLE_TYPE, ID_KEY)] {
            match self.store.index_info(label, key) {
                Ok(info) => tracing::debug!(label, key, entries = info.entries, "index present"),
                Err(StoreError::IndexNotFound { .. }) => {
                    tracing::warn!(label, key, "index not found, creating it");
                    self.store.create_index(label, key)?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mut props = Properties::new();
        props.insert(TYPE_TAG.to_string(), Value::from(TYPE_SYSTEM));
        props.insert(ID_KEY.to_string(), Value::from(self.type_system_id()));
        props.insert(VERSION_KEY.to_string(), Value::from(version::fresh_version()));
        let pattern = MergePattern {
            anchor: None,
            nodes: vec![MergeNode {
                alias: "ts".to_string(),
                label: Some(TYPE_SYSTEM.to_string()),
                props_param: "ts_props".to_string(),
                identity: NodeIdentity::Key {
                    key: ID_KEY.to_string(),
                },
            }],
            edges: Vec::new(),
        };
        let mut params = Params::new();
        params.insert("ts_props".to_string(), Param::Map(props));
        tracing::debug!(query = %pattern, "bootstrap type system");
        let outcome = self.store.merge(&pattern, &params)?;

        if !outcome.created_anything()
            && version::structural_version(self.store.as_ref(), self.type_system_id())?.is_none()
        {
            version::invalidate(self.store.as_ref(), self.type_system_id())?;
        }

        self.reload_if_stale()?;
        Ok(())
    }

    /// The live structural version of this manager's type system.
    pub fn structural_version(&self) -> Result<Option<String>> {
        version::structural_version(self.store.as_ref(), self.type_system_id())
    }

    pub fn structural_digest(&self) -> Result<String> {
        version::structural_digest(self.store.as_ref(), self.type_system_id())
    }

    /// Bump the structural version.
    pub fn invalidate_type_system(&self) -> Result<String> {
        version::invalidate(self.store.as_ref(), self.type_system_id())
    }

    /// Reload if the live version differs from the one the registry was
    /// loaded at. Returns whether the registry changed.
    pub fn reload_if_stale(&self) -> Result<bool> {
        let live = self.structural_version()?;
        let current = self.registry.snapshot();
        if live.is_some() && current.source_version() == live.as_deref() {
            return Ok(false);
        }
        if let Some(version) = &live {
            if let Some(cached) = self.cache.get(&self.cache_key(), version) {
                tracing::debug!(version = %version, "reusing cached type registry");
                self.install(&cached, &current)?;
                return Ok(true);
            }
        }
        self.reload_types()?;
        Ok(true)
    }

    /// Rebuild the registry from the graph unconditionally.
    pub fn reload_types(&self) -> Result<Arc<RegistrySnapshot>> {
        let version = self.structural_version()?;
        let loaded = version::load_persisted_types(self.store.as_ref(), self.type_system_id())?;
        let current = self.registry.snapshot();

        let in_db: BTreeSet<TypeId> = loaded.iter().map(|d| d.id.clone()).collect();
        let dynamic: BTreeMap<TypeId, TypeRef> = loaded
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        let base = RegistrySnapshot::build(self.static_types.read().clone(), dynamic)?
            .with_types_in_db(in_db)
            .with_source_version(version.clone());
        if let Some(version) = &version {
            self.cache
                .put(self.cache_key(), version.clone(), Arc::new(base.clone()));
        }

        let snapshot = self.install(&base, &current)?;
        tracing::info!(
            type_system = %self.type_system_id(),
            version = ?version,
            types = snapshot.types_in_db().len(),
            "reloaded type hierarchy"
        );
        Ok(snapshot)
    }

    /// Swap in `base` with this manager's static types, keeping the
    /// identity of held dynamic types and the ones created here but never
    /// saved.
    fn install(
        &self,
        base: &RegistrySnapshot,
        current: &RegistrySnapshot,
    ) -> Result<Arc<RegistrySnapshot>> {
        let mut dynamic: BTreeMap<TypeId, TypeRef> = BTreeMap::new();
        for (id, def) in base.dynamic_types() {
            let def = match current.dynamic_types().get(id) {
                Some(held) if version::same_content(held, def) => held.clone(),
                // same type, newer generation
                Some(held) => Arc::new(TypeDef {
                    handle: held.handle,
                    generation: held.generation + 1,
                    ..TypeDef::clone(def)
                }),
                None => def.clone(),
            };
            dynamic.insert(id.clone(), def);
        }
        for (id, def) in current.dynamic_types() {
            if !current.is_in_db(id) && !base.is_in_db(id) {
                dynamic.entry(id.clone()).or_insert_with(|| def.clone());
            }
        }

        let snapshot = RegistrySnapshot::build(self.static_types.read().clone(), dynamic)?
            .with_types_in_db(base.types_in_db().clone())
            .with_source_version(base.source_version().map(str::to_string));
        let snapshot = Arc::new(snapshot);
        self.registry.replace_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    fn structural_write_done(&self) -> Result<()> {
        self.invalidate_type_system()?;
        self.reload_types()?;
        Ok(())
    }

    // ========================================================================
    // Registry passthroughs
    // ========================================================================

    /// Create a dynamic type in the registry. Nothing is written until the
    /// type is saved.
    pub fn create_type<B: Into<TypeId>>(
        &self,
        id: impl Into<TypeId>,
        bases: impl IntoIterator<Item = B>,
        members: Members,
    ) -> Result<TypeRef> {
        Ok(self.registry.create_type(id, bases, members)?)
    }

    pub fn get_class_by_id(&self, id: &str) -> Result<TypeRef> {
        Ok(self.registry.get_class_by_id(id)?)
    }

    pub fn get_descriptor_by_id(&self, id: &str) -> Result<Arc<typegraph_types::Descriptor>> {
        Ok(self.registry.get_descriptor_by_id(id)?)
    }

    pub fn new_instance(&self, type_id: &str) -> Result<Instance> {
        Ok(Instance::new(&self.registry.snapshot(), type_id)?)
    }

    pub fn new_relationship(&self, type_id: &str) -> Result<RelationshipInstance> {
        Ok(RelationshipInstance::new(&self.registry.snapshot(), type_id)?)
    }

    pub fn serialize(&self, obj: &Persistable) -> Result<Properties> {
        let snapshot = self.registry.snapshot();
        GraphMapper::new(&snapshot).object_to_dict(obj, false)
    }

    pub fn deserialize(&self, props: &Properties) -> Result<Persistable> {
        let snapshot = self.registry.snapshot();
        GraphMapper::new(&snapshot).dict_to_object(props)
    }

    // ========================================================================
    // Node resolution
    // ========================================================================

    fn lookup(&self, lookup: &NodeLookup) -> Result<Option<NodeRecord>> {
        tracing::debug!(pattern = %lookup.pattern(), value = %lookup.value, "lookup");
        Ok(self.store.lookup(&lookup.label, &lookup.key, &lookup.value)?)
    }

    fn type_node(&self, type_id: &str) -> Result<Option<NodeRecord>> {
        Ok(self
            .store
            .lookup(PERSISTABLE_TYPE, ID_KEY, &Value::from(type_id))?)
    }

    fn require_type_node(&self, type_id: &str) -> Result<NodeRecord> {
        self.type_node(type_id)?
            .ok_or_else(|| Error::TypeNotPersisted(type_id.to_string()))
    }

    fn handle_for(&self, element_id: u32) -> ObjectHandle {
        ObjectHandle {
            store_token: self.store.token().raw(),
            element_id,
        }
    }

    /// The node backing `obj`: by handle when it came from this store,
    /// otherwise by its match clause.
    fn resolve_node(&self, snapshot: &RegistrySnapshot, obj: &Persistable) -> Result<Option<NodeRecord>> {
        if let Some(handle) = obj.handle() {
            if handle.store_token == self.store.token().raw() {
                if let Some(node) = self.store.node(handle.element_id)? {
                    return Ok(Some(node));
                }
            }
        }
        match obj {
            Persistable::Type(t) => self.type_node(&t.id),
            Persistable::Instance(_) => {
                match GraphMapper::new(snapshot).node_lookup(obj, "obj") {
                    Ok(lookup) => self.lookup(&lookup),
                    Err(Error::Type(TypeError::NoUniqueAttributeError(_))) => Ok(None),
                    Err(err) => Err(err),
                }
            }
            Persistable::Relationship(_) | Persistable::Attribute(_) => Ok(None),
        }
    }

    fn require_node(&self, snapshot: &RegistrySnapshot, obj: &Persistable) -> Result<NodeRecord> {
        self.resolve_node(snapshot, obj)?
            .ok_or_else(|| Error::NoResultFound(format!("{} is not persisted", obj.describe())))
    }

    fn node_to_object(&self, snapshot: &RegistrySnapshot, node: &NodeRecord) -> Result<Persistable> {
        let obj = GraphMapper::new(snapshot).dict_to_object(&node.properties)?;
        Ok(match obj {
            Persistable::Instance(mut instance) => {
                instance.handle = Some(self.handle_for(node.id));
                Persistable::Instance(instance)
            }
            other => other,
        })
    }

    // ========================================================================
    // Save
    // ========================================================================

    pub fn save(&self, obj: impl Into<Persistable>) -> Result<Persistable> {
        match obj.into() {
            Persistable::Type(t) => self.save_type(t).map(Persistable::Type),
            Persistable::Instance(i) => self.save_instance(i).map(Persistable::Instance),
            Persistable::Relationship(r) => self.save_relationship(r).map(Persistable::Relationship),
            Persistable::Attribute(a) => Err(TypeError::UnsupportedTypeError(format!(
                "attribute {} is saved with its type",
                a.name
            ))
            .into()),
        }
    }

    /// Persist every collected static type.
    pub fn save_collected_types(&self) -> Result<Vec<TypeRef>> {
        let snapshot = self.registry.snapshot();
        let mut saved = Vec::new();
        for (id, _) in snapshot.hierarchy() {
            if let Some(def) = snapshot.static_types().get(&id) {
                saved.push(self.save_type(def.clone())?);
            }
        }
        Ok(saved)
    }

    /// Bring the registry in line with `type_ref` before writing it.
    fn adopt_type(&self, type_ref: &TypeRef) -> Result<()> {
        let snapshot = self.registry.snapshot();
        let held = [
            snapshot.static_types().get(&type_ref.id),
            snapshot.dynamic_types().get(&type_ref.id),
        ]
        .into_iter()
        .flatten()
        .find(|t| t.same(type_ref))
        .cloned();

        match held {
            Some(held) if version::same_content(&held, type_ref) => Ok(()),
            Some(held) => {
                if held.bases != type_ref.bases && snapshot.is_in_db(&type_ref.id) {
                    return Err(Error::cannot_update(
                        &type_ref.id,
                        "bases of a persisted type change through update_type",
                    ));
                }
                let stored = self.registry.replace_type(TypeDef::clone(type_ref))?;
                if stored.is_static() {
                    self.static_types
                        .write()
                        .insert(stored.id.clone(), stored);
                }
                Ok(())
            }
            None if snapshot.is_registered(&type_ref.id) => {
                self.registry.upsert_dynamic(TypeDef::clone(type_ref))?;
                Ok(())
            }
            None => {
                self.registry.register(TypeDef::clone(type_ref), true)?;
                Ok(())
            }
        }
    }

    fn save_type(&self, type_ref: TypeRef) -> Result<TypeRef> {
        self.reload_if_stale()?;
        self.adopt_type(&type_ref)?;
        let snapshot = self.registry.snapshot();
        let mapper = GraphMapper::new(&snapshot);
        let type_id = type_ref.id.as_str();

        let (pattern, params) = mapper.get_create_types_query(&type_ref, self.type_system_id())?;
        tracing::debug!(type_id, query = %pattern, "create types");
        let outcome = self.store.merge(&pattern, &params)?;
        let mut changed = outcome.created_anything();

        let descriptor = snapshot.get_descriptor_by_id(type_id)?;
        for ancestor in &descriptor.linearization {
            for (label, key) in snapshot.constraints_for_type(ancestor)? {
                self.store.create_index(&label, &key)?;
            }
        }

        let node = self.require_type_node(type_id)?;
        let changes = get_changes(&node.properties, &GraphMapper::type_node_properties(&type_ref));
        if !changes.is_empty() {
            tracing::debug!(type_id, changes = ?changes.keys().collect::<Vec<_>>(), "class attributes changed");
            self.store.update_properties(node.id, &changes)?;
            changed = true;
        }

        for edge in self.store.relationships(
            node.id,
            Direction::Incoming,
            Some(&relationship_label(DECLARED_ON)),
        )? {
            let Some(attr) = self.store.node(edge.start)? else {
                continue;
            };
            let Some(name) = attr.get("name").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            match type_ref.declared_attributes.get(&name) {
                None => {
                    self.store.delete_node(attr.id)?;
                    changed = true;
                }
                Some(spec) => {
                    let changes = get_changes(&attr.properties, &spec.to_properties(&name)?);
                    if !changes.is_empty() {
                        self.store.update_properties(attr.id, &changes)?;
                        changed = true;
                    }
                }
            }
        }

        if changed {
            self.structural_write_done()?;
        } else if !snapshot.is_in_db(type_id) {
            self.reload_types()?;
        }

        let snapshot = self.registry.snapshot();
        if type_ref.is_static() {
            Ok(snapshot.get_class_by_id(type_id)?)
        } else {
            Ok(snapshot.get_descriptor_by_id(type_id)?.type_ref.clone())
        }
    }

    /// Creates the instance's exact type first when it has no node yet.
    fn save_instance(&self, instance: Instance) -> Result<Instance> {
        self.reload_if_stale()?;
        let type_id = instance.type_id().clone();
        let type_node = match self.type_node(&type_id)? {
            Some(node) => node,
            None => {
                tracing::debug!(type_id = %type_id, "saving type ahead of its first instance");
                self.save_type(instance.type_ref.clone())?;
                self.require_type_node(&type_id)?
            }
        };
        let snapshot = self.registry.snapshot();

        let obj = Persistable::Instance(instance.clone());
        let props = GraphMapper::new(&snapshot).object_to_dict(&obj, false)?;
        let labels = snapshot.labels_for_type(&type_id)?;

        let node_id = match self.resolve_node(&snapshot, &obj)? {
            Some(node) => {
                let changes = get_changes(&node.properties, &props);
                if !changes.is_empty() {
                    self.store.update_properties(node.id, &changes)?;
                }
                let wanted: BTreeSet<String> = labels.iter().cloned().collect();
                if node.labels != wanted {
                    self.store.set_labels(node.id, &labels)?;
                }
                tracing::debug!(type_id = %type_id, node = node.id, changed = changes.len(), "updated instance");
                node.id
            }
            None => {
                let id = self.store.create_node(&labels, props)?;
                self.store.create_relationship(
                    id,
                    &relationship_label(INSTANCE_OF),
                    type_node.id,
                    Properties::new(),
                )?;
                tracing::debug!(type_id = %type_id, node = id, "created instance");
                id
            }
        };

        let mut instance = instance;
        instance.handle = Some(self.handle_for(node_id));
        Ok(instance)
    }

    fn is_structural_relationship(snapshot: &RegistrySnapshot, type_id: &str) -> Result<bool> {
        let descriptor = snapshot.get_descriptor_by_id(type_id)?;
        Ok(descriptor.is_subtype_of(IS_A) || descriptor.is_subtype_of(DECLARED_ON))
    }

    fn save_relationship(&self, mut rel: RelationshipInstance) -> Result<RelationshipInstance> {
        self.reload_if_stale()?;
        let snapshot = self.registry.snapshot();
        let mapper = GraphMapper::new(&snapshot);
        let type_id = rel.type_id().clone();

        let (Some(start), Some(end)) = (rel.start.as_deref(), rel.end.as_deref()) else {
            return Err(TypeError::NoUniqueAttributeError(format!(
                "{type_id} relationship is missing a start or end node"
            ))
            .into());
        };
        let start_node = self.require_node(&snapshot, start)?;
        let end_node = self.require_node(&snapshot, end)?;

        let mut props = mapper.object_to_dict(&Persistable::Relationship(rel.clone()), false)?;
        props.insert(TYPE_TAG.to_string(), Value::from(type_id.as_str()));

        let existing = match rel.instance.handle {
            Some(h) if h.store_token == self.store.token().raw() => self.store.relationship(h.element_id)?,
            _ => None,
        };
        let rel_id = match existing {
            Some(edge) => {
                if edge.properties != props {
                    self.store.set_relationship_properties(edge.id, props)?;
                }
                edge.id
            }
            None => {
                if let Ok(query) = mapper.get_create_relationship_query(&rel) {
                    tracing::debug!(query = %query.text(), "create relationship");
                }
                self.store.create_relationship(
                    start_node.id,
                    &relationship_label(&type_id),
                    end_node.id,
                    props,
                )?
            }
        };

        if Self::is_structural_relationship(&snapshot, &type_id)? {
            self.structural_write_done()?;
        }

        rel.instance.handle = Some(self.handle_for(rel_id));
        Ok(rel)
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Look an object up by the first unique attribute present in `filter`.
    ///
    /// An empty filter finds nothing. Every other filter entry must match
    /// as well, and the found object must be a `type_id` (or subtype).
    pub fn get(&self, type_id: &str, filter: &Properties) -> Result<Option<Persistable>> {
        if filter.is_empty() {
            return Ok(None);
        }
        self.reload_if_stale()?;
        let snapshot = self.registry.snapshot();

        if type_id == PERSISTABLE_TYPE {
            let Some(id) = filter.get(ID_KEY).and_then(Value::as_str) else {
                return Err(TypeError::NoUniqueAttributeError(format!(
                    "{PERSISTABLE_TYPE} filter doesn't have any unique attributes"
                ))
                .into());
            };
            return match self.type_node(id)? {
                Some(node) => Ok(Some(self.node_to_object(&snapshot, &node)?)),
                None => Ok(None),
            };
        }

        let descriptor = snapshot.get_descriptor_by_id(type_id)?;
        let usable = descriptor
            .unique_attributes
            .iter()
            .find(|(_, name)| filter.get(name).is_some_and(|v| !v.is_null()));
        let Some((owner, name)) = usable else {
            return Err(TypeError::NoUniqueAttributeError(format!(
                "{type_id} filter doesn't have any unique attributes"
            ))
            .into());
        };

        let mut wanted = Properties::new();
        for (key, value) in filter {
            let spec = descriptor
                .attribute(key)
                .ok_or_else(|| TypeError::DeserialisationError(format!("{type_id} has no attribute `{key}`")))?;
            wanted.insert(key.clone(), spec.kind.to_primitive(value)?);
        }

        let lookup = NodeLookup {
            alias: type_id.to_lowercase(),
            label: owner.clone(),
            key: name.clone(),
            value: wanted[name].clone(),
        };
        let Some(node) = self.lookup(&lookup)? else {
            return Ok(None);
        };
        if wanted.iter().any(|(k, v)| node.get(k) != Some(v) && !v.is_null()) {
            return Ok(None);
        }

        let obj = self.node_to_object(&snapshot, &node)?;
        let found_type = match &obj {
            Persistable::Instance(i) => i.type_id().clone(),
            Persistable::Relationship(r) => r.type_id().clone(),
            _ => return Ok(None),
        };
        if !snapshot.get_descriptor_by_id(&found_type)?.is_subtype_of(type_id) {
            return Ok(None);
        }
        Ok(Some(obj))
    }

    /// One object per value of the unique attribute `name`.
    pub fn get_by_unique_attr(
        &self,
        type_id: &str,
        name: &str,
        values: &[Value],
    ) -> Result<Vec<Persistable>> {
        let descriptor = self.registry.get_descriptor_by_id(type_id)?;
        if !descriptor.attribute(name).is_some_and(|s| s.unique) {
            return Err(TypeError::NoUniqueAttributeError(format!(
                "`{name}` is not a unique attribute of {type_id}"
            ))
            .into());
        }
        let mut found = Vec::with_capacity(values.len());
        for value in values {
            let mut filter = Properties::new();
            filter.insert(name.to_string(), value.clone());
            let obj = self.get(type_id, &filter)?.ok_or_else(|| {
                Error::NoResultFound(format!("{type_id} with {name} = {value}"))
            })?;
            found.push(obj);
        }
        Ok(found)
    }

    /// Persisted types from `start` (or everything) downwards, each after
    /// all of its bases.
    pub fn get_type_hierarchy(&self, start: Option<&str>) -> Result<Vec<HierarchyEntry>> {
        self.reload_if_stale()?;
        let snapshot = self.registry.snapshot();
        let hierarchy = snapshot.hierarchy();
        let depth = levels(&hierarchy);

        let selected: Option<BTreeSet<TypeId>> = match start {
            Some(id) => {
                snapshot.get_descriptor_by_id(id)?;
                let mut ids: BTreeSet<TypeId> = subclasses_of(&snapshot, id).into_iter().collect();
                ids.insert(id.to_string());
                Some(ids)
            }
            None => None,
        };

        let mut entries = Vec::new();
        for (type_id, bases) in hierarchy {
            if !snapshot.is_in_db(&type_id) {
                continue;
            }
            if selected.as_ref().is_some_and(|s| !s.contains(&type_id)) {
                continue;
            }
            let descriptor = snapshot.get_descriptor_by_id(&type_id)?;
            entries.push(HierarchyEntry {
                type_id,
                bases,
                class_attributes: descriptor.declared_class_attributes.clone(),
                attributes: descriptor.declared_attributes.clone(),
            });
        }
        entries.sort_by(|a, b| {
            let la = depth.get(&a.type_id).copied().unwrap_or(0);
            let lb = depth.get(&b.type_id).copied().unwrap_or(0);
            la.cmp(&lb).then_with(|| a.type_id.cmp(&b.type_id))
        });
        Ok(entries)
    }

    /// Raw query passthrough.
    pub fn query(&self, text: &str, params: &Params) -> Result<Vec<Row>> {
        tracing::debug!(query = %text, "raw query");
        Ok(self.store.execute(text, params)?)
    }

    /// The one cell a query returns, `None` when it returns no rows.
    pub fn query_single(&self, text: &str, params: &Params) -> Result<Option<RowValue>> {
        single_cell(self.query(text, params)?)
    }

    // ========================================================================
    // Delete and change
    // ========================================================================

    pub fn delete(&self, obj: impl Into<Persistable>) -> Result<()> {
        let obj = obj.into();
        self.reload_if_stale()?;
        let snapshot = self.registry.snapshot();
        match &obj {
            Persistable::Type(t) => {
                if let Some(node) = self.type_node(&t.id)? {
                    for edge in self.store.relationships(
                        node.id,
                        Direction::Incoming,
                        Some(&relationship_label(DECLARED_ON)),
                    )? {
                        self.store.delete_node(edge.start)?;
                    }
                    self.store.delete_node(node.id)?;
                    self.registry.remove_dynamic(&t.id)?;
                    tracing::info!(type_id = %t.id, "deleted type");
                    self.structural_write_done()?;
                }
                Ok(())
            }
            Persistable::Instance(_) => {
                if let Some(node) = self.resolve_node(&snapshot, &obj)? {
                    self.store.delete_node(node.id)?;
                }
                Ok(())
            }
            Persistable::Relationship(rel) => {
                let mut deleted = false;
                match rel.instance.handle {
                    Some(h) if h.store_token == self.store.token().raw() => {
                        if self.store.relationship(h.element_id)?.is_some() {
                            self.store.delete_relationship(h.element_id)?;
                            deleted = true;
                        }
                    }
                    _ => {
                        if let (Some(start), Some(end)) = (rel.start.as_deref(), rel.end.as_deref()) {
                            let start = self.resolve_node(&snapshot, start)?;
                            let end = self.resolve_node(&snapshot, end)?;
                            if let (Some(start), Some(end)) = (start, end) {
                                let label = relationship_label(rel.type_id());
                                for edge in self.store.relationships(
                                    start.id,
                                    Direction::Outgoing,
                                    Some(&label),
                                )? {
                                    if edge.end == end.id {
                                        self.store.delete_relationship(edge.id)?;
                                        deleted = true;
                                    }
                                }
                            }
                        }
                    }
                }
                if deleted && Self::is_structural_relationship(&snapshot, rel.type_id())? {
                    self.structural_write_done()?;
                }
                Ok(())
            }
            Persistable::Attribute(a) => Err(TypeError::UnsupportedTypeError(format!(
                "attribute {} is deleted with its type",
                a.name
            ))
            .into()),
        }
    }

    /// Move a persisted type under `new_bases`.
    pub fn update_type(&self, obj: impl Into<Persistable>, new_bases: Vec<TypeId>) -> Result<TypeRef> {
        let obj = obj.into();
        self.reload_if_stale()?;
        let snapshot = self.registry.snapshot();
        let plan = HierarchyConsistencyEngine::new(&snapshot).plan_update(&obj, &new_bases, |id| {
            Ok(self.type_node(id)?.is_some())
        })?;

        let node = self.require_type_node(&plan.type_id)?;
        let isa = relationship_label(IS_A);
        for edge in self.store.relationships(node.id, Direction::Outgoing, Some(&isa))? {
            self.store.delete_relationship(edge.id)?;
        }
        for (index, base) in plan.new_bases.iter().enumerate() {
            let base_node = self.require_type_node(base)?;
            let mut props = Properties::new();
            props.insert("base_index".to_string(), Value::Int(index as i64));
            self.store.create_relationship(node.id, &isa, base_node.id, props)?;
        }
        self.structural_write_done()?;

        // the reloaded registry must resolve subclasses the way the plan did
        let snapshot = self.registry.snapshot();
        HierarchyConsistencyEngine::new(&plan.amended).ensure_subclasses_remain_consistent(
            &plan.type_id,
            &plan.subclasses,
            &snapshot,
        )?;
        tracing::info!(
            type_id = %plan.type_id,
            old_bases = ?plan.old_bases,
            new_bases = ?plan.new_bases,
            subclasses = plan.subclasses.len(),
            "reparented type"
        );
        Ok(snapshot.get_descriptor_by_id(&plan.type_id)?.type_ref.clone())
    }

    /// Turn a persisted instance into an instance of `type_id`, keeping the
    /// values of attributes both types share.
    pub fn change_instance_type(
        &self,
        obj: &Instance,
        type_id: &str,
        updated_values: Properties,
    ) -> Result<Instance> {
        self.reload_if_stale()?;
        let snapshot = self.registry.snapshot();
        let node = self.require_node(&snapshot, &Persistable::Instance(obj.clone()))?;
        let type_node = self.require_type_node(type_id)?;

        let descriptor = snapshot.get_descriptor_by_id(type_id)?;
        let values: Properties = descriptor
            .attributes
            .iter()
            .map(|(name, resolved)| {
                let value = updated_values
                    .get(name)
                    .or_else(|| obj.values.get(name))
                    .cloned()
                    .unwrap_or_else(|| resolved.spec.initial_value());
                (name.clone(), value)
            })
            .collect();
        let mut changed = Instance::from_parts(snapshot.get_class_by_id(type_id)?, values);

        let props = GraphMapper::new(&snapshot)
            .object_to_dict(&Persistable::Instance(changed.clone()), false)?;
        self.store.set_properties(node.id, props)?;
        self.store.set_labels(node.id, &snapshot.labels_for_type(type_id)?)?;

        let instance_of = relationship_label(INSTANCE_OF);
        for edge in self
            .store
            .relationships(node.id, Direction::Outgoing, Some(&instance_of))?
        {
            self.store.delete_relationship(edge.id)?;
        }
        self.store
            .create_relationship(node.id, &instance_of, type_node.id, Properties::new())?;

        tracing::debug!(from = %obj.type_id(), to = %type_id, node = node.id, "changed instance type");
        changed.handle = Some(self.handle_for(node.id));
        Ok(changed)
    }

    /// Remove everything from the store and forget every dynamic type.
    pub fn destroy(&self) -> Result<()> {
        self.store.clear()?;
        self.cache.remove(&self.cache_key());
        let snapshot = RegistrySnapshot::build(self.static_types.read().clone(), BTreeMap::new())?;
        self.registry.replace_snapshot(Arc::new(snapshot));
        tracing::info!(type_system = %self.type_system_id(), "destroyed store contents");
        Ok(())
    }
}

/// More than one row, or a row that is not exactly one column wide, is an
/// error.
pub(crate) fn single_cell(rows: Vec<Row>) -> Result<Option<RowValue>> {
    let mut rows = rows.into_iter();
    let Some(row) = rows.next() else {
        return Ok(None);
    };
    let extra = rows.count();
    if extra > 0 {
        return Err(Error::UnexpectedResult(format!(
            "expected at most one row, got {}",
            extra + 1
        )));
    }
    let width = row.len();
    let mut cells = row.into_iter();
    match (cells.next(), cells.next()) {
        (Some(cell), None) => Ok(Some(cell)),
        _ => Err(Error::UnexpectedResult(format!(
            "expected one column, got {width}"
        ))),
    }
}

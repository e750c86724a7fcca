//! Object <-> graph mapping.
//!
//! `GraphMapper` turns persistable objects into property maps, lookup
//! clauses and hierarchy-creation merges, and back. All functions work
//! against one [`RegistrySnapshot`] so a single call never observes two
//! registry generations.

use std::collections::{BTreeMap, HashSet};

use typegraph_store::{MergeAnchor, MergeEdge, MergeNode, MergePattern, NodeIdentity, Param, Params};
use typegraph_types::{
    AttributeDecl, AttributeKind, AttributeSpec, Instance, Persistable, Properties,
    RegistrySnapshot, RelationshipInstance, TypeError, TypeId, TypeRef, Value, DECLARED_ON,
    DEFINES, ID_KEY, INSTANCE_OF, IS_A, PERSISTABLE_TYPE, TYPE_SYSTEM, TYPE_TAG,
};

use crate::error::Result;
use crate::queries::{CreateRelationship, MatchClause, NodeLookup};

/// Subject of a hierarchy triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Type(TypeId),
    /// The instance passed to [`GraphMapper::get_type_relationships`].
    Object,
}

/// `(subject, relation, base_index, object)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRelationship {
    pub subject: Subject,
    pub relation: &'static str,
    pub base_index: Option<usize>,
    pub object: TypeId,
}

/// Edge label of a relationship type.
pub fn relationship_label(type_id: &str) -> String {
    type_id.to_uppercase()
}

/// Primitive form of a class attribute value.
pub fn class_attribute_primitive(value: &Value) -> Value {
    match value {
        Value::Uuid(u) => Value::String(u.hyphenated().to_string()),
        Value::DateTime(dt) => Value::String(dt.to_rfc3339()),
        Value::Decimal(d) => Value::String(d.clone()),
        Value::List(items) => Value::List(items.iter().map(class_attribute_primitive).collect()),
        other => other.clone(),
    }
}

pub struct GraphMapper<'r> {
    registry: &'r RegistrySnapshot,
}

impl<'r> GraphMapper<'r> {
    pub fn new(registry: &'r RegistrySnapshot) -> Self {
        Self { registry }
    }

    /// Effective bases of `id`, preferring `top` when it is that type.
    fn bases_of(&self, id: &str, top: &TypeRef) -> Result<Vec<TypeId>> {
        if id == top.id {
            return Ok(top.bases.clone());
        }
        Ok(self.registry.get_descriptor_by_id(id)?.type_ref.bases.clone())
    }

    fn declared_attributes_of(
        &self,
        id: &str,
        top: &TypeRef,
    ) -> Result<BTreeMap<String, AttributeSpec>> {
        if id == top.id {
            return Ok(top.declared_attributes.clone());
        }
        Ok(self.registry.get_descriptor_by_id(id)?.declared_attributes.clone())
    }

    /// Class attributes of `type_ref` resolved through its ancestors.
    pub fn resolved_class_attributes(&self, type_ref: &TypeRef) -> Result<BTreeMap<String, Value>> {
        let mut resolved = type_ref.class_attributes.clone();
        let linearization = typegraph_types::c3_linearize(&type_ref.id, |id| {
            if id == type_ref.id {
                Some(type_ref.bases.clone())
            } else {
                self.registry
                    .get_descriptor_by_id(id)
                    .ok()
                    .map(|d| d.type_ref.bases.clone())
            }
        })?;
        for ancestor in linearization.iter().skip(1) {
            let descriptor = self.registry.get_descriptor_by_id(ancestor)?;
            for (name, value) in &descriptor.declared_class_attributes {
                resolved.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(resolved)
    }

    /// Properties of a type node: tag, id and declared class attributes.
    pub fn type_node_properties(type_ref: &TypeRef) -> Properties {
        let mut props = Properties::new();
        props.insert(TYPE_TAG.to_string(), Value::from(PERSISTABLE_TYPE));
        props.insert(ID_KEY.to_string(), Value::from(type_ref.id.as_str()));
        for (name, value) in &type_ref.class_attributes {
            props.insert(name.clone(), class_attribute_primitive(value));
        }
        props
    }

    fn instance_properties(&self, obj: &Instance, include_none: bool) -> Result<Properties> {
        let descriptor = self.registry.get_descriptor_by_id(obj.type_id())?;
        let mut props = Properties::new();
        props.insert(TYPE_TAG.to_string(), Value::from(obj.type_id().as_str()));
        for (name, resolved) in &descriptor.attributes {
            let value = resolved.spec.kind.to_primitive(obj.get(name))?;
            if value.is_null() && !include_none {
                continue;
            }
            props.insert(name.clone(), value);
        }
        Ok(props)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    pub fn object_to_dict(&self, obj: &Persistable, include_none: bool) -> Result<Properties> {
        match obj {
            Persistable::Type(type_ref) => {
                let mut props = Properties::new();
                props.insert(TYPE_TAG.to_string(), Value::from(PERSISTABLE_TYPE));
                props.insert(ID_KEY.to_string(), Value::from(type_ref.id.as_str()));
                for (name, value) in self.resolved_class_attributes(type_ref)? {
                    if value.is_null() && !include_none {
                        continue;
                    }
                    props.insert(name, class_attribute_primitive(&value));
                }
                Ok(props)
            }
            Persistable::Attribute(decl) => Ok(decl.spec.to_properties(&decl.name)?),
            Persistable::Instance(instance) => self.instance_properties(instance, include_none),
            Persistable::Relationship(rel) => self.instance_properties(&rel.instance, include_none),
        }
    }

    pub fn dict_to_object(&self, props: &Properties) -> Result<Persistable> {
        let tag = props
            .get(TYPE_TAG)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TypeError::DeserialisationError(format!(
                    "properties are missing the `{TYPE_TAG}` tag: {props:?}"
                ))
            })?;

        if tag == PERSISTABLE_TYPE {
            return self.type_from_dict(props).map(Persistable::Type);
        }

        if AttributeKind::is_tag(tag) && !self.registry.is_registered(tag) {
            let (name, spec) = AttributeSpec::from_properties(props).ok_or_else(|| {
                TypeError::DeserialisationError(format!("malformed attribute node {props:?}"))
            })?;
            return Ok(Persistable::Attribute(AttributeDecl { name, spec }));
        }

        let descriptor = self.registry.get_descriptor_by_id(tag)?;
        let type_ref = self.registry.get_class_by_id(tag)?;
        let mut values = Properties::new();
        for (name, resolved) in &descriptor.attributes {
            let value = match props.get(name) {
                Some(raw) => resolved.spec.kind.to_native(raw)?,
                None => resolved.spec.default.clone(),
            };
            values.insert(name.clone(), value);
        }
        let instance = Instance::from_parts(type_ref, values);
        if descriptor.is_relationship {
            Ok(Persistable::Relationship(RelationshipInstance {
                instance,
                start: None,
                end: None,
            }))
        } else {
            Ok(Persistable::Instance(instance))
        }
    }

    fn type_from_dict(&self, props: &Properties) -> Result<TypeRef> {
        let id = props.get(ID_KEY).and_then(Value::as_str).ok_or_else(|| {
            TypeError::DeserialisationError(format!("type properties without an id: {props:?}"))
        })?;
        let type_ref = self.registry.get_class_by_id(id)?;
        let resolved = self.resolved_class_attributes(&type_ref)?;

        let mut declared = type_ref.class_attributes.clone();
        let mut changed = false;
        for (name, value) in props {
            if name == TYPE_TAG || name == ID_KEY {
                continue;
            }
            let current = resolved.get(name).map(class_attribute_primitive);
            if current.as_ref() != Some(value) {
                declared.insert(name.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            Ok(std::sync::Arc::new(type_ref.with_class_attributes(declared)))
        } else {
            Ok(type_ref)
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Deduplicated hierarchy triples, ancestors first.
    pub fn get_type_relationships(&self, obj: &Persistable) -> Result<Vec<TypeRelationship>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        match obj {
            Persistable::Type(type_ref) => {
                self.type_relationships(&type_ref.id, type_ref, &mut out, &mut seen)?;
            }
            Persistable::Instance(instance) => {
                self.instance_relationships(instance, &mut out, &mut seen)?;
            }
            Persistable::Relationship(rel) => {
                self.instance_relationships(&rel.instance, &mut out, &mut seen)?;
            }
            Persistable::Attribute(decl) => {
                return Err(TypeError::UnsupportedTypeError(format!(
                    "attribute {} has no type relationships",
                    decl.name
                ))
                .into())
            }
        }
        Ok(out)
    }

    fn instance_relationships(
        &self,
        instance: &Instance,
        out: &mut Vec<TypeRelationship>,
        seen: &mut HashSet<TypeRelationship>,
    ) -> Result<()> {
        let descriptor = self.registry.get_descriptor_by_id(instance.type_id())?;
        self.type_relationships(instance.type_id(), &descriptor.type_ref, out, seen)?;
        out.push(TypeRelationship {
            subject: Subject::Object,
            relation: INSTANCE_OF,
            base_index: None,
            object: instance.type_id().clone(),
        });
        Ok(())
    }

    fn type_relationships(
        &self,
        id: &str,
        top: &TypeRef,
        out: &mut Vec<TypeRelationship>,
        seen: &mut HashSet<TypeRelationship>,
    ) -> Result<()> {
        let marker = TypeRelationship {
            subject: Subject::Type(id.to_string()),
            relation: INSTANCE_OF,
            base_index: None,
            object: PERSISTABLE_TYPE.to_string(),
        };
        if seen.contains(&marker) {
            return Ok(());
        }
        let bases = self.bases_of(id, top)?;
        for base in &bases {
            self.type_relationships(base, top, out, seen)?;
        }
        // a type's node is defined before its own IsA edges refer to it
        if seen.insert(marker.clone()) {
            out.push(marker);
        }
        for (index, base) in bases.iter().enumerate() {
            let triple = TypeRelationship {
                subject: Subject::Type(id.to_string()),
                relation: IS_A,
                base_index: Some(index),
                object: base.clone(),
            };
            if seen.insert(triple.clone()) {
                out.push(triple);
            }
        }
        Ok(())
    }

    /// One idempotent merge creating `type_ref`, its ancestors and every
    /// attribute declaration node, hung off the TypeSystem node.
    pub fn get_create_types_query(
        &self,
        type_ref: &TypeRef,
        type_system_id: &str,
    ) -> Result<(MergePattern, Params)> {
        let triples = self.get_type_relationships(&Persistable::Type(type_ref.clone()))?;

        let mut pattern = MergePattern::new();
        let mut params = Params::new();
        pattern.anchor = Some(MergeAnchor {
            alias: "ts".to_string(),
            label: TYPE_SYSTEM.to_string(),
            key: ID_KEY.to_string(),
            param: "type_system_id".to_string(),
        });
        params.insert(
            "type_system_id".to_string(),
            Param::Value(Value::from(type_system_id)),
        );

        let mut aliases: BTreeMap<TypeId, String> = BTreeMap::new();
        for triple in &triples {
            let Subject::Type(subject) = &triple.subject else {
                continue;
            };
            match triple.relation {
                IS_A => {
                    let (Some(from), Some(to), Some(index)) = (
                        aliases.get(subject),
                        aliases.get(&triple.object),
                        triple.base_index,
                    ) else {
                        // both ends are defined before any IsA triple naming them
                        return Err(TypeError::UnknownType(triple.object.clone()).into());
                    };
                    let param = format!("{from}_isa_{index}");
                    let mut edge_props = Properties::new();
                    edge_props.insert("base_index".to_string(), Value::Int(index as i64));
                    params.insert(param.clone(), Param::Map(edge_props));
                    pattern.edges.push(MergeEdge {
                        from: from.clone(),
                        rel_type: relationship_label(IS_A),
                        to: to.clone(),
                        props_param: Some(param),
                    });
                }
                _ => {
                    let alias = format!("type_{}", aliases.len());
                    let def = if subject == &type_ref.id {
                        type_ref.clone()
                    } else {
                        self.registry.get_descriptor_by_id(subject)?.type_ref.clone()
                    };
                    let props_param = format!("{alias}_props");
                    params.insert(
                        props_param.clone(),
                        Param::Map(Self::type_node_properties(&def)),
                    );
                    pattern.nodes.push(MergeNode {
                        alias: alias.clone(),
                        label: Some(PERSISTABLE_TYPE.to_string()),
                        props_param,
                        identity: NodeIdentity::Key {
                            key: ID_KEY.to_string(),
                        },
                    });
                    if self.bases_of(subject, type_ref)?.is_empty() {
                        pattern.edges.push(MergeEdge {
                            from: "ts".to_string(),
                            rel_type: relationship_label(DEFINES),
                            to: alias.clone(),
                            props_param: None,
                        });
                    }
                    aliases.insert(subject.clone(), alias);
                }
            }
        }

        // attribute declarations, per type in creation order
        let ordered: Vec<(TypeId, String)> = pattern
            .nodes
            .iter()
            .filter_map(|n| {
                aliases
                    .iter()
                    .find(|(_, a)| **a == n.alias)
                    .map(|(id, a)| (id.clone(), a.clone()))
            })
            .collect();
        for (type_id, type_alias) in ordered {
            let declared = self.declared_attributes_of(&type_id, type_ref)?;
            for (i, (name, spec)) in declared.iter().enumerate() {
                let alias = format!("{type_alias}_attr_{i}");
                let props_param = format!("{alias}_props");
                params.insert(props_param.clone(), Param::Map(spec.to_properties(name)?));
                pattern.nodes.push(MergeNode {
                    alias: alias.clone(),
                    label: None,
                    props_param,
                    identity: NodeIdentity::Edge {
                        rel_type: relationship_label(DECLARED_ON),
                        target: type_alias.clone(),
                        key: "name".to_string(),
                    },
                });
                pattern.edges.push(MergeEdge {
                    from: alias,
                    rel_type: relationship_label(DECLARED_ON),
                    to: type_alias.clone(),
                    props_param: None,
                });
            }
        }

        Ok((pattern, params))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Indexed lookup for a type or instance node.
    pub fn node_lookup(&self, obj: &Persistable, alias: &str) -> Result<NodeLookup> {
        match obj {
            Persistable::Type(type_ref) => Ok(NodeLookup {
                alias: alias.to_string(),
                label: PERSISTABLE_TYPE.to_string(),
                key: ID_KEY.to_string(),
                value: Value::from(type_ref.id.as_str()),
            }),
            Persistable::Instance(instance) => {
                let entries = self.registry.index_entries(instance)?;
                let (label, key, value) = entries.into_iter().next().ok_or_else(|| {
                    TypeError::NoUniqueAttributeError(format!(
                        "{} doesn't have any unique attributes",
                        obj.describe()
                    ))
                })?;
                Ok(NodeLookup {
                    alias: alias.to_string(),
                    label,
                    key,
                    value,
                })
            }
            Persistable::Relationship(_) | Persistable::Attribute(_) => {
                Err(TypeError::UnsupportedTypeError(format!(
                    "{} is not matched by a single node",
                    obj.describe()
                ))
                .into())
            }
        }
    }

    pub fn get_match_clause(&self, obj: &Persistable, name: &str) -> Result<MatchClause> {
        match obj {
            Persistable::Relationship(rel) => {
                let (start, end) = self.endpoint_lookups(rel)?;
                Ok(MatchClause::relationship(
                    name,
                    relationship_label(rel.type_id()),
                    start,
                    end,
                ))
            }
            _ => Ok(MatchClause::Node(self.node_lookup(obj, name)?)),
        }
    }

    /// Match clause named after the object's type.
    pub fn get_lookup_clause(&self, obj: &Persistable) -> Result<MatchClause> {
        let name = match obj {
            Persistable::Type(_) => "type".to_string(),
            Persistable::Instance(i) => i.type_id().to_lowercase(),
            Persistable::Relationship(r) => r.type_id().to_lowercase(),
            Persistable::Attribute(a) => a.name.clone(),
        };
        self.get_match_clause(obj, &name)
    }

    fn endpoint_lookups(&self, rel: &RelationshipInstance) -> Result<(NodeLookup, NodeLookup)> {
        let missing = || {
            TypeError::NoUniqueAttributeError(format!(
                "{} relationship is missing a start or end node",
                rel.type_id()
            ))
        };
        let start = rel.start.as_deref().ok_or_else(missing)?;
        let end = rel.end.as_deref().ok_or_else(missing)?;
        Ok((
            self.node_lookup(start, "start")?,
            self.node_lookup(end, "end")?,
        ))
    }

    pub fn get_create_relationship_query(
        &self,
        rel: &RelationshipInstance,
    ) -> Result<CreateRelationship> {
        let (start, end) = self.endpoint_lookups(rel)?;
        let mut properties = self.instance_properties(&rel.instance, false)?;
        properties.insert(TYPE_TAG.to_string(), Value::from(rel.type_id().as_str()));
        Ok(CreateRelationship {
            start,
            end,
            rel_type: relationship_label(rel.type_id()),
            properties,
        })
    }
}

/// Properties to write to turn `old` into `new`; `Null` marks a removal.
pub fn get_changes(old: &Properties, new: &Properties) -> Properties {
    let mut changes = Properties::new();
    for (key, value) in new {
        if old.get(key) != Some(value) {
            changes.insert(key.clone(), value.clone());
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.insert(key.clone(), Value::Null);
        }
    }
    changes
}

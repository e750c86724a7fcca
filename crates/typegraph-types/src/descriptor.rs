//! Per-type resolved metadata.
//!
//! A descriptor is computed from a type's linearization: walking from the
//! most-derived type to the least-derived one, the first declaration of each
//! attribute (or class attribute) name wins and later ones are shadowed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeSpec;
use crate::types::TypeRef;
use crate::value::Value;
use crate::{TypeId, RELATIONSHIP_TYPE};

/// An attribute together with the type that declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttribute {
    pub declared_on: TypeId,
    pub spec: AttributeSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub type_id: TypeId,
    /// The definition used for resolution (dynamic wins over static).
    pub type_ref: TypeRef,
    pub linearization: Vec<TypeId>,
    pub declared_attributes: BTreeMap<String, AttributeSpec>,
    pub attributes: BTreeMap<String, ResolvedAttribute>,
    pub declared_class_attributes: BTreeMap<String, Value>,
    pub class_attributes: BTreeMap<String, Value>,
    /// `(owning type, attribute name)` in linearization order.
    pub unique_attributes: Vec<(TypeId, String)>,
    pub is_relationship: bool,
}

impl Descriptor {
    /// Build a descriptor. `definitions` must yield the effective definition
    /// for every id in `linearization`.
    pub fn compute<'a, F>(type_ref: TypeRef, linearization: Vec<TypeId>, definitions: F) -> Self
    where
        F: Fn(&str) -> Option<&'a TypeRef>,
    {
        let mut attributes: BTreeMap<String, ResolvedAttribute> = BTreeMap::new();
        let mut class_attributes = BTreeMap::new();
        let mut unique_attributes = Vec::new();

        for ancestor_id in &linearization {
            let Some(ancestor) = definitions(ancestor_id) else {
                continue;
            };
            for (name, spec) in &ancestor.declared_attributes {
                if attributes.contains_key(name) {
                    continue;
                }
                if spec.unique {
                    unique_attributes.push((ancestor_id.clone(), name.clone()));
                }
                attributes.insert(
                    name.clone(),
                    ResolvedAttribute {
                        declared_on: ancestor_id.clone(),
                        spec: spec.clone(),
                    },
                );
            }
            for (name, value) in &ancestor.class_attributes {
                class_attributes
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let is_relationship = linearization.iter().any(|t| t == RELATIONSHIP_TYPE);

        Descriptor {
            type_id: type_ref.id.clone(),
            declared_attributes: type_ref.declared_attributes.clone(),
            declared_class_attributes: type_ref.class_attributes.clone(),
            type_ref,
            linearization,
            attributes,
            class_attributes,
            unique_attributes,
            is_relationship,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name).map(|r| &r.spec)
    }

    /// Strict ancestors in linearization order (excludes the type itself).
    pub fn ancestors(&self) -> &[TypeId] {
        self.linearization.get(1..).unwrap_or(&[])
    }

    pub fn is_subtype_of(&self, other: &str) -> bool {
        self.linearization.iter().any(|t| t == other)
    }

    /// Distinct declaring types of the unique attributes, in order. These
    /// are the labels an instance node carries.
    pub fn labels(&self) -> Vec<TypeId> {
        let mut labels: Vec<TypeId> = Vec::new();
        for (owner, _) in &self.unique_attributes {
            if !labels.contains(owner) {
                labels.push(owner.clone());
            }
        }
        labels
    }

    /// Inherited attributes as `name -> spec`, excluding this type's own
    /// declarations. Reparenting must keep this map shape-identical.
    pub fn inherited_attributes(&self) -> BTreeMap<String, AttributeSpec> {
        self.attributes
            .iter()
            .filter(|(_, r)| r.declared_on != self.type_id)
            .map(|(name, r)| (name.clone(), r.spec.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDecl;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn first_declaration_in_linearization_wins() {
        let base = Arc::new(
            TypeDecl::new("Base", ["Entity"])
                .attribute("name", crate::AttributeSpec::string().unique())
                .attribute("size", crate::AttributeSpec::integer())
                .class_attribute("colour", "blue")
                .into_static(),
        );
        let derived = Arc::new(
            TypeDecl::new("Derived", ["Base"])
                .attribute("size", crate::AttributeSpec::float())
                .class_attribute("colour", "red")
                .into_static(),
        );
        let defs: HashMap<String, TypeRef> = [
            ("Base".to_string(), base.clone()),
            ("Derived".to_string(), derived.clone()),
        ]
        .into_iter()
        .collect();

        let d = Descriptor::compute(
            derived,
            vec!["Derived".into(), "Base".into(), "Entity".into()],
            |id| defs.get(id),
        );

        assert_eq!(d.attributes["size"].declared_on, "Derived");
        assert_eq!(d.attributes["name"].declared_on, "Base");
        assert_eq!(d.class_attributes["colour"], Value::from("red"));
        assert_eq!(d.unique_attributes, vec![("Base".to_string(), "name".to_string())]);
        assert_eq!(d.labels(), vec!["Base".to_string()]);
        assert_eq!(
            d.inherited_attributes().keys().collect::<Vec<_>>(),
            vec!["name"]
        );
    }
}

//! Explicit collection of statically declared types.
//!
//! Declaring a type has no side effects; declarations are gathered into a
//! [`TypeCollector`] and handed to the registry in one go.

use std::collections::{BTreeMap, HashSet};

use crate::attribute::AttributeSpec;
use crate::error::{Result, TypeError};
use crate::types::TypeDecl;
use crate::{
    TypeId, DECLARED_ON, DEFINES, ENTITY_TYPE, INSTANCE_OF, IS_A, RELATIONSHIP_TYPE, ROOT_TYPE,
};

/// The types every registry starts with.
pub fn builtin_types() -> Vec<TypeDecl> {
    let no_bases: [&str; 0] = [];
    vec![
        TypeDecl::new(ROOT_TYPE, no_bases),
        TypeDecl::new(ENTITY_TYPE, [ROOT_TYPE]),
        TypeDecl::new(RELATIONSHIP_TYPE, [ROOT_TYPE]),
        TypeDecl::new(IS_A, [RELATIONSHIP_TYPE]).attribute("base_index", AttributeSpec::integer()),
        TypeDecl::new(INSTANCE_OF, [RELATIONSHIP_TYPE]),
        TypeDecl::new(DECLARED_ON, [RELATIONSHIP_TYPE]),
        TypeDecl::new(DEFINES, [RELATIONSHIP_TYPE]),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct TypeCollector {
    decls: Vec<TypeDecl>,
}

impl TypeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration.
    ///
    /// Fails with `TypeAlreadyCollected` for a repeated id, or for a
    /// relationship type whose upper-cased id collides with one already
    /// collected (both would map onto the same edge label).
    pub fn collect(&mut self, decl: TypeDecl) -> Result<()> {
        if self.decls.iter().any(|d| d.id == decl.id) {
            return Err(TypeError::TypeAlreadyCollected(decl.id));
        }
        if self.is_relationship(&decl.bases) {
            let label = decl.id.to_uppercase();
            let clash = self
                .decls
                .iter()
                .filter(|d| self.is_relationship(&d.bases))
                .any(|d| d.id.to_uppercase() == label);
            if clash {
                return Err(TypeError::TypeAlreadyCollected(decl.id));
            }
        }
        self.decls.push(decl);
        Ok(())
    }

    pub fn with(mut self, decl: TypeDecl) -> Result<Self> {
        self.collect(decl)?;
        Ok(self)
    }

    pub fn decls(&self) -> &[TypeDecl] {
        &self.decls
    }

    pub fn into_decls(self) -> Vec<TypeDecl> {
        self.decls
    }

    /// Whether `bases` reach the relationship root through collected or
    /// builtin declarations.
    fn is_relationship(&self, bases: &[TypeId]) -> bool {
        let builtins: BTreeMap<TypeId, Vec<TypeId>> = builtin_types()
            .into_iter()
            .map(|d| (d.id, d.bases))
            .collect();
        let mut stack: Vec<&TypeId> = bases.iter().collect();
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == RELATIONSHIP_TYPE {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(d) = self.decls.iter().find(|d| &d.id == id) {
                stack.extend(d.bases.iter());
            } else if let Some(b) = builtins.get(id) {
                stack.extend(b.iter());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut c = TypeCollector::new();
        c.collect(TypeDecl::new("Thing", [ENTITY_TYPE])).unwrap();
        assert_eq!(
            c.collect(TypeDecl::new("Thing", [ENTITY_TYPE])),
            Err(TypeError::TypeAlreadyCollected("Thing".into()))
        );
    }

    #[test]
    fn relationship_labels_clash_case_insensitively() {
        let mut c = TypeCollector::new();
        c.collect(TypeDecl::new("Connects", [RELATIONSHIP_TYPE])).unwrap();
        assert!(matches!(
            c.collect(TypeDecl::new("CONNECTS", [RELATIONSHIP_TYPE])),
            Err(TypeError::TypeAlreadyCollected(_))
        ));
        // entities may differ only by case
        c.collect(TypeDecl::new("Widget", [ENTITY_TYPE])).unwrap();
        c.collect(TypeDecl::new("WIDGET", [ENTITY_TYPE])).unwrap();
    }
}

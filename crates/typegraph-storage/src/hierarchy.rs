//! Hierarchy consistency checks for reparenting.
//!
//! Changing a type's bases is validated against a working copy of the whole
//! hierarchy before anything is written:
//!
//! ```text
//! hierarchy ──swap bases──► working copy ──reorder──► C3 every entry
//!                                │              │            │
//!                           UnknownType       Cycle    Inconsistent /
//!                                                       DuplicateBase
//! ```
//!
//! The reorder step keeps the target (and anything that depends on it)
//! deferred until every one of its new bases has been placed. Whatever is
//! still deferred at the end sits on a cycle.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use typegraph_types::{
    linearize_hierarchy, Descriptor, LinearizationError, Persistable, RegistrySnapshot,
    TypeError, TypeId, TypeRef,
};

use crate::error::{Error, Result};

pub type Hierarchy = Vec<(TypeId, Vec<TypeId>)>;

/// Validate replacing `type_id`'s bases with `new_bases` and return the
/// amended hierarchy, bases before subtypes.
pub fn validate_base_change(
    hierarchy: &[(TypeId, Vec<TypeId>)],
    type_id: &str,
    new_bases: &[TypeId],
) -> Result<Hierarchy> {
    let known: HashSet<&str> = hierarchy.iter().map(|(id, _)| id.as_str()).collect();
    if !known.contains(type_id) {
        return Err(TypeError::UnknownType(type_id.to_string()).into());
    }
    if let Some(missing) = new_bases.iter().find(|b| !known.contains(b.as_str())) {
        return Err(TypeError::UnknownType(missing.clone()).into());
    }
    let mut seen = HashSet::new();
    if let Some(dup) = new_bases.iter().find(|b| !seen.insert(b.as_str())) {
        return Err(LinearizationError::DuplicateBase {
            type_id: type_id.to_string(),
            base: dup.clone(),
        }
        .into());
    }

    let working: Hierarchy = hierarchy
        .iter()
        .map(|(id, bases)| {
            if id == type_id {
                (id.clone(), new_bases.to_vec())
            } else {
                (id.clone(), bases.clone())
            }
        })
        .collect();

    let reordered = reorder(working)?;
    linearize_hierarchy(&reordered)?;
    Ok(reordered)
}

/// Stable topological reorder: an entry is placed once all its bases are,
/// deferred entries are retried after every placement.
fn reorder(entries: Hierarchy) -> Result<Hierarchy> {
    let mut placed: HashSet<TypeId> = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    let mut deferred: Vec<(TypeId, Vec<TypeId>)> = Vec::new();

    for entry in entries {
        if entry.1.iter().all(|b| placed.contains(b)) {
            placed.insert(entry.0.clone());
            out.push(entry);
            drain_deferred(&mut deferred, &mut placed, &mut out);
        } else {
            deferred.push(entry);
        }
    }

    if let Some((type_id, _)) = deferred.first() {
        return Err(LinearizationError::Cycle {
            type_id: type_id.clone(),
        }
        .into());
    }
    Ok(out)
}

fn drain_deferred(deferred: &mut Hierarchy, placed: &mut HashSet<TypeId>, out: &mut Hierarchy) {
    loop {
        let Some(pos) = deferred
            .iter()
            .position(|(_, bases)| bases.iter().all(|b| placed.contains(b)))
        else {
            return;
        };
        let entry = deferred.remove(pos);
        placed.insert(entry.0.clone());
        out.push(entry);
    }
}

/// A snapshot reflecting the base change, built without touching the live
/// registry.
pub fn registry_with_base_change(
    snapshot: &RegistrySnapshot,
    type_id: &str,
    new_bases: &[TypeId],
) -> Result<RegistrySnapshot> {
    let mut static_types = snapshot.static_types().clone();
    let mut dynamic_types = snapshot.dynamic_types().clone();
    let map = if dynamic_types.contains_key(type_id) {
        &mut dynamic_types
    } else {
        &mut static_types
    };
    let current = map
        .get(type_id)
        .ok_or_else(|| TypeError::UnknownType(type_id.to_string()))?;
    let amended: TypeRef = Arc::new(current.with_bases(new_bases.to_vec()));
    map.insert(type_id.to_string(), amended);

    Ok(RegistrySnapshot::build(static_types, dynamic_types)?
        .with_types_in_db(snapshot.types_in_db().clone())
        .with_source_version(snapshot.source_version().map(str::to_string)))
}

/// Ids of every registered type with `type_id` among its strict ancestors.
pub fn subclasses_of(snapshot: &RegistrySnapshot, type_id: &str) -> Vec<TypeId> {
    snapshot
        .descriptors()
        .filter(|d| d.ancestors().iter().any(|a| a == type_id))
        .map(|d| d.type_id.clone())
        .collect()
}

// ============================================================================
// Reparent planning
// ============================================================================

/// A validated reparent, ready to be written.
#[derive(Debug, Clone)]
pub struct ReparentPlan {
    pub type_id: TypeId,
    pub old_bases: Vec<TypeId>,
    pub new_bases: Vec<TypeId>,
    pub subclasses: Vec<TypeId>,
    /// The registry as it will look once the change is applied.
    pub amended: RegistrySnapshot,
}

pub struct HierarchyConsistencyEngine<'r> {
    registry: &'r RegistrySnapshot,
}

impl<'r> HierarchyConsistencyEngine<'r> {
    pub fn new(registry: &'r RegistrySnapshot) -> Self {
        Self { registry }
    }

    /// Check a reparent of `obj` onto `new_bases`. `persisted` reports
    /// whether a type node exists in the store.
    pub fn plan_update(
        &self,
        obj: &Persistable,
        new_bases: &[TypeId],
        persisted: impl Fn(&str) -> Result<bool>,
    ) -> Result<ReparentPlan> {
        let Persistable::Type(type_ref) = obj else {
            return Err(TypeError::UnsupportedTypeError(format!(
                "{} is not a type",
                obj.describe()
            ))
            .into());
        };
        let type_id = type_ref.id.as_str();

        // a dynamic definition shadowing a static id can still be moved
        if type_ref.is_static() {
            return Err(Error::cannot_update(type_id, "defined in code"));
        }

        for id in std::iter::once(type_id).chain(new_bases.iter().map(String::as_str)) {
            if !self.registry.is_registered(id) || !persisted(id)? {
                return Err(Error::cannot_update(type_id, "type or bases not found"));
            }
        }

        let mut seen = HashSet::new();
        if new_bases.iter().any(|b| !seen.insert(b.as_str())) {
            return Err(Error::cannot_update(type_id, "duplicate base class"));
        }

        validate_base_change(&self.registry.hierarchy(), type_id, new_bases)?;
        let amended = registry_with_base_change(self.registry, type_id, new_bases)?;

        let before = self.registry.get_descriptor_by_id(type_id)?;
        let after = amended.get_descriptor_by_id(type_id)?;
        if !same_inherited_attributes(&before, &after) {
            return Err(Error::cannot_update(
                type_id,
                "inherited attributes are not identical",
            ));
        }

        let subclasses = subclasses_of(self.registry, type_id);
        self.ensure_subclasses_remain_consistent(type_id, &subclasses, &amended)?;

        Ok(ReparentPlan {
            type_id: type_id.to_string(),
            old_bases: before.type_ref.bases.clone(),
            new_bases: new_bases.to_vec(),
            subclasses,
            amended,
        })
    }

    /// Re-resolve every listed subclass of `type_id` in `after`, the
    /// registry once the change is applied. Each one must still linearize,
    /// keep `type_id` as an ancestor and inherit the same attributes it
    /// does in this engine's registry.
    pub fn ensure_subclasses_remain_consistent(
        &self,
        type_id: &str,
        subclass_ids: &[TypeId],
        after: &RegistrySnapshot,
    ) -> Result<Vec<Arc<Descriptor>>> {
        let linearizations = linearize_hierarchy(&after.hierarchy())?;
        let mut out = Vec::with_capacity(subclass_ids.len());
        for id in subclass_ids {
            let before = self.registry.get_descriptor_by_id(id)?;
            let resolved = after.get_descriptor_by_id(id)?;
            let expected = linearizations
                .get(id)
                .ok_or_else(|| TypeError::UnknownType(id.clone()))?;
            if &resolved.linearization != expected || !resolved.is_subtype_of(type_id) {
                return Err(TypeError::InvalidType {
                    type_id: id.clone(),
                    reason: format!("no longer resolves through `{type_id}`"),
                }
                .into());
            }
            if !same_inherited_attributes(&before, &resolved) {
                return Err(Error::cannot_update(
                    id,
                    "inherited attributes of a subclass are not identical",
                ));
            }
            out.push(resolved);
        }
        Ok(out)
    }
}

/// Inherited attributes compared by name and kind.
fn same_inherited_attributes(before: &Descriptor, after: &Descriptor) -> bool {
    let a = before.inherited_attributes();
    let b = after.inherited_attributes();
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((na, sa), (nb, sb))| na == nb && sa.same_shape(sb))
}

/// Longest-path depth of every type from the roots of `hierarchy`.
pub fn levels(hierarchy: &[(TypeId, Vec<TypeId>)]) -> BTreeMap<TypeId, usize> {
    let mut levels: BTreeMap<TypeId, usize> = BTreeMap::new();
    // entries arrive bases-first
    for (id, bases) in hierarchy {
        let level = bases
            .iter()
            .filter_map(|b| levels.get(b))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        levels.insert(id.clone(), level);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use typegraph_types::{
        AttributeSpec, Members, Origin, TypeCollector, TypeDecl, TypeRegistry, ENTITY_TYPE,
    };

    fn h(entries: &[(&str, &[&str])]) -> Hierarchy {
        entries
            .iter()
            .map(|(id, bases)| (id.to_string(), bases.iter().map(|b| b.to_string()).collect()))
            .collect()
    }

    fn ids(bases: &[&str]) -> Vec<TypeId> {
        bases.iter().map(|b| b.to_string()).collect()
    }

    #[test]
    fn moving_a_type_below_a_later_sibling_reorders() {
        let hierarchy = h(&[("O", &[]), ("A", &["O"]), ("B", &["O"]), ("C", &["O"])]);
        let out = validate_base_change(&hierarchy, "A", &ids(&["C"])).unwrap();
        let order: Vec<&str> = out.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["O", "B", "C", "A"]);
    }

    #[test]
    fn reparenting_under_a_descendant_is_a_cycle() {
        let hierarchy = h(&[("O", &[]), ("A", &["O"]), ("B", &["A"]), ("A3", &["B"])]);
        let err = validate_base_change(&hierarchy, "B", &ids(&["A3"])).unwrap_err();
        let lin = err.linearization().unwrap();
        assert!(lin.is_cycle());
        assert!(err.to_string().contains("inheritance cycle"));
    }

    #[test]
    fn conflicting_orders_are_not_cycles() {
        let hierarchy = h(&[
            ("O", &[]),
            ("X", &["O"]),
            ("Y", &["O"]),
            ("A", &["X", "Y"]),
            ("B", &["X", "Y"]),
            ("AB", &["A", "B"]),
        ]);
        let err = validate_base_change(&hierarchy, "B", &ids(&["Y", "X"])).unwrap_err();
        let lin = err.linearization().unwrap();
        assert!(!lin.is_cycle());
        assert!(err.to_string().contains("no consistent linearization"));
    }

    #[test]
    fn unknown_and_duplicate_bases() {
        let hierarchy = h(&[("O", &[]), ("A", &["O"])]);
        assert!(matches!(
            validate_base_change(&hierarchy, "A", &ids(&["Nope"])),
            Err(Error::Type(TypeError::UnknownType(_)))
        ));
        assert!(matches!(
            validate_base_change(&hierarchy, "Nope", &ids(&["O"])),
            Err(Error::Type(TypeError::UnknownType(_)))
        ));
        let err = validate_base_change(&hierarchy, "A", &ids(&["O", "O"])).unwrap_err();
        assert!(err.to_string().contains("duplicate base class"));
    }

    fn animals() -> TypeRegistry {
        let reg = TypeRegistry::new();
        reg.create_type(
            "Animal",
            [ENTITY_TYPE],
            Members::new().attribute("name", AttributeSpec::string().unique()),
        )
        .unwrap();
        reg.create_type("Mammal", ["Animal"], Members::new()).unwrap();
        reg.create_type("Cetacean", ["Mammal"], Members::new()).unwrap();
        reg.create_type("Whale", ["Mammal"], Members::new()).unwrap();
        reg.create_type("Blue", ["Whale"], Members::new()).unwrap();
        reg.create_type(
            "Fish",
            ["Animal"],
            Members::new().attribute("fins", AttributeSpec::integer()),
        )
        .unwrap();
        reg
    }

    #[test]
    fn plan_update_checks_in_order() {
        let reg = animals();
        let snap = reg.snapshot();
        let engine = HierarchyConsistencyEngine::new(&snap);
        let whale = Persistable::Type(snap.get_class_by_id("Whale").unwrap());
        let everything = |_: &str| -> Result<bool> { Ok(true) };

        let plan = engine.plan_update(&whale, &ids(&["Cetacean"]), everything).unwrap();
        assert_eq!(plan.old_bases, ids(&["Mammal"]));
        assert_eq!(plan.subclasses, ids(&["Blue"]));
        assert!(plan
            .amended
            .get_descriptor_by_id("Blue")
            .unwrap()
            .is_subtype_of("Cetacean"));
        // the live snapshot is untouched
        assert!(!snap.get_descriptor_by_id("Blue").unwrap().is_subtype_of("Cetacean"));

        let err = engine
            .plan_update(&whale, &ids(&["Cetacean"]), |id: &str| -> Result<bool> { Ok(id != "Cetacean") })
            .unwrap_err();
        assert!(err.to_string().contains("type or bases not found"));

        let err = engine
            .plan_update(&whale, &ids(&["Fish"]), everything)
            .unwrap_err();
        assert!(err.to_string().contains("inherited attributes are not identical"));

        let err = engine
            .plan_update(&whale, &ids(&["Mammal", "Mammal"]), everything)
            .unwrap_err();
        assert!(err.to_string().contains("duplicate base class"));

        let entity = Persistable::Type(snap.get_class_by_id(ENTITY_TYPE).unwrap());
        let err = engine.plan_update(&entity, &ids(&["Animal"]), everything).unwrap_err();
        assert!(err.to_string().contains("defined in code"));
    }

    #[test]
    fn subclasses_stay_consistent() {
        let reg = animals();
        let snap = reg.snapshot();
        let engine = HierarchyConsistencyEngine::new(&snap);
        let subs = subclasses_of(&snap, "Whale");
        assert_eq!(subs, ids(&["Blue"]));

        let moved = registry_with_base_change(&snap, "Whale", &ids(&["Cetacean"])).unwrap();
        let resolved = engine
            .ensure_subclasses_remain_consistent("Whale", &subs, &moved)
            .unwrap();
        assert!(resolved[0].is_subtype_of("Cetacean"));
        assert!(!snap.get_descriptor_by_id("Blue").unwrap().is_subtype_of("Cetacean"));
    }

    #[test]
    fn subclass_attribute_drift_is_rejected() {
        let reg = TypeRegistry::new();
        let int = || Members::new().attribute("a", AttributeSpec::integer());
        reg.create_type("Y", [ENTITY_TYPE], int()).unwrap();
        reg.create_type("Y2", [ENTITY_TYPE], int()).unwrap();
        reg.create_type("X", ["Y"], Members::new().attribute("a", AttributeSpec::string()))
            .unwrap();
        reg.create_type("T", ["Y"], Members::new()).unwrap();
        reg.create_type("Sub", ["T", "X"], Members::new()).unwrap();
        let snap = reg.snapshot();
        let engine = HierarchyConsistencyEngine::new(&snap);
        let t = Persistable::Type(snap.get_class_by_id("T").unwrap());

        // T itself inherits an integer `a` either way, Sub would not
        let err = engine
            .plan_update(&t, &ids(&["Y2"]), |_: &str| -> Result<bool> { Ok(true) })
            .unwrap_err();
        assert!(matches!(err, Error::CannotUpdateType { ref type_id, .. } if type_id == "Sub"));
        assert!(err.to_string().contains("subclass"));
    }

    #[test]
    fn dynamic_shadow_of_a_static_type_can_be_reparented() {
        let collector = TypeCollector::new()
            .with(TypeDecl::new("Vehicle", [ENTITY_TYPE]))
            .unwrap();
        let reg = TypeRegistry::with_collected(collector).unwrap();
        reg.create_type("Machine", [ENTITY_TYPE], Members::new()).unwrap();
        let declared = reg.get_class_by_id("Vehicle").unwrap();
        let shadow = reg.upsert_dynamic(declared.reborn(Origin::Dynamic)).unwrap();
        let snap = reg.snapshot();
        assert!(snap.is_static_type("Vehicle"));
        let engine = HierarchyConsistencyEngine::new(&snap);
        let everything = |_: &str| -> Result<bool> { Ok(true) };

        let plan = engine
            .plan_update(&Persistable::Type(shadow), &ids(&["Machine"]), everything)
            .unwrap();
        assert_eq!(plan.old_bases, ids(&[ENTITY_TYPE]));
        assert!(plan
            .amended
            .get_descriptor_by_id("Vehicle")
            .unwrap()
            .is_subtype_of("Machine"));
        assert!(plan.amended.static_types()["Vehicle"].same(&declared));

        let err = engine
            .plan_update(&Persistable::Type(declared), &ids(&["Machine"]), everything)
            .unwrap_err();
        assert!(err.to_string().contains("defined in code"));
    }

    #[test]
    fn levels_follow_longest_path() {
        let hierarchy = h(&[("O", &[]), ("A", &["O"]), ("B", &["O", "A"])]);
        let lv = levels(&hierarchy);
        assert_eq!(lv["O"], 0);
        assert_eq!(lv["A"], 1);
        assert_eq!(lv["B"], 2);
    }
}

//! Integration tests for the complete typegraph pipeline
//!
//! These tests drive a `Manager` over a `MemoryGraph` end to end:
//! - type definitions → graph nodes → reloaded registry
//! - instances and relationships → structural version
//! - reparenting through the hierarchy consistency checks
//!
//! Run with: cargo test --test integration_tests

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::tempdir;
use typegraph_storage::{Error, Manager, ManagerConfig};
use typegraph_store::{GraphStore, MemoryGraph};
use typegraph_types::{
    AttributeSpec, Members, Persistable, Properties, TypeError, TypeId, TypeRef, Value,
    ENTITY_TYPE, RELATIONSHIP_TYPE,
};

fn manager_over(graph: &Arc<MemoryGraph>) -> Manager {
    let config = ManagerConfig {
        share_type_cache: false,
        ..ManagerConfig::default()
    };
    Manager::new(graph.clone(), config).expect("manager should bootstrap")
}

fn fresh_manager() -> (Manager, Arc<MemoryGraph>) {
    let graph = Arc::new(MemoryGraph::new());
    (manager_over(&graph), graph)
}

fn define(manager: &Manager, id: &str, bases: &[&str], members: Members) -> TypeRef {
    let t = manager
        .create_type(id, bases.iter().copied(), members)
        .expect("type should resolve");
    manager
        .save(t)
        .expect("type should save")
        .as_type()
        .cloned()
        .expect("saving a type returns a type")
}

fn by_name(name: &str) -> Properties {
    let mut f = Properties::new();
    f.insert("name".to_string(), Value::from(name));
    f
}

fn bases_of(manager: &Manager, id: &str) -> Vec<TypeId> {
    manager
        .get_type_hierarchy(None)
        .unwrap()
        .into_iter()
        .find(|e| e.type_id == id)
        .map(|e| e.bases)
        .unwrap_or_default()
}

/// Animal → Mammal → {Cetacean, Whale}, Animal → Fish
fn zoo(manager: &Manager) {
    define(
        manager,
        "Animal",
        &[ENTITY_TYPE],
        Members::new()
            .attribute("name", AttributeSpec::string().unique())
            .attribute("weight", AttributeSpec::float()),
    );
    define(manager, "Mammal", &["Animal"], Members::new().class_attribute("warm_blooded", true));
    define(manager, "Cetacean", &["Mammal"], Members::new().class_attribute("aquatic", true));
    define(manager, "Whale", &["Mammal"], Members::new());
    define(
        manager,
        "Fish",
        &["Animal"],
        Members::new().attribute("fins", AttributeSpec::integer()),
    );
}

// ============================================================================
// Topological hierarchy
// ============================================================================

#[test]
fn test_hierarchy_lists_bases_first() {
    let (manager, _graph) = fresh_manager();
    zoo(&manager);

    let entries = manager.get_type_hierarchy(None).unwrap();
    let position: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.type_id.as_str(), i))
        .collect();
    for entry in &entries {
        for base in &entry.bases {
            assert!(
                position[base.as_str()] < position[entry.type_id.as_str()],
                "{base} should come before {}",
                entry.type_id
            );
        }
    }
    for id in ["Animal", "Mammal", "Cetacean", "Whale", "Fish"] {
        assert!(position.contains_key(id), "{id} missing from hierarchy");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_persisted_hierarchy_is_topological(
        shape in prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), 1..7)
    ) {
        let (manager, _graph) = fresh_manager();
        let mut created: Vec<String> = Vec::new();
        for (i, picks) in shape.iter().enumerate() {
            let mut bases: Vec<String> = Vec::new();
            if !created.is_empty() {
                for pick in picks {
                    let base = pick.get(&created).clone();
                    if !bases.contains(&base) {
                        bases.push(base);
                    }
                }
            }
            if bases.is_empty() {
                bases.push(ENTITY_TYPE.to_string());
            }
            let id = format!("T{i}");
            // inconsistent base orders are rejected up front and skipped
            if let Ok(t) = manager.create_type(id.as_str(), bases, Members::new()) {
                manager.save(t).unwrap();
                created.push(id);
            }
        }

        let entries = manager.get_type_hierarchy(None).unwrap();
        let position: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.type_id.as_str(), i))
            .collect();
        for id in &created {
            prop_assert!(position.contains_key(id.as_str()));
        }
        for entry in &entries {
            for base in &entry.bases {
                prop_assert!(position[base.as_str()] < position[entry.type_id.as_str()]);
            }
        }
    }
}

// ============================================================================
// Structural version
// ============================================================================

#[test]
fn test_version_changes_only_for_structural_writes() {
    let (manager, _graph) = fresh_manager();
    define(
        &manager,
        "A",
        &[ENTITY_TYPE],
        Members::new().attribute("name", AttributeSpec::string().unique()),
    );
    define(&manager, "Likes", &[RELATIONSHIP_TYPE], Members::new());
    let v0 = manager.structural_version().unwrap();

    let first = manager
        .save(manager.new_instance("A").unwrap().with("name", "first"))
        .unwrap();
    assert_eq!(manager.structural_version().unwrap(), v0);

    let a = manager.get_class_by_id("A").unwrap();
    manager
        .save(Arc::new(a.with_class_attribute("colour", "green")))
        .unwrap();
    let v1 = manager.structural_version().unwrap();
    assert_ne!(v1, v0);

    let second = manager
        .save(manager.new_instance("A").unwrap().with("name", "second"))
        .unwrap();
    let likes = manager.new_relationship("Likes").unwrap().between(first.clone(), second);
    manager.save(likes).unwrap();
    assert_eq!(manager.structural_version().unwrap(), v1);

    manager.delete(first).unwrap();
    assert_eq!(manager.structural_version().unwrap(), v1);

    let descriptor = manager.get_descriptor_by_id("A").unwrap();
    assert_eq!(descriptor.class_attributes["colour"], Value::from("green"));
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_instance_round_trip_keeps_values_and_identity() {
    let (manager, graph) = fresh_manager();
    define(
        &manager,
        "Part",
        &[ENTITY_TYPE],
        Members::new()
            .attribute("uid", AttributeSpec::uuid().unique())
            .attribute("name", AttributeSpec::string())
            .attribute("price", AttributeSpec::decimal())
            .attribute("mass", AttributeSpec::float())
            .attribute("active", AttributeSpec::bool().with_default(true))
            .attribute("finish", AttributeSpec::choice(["matte", "gloss"]))
            .attribute("size", AttributeSpec::tuple()),
    );
    let part = manager
        .new_instance("Part")
        .unwrap()
        .with("name", "bracket")
        .with("price", Value::Decimal("12.50".to_string()))
        .with("mass", 0.25)
        .with("finish", "matte")
        .with("size", Value::List(vec![Value::Int(4), Value::Int(2)]));
    assert!(matches!(part.get("uid"), Value::Uuid(_)));

    let props = manager.serialize(&Persistable::Instance(part.clone())).unwrap();
    assert_eq!(manager.deserialize(&props).unwrap(), Persistable::Instance(part.clone()));

    let saved = manager.save(part.clone()).unwrap();
    let saved = saved.as_instance().unwrap();

    // a second manager reads the same object back
    let other = manager_over(&graph);
    let mut filter = Properties::new();
    filter.insert("uid".to_string(), part.get("uid").clone());
    let loaded = other.get("Part", &filter).unwrap().expect("part should be found");
    let loaded = loaded.as_instance().unwrap();
    assert_eq!(loaded.values, saved.values);
    assert_eq!(loaded.type_id(), "Part");
    assert_eq!(loaded.get("active"), &Value::Bool(true));
}

#[test]
fn test_type_round_trip_keeps_identity() {
    let (manager, _graph) = fresh_manager();
    zoo(&manager);
    let mammal = manager.get_class_by_id("Mammal").unwrap();
    let props = manager.serialize(&Persistable::Type(mammal.clone())).unwrap();
    assert_eq!(props["warm_blooded"], Value::Bool(true));
    let back = manager.deserialize(&props).unwrap();
    assert!(Arc::ptr_eq(back.as_type().unwrap(), &mammal));
}

#[test]
fn test_snapshot_reopen_restores_types_and_instances() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zoo.tgmg");
    {
        let (manager, graph) = fresh_manager();
        zoo(&manager);
        manager
            .save(manager.new_instance("Fish").unwrap().with("name", "Nemo").with("fins", 7))
            .unwrap();
        graph.save(&path).unwrap();
    }

    let graph = Arc::new(MemoryGraph::open(&path).unwrap());
    let manager = manager_over(&graph);
    let nemo = manager.get("Animal", &by_name("Nemo")).unwrap().unwrap();
    let nemo = nemo.as_instance().unwrap();
    assert_eq!(nemo.type_id(), "Fish");
    assert_eq!(nemo.get("fins"), &Value::Int(7));
}

// ============================================================================
// Reparenting
// ============================================================================

#[test]
fn test_whale_reparents_onto_cetacean() {
    let (manager, graph) = fresh_manager();
    zoo(&manager);
    let moby = manager
        .save(manager.new_instance("Whale").unwrap().with("name", "Moby").with("weight", 40000.0))
        .unwrap();
    let before = manager.get_descriptor_by_id("Whale").unwrap();
    let version = manager.structural_version().unwrap();

    let whale = manager.get_class_by_id("Whale").unwrap();
    let updated = manager.update_type(whale.clone(), vec!["Cetacean".to_string()]).unwrap();
    assert!(updated.same(&whale));
    assert_eq!(updated.bases, vec!["Cetacean".to_string()]);
    assert_ne!(manager.structural_version().unwrap(), version);

    let after = manager.get_descriptor_by_id("Whale").unwrap();
    assert!(after.is_subtype_of("Cetacean"));
    assert!(after.is_subtype_of("Mammal"));
    assert_eq!(after.inherited_attributes(), before.inherited_attributes());
    assert_eq!(after.class_attributes["aquatic"], Value::Bool(true));

    let found = manager.get("Whale", &by_name("Moby")).unwrap().unwrap();
    assert_eq!(found.as_instance().unwrap().values, moby.as_instance().unwrap().values);

    // another manager on the same graph sees the new base
    let other = manager_over(&graph);
    assert_eq!(bases_of(&other, "Whale"), vec!["Cetacean".to_string()]);
    assert!(other.get_descriptor_by_id("Whale").unwrap().is_subtype_of("Cetacean"));
}

#[test]
fn test_reparent_must_keep_inherited_attributes() {
    let (manager, _graph) = fresh_manager();
    zoo(&manager);
    let whale = manager.get_class_by_id("Whale").unwrap();
    let err = manager.update_type(whale, vec!["Fish".to_string()]).unwrap_err();
    match err {
        Error::CannotUpdateType { type_id, reason } => {
            assert_eq!(type_id, "Whale");
            assert!(reason.contains("inherited attributes"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bases_of(&manager, "Whale"), vec!["Mammal".to_string()]);
}

#[test]
fn test_reparent_into_cycle_is_rejected() {
    let (manager, _graph) = fresh_manager();
    define(&manager, "A1", &[ENTITY_TYPE], Members::new());
    define(&manager, "B", &["A1"], Members::new());
    define(&manager, "A2", &["B"], Members::new());
    define(&manager, "A3", &["A2"], Members::new());
    let version = manager.structural_version().unwrap();

    let b = manager.get_class_by_id("B").unwrap();
    let err = manager.update_type(b, vec!["A3".to_string()]).unwrap_err();
    let hierarchy_err = err.linearization().expect("a hierarchy error");
    assert!(hierarchy_err.is_cycle());
    assert!(err.to_string().contains("inheritance cycle"));

    assert_eq!(manager.structural_version().unwrap(), version);
    assert_eq!(bases_of(&manager, "B"), vec!["A1".to_string()]);
    assert!(manager.get_descriptor_by_id("A3").unwrap().is_subtype_of("B"));
}

#[test]
fn test_conflicting_diamond_is_not_a_cycle() {
    let (manager, _graph) = fresh_manager();
    define(&manager, "X", &[ENTITY_TYPE], Members::new());
    define(&manager, "Y", &[ENTITY_TYPE], Members::new());
    define(&manager, "A", &["X", "Y"], Members::new());
    define(&manager, "B", &["Y", "X"], Members::new());
    define(&manager, "AB", &["A"], Members::new());

    let ab = manager.get_class_by_id("AB").unwrap();
    let err = manager
        .update_type(ab, vec!["A".to_string(), "B".to_string()])
        .unwrap_err();
    let hierarchy_err = err.linearization().expect("a hierarchy error");
    assert!(!hierarchy_err.is_cycle());
    assert_eq!(bases_of(&manager, "AB"), vec!["A".to_string()]);

    // declaring the same diamond directly fails the same way
    let err = manager
        .create_type("AB2", ["A", "B"], Members::new())
        .unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::Hierarchy(ref e)) if !e.is_cycle()));
}

#[test]
fn test_static_and_unsaved_types_cannot_be_reparented() {
    let (manager, _graph) = fresh_manager();
    zoo(&manager);
    let entity = manager.get_class_by_id(ENTITY_TYPE).unwrap();
    let err = manager.update_type(entity, vec!["Animal".to_string()]).unwrap_err();
    assert!(matches!(err, Error::CannotUpdateType { .. }));

    let draft = manager.create_type("Draft", ["Animal"], Members::new()).unwrap();
    let err = manager.update_type(draft, vec!["Mammal".to_string()]).unwrap_err();
    assert!(err.to_string().contains("type or bases not found"));

    let rex = manager.new_instance("Animal").unwrap();
    let err = manager.update_type(rex, vec!["Mammal".to_string()]).unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::UnsupportedTypeError(_))));
}

// ============================================================================
// Lookups
// ============================================================================

#[test]
fn test_lookup_without_unique_attribute_fails() {
    let (manager, _graph) = fresh_manager();
    define(
        &manager,
        "Note",
        &[ENTITY_TYPE],
        Members::new().attribute("text", AttributeSpec::string()),
    );
    let mut filter = Properties::new();
    filter.insert("text".to_string(), Value::from("hello"));
    let err = manager.get("Note", &filter).unwrap_err();
    assert!(matches!(err, Error::Type(TypeError::NoUniqueAttributeError(_))));

    // saving works, but without a handle the node cannot be matched again
    let note = manager
        .save(manager.new_instance("Note").unwrap().with("text", "hello"))
        .unwrap();
    let handle = note.handle().expect("saved instances carry a handle");
    let mut detached = note.as_instance().unwrap().clone();
    detached.handle = None;
    manager.delete(detached).unwrap();
    assert!(manager.store().node(handle.element_id).unwrap().is_some());

    manager.delete(note).unwrap();
    assert!(manager.store().node(handle.element_id).unwrap().is_none());
}

use proptest::prelude::*;
use typegraph_types::{
    linearize_hierarchy, LinearizationError, Members, TypeId, TypeRegistry, ENTITY_TYPE,
};

/// Random DAGs: node `i` picks a distinct subset of nodes `< i` as bases.
fn dag() -> impl Strategy<Value = Vec<(TypeId, Vec<TypeId>)>> {
    (1usize..10)
        .prop_flat_map(|n| {
            let picks: Vec<_> = (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect();
            picks
        })
        .prop_map(|picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(i, raw)| {
                    let mut bases: Vec<TypeId> = Vec::new();
                    if i > 0 {
                        for b in raw {
                            let name = format!("T{b}");
                            if !bases.contains(&name) {
                                bases.push(name);
                            }
                        }
                    }
                    (format!("T{i}"), bases)
                })
                .collect()
        })
}

fn position(mro: &[TypeId], id: &str) -> Option<usize> {
    mro.iter().position(|t| t == id)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn linearizations_respect_declared_orders(h in dag()) {
        match linearize_hierarchy(&h) {
            Ok(mros) => {
                for (id, bases) in &h {
                    let mro = &mros[id];
                    prop_assert_eq!(&mro[0], id);
                    // every base appears, in declaration order
                    let positions: Vec<usize> = bases
                        .iter()
                        .map(|b| position(mro, b).expect("base in linearization"))
                        .collect();
                    prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
                    // monotonic: each base's own linearization is a subsequence
                    for b in bases {
                        let sub = &mros[b];
                        let idx: Vec<usize> = sub
                            .iter()
                            .map(|t| position(mro, t).expect("ancestor in linearization"))
                            .collect();
                        prop_assert!(idx.windows(2).all(|w| w[0] < w[1]));
                    }
                }
            }
            // forward-only DAGs never cycle; order conflicts are the only failure
            Err(e) => prop_assert!(
                matches!(e, LinearizationError::Inconsistent { .. }),
                "unexpected error {e}"
            ),
        }
    }
}

#[test]
fn registry_hierarchy_lists_bases_first() {
    let reg = TypeRegistry::new();
    reg.create_type("A", [ENTITY_TYPE], Members::new()).unwrap();
    reg.create_type("B", [ENTITY_TYPE], Members::new()).unwrap();
    reg.create_type("C", ["B", "A"], Members::new()).unwrap();
    reg.create_type("D", ["C"], Members::new()).unwrap();

    let hierarchy = reg.snapshot().hierarchy();
    let pos = |id: &str| hierarchy.iter().position(|(t, _)| t == id).unwrap();
    for (id, bases) in &hierarchy {
        for b in bases {
            assert!(pos(b) < pos(id), "{b} should precede {id}");
        }
    }
}

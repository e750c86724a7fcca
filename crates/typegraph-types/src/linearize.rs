//! C3 linearization over plain data.
//!
//! Hierarchies are given as `type -> ordered bases` lookups; nothing here
//! knows about registries or graphs. The result for a type is its method
//! resolution order: the type itself, then every ancestor, such that each
//! type precedes its bases and every declared base order is preserved.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::LinearizationError;
use crate::TypeId;

type Result<T> = std::result::Result<T, LinearizationError>;

/// Linearize a single type. `bases_of` returns `None` for unknown ids.
pub fn c3_linearize<F>(type_id: &str, bases_of: F) -> Result<Vec<TypeId>>
where
    F: Fn(&str) -> Option<Vec<TypeId>>,
{
    Linearizer::new(bases_of).linearize(type_id, type_id)
}

/// Linearize every entry of a hierarchy given as `(type, bases)` pairs.
///
/// Entries are processed in the given order, so the first failing entry
/// is the one named in the error.
pub fn linearize_hierarchy(
    entries: &[(TypeId, Vec<TypeId>)],
) -> Result<BTreeMap<TypeId, Vec<TypeId>>> {
    let table: HashMap<&str, &Vec<TypeId>> = entries
        .iter()
        .map(|(id, bases)| (id.as_str(), bases))
        .collect();
    let mut linearizer = Linearizer::new(|id: &str| table.get(id).map(|b| (*b).clone()));
    let mut out = BTreeMap::new();
    for (id, _) in entries {
        let mro = linearizer.linearize(id, id)?;
        out.insert(id.clone(), mro);
    }
    Ok(out)
}

struct Linearizer<F> {
    bases_of: F,
    memo: HashMap<TypeId, Vec<TypeId>>,
    visiting: HashSet<TypeId>,
}

impl<F> Linearizer<F>
where
    F: Fn(&str) -> Option<Vec<TypeId>>,
{
    fn new(bases_of: F) -> Self {
        Self {
            bases_of,
            memo: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    fn linearize(&mut self, type_id: &str, referenced_by: &str) -> Result<Vec<TypeId>> {
        if let Some(mro) = self.memo.get(type_id) {
            return Ok(mro.clone());
        }
        if !self.visiting.insert(type_id.to_string()) {
            return Err(LinearizationError::Cycle {
                type_id: type_id.to_string(),
            });
        }

        let bases = (self.bases_of)(type_id).ok_or_else(|| LinearizationError::UnknownBase {
            type_id: referenced_by.to_string(),
            base: type_id.to_string(),
        })?;

        let mut seen = HashSet::new();
        for base in &bases {
            if !seen.insert(base.as_str()) {
                return Err(LinearizationError::DuplicateBase {
                    type_id: type_id.to_string(),
                    base: base.clone(),
                });
            }
        }

        let mut sequences = Vec::with_capacity(bases.len() + 1);
        for base in &bases {
            sequences.push(self.linearize(base, type_id)?);
        }
        sequences.push(bases.clone());

        let merged = merge(sequences).ok_or_else(|| LinearizationError::Inconsistent {
            type_id: type_id.to_string(),
            bases: bases.clone(),
        })?;

        let mut mro = Vec::with_capacity(merged.len() + 1);
        mro.push(type_id.to_string());
        mro.extend(merged);

        self.visiting.remove(type_id);
        self.memo.insert(type_id.to_string(), mro.clone());
        Ok(mro)
    }
}

/// The C3 merge step. `None` when no head is free of every tail.
fn merge(mut sequences: Vec<Vec<TypeId>>) -> Option<Vec<TypeId>> {
    let mut out = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(out);
        }
        let candidate = sequences.iter().map(|s| &s[0]).find(|head| {
            sequences
                .iter()
                .all(|s| !s[1..].iter().any(|t| t == *head))
        })?;
        let candidate = candidate.clone();
        for seq in sequences.iter_mut() {
            if seq[0] == candidate {
                seq.remove(0);
            }
        }
        out.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy(entries: &[(&str, &[&str])]) -> Vec<(TypeId, Vec<TypeId>)> {
        entries
            .iter()
            .map(|(id, bases)| (id.to_string(), bases.iter().map(|b| b.to_string()).collect()))
            .collect()
    }

    #[test]
    fn diamond_linearizes_depth_first_left_to_right() {
        let h = hierarchy(&[
            ("O", &[]),
            ("A", &["O"]),
            ("B", &["O"]),
            ("C", &["A", "B"]),
        ]);
        let mros = linearize_hierarchy(&h).unwrap();
        assert_eq!(mros["C"], vec!["C", "A", "B", "O"]);
    }

    #[test]
    fn conflicting_base_orders_are_inconsistent() {
        let h = hierarchy(&[
            ("O", &[]),
            ("X", &["O"]),
            ("Y", &["O"]),
            ("A", &["X", "Y"]),
            ("B", &["Y", "X"]),
            ("AB", &["A", "B"]),
        ]);
        let err = linearize_hierarchy(&h).unwrap_err();
        assert!(matches!(err, LinearizationError::Inconsistent { ref type_id, .. } if type_id == "AB"));
        assert!(err.to_string().contains("no consistent linearization"));
    }

    #[test]
    fn cycles_are_detected() {
        let h = hierarchy(&[("A", &["B"]), ("B", &["A"])]);
        let err = linearize_hierarchy(&h).unwrap_err();
        assert!(err.is_cycle());
        assert!(err.to_string().contains("inheritance cycle"));
    }

    #[test]
    fn duplicate_and_unknown_bases() {
        let h = hierarchy(&[("O", &[]), ("A", &["O", "O"])]);
        assert!(matches!(
            linearize_hierarchy(&h),
            Err(LinearizationError::DuplicateBase { .. })
        ));

        let h = hierarchy(&[("A", &["Missing"])]);
        assert_eq!(
            linearize_hierarchy(&h),
            Err(LinearizationError::UnknownBase {
                type_id: "A".into(),
                base: "Missing".into()
            })
        );
    }
}

//! Label and relationship-type vocabulary of a [`MemoryGraph`].
//!
//! Stored nodes and edges carry [`Symbol`]s instead of strings. Symbols are
//! dense and handed out in first-seen order, so the vocabulary snapshots
//! as a plain list of names.
//!
//! [`MemoryGraph`]: crate::MemoryGraph

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A label or relationship type, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Symbol(u32);

impl Symbol {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

pub struct Vocabulary {
    symbols: DashMap<Arc<str>, Symbol>,
    names: RwLock<Vec<Arc<str>>>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self {
            symbols: DashMap::new(),
            names: RwLock::new(Vec::new()),
        }
    }

    /// Symbol for `name`, minting one the first time it is seen.
    pub fn symbol(&self, name: &str) -> Symbol {
        if let Some(sym) = self.symbols.get(name) {
            return *sym;
        }
        let mut names = self.names.write();
        // another writer may have minted it while we waited
        if let Some(sym) = self.symbols.get(name) {
            return *sym;
        }
        let sym = Symbol(names.len() as u32);
        let name: Arc<str> = Arc::from(name);
        names.push(name.clone());
        self.symbols.insert(name, sym);
        sym
    }

    /// Existing symbol for `name`. A name never written has none, which
    /// lets reads skip the graph entirely.
    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).map(|sym| *sym)
    }

    pub fn name(&self, sym: Symbol) -> Option<Arc<str>> {
        self.names.read().get(sym.0 as usize).cloned()
    }

    /// Name of a symbol minted by this vocabulary.
    pub fn resolve(&self, sym: Symbol) -> String {
        self.name(sym)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("#{}", sym.0))
    }

    pub fn resolve_all<'s>(&self, syms: impl IntoIterator<Item = &'s Symbol>) -> Vec<String> {
        let names = self.names.read();
        syms.into_iter()
            .filter_map(|sym| names.get(sym.0 as usize))
            .map(|name| name.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let guard = self.names.read();
        let names: Vec<&str> = guard.iter().map(|n| n.as_ref()).collect();
        Ok(bincode::serialize(&names)?)
    }

    /// Rebuild from [`Vocabulary::to_bytes`]. Symbols keep their positions,
    /// so a repeated name means the snapshot is corrupt.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let names: Vec<String> = bincode::deserialize(bytes)?;
        let vocab = Self::new();
        for (position, name) in names.iter().enumerate() {
            if vocab.symbol(name).0 as usize != position {
                return Err(StoreError::Snapshot(format!(
                    "label `{name}` appears twice in the vocabulary"
                )));
            }
        }
        Ok(vocab)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_survive_a_snapshot() {
        let vocab = Vocabulary::new();
        let isa = vocab.symbol("ISA");
        let declared = vocab.symbol("DECLAREDON");
        assert_eq!(vocab.symbol("ISA"), isa);
        assert_eq!(vocab.find("INSTANCEOF"), None);

        let back = Vocabulary::from_bytes(&vocab.to_bytes().unwrap()).unwrap();
        assert_eq!(back.find("ISA"), Some(isa));
        assert_eq!(back.resolve(declared), "DECLAREDON");
        assert_eq!(back.resolve_all(&[declared, isa]), vec!["DECLAREDON", "ISA"]);
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn repeated_names_are_a_corrupt_snapshot() {
        let bytes = bincode::serialize(&vec!["Entity", "Animal", "Entity"]).unwrap();
        assert!(matches!(
            Vocabulary::from_bytes(&bytes),
            Err(StoreError::Snapshot(_))
        ));
    }

    #[test]
    fn concurrent_writers_agree_on_symbols() {
        let vocab = Vocabulary::new();
        let minted: Vec<Vec<Symbol>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        ["Entity", "Animal", "Dog", "Cat"]
                            .iter()
                            .map(|name| vocab.symbol(name))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(minted.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(vocab.len(), 4);
    }
}

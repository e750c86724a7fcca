//! Process-local store identity.
//!
//! Every store instance gets a fresh [`StoreToken`]. Objects loaded from a
//! store carry the token together with their element id, so an id read from
//! one store is never silently used against another.
//!
//! The token is not serialized: a snapshot reopened from disk is a new store.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STORE_TOKEN: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreToken(NonZeroU64);

impl StoreToken {
    pub fn new() -> Self {
        let raw = NEXT_STORE_TOKEN.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl Default for StoreToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.raw())
    }
}

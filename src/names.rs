//! Per-scope unique-name index (spec §4.1).
//!
//! Three independent flat scopes live on `Context` (physicals, networks,
//! settings) plus one per-network scope for virts. Objects without names are
//! still valid, merely unindexed — `set`/`search`/`remove` are the only
//! operations a scope supports.

use std::collections::HashMap;

use crate::error::{LsdnError, LsdnResult};
use crate::ids::Id;

pub struct NameScope<T> {
    by_name: HashMap<String, Id<T>>,
}

impl<T> NameScope<T> {
    pub fn new() -> Self {
        NameScope {
            by_name: HashMap::new(),
        }
    }

    /// Assign `name` to `id`. Fails with `Duplicate` if `name` is already
    /// taken in this scope.
    pub fn set(&mut self, name: &str, id: Id<T>) -> LsdnResult<()> {
        if self.by_name.contains_key(name) {
            return Err(LsdnError::Duplicate);
        }
        self.by_name.insert(name.to_string(), id);
        Ok(())
    }

    pub fn search(&self, name: &str) -> Option<Id<T>> {
        self.by_name.get(name).copied()
    }

    /// Remove whatever name currently maps to `id`, if any. Called when the
    /// owning object is freed or renamed.
    pub fn remove_by_id(&mut self, id: Id<T>) {
        self.by_name.retain(|_, v| *v != id);
    }
}

impl<T> Default for NameScope<T> {
    fn default() -> Self {
        Self::new()
    }
}

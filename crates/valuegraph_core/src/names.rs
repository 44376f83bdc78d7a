//! Mapping between value ids and the flat names expressions use for them.
//!
//! Expression variables cannot contain dots, so a value registered as
//! `audio.bass` is read as `audio_bass`. The table is kept in sync with the
//! registry so the mapping is decided once, at registration time.

use std::collections::{BTreeSet, HashMap};

use crate::types::ValueId;

/// Flat expression name of an id: dots become underscores.
pub fn flat_name(id: &str) -> String {
    id.replace('.', "_")
}

/// Dotted candidate for a flat name: underscores become dots.
pub fn dotted_name(name: &str) -> String {
    name.replace('_', ".")
}

#[derive(Debug, Default, Clone)]
pub struct NameTable {
    ids: BTreeSet<ValueId>,
    by_flat: HashMap<String, ValueId>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str) {
        self.ids.insert(id.to_string());
        self.by_flat.insert(flat_name(id), id.to_string());
    }

    pub fn remove(&mut self, id: &str) {
        self.ids.remove(id);
        let flat = flat_name(id);
        if self.by_flat.get(&flat).is_some_and(|owner| owner == id) {
            self.by_flat.remove(&flat);
            // Another id may share the same flat form.
            if let Some(other) = self.ids.iter().find(|other| flat_name(other) == flat) {
                self.by_flat.insert(flat, other.clone());
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// The registered id an expression variable refers to, if any.
    pub fn resolve(&self, name: &str) -> Option<&ValueId> {
        if let Some(id) = self.ids.get(name) {
            return Some(id);
        }
        self.by_flat.get(&flat_name(name))
    }
}

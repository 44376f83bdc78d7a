//! Dependency extraction and the reverse dependency index.

use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::expr::{self, CompiledExpr};
use crate::names::{NameTable, dotted_name, flat_name};
use crate::types::ValueId;

/// Ids referenced by `expr`.
///
/// Variables that resolve to a registered id contribute that id. Anything
/// else is a forward reference and contributes the literal name plus its
/// dotted and flat spellings, so the edge binds once the value shows up.
/// A parse failure is logged and yields an empty set.
pub fn extract_dependencies(expr: &str, names: &NameTable) -> BTreeSet<ValueId> {
    match expr::parse(expr) {
        Ok(compiled) => extract_from(&compiled, names),
        Err(e) => {
            warn!("dependency extraction skipped: {e}");
            BTreeSet::new()
        }
    }
}

pub fn extract_from(compiled: &CompiledExpr, names: &NameTable) -> BTreeSet<ValueId> {
    let mut deps = BTreeSet::new();
    for var in compiled.variables() {
        if let Some(id) = names.resolve(var) {
            deps.insert(id.clone());
            continue;
        }
        deps.insert(var.to_string());
        deps.insert(dotted_name(var));
        deps.insert(flat_name(var));
    }
    deps
}

/// Reverse index: value id -> ids that must be recomputed when it changes.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    dependents: HashMap<ValueId, BTreeSet<ValueId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edges<'a>(&mut self, dependent: &str, deps: impl IntoIterator<Item = &'a ValueId>) {
        for dep in deps {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(dependent.to_string());
        }
    }

    pub fn remove_edges<'a>(&mut self, dependent: &str, deps: impl IntoIterator<Item = &'a ValueId>) {
        for dep in deps {
            if let Some(set) = self.dependents.get_mut(dep) {
                set.remove(dependent);
                if set.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
    }

    /// Dependents of `id` in a stable order.
    pub fn dependents_of(&self, id: &str) -> Vec<ValueId> {
        self.dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn has_dependents(&self, id: &str) -> bool {
        self.dependents.contains_key(id)
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(BTreeSet::len).sum()
    }
}

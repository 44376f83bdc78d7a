//! Persistence boundary.
//!
//! The registry never touches storage itself. It describes the computed and
//! accumulator values created through its constructors as plain records, and
//! re-creates them from those records on restore. Hosts move the records to
//! and from durable storage through a [`SourceStore`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::{AccumulatorOptions, ComputedOptions, ValueId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComputedRecord {
    pub id: ValueId,
    pub name: String,
    pub expression: String,
    #[serde(flatten)]
    pub options: ComputedOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorRecord {
    pub id: ValueId,
    pub name: String,
    pub rate_expression: String,
    #[serde(flatten)]
    pub options: AccumulatorOptions,
}

/// Everything the storage collaborator saves and loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedSources {
    pub computed: Vec<ComputedRecord>,
    pub accumulators: Vec<AccumulatorRecord>,
}

impl PersistedSources {
    pub fn is_empty(&self) -> bool {
        self.computed.is_empty() && self.accumulators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.computed.len() + self.accumulators.len()
    }
}

/// Outcome of re-creating persisted values.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: Vec<(ValueId, RegistryError)>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Durable storage for persisted sources.
pub trait SourceStore {
    type Error;

    fn load(&mut self) -> Result<PersistedSources, Self::Error>;
    fn save(&mut self, sources: &PersistedSources) -> Result<(), Self::Error>;
}

/// In-memory store, for hosts that keep sources elsewhere and for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub sources: PersistedSources,
    pub saves: usize,
}

impl SourceStore for MemoryStore {
    type Error = std::convert::Infallible;

    fn load(&mut self) -> Result<PersistedSources, Self::Error> {
        Ok(self.sources.clone())
    }

    fn save(&mut self, sources: &PersistedSources) -> Result<(), Self::Error> {
        self.sources = sources.clone();
        self.saves += 1;
        Ok(())
    }
}

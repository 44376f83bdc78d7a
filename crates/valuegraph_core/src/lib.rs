//! Reactive value graph core library
//!
//! This crate holds named, typed values that are set by hand, fed from an
//! audio analyzer, derived from math expressions over other values, or
//! integrated over time. Changes propagate synchronously through the
//! dependency graph. It is a pure library with no I/O; storage is reached
//! through the [`persist::SourceStore`] trait and hosts drive time by calling
//! [`ValueRegistry::update_accumulators`] once per frame.

#[macro_use]
extern crate lazy_static;

extern crate parking_lot;
extern crate serde;
extern crate serde_json;

pub mod accumulator;
pub mod clock;
pub mod config;
pub mod deps;
pub mod error;
pub mod events;
pub mod expr;
pub mod names;
pub mod persist;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export commonly used items
pub use registry::{RegistryStats, ValueRegistry};

pub use clock::{ManualTime, SystemTime, TimeSource};
pub use config::RegistryConfig;
pub use error::{ExprError, RegistryError};
pub use events::{ErrorCode, EventKind, SubscriptionId, ValueEvent};
pub use persist::{MemoryStore, PersistedSources, RestoreReport, SourceStore};
pub use types::{
    AccumulatorOptions, AccumulatorSource, ComputedOptions, ComputedSource, Extraction,
    ExtractionKind, FrequencyBand, SourceKind, Value, ValueDefinition, ValueId, ValueMetadata,
    ValueSource, ValueType, ValueUpdate, WrapMode,
};

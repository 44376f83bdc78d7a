//! Scene files: a registry configuration, plain value definitions and
//! persisted computed/accumulator sources in one JSON document.
//!
//! ```json
//! {
//!   "config": { "randomSeed": 1 },
//!   "values": [{ "id": "speed", "name": "Speed", "type": "number",
//!                "value": 0.5, "defaultValue": 0 }],
//!   "computed": [{ "id": "double", "name": "Double", "expression": "speed * 2" }],
//!   "accumulators": [{ "id": "phase", "name": "Phase", "rateExpression": "speed",
//!                      "limitExpression": "1", "wrapMode": "wrap" }]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;
use valuegraph_core::{
    PersistedSources, RegistryConfig, RestoreReport, ValueDefinition, ValueRegistry,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scene {
    pub config: RegistryConfig,
    pub values: Vec<ValueDefinition>,
    #[serde(flatten)]
    pub sources: PersistedSources,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read scene {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse scene {}", path.display()))
    }

    /// Register the plain values, then restore the derived ones. Returns how
    /// many plain values were registered alongside the restore report.
    pub fn apply(self, registry: &mut ValueRegistry) -> (usize, RestoreReport) {
        let mut registered = 0;
        for def in self.values {
            let id = def.id.clone();
            if registry.register(def) {
                registered += 1;
            } else {
                warn!("scene value '{id}' was not registered");
            }
        }
        (registered, registry.restore(self.sources))
    }
}

//! Registry configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Seed for the `random` system variable. Seeded from the wall clock when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
    /// Seed mixed into the `noise(x)` lattice hash.
    pub noise_seed: u64,
    /// Upper bound, in seconds, on the elapsed time a single tick integrates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tick_delta: Option<f64>,
}

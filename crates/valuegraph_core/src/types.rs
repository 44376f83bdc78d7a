//! Data model for registered values and the sources that drive them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique identifier of a registered value. Dotted ids (`audio.bass`)
/// are referenced from expressions by their flat form (`audio_bass`).
pub type ValueId = String;

/// Runtime type of a value definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Number,
    Boolean,
    String,
    Array,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::String => "string",
            ValueType::Array => "array",
        }
    }
}

/// A typed value. Serialized without a tag so that JSON scalars and arrays
/// map directly onto the matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(0.0)
    }
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The type this value naturally belongs to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

/// Named frequency bands an analyzer can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FrequencyBand {
    Bass,
    LowMid,
    Mid,
    HighMid,
    Treble,
}

/// How a scalar is derived from an analyzer frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ExtractionKind {
    FrequencyRange { low_hz: f64, high_hz: f64 },
    Band { band: FrequencyBand },
    Amplitude,
    Rms,
    Peak,
    Bpm,
    Beat,
}

/// Extraction configuration carried by an audio source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub kind: ExtractionKind,
    /// Default smoothing used when the bridge does not pass one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f64>,
    /// Linear output map `[min, max]` applied to the (smoothed) 0..1 value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_range: Option<[f64; 2]>,
}

impl Extraction {
    pub fn new(kind: ExtractionKind) -> Self {
        Self {
            kind,
            smoothing: None,
            output_range: None,
        }
    }
}

/// Boundary policy of an accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum WrapMode {
    #[default]
    None,
    Clamp,
    Wrap,
    Pingpong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComputedSource {
    pub expression: String,
    #[serde(default)]
    pub dependencies: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorSource {
    /// Rate of change in units per second.
    pub rate_expression: String,
    #[serde(default)]
    pub rate_dependencies: Vec<ValueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_expression: Option<String>,
    #[serde(default)]
    pub limit_dependencies: Vec<ValueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_expression: Option<String>,
    #[serde(default)]
    pub min_dependencies: Vec<ValueId>,
    #[serde(default)]
    pub wrap_mode: WrapMode,
    #[serde(default)]
    pub initial_value: f64,
    #[serde(default)]
    pub reset_on_limit: bool,
}

impl AccumulatorSource {
    /// Every value the rate, limit and floor expressions read.
    pub fn all_dependencies(&self) -> impl Iterator<Item = &ValueId> {
        self.rate_dependencies
            .iter()
            .chain(self.limit_dependencies.iter())
            .chain(self.min_dependencies.iter())
    }
}

/// What drives a value's mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ValueSource {
    #[default]
    Manual,
    Audio {
        source_id: String,
        extraction: Extraction,
    },
    Computed(ComputedSource),
    Accumulator(AccumulatorSource),
    System,
}

impl ValueSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ValueSource::Manual => SourceKind::Manual,
            ValueSource::Audio { .. } => SourceKind::Audio,
            ValueSource::Computed(_) => SourceKind::Computed,
            ValueSource::Accumulator(_) => SourceKind::Accumulator,
            ValueSource::System => SourceKind::System,
        }
    }

    /// Ids whose changes must trigger work on the value owning this source.
    pub fn dependencies(&self) -> Vec<&ValueId> {
        match self {
            ValueSource::Computed(c) => c.dependencies.iter().collect(),
            ValueSource::Accumulator(a) => a.all_dependencies().collect(),
            ValueSource::Manual | ValueSource::Audio { .. } | ValueSource::System => Vec::new(),
        }
    }
}

/// Discriminant of [`ValueSource`], used for stats keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Manual,
    Audio,
    Computed,
    Accumulator,
    System,
}

/// A registered, typed quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueDefinition {
    pub id: ValueId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: Value,
    pub default_value: Value,
    #[serde(default)]
    pub source: ValueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Display precision hint; never applied to the stored value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub readonly: bool,
    /// Milliseconds since the registry's clock started, stamped on every mutation.
    #[serde(default)]
    pub last_updated: f64,
}

impl ValueDefinition {
    pub(crate) fn with_type(id: impl Into<ValueId>, name: impl Into<String>, value_type: ValueType, default: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            value_type,
            value: default.clone(),
            default_value: default,
            source: ValueSource::Manual,
            min: None,
            max: None,
            precision: None,
            unit: None,
            category: None,
            tags: Vec::new(),
            readonly: false,
            last_updated: 0.0,
        }
    }

    pub fn number(id: impl Into<ValueId>, name: impl Into<String>, default: f64) -> Self {
        Self::with_type(id, name, ValueType::Number, Value::Number(default))
    }

    pub fn boolean(id: impl Into<ValueId>, name: impl Into<String>, default: bool) -> Self {
        Self::with_type(id, name, ValueType::Boolean, Value::Boolean(default))
    }

    pub fn string(id: impl Into<ValueId>, name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::with_type(id, name, ValueType::String, Value::String(default.into()))
    }

    pub fn array(id: impl Into<ValueId>, name: impl Into<String>, default: Vec<Value>) -> Self {
        Self::with_type(id, name, ValueType::Array, Value::Array(default))
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_source(mut self, source: ValueSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub(crate) fn apply_metadata(&mut self, metadata: &ValueMetadata) {
        self.description = metadata.description.clone();
        self.unit = metadata.unit.clone();
        self.min = metadata.min;
        self.max = metadata.max;
        self.precision = metadata.precision;
        self.category = metadata.category.clone();
        self.tags = metadata.tags.clone();
    }

    pub(crate) fn metadata(&self) -> ValueMetadata {
        ValueMetadata {
            description: self.description.clone(),
            unit: self.unit.clone(),
            min: self.min,
            max: self.max,
            precision: self.precision,
            category: self.category.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Descriptive fields shared by the computed and accumulator constructors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ValueMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Options for [`crate::ValueRegistry::create_computed`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputedOptions {
    /// Explicit dependencies. Extracted from the expression when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<ValueId>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(flatten)]
    pub metadata: ValueMetadata,
    /// Set while restoring from storage so the restore is not saved back.
    #[serde(skip)]
    #[schemars(skip)]
    pub skip_save: bool,
}

/// Options for [`crate::ValueRegistry::create_accumulator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct AccumulatorOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_dependencies: Option<Vec<ValueId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_dependencies: Option<Vec<ValueId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_dependencies: Option<Vec<ValueId>>,
    pub wrap_mode: WrapMode,
    pub initial_value: f64,
    pub reset_on_limit: bool,
    #[serde(flatten)]
    pub metadata: ValueMetadata,
    #[serde(skip)]
    #[schemars(skip)]
    pub skip_save: bool,
}

/// Partial update applied by [`crate::ValueRegistry::update`]. `None` leaves a
/// field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub value_type: Option<ValueType>,
    pub value: Option<Value>,
    pub default_value: Option<Value>,
    pub source: Option<ValueSource>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub precision: Option<u32>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub readonly: Option<bool>,
}

impl ValueUpdate {
    pub(crate) fn merge_into(self, def: &mut ValueDefinition) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(description) = self.description {
            def.description = Some(description);
        }
        if let Some(value_type) = self.value_type {
            def.value_type = value_type;
        }
        if let Some(value) = self.value {
            def.value = value;
        }
        if let Some(default_value) = self.default_value {
            def.default_value = default_value;
        }
        if let Some(source) = self.source {
            def.source = source;
        }
        if let Some(min) = self.min {
            def.min = Some(min);
        }
        if let Some(max) = self.max {
            def.max = Some(max);
        }
        if let Some(precision) = self.precision {
            def.precision = Some(precision);
        }
        if let Some(unit) = self.unit {
            def.unit = Some(unit);
        }
        if let Some(category) = self.category {
            def.category = Some(category);
        }
        if let Some(tags) = self.tags {
            def.tags = tags;
        }
        if let Some(readonly) = self.readonly {
            def.readonly = readonly;
        }
    }
}

//! Per-type coercion applied on every write, and audio smoothing.

use std::collections::HashMap;

use crate::types::{Value, ValueDefinition, ValueId, ValueType};

/// Numeric reading of any value. Strings parse (empty is 0), booleans are
/// 0/1, single-element arrays unwrap, everything else is NaN.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => to_number(single),
            _ => f64::NAN,
        },
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) => true,
    }
}

/// Coerce `raw` into a value that satisfies `def`'s type rule.
///
/// Numbers fall back to the definition's default on NaN and are then clamped
/// to whichever of `min`/`max` is set.
pub fn coerce(def: &ValueDefinition, raw: Value) -> Value {
    match def.value_type {
        ValueType::Number => {
            let mut n = to_number(&raw);
            if n.is_nan() {
                n = to_number(&def.default_value);
                if n.is_nan() {
                    n = 0.0;
                }
            }
            if let Some(min) = def.min {
                n = n.max(min);
            }
            if let Some(max) = def.max {
                n = n.min(max);
            }
            Value::Number(n)
        }
        ValueType::Boolean => Value::Boolean(is_truthy(&raw)),
        ValueType::String => match raw {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        },
        ValueType::Array => match raw {
            Value::Array(items) => Value::Array(items),
            other => Value::Array(vec![other]),
        },
    }
}

/// One-pole low-pass per value for externally sourced numbers.
#[derive(Debug, Default)]
pub struct Smoother {
    previous: HashMap<ValueId, f64>,
}

impl Smoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend `raw` toward the previous output when `smoothing` is in (0, 1];
    /// otherwise pass it through. Nothing is stored until [`Smoother::commit`].
    pub fn smooth(&self, id: &str, raw: f64, smoothing: Option<f64>) -> f64 {
        match (smoothing, self.previous.get(id)) {
            (Some(s), Some(prev)) if s > 0.0 && s <= 1.0 => prev + (raw - prev) * (1.0 - s),
            _ => raw,
        }
    }

    /// Remember `out` as the previous output of `id`.
    pub fn commit(&mut self, id: &str, out: f64) {
        self.previous.insert(id.to_string(), out);
    }

    pub fn forget(&mut self, id: &str) {
        self.previous.remove(id);
    }

    #[cfg(test)]
    fn process(&mut self, id: &str, raw: f64, smoothing: Option<f64>) -> f64 {
        let out = self.smooth(id, raw, smoothing);
        self.commit(id, out);
        out
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

/// Linear map of a 0..1 value onto `[min, max]`.
pub fn apply_output_range(value: f64, range: Option<[f64; 2]>) -> f64 {
    match range {
        Some([min, max]) => min + value * (max - min),
        None => value,
    }
}

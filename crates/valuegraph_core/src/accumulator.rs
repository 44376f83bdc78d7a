//! Time integration for accumulator values.
//!
//! Each accumulator carries a continuous value and a direction sign. Once per
//! tick the rate is integrated over the elapsed time and the result is passed
//! through the accumulator's boundary policy.

use crate::expr::functions::modulo;
use crate::types::WrapMode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulatorState {
    pub value: f64,
    /// +1 or -1. Only pingpong ever flips it.
    pub direction: f64,
}

impl AccumulatorState {
    pub fn new(initial_value: f64) -> Self {
        Self {
            value: initial_value,
            direction: 1.0,
        }
    }

    pub fn reset(&mut self, initial_value: f64) {
        *self = Self::new(initial_value);
    }
}

/// Per-tick inputs, already evaluated from the accumulator's expressions.
#[derive(Debug, Clone, Copy)]
pub struct StepInput {
    /// Units per second.
    pub rate: f64,
    pub min: f64,
    pub max: Option<f64>,
    /// Seconds since the previous tick.
    pub delta: f64,
    pub wrap_mode: WrapMode,
    pub initial_value: f64,
    pub reset_on_limit: bool,
}

/// Advance `state` by one tick and return the new value.
pub fn step(state: &mut AccumulatorState, input: &StepInput) -> f64 {
    let candidate = state.value + input.rate * input.delta * state.direction;
    let min = input.min;

    let next = match (input.wrap_mode, input.max) {
        (WrapMode::None, Some(max)) if input.reset_on_limit && candidate >= max => {
            input.initial_value
        }
        (WrapMode::None, _) => candidate,
        (WrapMode::Clamp, max) => candidate.max(min).min(max.unwrap_or(f64::INFINITY)),
        (WrapMode::Wrap, Some(max)) => {
            let span = max - min;
            if span > 0.0 {
                min + modulo(candidate - min, span)
            } else {
                min
            }
        }
        (WrapMode::Pingpong, Some(max)) => {
            if candidate >= max {
                state.direction = -1.0;
                (max - (candidate - max)).max(min)
            } else if candidate <= min {
                state.direction = 1.0;
                (min + (min - candidate)).min(max)
            } else {
                candidate
            }
        }
        // Without a limit the bounded policies have nothing to act on.
        (WrapMode::Wrap | WrapMode::Pingpong, None) => candidate,
    };

    state.value = next;
    next
}

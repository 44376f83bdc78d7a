//! Fixed numeric function library available to every expression.
//!
//! Trig, `min`/`max`, `abs`, `floor`/`ceil`/`round`, `sign` and `log` are
//! parsed as evaluator built-ins; everything else resolves here by name.

use std::collections::HashSet;

lazy_static! {
    /// Built-in function names handled directly by the evaluator.
    static ref BUILTIN_FUNCTIONS: HashSet<&'static str> = [
        "int", "ceil", "floor", "abs", "sign", "log", "round", "min", "max", "e", "pi",
        "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "asinh",
        "acosh", "atanh", "print",
    ]
    .into_iter()
    .collect();

    /// Functions resolved by [`Library::call`].
    static ref LIBRARY_FUNCTIONS: HashSet<&'static str> = [
        "clamp", "lerp", "map", "remap", "smoothstep", "step", "fract", "mod", "degrees",
        "radians", "mix", "saturate", "pingpong", "repeat", "pulse", "triangle", "sawtooth",
        "square", "quantize", "deadzone", "easeIn", "easeOut", "easeInOut", "noise", "sqrt",
        "cbrt", "exp", "ln", "log2", "log10", "pow", "atan2", "hypot", "trunc",
    ]
    .into_iter()
    .collect();
}

/// True for any name that denotes a function rather than a value.
pub fn is_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(name) || LIBRARY_FUNCTIONS.contains(name)
}

/// `x - y * floor(x / y)`: result has the sign of the divisor.
pub fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

pub fn clamp(v: f64, min: f64, max: f64) -> f64 {
    v.max(min).min(max)
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

pub fn remap(v: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    out_min + (v - in_min) * (out_max - out_min) / (in_max - in_min)
}

pub fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    if edge1 == edge0 {
        return step(edge0, x);
    }
    let t = clamp((x - edge0) / (edge1 - edge0), 0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub fn step(edge: f64, x: f64) -> f64 {
    if x < edge { 0.0 } else { 1.0 }
}

pub fn fract(x: f64) -> f64 {
    x - x.floor()
}

pub fn pingpong(t: f64, len: f64) -> f64 {
    len - (modulo(t, 2.0 * len) - len).abs()
}

pub fn repeat(t: f64, len: f64) -> f64 {
    t - (t / len).floor() * len
}

pub fn pulse(x: f64, width: f64) -> f64 {
    if modulo(x, 1.0) < width { 1.0 } else { 0.0 }
}

pub fn triangle(x: f64) -> f64 {
    (2.0 * modulo(x, 1.0) - 1.0).abs()
}

pub fn square(x: f64) -> f64 {
    if modulo(x, 1.0) < 0.5 { 1.0 } else { 0.0 }
}

pub fn quantize(x: f64, steps: f64) -> f64 {
    (x * steps).floor() / steps
}

pub fn deadzone(x: f64, zone: f64) -> f64 {
    if x.abs() < zone { 0.0 } else { x }
}

pub fn ease_in(t: f64) -> f64 {
    t * t
}

pub fn ease_out(t: f64) -> f64 {
    t * (2.0 - t)
}

pub fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn lattice(i: i64, seed: u64) -> f64 {
    let hash = splitmix64((i as u64) ^ seed.rotate_left(32));
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

/// Smooth value noise in [0, 1): a pure function of `x` and `seed`.
pub fn noise(x: f64, seed: u64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let floor = x.floor();
    let i = floor as i64;
    let f = x - floor;
    let u = f * f * (3.0 - 2.0 * f);
    lerp(lattice(i, seed), lattice(i.wrapping_add(1), seed), u)
}

/// Resolves library functions by name for the evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Library {
    pub noise_seed: u64,
}

impl Library {
    pub fn new(noise_seed: u64) -> Self {
        Self { noise_seed }
    }

    /// Returns `None` for an unknown name or a wrong argument count.
    pub fn call(&self, name: &str, args: &[f64]) -> Option<f64> {
        let value = match (name, args) {
            ("clamp", &[v, min, max]) => clamp(v, min, max),
            ("lerp", &[a, b, t]) => lerp(a, b, t),
            ("map" | "remap", &[v, in_min, in_max, out_min, out_max]) => {
                remap(v, in_min, in_max, out_min, out_max)
            }
            ("smoothstep", &[e0, e1, x]) => smoothstep(e0, e1, x),
            ("step", &[edge, x]) => step(edge, x),
            ("fract", &[x]) => fract(x),
            ("mod", &[x, y]) => modulo(x, y),
            ("degrees", &[x]) => x.to_degrees(),
            ("radians", &[x]) => x.to_radians(),
            ("mix", &[a, b, t]) => a * (1.0 - t) + b * t,
            ("saturate", &[x]) => clamp(x, 0.0, 1.0),
            ("pingpong", &[t, len]) => pingpong(t, len),
            ("repeat", &[t, len]) => repeat(t, len),
            ("pulse", &[x, width]) => pulse(x, width),
            ("triangle", &[x]) => triangle(x),
            ("sawtooth", &[x]) => modulo(x, 1.0),
            ("square", &[x]) => square(x),
            ("quantize", &[x, steps]) => quantize(x, steps),
            ("deadzone", &[x, zone]) => deadzone(x, zone),
            ("easeIn", &[t]) => ease_in(t),
            ("easeOut", &[t]) => ease_out(t),
            ("easeInOut", &[t]) => ease_in_out(t),
            ("noise", &[x]) => noise(x, self.noise_seed),
            ("sqrt", &[x]) => x.sqrt(),
            ("cbrt", &[x]) => x.cbrt(),
            ("exp", &[x]) => x.exp(),
            ("ln", &[x]) => x.ln(),
            ("log2", &[x]) => x.log2(),
            ("log10", &[x]) => x.log10(),
            ("pow", &[x, y]) => x.powf(y),
            ("atan2", &[y, x]) => y.atan2(x),
            ("hypot", &[x, y]) => x.hypot(y),
            ("trunc", &[x]) => x.trunc(),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    #[test]
    fn modulo_follows_divisor_sign() {
        approx(modulo(-1.0, 3.0), 2.0);
        approx(modulo(5.5, 2.0), 1.5);
        approx(modulo(1.0, -3.0), -2.0);
    }

    #[test]
    fn smoothstep_clamps_and_eases() {
        approx(smoothstep(0.0, 1.0, -1.0), 0.0);
        approx(smoothstep(0.0, 1.0, 2.0), 1.0);
        approx(smoothstep(0.0, 1.0, 0.5), 0.5);
        approx(smoothstep(0.0, 2.0, 0.5), 0.25 * 0.25 * (3.0 - 0.5));
    }

    #[test]
    fn periodic_shapes() {
        approx(pingpong(0.0, 2.0), 0.0);
        approx(pingpong(1.5, 2.0), 1.5);
        approx(pingpong(3.0, 2.0), 1.0);
        approx(repeat(7.0, 3.0), 1.0);
        approx(triangle(0.0), 1.0);
        approx(triangle(0.5), 0.0);
        approx(pulse(1.2, 0.25), 1.0);
        approx(pulse(1.3, 0.25), 0.0);
        approx(square(0.4), 1.0);
        approx(square(0.6), 0.0);
    }

    #[test]
    fn shaping_helpers() {
        approx(quantize(0.77, 4.0), 0.75);
        approx(deadzone(0.05, 0.1), 0.0);
        approx(deadzone(-0.5, 0.1), -0.5);
        approx(remap(5.0, 0.0, 10.0, 100.0, 200.0), 150.0);
        approx(step(0.5, 0.5), 1.0);
        approx(fract(-0.25), 0.75);
    }

    #[test]
    fn library_dispatch_checks_arity() {
        let lib = Library::default();
        assert_eq!(lib.call("clamp", &[5.0, 0.0, 1.0]), Some(1.0));
        assert_eq!(lib.call("mix", &[0.0, 10.0, 0.25]), Some(2.5));
        assert_eq!(lib.call("saturate", &[-3.0]), Some(0.0));
        assert_eq!(lib.call("easeIn", &[0.5]), Some(0.25));
        assert_eq!(lib.call("easeOut", &[0.5]), Some(0.75));
        assert_eq!(lib.call("clamp", &[5.0]), None);
        assert_eq!(lib.call("nope", &[]), None);
    }

    #[test]
    fn quad_easings_keep_full_precision() {
        assert_eq!(ease_in(0.1), 0.1 * 0.1);
        approx(ease_out(0.25), 0.4375);
        approx(ease_in_out(0.25), 0.125);
        approx(ease_in_out(0.75), 0.875);
        assert_eq!(ease_in_out(1.0), 1.0);
    }

    #[test]
    fn noise_is_deterministic_and_seeded() {
        let a = noise(3.7, 0);
        assert_eq!(a, noise(3.7, 0));
        assert!((0.0..1.0).contains(&a));
        assert_ne!(noise(3.7, 0), noise(3.7, 99));
        // Lattice points are hit exactly.
        assert_eq!(noise(2.0, 5), lattice(2, 5));
    }

    #[test]
    fn vocabulary_covers_builtins_and_library() {
        assert!(is_function("sin"));
        assert!(is_function("pingpong"));
        assert!(!is_function("speed"));
    }
}

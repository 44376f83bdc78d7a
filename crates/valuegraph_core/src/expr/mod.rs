//! Expression evaluator.
//!
//! Expressions are parsed and compiled once into a `fasteval` instruction tree
//! and then evaluated against an explicit variable map on every call. Dotted
//! identifiers such as `audio.bass` are rewritten to their flat form
//! (`audio_bass`) before parsing, so the evaluator only ever sees flat names.

pub mod functions;

use fasteval::{Compiler, Evaler, Instruction, Slab};
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::clock::{SYSTEM_VARIABLES, VOLATILE_VARIABLES};
use crate::error::ExprError;

pub use functions::Library;

lazy_static! {
    static ref DOTTED_IDENT: Regex =
        Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+").unwrap();
    static ref IDENT: Regex = Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*").unwrap();
    static ref STRING_LITERAL: Regex = Regex::new(r#""[^"]*""#).unwrap();
}

/// Rewrite every dotted identifier in `expr` to its underscore form.
pub fn flatten_identifiers(expr: &str) -> Cow<'_, str> {
    DOTTED_IDENT.replace_all(expr, |caps: &regex::Captures| caps[0].replace('.', "_"))
}

/// Every identifier in an already flattened expression, call names included.
///
/// Scans the text rather than the parse tree: fasteval's own `var_names`
/// skips the arguments of custom function calls. `\b` keeps number suffixes
/// and exponents (`1e5`, `2k`) out, and print strings are blanked first.
fn identifiers(flat: &str) -> BTreeSet<String> {
    let code = STRING_LITERAL.replace_all(flat, "\"\"");
    IDENT
        .find_iter(&code)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// A parsed, compiled expression.
pub struct CompiledExpr {
    source: String,
    slab: Slab,
    instruction: Instruction,
    /// Every identifier the expression mentions, functions included.
    names: BTreeSet<String>,
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.source)
            .field("instruction", &self.instruction)
            .finish()
    }
}

/// Parse and compile `expr`.
pub fn parse(expr: &str) -> Result<CompiledExpr, ExprError> {
    let flat = flatten_identifiers(expr);
    let mut slab = Slab::new();
    let parsed = fasteval::Parser::new()
        .parse(&flat, &mut slab.ps)
        .map_err(|e| ExprError::Syntax {
            expression: expr.to_string(),
            message: e.to_string(),
        })?;

    let names = identifiers(&flat);
    let instruction = parsed.from(&slab.ps).compile(&slab.ps, &mut slab.cs);

    Ok(CompiledExpr {
        source: expr.to_string(),
        slab,
        instruction,
        names,
    })
}

impl CompiledExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free variables: identifiers that are neither functions nor system variables.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|name| !functions::is_function(name) && !SYSTEM_VARIABLES.contains(name))
    }

    /// True when the expression reads a clock variable that changes every tick.
    pub fn is_volatile(&self) -> bool {
        self.names
            .iter()
            .any(|name| VOLATILE_VARIABLES.contains(name.as_str()))
    }

    /// Evaluate with the default function library.
    pub fn evaluate(&self, vars: &HashMap<String, f64>) -> Result<f64, ExprError> {
        self.evaluate_with(vars, &Library::default())
    }

    /// Evaluate against `vars`; names missing from both `vars` and `library`
    /// fail with [`ExprError::Eval`].
    pub fn evaluate_with(
        &self,
        vars: &HashMap<String, f64>,
        library: &Library,
    ) -> Result<f64, ExprError> {
        let mut ns = |name: &str, args: Vec<f64>| -> Option<f64> {
            if args.is_empty() {
                if let Some(value) = vars.get(name) {
                    return Some(*value);
                }
            }
            library.call(name, &args)
        };

        self.instruction
            .eval(&self.slab, &mut ns)
            .map_err(|e| ExprError::Eval {
                expression: self.source.clone(),
                message: e.to_string(),
            })
    }
}

/// True when `expr` parses and references a volatile clock variable.
pub fn is_volatile_expression(expr: &str) -> bool {
    parse(expr).map(|c| c.is_volatile()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn eval(expr: &str, pairs: &[(&str, f64)]) -> f64 {
        parse(expr)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .evaluate(&vars(pairs))
            .unwrap_or_else(|e| panic!("eval failed: {e}"))
    }

    #[test]
    fn flattens_dotted_identifiers_only() {
        assert_eq!(flatten_identifiers("audio.bass * 2"), "audio_bass * 2");
        assert_eq!(flatten_identifiers("a.b.c + 1.5"), "a_b_c + 1.5");
        assert_eq!(flatten_identifiers("x + .5"), "x + .5");
    }

    #[test]
    fn arithmetic_and_variables() {
        assert_eq!(eval("a * 2 + b", &[("a", 3.0), ("b", 1.0)]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
    }

    #[test]
    fn dotted_references_read_flat_context_names() {
        assert_eq!(eval("x.y + 1", &[("x_y", 5.0)]), 6.0);
    }

    #[test]
    fn library_functions_are_callable() {
        assert_eq!(eval("clamp(v, 0, 1)", &[("v", 5.0)]), 1.0);
        assert_eq!(eval("mod(-1, 3)", &[]), 2.0);
        assert_eq!(eval("lerp(0, 10, 0.5)", &[]), 5.0);
        assert_eq!(eval("saturate(-2) + step(1, 2)", &[]), 1.0);
    }

    #[test]
    fn comparisons_yield_numbers() {
        assert_eq!(eval("a > 1", &[("a", 2.0)]), 1.0);
        assert_eq!(eval("a > 1", &[("a", 0.0)]), 0.0);
    }

    #[test]
    fn unknown_variable_is_eval_error() {
        let compiled = parse("missing + 1").unwrap();
        let err = compiled.evaluate(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ExprError::Eval { .. }));
        assert_eq!(err.expression(), "missing + 1");
    }

    #[test]
    fn wrong_arity_is_eval_error() {
        let compiled = parse("clamp(1)").unwrap();
        assert!(compiled.evaluate(&HashMap::new()).is_err());
    }

    #[test]
    fn malformed_input_is_syntax_error() {
        assert!(matches!(parse("1 +"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse("(a * 2"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn variables_exclude_vocabulary() {
        let compiled = parse("sin(time) * gain + clamp(x, 0, PI)").unwrap();
        let free: Vec<_> = compiled.variables().collect();
        assert_eq!(free, vec!["gain", "x"]);
    }

    #[test]
    fn variables_inside_nested_calls_are_found() {
        let compiled = parse("lerp(a, b.c, smoothstep(0, 1, t)) + sqrt(mod(d, 3))").unwrap();
        let free: Vec<_> = compiled.variables().collect();
        assert_eq!(free, vec!["a", "b_c", "d", "t"]);
    }

    #[test]
    fn number_suffixes_are_not_identifiers() {
        let compiled = parse("1e3 * gain + 2.5e-1").unwrap();
        let free: Vec<_> = compiled.variables().collect();
        assert_eq!(free, vec!["gain"]);
    }

    #[test]
    fn volatility_tracks_clock_variables() {
        assert!(is_volatile_expression("sin(time)"));
        assert!(is_volatile_expression("sawtooth(time)"));
        assert!(is_volatile_expression("noise(time * 0.5)"));
        assert!(is_volatile_expression("clamp(fract(frame / 60), 0, 1)"));
        assert!(is_volatile_expression("random * 2"));
        assert!(is_volatile_expression("hourFrac"));
        assert!(!is_volatile_expression("PI * a"));
        assert!(!is_volatile_expression("a +"));
    }
}

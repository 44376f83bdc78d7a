//! The value registry and its recomputation engine.
//!
//! [`ValueRegistry`] owns every value definition together with the dependency
//! graph, compiled expressions, accumulator state, smoothing buffers and the
//! event bus. All mutation goes through its methods and runs synchronously:
//! a write cascades through dependent computed values before it returns.
//!
//! Cycles are broken by a per-id write lock. While a value's write (and the
//! cascade it started) is still on the stack, any further write to that value
//! is rejected, so a loop of computed values runs at most once around.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace, warn};

use crate::accumulator::{self, AccumulatorState, StepInput};
use crate::clock::{Clock, ClockSnapshot, SYSTEM_VARIABLES, SystemTime, TimeSource};
use crate::config::RegistryConfig;
use crate::deps::{self, DependencyGraph};
use crate::error::{ExprError, RegistryError};
use crate::events::{ErrorCode, EventBus, EventKind, SubscriptionId, ValueEvent};
use crate::expr::{self, CompiledExpr, Library};
use crate::names::{NameTable, flat_name};
use crate::persist::{
    AccumulatorRecord, ComputedRecord, PersistedSources, RestoreReport, SourceStore,
};
use crate::types::{
    AccumulatorOptions, AccumulatorSource, ComputedOptions, ComputedSource, SourceKind, Value,
    ValueDefinition, ValueId, ValueSource, ValueType, ValueUpdate,
};
use crate::validation::{self, Smoother};

type Compiled = Result<CompiledExpr, ExprError>;

/// Compiled expressions for a computed or accumulator value. Parse failures
/// are kept so every evaluation attempt reports them.
enum CompiledSource {
    Computed(Compiled),
    Accumulator {
        rate: Compiled,
        limit: Option<Compiled>,
        min: Option<Compiled>,
    },
}

fn eval_slot(
    slot: &Compiled,
    ctx: &HashMap<String, f64>,
    library: &Library,
) -> Result<f64, ExprError> {
    match slot {
        Ok(compiled) => compiled.evaluate_with(ctx, library),
        Err(e) => Err(e.clone()),
    }
}

/// Numeric view of a value inside an evaluation context.
fn context_number(value: &Value) -> Option<f64> {
    let n = validation::to_number(value);
    (!n.is_nan()).then_some(n)
}

fn default_for(value_type: ValueType) -> Value {
    match value_type {
        ValueType::Number => Value::Number(0.0),
        ValueType::Boolean => Value::Boolean(false),
        ValueType::String => Value::String(String::new()),
        ValueType::Array => Value::Array(Vec::new()),
    }
}

/// Counts of registered values, for dashboards and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total: usize,
    pub by_type: BTreeMap<ValueType, usize>,
    pub by_source: BTreeMap<SourceKind, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub volatile: usize,
    pub dependency_edges: usize,
}

pub struct ValueRegistry {
    values: BTreeMap<ValueId, ValueDefinition>,
    names: NameTable,
    graph: DependencyGraph,
    compiled: HashMap<ValueId, CompiledSource>,
    accumulators: BTreeMap<ValueId, AccumulatorState>,
    volatile: BTreeSet<ValueId>,
    /// Ids whose write is currently on the stack, outermost first.
    write_stack: Vec<ValueId>,
    smoother: Smoother,
    events: EventBus,
    clock: Clock,
    /// Shared by every evaluation within one tick.
    tick_snapshot: Option<ClockSnapshot>,
    library: Library,
    persisted: BTreeSet<ValueId>,
    save_pending: bool,
}

impl Default for ValueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueRegistry {
    /// Registry on the system clock with default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), SystemTime::new())
    }

    pub fn with_config(config: RegistryConfig, time_source: impl TimeSource + 'static) -> Self {
        Self {
            values: BTreeMap::new(),
            names: NameTable::new(),
            graph: DependencyGraph::new(),
            compiled: HashMap::new(),
            accumulators: BTreeMap::new(),
            volatile: BTreeSet::new(),
            write_stack: Vec::new(),
            smoother: Smoother::new(),
            events: EventBus::new(),
            clock: Clock::new(
                Box::new(time_source),
                config.random_seed,
                config.max_tick_delta,
            ),
            tick_snapshot: None,
            library: Library::new(config.noise_seed),
            persisted: BTreeSet::new(),
            save_pending: false,
        }
    }

    // ============ Registration ============

    /// Register a new value. Returns false, leaving the registry untouched, if
    /// the id is taken.
    pub fn register(&mut self, def: ValueDefinition) -> bool {
        if self.values.contains_key(&def.id) {
            warn!("value '{}' is already registered", def.id);
            return false;
        }

        let mut def = def;
        def.value = validation::coerce(&def, def.value.clone());
        def.last_updated = self.clock.elapsed_ms();

        let id = def.id.clone();
        self.names.insert(&id);
        self.install_source(&id, &def.source);
        debug!("registered '{}' ({:?})", id, def.source.kind());

        let definition = def.clone();
        self.values.insert(id.clone(), def);
        self.events.emit(&ValueEvent::Add {
            id: id.clone(),
            definition,
        });

        // A new value may complete a forward reference.
        self.update_dependents(&id);
        true
    }

    /// Merge `changes` into an existing definition.
    pub fn update(&mut self, id: &str, changes: ValueUpdate) -> bool {
        let Some(existing) = self.values.get(id) else {
            warn!("update: unknown value '{id}'");
            return false;
        };
        let old_def = existing.clone();
        let kept_state = self.accumulators.get(id).copied();

        self.uninstall_source(id, &old_def.source);

        let mut def = old_def.clone();
        changes.merge_into(&mut def);
        def.value = validation::coerce(&def, def.value.clone());
        def.last_updated = self.clock.elapsed_ms();

        self.install_source(id, &def.source);
        if let (Some(state), true) = (kept_state, self.accumulators.contains_key(id)) {
            self.accumulators.insert(id.to_string(), state);
        }
        let is_computed = matches!(def.source, ValueSource::Computed(_));
        let new_value = def.value.clone();
        self.values.insert(id.to_string(), def);

        if new_value != old_def.value {
            self.events.emit(&ValueEvent::Change {
                id: id.to_string(),
                old_value: old_def.value,
                new_value,
            });
        }
        if is_computed {
            self.recompute_value(id);
        }
        self.update_dependents(id);

        if self.persisted.contains(id) {
            self.save_pending = true;
        }
        true
    }

    /// Remove a value and everything tied to it. Returns false if absent.
    pub fn unregister(&mut self, id: &str) -> bool {
        let Some(def) = self.values.remove(id) else {
            return false;
        };
        self.uninstall_source(id, &def.source);
        self.names.remove(id);
        self.smoother.forget(id);
        if self.persisted.remove(id) {
            self.save_pending = true;
        }
        debug!("unregistered '{id}'");
        self.events.emit(&ValueEvent::Remove { id: id.to_string() });
        true
    }

    fn install_source(&mut self, id: &str, source: &ValueSource) {
        match source {
            ValueSource::Computed(computed) => {
                self.graph.add_edges(id, &computed.dependencies);
                let compiled = expr::parse(&computed.expression);
                if compiled.as_ref().is_ok_and(CompiledExpr::is_volatile) {
                    self.volatile.insert(id.to_string());
                }
                self.compiled
                    .insert(id.to_string(), CompiledSource::Computed(compiled));
            }
            ValueSource::Accumulator(acc) => {
                self.graph.add_edges(id, acc.all_dependencies());
                self.compiled.insert(
                    id.to_string(),
                    CompiledSource::Accumulator {
                        rate: expr::parse(&acc.rate_expression),
                        limit: acc.limit_expression.as_deref().map(expr::parse),
                        min: acc.min_expression.as_deref().map(expr::parse),
                    },
                );
                self.accumulators
                    .insert(id.to_string(), AccumulatorState::new(acc.initial_value));
            }
            ValueSource::Manual | ValueSource::Audio { .. } | ValueSource::System => {}
        }
    }

    fn uninstall_source(&mut self, id: &str, source: &ValueSource) {
        self.graph.remove_edges(id, source.dependencies());
        self.compiled.remove(id);
        self.volatile.remove(id);
        self.accumulators.remove(id);
    }

    /// Register a value driven by `expression`.
    ///
    /// Unlike [`Self::register`], a malformed expression is rejected here with
    /// [`ExprError::Syntax`]. Dependencies are extracted from the expression
    /// unless `options.dependencies` lists them.
    pub fn create_computed(
        &mut self,
        id: &str,
        name: &str,
        expression: &str,
        options: ComputedOptions,
    ) -> Result<(), RegistryError> {
        if self.values.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        let compiled = expr::parse(expression)?;
        let dependencies = options
            .dependencies
            .clone()
            .unwrap_or_else(|| deps::extract_from(&compiled, &self.names).into_iter().collect());

        let value_type = options.value_type.unwrap_or(ValueType::Number);
        let mut def = ValueDefinition::with_type(id, name, value_type, default_for(value_type));
        def.apply_metadata(&options.metadata);
        def.source = ValueSource::Computed(ComputedSource {
            expression: expression.to_string(),
            dependencies,
        });

        self.register(def);
        self.recompute_value(id);

        self.persisted.insert(id.to_string());
        if !options.skip_save {
            self.save_pending = true;
        }
        Ok(())
    }

    /// Register a value integrated from `rate_expression` once per tick.
    pub fn create_accumulator(
        &mut self,
        id: &str,
        name: &str,
        rate_expression: &str,
        options: AccumulatorOptions,
    ) -> Result<(), RegistryError> {
        if self.values.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }
        let rate = expr::parse(rate_expression)?;
        let limit = options.limit_expression.as_deref().map(expr::parse).transpose()?;
        let min = options.min_expression.as_deref().map(expr::parse).transpose()?;

        let extract = |compiled: Option<&CompiledExpr>, given: &Option<Vec<ValueId>>| -> Vec<ValueId> {
            match (given, compiled) {
                (Some(given), _) => given.clone(),
                (None, Some(compiled)) => deps::extract_from(compiled, &self.names).into_iter().collect(),
                (None, None) => Vec::new(),
            }
        };
        let source = AccumulatorSource {
            rate_expression: rate_expression.to_string(),
            rate_dependencies: extract(Some(&rate), &options.rate_dependencies),
            limit_expression: options.limit_expression.clone(),
            limit_dependencies: extract(limit.as_ref(), &options.limit_dependencies),
            min_expression: options.min_expression.clone(),
            min_dependencies: extract(min.as_ref(), &options.min_dependencies),
            wrap_mode: options.wrap_mode,
            initial_value: options.initial_value,
            reset_on_limit: options.reset_on_limit,
        };

        let mut def = ValueDefinition::number(id, name, options.initial_value);
        def.apply_metadata(&options.metadata);
        def.source = ValueSource::Accumulator(source);
        self.register(def);

        self.persisted.insert(id.to_string());
        if !options.skip_save {
            self.save_pending = true;
        }
        Ok(())
    }

    // ============ Reads ============

    pub fn has(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    pub fn get_definition(&self, id: &str) -> Option<&ValueDefinition> {
        self.values.get(id)
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id).map(|d| &d.value)
    }

    pub fn get_or(&self, id: &str, default: impl Into<Value>) -> Value {
        self.get(id).cloned().unwrap_or_else(|| default.into())
    }

    pub fn get_number(&self, id: &str) -> Option<f64> {
        self.get(id).and_then(Value::as_number)
    }

    pub fn get_bool(&self, id: &str) -> Option<bool> {
        self.get(id).and_then(Value::as_bool)
    }

    pub fn get_string(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(Value::as_str)
    }

    pub fn get_array(&self, id: &str) -> Option<&[Value]> {
        self.get(id).and_then(Value::as_array)
    }

    /// Values of the requested ids that exist.
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> BTreeMap<ValueId, Value> {
        ids.iter()
            .filter_map(|id| {
                let id = id.as_ref();
                self.get(id).map(|v| (id.to_string(), v.clone()))
            })
            .collect()
    }

    pub fn get_all_values(&self) -> BTreeMap<ValueId, Value> {
        self.values
            .iter()
            .map(|(id, def)| (id.clone(), def.value.clone()))
            .collect()
    }

    pub fn get_registered_ids(&self) -> Vec<ValueId> {
        self.values.keys().cloned().collect()
    }

    pub fn accumulator_state(&self, id: &str) -> Option<AccumulatorState> {
        self.accumulators.get(id).copied()
    }

    pub fn extract_dependencies(&self, expression: &str) -> BTreeSet<ValueId> {
        deps::extract_dependencies(expression, &self.names)
    }

    pub fn is_volatile_expression(&self, expression: &str) -> bool {
        expr::is_volatile_expression(expression)
    }

    /// Ids that depend on `id` through the dependency graph.
    pub fn dependents_of(&self, id: &str) -> Vec<ValueId> {
        self.graph.dependents_of(id)
    }

    pub fn get_stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.values.len(),
            volatile: self.volatile.len(),
            dependency_edges: self.graph.edge_count(),
            ..Default::default()
        };
        for def in self.values.values() {
            *stats.by_type.entry(def.value_type).or_default() += 1;
            *stats.by_source.entry(def.source.kind()).or_default() += 1;
            if let Some(category) = &def.category {
                *stats.by_category.entry(category.clone()).or_default() += 1;
            }
        }
        stats
    }

    // ============ Writes ============

    /// Write a value from outside the registry.
    ///
    /// Returns false for unknown, readonly or currently locked ids. Writing
    /// the value a definition already holds is accepted but changes nothing.
    pub fn set(&mut self, id: &str, value: impl Into<Value>) -> bool {
        let Some(def) = self.values.get(id) else {
            warn!("set: unknown value '{id}'");
            return false;
        };
        if def.readonly {
            warn!("set: value '{id}' is readonly");
            return false;
        }
        self.write(id, value.into())
    }

    /// Write an analyzer reading, smoothed and mapped per the value's extraction.
    pub fn set_from_audio(&mut self, id: &str, value: f64, smoothing: Option<f64>) -> bool {
        let Some(def) = self.values.get(id) else {
            warn!("set_from_audio: unknown value '{id}'");
            return false;
        };
        if def.value_type != ValueType::Number {
            warn!("set_from_audio: value '{id}' is not a number");
            return false;
        }
        let (fallback, output_range) = match &def.source {
            ValueSource::Audio { extraction, .. } => (extraction.smoothing, extraction.output_range),
            _ => (None, None),
        };

        let smoothed = self.smoother.smooth(id, value, smoothing.or(fallback));
        let mapped = validation::apply_output_range(smoothed, output_range);
        let accepted = self.set(id, Value::Number(mapped));
        if accepted {
            self.smoother.commit(id, smoothed);
        }
        accepted
    }

    /// Validate, store and cascade. Shared by every writer inside the registry.
    fn write(&mut self, id: &str, raw: Value) -> bool {
        if let Some(pos) = self.write_stack.iter().position(|locked| locked == id) {
            let chain = self.write_stack[pos..].join(" -> ");
            warn!("recursive write to '{id}' rejected (cycle: {chain} -> {id})");
            return false;
        }

        let now = self.clock.elapsed_ms();
        let Some(def) = self.values.get_mut(id) else {
            return false;
        };
        let new_value = validation::coerce(def, raw);
        if new_value == def.value {
            return true;
        }
        let old_value = std::mem::replace(&mut def.value, new_value.clone());
        def.last_updated = now;

        self.write_stack.push(id.to_string());
        self.events.emit(&ValueEvent::Change {
            id: id.to_string(),
            old_value,
            new_value,
        });
        self.update_dependents(id);
        self.write_stack.pop();
        true
    }

    /// Restore a value to its default. Accumulators return to their initial
    /// value; computed values are recomputed.
    pub fn reset(&mut self, id: &str) -> bool {
        let Some(def) = self.values.get(id) else {
            return false;
        };
        match def.source.kind() {
            SourceKind::Accumulator => self.reset_accumulator(id),
            SourceKind::Computed => {
                self.recompute_value(id);
                true
            }
            SourceKind::Manual | SourceKind::Audio | SourceKind::System => {
                let default = def.default_value.clone();
                self.smoother.forget(id);
                self.write(id, default)
            }
        }
    }

    pub fn reset_all(&mut self) {
        for id in self.get_registered_ids() {
            self.reset(&id);
        }
    }

    pub fn reset_accumulator(&mut self, id: &str) -> bool {
        let initial = match self.values.get(id).map(|d| &d.source) {
            Some(ValueSource::Accumulator(acc)) => acc.initial_value,
            _ => return false,
        };
        if let Some(state) = self.accumulators.get_mut(id) {
            state.reset(initial);
        }
        self.write(id, Value::Number(initial))
    }

    // ============ Recomputation ============

    /// Evaluation context: each registered dependency under its flat name,
    /// then every system variable. Outside a tick the clock is read afresh.
    fn build_context<'a>(&mut self, deps: impl IntoIterator<Item = &'a ValueId>) -> HashMap<String, f64> {
        let mut ctx = HashMap::new();
        for dep in deps {
            let Some(n) = self.values.get(dep).and_then(|d| context_number(&d.value)) else {
                continue;
            };
            let flat = flat_name(dep);
            if ctx.contains_key(&flat) {
                // Both spellings read as one variable; the name table decides.
                let owner = self.names.resolve(&flat).cloned().unwrap_or_default();
                warn!("'{dep}' and another id both read as '{flat}'; using '{owner}'");
                if owner != *dep {
                    continue;
                }
            }
            ctx.insert(flat, n);
        }
        let snapshot = match self.tick_snapshot {
            Some(snapshot) => snapshot,
            None => self.clock.snapshot(),
        };
        for name in SYSTEM_VARIABLES.iter() {
            if let Some(v) = snapshot.get(name) {
                ctx.insert(name.to_string(), v);
            }
        }
        ctx
    }

    /// Re-evaluate a computed value and write the result. No-op for anything
    /// that is not computed; failures become `COMPUTE_ERROR` events.
    pub fn recompute_value(&mut self, id: &str) {
        let dependencies = match self.values.get(id).map(|d| &d.source) {
            Some(ValueSource::Computed(computed)) => computed.dependencies.clone(),
            _ => return,
        };
        let ctx = self.build_context(&dependencies);
        let result = match self.compiled.get(id) {
            Some(CompiledSource::Computed(slot)) => eval_slot(slot, &ctx, &self.library),
            _ => return,
        };

        match result {
            Ok(n) => {
                trace!("recomputed '{id}' = {n}");
                self.write(id, Value::Number(n));
            }
            Err(e) => self.emit_error(id, ErrorCode::ComputeError, e.to_string()),
        }
    }

    /// Recompute every direct dependent of `id`.
    pub fn update_dependents(&mut self, id: &str) {
        for dependent in self.graph.dependents_of(id) {
            trace!("'{id}' changed, recomputing '{dependent}'");
            self.recompute_value(&dependent);
        }
    }

    fn emit_error(&mut self, id: &str, code: ErrorCode, message: String) {
        debug!("{code:?} for '{id}': {message}");
        self.events.emit(&ValueEvent::Error {
            id: id.to_string(),
            code,
            message,
        });
    }

    // ============ Tick ============

    /// Host tick: advance the clock, integrate every accumulator once, then
    /// recompute every computed value that reads a volatile clock variable.
    pub fn update_accumulators(&mut self) {
        let delta = self.clock.advance();
        self.tick_snapshot = Some(self.clock.snapshot());
        trace!("tick {} (delta {delta:.4}s)", self.clock.frame());

        let ids: Vec<ValueId> = self.accumulators.keys().cloned().collect();
        for id in ids {
            self.integrate(&id, delta);
        }

        let volatile: Vec<ValueId> = self.volatile.iter().cloned().collect();
        for id in volatile {
            self.recompute_value(&id);
        }
        self.tick_snapshot = None;
    }

    fn integrate(&mut self, id: &str, delta: f64) {
        let source = match self.values.get(id).map(|d| &d.source) {
            Some(ValueSource::Accumulator(acc)) => acc.clone(),
            _ => return,
        };
        let ctx = self.build_context(source.all_dependencies());
        let Some(CompiledSource::Accumulator { rate, limit, min }) = self.compiled.get(id) else {
            return;
        };

        let evaluated = (|| -> Result<(f64, f64, Option<f64>), ExprError> {
            let rate = eval_slot(rate, &ctx, &self.library)?;
            let min = min
                .as_ref()
                .map(|slot| eval_slot(slot, &ctx, &self.library))
                .transpose()?
                .unwrap_or(0.0);
            let max = limit
                .as_ref()
                .map(|slot| eval_slot(slot, &ctx, &self.library))
                .transpose()?;
            Ok((rate, min, max))
        })();

        let (rate, min, max) = match evaluated {
            Ok(inputs) => inputs,
            Err(e) => {
                self.emit_error(id, ErrorCode::AccumulatorError, e.to_string());
                return;
            }
        };
        if !rate.is_finite() {
            self.emit_error(
                id,
                ErrorCode::AccumulatorError,
                format!("rate evaluated to {rate}"),
            );
            return;
        }

        let Some(state) = self.accumulators.get_mut(id) else {
            return;
        };
        let next = accumulator::step(
            state,
            &StepInput {
                rate,
                min,
                max,
                delta,
                wrap_mode: source.wrap_mode,
                initial_value: source.initial_value,
                reset_on_limit: source.reset_on_limit,
            },
        );
        self.write(id, Value::Number(next));
    }

    // ============ Events ============

    pub fn on<F>(&mut self, kind: EventKind, filter: Option<&str>, callback: F) -> SubscriptionId
    where
        F: FnMut(&ValueEvent) + Send + 'static,
    {
        self.events.on(kind, filter, callback)
    }

    pub fn once<F>(&mut self, kind: EventKind, filter: Option<&str>, callback: F) -> SubscriptionId
    where
        F: FnMut(&ValueEvent) + Send + 'static,
    {
        self.events.once(kind, filter, callback)
    }

    pub fn off(&mut self, subscription: SubscriptionId) -> bool {
        self.events.off(subscription)
    }

    /// Call `callback(new, old)` whenever `id` changes.
    pub fn watch<F>(&mut self, id: &str, mut callback: F) -> SubscriptionId
    where
        F: FnMut(&Value, &Value) + Send + 'static,
    {
        self.events.on(EventKind::Change, Some(id), move |event| {
            if let ValueEvent::Change {
                old_value,
                new_value,
                ..
            } = event
            {
                callback(new_value, old_value);
            }
        })
    }

    // ============ Persistence ============

    /// Records for every computed and accumulator value created through the
    /// constructors that is still registered with that kind of source.
    pub fn persisted_sources(&self) -> PersistedSources {
        let mut sources = PersistedSources::default();
        for id in &self.persisted {
            let Some(def) = self.values.get(id) else {
                continue;
            };
            match &def.source {
                ValueSource::Computed(computed) => sources.computed.push(ComputedRecord {
                    id: id.clone(),
                    name: def.name.clone(),
                    expression: computed.expression.clone(),
                    options: ComputedOptions {
                        dependencies: Some(computed.dependencies.clone()),
                        value_type: Some(def.value_type),
                        metadata: def.metadata(),
                        skip_save: false,
                    },
                }),
                ValueSource::Accumulator(acc) => sources.accumulators.push(AccumulatorRecord {
                    id: id.clone(),
                    name: def.name.clone(),
                    rate_expression: acc.rate_expression.clone(),
                    options: AccumulatorOptions {
                        rate_dependencies: Some(acc.rate_dependencies.clone()),
                        limit_expression: acc.limit_expression.clone(),
                        limit_dependencies: Some(acc.limit_dependencies.clone()),
                        min_expression: acc.min_expression.clone(),
                        min_dependencies: Some(acc.min_dependencies.clone()),
                        wrap_mode: acc.wrap_mode,
                        initial_value: acc.initial_value,
                        reset_on_limit: acc.reset_on_limit,
                        metadata: def.metadata(),
                        skip_save: false,
                    },
                }),
                ValueSource::Manual | ValueSource::Audio { .. } | ValueSource::System => {}
            }
        }
        sources
    }

    /// The current records, once, if anything persisted changed since the last call.
    pub fn take_pending_save(&mut self) -> Option<PersistedSources> {
        if !self.save_pending {
            return None;
        }
        self.save_pending = false;
        Some(self.persisted_sources())
    }

    /// Re-create persisted values without marking them for saving.
    pub fn restore(&mut self, sources: PersistedSources) -> RestoreReport {
        let mut report = RestoreReport::default();
        for record in sources.computed {
            let mut options = record.options;
            options.skip_save = true;
            match self.create_computed(&record.id, &record.name, &record.expression, options) {
                Ok(()) => report.restored += 1,
                Err(e) => report.failed.push((record.id, e)),
            }
        }
        for record in sources.accumulators {
            let mut options = record.options;
            options.skip_save = true;
            match self.create_accumulator(&record.id, &record.name, &record.rate_expression, options) {
                Ok(()) => report.restored += 1,
                Err(e) => report.failed.push((record.id, e)),
            }
        }
        debug!(
            "restored {} persisted values ({} failed)",
            report.restored,
            report.failed.len()
        );
        report
    }

    pub fn load_from<S: SourceStore>(&mut self, store: &mut S) -> Result<RestoreReport, S::Error> {
        let sources = store.load()?;
        Ok(self.restore(sources))
    }

    pub fn save_to<S: SourceStore>(&mut self, store: &mut S) -> Result<(), S::Error> {
        store.save(&self.persisted_sources())?;
        self.save_pending = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTime;
    use crate::types::WrapMode;

    fn registry() -> (ValueRegistry, ManualTime) {
        let time = ManualTime::new();
        let config = RegistryConfig {
            random_seed: Some(7),
            ..Default::default()
        };
        (ValueRegistry::with_config(config, time.clone()), time)
    }

    #[test]
    fn register_rejects_duplicates() {
        let (mut reg, _) = registry();
        assert!(reg.register(ValueDefinition::number("a", "A", 1.0)));
        assert!(!reg.register(ValueDefinition::number("a", "A again", 2.0)));
        assert_eq!(reg.get_number("a"), Some(1.0));
    }

    #[test]
    fn register_coerces_initial_value() {
        let (mut reg, _) = registry();
        reg.register(
            ValueDefinition::number("a", "A", 0.5)
                .with_range(0.0, 1.0)
                .with_value(9.0),
        );
        assert_eq!(reg.get_number("a"), Some(1.0));
    }

    #[test]
    fn readonly_rejects_external_set() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("r", "R", 1.0).as_readonly());
        assert!(!reg.set("r", 2.0));
        assert_eq!(reg.get_number("r"), Some(1.0));
    }

    #[test]
    fn readonly_computed_still_recomputes() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("a", "A", 1.0));
        reg.register(
            ValueDefinition::number("b", "B", 0.0)
                .as_readonly()
                .with_source(ValueSource::Computed(ComputedSource {
                    expression: "a + 1".into(),
                    dependencies: vec!["a".into()],
                })),
        );
        reg.set("a", 4.0);
        assert_eq!(reg.get_number("b"), Some(5.0));
    }

    #[test]
    fn unknown_set_returns_false() {
        let (mut reg, _) = registry();
        assert!(!reg.set("nope", 1.0));
    }

    #[test]
    fn update_rewires_dependencies() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("a", "A", 1.0));
        reg.register(ValueDefinition::number("b", "B", 10.0));
        reg.create_computed("c", "C", "a * 2", ComputedOptions::default())
            .unwrap();
        assert_eq!(reg.get_number("c"), Some(2.0));

        assert!(reg.update(
            "c",
            ValueUpdate {
                source: Some(ValueSource::Computed(ComputedSource {
                    expression: "b * 3".into(),
                    dependencies: vec!["b".into()],
                })),
                ..Default::default()
            },
        ));
        assert_eq!(reg.get_number("c"), Some(30.0));
        assert!(reg.dependents_of("a").is_empty());
        assert_eq!(reg.dependents_of("b"), vec!["c".to_string()]);

        reg.set("a", 5.0);
        assert_eq!(reg.get_number("c"), Some(30.0));
        reg.set("b", 2.0);
        assert_eq!(reg.get_number("c"), Some(6.0));
    }

    #[test]
    fn update_revalidates_against_new_bounds() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("a", "A", 0.0).with_value(50.0));
        reg.update(
            "a",
            ValueUpdate {
                max: Some(10.0),
                ..Default::default()
            },
        );
        assert_eq!(reg.get_number("a"), Some(10.0));
    }

    #[test]
    fn unregister_tears_down_edges_and_state() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("speed", "Speed", 1.0));
        reg.create_accumulator(
            "phase",
            "Phase",
            "speed",
            AccumulatorOptions::default(),
        )
        .unwrap();
        assert_eq!(reg.dependents_of("speed"), vec!["phase".to_string()]);
        assert!(reg.accumulator_state("phase").is_some());

        assert!(reg.unregister("phase"));
        assert!(!reg.unregister("phase"));
        assert!(reg.dependents_of("speed").is_empty());
        assert!(reg.accumulator_state("phase").is_none());
        assert!(reg.persisted_sources().is_empty());
    }

    #[test]
    fn create_computed_surfaces_syntax_errors() {
        let (mut reg, _) = registry();
        let err = reg
            .create_computed("c", "C", "a +", ComputedOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Expression(ExprError::Syntax { .. })));
        assert!(!reg.has("c"));
    }

    #[test]
    fn create_computed_rejects_taken_id() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("c", "C", 0.0));
        assert_eq!(
            reg.create_computed("c", "C", "1", ComputedOptions::default()),
            Err(RegistryError::DuplicateId("c".into()))
        );
    }

    #[test]
    fn boolean_computed_coerces_result() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("level", "Level", 0.2));
        reg.create_computed(
            "loud",
            "Loud",
            "level > 0.5",
            ComputedOptions {
                value_type: Some(ValueType::Boolean),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(reg.get_bool("loud"), Some(false));
        reg.set("level", 0.9);
        assert_eq!(reg.get_bool("loud"), Some(true));
    }

    #[test]
    fn reset_restores_defaults() {
        let (mut reg, time) = registry();
        reg.register(ValueDefinition::number("a", "A", 3.0));
        reg.create_accumulator(
            "acc",
            "Acc",
            "1",
            AccumulatorOptions {
                initial_value: 2.0,
                ..Default::default()
            },
        )
        .unwrap();
        reg.set("a", 7.0);
        time.advance(1.0);
        reg.update_accumulators();
        assert_eq!(reg.get_number("acc"), Some(3.0));

        reg.reset_all();
        assert_eq!(reg.get_number("a"), Some(3.0));
        assert_eq!(reg.get_number("acc"), Some(2.0));
        assert_eq!(reg.accumulator_state("acc").map(|s| s.value), Some(2.0));
    }

    #[test]
    fn stats_count_by_type_source_and_category() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("a", "A", 1.0).with_category("audio"));
        reg.register(ValueDefinition::boolean("b", "B", false).with_category("audio"));
        reg.create_computed("c", "C", "a + sin(time)", ComputedOptions::default())
            .unwrap();

        let stats = reg.get_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get(&ValueType::Number), Some(&2));
        assert_eq!(stats.by_type.get(&ValueType::Boolean), Some(&1));
        assert_eq!(stats.by_source.get(&SourceKind::Manual), Some(&2));
        assert_eq!(stats.by_source.get(&SourceKind::Computed), Some(&1));
        assert_eq!(stats.by_category.get("audio"), Some(&2));
        assert_eq!(stats.volatile, 1);
        assert_eq!(stats.dependency_edges, 1);
    }

    #[test]
    fn accumulator_rate_error_skips_only_that_accumulator() {
        let (mut reg, time) = registry();
        reg.create_accumulator("bad", "Bad", "missing * 2", AccumulatorOptions::default())
            .unwrap();
        reg.create_accumulator("good", "Good", "1", AccumulatorOptions::default())
            .unwrap();

        let errors = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&errors);
        reg.on(EventKind::Error, None, move |e| {
            if let ValueEvent::Error { id, code, .. } = e {
                sink.lock().push((id.clone(), *code));
            }
        });

        time.advance(1.0);
        reg.update_accumulators();

        assert_eq!(reg.get_number("good"), Some(1.0));
        assert_eq!(reg.get_number("bad"), Some(0.0));
        assert_eq!(
            *errors.lock(),
            vec![("bad".to_string(), ErrorCode::AccumulatorError)]
        );
    }

    #[test]
    fn accumulator_limit_follows_dependency() {
        let (mut reg, time) = registry();
        reg.register(ValueDefinition::number("top", "Top", 5.0));
        reg.create_accumulator(
            "acc",
            "Acc",
            "2",
            AccumulatorOptions {
                limit_expression: Some("top".into()),
                wrap_mode: WrapMode::Clamp,
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..5 {
            time.advance(1.0);
            reg.update_accumulators();
        }
        assert_eq!(reg.get_number("acc"), Some(5.0));

        reg.set("top", 20.0);
        time.advance(1.0);
        reg.update_accumulators();
        assert_eq!(reg.get_number("acc"), Some(7.0));
    }

    #[test]
    fn pending_save_tracks_changes_but_not_restores() {
        let (mut reg, _) = registry();
        assert!(reg.take_pending_save().is_none());

        reg.create_computed("c", "C", "1 + 1", ComputedOptions::default())
            .unwrap();
        let saved = reg.take_pending_save().expect("create marks save pending");
        assert_eq!(saved.computed.len(), 1);
        assert!(reg.take_pending_save().is_none());

        let (mut restored, _) = registry();
        let report = restored.restore(saved);
        assert!(report.is_clean());
        assert_eq!(report.restored, 1);
        assert_eq!(restored.get_number("c"), Some(2.0));
        assert!(restored.take_pending_save().is_none());
    }

    #[test]
    fn recursive_write_emits_no_error_event() {
        let (mut reg, _) = registry();
        let errors = std::sync::Arc::new(parking_lot::Mutex::new(0));
        let sink = std::sync::Arc::clone(&errors);
        reg.create_computed("a", "A", "b + 1", ComputedOptions {
            dependencies: Some(vec!["b".into()]),
            ..Default::default()
        })
        .unwrap();
        reg.create_computed("b", "B", "a + 1", ComputedOptions {
            dependencies: Some(vec!["a".into()]),
            ..Default::default()
        })
        .unwrap();
        reg.on(EventKind::Error, None, move |_| *sink.lock() += 1);

        reg.set("a", 0.0);
        assert_eq!(*errors.lock(), 0);
    }

    #[test]
    fn rejected_audio_write_leaves_smoothing_untouched() {
        let (mut reg, _) = registry();
        reg.register(ValueDefinition::number("fixed", "Fixed", 0.0).as_readonly());
        reg.register(ValueDefinition::number("bass", "Bass", 0.0));

        assert!(!reg.set_from_audio("fixed", 1.0, Some(0.5)));
        assert_eq!(reg.smoother.smooth("fixed", 0.0, Some(0.5)), 0.0);

        assert!(reg.set_from_audio("bass", 1.0, Some(0.5)));
        assert_eq!(reg.smoother.smooth("bass", 0.0, Some(0.5)), 0.5);
    }

    #[test]
    fn shared_flat_name_reads_the_flat_id() {
        let (mut reg, _) = registry();
        reg.create_computed("c", "C", "x.y * 10", ComputedOptions::default())
            .unwrap();
        assert_eq!(
            reg.get_definition("c").map(|d| d.source.dependencies().len()),
            Some(2)
        );

        reg.register(ValueDefinition::number("x_y", "Flat", 2.0));
        reg.register(ValueDefinition::number("x.y", "Dotted", 1.0));
        assert_eq!(reg.get_number("c"), Some(20.0));

        reg.set("x.y", 3.0);
        assert_eq!(reg.get_number("c"), Some(20.0));
        reg.set("x_y", 4.0);
        assert_eq!(reg.get_number("c"), Some(40.0));
    }
}

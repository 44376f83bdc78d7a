//! valuegraph: CLI host for the reactive value graph
//!
//! Drives a [`ValueRegistry`] outside of any UI:
//!
//! - `eval`: Evaluate a single expression against literal variables
//! - `deps`: Show which value ids an expression depends on
//! - `run`: Load a scene, tick it, and print the resulting values

mod scene;
mod store;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use valuegraph_core::clock::{Clock, SYSTEM_VARIABLES};
use valuegraph_core::expr::{self, Library};
use valuegraph_core::names::{NameTable, flat_name};
use valuegraph_core::{
    EventKind, ManualTime, SourceStore, SystemTime, TimeSource, Value, ValueEvent, ValueRegistry,
    deps,
};

use scene::Scene;
use store::JsonFileStore;

/// CLI host for the reactive value graph
#[derive(Parser)]
#[command(name = "valuegraph")]
#[command(about = "Evaluate expressions and run value graph scenes")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression once
    Eval {
        expression: String,

        /// Variable binding, e.g. --var audio.bass=0.5
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Seed for the noise() function
        #[arg(long, default_value = "0")]
        noise_seed: u64,
    },

    /// List the value ids an expression depends on
    Deps {
        expression: String,

        /// Resolve names against the values declared in this scene
        #[arg(long)]
        scene: Option<PathBuf>,
    },

    /// Load a scene and tick it
    Run {
        scene: PathBuf,

        /// Number of ticks to run
        #[arg(short = 'n', long, default_value = "1")]
        ticks: u64,

        /// Simulated time between ticks, in milliseconds
        #[arg(long, default_value = "16")]
        tick_ms: u64,

        /// Sleep between ticks and read the system clock
        #[arg(long)]
        realtime: bool,

        /// Write a value before the first tick, e.g. --set speed=2
        #[arg(long = "set", value_name = "ID=VALUE")]
        sets: Vec<String>,

        /// Print every change of this value
        #[arg(long = "watch", value_name = "ID")]
        watches: Vec<String>,

        /// Load persisted sources from, and save them back to, this file
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn split_assignment(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("expected NAME=VALUE, got '{raw}'"),
    }
}

/// JSON literal when it parses as one, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("{n}").yellow().to_string(),
        Value::Boolean(b) => b.to_string().cyan().to_string(),
        Value::String(s) => format!("{s:?}").green().to_string(),
        Value::Array(_) => format!("[{value}]").white().to_string(),
    }
}

fn cmd_eval(expression: &str, vars: &[String], noise_seed: u64, format: OutputFormat) -> Result<()> {
    let compiled = expr::parse(expression)?;

    let mut context = HashMap::new();
    let mut clock = Clock::new(Box::new(SystemTime::new()), None, None);
    let snapshot = clock.snapshot();
    for name in SYSTEM_VARIABLES.iter() {
        if let Some(v) = snapshot.get(name) {
            context.insert(name.to_string(), v);
        }
    }
    for raw in vars {
        let (name, value) = split_assignment(raw)?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("variable '{name}' is not a number"))?;
        context.insert(flat_name(name), value);
    }

    let value = compiled.evaluate_with(&context, &Library::new(noise_seed))?;
    match format {
        OutputFormat::Table => println!("{}", format!("{value}").yellow()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "expression": expression,
                "value": value,
                "volatile": compiled.is_volatile(),
            })
        ),
    }
    Ok(())
}

fn cmd_deps(expression: &str, scene: Option<&PathBuf>, format: OutputFormat) -> Result<()> {
    let compiled = expr::parse(expression)?;
    let mut names = NameTable::new();
    if let Some(path) = scene {
        let scene = Scene::load(path)?;
        for def in &scene.values {
            names.insert(&def.id);
        }
        for record in &scene.sources.computed {
            names.insert(&record.id);
        }
        for record in &scene.sources.accumulators {
            names.insert(&record.id);
        }
    }
    let found = deps::extract_from(&compiled, &names);

    match format {
        OutputFormat::Table => {
            for id in &found {
                let marker = if names.contains(id) {
                    "registered".green()
                } else {
                    "forward".dimmed()
                };
                println!("{:>24} {}", id.cyan(), marker);
            }
            if compiled.is_volatile() {
                println!("{}", "volatile: recomputed every tick".yellow());
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "expression": expression,
                "dependencies": found,
                "volatile": compiled.is_volatile(),
            })
        ),
    }
    Ok(())
}

struct RunOptions {
    ticks: u64,
    tick_ms: u64,
    realtime: bool,
    sets: Vec<String>,
    watches: Vec<String>,
    store: Option<PathBuf>,
}

fn cmd_run(path: &PathBuf, opts: RunOptions, format: OutputFormat) -> Result<()> {
    let scene = Scene::load(path)?;
    let manual = ManualTime::new();
    let time: Box<dyn TimeSource> = if opts.realtime {
        Box::new(SystemTime::new())
    } else {
        Box::new(manual.clone())
    };
    let mut registry = ValueRegistry::with_config(scene.config.clone(), BoxedTime(time));

    registry.on(EventKind::Error, None, |event| {
        if let ValueEvent::Error { id, code, message } = event {
            eprintln!("{} {} {:?}: {}", "error".red(), id.cyan(), code, message);
        }
    });
    for id in &opts.watches {
        let watched = id.clone();
        registry.watch(id, move |new, old| match format {
            OutputFormat::Table => println!(
                "{} {} -> {}",
                watched.cyan(),
                format_value(old),
                format_value(new)
            ),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "id": watched, "old": old, "new": new })
            ),
        });
    }

    let (registered, report) = scene.apply(&mut registry);
    info!(
        "scene loaded: {} values, {} derived, {} failed",
        registered,
        report.restored,
        report.failed.len()
    );
    for (id, err) in &report.failed {
        eprintln!("{} {}: {}", "skipped".yellow(), id.cyan(), err);
    }

    let mut store = opts.store.map(JsonFileStore::new);
    if let Some(store) = store.as_mut() {
        let report = registry
            .load_from(store)
            .with_context(|| format!("load sources from {}", store.path().display()))?;
        for (id, err) in &report.failed {
            eprintln!("{} {}: {}", "skipped".yellow(), id.cyan(), err);
        }
    }

    for raw in &opts.sets {
        let (id, value) = split_assignment(raw)?;
        if !registry.set(id, parse_value(value)) {
            eprintln!("{} could not set '{}'", "warning".yellow(), id);
        }
    }

    let step = Duration::from_millis(opts.tick_ms);
    for _ in 0..opts.ticks {
        if opts.realtime {
            thread::sleep(step);
        } else {
            manual.advance(step.as_secs_f64());
        }
        registry.update_accumulators();
    }

    if let Some(store) = store.as_mut() {
        if let Some(sources) = registry.take_pending_save() {
            store.save(&sources)?;
        }
    }

    print_values(&registry, format);
    Ok(())
}

/// Lets the CLI pick a time source at runtime.
struct BoxedTime(Box<dyn TimeSource>);

impl TimeSource for BoxedTime {
    fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    fn wall_clock(&self) -> chrono::DateTime<chrono::Local> {
        self.0.wall_clock()
    }
}

fn print_values(registry: &ValueRegistry, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            println!("{}", "-".repeat(60));
            for id in registry.get_registered_ids() {
                let Some(def) = registry.get_definition(&id) else {
                    continue;
                };
                println!(
                    "{:>24} {:>10} {}",
                    id.cyan(),
                    format!("{:?}", def.source.kind()).dimmed(),
                    format_value(&def.value)
                );
            }
            println!("{}", "-".repeat(60));
            let stats = registry.get_stats();
            println!(
                "Total: {} values, {} volatile, {} dependency edges",
                stats.total, stats.volatile, stats.dependency_edges
            );
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "values": registry.get_all_values(),
                "stats": registry.get_stats(),
            });
            println!("{}", obj);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Eval {
            expression,
            vars,
            noise_seed,
        } => cmd_eval(&expression, &vars, noise_seed, cli.format),
        Commands::Deps { expression, scene } => cmd_deps(&expression, scene.as_ref(), cli.format),
        Commands::Run {
            scene,
            ticks,
            tick_ms,
            realtime,
            sets,
            watches,
            store,
        } => cmd_run(
            &scene,
            RunOptions {
                ticks,
                tick_ms,
                realtime,
                sets,
                watches,
                store,
            },
            cli.format,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(split_assignment("a.b = 2").unwrap(), ("a.b", "2"));
        assert_eq!(split_assignment("label=x=y").unwrap(), ("label", "x=y"));
        assert!(split_assignment("=3").is_err());
        assert!(split_assignment("nothing").is_err());
    }

    #[test]
    fn set_values_parse_as_json_or_text() {
        assert_eq!(parse_value("2.5"), Value::Number(2.5));
        assert_eq!(parse_value("true"), Value::Boolean(true));
        assert_eq!(parse_value("verse"), Value::String("verse".into()));
    }
}

//! Clock-derived system variables.
//!
//! Expressions can read a fixed set of variables that change without any
//! explicit write: elapsed time, tick delta, frame counter, calendar fields and
//! a non-deterministic `random`. The registry owns a [`Clock`] that advances
//! once per host tick and hands out a [`ClockSnapshot`] for every evaluation.

use chrono::{DateTime, Datelike, Local, TimeDelta, Timelike};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

lazy_static! {
    /// Every name the clock provides. Never treated as a value dependency.
    pub static ref SYSTEM_VARIABLES: HashSet<&'static str> = [
        "time", "now", "delta", "deltaMs", "frame",
        "year", "month", "day", "hour", "minute", "second", "millisecond",
        "dayOfWeek", "dayOfYear",
        "hourFrac", "minuteFrac", "secondFrac",
        "random",
        "PI", "TAU", "E", "PHI",
    ]
    .into_iter()
    .collect();

    /// Subset of [`SYSTEM_VARIABLES`] whose value changes between ticks.
    pub static ref VOLATILE_VARIABLES: HashSet<&'static str> = SYSTEM_VARIABLES
        .iter()
        .copied()
        .filter(|name| !matches!(*name, "PI" | "TAU" | "E" | "PHI"))
        .collect();
}

/// Golden ratio.
pub const PHI: f64 = 1.618_033_988_749_895;

/// Supplies monotonic elapsed time and the local calendar time.
pub trait TimeSource: Send {
    /// Time since the source started. Must never decrease.
    fn elapsed(&self) -> Duration;
    fn wall_clock(&self) -> DateTime<Local>;
}

/// Real time: `Instant` for elapsed time, the local timezone for calendar fields.
pub struct SystemTime {
    start: Instant,
}

impl SystemTime {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTime {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn wall_clock(&self) -> DateTime<Local> {
        Local::now()
    }
}

struct ManualState {
    elapsed: Duration,
    wall_clock: DateTime<Local>,
}

/// Hand-driven time. Clones share the same underlying clock, so a host (or a
/// test) can keep one handle and give another to the registry.
#[derive(Clone)]
pub struct ManualTime {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    pub fn starting_at(wall_clock: DateTime<Local>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                wall_clock,
            })),
        }
    }

    /// Move both elapsed and wall-clock time forward. Negative input is ignored.
    pub fn advance(&self, seconds: f64) {
        if !(seconds > 0.0) {
            return;
        }
        let step = Duration::from_secs_f64(seconds);
        let mut state = self.inner.lock();
        state.elapsed += step;
        if let Ok(delta) = TimeDelta::from_std(step) {
            state.wall_clock += delta;
        }
    }

    pub fn set_wall_clock(&self, wall_clock: DateTime<Local>) {
        self.inner.lock().wall_clock = wall_clock;
    }
}

impl Default for ManualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTime {
    fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }

    fn wall_clock(&self) -> DateTime<Local> {
        self.inner.lock().wall_clock
    }
}

#[derive(Debug, Clone)]
struct LcgRng {
    state: u64,
}

impl LcgRng {
    /// Uniform in [0, 1).
    fn next(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.state >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Values of every system variable at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockSnapshot {
    pub time: f64,
    pub now: f64,
    pub delta: f64,
    pub frame: u64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
    pub day_of_week: u32,
    pub day_of_year: u32,
    pub random: f64,
}

impl ClockSnapshot {
    pub fn hour_frac(&self) -> f64 {
        (self.minute as f64 + self.minute_frac()) / 60.0
    }

    pub fn minute_frac(&self) -> f64 {
        (self.second as f64 + self.second_frac()) / 60.0
    }

    pub fn second_frac(&self) -> f64 {
        self.millisecond as f64 / 1000.0
    }

    /// Look up a system variable by its expression name.
    pub fn get(&self, name: &str) -> Option<f64> {
        Some(match name {
            "time" => self.time,
            "now" => self.now,
            "delta" => self.delta,
            "deltaMs" => self.delta * 1000.0,
            "frame" => self.frame as f64,
            "year" => self.year as f64,
            "month" => self.month as f64,
            "day" => self.day as f64,
            "hour" => self.hour as f64,
            "minute" => self.minute as f64,
            "second" => self.second as f64,
            "millisecond" => self.millisecond as f64,
            "dayOfWeek" => self.day_of_week as f64,
            "dayOfYear" => self.day_of_year as f64,
            "hourFrac" => self.hour_frac(),
            "minuteFrac" => self.minute_frac(),
            "secondFrac" => self.second_frac(),
            "random" => self.random,
            "PI" => std::f64::consts::PI,
            "TAU" => std::f64::consts::TAU,
            "E" => std::f64::consts::E,
            "PHI" => PHI,
            _ => return None,
        })
    }
}

/// Tick bookkeeping on top of a [`TimeSource`].
pub struct Clock {
    source: Box<dyn TimeSource>,
    last_tick: Duration,
    delta: f64,
    frame: u64,
    max_tick_delta: Option<f64>,
    rng: LcgRng,
}

impl Clock {
    pub fn new(source: Box<dyn TimeSource>, random_seed: Option<u64>, max_tick_delta: Option<f64>) -> Self {
        let seed = random_seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x1234_5678_9abc_def0)
        });
        let last_tick = source.elapsed();
        Self {
            source,
            last_tick,
            delta: 0.0,
            frame: 0,
            max_tick_delta,
            rng: LcgRng { state: seed },
        }
    }

    /// Close the current tick: returns seconds elapsed since the previous one
    /// (capped by `max_tick_delta`) and bumps the frame counter.
    pub fn advance(&mut self) -> f64 {
        let now = self.source.elapsed();
        let mut delta = now.saturating_sub(self.last_tick).as_secs_f64();
        if let Some(max) = self.max_tick_delta {
            delta = delta.min(max);
        }
        self.last_tick = now;
        self.delta = delta;
        self.frame += 1;
        delta
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Monotonic milliseconds since the source started.
    pub fn elapsed_ms(&self) -> f64 {
        self.source.elapsed().as_secs_f64() * 1000.0
    }

    /// Read the time source now. Each call draws a fresh `random`.
    pub fn snapshot(&mut self) -> ClockSnapshot {
        let wall = self.source.wall_clock();
        ClockSnapshot {
            time: self.source.elapsed().as_secs_f64(),
            now: wall.timestamp_millis() as f64,
            delta: self.delta,
            frame: self.frame,
            year: wall.year(),
            month: wall.month(),
            day: wall.day(),
            hour: wall.hour(),
            minute: wall.minute(),
            second: wall.second(),
            millisecond: wall.timestamp_subsec_millis().min(999),
            day_of_week: wall.weekday().num_days_from_sunday(),
            day_of_year: wall.ordinal(),
            random: self.rng.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_wall() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 15, 12, 30, 45)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn volatile_excludes_constants() {
        assert!(VOLATILE_VARIABLES.contains("time"));
        assert!(VOLATILE_VARIABLES.contains("random"));
        assert!(VOLATILE_VARIABLES.contains("secondFrac"));
        assert!(!VOLATILE_VARIABLES.contains("PI"));
        assert!(SYSTEM_VARIABLES.contains("PHI"));
    }

    #[test]
    fn advance_reports_delta_and_frame() {
        let time = ManualTime::starting_at(fixed_wall());
        let mut clock = Clock::new(Box::new(time.clone()), Some(1), None);

        time.advance(0.25);
        assert!((clock.advance() - 0.25).abs() < 1e-9);
        assert_eq!(clock.frame(), 1);

        time.advance(0.5);
        assert!((clock.advance() - 0.5).abs() < 1e-9);
        assert_eq!(clock.frame(), 2);

        let snap = clock.snapshot();
        assert!((snap.time - 0.75).abs() < 1e-9);
        assert!((snap.get("deltaMs").unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn max_tick_delta_caps_long_stalls() {
        let time = ManualTime::new();
        let mut clock = Clock::new(Box::new(time.clone()), Some(1), Some(0.1));
        time.advance(5.0);
        assert!((clock.advance() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn calendar_fields_follow_wall_clock() {
        let time = ManualTime::starting_at(fixed_wall());
        let mut clock = Clock::new(Box::new(time), Some(1), None);
        let snap = clock.snapshot();
        assert_eq!(snap.year, 2024);
        assert_eq!(snap.month, 3);
        assert_eq!(snap.day, 15);
        assert_eq!(snap.hour, 12);
        assert_eq!(snap.minute, 30);
        assert_eq!(snap.second, 45);
        // 2024-03-15 is a Friday.
        assert_eq!(snap.day_of_week, 5);
        assert_eq!(snap.day_of_year, 31 + 29 + 15);
        assert!((snap.hour_frac() - 30.75 / 60.0).abs() < 1e-9);
        assert!((snap.minute_frac() - 0.75).abs() < 1e-9);
        assert_eq!(snap.second_frac(), 0.0);
    }

    #[test]
    fn random_is_fresh_per_snapshot_and_in_unit_range() {
        let mut clock = Clock::new(Box::new(ManualTime::new()), Some(42), None);
        let a = clock.snapshot().random;
        let b = clock.snapshot().random;
        assert_ne!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert!((0.0..1.0).contains(&b));
    }

    #[test]
    fn constants_resolve() {
        let snap = ClockSnapshot::default();
        assert_eq!(snap.get("TAU"), Some(std::f64::consts::TAU));
        assert_eq!(snap.get("PHI"), Some(PHI));
        assert_eq!(snap.get("unknown"), None);
    }
}

//! Performance counters attached to state nodes
//!
//! A counter keeps a raw value (and, for ratios, a base value) that producers
//! mutate with atomic operations. `update()` samples the raw source and is the
//! only operation that changes the exposed counter value:
//!
//! | Type          | Counter value                                   |
//! |---------------|-------------------------------------------------|
//! | `Count`       | raw                                             |
//! | `Rate`        | Δraw / Δseconds since the previous update       |
//! | `Average`     | Δraw / Δbase since the previous update          |
//! | `Delta`       | Δraw since the previous update                  |
//! | `Percent`     | Δraw / Δbase × 100                              |
//! | `ElapsedTime` | seconds since the raw timestamp (unix millis)   |
//!
//! Counters backed by a value function or a system metric are read-only.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use super::error::CounterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterType {
    Count,
    Rate,
    Average,
    Delta,
    Percent,
    ElapsedTime,
    StringValue,
}

impl CounterType {
    fn has_base(self) -> bool {
        matches!(self, CounterType::Average | CounterType::Percent)
    }
}

/// Operating-system metrics exposed as read-only counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemCounter {
    /// Global CPU usage in percent; the first sample reads 0
    CpuUsage,
    MemoryUsed,
    MemoryTotal,
    /// Used memory in percent of total
    MemoryUsage,
    SwapUsed,
    /// System uptime in seconds
    Uptime,
}

impl SystemCounter {
    fn read(self, sys: &mut System) -> f64 {
        match self {
            SystemCounter::CpuUsage => {
                sys.refresh_cpu_usage();
                sys.global_cpu_usage() as f64
            }
            SystemCounter::MemoryUsed => {
                sys.refresh_memory();
                sys.used_memory() as f64
            }
            SystemCounter::MemoryTotal => {
                sys.refresh_memory();
                sys.total_memory() as f64
            }
            SystemCounter::MemoryUsage => {
                sys.refresh_memory();
                match sys.total_memory() {
                    0 => 0.0,
                    total => sys.used_memory() as f64 / total as f64 * 100.0,
                }
            }
            SystemCounter::SwapUsed => {
                sys.refresh_memory();
                sys.used_swap() as f64
            }
            SystemCounter::Uptime => System::uptime() as f64,
        }
    }

    /// Counter type the raw reading is interpreted with
    pub fn counter_type(self) -> CounterType {
        CounterType::Count
    }
}

type ValueFn = Box<dyn Fn() -> f64 + Send + Sync>;

/// Where a numeric counter reads its raw value from
pub enum CounterSource {
    /// Raw and base values are set through the counter's mutators
    Manual,

    /// Raw value (and optional base) read from closures on every update
    Function {
        value: ValueFn,
        base: Option<ValueFn>,
    },

    System(SystemCounter),
}

impl CounterSource {
    pub fn function(value: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        CounterSource::Function {
            value: Box::new(value),
            base: None,
        }
    }

    pub fn ratio(
        value: impl Fn() -> f64 + Send + Sync + 'static,
        base: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        CounterSource::Function {
            value: Box::new(value),
            base: Some(Box::new(base)),
        }
    }
}

impl fmt::Debug for CounterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterSource::Manual => f.write_str("Manual"),
            CounterSource::Function { base, .. } => f
                .debug_struct("Function")
                .field("has_base", &base.is_some())
                .finish(),
            CounterSource::System(kind) => f.debug_tuple("System").field(kind).finish(),
        }
    }
}

enum Source {
    Manual,
    Function {
        value: ValueFn,
        base: Option<ValueFn>,
    },
    System {
        kind: SystemCounter,
        sys: Mutex<System>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    raw: f64,
    base: f64,
    at: Instant,
}

/// Numeric performance counter
pub struct NumericCounter {
    name: String,
    kind: CounterType,
    source: Source,
    raw: AtomicI64,
    base: AtomicI64,
    value: AtomicU64,
    last: Mutex<Sample>,
}

impl fmt::Debug for NumericCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumericCounter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("readonly", &self.is_readonly())
            .field("value", &self.counter_value())
            .finish()
    }
}

impl NumericCounter {
    pub fn new(
        name: impl Into<String>,
        kind: CounterType,
        source: CounterSource,
    ) -> Result<Self, CounterError> {
        let name = name.into();
        if kind == CounterType::StringValue {
            return Err(CounterError::UnsupportedOperation {
                counter: name,
                operation: "string values on a numeric counter",
            });
        }

        let source = match source {
            CounterSource::Manual => Source::Manual,
            CounterSource::Function { value, base } => Source::Function { value, base },
            CounterSource::System(kind) => Source::System {
                kind,
                sys: Mutex::new(System::new()),
            },
        };

        Ok(Self {
            name,
            kind,
            source,
            raw: AtomicI64::new(0),
            base: AtomicI64::new(0),
            value: AtomicU64::new(0f64.to_bits()),
            last: Mutex::new(Sample {
                raw: 0.0,
                base: 0.0,
                at: Instant::now(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counter_type(&self) -> CounterType {
        self.kind
    }

    pub fn is_readonly(&self) -> bool {
        !matches!(self.source, Source::Manual)
    }

    fn writable(&self) -> Result<(), CounterError> {
        if self.is_readonly() {
            return Err(CounterError::ReadonlyViolation(self.name.clone()));
        }
        Ok(())
    }

    fn base_writable(&self, operation: &'static str) -> Result<(), CounterError> {
        self.writable()?;
        if !self.kind.has_base() {
            return Err(CounterError::UnsupportedOperation {
                counter: self.name.clone(),
                operation,
            });
        }
        Ok(())
    }

    pub fn increment(&self) -> Result<i64, CounterError> {
        self.increment_by(1)
    }

    pub fn decrement(&self) -> Result<i64, CounterError> {
        self.increment_by(-1)
    }

    pub fn increment_by(&self, value: i64) -> Result<i64, CounterError> {
        self.writable()?;
        Ok(self.raw.fetch_add(value, Ordering::AcqRel) + value)
    }

    pub fn set_raw_value(&self, value: i64) -> Result<(), CounterError> {
        self.writable()?;
        self.raw.store(value, Ordering::Release);
        Ok(())
    }

    /// Store a timestamp as the raw value, for `ElapsedTime` counters
    pub fn set_raw_time(&self, time: DateTime<Utc>) -> Result<(), CounterError> {
        self.set_raw_value(time.timestamp_millis())
    }

    pub fn increment_base(&self) -> Result<i64, CounterError> {
        self.increment_base_by(1)
    }

    pub fn increment_base_by(&self, value: i64) -> Result<i64, CounterError> {
        self.base_writable("base increments")?;
        Ok(self.base.fetch_add(value, Ordering::AcqRel) + value)
    }

    pub fn set_base_raw_value(&self, value: i64) -> Result<(), CounterError> {
        self.base_writable("base values")?;
        self.base.store(value, Ordering::Release);
        Ok(())
    }

    /// Current raw reading of the source
    pub fn raw_value(&self) -> f64 {
        match &self.source {
            Source::Manual => self.raw.load(Ordering::Acquire) as f64,
            Source::Function { value, .. } => value(),
            Source::System { kind, sys } => kind.read(&mut sys.lock()),
        }
    }

    pub fn base_raw_value(&self) -> f64 {
        match &self.source {
            Source::Function { base: Some(base), .. } => base(),
            Source::Function { base: None, .. } | Source::System { .. } => 0.0,
            Source::Manual => self.base.load(Ordering::Acquire) as f64,
        }
    }

    /// Value computed by the last [`update`](Self::update)
    pub fn counter_value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }

    /// Sample the source and recompute the counter value
    pub fn update(&self) -> f64 {
        let raw = self.raw_value();
        let base = if self.kind.has_base() {
            self.base_raw_value()
        } else {
            0.0
        };

        let mut last = self.last.lock();
        let now = Instant::now();

        let value = match self.kind {
            CounterType::Count => raw,
            CounterType::Rate => {
                let elapsed = now.duration_since(last.at).as_secs_f64();
                if elapsed > 0.0 {
                    (raw - last.raw) / elapsed
                } else {
                    0.0
                }
            }
            CounterType::Average | CounterType::Percent => {
                let base_delta = base - last.base;
                let ratio = if base_delta != 0.0 {
                    (raw - last.raw) / base_delta
                } else {
                    0.0
                };
                if self.kind == CounterType::Percent {
                    ratio * 100.0
                } else {
                    ratio
                }
            }
            CounterType::Delta => raw - last.raw,
            CounterType::ElapsedTime => {
                if raw > 0.0 {
                    (Utc::now().timestamp_millis() as f64 - raw) / 1000.0
                } else {
                    0.0
                }
            }
            CounterType::StringValue => 0.0,
        };

        *last = Sample { raw, base, at: now };
        self.value.store(value.to_bits(), Ordering::Release);
        value
    }
}

type TextFn = Box<dyn Fn() -> String + Send + Sync>;

/// Where a string counter reads its value from
pub enum StringSource {
    /// Mutable text set through [`StringCounter::set_value`]
    Literal(String),

    /// Fixed text captured when the counter is attached
    Snapshot(String),

    Function(TextFn),
}

impl StringSource {
    pub fn function(value: impl Fn() -> String + Send + Sync + 'static) -> Self {
        StringSource::Function(Box::new(value))
    }
}

enum TextSource {
    Literal(Mutex<String>),
    Snapshot(String),
    Function(TextFn),
}

/// Performance counter holding a string value
pub struct StringCounter {
    name: String,
    source: TextSource,
    value: Mutex<String>,
}

impl fmt::Debug for StringCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringCounter")
            .field("name", &self.name)
            .field("readonly", &self.is_readonly())
            .field("value", &*self.value.lock())
            .finish()
    }
}

impl StringCounter {
    pub fn new(name: impl Into<String>, source: StringSource) -> Self {
        let source = match source {
            StringSource::Literal(text) => TextSource::Literal(Mutex::new(text)),
            StringSource::Snapshot(text) => TextSource::Snapshot(text),
            StringSource::Function(f) => TextSource::Function(f),
        };
        Self {
            name: name.into(),
            source,
            value: Mutex::new(String::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_readonly(&self) -> bool {
        !matches!(self.source, TextSource::Literal(_))
    }

    pub fn set_value(&self, value: impl Into<String>) -> Result<(), CounterError> {
        match &self.source {
            TextSource::Literal(raw) => {
                *raw.lock() = value.into();
                Ok(())
            }
            _ => Err(CounterError::ReadonlyViolation(self.name.clone())),
        }
    }

    pub fn raw_value(&self) -> String {
        match &self.source {
            TextSource::Literal(raw) => raw.lock().clone(),
            TextSource::Snapshot(text) => text.clone(),
            TextSource::Function(f) => f(),
        }
    }

    pub fn counter_value(&self) -> String {
        self.value.lock().clone()
    }

    pub fn update(&self) -> String {
        let raw = self.raw_value();
        *self.value.lock() = raw.clone();
        raw
    }
}

/// A counter as held by a state node
#[derive(Debug, Clone)]
pub enum Counter {
    Numeric(Arc<NumericCounter>),
    Text(Arc<StringCounter>),
}

impl Counter {
    pub fn name(&self) -> &str {
        match self {
            Counter::Numeric(counter) => counter.name(),
            Counter::Text(counter) => counter.name(),
        }
    }

    pub fn counter_type(&self) -> CounterType {
        match self {
            Counter::Numeric(counter) => counter.counter_type(),
            Counter::Text(_) => CounterType::StringValue,
        }
    }

    pub fn update(&self) {
        match self {
            Counter::Numeric(counter) => {
                counter.update();
            }
            Counter::Text(counter) => {
                counter.update();
            }
        }
    }

    pub fn value(&self) -> CounterValue {
        match self {
            Counter::Numeric(counter) => CounterValue::Number(counter.counter_value()),
            Counter::Text(counter) => CounterValue::Text(counter.counter_value()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CounterValue {
    Number(f64),
    Text(String),
}

/// Point-in-time reading of one attached counter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSample {
    /// Component path of the owning node
    pub path: String,
    pub name: String,
    pub kind: CounterType,
    pub value: CounterValue,
}

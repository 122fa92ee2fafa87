use chrono::{DateTime, Utc};
use log::kv::{self, Key, Value, VisitSource};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Max number of formatted fragments held while waiting for a flush.
pub const DEFAULT_MAX_QUEUED: usize = 1000;

/// Log severity, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
    Fatal,
    Panic,
}

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
        Severity::Panic,
    ];

    /// Every severity at or above `min`.
    pub fn at_least(min: Severity) -> Vec<Severity> {
        Self::ALL.iter().copied().filter(|s| *s >= min).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
            Severity::Panic => "panic",
        }
    }

    /// Closest `log` level; fatal and panic collapse into `Error`.
    pub fn to_log_level(self) -> log::Level {
        match self {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error | Severity::Fatal | Severity::Panic => log::Level::Error,
        }
    }
}

impl From<log::Level> for Severity {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Severity::Trace,
            log::Level::Debug => Severity::Debug,
            log::Level::Info => Severity::Info,
            log::Level::Warn => Severity::Warn,
            log::Level::Error => Severity::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            "panic" => Ok(Severity::Panic),
            other => Err(format!("Invalid log level: {}", other)),
        }
    }
}

/// A single structured log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Severity,
    pub message: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Captures the formatted message and key-values of a `log` record.
    pub fn from_record(record: &log::Record<'_>) -> Self {
        let mut entry = Self::new(record.level().into(), record.args().to_string());
        let mut collector = FieldCollector(&mut entry.fields);
        // A failing source only loses the remaining fields.
        let _ = record.key_values().visit(&mut collector);
        entry
    }
}

struct FieldCollector<'a>(&'a mut BTreeMap<String, serde_json::Value>);

impl<'kvs> VisitSource<'kvs> for FieldCollector<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        self.0.insert(key.to_string(), kv_to_json(&value));
        Ok(())
    }
}

fn kv_to_json(value: &Value<'_>) -> serde_json::Value {
    if let Some(b) = value.to_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(i) = value.to_i64() {
        i.into()
    } else if let Some(u) = value.to_u64() {
        u.into()
    } else if let Some(n) = value.to_f64().and_then(serde_json::Number::from_f64) {
        serde_json::Value::Number(n)
    } else {
        serde_json::Value::String(value.to_string())
    }
}

/// Formatted fragments waiting for the next flush, oldest first.
#[derive(Debug)]
pub struct PendingBatch {
    fragments: VecDeque<String>,
    max_size: usize,
}

impl PendingBatch {
    pub fn new(max_size: usize) -> Self {
        Self {
            fragments: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Appends a fragment, returning how many old fragments were dropped.
    pub fn push(&mut self, fragment: String) -> usize {
        self.fragments.push_back(fragment);
        self.truncate_oldest()
    }

    /// Removes everything for a send attempt.
    pub fn take(&mut self) -> Vec<String> {
        self.fragments.drain(..).collect()
    }

    /// Puts back fragments from a failed send in front of newer ones.
    /// Returns how many fragments the size cap dropped.
    pub fn restore(&mut self, fragments: Vec<String>) -> usize {
        for fragment in fragments.into_iter().rev() {
            self.fragments.push_front(fragment);
        }
        self.truncate_oldest()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().map(String::as_str)
    }

    fn truncate_oldest(&mut self) -> usize {
        let excess = self.fragments.len().saturating_sub(self.max_size);
        self.fragments.drain(..excess);
        excess
    }
}

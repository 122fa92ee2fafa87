//! The batching log hook.
//!
//! [`MatrixHook`] formats every accepted entry on the caller's thread and
//! appends it to an in-memory batch. A background task owned by the hook
//! sends the batch to the room as one HTML message every period. Logging
//! calls never wait on the network, and a failed send keeps the batch for the
//! next tick.

use crate::client::MessagingClient;
use crate::dispatcher::{self, DispatcherHandle, FlushOutcome, Outbox, StatsSnapshot};
use crate::error::{ClientError, HookError};
use crate::formatter::{Formatter, HtmlFormatter};
use crate::types::{LogEntry, Severity, DEFAULT_MAX_QUEUED};
use log::{info, LevelFilter, Metadata, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Batch period used when the configured one is below one second.
pub const DEFAULT_BATCH_PERIOD_SECS: u64 = 15;

/// Targets whose records never reach the room. The transport logs while it
/// sends, which would otherwise feed every flush back into the next batch.
const DEFAULT_IGNORED_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
];

pub struct MatrixHookBuilder {
    client: Option<Arc<dyn MessagingClient>>,
    room_id: String,
    levels: Option<Vec<Severity>>,
    batch_period_secs: i64,
    max_queued: usize,
    ignored_targets: Vec<String>,
    formatter: Box<dyn Formatter>,
}

impl Default for MatrixHookBuilder {
    fn default() -> Self {
        Self {
            client: None,
            room_id: String::new(),
            levels: None,
            batch_period_secs: 0,
            max_queued: DEFAULT_MAX_QUEUED,
            ignored_targets: DEFAULT_IGNORED_TARGETS.iter().map(|t| t.to_string()).collect(),
            formatter: Box::new(HtmlFormatter::new()),
        }
    }
}

impl MatrixHookBuilder {
    pub fn client(self, client: impl MessagingClient + 'static) -> Self {
        self.shared_client(Arc::new(client))
    }

    pub fn shared_client(mut self, client: Arc<dyn MessagingClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    /// Accept `min` and everything more severe.
    pub fn level(mut self, min: Severity) -> Self {
        self.levels = Some(Severity::at_least(min));
        self
    }

    /// Accept exactly these severities.
    pub fn levels(mut self, levels: impl IntoIterator<Item = Severity>) -> Self {
        let mut levels: Vec<Severity> = levels.into_iter().collect();
        levels.sort();
        levels.dedup();
        self.levels = Some(levels);
        self
    }

    /// Seconds between flushes; values below 1 fall back to the default.
    pub fn batch_period(mut self, secs: i64) -> Self {
        self.batch_period_secs = secs;
        self
    }

    pub fn max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued = max;
        self
    }

    /// Drop records whose target is `prefix` or one of its submodules.
    pub fn ignore_target(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_targets.push(prefix.into());
        self
    }

    pub fn formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Validates the configuration and starts the flush task on the current
    /// Tokio runtime.
    pub fn build(self) -> Result<MatrixHook, HookError> {
        let client = self.client.ok_or(HookError::MissingClient)?;
        let room_id = self.room_id.trim().to_string();
        if room_id.is_empty() {
            return Err(HookError::MissingRoomId);
        }
        let runtime = Handle::try_current().map_err(|_| HookError::NoRuntime)?;

        let period = effective_period(self.batch_period_secs);
        let outbox = Arc::new(Outbox::new(client, room_id, self.max_queued));
        let dispatcher = dispatcher::spawn(Arc::clone(&outbox), period, &runtime);

        info!(
            "Logging to room {} every {}s",
            outbox.room_id(),
            period.as_secs()
        );

        Ok(MatrixHook {
            outbox,
            levels: self.levels,
            ignored_targets: self.ignored_targets,
            formatter: self.formatter,
            period,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }
}

fn effective_period(secs: i64) -> Duration {
    if secs < 1 {
        Duration::from_secs(DEFAULT_BATCH_PERIOD_SECS)
    } else {
        Duration::from_secs(secs as u64)
    }
}

pub struct MatrixHook {
    outbox: Arc<Outbox>,
    levels: Option<Vec<Severity>>,
    ignored_targets: Vec<String>,
    formatter: Box<dyn Formatter>,
    period: Duration,
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl MatrixHook {
    pub fn builder() -> MatrixHookBuilder {
        MatrixHookBuilder::default()
    }

    /// Hook sending entries at `level` or above to `room_id` every
    /// `batch_period_secs` seconds.
    pub fn new(
        client: Option<Arc<dyn MessagingClient>>,
        room_id: &str,
        level: Severity,
        batch_period_secs: i64,
    ) -> Result<Self, HookError> {
        let builder = Self::builder()
            .room_id(room_id)
            .level(level)
            .batch_period(batch_period_secs);
        match client {
            Some(client) => builder.shared_client(client).build(),
            None => Err(HookError::MissingClient),
        }
    }

    /// Severities this hook receives.
    pub fn levels(&self) -> &[Severity] {
        self.levels.as_deref().unwrap_or(&Severity::ALL)
    }

    pub fn accepts(&self, level: Severity) -> bool {
        self.levels().contains(&level)
    }

    /// Most verbose `log` level any accepted severity maps to.
    pub fn max_level(&self) -> LevelFilter {
        self.levels()
            .iter()
            .min()
            .map(|s| s.to_log_level().to_level_filter())
            .unwrap_or(LevelFilter::Off)
    }

    pub fn room_id(&self) -> &str {
        self.outbox.room_id()
    }

    pub fn batch_period(&self) -> Duration {
        self.period
    }

    /// Queues an entry for the next flush and reports whether it was queued.
    /// Entries at unaccepted severities, or that format to nothing, are
    /// dropped without error.
    pub fn fire(&self, entry: &LogEntry) -> bool {
        if !self.accepts(entry.level) {
            return false;
        }

        match self.formatter.format(entry) {
            Ok(html) if !html.is_empty() => {
                self.outbox.push(html);
                true
            }
            _ => {
                self.outbox.stats().record_dropped();
                false
            }
        }
    }

    /// Sends the pending batch now.
    pub async fn flush(&self) -> Result<FlushOutcome, ClientError> {
        self.outbox.flush().await
    }

    /// Formatted fragments waiting for the next flush.
    pub fn pending(&self) -> Vec<String> {
        self.outbox.pending()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.outbox.stats().snapshot()
    }

    /// Stops the periodic flush and sends whatever is still pending.
    /// Calling it again does nothing.
    pub async fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown().await;
        }
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|prefix| {
            target
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl log::Log for MatrixHook {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.accepts(metadata.level().into()) && !self.is_ignored(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.fire(&LogEntry::from_record(record));
        }
    }

    fn flush(&self) {
        if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
            dispatcher.request_flush();
        }
    }
}

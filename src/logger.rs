//! Global logger wiring: console output and the room hook side by side.

use crate::hook::MatrixHook;
use crate::types::{LogEntry, Severity};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use simple_logger::SimpleLogger;
use std::panic;
use std::sync::Arc;

/// Sends each record to the console and to the hook, each applying its own
/// level filter.
pub struct TeeLogger {
    console: SimpleLogger,
    hook: Arc<MatrixHook>,
}

impl TeeLogger {
    pub fn new(console: SimpleLogger, hook: Arc<MatrixHook>) -> Self {
        Self { console, hook }
    }

    pub fn max_level(&self) -> LevelFilter {
        self.console.max_level().max(self.hook.max_level())
    }
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.console.enabled(metadata) || self.hook.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.enabled(record.metadata()) {
            self.console.log(record);
        }
        self.hook.log(record);
    }

    fn flush(&self) {
        self.console.flush();
        Log::flush(self.hook.as_ref());
    }
}

/// Installs a [`TeeLogger`] as the global logger. `RUST_LOG` overrides
/// `console_level` for the console side.
pub fn init(console_level: LevelFilter, hook: Arc<MatrixHook>) -> Result<(), SetLoggerError> {
    let console = SimpleLogger::new().with_level(console_level).env();
    let logger = TeeLogger::new(console, hook);
    let max_level = logger.max_level();
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Forwards panics to the hook at [`Severity::Panic`] before running the
/// previously installed panic hook.
pub fn install_panic_hook(hook: Arc<MatrixHook>) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());

        let mut entry = LogEntry::new(Severity::Panic, message);
        if let Some(location) = info.location() {
            entry = entry.with_field(
                "location",
                format!("{}:{}", location.file(), location.line()),
            );
        }
        hook.fire(&entry);

        previous(info);
    }));
}

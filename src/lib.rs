//! Batches `log` records into colored HTML messages and posts them to a
//! Matrix room on a fixed period.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod formatter;
pub mod hook;
pub mod ingest;
pub mod logger;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{HtmlMessage, MatrixHttpClient, MessagingClient};
pub use dispatcher::{FlushOutcome, StatsSnapshot};
pub use error::{ClientError, FormatError, HookError};
pub use formatter::{Formatter, HtmlFormatter};
pub use hook::{MatrixHook, MatrixHookBuilder};
pub use types::{LogEntry, Severity};

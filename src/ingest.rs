use crate::hook::MatrixHook;
use crate::types::{LogEntry, Severity};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::thread;
use tokio::sync::mpsc;

const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Shape of incoming log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// `[LEVEL] message`, the prefix being optional
    #[default]
    Plain,
    /// One logrus-style JSON object per line
    Json,
}

/// Turns one line into an entry; blank lines yield nothing.
pub fn parse_line(line: &str, format: LineFormat) -> Option<LogEntry> {
    let line = line.trim_end();
    if line.trim_start().is_empty() {
        return None;
    }

    match format {
        LineFormat::Plain => Some(parse_plain(line)),
        LineFormat::Json => Some(parse_json(line).unwrap_or_else(|| parse_plain(line))),
    }
}

fn parse_plain(line: &str) -> LogEntry {
    let tagged = line
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .and_then(|(tag, message)| {
            tag.parse::<Severity>()
                .ok()
                .map(|level| (level, message.trim_start()))
        });

    match tagged {
        Some((level, message)) => LogEntry::new(level, message),
        None => LogEntry::new(Severity::Info, line),
    }
}

fn parse_json(line: &str) -> Option<LogEntry> {
    let mut object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line).ok()?;

    let level = object
        .remove("level")
        .and_then(|v| v.as_str().and_then(|s| s.parse::<Severity>().ok()))
        .unwrap_or(Severity::Info);
    let message = match object.remove("msg") {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    object.remove("time");

    let mut entry = LogEntry::new(level, message);
    entry.fields = object.into_iter().collect::<BTreeMap<_, _>>();
    Some(entry)
}

/// Reads lines on a dedicated OS thread. A read blocked there never holds up
/// runtime shutdown. The channel closes at EOF or on the first read error.
pub fn spawn_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read log line: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Fires every parsed line into `hook` until the channel closes.
/// Returns the number of entries the hook queued.
pub async fn pipe(mut lines: mpsc::Receiver<String>, format: LineFormat, hook: &MatrixHook) -> usize {
    let mut queued = 0;

    while let Some(line) = lines.recv().await {
        if let Some(entry) = parse_line(&line, format) {
            if hook.fire(&entry) {
                queued += 1;
            }
        }
    }

    debug!("Input closed after {} queued entries", queued);
    queued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingClient;
    use std::sync::Arc;

    #[test]
    fn plain_lines_with_level_prefix() {
        let entry = parse_line("[WARN] disk almost full\n", LineFormat::Plain).unwrap();
        assert_eq!(entry.level, Severity::Warn);
        assert_eq!(entry.message, "disk almost full");

        let entry = parse_line("[fatal]out of memory", LineFormat::Plain).unwrap();
        assert_eq!(entry.level, Severity::Fatal);
        assert_eq!(entry.message, "out of memory");
    }

    #[test]
    fn plain_lines_without_known_prefix_are_info() {
        let entry = parse_line("[worker-3] started", LineFormat::Plain).unwrap();
        assert_eq!(entry.level, Severity::Info);
        assert_eq!(entry.message, "[worker-3] started");

        assert!(parse_line("   \r\n", LineFormat::Plain).is_none());
    }

    #[test]
    fn json_lines_split_fields() {
        let line = r#"{"level":"error","msg":"boom","time":"2017-01-01T00:00:00Z","code":42,"user":"bob"}"#;
        let entry = parse_line(line, LineFormat::Json).unwrap();

        assert_eq!(entry.level, Severity::Error);
        assert_eq!(entry.message, "boom");
        assert_eq!(entry.fields.len(), 2);
        assert_eq!(entry.fields["code"], serde_json::json!(42));
        assert_eq!(entry.fields["user"], serde_json::json!("bob"));
    }

    #[test]
    fn json_format_falls_back_to_plain() {
        let entry = parse_line("[ERROR] not json", LineFormat::Json).unwrap();
        assert_eq!(entry.level, Severity::Error);
        assert_eq!(entry.message, "not json");

        let entry = parse_line("[1, 2]", LineFormat::Json).unwrap();
        assert_eq!(entry.message, "[1, 2]");
    }

    #[tokio::test]
    async fn pipe_counts_only_queued_entries() {
        let client = Arc::new(RecordingClient::new());
        let hook = MatrixHook::builder()
            .shared_client(client.clone())
            .room_id("!r:x")
            .level(Severity::Info)
            .build()
            .unwrap();

        let input = std::io::Cursor::new(b"[INFO] started\n\n[DEBUG] hidden\n[ERROR]   \n[ERROR] boom\n".to_vec());
        let queued = pipe(spawn_reader(input), LineFormat::Plain, &hook).await;

        assert_eq!(queued, 2);
        assert_eq!(hook.stats().queued, 2);
        assert_eq!(
            hook.pending(),
            vec![
                r#"<font color="green">started</font>"#,
                r#"<font color="red">boom</font>"#,
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn blocked_reader_does_not_hold_up_runtime_shutdown() {
        use std::io::Write;
        use std::time::{Duration, Instant};

        let (mut writer, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let first = runtime.block_on(async {
            let mut lines = spawn_reader(std::io::BufReader::new(reader));
            writer.write_all(b"[WARN] first\n").unwrap();
            lines.recv().await
        });
        assert_eq!(first.as_deref(), Some("[WARN] first"));

        // The writer is still open, so the reader thread sits in a blocking read.
        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(1));

        drop(writer);
    }
}

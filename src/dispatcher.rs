use crate::client::{HtmlMessage, MessagingClient, ROOM_MESSAGE_EVENT, TEXT_MSGTYPE};
use crate::error::ClientError;
use crate::formatter::to_plain_text;
use crate::types::PendingBatch;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Separates fragments in the HTML body of a flushed message.
pub const LINE_BREAK: &str = "<br/>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    Sent { fragments: usize, event_id: String },
}

#[derive(Debug, Default)]
pub struct HookStats {
    queued: AtomicU64,
    dropped: AtomicU64,
    truncated: AtomicU64,
    messages_sent: AtomicU64,
    flushes_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Fragments appended to the batch.
    pub queued: u64,
    /// Entries the formatter rejected.
    pub dropped: u64,
    /// Fragments discarded by the batch size cap.
    pub truncated: u64,
    pub messages_sent: u64,
    pub flushes_failed: u64,
}

impl HookStats {
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
        }
    }
}

/// Pending fragments plus everything needed to send them to one room.
pub struct Outbox {
    client: Arc<dyn MessagingClient>,
    room_id: String,
    batch: parking_lot::Mutex<PendingBatch>,
    send_lock: Mutex<()>,
    stats: HookStats,
}

impl Outbox {
    pub fn new(client: Arc<dyn MessagingClient>, room_id: String, max_queued: usize) -> Self {
        Self {
            client,
            room_id,
            batch: parking_lot::Mutex::new(PendingBatch::new(max_queued)),
            send_lock: Mutex::new(()),
            stats: HookStats::default(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn stats(&self) -> &HookStats {
        &self.stats
    }

    pub fn push(&self, fragment: String) {
        let truncated = self.batch.lock().push(fragment);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        if truncated > 0 {
            self.stats.truncated.fetch_add(truncated as u64, Ordering::Relaxed);
        }
    }

    pub fn pending(&self) -> Vec<String> {
        self.batch.lock().iter().map(str::to_string).collect()
    }

    /// Sends everything pending as one message. On failure the fragments go
    /// back to the front of the batch and the error is returned.
    pub async fn flush(&self) -> Result<FlushOutcome, ClientError> {
        let _sending = self.send_lock.lock().await;

        let fragments = {
            let mut batch = self.batch.lock();
            if batch.is_empty() {
                return Ok(FlushOutcome::Idle);
            }
            batch.take()
        };

        let html = fragments.join(LINE_BREAK);
        let text = fragments
            .iter()
            .map(|f| to_plain_text(f))
            .collect::<Vec<_>>()
            .join("\n");
        let message = HtmlMessage::new(TEXT_MSGTYPE, html).with_body(text);

        match self
            .client
            .send_message_event(&self.room_id, ROOM_MESSAGE_EVENT, &message)
            .await
        {
            Ok(event_id) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(FlushOutcome::Sent {
                    fragments: fragments.len(),
                    event_id,
                })
            }
            Err(e) => {
                self.stats.flushes_failed.fetch_add(1, Ordering::Relaxed);
                let truncated = self.batch.lock().restore(fragments);
                if truncated > 0 {
                    self.stats.truncated.fetch_add(truncated as u64, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }
}

/// Controls the periodic flush task.
pub struct DispatcherHandle {
    shutdown_tx: oneshot::Sender<()>,
    flush_now: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Asks the task to flush without waiting for the next tick.
    pub fn request_flush(&self) {
        self.flush_now.notify_one();
    }

    /// Stops the ticker and waits for the final drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Flush task ended abnormally: {}", e);
        }
    }
}

pub fn spawn(outbox: Arc<Outbox>, period: Duration, runtime: &Handle) -> DispatcherHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let flush_now = Arc::new(Notify::new());
    let task = runtime.spawn(run(outbox, period, shutdown_rx, Arc::clone(&flush_now)));

    DispatcherHandle {
        shutdown_tx,
        flush_now,
        task,
    }
}

async fn run(
    outbox: Arc<Outbox>,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
    flush_now: Arc<Notify>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = flush_now.notified() => {
                debug!("Flush requested");
            }
            // A dropped sender means the hook is gone; drain either way.
            _ = &mut shutdown_rx => {
                info!("Flush task stopping, draining pending log lines");
                flush_and_report(&outbox).await;
                return;
            }
        }

        flush_and_report(&outbox).await;
    }
}

async fn flush_and_report(outbox: &Outbox) {
    match outbox.flush().await {
        Ok(FlushOutcome::Idle) => {}
        Ok(FlushOutcome::Sent { fragments, event_id }) => {
            debug!(
                "Sent {} log lines to {} as {}",
                fragments,
                outbox.room_id(),
                event_id
            );
        }
        Err(e) => {
            // Lines stay in the batch for the next tick
            warn!("Sending log lines to {} failed: {}", outbox.room_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingClient;

    fn outbox(client: &Arc<RecordingClient>) -> Outbox {
        Outbox::new(client.clone(), "!logs:example.org".to_string(), 1000)
    }

    #[tokio::test]
    async fn flush_sends_fragments_in_fire_order() {
        let client = Arc::new(RecordingClient::new());
        let outbox = outbox(&client);
        outbox.push(r#"<font color="green">started</font>"#.to_string());
        outbox.push(r#"<font color="red">[code=42] - boom</font>"#.to_string());

        let outcome = outbox.flush().await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Sent {
                fragments: 2,
                event_id: "$event1".to_string()
            }
        );
        assert!(outbox.pending().is_empty());

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].room_id, "!logs:example.org");
        assert_eq!(sent[0].event_type, "m.room.message");
        assert_eq!(sent[0].content.msgtype, "m.text");
        assert_eq!(
            sent[0].content.formatted_body,
            r#"<font color="green">started</font><br/><font color="red">[code=42] - boom</font>"#
        );
        assert_eq!(sent[0].content.body, "started\n[code=42] - boom");
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let client = Arc::new(RecordingClient::new());
        let outbox = outbox(&client);

        assert_eq!(outbox.flush().await.unwrap(), FlushOutcome::Idle);
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_flush_keeps_batch_intact() {
        let client = Arc::new(RecordingClient::new());
        let outbox = outbox(&client);
        outbox.push("a".to_string());
        outbox.push("b".to_string());
        let before = outbox.pending();

        client.set_failing(true);
        assert!(outbox.flush().await.is_err());
        assert_eq!(outbox.pending(), before);
        assert_eq!(outbox.stats().snapshot().flushes_failed, 1);

        outbox.push("c".to_string());
        client.set_failing(false);
        outbox.flush().await.unwrap();

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content.formatted_body, "a<br/>b<br/>c");
        assert!(outbox.pending().is_empty());
    }

    #[tokio::test]
    async fn push_counts_truncation() {
        let client = Arc::new(RecordingClient::new());
        let outbox = Outbox::new(client, "!r:x".to_string(), 2);
        for line in ["a", "b", "c"] {
            outbox.push(line.to_string());
        }

        assert_eq!(outbox.pending(), vec!["b", "c"]);
        let stats = outbox.stats().snapshot();
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.truncated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn task_flushes_once_per_period() {
        let client = Arc::new(RecordingClient::new());
        let outbox = Arc::new(outbox(&client));
        let handle = spawn(outbox.clone(), Duration::from_secs(15), &Handle::current());

        outbox.push("first".to_string());
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(client.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(client.sent().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn request_flush_skips_the_wait() {
        let client = Arc::new(RecordingClient::new());
        let outbox = Arc::new(outbox(&client));
        let handle = spawn(outbox.clone(), Duration::from_secs(60), &Handle::current());

        outbox.push("now".to_string());
        handle.request_flush();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.sent().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_pending_lines() {
        let client = Arc::new(RecordingClient::new());
        let outbox = Arc::new(outbox(&client));
        let handle = spawn(outbox.clone(), Duration::from_secs(15), &Handle::current());

        outbox.push("last words".to_string());
        handle.shutdown().await;

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content.formatted_body, "last words");
        assert!(outbox.pending().is_empty());
    }
}

//! Test doubles shared by the unit tests.

use crate::client::{HtmlMessage, MessagingClient};
use crate::error::ClientError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
pub struct SentEvent {
    pub room_id: String,
    pub event_type: String,
    pub content: HtmlMessage,
}

/// Records every event; fails with a 503 while `failing` is set.
#[derive(Default)]
pub struct RecordingClient {
    sent: Mutex<Vec<SentEvent>>,
    failing: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEvent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessagingClient for RecordingClient {
    async fn send_message_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &HtmlMessage,
    ) -> Result<String, ClientError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        let mut sent = self.sent.lock();
        sent.push(SentEvent {
            room_id: room_id.to_string(),
            event_type: event_type.to_string(),
            content: content.clone(),
        });
        Ok(format!("$event{}", sent.len()))
    }
}

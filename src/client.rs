use crate::error::ClientError;
use crate::formatter::to_plain_text;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const ROOM_MESSAGE_EVENT: &str = "m.room.message";
pub const TEXT_MSGTYPE: &str = "m.text";
const HTML_FORMAT: &str = "org.matrix.custom.html";

/// Content of an HTML-formatted `m.room.message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlMessage {
    pub msgtype: String,
    pub body: String,
    pub format: String,
    pub formatted_body: String,
}

impl HtmlMessage {
    /// The plain body defaults to the HTML with markup stripped.
    pub fn new(msgtype: impl Into<String>, html: impl Into<String>) -> Self {
        let formatted_body = html.into();
        Self {
            msgtype: msgtype.into(),
            body: to_plain_text(&formatted_body),
            format: HTML_FORMAT.to_string(),
            formatted_body,
        }
    }

    /// Replaces the plain body; an empty body keeps the stripped default.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        if !body.is_empty() {
            self.body = body;
        }
        self
    }
}

/// Sends events into a chat room. Implementations own authentication and retries.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Returns the event ID assigned by the server.
    async fn send_message_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &HtmlMessage,
    ) -> Result<String, ClientError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    event_id: String,
}

/// Matrix client-server API client holding a single access token.
pub struct MatrixHttpClient {
    http: reqwest::Client,
    homeserver: reqwest::Url,
    access_token: String,
    txn_counter: AtomicU64,
}

impl MatrixHttpClient {
    pub fn new(
        homeserver_url: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let homeserver = reqwest::Url::parse(homeserver_url)
            .map_err(|e| ClientError::InvalidHomeserver(format!("{}: {}", homeserver_url, e)))?;
        if homeserver.cannot_be_a_base() {
            return Err(ClientError::InvalidHomeserver(homeserver_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            homeserver,
            access_token: access_token.into(),
            txn_counter: AtomicU64::new(0),
        })
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("roomlog-{}-{}", Utc::now().timestamp_millis(), n)
    }

    /// `{hs}/_matrix/client/v3/rooms/{room}/send/{type}/{txn}` with every
    /// variable part percent-encoded.
    pub fn send_url(&self, room_id: &str, event_type: &str, txn_id: &str) -> Result<reqwest::Url, ClientError> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidHomeserver(self.homeserver.to_string()))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3", "rooms", room_id, "send", event_type, txn_id]);
        Ok(url)
    }
}

#[async_trait]
impl MessagingClient for MatrixHttpClient {
    async fn send_message_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &HtmlMessage,
    ) -> Result<String, ClientError> {
        let url = self.send_url(room_id, event_type, &self.next_txn_id())?;
        debug!("Sending {} to {}", event_type, room_id);

        let response = self
            .http
            .put(url)
            .bearer_auth(&self.access_token)
            .json(content)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response.json().await?;
        Ok(sent.event_id)
    }
}

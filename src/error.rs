use thiserror::Error;

/// Errors raised while building a [`MatrixHook`](crate::hook::MatrixHook).
#[derive(Error, Debug)]
pub enum HookError {
    #[error("Invalid messaging client: none configured")]
    MissingClient,

    #[error("Invalid room ID: must not be empty")]
    MissingRoomId,

    #[error("No Tokio runtime available to drive the flush task")]
    NoRuntime,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Empty logging event")]
    EmptyEvent,
}

/// Transport failures reported by a [`MessagingClient`](crate::client::MessagingClient).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Homeserver returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid homeserver URL: {0}")]
    InvalidHomeserver(String),
}

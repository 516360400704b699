//! Bridge error handling
//!
//! Typed errors for the transports, the cursor store, and per-event
//! handlers. Transport errors never escape the component that made the
//! call; handlers wrap them in [`BridgeError`] so the router can log them
//! with room and event context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the chat or storage transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request could not be sent or the connection failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The response body could not be understood
    #[error("Invalid response from {endpoint}: {details}")]
    Decode { endpoint: String, details: String },

    /// A media reference that is not a valid `mxc://server/id` URI
    #[error("Invalid media reference '{0}'")]
    InvalidMediaRef(String),

    /// Local I/O while streaming content
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Build a status error, keeping only a prefix of the body for logging
    pub fn status(endpoint: impl Into<String>, status: u16, body: &str) -> Self {
        TransportError::Status {
            endpoint: endpoint.into(),
            status,
            body: body.chars().take(300).collect(),
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(_) | TransportError::Io(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Decode { .. } | TransportError::InvalidMediaRef(_) => false,
        }
    }
}

/// Turn a non-success HTTP response into [`TransportError::Status`]
pub(crate) async fn check_response(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::status(endpoint, status.as_u16(), &body))
}

/// Errors that can occur while loading or saving the sync cursor
#[derive(Error, Debug)]
pub enum CursorError {
    /// Failed to read the cursor file
    #[error("Failed to read cursor '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write the cursor file
    #[error("Failed to write cursor '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cursor file exists but is not a valid record
    #[error("Cursor file '{path}' is corrupted: {details}. Remove it to start from a fresh sync.")]
    Corrupt { path: PathBuf, details: String },

    /// Failed to serialize the cursor record
    #[error("Failed to serialize cursor: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while handling a single event
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Joining a room after an invite failed
    #[error("Failed to join room {room_id}: {source}")]
    Join {
        room_id: String,
        #[source]
        source: TransportError,
    },

    /// Sending a message into a room failed
    #[error("Failed to send message to {room_id}: {source}")]
    Send {
        room_id: String,
        #[source]
        source: TransportError,
    },

    /// A media reference could not be turned into a download URL
    #[error("Failed to resolve media: {0}")]
    Media(#[source] TransportError),
}

/// Result type for event handlers
pub type BridgeResult<T> = Result<T, BridgeError>;

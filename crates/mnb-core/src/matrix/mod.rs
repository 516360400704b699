//! Matrix chat transport
//!
//! The bridge talks to the homeserver only through [`ChatTransport`]:
//! fetch the next batch of events after a cursor, join, send, mark read.
//! [`MatrixClient`] implements it against the client-server API.
//!
//! ## Usage
//!
//! ```ignore
//! let client = MatrixClient::login(&config.matrix).await?;
//! let batch = client.sync_next(None, 30_000).await?;
//! ```

mod client;
mod sync;

pub use client::MatrixClient;
pub use sync::parse_sync_response;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::TransportError;
use crate::event::Event;

/// One long-poll result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBatch {
    /// Token to pass to the next `sync_next` call
    pub next_batch: Cursor,
    /// Events in delivery order
    pub events: Vec<Event>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// The logged-in account, `@user:server`
    fn user_id(&self) -> &str;

    /// Wait up to `wait_ms` for events after `cursor`
    ///
    /// `None` asks for an initial sync.
    async fn sync_next(
        &self,
        cursor: Option<&Cursor>,
        wait_ms: u64,
    ) -> Result<SyncBatch, TransportError>;

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError>;

    /// Post a plain-text message
    async fn send_message(&self, room_id: &str, body: &str) -> Result<(), TransportError>;

    /// Send a read receipt up to `event_id`
    async fn mark_read(&self, room_id: &str, event_id: &str) -> Result<(), TransportError>;

    /// Turn an `mxc://` reference into an HTTP download URL
    fn resolve_media_url(&self, media_ref: &str) -> Result<String, TransportError>;

    /// Look up the room id behind a `#alias:server`
    async fn resolve_alias(&self, alias: &str) -> Result<String, TransportError>;
}

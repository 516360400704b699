//! mnb core library
//!
//! This crate provides the bridge behind `mnb`: it follows a Matrix
//! account's sync stream and mirrors images (and optionally files) posted
//! in configured rooms into Nextcloud folders, announcing each upload back
//! into the room.
//!
//! # Architecture
//!
//! - **Sync loop**: long-polls the homeserver, routes each batch, then
//!   persists the continuation token
//! - **Transports**: the core only talks to Matrix and Nextcloud through
//!   traits, so every component runs against in-memory doubles in tests
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let chat = Arc::new(MatrixClient::login(&config.matrix).await?);
//! let storage = Arc::new(NextcloudClient::new(&config.nextcloud)?);
//! let uploader = DedupUploader::new(storage, Arc::new(chat.media_fetcher()?));
//!
//! let router = EventRouter::new(chat.clone(), rooms, uploader, (&config.bridge).into());
//! SyncLoop::new(chat, router, store, cursor, (&config.sync).into()).run().await;
//! ```
//!
//! # Modules
//!
//! - `sync`: The long-poll engine (main entry point)
//! - `router`: Per-kind event handlers
//! - `uploader`: Dedup-aware uploads
//! - `settle`: Join-settle filter
//! - `cursor`: Continuation token persistence
//! - `rooms`: Room to folder routing
//! - `matrix`, `nextcloud`: Concrete transports
//! - `config`: Bridge configuration

pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod matrix;
pub mod nextcloud;
pub mod rooms;
pub mod router;
pub mod settle;
pub mod sync;
pub mod uploader;

#[cfg(test)]
mod mock;

pub use config::{Config, RoomConfig};
pub use cursor::{Cursor, CursorRecord, CursorStore, FileCursorStore};
pub use error::{BridgeError, CursorError, TransportError};
pub use event::{Event, EventMeta, MediaKind, MediaRef};
pub use matrix::{ChatTransport, MatrixClient, SyncBatch};
pub use nextcloud::{NextcloudClient, RemoteEntry, StorageTransport};
pub use rooms::RoomDirectory;
pub use router::{EventRouter, RouterSettings};
pub use settle::JoinSettle;
pub use sync::{IterationOutcome, SyncLoop, SyncSettings};
pub use uploader::{ContentFetcher, ContentSource, DedupUploader, UploadDecision, UploadOutcome};

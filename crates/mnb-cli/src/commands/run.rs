//! Run command handler

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use mnb_core::{
    ChatTransport, Config, CursorStore, DedupUploader, EventRouter, FileCursorStore, MatrixClient,
    NextcloudClient, RoomDirectory, SyncLoop,
};

/// Log in, then bridge until ctrl-c
pub async fn run(config: Config) -> Result<()> {
    let chat = Arc::new(
        MatrixClient::login(&config.matrix)
            .await
            .with_context(|| format!("Failed to log in to {}", config.matrix.homeserver))?,
    );
    let storage = Arc::new(
        NextcloudClient::new(&config.nextcloud).context("Failed to set up the Nextcloud client")?,
    );
    let fetcher = chat
        .media_fetcher()
        .context("Failed to set up media downloads")?;
    let uploader = DedupUploader::new(storage, Arc::new(fetcher))
        .with_match_renamed(config.bridge.match_renamed_duplicates);

    if config.rooms.is_empty() {
        warn!("No rooms configured; invites are still accepted but nothing will be uploaded");
    }
    let mut rooms = RoomDirectory::new(&config.rooms);
    if rooms.has_pending() {
        rooms.resolve_aliases(&*chat).await;
    }

    let store = FileCursorStore::new(config.cursor_path(), chat.user_id());
    let cursor = match store.load() {
        Ok(cursor) => cursor,
        Err(e) => {
            warn!("{}", e);
            warn!("Starting from a fresh sync");
            None
        }
    };

    let router = EventRouter::new(chat.clone(), rooms, uploader, (&config.bridge).into());
    let sync = SyncLoop::new(
        chat,
        router,
        Box::new(store),
        cursor,
        (&config.sync).into(),
    );

    match sync.run_until(shutdown_signal()).await {
        Some(cursor) => info!("Stopped at cursor {}", cursor),
        None => info!("Stopped before the first cursor was saved"),
    }
    Ok(())
}

/// Resolves on ctrl-c
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            // Without a signal handler the bridge runs until killed
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

//! Long-poll sync loop
//!
//! Pulls batches from the homeserver, routes every event in delivery
//! order, then persists the batch's token. A crash between routing and
//! saving redelivers the batch on restart; the handlers tolerate that.
//!
//! The loop is the only writer of the cursor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::cursor::{Cursor, CursorStore};
use crate::error::TransportError;
use crate::matrix::{ChatTransport, SyncBatch};
use crate::router::EventRouter;

/// Pacing for the loop
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Long-poll wait passed to the homeserver
    pub timeout: Duration,
    /// Wait after a failed fetch
    pub retry_backoff: Duration,
    /// Wait after a successful iteration
    pub pause: Duration,
    /// On a cold start, route only invites from the first batch
    pub skip_backlog: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        (&SyncConfig::default()).into()
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            pause: Duration::from_millis(config.pause_ms),
            skip_backlog: config.skip_backlog,
        }
    }
}

/// What one iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The batch was routed
    Routed {
        /// Events passed to the router
        routed: usize,
        /// Backlog events not acted on during a cold start
        skipped: usize,
        /// Whether the cursor store now holds this batch's token
        persisted: bool,
    },
    /// The fetch failed; the cursor did not move
    FetchFailed {
        /// Whether the error looked temporary (network, 5xx, 429)
        transient: bool,
    },
}

/// The sync engine
pub struct SyncLoop {
    chat: Arc<dyn ChatTransport>,
    router: EventRouter,
    store: Box<dyn CursorStore>,
    settings: SyncSettings,
    /// Token for the next fetch
    cursor: Option<Cursor>,
    /// Token the store is known to hold
    persisted: Option<Cursor>,
}

impl SyncLoop {
    /// Create a loop resuming from `cursor` (`None` for a cold start)
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        router: EventRouter,
        store: Box<dyn CursorStore>,
        cursor: Option<Cursor>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            chat,
            router,
            store,
            settings,
            persisted: cursor.clone(),
            cursor,
        }
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Run until the process is terminated
    pub async fn run(self) -> Option<Cursor> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves, returning the last persisted cursor
    ///
    /// Shutdown interrupts the long-poll wait and the pause between
    /// iterations, never the routing of a fetched batch.
    pub async fn run_until<F>(mut self, shutdown: F) -> Option<Cursor>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting sync loop ({})",
            match &self.cursor {
                Some(cursor) => format!("resuming from {}", cursor),
                None => "cold start".to_string(),
            }
        );
        tokio::pin!(shutdown);

        loop {
            let fetched = tokio::select! {
                _ = &mut shutdown => break,
                fetched = self.fetch() => fetched,
            };

            let delay = match self.process(fetched).await {
                IterationOutcome::FetchFailed { .. } => self.settings.retry_backoff,
                IterationOutcome::Routed { .. } => self.settings.pause,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Sync loop stopped");
        self.persisted
    }

    /// Fetch and route a single batch
    pub async fn iterate(&mut self) -> IterationOutcome {
        let fetched = self.fetch().await;
        self.process(fetched).await
    }

    async fn fetch(&self) -> Result<SyncBatch, TransportError> {
        let wait_ms = u64::try_from(self.settings.timeout.as_millis()).unwrap_or(u64::MAX);
        self.chat.sync_next(self.cursor.as_ref(), wait_ms).await
    }

    async fn process(&mut self, fetched: Result<SyncBatch, TransportError>) -> IterationOutcome {
        let batch = match fetched {
            Ok(batch) => batch,
            Err(e) => {
                let transient = e.is_transient();
                if transient {
                    warn!(
                        "Sync request failed, retrying in {:?}: {}",
                        self.settings.retry_backoff, e
                    );
                } else {
                    // Still retried; the operator may fix the cause meanwhile
                    error!(
                        "Sync request rejected, retrying in {:?}: {}",
                        self.settings.retry_backoff, e
                    );
                }
                return IterationOutcome::FetchFailed { transient };
            }
        };

        let backlog = self.cursor.is_none() && self.settings.skip_backlog;
        let mut routed = 0;
        let mut skipped = 0;
        for event in &batch.events {
            if backlog && !event.is_invite() {
                skipped += 1;
                continue;
            }
            self.router.dispatch(event).await;
            routed += 1;
        }
        if skipped > 0 {
            info!("Skipped {} backlog events from the initial sync", skipped);
        }

        self.cursor = Some(batch.next_batch.clone());
        let persisted = self.persist(&batch.next_batch);

        IterationOutcome::Routed {
            routed,
            skipped,
            persisted,
        }
    }

    /// Save `cursor` unless the store already holds it
    ///
    /// A failed save is retried after the next batch, even if that batch
    /// returns the same token.
    fn persist(&mut self, cursor: &Cursor) -> bool {
        if self.persisted.as_ref() == Some(cursor) {
            return true;
        }

        match self.store.save(cursor) {
            Ok(()) => {
                debug!("Saved cursor {}", cursor);
                self.persisted = Some(cursor.clone());
                true
            }
            Err(e) => {
                warn!("Failed to save cursor, will retry after next batch: {}", e);
                false
            }
        }
    }
}

//! Event routing
//!
//! One handler per event kind, picked by an exhaustive match. A failing
//! handler is logged with the room and event id and never stops the batch.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::event::{Event, EventMeta, MediaKind, MediaRef};
use crate::matrix::ChatTransport;
use crate::rooms::RoomDirectory;
use crate::settle::JoinSettle;
use crate::uploader::{ContentSource, DedupUploader};

/// Handler behaviour taken from the config
#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    /// Posted once after each successful join
    pub welcome_message: Option<String>,
    /// Mark events read even when they predate the join
    pub mark_read_suppressed: bool,
}

impl From<&BridgeConfig> for RouterSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            welcome_message: config.welcome_message.clone(),
            mark_read_suppressed: config.mark_read_suppressed,
        }
    }
}

/// Why a message event was not acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suppression {
    /// Sent before the bridge joined the room
    BeforeJoin,
    /// The bridge's own message coming back through sync
    OwnEcho,
}

/// Dispatches events to their handlers
pub struct EventRouter {
    chat: Arc<dyn ChatTransport>,
    rooms: RoomDirectory,
    uploader: DedupUploader,
    settle: JoinSettle,
    settings: RouterSettings,
}

impl EventRouter {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        rooms: RoomDirectory,
        uploader: DedupUploader,
        settings: RouterSettings,
    ) -> Self {
        Self {
            chat,
            rooms,
            uploader,
            settle: JoinSettle::new(),
            settings,
        }
    }

    pub fn settle(&self) -> &JoinSettle {
        &self.settle
    }

    pub fn settle_mut(&mut self) -> &mut JoinSettle {
        &mut self.settle
    }

    /// Handle one event; failures are logged, never returned
    pub async fn dispatch(&mut self, event: &Event) {
        let result = match event {
            Event::Invite {
                room_id, sender, ..
            } => self.on_invite(room_id, sender).await,
            Event::Text { meta, body } => self.on_message(meta, Action::Log(body)).await,
            Event::Image { meta, body, media } => {
                self.on_message(meta, Action::Bridge(MediaKind::Image, body, media))
                    .await
            }
            Event::File { meta, body, media } => {
                self.on_message(meta, Action::Bridge(MediaKind::File, body, media))
                    .await
            }
        };

        if let Err(e) = result {
            error!(
                room_id = event.room_id(),
                event_id = event.event_id().unwrap_or("-"),
                kind = event.kind(),
                "Event handler failed: {}",
                e
            );
        }
    }

    async fn on_invite(&mut self, room_id: &str, sender: &str) -> BridgeResult<()> {
        info!("Invited to {} by {}", room_id, sender);

        if let Err(source) = self.chat.join_room(room_id).await {
            return Err(BridgeError::Join {
                room_id: room_id.to_string(),
                source,
            });
        }
        self.settle.record_join(room_id, now_ms());

        if self.rooms.has_pending() {
            self.rooms.resolve_aliases(self.chat.as_ref()).await;
        }

        if let Some(welcome) = &self.settings.welcome_message {
            self.chat
                .send_message(room_id, welcome)
                .await
                .map_err(|source| BridgeError::Send {
                    room_id: room_id.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn on_message(&mut self, meta: &EventMeta, action: Action<'_>) -> BridgeResult<()> {
        let suppressed = if meta.sender == self.chat.user_id() {
            Some(Suppression::OwnEcho)
        } else if !self.settle.should_process(&meta.room_id, meta.timestamp) {
            Some(Suppression::BeforeJoin)
        } else {
            None
        };

        let result = match suppressed {
            Some(reason) => {
                debug!("Skipping {} in {}: {:?}", meta.event_id, meta.room_id, reason);
                Ok(())
            }
            None => self.perform(meta, action).await,
        };

        let mark_read = match suppressed {
            None => true,
            Some(Suppression::BeforeJoin) => self.settings.mark_read_suppressed,
            Some(Suppression::OwnEcho) => false,
        };
        if mark_read {
            if let Err(e) = self.chat.mark_read(&meta.room_id, &meta.event_id).await {
                warn!("Failed to mark {} read in {}: {}", meta.event_id, meta.room_id, e);
            }
        }

        result
    }

    async fn perform(&self, meta: &EventMeta, action: Action<'_>) -> BridgeResult<()> {
        match action {
            Action::Log(body) => {
                debug!("{} | {}: {}", meta.room_id, meta.sender, body);
                Ok(())
            }
            Action::Bridge(kind, name, media) => self.bridge_media(meta, kind, name, media).await,
        }
    }

    async fn bridge_media(
        &self,
        meta: &EventMeta,
        kind: MediaKind,
        name: &str,
        media: &MediaRef,
    ) -> BridgeResult<()> {
        let Some(route) = self.rooms.route(&meta.room_id) else {
            debug!("No folder configured for {}, ignoring {}", meta.room_id, name);
            return Ok(());
        };
        if !route.accepts(kind) {
            debug!("{:?} bridging disabled for {}, ignoring {}", kind, meta.room_id, name);
            return Ok(());
        }

        debug!(
            "Bridging {} from {} ({} bytes declared, {})",
            name,
            meta.room_id,
            media.size.map_or_else(|| "?".to_string(), |s| s.to_string()),
            media.mimetype.as_deref().unwrap_or("unknown type")
        );
        let url = self
            .chat
            .resolve_media_url(&media.url)
            .map_err(BridgeError::Media)?;
        let outcome = self
            .uploader
            .upload(&route.folder, name, ContentSource::Remote(url))
            .await;
        if outcome.ok {
            info!("{}: {}", meta.room_id, outcome.message);
        } else {
            warn!("{}: {}", meta.room_id, outcome.message);
        }

        self.chat
            .send_message(&meta.room_id, &outcome.message)
            .await
            .map_err(|source| BridgeError::Send {
                room_id: meta.room_id.clone(),
                source,
            })
    }
}

/// Kind-specific part of a message handler
enum Action<'a> {
    Log(&'a str),
    Bridge(MediaKind, &'a str, &'a MediaRef),
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::mock::{MockChat, MockFetcher, MockStorage};
    use crate::nextcloud::RemoteEntry;

    const ME: &str = "@bot:server";
    const ROOM: &str = "!abc:server";

    struct Harness {
        chat: MockChat,
        storage: MockStorage,
        fetcher: MockFetcher,
        router: EventRouter,
    }

    fn harness(settings: RouterSettings, rooms: &[RoomConfig]) -> Harness {
        let chat = MockChat::new(ME);
        let storage = MockStorage::new();
        let fetcher = MockFetcher::new();
        let uploader = DedupUploader::new(Arc::new(storage.clone()), Arc::new(fetcher.clone()));
        let router = EventRouter::new(
            Arc::new(chat.clone()),
            RoomDirectory::new(rooms),
            uploader,
            settings,
        );
        Harness {
            chat,
            storage,
            fetcher,
            router,
        }
    }

    fn photos_room() -> Vec<RoomConfig> {
        vec![RoomConfig {
            room: ROOM.to_string(),
            folder: "/Photos".to_string(),
            images: true,
            files: false,
        }]
    }

    fn meta(event_id: &str, sender: &str, timestamp: i64) -> EventMeta {
        EventMeta {
            room_id: ROOM.to_string(),
            event_id: event_id.to_string(),
            sender: sender.to_string(),
            timestamp,
        }
    }

    fn image(event_id: &str, body: &str, timestamp: i64) -> Event {
        Event::Image {
            meta: meta(event_id, "@alice:server", timestamp),
            body: body.to_string(),
            media: MediaRef {
                url: format!("mxc://server/{event_id}"),
                size: None,
                mimetype: None,
            },
        }
    }

    fn file(event_id: &str, body: &str) -> Event {
        Event::File {
            meta: meta(event_id, "@alice:server", 1),
            body: body.to_string(),
            media: MediaRef {
                url: format!("mxc://server/{event_id}"),
                size: None,
                mimetype: None,
            },
        }
    }

    fn text(event_id: &str, timestamp: i64) -> Event {
        Event::Text {
            meta: meta(event_id, "@alice:server", timestamp),
            body: "hello".to_string(),
        }
    }

    fn invite() -> Event {
        Event::Invite {
            room_id: ROOM.to_string(),
            sender: "@alice:server".to_string(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_invite_joins_and_welcomes() {
        let settings = RouterSettings {
            welcome_message: Some("Hi!".to_string()),
            mark_read_suppressed: true,
        };
        let mut h = harness(settings, &[]);

        h.router.dispatch(&invite()).await;

        assert_eq!(h.chat.joined(), vec![ROOM.to_string()]);
        assert!(h.router.settle().joined_at(ROOM).is_some());
        assert_eq!(h.chat.sent(), vec![(ROOM.to_string(), "Hi!".to_string())]);
    }

    #[tokio::test]
    async fn test_invite_without_welcome_sends_nothing() {
        let mut h = harness(RouterSettings::default(), &[]);

        h.router.dispatch(&invite()).await;

        assert_eq!(h.chat.joined().len(), 1);
        assert!(h.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_join_records_nothing() {
        let settings = RouterSettings {
            welcome_message: Some("Hi!".to_string()),
            mark_read_suppressed: true,
        };
        let mut h = harness(settings, &[]);
        h.chat.fail_next_join("forbidden");

        h.router.dispatch(&invite()).await;

        assert!(h.router.settle().joined_at(ROOM).is_none());
        assert!(h.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_join_resolves_pending_aliases() {
        let rooms = vec![RoomConfig {
            room: "#photos:server".to_string(),
            folder: "/Photos".to_string(),
            images: true,
            files: false,
        }];
        let mut h = harness(RouterSettings::default(), &rooms);
        h.chat.add_alias("#photos:server", ROOM);
        h.fetcher.serve("https://media.example/server/$i1", 10);

        h.router.dispatch(&invite()).await;
        h.router.dispatch(&image("$i1", "photo.jpg", now_ms())).await;

        assert_eq!(h.storage.uploads()[0].0, "/Photos/photo.jpg");
    }

    #[tokio::test]
    async fn test_image_is_uploaded_and_announced() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        h.fetcher.serve("https://media.example/server/$i1", 4096);

        h.router.dispatch(&image("$i1", "photo.jpg", 1)).await;

        assert_eq!(h.storage.uploads(), vec![("/Photos/photo.jpg".to_string(), 4096)]);
        let sent = h.chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ROOM);
        assert!(sent[0].1.contains("upload ok"), "{}", sent[0].1);
        assert_eq!(h.chat.read(), vec![(ROOM.to_string(), "$i1".to_string())]);
    }

    #[tokio::test]
    async fn test_upload_failure_is_announced() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        h.fetcher.serve("https://media.example/server/$i1", 10);
        h.storage.fail_next_list("timeout");

        h.router.dispatch(&image("$i1", "photo.jpg", 1)).await;

        let sent = h.chat.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("error accessing folder: /Photos"));
        // Still acknowledged
        assert_eq!(h.chat.read().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_room_is_ignored_but_read() {
        let mut h = harness(RouterSettings::default(), &[]);

        h.router.dispatch(&image("$i1", "photo.jpg", 1)).await;

        assert_eq!(h.storage.list_calls(), 0);
        assert!(h.chat.sent().is_empty());
        assert_eq!(h.chat.read().len(), 1);
    }

    #[tokio::test]
    async fn test_files_follow_their_own_flag() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        h.router.dispatch(&file("$f1", "report.pdf")).await;
        assert!(h.storage.uploads().is_empty());

        let mut rooms = photos_room();
        rooms[0].files = true;
        let mut h = harness(RouterSettings::default(), &rooms);
        h.fetcher.serve("https://media.example/server/$f1", 10);
        h.router.dispatch(&file("$f1", "report.pdf")).await;
        assert_eq!(h.storage.uploads()[0].0, "/Photos/report.pdf");
    }

    #[tokio::test]
    async fn test_events_before_join_are_not_acted_on() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        h.fetcher.serve("https://media.example/server/$old", 10);
        h.fetcher.serve("https://media.example/server/$new", 10);
        h.router.settle_mut().record_join(ROOM, 1_000);

        h.router.dispatch(&image("$old", "old.jpg", 999)).await;
        assert!(h.storage.uploads().is_empty());
        assert!(h.chat.sent().is_empty());

        h.router.dispatch(&image("$new", "new.jpg", 1_000)).await;
        assert_eq!(h.storage.uploads()[0].0, "/Photos/new.jpg");
    }

    #[tokio::test]
    async fn test_read_marking_of_suppressed_events_is_configurable() {
        let mut h = harness(
            RouterSettings {
                welcome_message: None,
                mark_read_suppressed: true,
            },
            &[],
        );
        h.router.settle_mut().record_join(ROOM, 1_000);
        h.router.dispatch(&text("$t1", 5)).await;
        assert_eq!(h.chat.read().len(), 1);

        let mut h = harness(
            RouterSettings {
                welcome_message: None,
                mark_read_suppressed: false,
            },
            &[],
        );
        h.router.settle_mut().record_join(ROOM, 1_000);
        h.router.dispatch(&text("$t1", 5)).await;
        assert!(h.chat.read().is_empty());

        // Events after the join are always marked
        h.router.dispatch(&text("$t2", 1_000)).await;
        assert_eq!(h.chat.read(), vec![(ROOM.to_string(), "$t2".to_string())]);
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        let echo = Event::Image {
            meta: meta("$e1", ME, 1),
            body: "photo.jpg".to_string(),
            media: MediaRef {
                url: "mxc://server/x".to_string(),
                size: None,
                mimetype: None,
            },
        };

        h.router.dispatch(&echo).await;

        assert_eq!(h.storage.list_calls(), 0);
        assert!(h.chat.read().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_image_is_absorbed_by_dedup() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        h.fetcher.serve("https://media.example/server/$i1", 1000);
        let event = image("$i1", "cat.png", 1);

        h.router.dispatch(&event).await;
        h.router.dispatch(&event).await;

        assert_eq!(h.storage.uploads(), vec![("/Photos/cat.png".to_string(), 1000)]);
        let sent = h.chat.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1.contains("already present: cat.png"));
    }

    #[tokio::test]
    async fn test_replayed_renamed_image_needs_match_renamed() {
        let chat = MockChat::new(ME);
        let storage = MockStorage::new();
        let fetcher = MockFetcher::new();
        fetcher.serve("https://media.example/server/$i1", 2000);
        storage.add_entry("/Photos", RemoteEntry::file("cat.png", 1000));
        let uploader = DedupUploader::new(Arc::new(storage.clone()), Arc::new(fetcher))
            .with_match_renamed(true);
        let mut router = EventRouter::new(
            Arc::new(chat.clone()),
            RoomDirectory::new(&photos_room()),
            uploader,
            RouterSettings::default(),
        );
        let event = image("$i1", "cat.png", 1);

        router.dispatch(&event).await;
        router.dispatch(&event).await;

        assert_eq!(storage.uploads(), vec![("/Photos/cat (1).png".to_string(), 2000)]);
        assert!(chat.sent()[1].1.contains("already present: cat (1).png"));
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_poison_router() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        h.fetcher.serve("https://media.example/server/$i2", 10);
        h.chat.fail_next_send("network down");

        // Upload succeeds, the announcement fails and is only logged
        h.fetcher.serve("https://media.example/server/$i1", 10);
        h.router.dispatch(&image("$i1", "a.jpg", 1)).await;
        h.router.dispatch(&image("$i2", "b.jpg", 1)).await;

        assert_eq!(h.storage.uploads().len(), 2);
        assert_eq!(h.chat.sent().len(), 1);
        assert_eq!(h.chat.read().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_media_reference_is_contained() {
        let mut h = harness(RouterSettings::default(), &photos_room());
        let broken = Event::Image {
            meta: meta("$b1", "@alice:server", 1),
            body: "x.png".to_string(),
            media: MediaRef {
                url: "https://not-mxc".to_string(),
                size: None,
                mimetype: None,
            },
        };

        h.router.dispatch(&broken).await;

        assert!(h.storage.uploads().is_empty());
        assert_eq!(h.chat.read().len(), 1);
    }
}

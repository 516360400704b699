//! Inbound events
//!
//! The closed set of event kinds the bridge acts on. Anything else the
//! homeserver delivers is dropped while parsing the sync response.

/// Fields shared by every timeline event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    /// `origin_server_ts`, milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Reference to an attachment stored on the homeserver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// `mxc://server/media-id`
    pub url: String,
    /// Size declared by the sender, if any
    pub size: Option<u64>,
    pub mimetype: Option<String>,
}

/// Which attachment flag a media event is gated by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    File,
}

/// An event delivered by one sync batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `m.text` or `m.notice`
    Text { meta: EventMeta, body: String },
    /// `m.image`; `body` is the file name chosen by the sender
    Image {
        meta: EventMeta,
        body: String,
        media: MediaRef,
    },
    /// `m.file`
    File {
        meta: EventMeta,
        body: String,
        media: MediaRef,
    },
    /// The bridge account was invited to a room
    Invite {
        room_id: String,
        sender: String,
        timestamp: i64,
    },
}

impl Event {
    pub fn room_id(&self) -> &str {
        match self {
            Event::Text { meta, .. } | Event::Image { meta, .. } | Event::File { meta, .. } => {
                &meta.room_id
            }
            Event::Invite { room_id, .. } => room_id,
        }
    }

    /// Event id for logging; invites are stripped state and have none
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Event::Text { meta, .. } | Event::Image { meta, .. } | Event::File { meta, .. } => {
                Some(&meta.event_id)
            }
            Event::Invite { .. } => None,
        }
    }

    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Text { .. } => "text",
            Event::Image { .. } => "image",
            Event::File { .. } => "file",
            Event::Invite { .. } => "invite",
        }
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, Event::Invite { .. })
    }
}

//! `/sync` response parsing
//!
//! Only the parts of the response the bridge acts on are modelled. Joined
//! room timelines yield message events; invited rooms yield one invite
//! each. Every other event type or msgtype is dropped here.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use super::SyncBatch;
use crate::cursor::Cursor;
use crate::event::{Event, EventMeta, MediaRef};

#[derive(Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: Rooms,
}

#[derive(Deserialize, Default)]
struct Rooms {
    #[serde(default)]
    join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    invite: BTreeMap<String, InvitedRoom>,
}

#[derive(Deserialize, Default)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Deserialize, Default)]
struct Timeline {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event_id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    origin_server_ts: i64,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct MessageContent {
    msgtype: Option<String>,
    #[serde(default)]
    body: String,
    /// Newer clients put the file name here and use `body` as a caption
    filename: Option<String>,
    url: Option<String>,
    info: Option<MediaInfo>,
    #[serde(rename = "m.relates_to")]
    relates_to: Option<RelatesTo>,
}

#[derive(Deserialize)]
struct MediaInfo {
    size: Option<u64>,
    mimetype: Option<String>,
}

#[derive(Deserialize)]
struct RelatesTo {
    rel_type: Option<String>,
}

#[derive(Deserialize, Default)]
struct InvitedRoom {
    #[serde(default)]
    invite_state: InviteState,
}

#[derive(Deserialize, Default)]
struct InviteState {
    #[serde(default)]
    events: Vec<StrippedEvent>,
}

#[derive(Deserialize)]
struct StrippedEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sender: String,
    state_key: Option<String>,
    origin_server_ts: Option<i64>,
    #[serde(default)]
    content: serde_json::Value,
}

/// Parse a `/sync` response body into a batch
///
/// `own_user_id` picks the invite membership event addressed to the bridge.
pub fn parse_sync_response(body: &str, own_user_id: &str) -> Result<SyncBatch, serde_json::Error> {
    let response: SyncResponse = serde_json::from_str(body)?;
    let mut events = Vec::new();

    for (room_id, room) in response.rooms.join {
        for raw in room.timeline.events {
            if let Some(event) = message_event(&room_id, raw) {
                events.push(event);
            }
        }
    }

    for (room_id, room) in response.rooms.invite {
        events.push(invite_event(room_id, room, own_user_id));
    }

    Ok(SyncBatch {
        next_batch: Cursor::new(response.next_batch),
        events,
    })
}

fn message_event(room_id: &str, raw: RawEvent) -> Option<Event> {
    if raw.kind != "m.room.message" {
        return None;
    }

    let content: MessageContent = match serde_json::from_value(raw.content) {
        Ok(content) => content,
        Err(e) => {
            debug!("Dropping malformed message {}: {}", raw.event_id, e);
            return None;
        }
    };

    // Edits repeat the original content; acting on them would re-upload
    if content
        .relates_to
        .as_ref()
        .and_then(|r| r.rel_type.as_deref())
        == Some("m.replace")
    {
        return None;
    }

    let meta = EventMeta {
        room_id: room_id.to_string(),
        event_id: raw.event_id,
        sender: raw.sender,
        timestamp: raw.origin_server_ts,
    };

    match content.msgtype.as_deref() {
        Some("m.text") | Some("m.notice") => Some(Event::Text {
            meta,
            body: content.body,
        }),
        Some(kind @ ("m.image" | "m.file")) => {
            // Encrypted attachments carry `file` instead of `url`
            let url = content.url?;
            let body = content.filename.unwrap_or(content.body);
            let media = MediaRef {
                url,
                size: content.info.as_ref().and_then(|i| i.size),
                mimetype: content.info.and_then(|i| i.mimetype),
            };
            Some(if kind == "m.image" {
                Event::Image { meta, body, media }
            } else {
                Event::File { meta, body, media }
            })
        }
        _ => None,
    }
}

fn invite_event(room_id: String, room: InvitedRoom, own_user_id: &str) -> Event {
    let membership = room.invite_state.events.into_iter().find(|e| {
        e.kind == "m.room.member"
            && e.state_key.as_deref() == Some(own_user_id)
            && e.content.get("membership").and_then(|m| m.as_str()) == Some("invite")
    });

    let (sender, timestamp) = match membership {
        Some(event) => (event.sender, event.origin_server_ts.unwrap_or(0)),
        None => (String::new(), 0),
    };

    Event::Invite {
        room_id,
        sender,
        timestamp,
    }
}

//! Join-settle filter
//!
//! After joining a room the homeserver delivers part of its history. Those
//! events predate the join and must not trigger uploads or replies.
//!
//! Join times are kept in memory only. After a restart, rooms that were
//! already joined have no record and everything in them is processed; the
//! persisted cursor is what keeps old history from being delivered again.

use std::collections::HashMap;

/// Per-room join timestamps
#[derive(Debug, Default)]
pub struct JoinSettle {
    joined_at: HashMap<String, i64>,
}

impl JoinSettle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the bridge joined `room_id` at `timestamp` (ms)
    ///
    /// A recorded time is never moved backwards.
    pub fn record_join(&mut self, room_id: &str, timestamp: i64) {
        let entry = self.joined_at.entry(room_id.to_string()).or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
    }

    /// Whether an event in `room_id` sent at `timestamp` should be acted on
    pub fn should_process(&self, room_id: &str, timestamp: i64) -> bool {
        match self.joined_at.get(room_id) {
            Some(&joined_at) => timestamp >= joined_at,
            None => true,
        }
    }

    pub fn joined_at(&self, room_id: &str) -> Option<i64> {
        self.joined_at.get(room_id).copied()
    }
}

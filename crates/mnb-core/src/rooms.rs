//! Room to folder routing
//!
//! Config may name rooms by alias or by id, while events always carry the
//! room id. Aliases are resolved through the homeserver directory at
//! startup; any that fail stay pending and are retried after each join.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::RoomConfig;
use crate::event::MediaKind;
use crate::matrix::ChatTransport;

/// Where a room's attachments go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRoute {
    pub folder: String,
    pub images: bool,
    pub files: bool,
}

impl RoomRoute {
    pub fn accepts(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => self.images,
            MediaKind::File => self.files,
        }
    }
}

impl From<&RoomConfig> for RoomRoute {
    fn from(room: &RoomConfig) -> Self {
        Self {
            folder: room.folder.clone(),
            images: room.images,
            files: room.files,
        }
    }
}

/// Lookup from room id to route
#[derive(Debug, Default)]
pub struct RoomDirectory {
    routes: HashMap<String, RoomRoute>,
    /// Aliases not yet resolved to an id
    pending: Vec<(String, RoomRoute)>,
}

impl RoomDirectory {
    pub fn new(rooms: &[RoomConfig]) -> Self {
        let mut directory = Self::default();
        for room in rooms {
            if room.room.starts_with('#') {
                directory.pending.push((room.room.clone(), room.into()));
            } else {
                directory.routes.insert(room.room.clone(), room.into());
            }
        }
        directory
    }

    pub fn route(&self, room_id: &str) -> Option<&RoomRoute> {
        self.routes.get(room_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Try to resolve every pending alias; returns how many succeeded
    ///
    /// An explicit room id in the config wins over an alias resolving to
    /// the same room.
    pub async fn resolve_aliases(&mut self, chat: &dyn ChatTransport) -> usize {
        let mut still_pending = Vec::new();
        let mut resolved = 0;

        for (alias, route) in std::mem::take(&mut self.pending) {
            match chat.resolve_alias(&alias).await {
                Ok(room_id) => {
                    info!("Room {} is {} -> {}", alias, room_id, route.folder);
                    self.routes.entry(room_id).or_insert(route);
                    resolved += 1;
                }
                Err(e) => {
                    warn!("Could not resolve room alias {}: {}", alias, e);
                    still_pending.push((alias, route));
                }
            }
        }

        self.pending = still_pending;
        resolved
    }
}

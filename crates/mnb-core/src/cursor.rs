//! Sync cursor persistence
//!
//! Stores the last `next_batch` token between sessions so a restart
//! resumes where the previous process stopped instead of replaying the
//! room timelines.
//!
//! The record is a small JSON file (`<data_dir>/cursor.json`) so it can be
//! inspected by hand. It carries the Matrix user id it belongs to; a record
//! written for another account is ignored.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CursorError;

/// Opaque continuation token handed out by the homeserver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Matrix user id the token belongs to
    pub user_id: String,
    pub next_batch: Cursor,
    pub updated_at: DateTime<Utc>,
}

/// Storage for the single sync cursor
///
/// Only the sync loop writes through this, so implementations need no
/// internal locking.
pub trait CursorStore: Send {
    /// Last saved cursor, or `None` on a cold start
    fn load(&self) -> Result<Option<Cursor>, CursorError>;

    /// Replace the saved cursor
    fn save(&mut self, cursor: &Cursor) -> Result<(), CursorError>;

    /// Forget the saved cursor
    fn clear(&mut self) -> Result<(), CursorError>;
}

/// Cursor store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
    user_id: String,
}

impl FileCursorStore {
    pub fn new(path: PathBuf, user_id: impl Into<String>) -> Self {
        Self {
            path,
            user_id: user_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw record regardless of which account wrote it
    pub fn record(&self) -> Result<Option<CursorRecord>, CursorError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CursorError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let record = serde_json::from_str(&json).map_err(|e| CursorError::Corrupt {
            path: self.path.clone(),
            details: e.to_string(),
        })?;
        Ok(Some(record))
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<Cursor>, CursorError> {
        let Some(record) = self.record()? else {
            return Ok(None);
        };

        if record.user_id != self.user_id {
            tracing::warn!(
                "Ignoring cursor {:?} written for {}, not {}",
                self.path,
                record.user_id,
                self.user_id
            );
            return Ok(None);
        }

        Ok(Some(record.next_batch))
    }

    fn save(&mut self, cursor: &Cursor) -> Result<(), CursorError> {
        let record = CursorRecord {
            user_id: self.user_id.clone(),
            next_batch: cursor.clone(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        atomic_write(&self.path, json.as_bytes()).map_err(|source| CursorError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn clear(&mut self) -> Result<(), CursorError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CursorError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Write to a temp file in the same directory, fsync, then rename over
/// the target so the record is never left half-written.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

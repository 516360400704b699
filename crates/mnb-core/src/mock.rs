//! In-memory transports for tests
//!
//! Each mock records the calls it receives and can be told to fail the
//! next call. Clones share state, so a test keeps one handle and gives
//! another to the code under test.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cursor::{Cursor, CursorStore};
use crate::error::{CursorError, TransportError};
use crate::matrix::{ChatTransport, SyncBatch};
use crate::nextcloud::{RemoteEntry, StorageTransport};
use crate::uploader::ContentFetcher;

fn injected(message: String) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockStorageInner {
    folders: HashMap<String, Vec<RemoteEntry>>,
    uploads: Vec<(String, u64)>,
    list_calls: usize,
    fail_next_list: Option<String>,
    fail_next_upload: Option<String>,
}

/// Storage double; uploads are added to the folder listing
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    inner: Arc<Mutex<MockStorageInner>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&self, folder: &str, entry: RemoteEntry) {
        let mut inner = self.inner.lock().unwrap();
        inner.folders.entry(folder.to_string()).or_default().push(entry);
    }

    /// `(target path, size)` for every successful upload, in order
    pub fn uploads(&self) -> Vec<(String, u64)> {
        self.inner.lock().unwrap().uploads.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    pub fn fail_next_list(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_list = Some(error.to_string());
    }

    pub fn fail_next_upload(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_upload = Some(error.to_string());
    }
}

#[async_trait]
impl StorageTransport for MockStorage {
    async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        if let Some(error) = inner.fail_next_list.take() {
            return Err(injected(error));
        }
        Ok(inner.folders.get(folder).cloned().unwrap_or_default())
    }

    async fn upload_file(&self, local: &Path, target: &str) -> Result<(), TransportError> {
        let size = std::fs::metadata(local)?.len();

        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_upload.take() {
            return Err(injected(error));
        }

        let (folder, name) = target.rsplit_once('/').unwrap_or(("", target));
        let folder = if folder.is_empty() { "/" } else { folder };
        inner
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(RemoteEntry::file(name, size));
        inner.uploads.push((target.to_string(), size));
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockFetcherInner {
    sizes: HashMap<String, u64>,
    last_dest: Option<PathBuf>,
}

/// Serves configured URLs as runs of zero bytes; anything else is a 404
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    inner: Arc<Mutex<MockFetcherInner>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, size: u64) {
        self.inner.lock().unwrap().sizes.insert(url.to_string(), size);
    }

    pub fn last_dest(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().last_dest.clone()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        let size = {
            let mut inner = self.inner.lock().unwrap();
            inner.last_dest = Some(dest.to_path_buf());
            inner.sizes.get(url).copied()
        };
        let Some(size) = size else {
            return Err(TransportError::status(url, 404, "not found"));
        };
        std::fs::write(dest, vec![0u8; size as usize])?;
        Ok(size)
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockChatInner {
    batches: VecDeque<Result<SyncBatch, TransportError>>,
    sync_cursors: Vec<Option<Cursor>>,
    joined: Vec<String>,
    sent: Vec<(String, String)>,
    read: Vec<(String, String)>,
    aliases: HashMap<String, String>,
    fail_next_join: Option<String>,
    fail_next_send: Option<String>,
}

/// Chat double: sync batches are queued up front, outbound calls recorded
#[derive(Debug, Clone)]
pub struct MockChat {
    user_id: String,
    inner: Arc<Mutex<MockChatInner>>,
}

impl MockChat {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            inner: Arc::default(),
        }
    }

    pub fn queue_batch(&self, batch: SyncBatch) {
        self.inner.lock().unwrap().batches.push_back(Ok(batch));
    }

    /// Queue a network-style failure
    pub fn queue_failure(&self, error: &str) {
        self.queue_error(injected(error.to_string()));
    }

    pub fn queue_error(&self, error: TransportError) {
        self.inner.lock().unwrap().batches.push_back(Err(error));
    }

    pub fn add_alias(&self, alias: &str, room_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .aliases
            .insert(alias.to_string(), room_id.to_string());
    }

    /// Cursor passed to each `sync_next` call
    pub fn sync_cursors(&self) -> Vec<Option<Cursor>> {
        self.inner.lock().unwrap().sync_cursors.clone()
    }

    pub fn joined(&self) -> Vec<String> {
        self.inner.lock().unwrap().joined.clone()
    }

    /// `(room_id, body)` for every message sent
    pub fn sent(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// `(room_id, event_id)` for every read receipt
    pub fn read(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().read.clone()
    }

    pub fn fail_next_join(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_join = Some(error.to_string());
    }

    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }
}

#[async_trait]
impl ChatTransport for MockChat {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn sync_next(
        &self,
        cursor: Option<&Cursor>,
        _wait_ms: u64,
    ) -> Result<SyncBatch, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sync_cursors.push(cursor.cloned());
        match inner.batches.pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(error)) => Err(error),
            None => Err(TransportError::status("/sync", 503, "no batch queued")),
        }
    }

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_join.take() {
            return Err(TransportError::status("/join", 403, &error));
        }
        inner.joined.push(room_id.to_string());
        Ok(())
    }

    async fn send_message(&self, room_id: &str, body: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_send.take() {
            return Err(injected(error));
        }
        inner.sent.push((room_id.to_string(), body.to_string()));
        Ok(())
    }

    async fn mark_read(&self, room_id: &str, event_id: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.read.push((room_id.to_string(), event_id.to_string()));
        Ok(())
    }

    fn resolve_media_url(&self, media_ref: &str) -> Result<String, TransportError> {
        let rest = media_ref
            .strip_prefix("mxc://")
            .ok_or_else(|| TransportError::InvalidMediaRef(media_ref.to_string()))?;
        Ok(format!("https://media.example/{rest}"))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<String, TransportError> {
        let inner = self.inner.lock().unwrap();
        inner
            .aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| TransportError::status("/directory/room", 404, "unknown alias"))
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryCursorInner {
    cursor: Option<Cursor>,
    saves: Vec<Cursor>,
    fail_next_save: bool,
}

/// Cursor store that keeps every saved token
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    inner: Arc<Mutex<MemoryCursorInner>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> Vec<Cursor> {
        self.inner.lock().unwrap().saves.clone()
    }

    pub fn fail_next_save(&self) {
        self.inner.lock().unwrap().fail_next_save = true;
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<Cursor>, CursorError> {
        Ok(self.inner.lock().unwrap().cursor.clone())
    }

    fn save(&mut self, cursor: &Cursor) -> Result<(), CursorError> {
        let mut inner = self.inner.lock().unwrap();
        if std::mem::take(&mut inner.fail_next_save) {
            return Err(CursorError::Write {
                path: PathBuf::from("memory"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        inner.cursor = Some(cursor.clone());
        inner.saves.push(cursor.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CursorError> {
        self.inner.lock().unwrap().cursor = None;
        Ok(())
    }
}

//! Dedup-aware uploads
//!
//! Before uploading, the target folder is listed. A file with the same name
//! and size counts as already present; a same-named file with a different
//! size makes the upload move to `name (N).ext`. Identity is approximated by
//! size alone.
//!
//! The listing is fetched fresh for every upload, so two writers racing on
//! the same folder can still collide. Retrying is left to the caller.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{check_response, TransportError};
use crate::nextcloud::{RemoteEntry, StorageTransport};

/// Where the bytes to upload come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// A file on the local disk
    Local(PathBuf),
    /// A URL that is downloaded into a scratch file first
    Remote(String),
}

/// What to do with a candidate file given the current folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    /// An identical file is already present under this name
    Skip(String),
    /// The name is taken by different content; upload under this name
    Rename(String),
    /// No conflict
    Upload,
}

/// Result reported back to the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub ok: bool,
    pub message: String,
}

impl UploadOutcome {
    fn success(message: String) -> Self {
        Self { ok: true, message }
    }

    fn failure(message: String) -> Self {
        Self { ok: false, message }
    }
}

/// Downloads remote content into a local file
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Write the body at `url` into `dest`, returning the byte count
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, TransportError>;
}

/// Connect timeout for media downloads
const MEDIA_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest gap between two body chunks before a download is abandoned
const MEDIA_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP fetcher that authenticates with a bearer token
///
/// Downloads have no overall deadline, only the connect and idle limits,
/// so a large attachment on a slow link still completes.
pub struct HttpFetcher {
    http: reqwest::Client,
    bearer: Option<String>,
    idle_timeout: Duration,
}

impl HttpFetcher {
    pub fn with_bearer(token: impl Into<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(MEDIA_CONNECT_TIMEOUT)
            .user_agent(concat!("mnb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            bearer: Some(token.into()),
            idle_timeout: MEDIA_IDLE_TIMEOUT,
        })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = check_response(request.send().await?, url).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let stream = response.bytes_stream();
        futures_util::pin_mut!(stream);
        let mut written = 0u64;
        while let Some(chunk) = next_chunk(&mut stream, self.idle_timeout).await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Next body chunk, failing if none arrives within `idle`
async fn next_chunk<S, B, E>(stream: &mut S, idle: Duration) -> Result<Option<B>, TransportError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    TransportError: From<E>,
{
    match tokio::time::timeout(idle, stream.next()).await {
        Ok(Some(chunk)) => Ok(Some(chunk?)),
        Ok(None) => Ok(None),
        Err(_) => Err(TransportError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no data received for {:?}", idle),
        ))),
    }
}

/// Uploads files into storage folders without clobbering or duplicating
pub struct DedupUploader {
    storage: Arc<dyn StorageTransport>,
    fetcher: Arc<dyn ContentFetcher>,
    match_renamed: bool,
}

impl DedupUploader {
    pub fn new(storage: Arc<dyn StorageTransport>, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            storage,
            fetcher,
            match_renamed: false,
        }
    }

    /// Also treat a same-size `name (N).ext` as already present
    ///
    /// Off by default. With it on, a redelivered event whose first upload
    /// was renamed is skipped instead of landing as `name (N+1).ext`.
    pub fn with_match_renamed(mut self, enabled: bool) -> Self {
        self.match_renamed = enabled;
        self
    }

    /// Upload `content` into `folder` as `desired_name`, avoiding overwrites
    ///
    /// Never returns an error: every failure becomes an outcome with
    /// `ok == false` and a message suitable for the room.
    pub async fn upload(
        &self,
        folder: &str,
        desired_name: &str,
        content: ContentSource,
    ) -> UploadOutcome {
        let folder = normalize_folder(folder);

        let listing = match self.storage.list_folder(&folder).await {
            Ok(listing) => listing,
            Err(e) => return UploadOutcome::failure(format!("error accessing folder: {folder} {e}")),
        };

        // The scratch file lives until this function returns
        let (local, _scratch) = match content {
            ContentSource::Local(path) => (path, None),
            ContentSource::Remote(url) => match self.fetch_to_scratch(&url).await {
                Ok(scratch) => (scratch.path().to_path_buf(), Some(scratch)),
                Err(e) => return UploadOutcome::failure(format!("error fetching file: {url} {e}")),
            },
        };

        let size = match tokio::fs::metadata(&local).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return UploadOutcome::failure(format!(
                    "error reading file: {} {e}",
                    local.display()
                ))
            }
        };

        let name = sanitize_name(desired_name);
        let decision = if self.match_renamed {
            decide_matching_renames(&listing, &name, size)
        } else {
            decide(&listing, &name, size)
        };
        let resolved = match decision {
            UploadDecision::Skip(existing) => {
                debug!("{}/{} already present ({} bytes)", folder, existing, size);
                return UploadOutcome::success(format!("file already present: {existing}"));
            }
            UploadDecision::Rename(renamed) => {
                debug!("{} is taken in {}, using {}", name, folder, renamed);
                renamed
            }
            UploadDecision::Upload => name,
        };

        let target = join_path(&folder, &resolved);
        if let Err(e) = self.storage.upload_file(&local, &target).await {
            return UploadOutcome::failure(format!("error uploading file: {target} {e}"));
        }

        info!("Uploaded {} ({} bytes)", target, size);
        UploadOutcome::success(format!(
            "file upload ok: {target} ({:.2} MiB)",
            size as f64 / 1024.0 / 1024.0
        ))
    }

    async fn fetch_to_scratch(&self, url: &str) -> Result<NamedTempFile, TransportError> {
        let scratch = NamedTempFile::new()?;
        let bytes = self.fetcher.fetch(url, scratch.path()).await?;
        debug!("Fetched {} bytes from {}", bytes, url);
        Ok(scratch)
    }
}

/// Decide how to store a file of `size` bytes named `name` in a folder
/// whose current contents are `listing`
///
/// Only a same-size file under exactly `name` is a Skip. Otherwise the
/// first free `name (N).ext` is used.
pub fn decide(listing: &[RemoteEntry], name: &str, size: u64) -> UploadDecision {
    resolve(listing, name, size, false)
}

/// Like [`decide`], but a rename candidate holding a same-size file is
/// taken as the earlier upload of this content
pub fn decide_matching_renames(listing: &[RemoteEntry], name: &str, size: u64) -> UploadDecision {
    resolve(listing, name, size, true)
}

fn resolve(listing: &[RemoteEntry], name: &str, size: u64, match_renamed: bool) -> UploadDecision {
    let taken: HashMap<&str, &RemoteEntry> =
        listing.iter().map(|e| (e.name.as_str(), e)).collect();

    let is_same = |entry: &RemoteEntry| !entry.is_dir && entry.size == size;

    match taken.get(name) {
        None => return UploadDecision::Upload,
        Some(entry) if is_same(entry) => return UploadDecision::Skip(name.to_string()),
        Some(_) => {}
    }

    let (base, ext) = split_extension(name);
    // At most listing.len() candidates can be taken, so this terminates
    let mut n = 1usize;
    loop {
        let candidate = format!("{base} ({n}){ext}");
        match taken.get(candidate.as_str()) {
            None => return UploadDecision::Rename(candidate),
            Some(entry) if match_renamed && is_same(entry) => {
                return UploadDecision::Skip(candidate)
            }
            Some(_) => n += 1,
        }
    }
}

/// Split `name` into base and extension (`"a.tar.gz"` -> `("a.tar", ".gz")`)
///
/// Leading dots do not start an extension, so `".bashrc"` has none.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if name[..i].chars().any(|c| c != '.') => name.split_at(i),
        _ => (name, ""),
    }
}

/// Make a sender-chosen name safe to use as a single path segment
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => "upload".to_string(),
        _ => cleaned.to_string(),
    }
}

/// `/Photos/` -> `/Photos`, `Photos` -> `/Photos`, `/` stays `/`
fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    format!("/{trimmed}")
}

fn join_path(folder: &str, name: &str) -> String {
    if folder.ends_with('/') {
        format!("{folder}{name}")
    } else {
        format!("{folder}/{name}")
    }
}

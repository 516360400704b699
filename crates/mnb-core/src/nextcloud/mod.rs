//! Remote file storage
//!
//! The uploader only needs two calls from the storage side: list one
//! folder and upload one file. [`StorageTransport`] is that seam;
//! [`NextcloudClient`] implements it over WebDAV.

mod webdav;

pub use webdav::NextcloudClient;

use std::path::Path;

use async_trait::async_trait;

use crate::error::TransportError;

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File name, already percent-decoded
    pub name: String,
    /// Size in bytes (0 for folders)
    pub size: u64,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_dir: true,
        }
    }
}

#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// Direct children of `folder` (an absolute path below the user root)
    async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    /// Upload the file at `local` to the absolute remote path `target`
    async fn upload_file(&self, local: &Path, target: &str) -> Result<(), TransportError>;
}

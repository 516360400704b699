//! Nextcloud WebDAV client
//!
//! Files live below `<server>/remote.php/dav/files/<user>/`. Listing is a
//! depth-1 `PROPFIND`; uploading is a streamed `PUT`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Method;
use tracing::debug;

use super::{RemoteEntry, StorageTransport};
use crate::config::NextcloudConfig;
use crate::error::{check_response, TransportError};

/// Request timeout for listing and uploading
const REQUEST_TIMEOUT: u64 = 300;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
  </d:prop>
</d:propfind>"#;

/// WebDAV client for one Nextcloud account
pub struct NextcloudClient {
    http: reqwest::Client,
    /// `<server>/remote.php/dav/files/<user>`
    files_root: String,
    user: String,
    password: String,
}

impl NextcloudClient {
    pub fn new(config: &NextcloudConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .user_agent(concat!("mnb/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let files_root = format!(
            "{}/remote.php/dav/files/{}",
            config.server.trim_end_matches('/'),
            urlencoding::encode(&config.user)
        );

        Ok(Self {
            http,
            files_root,
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.files_root, encode_path(path))
    }
}

#[async_trait]
impl StorageTransport for NextcloudClient {
    async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let url = self.url_for(folder);
        debug!("PROPFIND {}", url);

        let method = Method::from_bytes(b"PROPFIND").map_err(|e| TransportError::Decode {
            endpoint: url.clone(),
            details: e.to_string(),
        })?;
        let response = self
            .http
            .request(method, &url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await?;
        let response = check_response(response, folder).await?;
        let body = response.text().await?;

        // The first response describes the folder itself
        let entries = parse_multistatus(&body).map_err(|details| TransportError::Decode {
            endpoint: folder.to_string(),
            details,
        })?;
        Ok(entries.into_iter().skip(1).collect())
    }

    async fn upload_file(&self, local: &Path, target: &str) -> Result<(), TransportError> {
        let url = self.url_for(target);
        let file = tokio::fs::File::open(local).await?;
        let len = file.metadata().await?.len();
        debug!("PUT {} ({} bytes)", url, len);

        let response = self
            .http
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_LENGTH, len)
            .body(file)
            .send()
            .await?;
        check_response(response, target).await?;
        Ok(())
    }
}

/// Percent-encode each segment of an absolute remote path
fn encode_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Last decoded segment of a multistatus `href`
fn name_from_href(href: &str) -> String {
    let last = href.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    match urlencoding::decode(last) {
        Ok(name) => name.into_owned(),
        Err(_) => last.to_string(),
    }
}

#[derive(Default)]
struct PendingEntry {
    href: Option<String>,
    size: Option<u64>,
    is_dir: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Href,
    ContentLength,
}

/// Parse a `207 Multi-Status` body into entries, in document order
fn parse_multistatus(xml: &str) -> Result<Vec<RemoteEntry>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PendingEntry> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            XmlEvent::Start(e) => match e.local_name().as_ref() {
                b"response" => current = Some(PendingEntry::default()),
                b"href" => field = Field::Href,
                b"getcontentlength" => field = Field::ContentLength,
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
                _ => {}
            },
            XmlEvent::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
            }
            XmlEvent::Text(text) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                let value = text.unescape().map_err(|e| e.to_string())?;
                match field {
                    Field::Href => entry.href = Some(value.into_owned()),
                    Field::ContentLength => entry.size = value.trim().parse().ok(),
                    Field::None => {}
                }
            }
            XmlEvent::End(e) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        let href = entry
                            .href
                            .ok_or_else(|| "response without href".to_string())?;
                        entries.push(RemoteEntry {
                            name: name_from_href(&href),
                            size: entry.size.unwrap_or(0),
                            is_dir: entry.is_dir,
                        });
                    }
                }
                b"href" | b"getcontentlength" => field = Field::None,
                _ => {}
            },
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

//! Matrix client-server API client
//!
//! Password login, long-poll `/sync`, and the handful of room calls the
//! bridge makes. Every request carries the access token from login.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{parse_sync_response, ChatTransport, SyncBatch};
use crate::config::MatrixConfig;
use crate::cursor::Cursor;
use crate::error::{check_response, TransportError};
use crate::uploader::HttpFetcher;

/// Timeout for everything except the long-poll
const REQUEST_TIMEOUT: u64 = 30;

/// Slack added on top of the long-poll wait before giving up on `/sync`
const SYNC_TIMEOUT_MARGIN: u64 = 30;

/// Only message events are needed from the timeline
const SYNC_FILTER: &str = r#"{"presence":{"types":[]},"account_data":{"types":[]},"room":{"timeline":{"types":["m.room.message"]},"ephemeral":{"types":[]},"state":{"lazy_load_members":true}}}"#;

#[derive(Deserialize)]
struct LoginResponse {
    user_id: String,
    access_token: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Deserialize)]
struct JoinResponse {
    room_id: String,
}

/// Logged-in Matrix session
pub struct MatrixClient {
    http: reqwest::Client,
    homeserver: String,
    user_id: String,
    access_token: String,
}

impl MatrixClient {
    /// Log in with the configured password
    pub async fn login(config: &MatrixConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .user_agent(concat!("mnb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let homeserver = config.homeserver.trim_end_matches('/').to_string();

        let endpoint = "/_matrix/client/v3/login";
        let body = json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": config.user_id},
            "password": config.password,
            "initial_device_display_name": config.device_name,
        });
        let response = http
            .post(format!("{homeserver}{endpoint}"))
            .json(&body)
            .send()
            .await?;
        let response = check_response(response, endpoint).await?;
        let login: LoginResponse = response.json().await.map_err(|e| TransportError::Decode {
            endpoint: endpoint.to_string(),
            details: e.to_string(),
        })?;

        info!(
            "Logged in to {} as {} (device {})",
            homeserver,
            login.user_id,
            login.device_id.as_deref().unwrap_or("-")
        );

        Ok(Self {
            http,
            homeserver,
            user_id: login.user_id,
            access_token: login.access_token,
        })
    }

    /// Fetcher that downloads media with this session's token
    ///
    /// It gets its own HTTP client; the API client's request timeout would
    /// cut off large downloads.
    pub fn media_fetcher(&self) -> Result<HttpFetcher, TransportError> {
        HttpFetcher::with_bearer(self.access_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.homeserver, path)
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, TransportError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        check_response(response, path).await
    }
}

#[async_trait]
impl ChatTransport for MatrixClient {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn sync_next(
        &self,
        cursor: Option<&Cursor>,
        wait_ms: u64,
    ) -> Result<SyncBatch, TransportError> {
        let endpoint = "/_matrix/client/v3/sync";
        let mut request = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_millis(wait_ms) + Duration::from_secs(SYNC_TIMEOUT_MARGIN))
            .query(&[("filter", SYNC_FILTER)])
            .query(&[("timeout", wait_ms)]);
        if let Some(cursor) = cursor {
            request = request.query(&[("since", cursor.as_str())]);
        }

        let response = check_response(request.send().await?, endpoint).await?;
        let body = response.text().await?;
        let batch =
            parse_sync_response(&body, &self.user_id).map_err(|e| TransportError::Decode {
                endpoint: endpoint.to_string(),
                details: e.to_string(),
            })?;

        debug!(
            "Sync returned {} events, next_batch={}",
            batch.events.len(),
            batch.next_batch
        );
        Ok(batch)
    }

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError> {
        let path = format!("/_matrix/client/v3/join/{}", urlencoding::encode(room_id));
        let response = self.post_json(&path, json!({})).await?;
        let joined: JoinResponse = response.json().await.map_err(|e| TransportError::Decode {
            endpoint: path.clone(),
            details: e.to_string(),
        })?;
        info!("Joined {}", joined.room_id);
        Ok(())
    }

    async fn send_message(&self, room_id: &str, body: &str) -> Result<(), TransportError> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let path = format!(
            "/_matrix/client/v3/rooms/{}/send/m.room.message/{}",
            urlencoding::encode(room_id),
            txn_id
        );

        let response = self
            .http
            .put(self.url(&path))
            .bearer_auth(&self.access_token)
            .json(&json!({"msgtype": "m.notice", "body": body}))
            .send()
            .await?;
        check_response(response, &path).await?;
        Ok(())
    }

    async fn mark_read(&self, room_id: &str, event_id: &str) -> Result<(), TransportError> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/receipt/m.read/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(event_id)
        );
        self.post_json(&path, json!({})).await?;
        Ok(())
    }

    fn resolve_media_url(&self, media_ref: &str) -> Result<String, TransportError> {
        let (server, media_id) = parse_mxc(media_ref)?;
        Ok(self.url(&format!(
            "/_matrix/client/v1/media/download/{}/{}",
            urlencoding::encode(server),
            urlencoding::encode(media_id)
        )))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<String, TransportError> {
        let path = format!(
            "/_matrix/client/v3/directory/room/{}",
            urlencoding::encode(alias)
        );
        let response = self
            .http
            .get(self.url(&path))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let response = check_response(response, &path).await?;
        let resolved: JoinResponse = response.json().await.map_err(|e| TransportError::Decode {
            endpoint: path.clone(),
            details: e.to_string(),
        })?;
        Ok(resolved.room_id)
    }
}

/// Split `mxc://server/media-id` into its two parts
fn parse_mxc(media_ref: &str) -> Result<(&str, &str), TransportError> {
    media_ref
        .strip_prefix("mxc://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(server, id)| !server.is_empty() && !id.is_empty() && !id.contains('/'))
        .ok_or_else(|| TransportError::InvalidMediaRef(media_ref.to_string()))
}

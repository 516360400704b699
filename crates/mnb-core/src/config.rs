//! Bridge configuration
//!
//! Configuration is loaded from:
//! 1. Config file (~/.config/mnb/config.toml, or MNB_CONFIG)
//! 2. Environment variables (MNB_* prefix)
//!
//! Environment variables take precedence over config file values. The
//! result is validated once; the rest of the bridge only sees typed fields.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment variable prefix
const ENV_PREFIX: &str = "MNB";

/// Placeholder printed instead of secrets
const REDACTED: &str = "<redacted>";

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for persisted state (sync cursor)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Matrix account the bridge logs in as
    pub matrix: MatrixConfig,

    /// Nextcloud account the bridge uploads with
    pub nextcloud: NextcloudConfig,

    /// Behaviour of the event handlers
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Long-poll pacing
    #[serde(default)]
    pub sync: SyncConfig,

    /// Room to folder mappings
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
}

/// Matrix homeserver and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Homeserver base URL, e.g. `https://matrix.example.org`
    pub homeserver: String,
    /// Full user id, e.g. `@bot:example.org`
    pub user_id: String,
    #[serde(default)]
    pub password: String,
    /// Display name for the device created at login
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

/// Nextcloud server and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextcloudConfig {
    /// Server base URL, e.g. `https://cloud.example.org`
    pub server: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Message posted after joining a room
    #[serde(default)]
    pub welcome_message: Option<String>,

    /// Send read receipts for events skipped because they predate the join
    #[serde(default = "default_true")]
    pub mark_read_suppressed: bool,

    /// Treat a same-size `name (N).ext` as an earlier upload of the file
    #[serde(default)]
    pub match_renamed_duplicates: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            welcome_message: None,
            mark_read_suppressed: true,
            match_renamed_duplicates: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Long-poll wait passed to the homeserver
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay before retrying after a failed sync request
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Pause between iterations, even when the long-poll returns at once
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,

    /// On a cold start, do not act on the room history in the first batch
    #[serde(default = "default_true")]
    pub skip_backlog: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            pause_ms: default_pause_ms(),
            skip_backlog: true,
        }
    }
}

/// Mapping from one room to a Nextcloud folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Canonical alias (`#room:server`) or room id (`!id:server`)
    pub room: String,
    /// Absolute folder below the Nextcloud user's root
    pub folder: String,
    /// Bridge `m.image` attachments
    #[serde(default = "default_true")]
    pub images: bool,
    /// Bridge `m.file` attachments
    #[serde(default)]
    pub files: bool,
}

impl Config {
    /// Load configuration from the default location and environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Unlike an interactive app there are no usable defaults for the
    /// credentials, so a missing file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.apply_env_overrides();
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // MNB_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // MNB_MATRIX_PASSWORD
        if let Ok(val) = std::env::var(format!("{}_MATRIX_PASSWORD", ENV_PREFIX)) {
            self.matrix.password = val;
        }

        // MNB_NEXTCLOUD_PASSWORD
        if let Ok(val) = std::env::var(format!("{}_NEXTCLOUD_PASSWORD", ENV_PREFIX)) {
            self.nextcloud.password = val;
        }

        self.data_dir = expand_home(&self.data_dir);
    }

    /// Check the configuration once so later code can rely on it
    pub fn validate(&self) -> Result<()> {
        if self.matrix.homeserver.trim().is_empty() {
            bail!("matrix.homeserver must be set");
        }
        if !is_user_id(&self.matrix.user_id) {
            bail!(
                "matrix.user_id '{}' must look like @user:server",
                self.matrix.user_id
            );
        }
        if self.nextcloud.server.trim().is_empty() {
            bail!("nextcloud.server must be set");
        }
        if self.nextcloud.user.trim().is_empty() {
            bail!("nextcloud.user must be set");
        }

        let mut seen = HashSet::new();
        for room in &self.rooms {
            if !(room.room.starts_with('#') || room.room.starts_with('!')) {
                bail!(
                    "room '{}' must be an alias (#room:server) or a room id (!id:server)",
                    room.room
                );
            }
            if !seen.insert(room.room.as_str()) {
                bail!("room '{}' is configured more than once", room.room);
            }
            if !room.folder.starts_with('/') {
                bail!(
                    "folder '{}' for room '{}' must be an absolute path",
                    room.folder,
                    room.room
                );
            }
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Copy of the configuration with passwords replaced, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.matrix.password.is_empty() {
            config.matrix.password = REDACTED.to_string();
        }
        if !config.nextcloud.password.is_empty() {
            config.nextcloud.password = REDACTED.to_string();
        }
        config
    }

    /// Get the config file path
    ///
    /// Can be overridden with MNB_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mnb")
            .join("config.toml")
    }

    /// Get the path to the persisted sync cursor
    pub fn cursor_path(&self) -> PathBuf {
        self.data_dir.join("cursor.json")
    }
}

/// `@local:server` with both parts non-empty
fn is_user_id(value: &str) -> bool {
    match value.strip_prefix('@').and_then(|rest| rest.split_once(':')) {
        Some((local, server)) => !local.is_empty() && !server.is_empty(),
        None => false,
    }
}

/// Replace a leading `~` with the home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mnb")
}

fn default_device_name() -> String {
    "mnb".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

fn default_pause_ms() -> u64 {
    250
}

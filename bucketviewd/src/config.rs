use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bucketview_core::{Credentials, S3Config};
use serde::{Deserialize, Serialize};

use crate::sync::records::UrlBase;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_POLL_SECS: u64 = 15;
const DEFAULT_MOVE_GRACE_MS: u64 = 1000;
const CONFIG_DIR_NAME: &str = "bucketview";
const CONFIG_FILE_NAME: &str = "settings.json";
const CACHE_DIR_NAME: &str = "bucketview";
const REDACTED: &str = "<redacted>";

/// Optional settings file. Every field falls back to the environment first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub path_style: Option<bool>,
    pub public_url_base: Option<String>,
    pub poll_secs: Option<u64>,
    pub move_grace_ms: Option<u64>,
    pub cache_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    pub bucket: Option<String>,
    pub path_style: bool,
    pub public_url_base: Option<String>,
    pub poll_interval: Duration,
    pub move_grace: Duration,
    pub config_file: Option<PathBuf>,
    /// Where the last successful listing is kept between runs. `None`
    /// disables the listing cache.
    pub cache_dir: Option<PathBuf>,
}

/// Everything needed to talk to one bucket.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub credentials: Credentials,
    pub region: String,
    pub bucket: String,
    pub path_style: bool,
    pub public_url_base: Option<String>,
}

impl StorageSettings {
    pub fn s3_config(&self) -> S3Config {
        S3Config {
            region: self.region.clone(),
            path_style: self.path_style,
            ..S3Config::new(self.endpoint.clone(), self.credentials.clone())
        }
    }

    pub fn url_base(&self) -> UrlBase {
        UrlBase {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            public_base: self.public_url_base.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    pub bucket: Option<String>,
    pub path_style: bool,
    pub public_url_base: Option<String>,
    pub poll_secs: u64,
    pub move_grace_ms: u64,
    pub config_file: Option<String>,
    pub cache_dir: Option<String>,
    pub configured: bool,
}

impl Settings {
    /// Reads the environment (after `.env`) and the optional settings file.
    pub fn load() -> anyhow::Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        let config_file = std::env::var("BUCKETVIEW_CONFIG")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .or_else(default_config_path);
        let file = match config_file.as_deref() {
            Some(path) => read_settings_file(path)?,
            None => FileSettings::default(),
        };
        let mut settings = Self::from_sources(|name| std::env::var(name).ok(), file);
        settings.cache_dir = settings
            .cache_dir
            .map(|dir| expand_with_home(&dir.to_string_lossy(), &home))
            .or_else(default_cache_dir);
        settings.config_file = config_file;
        Ok(settings)
    }

    pub fn from_sources(env: impl Fn(&str) -> Option<String>, file: FileSettings) -> Self {
        let text = |name: &str, fallback: Option<String>| {
            env(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or(fallback.filter(|value| !value.is_empty()))
        };
        let poll_secs = parse_u64(
            env("BUCKETVIEW_POLL_SECS"),
            file.poll_secs
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_POLL_SECS),
        );
        let move_grace_ms = parse_u64(
            env("BUCKETVIEW_MOVE_GRACE_MS"),
            file.move_grace_ms
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MOVE_GRACE_MS),
        );

        Self {
            endpoint: text("BUCKETVIEW_ENDPOINT", file.endpoint),
            access_key_id: text("BUCKETVIEW_ACCESS_KEY_ID", file.access_key_id),
            secret_access_key: text("BUCKETVIEW_SECRET_ACCESS_KEY", file.secret_access_key),
            region: text("BUCKETVIEW_REGION", file.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: text("BUCKETVIEW_BUCKET", file.bucket),
            path_style: parse_bool(
                env("BUCKETVIEW_PATH_STYLE"),
                file.path_style.unwrap_or(true),
            ),
            public_url_base: text("BUCKETVIEW_PUBLIC_URL_BASE", file.public_url_base),
            poll_interval: Duration::from_secs(poll_secs),
            move_grace: Duration::from_millis(move_grace_ms),
            config_file: None,
            cache_dir: text("BUCKETVIEW_CACHE_DIR", file.cache_dir).map(PathBuf::from),
        }
    }

    /// `None` unless endpoint, both keys and a bucket are all present.
    pub fn storage(&self) -> Option<StorageSettings> {
        Some(StorageSettings {
            endpoint: self.endpoint.clone()?,
            credentials: Credentials::new(
                self.access_key_id.clone()?,
                self.secret_access_key.clone()?,
            ),
            region: self.region.clone(),
            bucket: self.bucket.clone()?,
            path_style: self.path_style,
            public_url_base: self.public_url_base.clone(),
        })
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self
                .secret_access_key
                .as_ref()
                .map(|_| REDACTED.to_string()),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            path_style: self.path_style,
            public_url_base: self.public_url_base.clone(),
            poll_secs: self.poll_interval.as_secs(),
            move_grace_ms: self.move_grace.as_millis() as u64,
            config_file: self
                .config_file
                .as_ref()
                .map(|path| path.display().to_string()),
            cache_dir: self
                .cache_dir
                .as_ref()
                .map(|path| path.display().to_string()),
            configured: self.storage().is_some(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(CACHE_DIR_NAME))
}

/// A missing file is an empty one; a malformed file is an error.
pub fn read_settings_file(path: &Path) -> anyhow::Result<FileSettings> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileSettings::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    serde_json::from_str(&raw).with_context(|| format!("invalid settings file {}", path.display()))
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn parse_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

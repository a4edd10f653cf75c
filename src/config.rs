//! Application configuration.
//!
//! Every value is resolved once at startup with priority
//! `config.toml` > environment (`.env` is loaded first) > default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::paths;

// ==================== Defaults ====================

/// Server address to bind to
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0";

/// Server port
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Subtracted from the refresh interval when deciding staleness
pub const DEFAULT_STALENESS_BUFFER: Duration = Duration::from_secs(2);

/// Subtracted from the nominal credential expiry
pub const DEFAULT_CREDENTIAL_BUFFER: Duration = crate::auth::DEFAULT_CREDENTIAL_BUFFER;

/// Deadline for opening a session from the HTTP layer
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout for the remote services
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_SIGN_IN_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
pub const DEFAULT_SNAPSHOT_URL: &str = "https://srs-db-presigned-url-service-api.migaku.com/db-force-sync-download-url";
pub const DEFAULT_SYNC_URL: &str = "https://core-server-mohegkboza-uc.a.run.app";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to parse config.toml: {0}")]
    Toml(#[from] toml::de::Error),
}

// ==================== Resolved configuration ====================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    /// `["*"]` allows any origin
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub refresh_interval: Duration,
    pub staleness_buffer: Duration,
    pub credential_buffer: Duration,
    pub login_timeout: Duration,
    /// Run the timer-driven refresh loop next to the read path
    pub background_refresh: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_CACHE_TTL,
            staleness_buffer: DEFAULT_STALENESS_BUFFER,
            credential_buffer: DEFAULT_CREDENTIAL_BUFFER,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            background_refresh: true,
        }
    }
}

/// Endpoints of the remote identity, snapshot and sync services.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_key: String,
    pub sign_in_url: String,
    pub token_url: String,
    pub snapshot_url: String,
    pub sync_url: String,
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            sign_in_url: DEFAULT_SIGN_IN_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            snapshot_url: DEFAULT_SNAPSHOT_URL.to_string(),
            sync_url: DEFAULT_SYNC_URL.to_string(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cache_ttl: Duration,
    pub session: SessionConfig,
    pub data_dir: PathBuf,
    pub remote: RemoteConfig,
}

// ==================== config.toml ====================

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server: Option<FileServer>,
    cache: Option<FileCache>,
    session: Option<FileSession>,
    data: Option<FileData>,
    remote: Option<FileRemote>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    addr: Option<String>,
    port: Option<u16>,
    cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCache {
    ttl: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileSession {
    refresh_interval: Option<String>,
    staleness_buffer: Option<String>,
    credential_buffer: Option<String>,
    login_timeout: Option<String>,
    background_refresh: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileData {
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRemote {
    api_key: Option<String>,
    sign_in_url: Option<String>,
    token_url: Option<String>,
    snapshot_url: Option<String>,
    sync_url: Option<String>,
    timeout: Option<String>,
}

/// Load configuration with priority: config.toml > .env/env > default
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let contents = std::fs::read_to_string(&path).ok();
    if contents.is_some() {
        tracing::info!("Using configuration from {}", path);
    }
    resolve(contents.as_deref(), |key| std::env::var(key).ok())
}

/// Resolve a configuration from optional toml text and an env lookup.
pub fn resolve(toml_text: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
    let file: FileConfig = match toml_text {
        Some(text) => toml::from_str(text)?,
        None => FileConfig::default(),
    };
    let server = file.server.unwrap_or_default();
    let cache = file.cache.unwrap_or_default();
    let session = file.session.unwrap_or_default();
    let data = file.data.unwrap_or_default();
    let remote = file.remote.unwrap_or_default();

    let port = match server.port {
        Some(port) => port,
        None => match env("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            None => DEFAULT_SERVER_PORT,
        },
    };

    let cors_origins = server
        .cors_origins
        .or_else(|| env("CORS_ORIGINS").map(|raw| raw.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect()))
        .filter(|origins: &Vec<String>| !origins.is_empty())
        .unwrap_or_else(|| vec!["*".to_string()]);

    let cache_ttl = duration_setting("CACHE_TTL", cache.ttl, &env)?.unwrap_or(DEFAULT_CACHE_TTL);
    let refresh_interval = duration_setting("REFRESH_INTERVAL", session.refresh_interval, &env)?.unwrap_or(cache_ttl);
    let staleness_buffer = duration_setting("session.staleness_buffer", session.staleness_buffer, &file_only)?
        .unwrap_or(DEFAULT_STALENESS_BUFFER);
    let credential_buffer = duration_setting("session.credential_buffer", session.credential_buffer, &file_only)?
        .unwrap_or(DEFAULT_CREDENTIAL_BUFFER);
    let login_timeout = duration_setting("LOGIN_TIMEOUT", session.login_timeout, &env)?.unwrap_or(DEFAULT_LOGIN_TIMEOUT);
    let background_refresh = match session.background_refresh {
        Some(enabled) => enabled,
        None => match env("BACKGROUND_REFRESH") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid { key: "BACKGROUND_REFRESH", value: raw })?,
            None => true,
        },
    };
    let remote_timeout = duration_setting("REMOTE_TIMEOUT", remote.timeout, &env)?.unwrap_or(DEFAULT_REMOTE_TIMEOUT);

    let data_dir = data
        .dir
        .or_else(|| env("DATA_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(paths::default_data_dir);

    let defaults = RemoteConfig::default();
    let remote = RemoteConfig {
        api_key: remote.api_key.or_else(|| env("REMOTE_API_KEY")).unwrap_or(defaults.api_key),
        sign_in_url: remote.sign_in_url.or_else(|| env("REMOTE_SIGN_IN_URL")).unwrap_or(defaults.sign_in_url),
        token_url: remote.token_url.or_else(|| env("REMOTE_TOKEN_URL")).unwrap_or(defaults.token_url),
        snapshot_url: remote.snapshot_url.or_else(|| env("REMOTE_SNAPSHOT_URL")).unwrap_or(defaults.snapshot_url),
        sync_url: remote.sync_url.or_else(|| env("REMOTE_SYNC_URL")).unwrap_or(defaults.sync_url),
        timeout: remote_timeout,
    };

    Ok(Config {
        server: ServerConfig {
            addr: server.addr.or_else(|| env("SERVER_ADDR")).unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
            port,
            cors_origins,
        },
        cache_ttl,
        session: SessionConfig {
            refresh_interval,
            staleness_buffer,
            credential_buffer,
            login_timeout,
            background_refresh,
        },
        data_dir,
        remote,
    })
}

/// Environment lookup that finds nothing; used for settings without an
/// environment variable and for resolving from the file alone.
pub fn file_only(_key: &str) -> Option<String> {
    None
}

fn duration_setting(
    key: &'static str,
    from_file: Option<String>,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Duration>, ConfigError> {
    match from_file.or_else(|| env(key)) {
        None => Ok(None),
        Some(raw) => parse_duration(&raw)
            .map(Some)
            .ok_or(ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `500ms`, `10s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}

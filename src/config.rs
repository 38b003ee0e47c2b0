//! Configuration loading and validation.

use crate::conversation::MergeOrder;
use crate::error::{ConfigError, Result};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Docchat configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST API (history, upload, conversation summaries).
    pub api_base_url: String,

    /// URL of the live channel endpoint (`ws://` or `wss://`).
    pub channel_url: String,

    /// Timeout applied to every REST request.
    pub request_timeout: Duration,

    /// Conversation behavior settings.
    pub chat: ChatConfig,
}

/// Conversation behavior configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChatConfig {
    /// Maximum number of history messages requested when a conversation opens.
    pub history_limit: u32,

    /// How long to wait for `chat:joined` before re-emitting the join.
    pub join_timeout: Duration,

    /// Join re-emissions before the join is reported as failed.
    pub join_retries: u32,

    /// How long an outbound message may stay unconfirmed before it is reported undelivered.
    pub pending_timeout: Duration,

    /// Rendering order of merged messages.
    pub merge_order: MergeOrder,

    /// Capacity of the inbound event fan-out buffer.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            join_timeout: Duration::from_secs(10),
            join_retries: 1,
            pending_timeout: Duration::from_secs(30),
            merge_order: MergeOrder::Arrival,
            event_buffer: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            channel_url: "ws://localhost:5000/ws".into(),
            request_timeout: Duration::from_secs(30),
            chat: ChatConfig::default(),
        }
    }
}

/// On-disk TOML shape. Every key is optional; missing keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    api_url: Option<String>,
    channel_url: Option<String>,
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    chat: TomlChatConfig,
}

#[derive(Debug, Default, Deserialize)]
struct TomlChatConfig {
    history_limit: Option<u32>,
    join_timeout_secs: Option<u64>,
    join_retries: Option<u32>,
    pending_timeout_secs: Option<u64>,
    merge_order: Option<MergeOrder>,
    event_buffer: Option<usize>,
}

impl Config {
    /// Load configuration from the default config file (if present) and environment.
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => Self::from_sources(TomlConfig::default(), |key| std::env::var(key).ok()),
        }
    }

    /// Load from a specific TOML file, with environment variables taking precedence.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        let file: TomlConfig = toml::from_str(&raw).map_err(|error| ConfigError::Parse {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// `$XDG_CONFIG_HOME/docchat/config.toml` or the platform equivalent.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docchat").join("config.toml"))
    }

    fn from_sources(file: TomlConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ChatConfig::default();

        let api_base_url = env("DOCCHAT_API_URL")
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.into());
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let channel_url = match env("DOCCHAT_CHANNEL_URL").or(file.channel_url) {
            Some(url) => url,
            None => derive_channel_url(&api_base_url)?,
        };

        let request_timeout = Duration::from_secs(
            parse_env(&env, "DOCCHAT_REQUEST_TIMEOUT_SECS")?
                .or(file.request_timeout_secs)
                .unwrap_or(30),
        );

        let merge_order = match env("DOCCHAT_MERGE_ORDER") {
            Some(value) => value.parse()?,
            None => file.chat.merge_order.unwrap_or(defaults.merge_order),
        };

        let chat = ChatConfig {
            history_limit: parse_env(&env, "DOCCHAT_HISTORY_LIMIT")?
                .or(file.chat.history_limit)
                .unwrap_or(defaults.history_limit),
            join_timeout: parse_env(&env, "DOCCHAT_JOIN_TIMEOUT_SECS")?
                .or(file.chat.join_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.join_timeout),
            join_retries: parse_env(&env, "DOCCHAT_JOIN_RETRIES")?
                .or(file.chat.join_retries)
                .unwrap_or(defaults.join_retries),
            pending_timeout: parse_env(&env, "DOCCHAT_PENDING_TIMEOUT_SECS")?
                .or(file.chat.pending_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.pending_timeout),
            merge_order,
            event_buffer: parse_env(&env, "DOCCHAT_EVENT_BUFFER")?
                .or(file.chat.event_buffer)
                .unwrap_or(defaults.event_buffer),
        };

        let config = Self {
            api_base_url,
            channel_url,
            request_timeout,
            chat,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let api = reqwest::Url::parse(&self.api_base_url).map_err(|error| {
            ConfigError::Invalid(format!("api url {:?}: {error}", self.api_base_url))
        })?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "api url must be http or https, got {}",
                api.scheme()
            ))
            .into());
        }

        let channel = reqwest::Url::parse(&self.channel_url).map_err(|error| {
            ConfigError::Invalid(format!("channel url {:?}: {error}", self.channel_url))
        })?;
        if !matches!(channel.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "channel url must be ws or wss, got {}",
                channel.scheme()
            ))
            .into());
        }

        if self.chat.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be at least 1".into()).into());
        }
        if self.chat.join_timeout.is_zero() {
            return Err(ConfigError::Invalid("join_timeout must be non-zero".into()).into());
        }
        if self.chat.pending_timeout.is_zero() {
            return Err(ConfigError::Invalid("pending_timeout must be non-zero".into()).into());
        }
        if self.chat.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".into()).into());
        }
        Ok(())
    }
}

/// `http://host/api` becomes `ws://host/ws`; `https` becomes `wss`.
fn derive_channel_url(api_base_url: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(api_base_url)
        .map_err(|error| ConfigError::Invalid(format!("api url {api_base_url:?}: {error}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| ConfigError::Invalid(format!("cannot derive channel url from {api_base_url}")))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url.to_string())
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match env(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::Invalid(format!("{key} has an invalid value: {raw:?}")).into()
        }),
    }
}

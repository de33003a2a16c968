use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const WEBAPP_URL_ENV: &str = "WEBAPP_URL";

const DEFAULT_CHANNEL_ID: &str = "@KronBarsArena";
const DEFAULT_CHANNEL_URL: &str = "https://t.me/KronBarsArena";
const DEFAULT_CHANNEL_TITLE: &str = "KronBarsArena";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TELEGRAM_BOT_TOKEN is not set (neither in the environment nor in [telegram] bot_token)")]
    MissingToken,

    #[error("WEBAPP_URL is not set (neither in the environment nor in [webapp] url)")]
    MissingWebAppUrl,

    #[error("Invalid {field} URL {value:?}: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },

    #[error("Web app URL must use https, got {0}")]
    InsecureWebAppUrl(String),

    #[error("Channel id must be @username or a numeric chat id, got {0:?}")]
    InvalidChannelId(String),
}

/// The channel users must join, as addressed in membership queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelId {
    Username(String),
    Numeric(i64),
}

impl ChannelId {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix('@') {
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Ok(ChannelId::Username(raw.to_string()));
            }
        } else if let Ok(id) = raw.parse::<i64>() {
            return Ok(ChannelId::Numeric(id));
        }
        Err(ConfigError::InvalidChannelId(raw.to_string()))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Username(name) => write!(f, "{}", name),
            ChannelId::Numeric(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub url: Url,
    /// Display name used in the instructional message
    pub title: String,
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub webapp_url: Url,
    pub channel: ChannelConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"<redacted>")
            .field("webapp_url", &self.webapp_url.as_str())
            .field("channel", &self.channel)
            .finish()
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    telegram: TelegramSection,
    #[serde(default)]
    webapp: WebAppSection,
    #[serde(default)]
    channel: ChannelSection,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramSection {
    bot_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WebAppSection {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelSection {
    #[serde(default = "default_channel_id")]
    id: String,
    #[serde(default = "default_channel_url")]
    url: String,
    #[serde(default = "default_channel_title")]
    title: String,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            id: default_channel_id(),
            url: default_channel_url(),
            title: default_channel_title(),
        }
    }
}

fn default_channel_id() -> String {
    DEFAULT_CHANNEL_ID.to_string()
}

fn default_channel_url() -> String {
    DEFAULT_CHANNEL_URL.to_string()
}

fn default_channel_title() -> String {
    DEFAULT_CHANNEL_TITLE.to_string()
}

impl Config {
    /// Load from an optional TOML file, with `TELEGRAM_BOT_TOKEN` and
    /// `WEBAPP_URL` from the process environment taking precedence.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(content: Option<&str>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = match content {
            Some(content) => toml::from_str(content)?,
            None => FileConfig::default(),
        };

        let bot_token = non_blank(env(TOKEN_ENV))
            .or_else(|| non_blank(file.telegram.bot_token))
            .ok_or(ConfigError::MissingToken)?;

        let raw_webapp = non_blank(env(WEBAPP_URL_ENV))
            .or_else(|| non_blank(file.webapp.url))
            .ok_or(ConfigError::MissingWebAppUrl)?;
        let webapp_url = parse_url("web app", &raw_webapp)?;
        if webapp_url.scheme() != "https" {
            return Err(ConfigError::InsecureWebAppUrl(raw_webapp));
        }

        let channel = ChannelConfig {
            id: ChannelId::parse(&file.channel.id)?,
            url: parse_url("channel", &file.channel.url)?,
            title: file.channel.title,
        };

        Ok(Config {
            bot_token,
            webapp_url,
            channel,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}

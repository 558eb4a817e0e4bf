use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lawvina_chat::{
    ChatClientConfig, ChatMode, DEFAULT_BASE_URL, DEFAULT_FLUSH_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_STREAM_IDLE_TIMEOUT, DEFAULT_TRANSPORT_RETRY_COUNT,
};
use serde::Deserialize;

use crate::home::{LawvinaHome, expand_home_path};

pub const BASE_URL_ENV: &str = "LAWVINA_BASE_URL";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_STDOUT: bool = false;
pub const LOG_FILE_NAME: &str = "lawvina.log";

#[derive(Debug, Clone, Default, Deserialize)]
struct LawvinaToml {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    chat: ChatSection,
    #[serde(default)]
    log: LogSection,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServerSection {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    stream_idle_timeout_ms: Option<u64>,
    #[serde(default)]
    transport_retry_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChatSection {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    flush_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LogSection {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    stdout: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub file_path: PathBuf,
    pub level: String,
    pub stdout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub client: ChatClientConfig,
    pub mode: ChatMode,
    /// How often a streaming reply is redrawn.
    pub flush_interval: Duration,
    pub log: LogConfig,
}

pub fn load_app_config(home: &LawvinaHome) -> Result<AppConfig, String> {
    let parsed = read_toml_if_exists::<LawvinaToml>(&home.config_path())?.unwrap_or_default();
    build_app_config(&parsed, home, std::env::var(BASE_URL_ENV).ok())
}

#[cfg(test)]
fn parse_app_config(
    content: &str,
    home: &LawvinaHome,
    base_url_override: Option<String>,
) -> Result<AppConfig, String> {
    let parsed: LawvinaToml =
        toml::from_str(content).map_err(|error| format!("parse config failed: {error}"))?;
    build_app_config(&parsed, home, base_url_override)
}

fn build_app_config(
    parsed: &LawvinaToml,
    home: &LawvinaHome,
    base_url_override: Option<String>,
) -> Result<AppConfig, String> {
    let env_map = &parsed.env;
    let base_url = base_url_override
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            parsed
                .server
                .base_url
                .as_deref()
                .and_then(|value| resolve_config_value(value, env_map))
        })
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let mode = match parsed
        .chat
        .mode
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
    {
        Some(value) => ChatMode::parse(&value).ok_or_else(|| {
            format!("invalid chat mode '{value}', expected one of law_db, web, hybrid")
        })?,
        None => ChatMode::default(),
    };

    let client = ChatClientConfig {
        base_url,
        request_timeout: millis_or(parsed.server.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT),
        stream_idle_timeout: millis_or(
            parsed.server.stream_idle_timeout_ms,
            DEFAULT_STREAM_IDLE_TIMEOUT,
        ),
        transport_retry_count: parsed
            .server
            .transport_retry_count
            .unwrap_or(DEFAULT_TRANSPORT_RETRY_COUNT),
    };

    Ok(AppConfig {
        client,
        mode,
        flush_interval: millis_or(parsed.chat.flush_interval_ms, DEFAULT_FLUSH_INTERVAL),
        log: build_log_config(&parsed.log, env_map, home),
    })
}

fn build_log_config(
    log: &LogSection,
    env_map: &HashMap<String, String>,
    home: &LawvinaHome,
) -> LogConfig {
    let log_dir = log
        .path
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .map(|value| expand_home_path(&value))
        .unwrap_or_else(|| home.log_dir());
    let level = log
        .level
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    LogConfig {
        file_path: log_dir.join(LOG_FILE_NAME),
        level,
        stdout: log.stdout.unwrap_or(DEFAULT_LOG_STDOUT),
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn read_toml_if_exists<T>(path: &Path) -> Result<Option<T>, String>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|error| format!("read {} failed: {error}", path.display()))?;
    let parsed = toml::from_str::<T>(&content)
        .map_err(|error| format!("parse {} failed: {error}", path.display()))?;
    Ok(Some(parsed))
}

/// `$NAME` reads `NAME` from the `[env]` table, then the process environment.
fn resolve_config_value(value: &str, env_map: &HashMap<String, String>) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(env_key) = trimmed.strip_prefix('$') {
        return env_map
            .get(env_key)
            .cloned()
            .or_else(|| std::env::var(env_key).ok())
            .map(|resolved| resolved.trim().to_string())
            .filter(|resolved| !resolved.is_empty());
    }
    Some(trimmed.to_string())
}

// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : lb_tracker_rust — Binance Futures leaderboard position tracker
Module  : config.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Polls tracked leaderboard traders, diffs their open positions,
          pushes opened/closed/listing notifications to Telegram, accepts
          /add /remove /list admin commands, exposes Prometheus metrics.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::time::Duration;
use url::Url;

pub const DEFAULT_IDENTIFIERS_FILE: &str = "user_addresses.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile { path: String, source: dotenvy::Error },
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.into() }
}

/// Format output log
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> LogFormat {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // telegram
    pub bot_token: String,
    pub chat_id: i64,
    pub admins: Vec<i64>,
    pub telegram_api_url: String,
    pub long_poll_timeout: Duration,
    pub poll_retries: u32,
    pub poll_retry_delay: Duration,

    // tracker
    pub identifiers_file: PathBuf,
    pub poll_interval: Duration,
    pub fetch_concurrency: usize,

    // binance
    pub binance_web_url: String,
    pub binance_fapi_url: String,
    pub binance_cookie: Option<String>,
    pub binance_user_agent: Option<String>,
    pub request_timeout: Duration,

    // ops
    pub metrics_port: u16,
    pub log_format: LogFormat,
}

// ---- Validasi (dipakai juga oleh wizard setup) ----

pub fn validate_bot_token(s: &str) -> Result<String, String> {
    let s = s.trim();
    if s.is_empty() || !s.contains(':') {
        return Err("bot token must be non-empty and contain ':'".into());
    }
    Ok(s.to_string())
}

pub fn parse_chat_id(s: &str) -> Result<i64, String> {
    s.trim().parse::<i64>().map_err(|_| format!("`{}` is not an integer chat id", s.trim()))
}

/// `-123456789,123456` -> [-123456789, 123456]; minimal satu admin.
pub fn parse_admins(s: &str) -> Result<Vec<i64>, String> {
    let admins = s
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_chat_id)
        .collect::<Result<Vec<_>, _>>()?;
    if admins.is_empty() {
        return Err("admin list must not be empty".into());
    }
    Ok(admins)
}

fn base_url(key: &'static str, raw: String) -> Result<String, ConfigError> {
    let parsed = Url::parse(&raw).map_err(|e| invalid(key, e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(key, format!("unsupported scheme `{}`", parsed.scheme())));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Baca .env (default atau `env_file`) lalu bangun Settings dari environment proses.
pub fn load(env_file: Option<&Path>, identifiers_override: Option<PathBuf>) -> Result<Settings, ConfigError> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
                path: path.display().to_string(),
                source,
            })?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }
    let mut settings = from_lookup(|k| env::var(k).ok())?;
    if let Some(path) = identifiers_override {
        settings.identifiers_file = path;
    }
    Ok(settings)
}

/// Inti parsing; `get` mengembalikan nilai variabel (kosong dianggap tidak ada).
pub fn from_lookup<F>(get: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let num = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
        match get(key) {
            Some(v) => v.parse::<u64>().map_err(|_| invalid(key, format!("`{v}` is not a number"))),
            None => Ok(default),
        }
    };

    // ===== Telegram =====
    let bot_token = get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
    let bot_token = validate_bot_token(&bot_token).map_err(|r| invalid("TELEGRAM_BOT_TOKEN", r))?;
    let chat_id = get("TELEGRAM_CHAT_ID").ok_or(ConfigError::Missing("TELEGRAM_CHAT_ID"))?;
    let chat_id = parse_chat_id(&chat_id).map_err(|r| invalid("TELEGRAM_CHAT_ID", r))?;
    let admins = get("TELEGRAM_ADMINS").ok_or(ConfigError::Missing("TELEGRAM_ADMINS"))?;
    let admins = parse_admins(&admins).map_err(|r| invalid("TELEGRAM_ADMINS", r))?;
    let telegram_api_url = base_url(
        "TELEGRAM_API_URL",
        get("TELEGRAM_API_URL").unwrap_or_else(|| "https://api.telegram.org".into()),
    )?;

    // ===== Interval & retry =====
    let poll_interval = num("POLL_INTERVAL_SECS", 60)?;
    if poll_interval == 0 {
        return Err(invalid("POLL_INTERVAL_SECS", "must be at least 1"));
    }
    let fetch_concurrency = num("FETCH_CONCURRENCY", 4)?.max(1) as usize;
    let poll_retries = num("POLL_RETRIES", 3)?.clamp(1, u32::MAX as u64) as u32;

    // ===== Binance =====
    let binance_web_url = base_url(
        "BINANCE_WEB_URL",
        get("BINANCE_WEB_URL").unwrap_or_else(|| "https://www.binance.com".into()),
    )?;
    let binance_fapi_url = base_url(
        "BINANCE_FAPI_URL",
        get("BINANCE_FAPI_URL").unwrap_or_else(|| "https://fapi.binance.com".into()),
    )?;

    let metrics_port = match get("METRICS_PORT") {
        Some(v) => v.parse::<u16>().map_err(|_| invalid("METRICS_PORT", format!("`{v}` is not a port")))?,
        None => 9899,
    };

    Ok(Settings {
        bot_token,
        chat_id,
        admins,
        telegram_api_url,
        long_poll_timeout: Duration::from_secs(num("LONG_POLL_TIMEOUT_SECS", 30)?),
        poll_retries,
        poll_retry_delay: Duration::from_secs(num("POLL_RETRY_DELAY_SECS", 5)?),
        identifiers_file: get("IDENTIFIERS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTIFIERS_FILE)),
        poll_interval: Duration::from_secs(poll_interval),
        fetch_concurrency,
        binance_web_url,
        binance_fapi_url,
        binance_cookie: get("BINANCE_COOKIE"),
        binance_user_agent: get("BINANCE_USER_AGENT"),
        request_timeout: Duration::from_secs(num("REQUEST_TIMEOUT_SECS", 15)?),
        metrics_port,
        log_format: get("LOG_FORMAT").map(|v| LogFormat::parse(&v)).unwrap_or(LogFormat::Pretty),
    })
}

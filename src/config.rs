use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const DEFAULT_DB_PATH: &str = "./orioks.db";
const DEFAULT_USERS_FILE: &str = "./users.json";
const DEFAULT_BASE_URL: &str = "https://orioks.miet.ru";

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_ids: Vec<i64>,
    pub send_notifications: bool,
    pub db_path: String,
    pub users_file: PathBuf,
    pub base_url: String,
    pub request_timeout: Duration,
    pub recheck_delay: Duration,
    pub max_concurrent_checks: usize,
    pub images_dir: PathBuf,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bot_token =
            env::var("TELEGRAM_BOT_API_TOKEN").map_err(|_| anyhow!("TELEGRAM_BOT_API_TOKEN must be set in .env file"))?;

        let admin_ids = match env::var("TELEGRAM_ADMIN_IDS_LIST") {
            Ok(raw) => serde_json::from_str::<Vec<i64>>(&raw)
                .context("TELEGRAM_ADMIN_IDS_LIST must be a JSON array of chat ids")?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            bot_token,
            admin_ids,
            send_notifications: env::var("SEND_NOTIFICATIONS").map(|v| v != "false").unwrap_or(true),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            users_file: env::var("USERS_FILE")
                .unwrap_or_else(|_| DEFAULT_USERS_FILE.to_string())
                .into(),
            base_url: env::var("ORIOKS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(parse_or("REQUESTS_TIMEOUT_SECS", 30)),
            recheck_delay: Duration::from_secs(parse_or("RECHECK_DELAY_SECS", 60)),
            max_concurrent_checks: parse_or("MAX_CONCURRENT_CHECKS", 4usize).max(1),
            images_dir: env::var("IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("orioks-monitor")),
        })
    }
}

fn enabled() -> bool {
    true
}

/// One tracked portal account.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub telegram_id: i64,
    pub session_cookie: String,
    #[serde(default = "enabled")]
    pub track_marks: bool,
    #[serde(default = "enabled")]
    pub track_homeworks: bool,
}

pub fn load_users(path: &Path) -> Result<Vec<UserEntry>> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read users file {}", path.display()))?;
    parse_users(&raw).with_context(|| format!("Failed to parse users file {}", path.display()))
}

fn parse_users(raw: &str) -> Result<Vec<UserEntry>> {
    let users: Vec<UserEntry> = serde_json::from_str(raw)?;
    let mut seen = std::collections::HashSet::new();
    for user in &users {
        if !seen.insert(user.telegram_id) {
            anyhow::bail!("user {} is listed more than once", user.telegram_id);
        }
    }
    Ok(users)
}

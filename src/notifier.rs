use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Delivery channel. Failures are reported to the caller, which decides
/// whether they matter.
/// `send_text` bodies are Telegram HTML; image captions are plain text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, user_id: i64, text: &str) -> Result<()>;
    async fn send_image(&self, user_id: i64, image_path: &Path, caption: &str) -> Result<()>;
    async fn notify_admins(&self, text: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
    admin_ids: Vec<i64>,
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, admin_ids: Vec<i64>, enabled: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: format!("{TELEGRAM_API_URL}/bot{bot_token}"),
            admin_ids,
            enabled,
        }
    }

    async fn check_response(resp: reqwest::Response, method: &str) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("Telegram {method} failed: {status} - {body}"))
    }
}

/// Escapes text for Telegram's HTML parse mode, which every `send_text`
/// message uses.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn preview(text: &str) -> String {
    let plain = TAG_RE.replace_all(text, " ");
    let plain = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    if plain.chars().count() > 200 {
        format!("{}...", plain.chars().take(200).collect::<String>())
    } else {
        plain
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, user_id: i64, text: &str) -> Result<()> {
        if !self.enabled {
            tracing::info!(user_id, preview = preview(text), "Sending disabled, text message not sent");
            return Ok(());
        }

        let request = SendMessageRequest {
            chat_id: user_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let resp = self
            .http
            .post(format!("{}/sendMessage", self.api_base))
            .json(&request)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;
        Self::check_response(resp, "sendMessage").await
    }

    async fn send_image(&self, user_id: i64, image_path: &Path, caption: &str) -> Result<()> {
        if !self.enabled {
            tracing::info!(
                user_id,
                image = %image_path.display(),
                preview = preview(caption),
                "Sending disabled, image message not sent"
            );
            return Ok(());
        }

        let bytes = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("Failed to read image {}", image_path.display()))?;
        let file_name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "grade.png".to_string());
        let photo = Part::bytes(bytes).file_name(file_name).mime_str("image/png")?;
        let form = Form::new()
            .text("chat_id", user_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);

        let resp = self
            .http
            .post(format!("{}/sendPhoto", self.api_base))
            .multipart(form)
            .send()
            .await
            .context("Telegram sendPhoto request failed")?;
        Self::check_response(resp, "sendPhoto").await
    }

    async fn notify_admins(&self, text: &str) -> Result<()> {
        if self.admin_ids.is_empty() {
            tracing::warn!(preview = preview(text), "No admins configured, admin alert dropped");
            return Ok(());
        }

        let mut failed = Vec::new();
        for admin_id in &self.admin_ids {
            if let Err(err) = self.send_text(*admin_id, text).await {
                tracing::error!(admin_id, error = %err, "Failed to alert admin");
                failed.push(admin_id.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("admin alert not delivered to {}", failed.join(",")))
        }
    }
}

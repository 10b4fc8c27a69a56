use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use orioks_monitor::check::Tracker;
use orioks_monitor::config::{load_users, Config};
use orioks_monitor::db::Database;
use orioks_monitor::fetcher::{PortalClient, PortalUrls};
use orioks_monitor::logger;
use orioks_monitor::notifier::{escape_html, Notifier, TelegramNotifier};
use orioks_monitor::render::BarRenderer;
use orioks_monitor::runner::{run_user, UserReport};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init_logging()?;

    let config = Config::from_env()?;
    let db = Database::new(&config.db_path).context("Failed to initialize database")?;
    let users = load_users(&config.users_file)?;

    tracing::info!(
        users = users.len(),
        admins = config.admin_ids.len(),
        max_concurrent = config.max_concurrent_checks,
        "Starting ORIOKS check run"
    );
    if !config.send_notifications {
        tracing::info!("Notification sending disabled, messages will only be logged");
    }

    let notifier = Arc::new(TelegramNotifier::new(
        &config.bot_token,
        config.admin_ids.clone(),
        config.send_notifications,
    ));
    let urls = PortalUrls::new(config.base_url.clone());
    let tracker = Tracker::new(
        Arc::new(db),
        notifier.clone(),
        Arc::new(BarRenderer::new(config.images_dir.clone())),
        urls.homework_thread_template(),
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_checks));
    let mut checks = JoinSet::new();

    for user in users {
        let client = match PortalClient::new(urls.clone(), user.session_cookie.clone(), config.request_timeout) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(user_id = user.telegram_id, error = %err, "Failed to build portal client");
                continue;
            }
        };
        let tracker = tracker.clone();
        let notifier = notifier.clone();
        let semaphore = Arc::clone(&semaphore);
        let recheck_delay = config.recheck_delay;

        checks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (user.telegram_id, UserReport::default());
            };
            let report = run_user(&tracker, notifier.as_ref(), &user, &client, recheck_delay).await;
            (user.telegram_id, report)
        });
    }

    let mut failed_users = 0usize;
    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok((user_id, report)) => {
                if !report.failed.is_empty() {
                    failed_users += 1;
                }
                tracing::debug!(user_id, completed = report.completed.len(), failed = report.failed.len(), "User done");
            }
            Err(err) => {
                failed_users += 1;
                tracing::error!(error = %err, "User check task panicked");
                if let Err(alert_err) = notifier
                    .notify_admins(&format!("Задача проверки упала: {}", escape_html(&err.to_string())))
                    .await {
                    tracing::error!(error = %alert_err, "Failed to alert admins");
                }
            }
        }
    }

    tracing::info!(failed_users, "Check run completed");
    Ok(())
}

use std::time::Duration;

use crate::check::{CheckOutcome, Tracker};
use crate::config::UserEntry;
use crate::db::Domain;
use crate::error::CheckError;
use crate::fetcher::Fetcher;
use crate::notifier::{escape_html, Notifier};

/// Runs one check and, if it could not compare safely, runs it once more
/// after `recheck_delay` against the freshly reset baseline.
pub async fn check_with_recheck(
    tracker: &Tracker,
    user_id: i64,
    domain: Domain,
    fetcher: &dyn Fetcher,
    recheck_delay: Duration,
) -> Result<CheckOutcome, CheckError> {
    let outcome = tracker.check(user_id, domain, fetcher).await?;
    if outcome.is_done() {
        return Ok(outcome);
    }

    tracing::info!(user_id, %domain, ?outcome, delay_secs = recheck_delay.as_secs(), "Check inconclusive, re-checking");
    tokio::time::sleep(recheck_delay).await;
    tracker.check(user_id, domain, fetcher).await
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UserReport {
    pub completed: Vec<Domain>,
    pub failed: Vec<Domain>,
}

/// Checks every enabled domain of one user, homework first. Failures go to
/// the admin channel; the user is not told.
pub async fn run_user(
    tracker: &Tracker,
    notifier: &dyn Notifier,
    user: &UserEntry,
    fetcher: &dyn Fetcher,
    recheck_delay: Duration,
) -> UserReport {
    let mut report = UserReport::default();
    let domains = [
        (Domain::Homework, user.track_homeworks),
        (Domain::Marks, user.track_marks),
    ];

    for (domain, enabled) in domains {
        if !enabled {
            continue;
        }
        match check_with_recheck(tracker, user.telegram_id, domain, fetcher, recheck_delay).await {
            Ok(outcome) => {
                tracing::info!(user_id = user.telegram_id, %domain, ?outcome, "Check finished");
                report.completed.push(domain);
            }
            Err(err) => {
                tracing::error!(user_id = user.telegram_id, %domain, kind = err.kind(), error = %err, "Check failed");
                let alert = format!(
                    "Проверка «{domain}» для пользователя {} не удалась ({}): {}",
                    user.telegram_id,
                    err.kind(),
                    escape_html(&err.to_string())
                );
                if let Err(alert_err) = notifier.notify_admins(&alert).await {
                    tracing::error!(error = %alert_err, "Failed to alert admins about failed check");
                }
                report.failed.push(domain);
            }
        }
    }

    report
}

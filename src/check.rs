use std::sync::Arc;

use crate::db::{load_snapshot, save_snapshot, Domain, SnapshotStore};
use crate::error::{CheckError, StructuralMismatch};
use crate::fetcher::{Fetcher, PageKind};
use crate::models::{GradeChanged, HomeworkSnapshot, MarksSnapshot};
use crate::notifier::{escape_html, Notifier};
use crate::render::{GradeCard, RenderedImage, Renderer};
use crate::{homework, marks};

const NEW_SEMESTER_ADMIN_TEXT: &str = "Похоже, что начался новый семестр!";
const NEW_SEMESTER_USER_TEXT: &str = "🎉 Поздравляем с началом нового семестра и желаем успехов в учёбе!";

/// Result of one check of one domain for one user.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// First check for this user: the snapshot became the baseline.
    NoPriorSnapshot,
    /// The homework listing grew or shrank; the baseline was reset.
    LengthMismatch,
    /// Positional comparison was unsafe; the baseline was reset.
    StructuralMismatch { mismatch: StructuralMismatch, new_semester: bool },
    Compared { changes: usize },
}

impl CheckOutcome {
    /// `false` asks the scheduler to check again soon.
    pub fn is_done(&self) -> bool {
        matches!(self, CheckOutcome::Compared { .. })
    }
}

/// Runs the per-domain check pipelines against shared collaborators.
/// Each call is independent; nothing is kept between calls.
#[derive(Clone)]
pub struct Tracker {
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn Renderer>,
    homework_url_template: String,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn Renderer>,
        homework_url_template: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            renderer,
            homework_url_template: homework_url_template.into(),
        }
    }

    pub async fn check(&self, user_id: i64, domain: Domain, fetcher: &dyn Fetcher) -> Result<CheckOutcome, CheckError> {
        match domain {
            Domain::Homework => self.check_homeworks(user_id, fetcher).await,
            Domain::Marks => self.check_marks(user_id, fetcher).await,
        }
    }

    fn persist<T: serde::Serialize + ?Sized>(&self, user_id: i64, domain: Domain, snapshot: &T) -> Result<(), CheckError> {
        save_snapshot(self.store.as_ref(), user_id, domain, snapshot).map_err(CheckError::Store)
    }

    fn load<T: serde::de::DeserializeOwned>(&self, user_id: i64, domain: Domain) -> Result<Option<T>, CheckError> {
        load_snapshot(self.store.as_ref(), user_id, domain).map_err(CheckError::Store)
    }

    pub async fn check_homeworks(&self, user_id: i64, fetcher: &dyn Fetcher) -> Result<CheckOutcome, CheckError> {
        let raw_html = fetcher.fetch(PageKind::HomeworkList).await?;
        let current = homework::parse_homeworks(&raw_html, &self.homework_url_template)?;
        tracing::debug!(user_id, threads = current.len(), "Parsed homework listing");

        let Some(previous) = self.load::<HomeworkSnapshot>(user_id, Domain::Homework)? else {
            self.persist(user_id, Domain::Homework, &current)?;
            tracing::info!(user_id, "No homework baseline yet, saved the current listing");
            return Ok(CheckOutcome::NoPriorSnapshot);
        };

        let changes = match homework::compare(&previous, &current) {
            Ok(changes) => changes,
            Err(mismatch) => {
                self.persist(user_id, Domain::Homework, &current)?;
                tracing::info!(user_id, reason = %mismatch, "Homework listing changed shape, baseline reset");
                return Ok(if mismatch.is_length_mismatch() {
                    CheckOutcome::LengthMismatch
                } else {
                    CheckOutcome::StructuralMismatch {
                        mismatch,
                        new_semester: false,
                    }
                });
            }
        };

        if !changes.is_empty() {
            tracing::info!(user_id, count = changes.len(), "Found homework changes");
            let message = homework::changes_to_message(&changes);
            if let Err(err) = self.notifier.send_text(user_id, &message).await {
                tracing::error!(user_id, error = %err, "Failed to deliver homework notification");
            }
        }

        self.persist(user_id, Domain::Homework, &current)?;
        Ok(CheckOutcome::Compared {
            changes: changes.len(),
        })
    }

    pub async fn check_marks(&self, user_id: i64, fetcher: &dyn Fetcher) -> Result<CheckOutcome, CheckError> {
        let raw_html = fetcher.fetch(PageKind::MarksOverview).await?;
        let current = marks::parse_marks(&raw_html)?;
        tracing::debug!(user_id, disciplines = current.len(), "Parsed marks");

        let Some(previous) = self.load::<MarksSnapshot>(user_id, Domain::Marks)? else {
            self.persist(user_id, Domain::Marks, &current)?;
            tracing::info!(user_id, "No marks baseline yet, saved the current marks");
            return Ok(CheckOutcome::NoPriorSnapshot);
        };

        let changes = match marks::compare(&previous, &current) {
            Ok(changes) => changes,
            Err(mismatch) => {
                self.persist(user_id, Domain::Marks, &current)?;
                let new_semester = marks::looks_like_new_semester(&previous, &current);
                tracing::info!(user_id, reason = %mismatch, new_semester, "Marks changed shape, baseline reset");
                if new_semester {
                    self.announce_new_semester(user_id).await;
                }
                return Ok(CheckOutcome::StructuralMismatch { mismatch, new_semester });
            }
        };

        if !changes.is_empty() {
            tracing::info!(user_id, count = changes.len(), "Found grade changes");
            for change in &changes {
                self.deliver_grade_change(user_id, change).await;
            }
        }

        self.persist(user_id, Domain::Marks, &current)?;
        Ok(CheckOutcome::Compared {
            changes: changes.len(),
        })
    }

    async fn announce_new_semester(&self, user_id: i64) {
        if let Err(err) = self.notifier.notify_admins(NEW_SEMESTER_ADMIN_TEXT).await {
            tracing::error!(user_id, error = %err, "Failed to tell admins about the new semester");
        }
        if let Err(err) = self.notifier.send_text(user_id, NEW_SEMESTER_USER_TEXT).await {
            tracing::error!(user_id, error = %err, "Failed to congratulate user on the new semester");
        }
    }

    /// Sends one grade change as a picture, falling back to text when the
    /// picture cannot be produced. The picture is deleted on every path.
    async fn deliver_grade_change(&self, user_id: i64, change: &GradeChanged) {
        let caption = marks::change_caption(change);
        let card = GradeCard {
            old_grade: change.old_grade,
            new_grade: change.new_grade,
            current: change.current_aggregate,
            might_be: change.max_aggregate,
            title: marks::change_title(change),
            change_text: marks::change_text(change),
            side_text: marks::GRADE_CHANGE_SIDE_TEXT.to_string(),
        };

        let delivered = match self.renderer.render_grade_change(&card) {
            Ok(path) => {
                let image = RenderedImage::new(path);
                self.notifier.send_image(user_id, image.path(), &caption).await
            }
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Failed to render grade card, sending text");
                self.notifier.send_text(user_id, &escape_html(&caption)).await
            }
        };

        if let Err(err) = delivered {
            tracing::error!(
                user_id,
                subject = %change.subject,
                alias = %change.alias,
                error = %err,
                "Failed to deliver grade notification"
            );
        }
    }
}

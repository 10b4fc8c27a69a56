use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::diff::pair_by_position;
use crate::error::{MismatchReason, ParseError, StructuralMismatch};
use crate::models::{HomeworkChange, HomeworkChangeKind, HomeworkRecord, HomeworkSnapshot};
use crate::notifier::escape_html;

static THREAD_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<table[^>]*class\s*=\s*["'][^"']*\btable-thread\b[^"']*["'][^>]*>(.*?)</table>"#).unwrap()
});
static ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]>").unwrap());
static HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?is)<a\b[^>]*href\s*=\s*["']([^"']*)["']"#).unwrap());
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<b\b[^>]*>(.*?)</b>").unwrap());
static TRAILING_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

const STATUS_COLUMN: usize = 1;
const LINK_COLUMN: usize = 2;
const DISCIPLINE_COLUMN: usize = 3;
const TASK_COLUMN: usize = 4;
const MESSAGES_COLUMN: usize = 8;

/// Extracts the homework thread listing. The first row of the table is its header.
pub fn parse_homeworks(raw_html: &str, detail_url_template: &str) -> Result<HomeworkSnapshot, ParseError> {
    let table = THREAD_TABLE_RE
        .captures(raw_html)
        .and_then(|caps| caps.get(1))
        .ok_or(ParseError::MissingTable)?
        .as_str();

    let mut seen = HashSet::new();
    let mut homeworks = Vec::new();

    for (row, row_caps) in ROW_RE.captures_iter(table).enumerate().skip(1) {
        let cells: Vec<&str> = CELL_RE
            .captures_iter(&row_caps[1])
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();

        let record = parse_row(row, &cells, detail_url_template)?;
        if !seen.insert(record.thread_id) {
            return Err(ParseError::DuplicateThread(record.thread_id));
        }
        homeworks.push(record);
    }

    Ok(homeworks)
}

fn parse_row(row: usize, cells: &[&str], detail_url_template: &str) -> Result<HomeworkRecord, ParseError> {
    let malformed = |reason: String| ParseError::MalformedRow { row, reason };

    if cells.len() <= MESSAGES_COLUMN {
        return Err(malformed(format!(
            "expected at least {} cells, found {}",
            MESSAGES_COLUMN + 1,
            cells.len()
        )));
    }

    let href = HREF_RE
        .captures(cells[LINK_COLUMN])
        .map(|caps| decode_entities(&caps[1]))
        .ok_or_else(|| malformed("thread link is missing".to_string()))?;
    let thread_id = TRAILING_ID_RE
        .captures(href.trim())
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .ok_or_else(|| malformed(format!("no thread id at the end of {href:?}")))?;

    let new_message_count = BOLD_RE
        .captures(cells[MESSAGES_COLUMN])
        .map(|caps| cell_text(&caps[1]))
        .ok_or_else(|| malformed("new message counter is missing".to_string()))?
        .parse::<u32>()
        .map_err(|err| malformed(format!("new message counter: {err}")))?;

    Ok(HomeworkRecord {
        thread_id,
        status: cell_text(cells[STATUS_COLUMN]),
        new_message_count,
        discipline: cell_text(cells[DISCIPLINE_COLUMN]),
        task_title: cell_text(cells[TASK_COLUMN]),
        detail_url: detail_url_template.replace("{id}", &thread_id.to_string()),
    })
}

/// Visible text of a cell: tags stripped, entities decoded, whitespace collapsed.
pub(crate) fn cell_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Compares two listings position by position.
///
/// Per thread at most one change is reported; a status change hides a
/// simultaneous rise in the message counter.
pub fn compare(old: &[HomeworkRecord], new: &[HomeworkRecord]) -> Result<Vec<HomeworkChange>, StructuralMismatch> {
    let pairs = pair_by_position(
        old,
        new,
        |record| record.thread_id,
        |before, after| MismatchReason::ThreadIdDiffers {
            old: before.thread_id,
            new: after.thread_id,
        },
    )?;

    let changes = pairs
        .into_iter()
        .filter_map(|(before, after)| {
            let kind = if before.status != after.status {
                HomeworkChangeKind::StatusChanged {
                    status: after.status.clone(),
                }
            } else if after.new_message_count > before.new_message_count {
                HomeworkChangeKind::NewMessage {
                    count: after.new_message_count,
                }
            } else {
                return None;
            };
            Some(HomeworkChange {
                kind,
                thread_id: after.thread_id,
                discipline: after.discipline.clone(),
                task_title: after.task_title.clone(),
                detail_url: after.detail_url.clone(),
            })
        })
        .collect();

    Ok(changes)
}

/// Telegram HTML message listing every change, separated by blank lines.
pub fn changes_to_message(changes: &[HomeworkChange]) -> String {
    changes
        .iter()
        .map(|change| {
            let header = format!(
                "📝 <b>{}</b> по «{}»",
                escape_html(&change.task_title),
                escape_html(&change.discipline)
            );
            let body = match &change.kind {
                HomeworkChangeKind::StatusChanged { status } => {
                    format!("Статус домашнего задания изменён на: <code>{}</code>", escape_html(status))
                }
                HomeworkChangeKind::NewMessage { count } => format!(
                    "Получено личное сообщение от преподавателя. Количество новых сообщений: <code>{count}</code>"
                ),
            };
            format!(
                "{header}\n{body}\n\nПодробности по ссылке: {}",
                escape_html(&change.detail_url)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "https://orioks.miet.ru/student/homework/view?id_thread={id}";

    fn row(thread_id: u64, status: &str, discipline: &str, task: &str, messages: u32) -> String {
        format!(
            r#"<tr>
                <td>1</td>
                <td><span class="label">{status}</span></td>
                <td><a href="/student/homework/view?id_thread={thread_id}">Открыть</a></td>
                <td>{discipline}</td>
                <td>{task}</td>
                <td>01.09.2024</td>
                <td>Иванов И.И.</td>
                <td>-</td>
                <td><b>{messages}</b> / 4</td>
            </tr>"#
        )
    }

    fn page(rows: &[String]) -> String {
        format!(
            r#"<html><body>
            <table class="table table-condensed table-thread">
                <tr><th>#</th><th>Статус</th><th></th><th>Дисциплина</th><th>Задание</th><th>Дата</th><th>Преподаватель</th><th>Срок</th><th>Сообщения</th></tr>
                {}
            </table>
            </body></html>"#,
            rows.join("\n")
        )
    }

    fn record(thread_id: u64, status: &str, new_message_count: u32) -> HomeworkRecord {
        HomeworkRecord {
            thread_id,
            status: status.to_string(),
            new_message_count,
            discipline: "Физика".to_string(),
            task_title: "Лабораторная 1".to_string(),
            detail_url: TEMPLATE.replace("{id}", &thread_id.to_string()),
        }
    }

    #[test]
    fn parses_rows_in_listing_order() {
        let html = page(&[
            row(4412, "Не просмотрено", "Физика", "Лабораторная &amp; отчёт", 0),
            row(17, "Принято", "Химия", "ДЗ 2", 3),
        ]);

        let homeworks = parse_homeworks(&html, TEMPLATE).unwrap();

        assert_eq!(homeworks.len(), 2);
        assert_eq!(homeworks[0].thread_id, 4412);
        assert_eq!(homeworks[0].status, "Не просмотрено");
        assert_eq!(homeworks[0].task_title, "Лабораторная & отчёт");
        assert_eq!(homeworks[0].new_message_count, 0);
        assert_eq!(
            homeworks[0].detail_url,
            "https://orioks.miet.ru/student/homework/view?id_thread=4412"
        );
        assert_eq!(homeworks[1].thread_id, 17);
        assert_eq!(homeworks[1].discipline, "Химия");
        assert_eq!(homeworks[1].new_message_count, 3);
    }

    #[test]
    fn header_only_table_is_an_empty_listing() {
        let homeworks = parse_homeworks(&page(&[]), TEMPLATE).unwrap();
        assert!(homeworks.is_empty());
    }

    #[test]
    fn missing_table_is_a_parse_error() {
        let err = parse_homeworks("<html><body>Войдите в систему</body></html>", TEMPLATE).unwrap_err();
        assert_eq!(err, ParseError::MissingTable);
    }

    #[test]
    fn short_row_is_malformed() {
        let html = page(&["<tr><td>1</td><td>Принято</td></tr>".to_string()]);
        let err = parse_homeworks(&html, TEMPLATE).unwrap_err();
        assert!(matches!(err, ParseError::MalformedRow { row: 1, .. }));
    }

    #[test]
    fn duplicate_thread_is_rejected() {
        let html = page(&[row(5, "Принято", "Физика", "ДЗ", 0), row(5, "Принято", "Физика", "ДЗ", 0)]);
        assert_eq!(parse_homeworks(&html, TEMPLATE).unwrap_err(), ParseError::DuplicateThread(5));
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let snapshot = vec![record(1, "Принято", 2), record(2, "Не просмотрено", 0)];
        assert!(compare(&snapshot, &snapshot).unwrap().is_empty());
    }

    #[test]
    fn different_thread_at_same_position_is_a_mismatch() {
        let err = compare(&[record(1, "A", 0)], &[record(2, "A", 0)]).unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.reason, MismatchReason::ThreadIdDiffers { old: 1, new: 2 });
    }

    #[test]
    fn status_change_takes_priority_over_new_messages() {
        let changes = compare(&[record(7, "Pending", 2)], &[record(7, "Graded", 5)]).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0].kind,
            HomeworkChangeKind::StatusChanged {
                status: "Graded".to_string()
            }
        );
    }

    #[test]
    fn rising_message_counter_is_reported() {
        let changes = compare(&[record(7, "Pending", 2)], &[record(7, "Pending", 3)]).unwrap();
        assert_eq!(changes[0].kind, HomeworkChangeKind::NewMessage { count: 3 });
        assert_eq!(changes[0].thread_id, 7);
    }

    #[test]
    fn falling_message_counter_is_ignored() {
        let changes = compare(&[record(7, "Pending", 3)], &[record(7, "Pending", 0)]).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn changes_keep_table_order() {
        let old = vec![record(1, "A", 0), record(2, "A", 0), record(3, "A", 0)];
        let new = vec![record(1, "B", 0), record(2, "A", 0), record(3, "A", 1)];
        let ids: Vec<u64> = compare(&old, &new).unwrap().iter().map(|c| c.thread_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn extra_trailing_thread_is_a_length_mismatch() {
        let err = compare(&[record(1, "A", 0)], &[record(1, "B", 0), record(2, "A", 0)]).unwrap_err();
        assert!(err.is_length_mismatch());
    }

    #[test]
    fn message_escapes_markup() {
        let change = HomeworkChange {
            kind: HomeworkChangeKind::StatusChanged {
                status: "<Принято>".to_string(),
            },
            thread_id: 1,
            discipline: "C & C++".to_string(),
            task_title: "ДЗ".to_string(),
            detail_url: "https://example.test/1".to_string(),
        };
        let message = changes_to_message(&[change]);
        assert!(message.contains("«C &amp; C++»"));
        assert!(message.contains("<code>&lt;Принято&gt;</code>"));
        assert!(message.ends_with("Подробности по ссылке: https://example.test/1"));
    }
}

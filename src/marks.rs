use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::diff::pair_by_position;
use crate::error::{MismatchReason, ParseError, StructuralMismatch};
use crate::homework::decode_entities;
use crate::models::{format_score, Aggregate, DisciplineRecord, DisciplineTask, Grade, GradeChanged, MarksSnapshot};

static FORANG_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<([a-z][a-z0-9]*)\b[^>]*\bid\s*=\s*["']forang["'][^>]*>"#).unwrap());

pub const GRADE_CHANGE_SIDE_TEXT: &str = "Изменён балл за контрольное мероприятие";

#[derive(Debug, Deserialize)]
struct Forang {
    #[serde(default)]
    dises: Option<Disciplines>,
}

/// The portal serves the discipline collection either as an array or as an
/// object keyed by index; both resolve to the same ordered list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Disciplines {
    Dense(Vec<RawDiscipline>),
    Keyed(serde_json::Map<String, serde_json::Value>),
}

impl Disciplines {
    fn into_ordered(self) -> Result<Vec<RawDiscipline>, ParseError> {
        match self {
            Disciplines::Dense(list) => Ok(list),
            Disciplines::Keyed(map) => map
                .into_iter()
                .map(|(key, value)| {
                    serde_json::from_value(value)
                        .map_err(|err| ParseError::Unparseable(format!("discipline {key:?}: {err}")))
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDiscipline {
    name: String,
    #[serde(rename = "formControl", default)]
    form_control: FormControl,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Default, Deserialize)]
struct FormControl {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(rename = "allKms", default)]
    all_kms: Vec<RawControlPoint>,
}

#[derive(Debug, Deserialize)]
struct RawControlPoint {
    #[serde(default)]
    sh: Option<String>,
    #[serde(default)]
    grade: RawControlPointGrade,
    #[serde(default)]
    max_ball: Grade,
}

#[derive(Debug, Default, Deserialize)]
struct RawControlPointGrade {
    #[serde(default)]
    b: Grade,
}

/// Locates the embedded `forang` blob and normalises it.
pub fn parse_marks(raw_html: &str) -> Result<MarksSnapshot, ParseError> {
    let blob = extract_forang(raw_html)
        .ok_or_else(|| ParseError::Unparseable("element #forang not found".to_string()))?;
    parse_forang_json(&blob)
}

fn extract_forang(raw_html: &str) -> Option<String> {
    let caps = FORANG_OPEN_RE.captures(raw_html)?;
    let open = caps.get(0)?;
    let closing = format!("</{}>", caps[1].to_ascii_lowercase());
    let rest = &raw_html[open.end()..];
    let end = rest.to_ascii_lowercase().find(&closing)?;
    Some(decode_entities(&rest[..end]))
}

pub(crate) fn parse_forang_json(blob: &str) -> Result<MarksSnapshot, ParseError> {
    let forang: Forang =
        serde_json::from_str(blob.trim()).map_err(|err| ParseError::Unparseable(err.to_string()))?;
    let disciplines = forang
        .dises
        .map(Disciplines::into_ordered)
        .transpose()?
        .unwrap_or_default();

    if disciplines.is_empty() {
        return Err(ParseError::EmptyData);
    }

    Ok(disciplines.into_iter().map(normalize_discipline).collect())
}

fn is_blank_alias(sh: Option<&str>) -> bool {
    sh.map(str::trim).map_or(true, |sh| sh.is_empty() || sh == "-")
}

fn normalize_discipline(discipline: RawDiscipline) -> DisciplineRecord {
    let control_points = discipline
        .segments
        .into_iter()
        .next()
        .map(|segment| segment.all_kms)
        .unwrap_or_default();
    let last = control_points.len().saturating_sub(1);

    let tasks: Vec<DisciplineTask> = control_points
        .into_iter()
        .enumerate()
        .map(|(index, point)| {
            // The portal leaves the final control point (usually the exam) unlabeled.
            let alias = if index == last && is_blank_alias(point.sh.as_deref()) {
                discipline.form_control.name.clone()
            } else {
                point.sh.unwrap_or_default()
            };
            DisciplineTask {
                alias,
                current_grade: point.grade.b,
                max_grade: point.max_ball,
            }
        })
        .collect();

    DisciplineRecord {
        subject: discipline.name,
        aggregate: Aggregate::from_tasks(&tasks),
        tasks,
    }
}

/// Compares two marks snapshots. Disciplines are matched by position and must
/// keep their subject. Tasks are matched by position; a discipline whose task
/// list changed shape is aligned by alias instead, so the rest of the
/// snapshot is still compared.
pub fn compare(old: &[DisciplineRecord], new: &[DisciplineRecord]) -> Result<Vec<GradeChanged>, StructuralMismatch> {
    let disciplines = pair_by_position(
        old,
        new,
        |discipline| discipline.subject.clone(),
        |before, after| MismatchReason::SubjectDiffers {
            old: before.subject.clone(),
            new: after.subject.clone(),
        },
    )?;

    let mut changes = Vec::new();
    for (before, after) in disciplines {
        let tasks: Vec<(Option<&DisciplineTask>, &DisciplineTask)> = match pair_by_position(
            &before.tasks,
            &after.tasks,
            |task| task.alias.clone(),
            |old_task, new_task| MismatchReason::AliasDiffers {
                old: old_task.alias.clone(),
                new: new_task.alias.clone(),
            },
        ) {
            Ok(pairs) => pairs.into_iter().map(|(old_task, new_task)| (Some(old_task), new_task)).collect(),
            Err(mismatch) => {
                tracing::warn!(
                    subject = %after.subject,
                    reason = %mismatch,
                    "Task list changed shape, matching tasks by alias"
                );
                align_by_alias(&before.tasks, &after.tasks)
            }
        };

        changes.extend(tasks.into_iter().filter_map(|(old_task, new_task)| {
            let old_grade = old_task.map_or(Grade::Ungraded, |task| task.current_grade);
            (old_grade != new_task.current_grade).then(|| GradeChanged {
                subject: after.subject.clone(),
                alias: new_task.alias.clone(),
                old_grade,
                new_grade: new_task.current_grade,
                current_aggregate: after.aggregate.current,
                max_aggregate: after.aggregate.might_be,
            })
        }));
    }

    Ok(changes)
}

/// Pairs every new task with the next old task of the same alias, keeping
/// order. New tasks without a counterpart are paired with `None`; old tasks
/// that disappeared are dropped.
fn align_by_alias<'a>(
    old: &'a [DisciplineTask],
    new: &'a [DisciplineTask],
) -> Vec<(Option<&'a DisciplineTask>, &'a DisciplineTask)> {
    let mut next = 0;
    new.iter()
        .map(|new_task| {
            let found = old[next..].iter().position(|old_task| old_task.alias == new_task.alias);
            match found {
                Some(offset) => {
                    let old_task = &old[next + offset];
                    next += offset + 1;
                    (Some(old_task), new_task)
                }
                None => (None, new_task),
            }
        })
        .collect()
}

/// Best-effort guess that a structural mismatch is a new semester rather
/// than corrupted data: both the first and the last subject changed.
pub fn looks_like_new_semester(old: &[DisciplineRecord], new: &[DisciplineRecord]) -> bool {
    match (old.first().zip(old.last()), new.first().zip(new.last())) {
        (Some((old_first, old_last)), Some((new_first, new_last))) => {
            old_first.subject != new_first.subject && old_last.subject != new_last.subject
        }
        _ => false,
    }
}

pub fn change_title(change: &GradeChanged) -> String {
    change.subject.clone()
}

pub fn change_text(change: &GradeChanged) -> String {
    format!("{}: {} → {}", change.alias, change.old_grade, change.new_grade)
}

pub fn change_caption(change: &GradeChanged) -> String {
    format!(
        "{}\n{}\nВсего баллов: {} из {}",
        change.subject,
        change_text(change),
        format_score(change.current_aggregate),
        format_score(change.max_aggregate)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DENSE: &str = r#"{"dises": [
        {"name": "Математика", "formControl": {"name": "Экзамен"}, "segments": [{"allKms": [
            {"id": 11, "sh": "КМ-1", "grade": {"b": 7}, "max_ball": 10},
            {"id": 12, "sh": "", "grade": {"b": "-"}, "max_ball": 10},
            {"id": 13, "sh": "", "grade": {"b": "-"}, "max_ball": 30}
        ]}]},
        {"name": "Физика", "formControl": {"name": "Зачёт"}, "segments": [{"allKms": [
            {"id": 21, "sh": "ЛР", "grade": {"b": 0}, "max_ball": 20},
            {"id": 22, "sh": "-", "grade": {"b": 12.5}, "max_ball": 40}
        ]}]}
    ]}"#;

    const KEYED: &str = r#"{"dises": {
        "0": {"name": "Математика", "formControl": {"name": "Экзамен"}, "segments": [{"allKms": [
            {"id": 11, "sh": "КМ-1", "grade": {"b": 7}, "max_ball": 10},
            {"id": 12, "sh": "", "grade": {"b": "-"}, "max_ball": 10},
            {"id": 13, "sh": "", "grade": {"b": "-"}, "max_ball": 30}
        ]}]},
        "1": {"name": "Физика", "formControl": {"name": "Зачёт"}, "segments": [{"allKms": [
            {"id": 21, "sh": "ЛР", "grade": {"b": 0}, "max_ball": 20},
            {"id": 22, "sh": "-", "grade": {"b": 12.5}, "max_ball": 40}
        ]}]}
    }}"#;

    fn discipline(subject: &str, tasks: &[(&str, Grade, Grade)]) -> DisciplineRecord {
        let tasks: Vec<DisciplineTask> = tasks
            .iter()
            .map(|(alias, current, max)| DisciplineTask {
                alias: alias.to_string(),
                current_grade: *current,
                max_grade: *max,
            })
            .collect();
        DisciplineRecord {
            subject: subject.to_string(),
            aggregate: Aggregate::from_tasks(&tasks),
            tasks,
        }
    }

    #[test]
    fn dense_and_keyed_encodings_normalize_identically() {
        let dense = parse_forang_json(DENSE).unwrap();
        let keyed = parse_forang_json(KEYED).unwrap();
        assert_eq!(dense, keyed);
        assert_eq!(
            serde_json::to_string(&dense).unwrap(),
            serde_json::to_string(&keyed).unwrap()
        );
    }

    #[test]
    fn keyed_encoding_keeps_document_order() {
        let blob = r#"{"dises": {
            "10": {"name": "Первая", "segments": []},
            "2": {"name": "Вторая", "segments": []}
        }}"#;
        let subjects: Vec<String> = parse_forang_json(blob)
            .unwrap()
            .into_iter()
            .map(|d| d.subject)
            .collect();
        assert_eq!(subjects, vec!["Первая", "Вторая"]);
    }

    #[test]
    fn last_unlabeled_item_takes_control_name() {
        let marks = parse_forang_json(DENSE).unwrap();
        let aliases: Vec<&str> = marks[0].tasks.iter().map(|t| t.alias.as_str()).collect();
        assert_eq!(aliases, vec!["КМ-1", "", "Экзамен"]);
        assert_eq!(marks[1].tasks[1].alias, "Зачёт");
    }

    #[test]
    fn aggregates_skip_ungraded_items() {
        let marks = parse_forang_json(DENSE).unwrap();
        assert_eq!(marks[0].aggregate, Aggregate { current: 7.0, might_be: 10.0 });
        assert_eq!(marks[1].aggregate, Aggregate { current: 12.5, might_be: 60.0 });
        assert_eq!(marks[0].tasks[1].current_grade, Grade::Ungraded);
        assert_eq!(marks[1].tasks[0].current_grade, Grade::Numeric(0.0));
    }

    #[test]
    fn empty_discipline_collection_is_empty_data() {
        assert_eq!(parse_forang_json(r#"{"dises": []}"#).unwrap_err(), ParseError::EmptyData);
        assert_eq!(parse_forang_json(r#"{"dises": {}}"#).unwrap_err(), ParseError::EmptyData);
        assert_eq!(parse_forang_json("{}").unwrap_err(), ParseError::EmptyData);
    }

    #[test]
    fn extracts_blob_from_markup() {
        let html = format!(
            r#"<html><body><div class="x"></div><DIV id="forang" class="hidden">{}</DIV></body></html>"#,
            DENSE.replace('"', "&quot;")
        );
        let marks = parse_marks(&html).unwrap();
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[1].subject, "Физика");
    }

    #[test]
    fn missing_blob_is_unparseable() {
        let err = parse_marks("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, ParseError::Unparseable(_)));
    }

    #[test]
    fn broken_json_is_unparseable() {
        let err = parse_marks(r#"<div id="forang">{"dises": [</div>"#).unwrap_err();
        assert!(matches!(err, ParseError::Unparseable(_)));
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let marks = parse_forang_json(DENSE).unwrap();
        assert!(compare(&marks, &marks).unwrap().is_empty());
    }

    #[test]
    fn changed_grade_is_reported_with_new_totals() {
        let old = vec![discipline("Math", &[("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0))])];
        let new = vec![discipline("Math", &[("KM1", Grade::Numeric(8.0), Grade::Numeric(10.0))])];

        let changes = compare(&old, &new).unwrap();

        assert_eq!(
            changes,
            vec![GradeChanged {
                subject: "Math".to_string(),
                alias: "KM1".to_string(),
                old_grade: Grade::Numeric(5.0),
                new_grade: Grade::Numeric(8.0),
                current_aggregate: 8.0,
                max_aggregate: 10.0,
            }]
        );
    }

    #[test]
    fn first_grade_after_ungraded_is_a_change() {
        let old = vec![discipline("Math", &[("KM1", Grade::Ungraded, Grade::Numeric(10.0))])];
        let new = vec![discipline("Math", &[("KM1", Grade::Numeric(0.0), Grade::Numeric(10.0))])];
        let changes = compare(&old, &new).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_grade, Grade::Ungraded);
        assert_eq!(changes[0].max_aggregate, 10.0);
    }

    #[test]
    fn max_grade_only_change_is_silent() {
        let old = vec![discipline("Math", &[("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0))])];
        let new = vec![discipline("Math", &[("KM1", Grade::Numeric(5.0), Grade::Numeric(15.0))])];
        assert!(compare(&old, &new).unwrap().is_empty());
    }

    #[test]
    fn renamed_subject_is_a_mismatch() {
        let old = vec![discipline("Math", &[]), discipline("Physics", &[])];
        let new = vec![discipline("Math", &[]), discipline("Chemistry", &[])];
        let err = compare(&old, &new).unwrap_err();
        assert_eq!(err.position, 1);
        assert!(matches!(err.reason, MismatchReason::SubjectDiffers { .. }));
    }

    #[test]
    fn different_discipline_count_is_a_mismatch() {
        let old = vec![discipline("Math", &[])];
        let new = vec![discipline("Math", &[]), discipline("Physics", &[])];
        assert!(compare(&old, &new).unwrap_err().is_length_mismatch());
    }

    #[test]
    fn reshaped_task_list_does_not_hide_other_changes() {
        let old = vec![
            discipline("Math", &[("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0))]),
            discipline("Physics", &[("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0))]),
        ];
        let new = vec![
            discipline(
                "Math",
                &[
                    ("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0)),
                    ("KM2", Grade::Ungraded, Grade::Numeric(10.0)),
                ],
            ),
            discipline("Physics", &[("KM1", Grade::Numeric(9.0), Grade::Numeric(10.0))]),
        ];

        let changes = compare(&old, &new).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].subject, "Physics");
        assert_eq!(changes[0].old_grade, Grade::Numeric(5.0));
        assert_eq!(changes[0].new_grade, Grade::Numeric(9.0));
    }

    #[test]
    fn inserted_task_is_aligned_by_alias() {
        let old = vec![discipline(
            "Math",
            &[
                ("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0)),
                ("KM3", Grade::Ungraded, Grade::Numeric(10.0)),
            ],
        )];
        let new = vec![discipline(
            "Math",
            &[
                ("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0)),
                ("KM2", Grade::Numeric(4.0), Grade::Numeric(10.0)),
                ("KM3", Grade::Numeric(7.0), Grade::Numeric(10.0)),
            ],
        )];

        let changes: Vec<(String, Grade, Grade)> = compare(&old, &new)
            .unwrap()
            .into_iter()
            .map(|c| (c.alias, c.old_grade, c.new_grade))
            .collect();

        assert_eq!(
            changes,
            vec![
                ("KM2".to_string(), Grade::Ungraded, Grade::Numeric(4.0)),
                ("KM3".to_string(), Grade::Ungraded, Grade::Numeric(7.0)),
            ]
        );
    }

    #[test]
    fn removed_task_drops_out_silently() {
        let old = vec![discipline(
            "Math",
            &[
                ("KM1", Grade::Numeric(5.0), Grade::Numeric(10.0)),
                ("KM2", Grade::Numeric(3.0), Grade::Numeric(10.0)),
            ],
        )];
        let new = vec![discipline("Math", &[("KM2", Grade::Numeric(3.0), Grade::Numeric(10.0))])];
        assert!(compare(&old, &new).unwrap().is_empty());
    }

    #[test]
    fn new_semester_requires_first_and_last_subject_to_change() {
        let old = vec![discipline("Math", &[]), discipline("Physics", &[])];
        let rolled = vec![discipline("Algebra", &[]), discipline("Optics", &[]), discipline("History", &[])];
        let partly = vec![discipline("Math", &[]), discipline("Optics", &[])];

        assert!(looks_like_new_semester(&old, &rolled));
        assert!(!looks_like_new_semester(&old, &partly));
        assert!(!looks_like_new_semester(&[], &rolled));
    }

    #[test]
    fn caption_shows_change_and_totals() {
        let change = GradeChanged {
            subject: "Math".to_string(),
            alias: "KM1".to_string(),
            old_grade: Grade::Ungraded,
            new_grade: Grade::Numeric(8.0),
            current_aggregate: 18.5,
            max_aggregate: 30.0,
        };
        assert_eq!(change_caption(&change), "Math\nKM1: - → 8\nВсего баллов: 18.5 из 30");
    }
}

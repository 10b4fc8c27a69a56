use std::fmt;

use serde::{Deserialize, Serialize};

/// One row of the homework thread listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeworkRecord {
    pub thread_id: u64,
    pub status: String,
    pub new_message_count: u32,
    pub discipline: String,
    pub task_title: String,
    pub detail_url: String,
}

/// Portal listing order. Thread ids are unique within one snapshot.
pub type HomeworkSnapshot = Vec<HomeworkRecord>;

/// A score that is either a number or the portal's "not assessed yet" marker.
///
/// `Ungraded` is never treated as zero: aggregation switches on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawGrade", into = "RawGrade")]
pub enum Grade {
    Numeric(f64),
    #[default]
    Ungraded,
}

impl Grade {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Grade::Numeric(value) => Some(*value),
            Grade::Ungraded => None,
        }
    }

    pub fn is_ungraded(&self) -> bool {
        matches!(self, Grade::Ungraded)
    }

    fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "-" {
            return Grade::Ungraded;
        }
        trimmed
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Grade::Numeric)
            .unwrap_or(Grade::Ungraded)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Numeric(value) => f.write_str(&format_score(*value)),
            Grade::Ungraded => f.write_str("-"),
        }
    }
}

/// Wire shape of a grade: the portal mixes numbers, numeric strings, `"-"` and `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawGrade {
    Number(f64),
    Text(String),
    Null,
}

impl From<RawGrade> for Grade {
    fn from(raw: RawGrade) -> Self {
        match raw {
            RawGrade::Number(value) => Grade::Numeric(value),
            RawGrade::Text(text) => Grade::from_text(&text),
            RawGrade::Null => Grade::Ungraded,
        }
    }
}

impl From<Grade> for RawGrade {
    fn from(grade: Grade) -> Self {
        match grade {
            Grade::Numeric(value) => RawGrade::Number(value),
            Grade::Ungraded => RawGrade::Text("-".to_string()),
        }
    }
}

/// Renders whole scores without a fractional part (`5`, not `5.0`).
pub fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        let text = format!("{value:.2}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineTask {
    pub alias: String,
    pub current_grade: Grade,
    pub max_grade: Grade,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub current: f64,
    pub might_be: f64,
}

impl Aggregate {
    /// `current` sums every numeric score; `might_be` only counts the ceiling
    /// of tasks that have already been graded.
    pub fn from_tasks(tasks: &[DisciplineTask]) -> Self {
        tasks.iter().fold(Aggregate::default(), |mut acc, task| {
            if let Some(current) = task.current_grade.as_number() {
                acc.current += current;
            }
            if let (Some(max), false) = (task.max_grade.as_number(), task.current_grade.is_ungraded()) {
                acc.might_be += max;
            }
            acc
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineRecord {
    pub subject: String,
    pub tasks: Vec<DisciplineTask>,
    pub aggregate: Aggregate,
}

/// Disciplines are identified by position only.
pub type MarksSnapshot = Vec<DisciplineRecord>;

#[derive(Debug, Clone, PartialEq)]
pub enum HomeworkChangeKind {
    StatusChanged { status: String },
    NewMessage { count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomeworkChange {
    pub kind: HomeworkChangeKind,
    pub thread_id: u64,
    pub discipline: String,
    pub task_title: String,
    pub detail_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeChanged {
    pub subject: String,
    pub alias: String,
    pub old_grade: Grade,
    pub new_grade: Grade,
    pub current_aggregate: f64,
    pub max_aggregate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(current: Grade, max: Grade) -> DisciplineTask {
        DisciplineTask {
            alias: "KM".to_string(),
            current_grade: current,
            max_grade: max,
        }
    }

    #[test]
    fn ungraded_task_does_not_count_toward_either_total() {
        let aggregate = Aggregate::from_tasks(&[task(Grade::Ungraded, Grade::Numeric(10.0))]);
        assert_eq!(aggregate, Aggregate { current: 0.0, might_be: 0.0 });
    }

    #[test]
    fn graded_task_counts_score_and_ceiling() {
        let aggregate = Aggregate::from_tasks(&[
            task(Grade::Numeric(7.0), Grade::Numeric(10.0)),
            task(Grade::Ungraded, Grade::Numeric(20.0)),
            task(Grade::Numeric(0.0), Grade::Numeric(5.0)),
        ]);
        assert_eq!(aggregate, Aggregate { current: 7.0, might_be: 15.0 });
    }

    #[test]
    fn grade_decodes_portal_values() {
        let grades: Vec<Grade> = serde_json::from_str(r#"[7, "8.5", "3,5", "-", "", " ", null, "н/я"]"#).unwrap();
        assert_eq!(
            grades,
            vec![
                Grade::Numeric(7.0),
                Grade::Numeric(8.5),
                Grade::Numeric(3.5),
                Grade::Ungraded,
                Grade::Ungraded,
                Grade::Ungraded,
                Grade::Ungraded,
                Grade::Ungraded,
            ]
        );
    }

    #[test]
    fn zero_is_not_ungraded() {
        let grade: Grade = serde_json::from_str("0").unwrap();
        assert_eq!(grade, Grade::Numeric(0.0));
        assert_ne!(grade, Grade::Ungraded);
    }

    #[test]
    fn grade_display_drops_trailing_zeroes() {
        assert_eq!(Grade::Numeric(5.0).to_string(), "5");
        assert_eq!(Grade::Numeric(7.25).to_string(), "7.25");
        assert_eq!(Grade::Numeric(2.5).to_string(), "2.5");
        assert_eq!(Grade::Ungraded.to_string(), "-");
    }
}

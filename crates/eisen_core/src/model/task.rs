//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record placed on the urgency/importance matrix.
//! - Provide lifecycle helpers that keep completion fields consistent.
//!
//! # Invariants
//! - `id` is stable, non-nil and never reused for another task.
//! - `title` is non-empty after trimming.
//! - `urgency` and `importance` are within `LEVEL_MIN..=LEVEL_MAX`.
//! - `completed_date` is set iff `completed` is true.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for every task.
pub type TaskId = Uuid;

/// Lowest accepted urgency/importance level.
pub const LEVEL_MIN: u8 = 1;
/// Highest accepted urgency/importance level.
pub const LEVEL_MAX: u8 = 5;
/// Level used when a persisted record omits urgency or importance.
pub const LEVEL_DEFAULT: u8 = 3;
/// Levels at or above this value count as urgent/important.
pub const HIGH_LEVEL_THRESHOLD: u8 = 3;

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not started.
    #[default]
    Todo,
    /// Work is in progress.
    Doing,
    /// Finished.
    Done,
}

/// Eisenhower quadrant derived from urgency and importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    /// Urgent and important.
    DoFirst,
    /// Important, not urgent.
    Schedule,
    /// Urgent, not important.
    Delegate,
    /// Neither urgent nor important.
    Eliminate,
}

impl Quadrant {
    /// Classifies a matrix cell.
    pub fn classify(urgency: u8, importance: u8) -> Self {
        let urgent = urgency >= HIGH_LEVEL_THRESHOLD;
        let important = importance >= HIGH_LEVEL_THRESHOLD;
        match (urgent, important) {
            (true, true) => Self::DoFirst,
            (false, true) => Self::Schedule,
            (true, false) => Self::Delegate,
            (false, false) => Self::Eliminate,
        }
    }
}

/// Validation failures for a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    NilId,
    EmptyTitle,
    LevelOutOfRange { field: &'static str, value: u8 },
    CompletionMismatch { completed: bool },
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "task id must not be nil"),
            Self::EmptyTitle => write!(f, "task title must not be blank"),
            Self::LevelOutOfRange { field, value } => write!(
                f,
                "{field} ({value}) must be within {LEVEL_MIN}..={LEVEL_MAX}"
            ),
            Self::CompletionMismatch { completed: true } => {
                write!(f, "completed task must carry completed_date")
            }
            Self::CompletionMismatch { completed: false } => {
                write!(f, "open task must not carry completed_date")
            }
        }
    }
}

impl Error for TaskValidationError {}

/// Canonical task record.
///
/// Optional fields carry serde defaults so older or newer payloads still
/// decode; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Older payloads name this field `name`.
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_level")]
    pub urgency: u8,
    #[serde(default = "default_level")]
    pub importance: u8,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
    /// Intra-cell ordering key; gaps are allowed.
    #[serde(default)]
    pub order: i64,
}

fn default_level() -> u8 {
    LEVEL_DEFAULT
}

impl Task {
    /// Creates a new task with a generated stable ID.
    ///
    /// The title is trimmed before validation.
    pub fn new(
        title: impl Into<String>,
        urgency: u8,
        importance: u8,
    ) -> Result<Self, TaskValidationError> {
        Self::with_id(Uuid::new_v4(), title, urgency, importance)
    }

    /// Creates a task with a caller-provided stable ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(
        id: TaskId,
        title: impl Into<String>,
        urgency: u8,
        importance: u8,
    ) -> Result<Self, TaskValidationError> {
        let task = Self {
            id,
            title: title.into().trim().to_string(),
            description: None,
            urgency,
            importance,
            status: TaskStatus::Todo,
            tags: BTreeSet::new(),
            due_date: None,
            completed: false,
            completed_date: None,
            order: 0,
        };
        task.validate()?;
        Ok(task)
    }

    /// Checks every per-task invariant.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.id.is_nil() {
            return Err(TaskValidationError::NilId);
        }
        if self.title.trim().is_empty() {
            return Err(TaskValidationError::EmptyTitle);
        }
        check_level("urgency", self.urgency)?;
        check_level("importance", self.importance)?;
        if self.completed != self.completed_date.is_some() {
            return Err(TaskValidationError::CompletionMismatch {
                completed: self.completed,
            });
        }
        Ok(())
    }

    /// Returns the quadrant this task currently sits in.
    pub fn quadrant(&self) -> Quadrant {
        Quadrant::classify(self.urgency, self.importance)
    }

    /// Marks the task done at `at`, keeping `completed`/`completed_date` paired.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.completed = true;
        self.completed_date = Some(at);
        self.status = TaskStatus::Done;
    }

    /// Reopens a completed task.
    pub fn reopen(&mut self) {
        self.completed = false;
        self.completed_date = None;
        self.status = TaskStatus::Todo;
    }

    /// Replaces the tag set with normalized values.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
    }

    /// Trims the title and normalizes tags in place.
    pub fn canonicalize(&mut self) {
        let trimmed = self.title.trim();
        if trimmed.len() != self.title.len() {
            self.title = trimmed.to_string();
        }
        self.tags = normalize_tags(&self.tags);
    }

    /// Whether the due date falls within `window_days` of `today` (overdue included).
    pub fn is_due_within(&self, today: NaiveDate, window_days: i64) -> bool {
        match self.due_date {
            Some(due) => (due - today).num_days() <= window_days,
            None => false,
        }
    }
}

/// Normalizes a single tag: trimmed and lowercased, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and deduplicates tag values.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|tag| normalize_tag(tag.as_ref()))
        .collect()
}

fn check_level(field: &'static str, value: u8) -> Result<(), TaskValidationError> {
    if (LEVEL_MIN..=LEVEL_MAX).contains(&value) {
        Ok(())
    } else {
        Err(TaskValidationError::LevelOutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::{Quadrant, Task, TaskValidationError};
    use chrono::NaiveDate;

    #[test]
    fn classify_covers_all_quadrants() {
        assert_eq!(Quadrant::classify(5, 5), Quadrant::DoFirst);
        assert_eq!(Quadrant::classify(1, 4), Quadrant::Schedule);
        assert_eq!(Quadrant::classify(3, 2), Quadrant::Delegate);
        assert_eq!(Quadrant::classify(2, 2), Quadrant::Eliminate);
    }

    #[test]
    fn due_window_includes_overdue_and_excludes_far_dates() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let mut task = Task::new("file taxes", 2, 4).unwrap();
        assert!(!task.is_due_within(today, 2));

        task.due_date = NaiveDate::from_ymd_opt(2026, 3, 12);
        assert!(task.is_due_within(today, 2));
        task.due_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        assert!(task.is_due_within(today, 2));
        task.due_date = NaiveDate::from_ymd_opt(2026, 3, 13);
        assert!(!task.is_due_within(today, 2));
    }

    #[test]
    fn level_error_names_field() {
        let err = Task::new("x", 3, 0).unwrap_err();
        assert_eq!(
            err,
            TaskValidationError::LevelOutOfRange {
                field: "importance",
                value: 0
            }
        );
        assert!(err.to_string().contains("importance (0)"));
    }
}

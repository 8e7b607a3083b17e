//! In-memory task collection.
//!
//! # Responsibility
//! - Hold the tasks of one unlocked store in insertion order.
//! - Gate every mutation through task validation.
//!
//! # Invariants
//! - Task ids are unique within a collection.
//! - Every stored task passes `Task::validate()`.
//! - Stored titles are trimmed and tags normalized, so a collection equals
//!   its own encode/decode round trip.
//! - `add`/`update` additionally reject case-insensitive duplicate titles.

use crate::model::task::{Quadrant, Task, TaskId, TaskValidationError, LEVEL_MAX};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Urgency added to tasks whose deadline is close.
pub const DEADLINE_URGENCY_STEP: u8 = 1;
/// Default look-ahead window for deadline escalation.
pub const DEADLINE_WINDOW_DAYS: i64 = 2;

/// Errors from collection-level operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// Task failed per-record validation.
    Invalid { id: TaskId, source: TaskValidationError },
    /// Another task already uses this id.
    DuplicateId(TaskId),
    /// Another task already uses this title (case-insensitive).
    DuplicateTitle(String),
    /// No task with this id.
    NotFound(TaskId),
}

impl Display for CollectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { id, source } => write!(f, "invalid task {id}: {source}"),
            Self::DuplicateId(id) => write!(f, "duplicate task id: {id}"),
            Self::DuplicateTitle(title) => write!(f, "a task titled `{title}` already exists"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
        }
    }
}

impl Error for CollectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Ordered set of tasks keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCollection {
    tasks: Vec<Task>,
}

impl TaskCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a collection from decoded records.
    ///
    /// Titles are trimmed and tags normalized before validation.
    /// Checks per-task invariants and id uniqueness only; duplicate titles
    /// are tolerated so previously persisted data always loads.
    pub fn from_tasks(mut tasks: Vec<Task>) -> Result<Self, CollectionError> {
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &mut tasks {
            task.canonicalize();
            validate_task(task)?;
            if !seen.insert(task.id) {
                return Err(CollectionError::DuplicateId(task.id));
            }
        }
        Ok(Self { tasks })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Appends a new task and returns its id.
    pub fn add(&mut self, mut task: Task) -> Result<TaskId, CollectionError> {
        task.canonicalize();
        validate_task(&task)?;
        if self.get(task.id).is_some() {
            return Err(CollectionError::DuplicateId(task.id));
        }
        self.ensure_unique_title(&task)?;
        let id = task.id;
        self.tasks.push(task);
        Ok(id)
    }

    /// Replaces the stored task with the same id.
    pub fn update(&mut self, mut task: Task) -> Result<(), CollectionError> {
        task.canonicalize();
        validate_task(&task)?;
        self.ensure_unique_title(&task)?;
        let slot = self
            .tasks
            .iter_mut()
            .find(|existing| existing.id == task.id)
            .ok_or(CollectionError::NotFound(task.id))?;
        *slot = task;
        Ok(())
    }

    /// Removes and returns the task with `id`.
    pub fn remove(&mut self, id: TaskId) -> Result<Task, CollectionError> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or(CollectionError::NotFound(id))?;
        Ok(self.tasks.remove(index))
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Case-insensitive title substring filter. Blank text matches everything.
    pub fn search(&self, text: &str) -> Vec<&Task> {
        let needle = text.trim().to_lowercase();
        self.tasks
            .iter()
            .filter(|task| needle.is_empty() || task.title.to_lowercase().contains(&needle))
            .collect()
    }

    /// Tasks placed in one matrix cell, sorted by `order`.
    pub fn in_cell(&self, urgency: u8, importance: u8) -> Vec<&Task> {
        let mut cell: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| task.urgency == urgency && task.importance == importance)
            .collect();
        cell.sort_by_key(|task| task.order);
        cell
    }

    /// Tasks in one quadrant, sorted by `order`.
    pub fn in_quadrant(&self, quadrant: Quadrant) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| task.quadrant() == quadrant)
            .collect();
        tasks.sort_by_key(|task| task.order);
        tasks
    }

    /// Order value that appends a task at the end of a cell.
    pub fn next_order_in_cell(&self, urgency: u8, importance: u8) -> i64 {
        self.in_cell(urgency, importance)
            .last()
            .map_or(0, |task| task.order.saturating_add(1))
    }

    /// Raises urgency of open tasks whose deadline is within `window_days`.
    ///
    /// Returns how many tasks changed.
    pub fn escalate_due_soon(&mut self, today: NaiveDate, window_days: i64) -> usize {
        let mut changed = 0;
        for task in &mut self.tasks {
            if task.completed || task.urgency >= LEVEL_MAX {
                continue;
            }
            if task.is_due_within(today, window_days) {
                task.urgency = task
                    .urgency
                    .saturating_add(DEADLINE_URGENCY_STEP)
                    .min(LEVEL_MAX);
                changed += 1;
            }
        }
        changed
    }

    fn ensure_unique_title(&self, task: &Task) -> Result<(), CollectionError> {
        let title = task.title.trim().to_lowercase();
        let clash = self
            .tasks
            .iter()
            .any(|other| other.id != task.id && other.title.trim().to_lowercase() == title);
        if clash {
            return Err(CollectionError::DuplicateTitle(task.title.trim().to_string()));
        }
        Ok(())
    }
}

impl IntoIterator for TaskCollection {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

fn validate_task(task: &Task) -> Result<(), CollectionError> {
    task.validate().map_err(|source| CollectionError::Invalid {
        id: task.id,
        source,
    })
}

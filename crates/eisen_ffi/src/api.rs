//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the encrypted task store to Dart via FRB as plain records.
//! - Translate typed core errors into stable `error_code` strings.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - One store handle per process; `store_open` replaces it.
//! - Key derivation runs on the caller's thread, so the UI must call the
//!   store functions off its input thread.
//! - Passwords never appear in responses or logs.

use chrono::{DateTime, NaiveDate, Utc};
use eisen_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    EncryptedTaskStore, StoreError, StoreOptions, StoreState, Task, TaskCollection, TaskStatus,
    DEFAULT_PROFILE,
};
use log::warn;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
static ACTIVE_STORE: OnceLock<Mutex<Option<Arc<EncryptedTaskStore>>>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Task record as seen by Dart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfiTask {
    /// UUID string; empty means "new task, assign an id".
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// `1..=5`.
    pub urgency: u8,
    /// `1..=5`.
    pub importance: u8,
    /// `todo|doing|done`.
    pub status: String,
    pub tags: Vec<String>,
    /// `YYYY-MM-DD`.
    pub due_date: Option<String>,
    pub completed: bool,
    /// Completion time as Unix epoch milliseconds.
    pub completed_at_ms: Option<i64>,
    pub order: i64,
    /// `do_first|schedule|delegate|eliminate`; output only, ignored on input.
    pub quadrant: String,
}

/// Response envelope shared by every store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// `none|uninitialized|locked|unlocked` after the call.
    pub state: String,
    /// Stable machine-readable failure code.
    pub error_code: Option<String>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
    /// Current tasks when the store is unlocked, otherwise empty.
    pub tasks: Vec<FfiTask>,
}

impl StoreResponse {
    fn success(store: &EncryptedTaskStore, message: impl Into<String>) -> Self {
        let tasks = store
            .tasks()
            .map(|tasks| tasks.iter().map(to_ffi_task).collect())
            .unwrap_or_default();
        Self {
            ok: true,
            state: state_label(store),
            error_code: None,
            message: message.into(),
            tasks,
        }
    }

    fn failure(state: String, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            state,
            error_code: Some(error_code.to_string()),
            message: message.into(),
            tasks: Vec::new(),
        }
    }

    fn from_store_error(store: &EncryptedTaskStore, operation: &str, err: StoreError) -> Self {
        let code = store_error_code(&err);
        warn!(
            "event=ffi_store module=ffi operation={} status=error error_code={}",
            operation, code
        );
        Self::failure(state_label(store), code, format!("{operation} failed: {err}"))
    }

    fn not_open() -> Self {
        Self::failure(
            "none".to_string(),
            "not_open",
            "no store is open; call store_open first",
        )
    }
}

/// Opens (without unlocking) the store for `profile` in `dir`.
///
/// # FFI contract
/// - Replaces any previously opened store; the old one is locked first.
/// - `profile` defaults to `default` when `None` or blank.
#[flutter_rust_bridge::frb(sync)]
pub fn store_open(dir: String, profile: Option<String>) -> StoreResponse {
    let dir = dir.trim();
    if dir.is_empty() {
        return StoreResponse::failure("none".to_string(), "invalid_input", "dir cannot be empty");
    }
    let profile = profile
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_PROFILE);

    let store = match EncryptedTaskStore::open(dir, profile, StoreOptions::default()) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            return StoreResponse::failure(
                "none".to_string(),
                store_error_code(&err),
                format!("store_open failed: {err}"),
            )
        }
    };

    let mut slot = store_slot();
    if let Some(previous) = slot.replace(Arc::clone(&store)) {
        previous.lock();
    }
    drop(slot);
    StoreResponse::success(&store, "store opened")
}

/// Reports the lifecycle state of the open store.
#[flutter_rust_bridge::frb(sync)]
pub fn store_state() -> StoreResponse {
    with_store(|store| StoreResponse::success(store, "ok"))
}

/// Creates a new store protected by `password` and unlocks it.
#[flutter_rust_bridge::frb(sync)]
pub fn store_create(password: String) -> StoreResponse {
    with_store(|store| match store.create(&password) {
        Ok(_) => StoreResponse::success(store, "store created"),
        Err(err) => StoreResponse::from_store_error(store, "store_create", err),
    })
}

/// Unlocks the store; `wrong_password` is the retryable failure.
#[flutter_rust_bridge::frb(sync)]
pub fn store_unlock(password: String) -> StoreResponse {
    with_store(|store| match store.unlock(&password) {
        Ok(_) => StoreResponse::success(store, "store unlocked"),
        Err(err) => StoreResponse::from_store_error(store, "store_unlock", err),
    })
}

/// Returns the tasks of the unlocked store.
#[flutter_rust_bridge::frb(sync)]
pub fn store_tasks() -> StoreResponse {
    with_store(|store| match store.tasks() {
        Ok(_) => StoreResponse::success(store, "ok"),
        Err(err) => StoreResponse::from_store_error(store, "store_tasks", err),
    })
}

/// Replaces the persisted task collection with `tasks`.
///
/// Tasks with an empty `id` get a fresh one.
#[flutter_rust_bridge::frb(sync)]
pub fn store_save(tasks: Vec<FfiTask>) -> StoreResponse {
    with_store(|store| {
        let collection = match to_collection(tasks) {
            Ok(collection) => collection,
            Err(message) => {
                return StoreResponse::failure(state_label(store), "invalid_input", message)
            }
        };
        match store.save(&collection) {
            Ok(()) => StoreResponse::success(store, "tasks saved"),
            Err(err) => StoreResponse::from_store_error(store, "store_save", err),
        }
    })
}

/// Re-encrypts the store under `new_password`.
#[flutter_rust_bridge::frb(sync)]
pub fn store_change_password(old_password: String, new_password: String) -> StoreResponse {
    with_store(
        |store| match store.change_password(&old_password, &new_password) {
            Ok(()) => StoreResponse::success(store, "password changed"),
            Err(err) => StoreResponse::from_store_error(store, "store_change_password", err),
        },
    )
}

/// Drops the key and cached tasks.
#[flutter_rust_bridge::frb(sync)]
pub fn store_lock() -> StoreResponse {
    with_store(|store| {
        store.lock();
        StoreResponse::success(store, "store locked")
    })
}

/// Deletes every persisted artifact of a locked store.
#[flutter_rust_bridge::frb(sync)]
pub fn store_reset() -> StoreResponse {
    with_store(|store| match store.reset() {
        Ok(()) => StoreResponse::success(store, "store reset"),
        Err(err) => StoreResponse::from_store_error(store, "store_reset", err),
    })
}

fn store_slot() -> std::sync::MutexGuard<'static, Option<Arc<EncryptedTaskStore>>> {
    ACTIVE_STORE
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Runs `f` against the open store without holding the slot lock, so slow
/// key derivation never blocks `store_state`.
fn with_store(f: impl FnOnce(&EncryptedTaskStore) -> StoreResponse) -> StoreResponse {
    let store = store_slot().clone();
    match store {
        Some(store) => f(&store),
        None => StoreResponse::not_open(),
    }
}

fn state_label(store: &EncryptedTaskStore) -> String {
    match store.state() {
        Ok(StoreState::Uninitialized) => "uninitialized",
        Ok(StoreState::Locked) => "locked",
        Ok(StoreState::Unlocked) => "unlocked",
        Err(_) => "unknown",
    }
    .to_string()
}

fn store_error_code(err: &StoreError) -> &'static str {
    match err {
        StoreError::WrongPassword => "wrong_password",
        StoreError::AlreadyExists => "already_exists",
        StoreError::InvalidState { .. } => "invalid_state",
        StoreError::WeakPassword { .. } => "weak_password",
        StoreError::InvalidProfile(_) => "invalid_profile",
        StoreError::MissingBlob => "missing_blob",
        StoreError::NoSuchBackup(_) => "no_such_backup",
        StoreError::CorruptBackup(_) => "corrupt_backup",
        StoreError::Codec(_) => "invalid_tasks",
        StoreError::Kdf(_) => "kdf",
        StoreError::Config(_) => "config",
        StoreError::Encryption => "encryption",
        StoreError::Io(_) => "io",
    }
}

fn to_collection(tasks: Vec<FfiTask>) -> Result<TaskCollection, String> {
    let tasks = tasks
        .into_iter()
        .map(to_core_task)
        .collect::<Result<Vec<_>, _>>()?;
    TaskCollection::from_tasks(tasks).map_err(|err| err.to_string())
}

fn to_core_task(task: FfiTask) -> Result<Task, String> {
    let id = if task.id.trim().is_empty() {
        Uuid::new_v4()
    } else {
        Uuid::parse_str(task.id.trim()).map_err(|err| format!("invalid task id `{}`: {err}", task.id))?
    };
    let mut core = Task::with_id(id, task.title, task.urgency, task.importance)
        .map_err(|err| err.to_string())?;
    core.description = task.description.filter(|text| !text.trim().is_empty());
    core.status = parse_status(&task.status)?;
    core.set_tags(&task.tags);
    core.due_date = task
        .due_date
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .map_err(|err| format!("invalid due_date `{value}`: {err}"))
        })
        .transpose()?;
    core.completed = task.completed;
    core.completed_date = task
        .completed_at_ms
        .map(|ms| {
            DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| format!("completed_at_ms out of range: {ms}"))
        })
        .transpose()?;
    core.order = task.order;
    core.validate().map_err(|err| err.to_string())?;
    Ok(core)
}

fn to_ffi_task(task: &Task) -> FfiTask {
    FfiTask {
        id: task.id.to_string(),
        title: task.title.clone(),
        description: task.description.clone(),
        urgency: task.urgency,
        importance: task.importance,
        status: status_label(task.status).to_string(),
        tags: task.tags.iter().cloned().collect(),
        due_date: task
            .due_date
            .map(|date| date.format(DATE_FORMAT).to_string()),
        completed: task.completed,
        completed_at_ms: task.completed_date.map(|at| at.timestamp_millis()),
        order: task.order,
        quadrant: quadrant_label(task).to_string(),
    }
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "todo" => Ok(TaskStatus::Todo),
        "doing" => Ok(TaskStatus::Doing),
        "done" => Ok(TaskStatus::Done),
        other => Err(format!("unsupported status `{other}`; expected todo|doing|done")),
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "todo",
        TaskStatus::Doing => "doing",
        TaskStatus::Done => "done",
    }
}

fn quadrant_label(task: &Task) -> &'static str {
    match task.quadrant() {
        eisen_core::Quadrant::DoFirst => "do_first",
        eisen_core::Quadrant::Schedule => "schedule",
        eisen_core::Quadrant::Delegate => "delegate",
        eisen_core::Quadrant::Eliminate => "eliminate",
    }
}

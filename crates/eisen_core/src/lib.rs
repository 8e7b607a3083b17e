//! Core of the Eisenhower task store.
//! Owns the task model, its encrypted persistence and every invariant the UI relies on.

pub mod codec;
pub mod crypto;
pub mod logging;
pub mod model;
pub mod store;

pub use codec::{CodecError, CodecResult};
pub use crypto::kdf::{KdfError, KdfParams};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::collection::{CollectionError, TaskCollection};
pub use model::task::{Quadrant, Task, TaskId, TaskStatus, TaskValidationError};
pub use store::backend::{FsBackend, StoreBackend, StorePaths, DEFAULT_PROFILE};
pub use store::config::StoreOptions;
pub use store::{EncryptedTaskStore, StoreError, StoreResult, StoreState};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

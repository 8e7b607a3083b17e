//! Encrypted store state machine.
//!
//! # Responsibility
//! - Drive `Uninitialized -> Unlocked`, `Locked -> Unlocked`, `Unlocked -> Locked`.
//! - Hold the derived key only while unlocked.
//!
//! # Invariants
//! - The blob header (salt + params) is authoritative for decryption; the
//!   config record is repaired from it after a successful unlock.
//! - Password change writes the new blob before the new config and restores
//!   the old blob if the config write fails.
//! - Wrong-password causes (authentication vs codec) are only visible in logs.

use super::backend::{FsBackend, StoreBackend, StorePaths};
use super::config::{StoreConfig, StoreOptions};
use super::{StoreError, StoreResult, StoreState};
use crate::codec::{self, CodecError};
use crate::crypto::blob::EncryptedBlob;
use crate::crypto::kdf::{derive_key, DerivedKey, KdfParams, Salt};
use crate::model::collection::TaskCollection;
use log::{error, info, warn};
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use zeroize::Zeroize;

struct Session {
    key: DerivedKey,
    salt: Salt,
    params: KdfParams,
    tasks: TaskCollection,
}

/// Password-protected task store for one profile.
///
/// All operations take the same internal lock, so `save` and
/// `change_password` never interleave. Key derivation runs under that lock
/// and is intentionally slow; UI callers should invoke the store off their
/// input thread.
pub struct EncryptedTaskStore<B: StoreBackend = FsBackend> {
    backend: B,
    options: StoreOptions,
    session: Mutex<Option<Session>>,
}

impl EncryptedTaskStore<FsBackend> {
    /// Opens the filesystem store for `profile` inside `dir`.
    ///
    /// Does not touch the disk; use `state()` to inspect what exists.
    pub fn open(
        dir: impl Into<PathBuf>,
        profile: &str,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let paths = StorePaths::new(dir, profile)
            .ok_or_else(|| StoreError::InvalidProfile(profile.to_string()))?;
        Ok(Self::with_backend(FsBackend::new(paths), options))
    }
}

impl<B: StoreBackend> EncryptedTaskStore<B> {
    pub fn with_backend(backend: B, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            session: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreResult<StoreState> {
        let session = self.session();
        self.state_of(&session)
    }

    /// Creates a new store protected by `password` and unlocks it.
    ///
    /// # Errors
    /// - `AlreadyExists` when any persisted artifact is present.
    /// - `WeakPassword` when `password` is shorter than policy allows.
    /// - `Io` when persisting fails; partial artifacts are removed.
    pub fn create(&self, password: &str) -> StoreResult<TaskCollection> {
        let started_at = Instant::now();
        let mut session = self.session();
        if session.is_some() {
            return Err(StoreError::InvalidState {
                operation: "create",
                state: StoreState::Unlocked,
            });
        }
        if self.backend.exists()? {
            warn!("event=store_create module=store status=error error_code=already_exists");
            return Err(StoreError::AlreadyExists);
        }
        self.check_password_policy(password)?;
        let params = self.options.kdf;
        params.validate()?;

        let salt = Salt::generate();
        let key = derive_key(password, &salt, &params)?;
        let tasks = TaskCollection::new();
        let blob = seal_tasks(&key, &salt, &params, &tasks)?;
        let config = StoreConfig {
            salt: salt.clone(),
            kdf: params,
        };

        if let Err(err) = self.persist_new_store(&blob, &config) {
            error!(
                "event=store_create module=store status=error duration_ms={} error_code=persist_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            if let Err(cleanup_err) = self.backend.remove_all() {
                warn!(
                    "event=store_create module=store status=error error_code=cleanup_failed error={}",
                    cleanup_err
                );
            }
            return Err(err);
        }

        info!(
            "event=store_create module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        *session = Some(Session {
            key,
            salt,
            params,
            tasks: tasks.clone(),
        });
        Ok(tasks)
    }

    /// Unlocks an existing store and returns its tasks.
    ///
    /// Malformed blobs, failed authentication and undecodable payloads all
    /// return `WrongPassword`; nothing on disk is modified except a config
    /// repair after success. Retry limits are the caller's policy.
    pub fn unlock(&self, password: &str) -> StoreResult<TaskCollection> {
        let started_at = Instant::now();
        let mut session = self.session();
        if session.is_some() {
            return Err(StoreError::InvalidState {
                operation: "unlock",
                state: StoreState::Unlocked,
            });
        }

        let Some(bytes) = self.backend.read_blob()? else {
            if self.backend.exists()? {
                error!("event=store_unlock module=store status=error error_code=blob_missing");
                return Err(StoreError::MissingBlob);
            }
            return Err(StoreError::InvalidState {
                operation: "unlock",
                state: StoreState::Uninitialized,
            });
        };

        let blob = match EncryptedBlob::parse(&bytes) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(
                    "event=store_unlock module=store status=error duration_ms={} error_code=blob_malformed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(StoreError::WrongPassword);
            }
        };
        let config_in_sync = self.config_matches(&blob);

        let key = derive_key(password, &blob.salt, &blob.params)?;
        let tasks = match open_tasks(&key, &blob) {
            Ok(tasks) => tasks,
            Err(code) => {
                warn!(
                    "event=store_unlock module=store status=error duration_ms={} error_code={}",
                    started_at.elapsed().as_millis(),
                    code
                );
                return Err(StoreError::WrongPassword);
            }
        };

        if !config_in_sync {
            self.repair_config(&blob);
        }

        info!(
            "event=store_unlock module=store status=ok duration_ms={} task_count={}",
            started_at.elapsed().as_millis(),
            tasks.len()
        );
        *session = Some(Session {
            key,
            salt: blob.salt,
            params: blob.params,
            tasks: tasks.clone(),
        });
        Ok(tasks)
    }

    /// Returns the cached collection of the unlocked session.
    pub fn tasks(&self) -> StoreResult<TaskCollection> {
        let session = self.session();
        match session.as_ref() {
            Some(session) => Ok(session.tasks.clone()),
            None => Err(self.not_unlocked("tasks")),
        }
    }

    /// Encrypts and atomically persists `tasks`.
    ///
    /// The previous blob is rolled into the backup slots first.
    pub fn save(&self, tasks: &TaskCollection) -> StoreResult<()> {
        let started_at = Instant::now();
        let mut guard = self.session();
        let Some(session) = guard.as_mut() else {
            return Err(self.not_unlocked("save"));
        };

        let blob = seal_tasks(&session.key, &session.salt, &session.params, tasks)?;
        let written = self
            .backend
            .roll_backups(self.options.backup_count)
            .and_then(|()| self.backend.write_blob(&blob.to_bytes()));
        if let Err(err) = written {
            error!(
                "event=store_save module=store status=error duration_ms={} error_code=write_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }

        session.tasks = tasks.clone();
        info!(
            "event=store_save module=store status=ok duration_ms={} task_count={}",
            started_at.elapsed().as_millis(),
            tasks.len()
        );
        Ok(())
    }

    /// Re-encrypts the loaded tasks under `new_password` with a fresh salt.
    ///
    /// Write order: backups, new blob, new config. A failed blob write leaves
    /// the old blob in place; a failed config write restores the old blob.
    /// Either way the store still opens with `old_password`.
    ///
    /// Backups are not re-encrypted: every `.bak.N` written before the change,
    /// including the one rolled by this call, still opens with `old_password`.
    /// If the old password is compromised, call `reset` or overwrite the
    /// backups with further saves (`backup_count` of them) to retire it.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> StoreResult<()> {
        let started_at = Instant::now();
        let mut guard = self.session();
        let Some(session) = guard.as_mut() else {
            return Err(self.not_unlocked("change_password"));
        };
        self.check_password_policy(new_password)?;
        let new_params = self.options.kdf;
        new_params.validate()?;

        let old_bytes = self.backend.read_blob()?.ok_or(StoreError::MissingBlob)?;
        let old_blob = EncryptedBlob::parse(&old_bytes).map_err(|err| {
            warn!(
                "event=store_change_password module=store status=error error_code=blob_malformed error={}",
                err
            );
            StoreError::WrongPassword
        })?;
        let old_key = derive_key(old_password, &old_blob.salt, &old_blob.params)?;
        match old_blob.open(&old_key) {
            Ok(mut plaintext) => plaintext.zeroize(),
            Err(_) => {
                warn!(
                    "event=store_change_password module=store status=error duration_ms={} error_code=auth_failed",
                    started_at.elapsed().as_millis()
                );
                return Err(StoreError::WrongPassword);
            }
        }
        drop(old_key);

        let new_salt = Salt::generate();
        let new_key = derive_key(new_password, &new_salt, &new_params)?;
        let new_blob = seal_tasks(&new_key, &new_salt, &new_params, &session.tasks)?;
        let new_config = StoreConfig {
            salt: new_salt.clone(),
            kdf: new_params,
        }
        .to_json()?;

        let blob_written = self
            .backend
            .roll_backups(self.options.backup_count)
            .and_then(|()| self.backend.write_blob(&new_blob.to_bytes()));
        if let Err(err) = blob_written {
            error!(
                "event=store_change_password module=store status=error duration_ms={} error_code=blob_write_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }

        if let Err(err) = self.backend.write_config(&new_config) {
            error!(
                "event=store_change_password module=store status=error duration_ms={} error_code=config_write_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            if let Err(rollback_err) = self.backend.write_blob(&old_bytes) {
                // The new blob is self-describing, so the new password still opens it.
                error!(
                    "event=store_change_password module=store status=error error_code=rollback_failed error={}",
                    rollback_err
                );
            }
            return Err(err.into());
        }

        session.key = new_key;
        session.salt = new_salt;
        session.params = new_params;
        info!(
            "event=store_change_password module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Drops the key (zeroized) and the cached tasks.
    pub fn lock(&self) {
        let mut session = self.session();
        if session.take().is_some() {
            info!("event=store_lock module=store status=ok");
        }
    }

    /// Existing backup slots, most recent first.
    pub fn backups(&self) -> StoreResult<Vec<usize>> {
        let _session = self.session();
        Ok(self.backend.backup_slots()?)
    }

    /// Replaces the live blob with backup `slot`. Only valid while locked.
    ///
    /// The restored blob opens with the password in force when it was written.
    pub fn restore_backup(&self, slot: usize) -> StoreResult<()> {
        let session = self.session();
        self.require_state(&session, "restore_backup", StoreState::Locked)?;

        let bytes = self
            .backend
            .read_backup(slot)?
            .ok_or(StoreError::NoSuchBackup(slot))?;
        if let Err(err) = EncryptedBlob::parse(&bytes) {
            warn!(
                "event=store_restore_backup module=store status=error slot={} error_code=blob_malformed error={}",
                slot, err
            );
            return Err(StoreError::CorruptBackup(slot));
        }
        self.backend.write_blob(&bytes)?;
        info!(
            "event=store_restore_backup module=store status=ok slot={}",
            slot
        );
        Ok(())
    }

    /// Deletes every persisted artifact. Only valid while locked.
    ///
    /// This is the explicit data-loss path offered after repeated unlock failures.
    pub fn reset(&self) -> StoreResult<()> {
        let session = self.session();
        self.require_state(&session, "reset", StoreState::Locked)?;
        self.backend.remove_all()?;
        warn!("event=store_reset module=store status=ok");
        Ok(())
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_of(&self, session: &Option<Session>) -> StoreResult<StoreState> {
        if session.is_some() {
            return Ok(StoreState::Unlocked);
        }
        if self.backend.exists()? {
            Ok(StoreState::Locked)
        } else {
            Ok(StoreState::Uninitialized)
        }
    }

    fn require_state(
        &self,
        session: &Option<Session>,
        operation: &'static str,
        expected: StoreState,
    ) -> StoreResult<()> {
        let state = self.state_of(session)?;
        if state != expected {
            return Err(StoreError::InvalidState { operation, state });
        }
        Ok(())
    }

    /// Error for an operation that needs an unlocked session but has none.
    fn not_unlocked(&self, operation: &'static str) -> StoreError {
        match self.backend.exists() {
            Ok(true) => StoreError::InvalidState {
                operation,
                state: StoreState::Locked,
            },
            Ok(false) => StoreError::InvalidState {
                operation,
                state: StoreState::Uninitialized,
            },
            Err(err) => StoreError::Io(err),
        }
    }

    fn check_password_policy(&self, password: &str) -> StoreResult<()> {
        let min_len = self.options.min_password_len.max(1);
        if password.chars().count() < min_len {
            return Err(StoreError::WeakPassword { min_len });
        }
        Ok(())
    }

    fn persist_new_store(&self, blob: &EncryptedBlob, config: &StoreConfig) -> StoreResult<()> {
        self.backend.write_blob(&blob.to_bytes())?;
        self.backend.write_config(&config.to_json()?)?;
        Ok(())
    }

    fn config_matches(&self, blob: &EncryptedBlob) -> bool {
        let bytes = match self.backend.read_config() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!("event=store_unlock module=store status=warn error_code=config_missing");
                return false;
            }
            Err(err) => {
                warn!(
                    "event=store_unlock module=store status=warn error_code=config_read_failed error={}",
                    err
                );
                return false;
            }
        };
        match StoreConfig::from_json(&bytes) {
            Ok(config) if config.salt == blob.salt && config.kdf == blob.params => true,
            Ok(_) => {
                warn!("event=store_unlock module=store status=warn error_code=config_out_of_sync");
                false
            }
            Err(err) => {
                warn!(
                    "event=store_unlock module=store status=warn error_code=config_invalid error={}",
                    err
                );
                false
            }
        }
    }

    fn repair_config(&self, blob: &EncryptedBlob) {
        let config = StoreConfig {
            salt: blob.salt.clone(),
            kdf: blob.params,
        };
        let written = config
            .to_json()
            .map_err(StoreError::from)
            .and_then(|bytes| self.backend.write_config(&bytes).map_err(StoreError::from));
        match written {
            Ok(()) => info!("event=store_config_repair module=store status=ok"),
            Err(err) => warn!(
                "event=store_config_repair module=store status=error error={}",
                err
            ),
        }
    }
}

impl<B: StoreBackend> Debug for EncryptedTaskStore<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedTaskStore")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn seal_tasks(
    key: &DerivedKey,
    salt: &Salt,
    params: &KdfParams,
    tasks: &TaskCollection,
) -> StoreResult<EncryptedBlob> {
    let mut payload = codec::encode(tasks)?;
    let sealed = EncryptedBlob::seal(key, salt, params, &payload);
    payload.zeroize();
    sealed.map_err(|_| StoreError::Encryption)
}

/// Decrypts and decodes; the error is a diagnostic code for logs only.
fn open_tasks(key: &DerivedKey, blob: &EncryptedBlob) -> Result<TaskCollection, &'static str> {
    let mut plaintext = blob.open(key).map_err(|_| "auth_failed")?;
    let decoded = codec::decode(&plaintext);
    plaintext.zeroize();
    decoded.map_err(|err| match err {
        CodecError::Json(_) => "codec_json",
        CodecError::UnsupportedFormat(_) => "codec_unsupported_format",
        CodecError::UnexpectedShape(_) => "codec_shape",
        CodecError::Invalid(_) => "codec_invariant",
    })
}

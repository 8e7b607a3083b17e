//! Encrypted task store.
//!
//! # Responsibility
//! - Orchestrate key derivation, encryption and the codec behind a narrow
//!   create/unlock/save/change_password/lock API.
//! - Persist the config record and the encrypted blob atomically.
//!
//! # Invariants
//! - A save never leaves the blob empty or half-written.
//! - A failed password change leaves the store openable with the old password.
//! - Mutating operations are serialized by one mutex per store.

use crate::codec::CodecError;
use crate::crypto::kdf::KdfError;
use self::config::ConfigError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

pub mod backend;
pub mod config;
mod encrypted_store;

pub use encrypted_store::EncryptedTaskStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Nothing persisted yet.
    Uninitialized,
    /// Persisted, no key in memory.
    Locked,
    /// Key and task collection in memory.
    Unlocked,
}

impl Display for StoreState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Locked => write!(f, "locked"),
            Self::Unlocked => write!(f, "unlocked"),
        }
    }
}

/// Store-level error surfaced to callers.
#[derive(Debug)]
pub enum StoreError {
    /// Password did not open the store (authentication or codec failure).
    WrongPassword,
    /// `create` found existing persisted state.
    AlreadyExists,
    /// Operation not allowed in the current state.
    InvalidState {
        operation: &'static str,
        state: StoreState,
    },
    /// New password rejected by policy.
    WeakPassword { min_len: usize },
    /// Profile id is not `[A-Za-z0-9_-]{1,64}`.
    InvalidProfile(String),
    /// Config record exists but the blob does not.
    MissingBlob,
    /// Requested backup slot does not exist.
    NoSuchBackup(usize),
    /// Backup slot is not a readable blob.
    CorruptBackup(usize),
    /// Collection handed to `save` violates invariants.
    Codec(CodecError),
    /// Configured key derivation params are invalid.
    Kdf(KdfError),
    /// Config record could not be produced.
    Config(ConfigError),
    /// Encryption backend failure.
    Encryption,
    Io(io::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongPassword => write!(f, "wrong password"),
            Self::AlreadyExists => write!(f, "a store already exists at this location"),
            Self::InvalidState { operation, state } => {
                write!(f, "`{operation}` is not allowed while the store is {state}")
            }
            Self::WeakPassword { min_len } => {
                write!(f, "password must be at least {min_len} characters")
            }
            Self::InvalidProfile(profile) => write!(f, "invalid store profile `{profile}`"),
            Self::MissingBlob => write!(f, "store config exists but encrypted tasks are missing"),
            Self::NoSuchBackup(slot) => write!(f, "backup {slot} does not exist"),
            Self::CorruptBackup(slot) => write!(f, "backup {slot} is not a valid encrypted store"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Kdf(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Encryption => write!(f, "encryption failed"),
            Self::Io(err) => write!(f, "store io error: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Kdf(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CodecError> for StoreError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

impl From<KdfError> for StoreError {
    fn from(value: KdfError) -> Self {
        Self::Kdf(value)
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

//! Persistence backends for the encrypted store.
//!
//! # Responsibility
//! - Map one store profile to its config record, blob and backup files.
//! - Replace files atomically: temp file in the same directory, flush,
//!   `sync_all`, rename over the destination.
//!
//! # Invariants
//! - A failed write leaves the destination untouched.
//! - Temp files are removed on every error path (dropped `NamedTempFile`).
//! - Backups are contiguous: `.bak.1` is the most recent.

use log::warn;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;

pub const DEFAULT_PROFILE: &str = "default";
const MAX_PROFILE_LEN: usize = 64;
const CONFIG_SUFFIX: &str = "config.json";
const BLOB_SUFFIX: &str = "tasks.enc";

/// Byte-level storage used by `EncryptedTaskStore`.
///
/// Implementations must make `write_config`/`write_blob` atomic.
pub trait StoreBackend: Send + Sync {
    /// Whether any persisted artifact (config or blob) exists.
    fn exists(&self) -> io::Result<bool>;
    fn read_config(&self) -> io::Result<Option<Vec<u8>>>;
    fn write_config(&self, bytes: &[u8]) -> io::Result<()>;
    fn read_blob(&self) -> io::Result<Option<Vec<u8>>>;
    fn write_blob(&self, bytes: &[u8]) -> io::Result<()>;
    /// Copies the live blob to backup slot 1, shifting older slots, keeping at most `keep`.
    fn roll_backups(&self, keep: usize) -> io::Result<()>;
    /// Existing backup slots, most recent first.
    fn backup_slots(&self) -> io::Result<Vec<usize>>;
    fn read_backup(&self, slot: usize) -> io::Result<Option<Vec<u8>>>;
    /// Deletes config, blob and backups.
    fn remove_all(&self) -> io::Result<()>;
}

/// Location of one store profile on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    dir: PathBuf,
    profile: String,
}

impl StorePaths {
    /// Returns `None` when `profile` is not `[A-Za-z0-9_-]{1,64}`.
    pub fn new(dir: impl Into<PathBuf>, profile: &str) -> Option<Self> {
        let profile = profile.trim();
        if !is_valid_profile(profile) {
            return None;
        }
        Some(Self {
            dir: dir.into(),
            profile: profile.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{CONFIG_SUFFIX}", self.profile))
    }

    pub fn blob_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{BLOB_SUFFIX}", self.profile))
    }

    pub fn backup_path(&self, slot: usize) -> PathBuf {
        self.dir
            .join(format!("{}.{BLOB_SUFFIX}.bak.{slot}", self.profile))
    }
}

/// Validates a profile identifier.
pub fn is_valid_profile(profile: &str) -> bool {
    !profile.is_empty()
        && profile.len() <= MAX_PROFILE_LEN
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Filesystem backend.
#[derive(Debug, Clone)]
pub struct FsBackend {
    paths: StorePaths,
}

impl FsBackend {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }
}

impl StoreBackend for FsBackend {
    fn exists(&self) -> io::Result<bool> {
        Ok(self.paths.blob_path().try_exists()? || self.paths.config_path().try_exists()?)
    }

    fn read_config(&self) -> io::Result<Option<Vec<u8>>> {
        read_optional(&self.paths.config_path())
    }

    fn write_config(&self, bytes: &[u8]) -> io::Result<()> {
        atomic_write_bytes(&self.paths.config_path(), bytes)
    }

    fn read_blob(&self) -> io::Result<Option<Vec<u8>>> {
        read_optional(&self.paths.blob_path())
    }

    fn write_blob(&self, bytes: &[u8]) -> io::Result<()> {
        atomic_write_bytes(&self.paths.blob_path(), bytes)
    }

    fn roll_backups(&self, keep: usize) -> io::Result<()> {
        // Slot `keep` is about to be overwritten; anything beyond it is left
        // over from a larger `keep`.
        let mut stale = keep.max(1);
        while self.paths.backup_path(stale).try_exists()? {
            remove_if_exists(&self.paths.backup_path(stale))?;
            stale += 1;
        }
        if keep == 0 {
            return Ok(());
        }
        let Some(current) = self.read_blob()? else {
            return Ok(());
        };

        for slot in (1..keep).rev() {
            let from = self.paths.backup_path(slot);
            if from.try_exists()? {
                fs::rename(&from, self.paths.backup_path(slot + 1))?;
            }
        }
        atomic_write_bytes(&self.paths.backup_path(1), &current)
    }

    fn backup_slots(&self) -> io::Result<Vec<usize>> {
        let mut slots = Vec::new();
        let mut slot = 1;
        while self.paths.backup_path(slot).try_exists()? {
            slots.push(slot);
            slot += 1;
        }
        Ok(slots)
    }

    fn read_backup(&self, slot: usize) -> io::Result<Option<Vec<u8>>> {
        if slot == 0 {
            return Ok(None);
        }
        read_optional(&self.paths.backup_path(slot))
    }

    fn remove_all(&self) -> io::Result<()> {
        for slot in self.backup_slots()? {
            remove_if_exists(&self.paths.backup_path(slot))?;
        }
        remove_if_exists(&self.paths.blob_path())?;
        remove_if_exists(&self.paths.config_path())?;
        Ok(())
    }
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` yields `Some("")` for bare relative file names.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically replaces `dest` with `bytes`.
///
/// The temp file lives next to `dest` so the final rename never crosses
/// devices. If any step fails the temp file is dropped (and deleted) and
/// `dest` keeps its previous contents.
pub fn atomic_write_bytes(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = Builder::new()
        .prefix(".eisen-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|err| err.error)?;

    if let Err(err) = sync_parent_dir(dest) {
        // Best-effort: the file is already in place.
        warn!(
            "event=dir_sync module=store status=error error={}",
            err.kind()
        );
    }
    Ok(())
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let dir = File::open(parent_dir_or_dot(path))?;
    dir.sync_all()
}

#[cfg(test)]
mod tests {
    use super::{atomic_write_bytes, is_valid_profile, FsBackend, StoreBackend, StorePaths};
    use std::fs;

    #[test]
    fn profile_validation_rejects_path_like_names() {
        assert!(is_valid_profile("default"));
        assert!(is_valid_profile("work_2026-q1"));
        assert!(!is_valid_profile(""));
        assert!(!is_valid_profile("../etc"));
        assert!(!is_valid_profile("a/b"));
        assert!(!is_valid_profile(&"x".repeat(65)));
    }

    #[test]
    fn paths_are_co_located_by_profile() {
        let paths = StorePaths::new("/data", "home").unwrap();
        assert_eq!(paths.config_path().to_str(), Some("/data/home.config.json"));
        assert_eq!(paths.blob_path().to_str(), Some("/data/home.tasks.enc"));
        assert_eq!(
            paths.backup_path(2).to_str(),
            Some("/data/home.tasks.enc.bak.2")
        );
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("file.bin");
        atomic_write_bytes(&dest, b"first").unwrap();
        atomic_write_bytes(&dest, b"second").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"second");

        let leftovers = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn roll_backups_keeps_most_recent_first_and_caps_count() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(StorePaths::new(dir.path(), "p").unwrap());

        backend.roll_backups(2).unwrap();
        assert!(backend.backup_slots().unwrap().is_empty());

        for content in [b"v1", b"v2", b"v3", b"v4"] {
            backend.roll_backups(2).unwrap();
            backend.write_blob(content).unwrap();
        }

        assert_eq!(backend.backup_slots().unwrap(), vec![1, 2]);
        assert_eq!(backend.read_backup(1).unwrap().unwrap(), b"v3");
        assert_eq!(backend.read_backup(2).unwrap().unwrap(), b"v2");
        assert_eq!(backend.read_blob().unwrap().unwrap(), b"v4");
    }

    #[test]
    fn remove_all_clears_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(StorePaths::new(dir.path(), "p").unwrap());
        backend.write_config(b"{}").unwrap();
        backend.write_blob(b"v1").unwrap();
        backend.roll_backups(3).unwrap();
        assert!(backend.exists().unwrap());

        backend.remove_all().unwrap();
        assert!(!backend.exists().unwrap());
        assert!(backend.backup_slots().unwrap().is_empty());
    }
}

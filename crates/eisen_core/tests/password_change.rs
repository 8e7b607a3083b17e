use eisen_core::{
    EncryptedTaskStore, FsBackend, KdfParams, StoreBackend, StoreError, StoreOptions, StorePaths,
    StoreState, Task, TaskCollection,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

fn cheap_options() -> StoreOptions {
    StoreOptions {
        kdf: KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        ..StoreOptions::default()
    }
}

fn sample_tasks() -> TaskCollection {
    let mut tasks = TaskCollection::new();
    tasks.add(Task::new("Pay rent", 5, 5).unwrap()).unwrap();
    tasks.add(Task::new("Plan vacation", 2, 4).unwrap()).unwrap();
    tasks
}

/// Filesystem backend whose blob or config writes can be switched to fail.
struct FailingBackend {
    inner: FsBackend,
    fail_blob_writes: AtomicBool,
    fail_config_writes: AtomicBool,
    fail_all_blob_writes_after_config: AtomicBool,
    config_write_attempted: AtomicBool,
}

impl FailingBackend {
    fn new(inner: FsBackend) -> Self {
        Self {
            inner,
            fail_blob_writes: AtomicBool::new(false),
            fail_config_writes: AtomicBool::new(false),
            fail_all_blob_writes_after_config: AtomicBool::new(false),
            config_write_attempted: AtomicBool::new(false),
        }
    }
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "injected failure")
}

impl StoreBackend for FailingBackend {
    fn exists(&self) -> io::Result<bool> {
        self.inner.exists()
    }

    fn read_config(&self) -> io::Result<Option<Vec<u8>>> {
        self.inner.read_config()
    }

    fn write_config(&self, bytes: &[u8]) -> io::Result<()> {
        self.config_write_attempted.store(true, Ordering::SeqCst);
        if self.fail_config_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.write_config(bytes)
    }

    fn read_blob(&self) -> io::Result<Option<Vec<u8>>> {
        self.inner.read_blob()
    }

    fn write_blob(&self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_blob_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        if self.fail_all_blob_writes_after_config.load(Ordering::SeqCst)
            && self.config_write_attempted.load(Ordering::SeqCst)
        {
            return Err(injected());
        }
        self.inner.write_blob(bytes)
    }

    fn roll_backups(&self, keep: usize) -> io::Result<()> {
        self.inner.roll_backups(keep)
    }

    fn backup_slots(&self) -> io::Result<Vec<usize>> {
        self.inner.backup_slots()
    }

    fn read_backup(&self, slot: usize) -> io::Result<Option<Vec<u8>>> {
        self.inner.read_backup(slot)
    }

    fn remove_all(&self) -> io::Result<()> {
        self.inner.remove_all()
    }
}

fn failing_store(dir: &tempfile::TempDir) -> EncryptedTaskStore<FailingBackend> {
    let paths = StorePaths::new(dir.path(), "default").unwrap();
    EncryptedTaskStore::with_backend(FailingBackend::new(FsBackend::new(paths)), cheap_options())
}

#[test]
fn change_password_switches_which_password_unlocks() {
    let dir = tempfile::tempdir().unwrap();
    let store = EncryptedTaskStore::open(dir.path(), "default", cheap_options()).unwrap();
    store.create("correcthorse").unwrap();
    let tasks = sample_tasks();
    store.save(&tasks).unwrap();

    store.change_password("correcthorse", "newpass123").unwrap();
    assert_eq!(store.state().unwrap(), StoreState::Unlocked);
    store.lock();

    assert!(matches!(
        store.unlock("correcthorse"),
        Err(StoreError::WrongPassword)
    ));
    assert_eq!(store.unlock("newpass123").unwrap(), tasks);
}

#[test]
fn change_password_keeps_saving_under_the_new_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = EncryptedTaskStore::open(dir.path(), "default", cheap_options()).unwrap();
    store.create("correcthorse").unwrap();
    store.change_password("correcthorse", "newpass123").unwrap();

    let tasks = sample_tasks();
    store.save(&tasks).unwrap();
    store.lock();
    assert_eq!(store.unlock("newpass123").unwrap(), tasks);
}

#[test]
fn change_password_rejects_wrong_old_password_and_weak_new_password() {
    let dir = tempfile::tempdir().unwrap();
    let store = EncryptedTaskStore::open(dir.path(), "default", cheap_options()).unwrap();
    store.create("correcthorse").unwrap();
    let tasks = sample_tasks();
    store.save(&tasks).unwrap();

    assert!(matches!(
        store.change_password("not-the-password", "newpass123"),
        Err(StoreError::WrongPassword)
    ));
    assert!(matches!(
        store.change_password("correcthorse", "abc"),
        Err(StoreError::WeakPassword { .. })
    ));

    store.lock();
    assert!(matches!(
        store.change_password("correcthorse", "newpass123"),
        Err(StoreError::InvalidState {
            state: StoreState::Locked,
            ..
        })
    ));
    assert_eq!(store.unlock("correcthorse").unwrap(), tasks);
}

#[test]
fn failed_blob_write_keeps_old_password_and_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = failing_store(&dir);
    store.create("correcthorse").unwrap();
    let tasks = sample_tasks();
    store.save(&tasks).unwrap();

    store.backend().fail_blob_writes.store(true, Ordering::SeqCst);
    let err = store
        .change_password("correcthorse", "newpass123")
        .unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    store.backend().fail_blob_writes.store(false, Ordering::SeqCst);

    store.lock();
    assert!(matches!(
        store.unlock("newpass123"),
        Err(StoreError::WrongPassword)
    ));
    assert_eq!(store.unlock("correcthorse").unwrap(), tasks);
}

#[test]
fn failed_config_write_rolls_back_to_old_blob() {
    let dir = tempfile::tempdir().unwrap();
    let store = failing_store(&dir);
    store.create("correcthorse").unwrap();
    let tasks = sample_tasks();
    store.save(&tasks).unwrap();
    let config_before = store.backend().read_config().unwrap();

    store
        .backend()
        .fail_config_writes
        .store(true, Ordering::SeqCst);
    let err = store
        .change_password("correcthorse", "newpass123")
        .unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    store
        .backend()
        .fail_config_writes
        .store(false, Ordering::SeqCst);

    assert_eq!(store.backend().read_config().unwrap(), config_before);
    store.lock();
    assert!(matches!(
        store.unlock("newpass123"),
        Err(StoreError::WrongPassword)
    ));
    assert_eq!(store.unlock("correcthorse").unwrap(), tasks);
}

#[test]
fn failed_rollback_still_leaves_a_readable_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = failing_store(&dir);
    store.create("correcthorse").unwrap();
    let tasks = sample_tasks();
    store.save(&tasks).unwrap();

    // Config write and the rollback blob write both fail.
    store.backend().config_write_attempted.store(false, Ordering::SeqCst);
    store
        .backend()
        .fail_config_writes
        .store(true, Ordering::SeqCst);
    store
        .backend()
        .fail_all_blob_writes_after_config
        .store(true, Ordering::SeqCst);
    assert!(store.change_password("correcthorse", "newpass123").is_err());
    store
        .backend()
        .fail_config_writes
        .store(false, Ordering::SeqCst);
    store
        .backend()
        .fail_all_blob_writes_after_config
        .store(false, Ordering::SeqCst);

    // The blob header carries its own salt, so the new password opens it and
    // the stale config gets repaired.
    store.lock();
    assert_eq!(store.unlock("newpass123").unwrap(), tasks);
    store.lock();
    assert_eq!(store.unlock("newpass123").unwrap(), tasks);
}

#[test]
fn backups_written_before_a_change_keep_the_old_password() {
    let dir = tempfile::tempdir().unwrap();
    let store = EncryptedTaskStore::open(dir.path(), "default", cheap_options()).unwrap();
    store.create("correcthorse").unwrap();
    let tasks = sample_tasks();
    store.save(&tasks).unwrap();
    store.change_password("correcthorse", "newpass123").unwrap();
    store.lock();

    store.restore_backup(1).unwrap();
    assert!(matches!(
        store.unlock("newpass123"),
        Err(StoreError::WrongPassword)
    ));
    assert_eq!(store.unlock("correcthorse").unwrap(), tasks);
}

use async_trait::async_trait;
use elector_core::{
    ElectorError, LockBackend, LockKey, LockRecord, Result, Version, VersionedRecord,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, trace};
use uuid::Uuid;

/// How long a writer waits for another writer's guard before giving up.
const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(2);

const GUARD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// On-disk envelope of a lock record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    version: u64,
    checksum: u32,
    record: LockRecord,
}

impl StoredRecord {
    fn seal(record: &LockRecord, version: Version) -> Result<Self> {
        Ok(Self {
            version: version.value(),
            checksum: checksum(record)?,
            record: record.clone(),
        })
    }

    fn open(self) -> Result<VersionedRecord> {
        let actual = checksum(&self.record)?;
        if actual != self.checksum {
            return Err(ElectorError::corruption(format!(
                "checksum mismatch: expected {}, got {}",
                self.checksum, actual
            )));
        }
        Ok(VersionedRecord::new(self.record, Version::new(self.version)))
    }
}

fn checksum(record: &LockRecord) -> Result<u32> {
    Ok(crc32fast::hash(&serde_json::to_vec(record)?))
}

fn decode(path: &Path, data: &[u8]) -> Result<VersionedRecord> {
    let stored: StoredRecord = serde_json::from_slice(data).map_err(|e| {
        ElectorError::corruption(format!("{} is not a lock record: {}", path.display(), e))
    })?;
    stored.open()
}

fn read_record(path: &Path) -> Result<Option<VersionedRecord>> {
    match std::fs::read(path) {
        Ok(data) => decode(path, &data).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ElectorError::backend(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn write_record(path: &Path, record: &LockRecord, version: Version) -> Result<()> {
    let temp_path = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(&StoredRecord::seal(record, version)?)?;

    std::fs::write(&temp_path, &data).map_err(|e| {
        ElectorError::backend(format!("Failed to write {}: {}", temp_path.display(), e))
    })?;

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        ElectorError::backend(format!("Failed to replace {}: {}", path.display(), e))
    })
}

/// File-based lock backend.
///
/// Each `(namespace, name)` lives in `<root>/<namespace>/<name>.json`.
/// Writers serialize on an exclusive advisory lock over `<name>.lock`, then
/// replace the record through a temp file and an atomic rename, so readers
/// never observe a partial record. The advisory lock dies with the process
/// holding it, so a crashed writer never blocks the others. Every process
/// that shares the root directory contends on the same records.
#[derive(Debug, Clone)]
pub struct FileSystemLockStore {
    root: PathBuf,
    guard_timeout: Duration,
}

impl FileSystemLockStore {
    /// Create a file-based lock store rooted at `root`.
    ///
    /// # Errors
    /// * Returns error if the root directory cannot be created
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root).await.map_err(|e| {
            ElectorError::backend(format!(
                "Failed to create state directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
        })
    }

    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &LockKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(format!("{}.json", key.name))
    }

    fn guard_path(&self, key: &LockKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(format!("{}.lock", key.name))
    }

    async fn lock(&self, key: &LockKey) -> Result<WriteGuard> {
        let namespace_dir = self.root.join(&key.namespace);
        fs::create_dir_all(&namespace_dir).await?;

        let path = self.guard_path(key);
        let deadline = tokio::time::Instant::now() + self.guard_timeout;

        loop {
            // A guard acquired after the caller went away is dropped with the
            // task output, which unlocks it.
            let attempt_path = path.clone();
            let attempt = tokio::task::spawn_blocking(move || WriteGuard::try_acquire(attempt_path))
                .await
                .map_err(|e| ElectorError::internal(format!("guard task failed: {}", e)))??;

            if let Some(guard) = attempt {
                return Ok(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ElectorError::timeout(format!(
                    "waiting {:?} for write guard on {}",
                    self.guard_timeout, key
                )));
            }
            tokio::time::sleep(GUARD_POLL_INTERVAL).await;
        }
    }

    /// Run `op` against the record path while holding the write guard.
    ///
    /// `op` runs to completion on a blocking thread even if the caller is
    /// cancelled, and the guard is released only after it returns.
    async fn guarded<T, F>(&self, key: &LockKey, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let guard = self.lock(key).await?;
        let path = self.record_path(key);

        tokio::task::spawn_blocking(move || {
            let result = op(&path);
            drop(guard);
            result
        })
        .await
        .map_err(|e| ElectorError::internal(format!("record write task failed: {}", e)))?
    }
}

/// Exclusive right to write one record; released on drop.
struct WriteGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl WriteGuard {
    /// Returns `Ok(None)` while another writer holds the guard.
    fn try_acquire(path: PathBuf) -> Result<Option<Self>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| {
                ElectorError::backend(format!("Failed to open guard {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                trace!("Acquired write guard {}", path.display());
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(ElectorError::backend(format!(
                "Failed to lock guard {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        // Non-blocking; closing the file would release the lock anyway.
        if let Err(e) = self.file.unlock() {
            debug!("Failed to unlock guard {}: {}", self.path.display(), e);
        }
    }
}

#[async_trait]
impl LockBackend for FileSystemLockStore {
    async fn get(&self, key: &LockKey) -> Result<Option<VersionedRecord>> {
        let path = self.record_path(key);
        match fs::read(&path).await {
            Ok(data) => decode(&path, &data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ElectorError::backend(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn create(&self, key: &LockKey, record: &LockRecord) -> Result<Version> {
        let owned_key = key.clone();
        let record = record.clone();

        let version = self
            .guarded(key, move |path| {
                if let Some(existing) = read_record(path)? {
                    return Err(ElectorError::conflict(
                        &owned_key.namespace,
                        &owned_key.name,
                        format!("record already exists at {}", existing.version),
                    ));
                }
                write_record(path, &record, Version::INITIAL)?;
                Ok(Version::INITIAL)
            })
            .await?;

        debug!("Created lock record {} at {}", key, self.root.display());
        Ok(version)
    }

    async fn update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Version,
    ) -> Result<Version> {
        let owned_key = key.clone();
        let record = record.clone();

        let version = self
            .guarded(key, move |path| {
                let current = read_record(path)?.ok_or_else(|| {
                    ElectorError::not_found(&owned_key.namespace, &owned_key.name)
                })?;

                if current.version != expected {
                    return Err(ElectorError::conflict(
                        &owned_key.namespace,
                        &owned_key.name,
                        format!("expected {}, found {}", expected, current.version),
                    ));
                }

                let version = expected.next();
                write_record(path, &record, version)?;
                Ok(version)
            })
            .await?;

        debug!("Updated lock record {} to {}", key, version);
        Ok(version)
    }
}

//! TTL-cached model catalogue with coalesced refresh.
//!
//! The cache is a plain file with one model id per line. A refresh is guarded
//! by a lock file created with `create_new`; concurrent callers that lose the
//! race wait for the winner's result instead of shelling out themselves.

use crate::error::{RunnerError, Result};
use crate::fs::atomic_write_file;
use crate::job::kv::KvDoc;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// A refresh lock older than this is considered abandoned.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(60);

/// How long a caller waits for another process's refresh.
const WAIT_FOR_REFRESH: Duration = Duration::from_secs(15);

const WAIT_POLL: Duration = Duration::from_millis(100);

/// RAII guard for the refresh lock file.
///
/// When dropped, the lock file is deleted.
#[derive(Debug)]
struct RefreshLock {
    path: PathBuf,
}

impl RefreshLock {
    /// Try to take the lock. `Ok(None)` means another process holds it.
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RunnerError::UserError(format!(
                    "failed to create cache directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(RunnerError::UserError(format!(
                    "failed to acquire catalogue lock '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let mut doc = KvDoc::new();
        doc.set("pid", std::process::id())
            .set("created_at", Utc::now().to_rfc3339());
        if let Err(e) = file.write_all(doc.render().as_bytes()) {
            let _ = fs::remove_file(path);
            return Err(RunnerError::UserError(format!(
                "failed to write catalogue lock: {}",
                e
            )));
        }

        Ok(Some(Self {
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for RefreshLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release catalogue lock");
        }
    }
}

/// File-backed model catalogue cache for one provider.
#[derive(Debug, Clone)]
pub struct CatalogCache {
    path: PathBuf,
    lock_path: PathBuf,
    ttl: Duration,
    wait: Duration,
}

impl CatalogCache {
    pub fn new(path: PathBuf, lock_path: PathBuf, ttl: Duration) -> Self {
        Self {
            path,
            lock_path,
            ttl,
            wait: WAIT_FOR_REFRESH,
        }
    }

    /// Override how long to wait for another process's refresh.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Cached models when the cache is younger than the TTL.
    pub fn fresh(&self) -> Option<Vec<String>> {
        let age = age_of(&self.path)?;
        if age > self.ttl {
            return None;
        }
        self.read()
    }

    fn read(&self) -> Option<Vec<String>> {
        let content = fs::read_to_string(&self.path).ok()?;
        Some(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    fn store(&self, models: &[String]) -> Result<()> {
        let mut content = models.join("\n");
        content.push('\n');
        atomic_write_file(&self.path, &content, "catalog")
    }

    /// Return the cached catalogue, refreshing it with `fetch` when stale.
    ///
    /// Only one process runs `fetch` at a time. A process that finds the lock
    /// held waits for the cache to become fresh; if the holder never delivers,
    /// it falls back to the stale cache, then to fetching itself.
    pub fn get_or_refresh<F>(&self, fetch: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        if let Some(models) = self.fresh() {
            return Ok(models);
        }

        if let Some(lock) = self.acquire()? {
            // Another process may have finished between our check and the lock.
            if let Some(models) = self.fresh() {
                return Ok(models);
            }
            let models = fetch()?;
            self.store(&models)?;
            drop(lock);
            tracing::debug!(path = %self.path.display(), count = models.len(), "refreshed model catalogue");
            return Ok(models);
        }

        let deadline = Instant::now() + self.wait;
        while Instant::now() < deadline {
            std::thread::sleep(WAIT_POLL);
            if let Some(models) = self.fresh() {
                return Ok(models);
            }
            if !self.lock_path.exists() {
                break;
            }
        }

        if let Some(models) = self.fresh().or_else(|| self.read()) {
            tracing::warn!(path = %self.path.display(), "using stale model catalogue");
            return Ok(models);
        }
        fetch()
    }

    fn acquire(&self) -> Result<Option<RefreshLock>> {
        if let Some(lock) = RefreshLock::try_acquire(&self.lock_path)? {
            return Ok(Some(lock));
        }
        if age_of(&self.lock_path).is_some_and(|age| age > STALE_LOCK_AFTER) {
            tracing::warn!(path = %self.lock_path.display(), "removing abandoned catalogue lock");
            let _ = fs::remove_file(&self.lock_path);
            return RefreshLock::try_acquire(&self.lock_path);
        }
        Ok(None)
    }
}

fn age_of(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

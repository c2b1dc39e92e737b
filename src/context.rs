//! State directory resolution for dx-runner.
//!
//! This module provides the "environment resolution" layer: every command
//! resolves one `RunnerContext` and derives all artifact paths from it, so the
//! Runner CLI, the Monitor, and later readers agree on where a job lives.
//!
//! Layout:
//!
//! ```text
//! <state_dir>/
//!   config.yaml                 optional configuration
//!   events.ndjson               append-only audit log
//!   cache/<provider>.models     model catalogue cache
//!   <provider>/<beads>.meta     job metadata (key=value)
//!   <provider>/<beads>.pid      provider pid
//!   <provider>/<beads>.monitor.pid
//!   <provider>/<beads>.log      captured stdout/stderr
//!   <provider>/<beads>.heartbeat
//!   <provider>/<beads>.rc       exit code written by the launch wrapper
//!   <provider>/<beads>.outcome  frozen terminal record
//! ```

use crate::error::{RunnerError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name used under the system temp dir when no state dir is given.
pub const DEFAULT_STATE_DIR_NAME: &str = "dx-runner";

/// Resolved paths for the runner state.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    /// Absolute path to the state root.
    pub state_dir: PathBuf,

    /// Absolute path to the catalogue cache directory.
    pub cache_dir: PathBuf,
}

impl RunnerContext {
    /// Build a context rooted at `state_dir`.
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        let state_dir = state_dir.as_ref().to_path_buf();
        let cache_dir = state_dir.join("cache");
        Self {
            state_dir,
            cache_dir,
        }
    }

    /// Resolve the context from an optional explicit state directory.
    ///
    /// Falls back to `$TMPDIR/dx-runner`. Relative paths are resolved against
    /// the current directory so the detached Monitor (which may run with a
    /// different cwd) sees the same absolute location.
    pub fn resolve(state_dir: Option<&Path>) -> Result<Self> {
        let dir = match state_dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => std::env::current_dir()
                .map_err(|e| {
                    RunnerError::UserError(format!(
                        "failed to get current working directory: {}",
                        e
                    ))
                })?
                .join(dir),
            None => std::env::temp_dir().join(DEFAULT_STATE_DIR_NAME),
        };
        Ok(Self::new(dir))
    }

    /// Path to the optional config file inside the state dir.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Path to the append-only audit log.
    pub fn events_file(&self) -> PathBuf {
        self.state_dir.join("events.ndjson")
    }

    /// Directory holding all artifacts for one provider.
    pub fn provider_dir(&self, provider: &str) -> PathBuf {
        self.state_dir.join(provider)
    }

    /// Path to the cached model catalogue for a provider.
    pub fn catalog_cache_path(&self, provider: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.models", provider))
    }

    /// Path to the refresh lock guarding a provider's catalogue cache.
    pub fn catalog_lock_path(&self, provider: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.models.lock", provider))
    }

    /// All artifact paths for one (provider, beads) pair.
    pub fn job_paths(&self, provider: &str, beads: &str) -> JobPaths {
        JobPaths::new(&self.provider_dir(provider), beads)
    }

    /// Create the provider directory if needed.
    pub fn ensure_provider_dir(&self, provider: &str) -> Result<PathBuf> {
        let dir = self.provider_dir(provider);
        fs::create_dir_all(&dir).map_err(|e| {
            RunnerError::UserError(format!(
                "failed to create state directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        Ok(dir)
    }
}

/// Artifact paths for one job under one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub meta: PathBuf,
    pub pid: PathBuf,
    pub monitor_pid: PathBuf,
    pub log: PathBuf,
    pub heartbeat: PathBuf,
    pub rc: PathBuf,
    pub outcome: PathBuf,
    pub monitor_log: PathBuf,
}

impl JobPaths {
    fn new(dir: &Path, beads: &str) -> Self {
        let file = |suffix: &str| dir.join(format!("{}.{}", beads, suffix));
        Self {
            meta: file("meta"),
            pid: file("pid"),
            monitor_pid: file("monitor.pid"),
            log: file("log"),
            heartbeat: file("heartbeat"),
            rc: file("rc"),
            outcome: file("outcome"),
            monitor_log: file("monitor.log"),
        }
    }

    /// Artifacts that describe one run; cleared before a fresh run instance.
    ///
    /// The log is deliberately absent: it accumulates across restarts.
    pub fn run_artifacts(&self) -> [&Path; 6] {
        [
            &self.pid,
            &self.monitor_pid,
            &self.heartbeat,
            &self.rc,
            &self.outcome,
            &self.monitor_log,
        ]
    }

    /// Every artifact, including meta and log.
    pub fn all(&self) -> [&Path; 8] {
        [
            &self.meta,
            &self.pid,
            &self.monitor_pid,
            &self.log,
            &self.heartbeat,
            &self.rc,
            &self.outcome,
            &self.monitor_log,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_job_paths_are_per_provider() {
        let ctx = RunnerContext::new("/state");
        let a = ctx.job_paths("opencode", "bd-1");
        let b = ctx.job_paths("cc-glm", "bd-1");

        assert_eq!(a.meta, PathBuf::from("/state/opencode/bd-1.meta"));
        assert_eq!(a.monitor_pid, PathBuf::from("/state/opencode/bd-1.monitor.pid"));
        assert_eq!(b.outcome, PathBuf::from("/state/cc-glm/bd-1.outcome"));
        assert_ne!(a.log, b.log);
    }

    #[test]
    fn test_run_artifacts_exclude_meta_and_log() {
        let ctx = RunnerContext::new("/state");
        let paths = ctx.job_paths("gemini", "bd-9");
        let run = paths.run_artifacts();

        assert!(!run.contains(&paths.log.as_path()));
        assert!(!run.contains(&paths.meta.as_path()));
        assert!(run.contains(&paths.outcome.as_path()));
    }

    #[test]
    fn test_resolve_relative_state_dir_is_absolute() {
        let ctx = RunnerContext::resolve(Some(Path::new("rel-state"))).unwrap();
        assert!(ctx.state_dir.is_absolute());
        assert!(ctx.state_dir.ends_with("rel-state"));
    }

    #[test]
    fn test_resolve_default_uses_temp_dir() {
        let ctx = RunnerContext::resolve(None).unwrap();
        assert!(ctx.state_dir.ends_with(DEFAULT_STATE_DIR_NAME));
    }

    #[test]
    fn test_ensure_provider_dir_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = RunnerContext::new(temp_dir.path());

        let dir = ctx.ensure_provider_dir("opencode").unwrap();

        assert!(dir.is_dir());
        assert_eq!(ctx.catalog_cache_path("opencode"), temp_dir.path().join("cache/opencode.models"));
    }
}

//! Filesystem job store.
//!
//! All reads re-derive job state from the artifacts on disk; nothing is
//! cached between calls. Writers use atomic rename (meta, heartbeat, pid
//! files) or no-clobber hard links (outcome).

use super::heartbeat::Heartbeat;
use super::meta::JobMeta;
use super::outcome::Outcome;
use crate::context::{JobPaths, RunnerContext};
use crate::error::{RunnerError, Result};
use crate::fs::{atomic_write_file, write_once};
use crate::process;
use crate::provider::PROVIDERS;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Artifact suffixes, longest first so `.monitor.pid` wins over `.pid`.
const SUFFIXES: [&str; 8] = [
    ".monitor.pid",
    ".monitor.log",
    ".heartbeat",
    ".outcome",
    ".meta",
    ".pid",
    ".log",
    ".rc",
];

/// Contents of a pid file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidFile {
    Absent,
    /// Present but not a positive integer.
    Invalid(String),
    Pid(u32),
}

impl PidFile {
    pub fn pid(&self) -> Option<u32> {
        match self {
            PidFile::Pid(pid) => Some(*pid),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, PidFile::Absent)
    }
}

pub fn read_pid(path: &Path) -> Result<PidFile> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let raw = content.trim();
            Ok(match raw.parse::<u32>() {
                Ok(pid) if pid > 0 => PidFile::Pid(pid),
                _ => PidFile::Invalid(raw.to_string()),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PidFile::Absent),
        Err(e) => Err(RunnerError::UserError(format!(
            "failed to read pid file '{}': {}",
            path.display(),
            e
        ))),
    }
}

/// Exit record written by the launch wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcRecord {
    pub exit_code: i32,
    pub run_instance: Option<String>,
}

impl RcRecord {
    /// Whether this record was produced by `run_instance`.
    ///
    /// A record without a run instance (hand-written bare code) is accepted.
    pub fn belongs_to(&self, run_instance: &str) -> bool {
        self.run_instance
            .as_deref()
            .is_none_or(|ri| ri == run_instance)
    }
}

/// Read an rc file: `exit_code=<n>` lines, or a bare integer.
pub fn read_rc(path: &Path) -> Result<Option<RcRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RunnerError::UserError(format!(
                "failed to read rc file '{}': {}",
                path.display(),
                e
            )));
        }
    };

    if let Ok(code) = content.trim().parse::<i32>() {
        return Ok(Some(RcRecord {
            exit_code: code,
            run_instance: None,
        }));
    }

    let doc = super::kv::KvDoc::parse(&content);
    Ok(doc.get_parsed::<i32>("exit_code").map(|exit_code| RcRecord {
        exit_code,
        run_instance: doc.get_string("run_instance"),
    }))
}

/// Everything on disk for one (provider, beads) pair.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub provider: String,
    pub beads: String,
    pub paths: JobPaths,
    pub meta: Option<JobMeta>,
    pub outcome: Option<Outcome>,
    pub heartbeat: Option<Heartbeat>,
    pub pid: PidFile,
    pub monitor_pid: PidFile,
    pub rc: Option<RcRecord>,
    pub log_bytes: u64,
}

impl JobSnapshot {
    pub fn exists(&self) -> bool {
        self.meta.is_some() || self.outcome.is_some()
    }

    /// Provider pid: the pid file, or the meta record while no outcome exists.
    pub fn job_pid(&self) -> Option<u32> {
        self.pid.pid().or_else(|| {
            if self.outcome.is_none() {
                self.meta.as_ref().and_then(|m| m.pid)
            } else {
                None
            }
        })
    }

    pub fn pid_alive(&self) -> bool {
        self.job_pid().is_some_and(process::is_alive)
    }

    pub fn monitor_alive(&self) -> bool {
        self.monitor_pid
            .pid()
            .or_else(|| self.meta.as_ref().and_then(|m| m.monitor_pid))
            .is_some_and(process::is_alive)
    }

    /// Live means a running provider pid and no outcome yet.
    pub fn is_live(&self) -> bool {
        self.outcome.is_none() && self.pid_alive()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Most recent update time recorded in the artifacts.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let meta = self.meta.as_ref().map(|m| m.updated_at);
        let outcome = self.outcome.as_ref().map(|o| o.completed_at);
        meta.max(outcome)
    }

    /// Newest mtime across meta and outcome; tiebreak for `updated_at`.
    pub fn mtime(&self) -> Option<SystemTime> {
        [&self.paths.meta, &self.paths.outcome]
            .iter()
            .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
            .max()
    }
}

/// Size of a file in bytes, 0 when absent.
pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Store rooted at a runner context.
#[derive(Debug, Clone, Copy)]
pub struct JobStore<'a> {
    ctx: &'a RunnerContext,
}

impl<'a> JobStore<'a> {
    pub fn new(ctx: &'a RunnerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunnerContext {
        self.ctx
    }

    pub fn paths(&self, provider: &str, beads: &str) -> JobPaths {
        self.ctx.job_paths(provider, beads)
    }

    /// Load every artifact for one job.
    pub fn snapshot(&self, provider: &str, beads: &str) -> Result<JobSnapshot> {
        let paths = self.paths(provider, beads);
        Ok(JobSnapshot {
            provider: provider.to_string(),
            beads: beads.to_string(),
            meta: JobMeta::read(&paths.meta)?,
            outcome: Outcome::read(&paths.outcome)?,
            heartbeat: Heartbeat::read(&paths.heartbeat)?,
            pid: read_pid(&paths.pid)?,
            monitor_pid: read_pid(&paths.monitor_pid)?,
            rc: read_rc(&paths.rc)?,
            log_bytes: file_len(&paths.log),
            paths,
        })
    }

    pub fn write_meta(&self, meta: &JobMeta) -> Result<()> {
        self.ctx.ensure_provider_dir(&meta.provider)?;
        let paths = self.paths(&meta.provider, &meta.beads);
        atomic_write_file(&paths.meta, &meta.to_kv().render(), &meta.run_instance)
    }

    /// Write the outcome once. Returns `false` if one already existed.
    pub fn write_outcome(&self, outcome: &Outcome) -> Result<bool> {
        self.ctx.ensure_provider_dir(&outcome.provider)?;
        let paths = self.paths(&outcome.provider, &outcome.beads);
        write_once(&paths.outcome, &outcome.to_kv().render(), &outcome.run_instance)
    }

    pub fn write_heartbeat(&self, provider: &str, beads: &str, heartbeat: &Heartbeat) -> Result<()> {
        let paths = self.paths(provider, beads);
        atomic_write_file(
            &paths.heartbeat,
            &heartbeat.to_kv().render(),
            &heartbeat.run_instance,
        )
    }

    pub fn write_pid(&self, path: &Path, pid: u32, run_instance: &str) -> Result<()> {
        atomic_write_file(path, &format!("{}\n", pid), run_instance)
    }

    /// Remove per-run artifacts so a fresh run instance starts clean.
    pub fn clear_run_artifacts(&self, provider: &str, beads: &str) -> Result<()> {
        let paths = self.paths(provider, beads);
        for path in paths.run_artifacts() {
            remove_if_exists(path)?;
        }
        Ok(())
    }

    /// Remove pid and monitor-pid files.
    pub fn clear_pid_files(&self, provider: &str, beads: &str) -> Result<()> {
        let paths = self.paths(provider, beads);
        remove_if_exists(&paths.pid)?;
        remove_if_exists(&paths.monitor_pid)?;
        Ok(())
    }

    /// Remove every artifact of a job. Returns the paths actually removed.
    pub fn remove_job(&self, provider: &str, beads: &str) -> Result<Vec<PathBuf>> {
        let paths = self.paths(provider, beads);
        let mut removed = Vec::new();
        for path in paths.all() {
            if remove_if_exists(path)? {
                removed.push(path.to_path_buf());
            }
        }
        Ok(removed)
    }

    /// Beads ids with any artifact under `provider`, sorted.
    pub fn list_beads(&self, provider: &str) -> Result<Vec<String>> {
        let dir = self.ctx.provider_dir(provider);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RunnerError::UserError(format!(
                    "failed to read state directory '{}': {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut beads = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = beads_from_file_name(&name) {
                beads.insert(id.to_string());
            }
        }
        Ok(beads.into_iter().collect())
    }

    /// Every (provider, beads) pair with artifacts, optionally for one provider.
    pub fn list_jobs(&self, provider: Option<&str>) -> Result<Vec<(String, String)>> {
        let providers: Vec<&str> = match provider {
            Some(p) => vec![p],
            None => PROVIDERS.to_vec(),
        };

        let mut jobs = Vec::new();
        for provider in providers {
            for beads in self.list_beads(provider)? {
                jobs.push((provider.to_string(), beads));
            }
        }
        Ok(jobs)
    }

    /// Snapshots of `beads` under every provider that has artifacts for it.
    pub fn instances(&self, beads: &str) -> Result<Vec<JobSnapshot>> {
        let mut found = Vec::new();
        for provider in PROVIDERS {
            let snapshot = self.snapshot(provider, beads)?;
            if snapshot.exists() || snapshot.pid.is_present() {
                found.push(snapshot);
            }
        }
        Ok(found)
    }

    /// Resolve which provider a query for `beads` refers to.
    ///
    /// An explicit provider wins. Otherwise the most recently updated
    /// instance is chosen, with artifact mtime as the tiebreak.
    pub fn resolve_provider(&self, beads: &str, provider: Option<&str>) -> Result<Option<String>> {
        if let Some(provider) = provider {
            return Ok(Some(provider.to_string()));
        }

        let newest = self
            .instances(beads)?
            .into_iter()
            .filter(JobSnapshot::exists)
            .max_by_key(|s| (s.updated_at(), s.mtime()));
        Ok(newest.map(|s| s.provider))
    }

    /// Number of live jobs for `provider`.
    pub fn live_count(&self, provider: &str) -> Result<usize> {
        let mut count = 0;
        for beads in self.list_beads(provider)? {
            if self.snapshot(provider, &beads)?.is_live() {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn beads_from_file_name(name: &str) -> Option<&str> {
    if name.starts_with('.') || name.ends_with(".tmp") {
        return None;
    }
    SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .filter(|id| !id.is_empty())
}

/// Remove a file, treating "not found" as success. Returns whether it existed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RunnerError::UserError(format!(
            "failed to remove '{}': {}",
            path.display(),
            e
        ))),
    }
}

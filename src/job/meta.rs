//! Job metadata (`<beads>.meta`).

use super::kv::KvDoc;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

const ARTIFACT: &str = "job meta";

/// Everything the Runner knows about a dispatched job.
///
/// Written by `start`, rewritten by `restart`. The Monitor treats a meta
/// whose `run_instance` differs from its own as a signal to exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMeta {
    pub beads: String,
    pub provider: String,
    pub run_instance: String,
    pub pid: Option<u32>,
    pub monitor_pid: Option<u32>,
    pub retries: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub worktree: PathBuf,
    pub prompt_file: Option<PathBuf>,
    pub host: String,
    pub cwd: PathBuf,
    pub requested_model: Option<String>,
    pub selected_model: String,
    pub fallback_reason: Option<String>,
    pub launch_mode: String,
    /// `HEAD` of the worktree at launch, when the worktree is a git repo.
    pub start_sha: Option<String>,
    pub commit_required: bool,
    pub profile: Option<String>,
}

/// RFC3339 with millisecond precision, as written into artifacts.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl JobMeta {
    pub fn to_kv(&self) -> KvDoc {
        let mut doc = KvDoc::new();
        doc.set("beads", &self.beads)
            .set("provider", &self.provider)
            .set("run_instance", &self.run_instance)
            .set_opt("pid", self.pid)
            .set_opt("monitor_pid", self.monitor_pid)
            .set("retries", self.retries)
            .set("started_at", format_ts(&self.started_at))
            .set("updated_at", format_ts(&self.updated_at))
            .set("worktree", self.worktree.display())
            .set_opt("prompt_file", self.prompt_file.as_ref().map(|p| p.display()))
            .set("host", &self.host)
            .set("cwd", self.cwd.display())
            .set_opt("requested_model", self.requested_model.as_ref())
            .set("selected_model", &self.selected_model)
            .set_opt("fallback_reason", self.fallback_reason.as_ref())
            .set("launch_mode", &self.launch_mode)
            .set_opt("start_sha", self.start_sha.as_ref())
            .set("commit_required", self.commit_required)
            .set_opt("profile", self.profile.as_ref());
        doc
    }

    pub fn from_kv(doc: &KvDoc) -> Result<Self> {
        let started_at: DateTime<Utc> = doc.require_parsed("started_at", ARTIFACT)?;
        Ok(Self {
            beads: doc.require("beads", ARTIFACT)?.to_string(),
            provider: doc.require("provider", ARTIFACT)?.to_string(),
            run_instance: doc.require("run_instance", ARTIFACT)?.to_string(),
            pid: doc.get_parsed("pid"),
            monitor_pid: doc.get_parsed("monitor_pid"),
            retries: doc.get_parsed("retries").unwrap_or(0),
            started_at,
            updated_at: doc.get_parsed("updated_at").unwrap_or(started_at),
            worktree: PathBuf::from(doc.require("worktree", ARTIFACT)?),
            prompt_file: doc.get_string("prompt_file").map(PathBuf::from),
            host: doc.get_string("host").unwrap_or_default(),
            cwd: PathBuf::from(doc.get("cwd").unwrap_or_default()),
            requested_model: doc.get_string("requested_model"),
            selected_model: doc.get_string("selected_model").unwrap_or_default(),
            fallback_reason: doc.get_string("fallback_reason"),
            launch_mode: doc.get_string("launch_mode").unwrap_or_default(),
            start_sha: doc.get_string("start_sha"),
            commit_required: doc.get_parsed("commit_required").unwrap_or(false),
            profile: doc.get_string("profile"),
        })
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        KvDoc::read(path)?.map(|doc| Self::from_kv(&doc)).transpose()
    }

    /// Seconds between `started_at` and `now`, never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64
    }
}

#[cfg(test)]
pub(crate) fn sample_meta(provider: &str, beads: &str) -> JobMeta {
    let now = Utc::now();
    JobMeta {
        beads: beads.to_string(),
        provider: provider.to_string(),
        run_instance: "20260101T000000000Z-1".to_string(),
        pid: None,
        monitor_pid: None,
        retries: 0,
        started_at: now,
        updated_at: now,
        worktree: PathBuf::from("/tmp/wt"),
        prompt_file: None,
        host: "host".to_string(),
        cwd: PathBuf::from("/tmp"),
        requested_model: None,
        selected_model: "glm-5".to_string(),
        fallback_reason: None,
        launch_mode: "detached".to_string(),
        start_sha: None,
        commit_required: false,
        profile: None,
    }
}

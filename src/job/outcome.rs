//! Terminal outcome record (`<beads>.outcome`).
//!
//! An outcome is written exactly once per run instance, either by the
//! Monitor on normal exit or by the Runner on `stop` / launch failure. Once
//! present it is the single source of truth for the job's terminal state.

use super::kv::KvDoc;
use super::meta::format_ts;
use crate::error::{RunnerError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

const ARTIFACT: &str = "job outcome";

/// Terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    ExitedOk,
    ExitedErr,
    NoOpSuccess,
    ManualStop,
    CapacityExhausted,
    Failed,
}

impl OutcomeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeState::ExitedOk => "exited_ok",
            OutcomeState::ExitedErr => "exited_err",
            OutcomeState::NoOpSuccess => "no_op_success",
            OutcomeState::ManualStop => "manual_stop",
            OutcomeState::CapacityExhausted => "capacity_exhausted",
            OutcomeState::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exited_ok" => Some(OutcomeState::ExitedOk),
            "exited_err" => Some(OutcomeState::ExitedErr),
            "no_op_success" => Some(OutcomeState::NoOpSuccess),
            "manual_stop" => Some(OutcomeState::ManualStop),
            "capacity_exhausted" => Some(OutcomeState::CapacityExhausted),
            "failed" => Some(OutcomeState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frozen terminal record for one run instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub beads: String,
    pub provider: String,
    pub run_instance: String,
    pub state: OutcomeState,
    /// Provider exit code, or the contract's code when a contract overrode
    /// a zero exit (`no_commit_artifact` records 25).
    pub exit_code: i32,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_sec: u64,
    /// Files changed since launch; `None` when the worktree is not a git repo.
    pub mutation_count: Option<u64>,
    pub log_bytes: u64,
    pub cpu_time_sec: f64,
    pub pid_age_sec: u64,
    pub selected_model: String,
    pub fallback_reason: Option<String>,
    pub host: String,
    pub cwd: PathBuf,
    pub worktree: PathBuf,
    pub retries: u32,
}

impl Outcome {
    pub fn to_kv(&self) -> KvDoc {
        let mut doc = KvDoc::new();
        doc.set("beads", &self.beads)
            .set("provider", &self.provider)
            .set("run_instance", &self.run_instance)
            .set("state", self.state)
            .set("exit_code", self.exit_code)
            .set("reason_code", &self.reason_code)
            .set_opt("next_action", self.next_action.as_ref())
            .set("started_at", format_ts(&self.started_at))
            .set("completed_at", format_ts(&self.completed_at))
            .set("duration_sec", self.duration_sec)
            .set_opt("mutation_count", self.mutation_count)
            .set("log_bytes", self.log_bytes)
            .set("cpu_time_sec", format!("{:.2}", self.cpu_time_sec))
            .set("pid_age_sec", self.pid_age_sec)
            .set("selected_model", &self.selected_model)
            .set_opt("fallback_reason", self.fallback_reason.as_ref())
            .set("host", &self.host)
            .set("cwd", self.cwd.display())
            .set("worktree", self.worktree.display())
            .set("retries", self.retries);
        doc
    }

    pub fn from_kv(doc: &KvDoc) -> Result<Self> {
        let state_raw = doc.require("state", ARTIFACT)?;
        let state = OutcomeState::from_str(state_raw).ok_or_else(|| {
            RunnerError::UserError(format!("{} has unknown state '{}'", ARTIFACT, state_raw))
        })?;
        let completed_at: DateTime<Utc> = doc.require_parsed("completed_at", ARTIFACT)?;

        Ok(Self {
            beads: doc.require("beads", ARTIFACT)?.to_string(),
            provider: doc.require("provider", ARTIFACT)?.to_string(),
            run_instance: doc.get_string("run_instance").unwrap_or_default(),
            state,
            exit_code: doc.require_parsed("exit_code", ARTIFACT)?,
            reason_code: doc.require("reason_code", ARTIFACT)?.to_string(),
            next_action: doc.get_string("next_action"),
            started_at: doc.get_parsed("started_at").unwrap_or(completed_at),
            completed_at,
            duration_sec: doc.get_parsed("duration_sec").unwrap_or(0),
            mutation_count: doc.get_parsed("mutation_count"),
            log_bytes: doc.get_parsed("log_bytes").unwrap_or(0),
            cpu_time_sec: doc.get_parsed("cpu_time_sec").unwrap_or(0.0),
            pid_age_sec: doc.get_parsed("pid_age_sec").unwrap_or(0),
            selected_model: doc.get_string("selected_model").unwrap_or_default(),
            fallback_reason: doc.get_string("fallback_reason"),
            host: doc.get_string("host").unwrap_or_default(),
            cwd: PathBuf::from(doc.get("cwd").unwrap_or_default()),
            worktree: PathBuf::from(doc.get("worktree").unwrap_or_default()),
            retries: doc.get_parsed("retries").unwrap_or(0),
        })
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        KvDoc::read(path)?.map(|doc| Self::from_kv(&doc)).transpose()
    }
}

#[cfg(test)]
pub(crate) fn sample_outcome(provider: &str, beads: &str, state: OutcomeState) -> Outcome {
    let now = Utc::now();
    Outcome {
        beads: beads.to_string(),
        provider: provider.to_string(),
        run_instance: "20260101T000000000Z-1".to_string(),
        state,
        exit_code: if state == OutcomeState::ExitedErr { 1 } else { 0 },
        reason_code: state.as_str().to_string(),
        next_action: None,
        started_at: now,
        completed_at: now,
        duration_sec: 3,
        mutation_count: Some(1),
        log_bytes: 10,
        cpu_time_sec: 0.5,
        pid_age_sec: 3,
        selected_model: "glm-5".to_string(),
        fallback_reason: None,
        host: "host".to_string(),
        cwd: PathBuf::from("/tmp"),
        worktree: PathBuf::from("/tmp/wt"),
        retries: 0,
    }
}

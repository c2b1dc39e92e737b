//! Turning a finished run into its Outcome.
//!
//! Measurement (git, log, heartbeat) is separated from classification so the
//! state rules can be tested without a worktree.

use crate::error::Result;
use crate::events::{self, Event, EventAction};
use crate::exit_codes;
use crate::gates::GateResult;
use crate::gates::commit_required::{self, check_commit_required};
use crate::git;
use crate::job::store::file_len;
use crate::job::{Heartbeat, JobMeta, JobStore, Outcome, OutcomeState};
use crate::provider::capacity::{self, CapacityMatch, CapacitySignature};
use chrono::{DateTime, Utc};
use serde_json::json;

pub const REDISPATCH_WITH_GUARDRAILS: &str = "redispatch_with_guardrails";

/// Metrics frozen into an Outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurements {
    /// Paths changed since the launch commit; `None` outside git.
    pub mutation_count: Option<u64>,
    pub log_bytes: u64,
    pub cpu_time_sec: f64,
    pub pid_age_sec: u64,
}

/// Measure a job's worktree, log, and last heartbeat.
pub fn measure(
    store: &JobStore<'_>,
    meta: &JobMeta,
    heartbeat: Option<&Heartbeat>,
    now: DateTime<Utc>,
) -> Measurements {
    let paths = store.paths(&meta.provider, &meta.beads);
    let heartbeat = heartbeat.filter(|hb| hb.run_instance == meta.run_instance);

    let mutation_count = meta.start_sha.as_deref().and_then(|sha| {
        match git::changed_paths_since(&meta.worktree, sha) {
            Ok(paths) => Some(paths.len() as u64),
            Err(e) => {
                tracing::warn!(beads = %meta.beads, error = %e, "could not count mutations");
                None
            }
        }
    });

    let last_alive = heartbeat.map_or(now, |hb| hb.last_seen);
    let pid_age_sec = last_alive
        .signed_duration_since(meta.started_at)
        .num_seconds()
        .max(0) as u64;

    Measurements {
        mutation_count,
        log_bytes: file_len(&paths.log),
        cpu_time_sec: heartbeat.map_or(0.0, |hb| hb.cpu_time_sec),
        pid_age_sec,
    }
}

/// State, reason, and follow-up for a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: OutcomeState,
    pub exit_code: i32,
    pub reason_code: String,
    pub next_action: Option<String>,
}

impl Verdict {
    fn new(state: OutcomeState, exit_code: i32, reason_code: &str) -> Self {
        Self {
            state,
            exit_code,
            reason_code: reason_code.to_string(),
            next_action: None,
        }
    }

    fn next(mut self, action: &str) -> Self {
        self.next_action = Some(action.to_string());
        self
    }
}

/// Classify a provider exit.
///
/// `exit_code` is `None` when the process vanished without an rc file.
/// Capacity signatures are only consulted for nonzero exits.
pub fn classify_exit(
    exit_code: Option<i32>,
    measurements: &Measurements,
    commit_gate: Option<&GateResult>,
    capacity: Option<&CapacityMatch>,
) -> Verdict {
    let Some(code) = exit_code else {
        return Verdict::new(OutcomeState::ExitedErr, -1, "rc_missing");
    };

    if code == 0 {
        if let Some(gate) = commit_gate.filter(|g| !g.passed) {
            return Verdict::new(
                OutcomeState::Failed,
                exit_codes::NO_COMMIT_ARTIFACT,
                &gate.reason_code,
            );
        }
        if measurements.mutation_count == Some(0) {
            return Verdict::new(OutcomeState::NoOpSuccess, 0, "no_mutations")
                .next(REDISPATCH_WITH_GUARDRAILS);
        }
        return Verdict::new(OutcomeState::ExitedOk, 0, "exited_ok");
    }

    match capacity {
        Some(hit) => Verdict::new(OutcomeState::CapacityExhausted, code, "capacity_exhausted")
            .next(hit.next_action),
        None => Verdict::new(OutcomeState::ExitedErr, code, "exit_nonzero"),
    }
}

/// Assemble the frozen record.
pub fn build_outcome(
    meta: &JobMeta,
    verdict: Verdict,
    measurements: &Measurements,
    now: DateTime<Utc>,
) -> Outcome {
    Outcome {
        beads: meta.beads.clone(),
        provider: meta.provider.clone(),
        run_instance: meta.run_instance.clone(),
        state: verdict.state,
        exit_code: verdict.exit_code,
        reason_code: verdict.reason_code,
        next_action: verdict.next_action,
        started_at: meta.started_at,
        completed_at: now,
        duration_sec: now
            .signed_duration_since(meta.started_at)
            .num_seconds()
            .max(0) as u64,
        mutation_count: measurements.mutation_count,
        log_bytes: measurements.log_bytes,
        cpu_time_sec: measurements.cpu_time_sec,
        pid_age_sec: measurements.pid_age_sec,
        selected_model: meta.selected_model.clone(),
        fallback_reason: meta.fallback_reason.clone(),
        host: meta.host.clone(),
        cwd: meta.cwd.clone(),
        worktree: meta.worktree.clone(),
        retries: meta.retries,
    }
}

/// Persist an outcome once, then drop the pid artifacts.
///
/// When another writer got there first, their outcome is returned and
/// nothing else is touched.
pub fn persist(store: &JobStore<'_>, outcome: Outcome) -> Result<Outcome> {
    if !store.write_outcome(&outcome)? {
        let paths = store.paths(&outcome.provider, &outcome.beads);
        tracing::info!(beads = %outcome.beads, "outcome already written");
        return Ok(Outcome::read(&paths.outcome)?.unwrap_or(outcome));
    }

    store.clear_pid_files(&outcome.provider, &outcome.beads)?;
    events::record(
        store.context(),
        Event::new(EventAction::Finalize)
            .with_job(&outcome.provider, &outcome.beads)
            .with_details(json!({
                "run_instance": outcome.run_instance,
                "state": outcome.state.as_str(),
                "exit_code": outcome.exit_code,
                "reason_code": outcome.reason_code,
            })),
    );
    tracing::info!(
        beads = %outcome.beads,
        state = %outcome.state,
        exit_code = outcome.exit_code,
        "outcome written"
    );
    Ok(outcome)
}

/// The commit-required gate; an unreadable HEAD counts as no commit.
fn commit_gate(meta: &JobMeta) -> GateResult {
    check_commit_required(&meta.worktree, meta.start_sha.as_deref()).unwrap_or_else(|e| {
        GateResult::fail(
            commit_required::GATE,
            "no_commit_artifact",
            format!("could not read HEAD: {}", e),
        )
    })
}

/// Measure, classify, and persist a finished run.
pub fn finalize_job(
    store: &JobStore<'_>,
    meta: &JobMeta,
    exit_code: Option<i32>,
    heartbeat: Option<&Heartbeat>,
    signatures: &[CapacitySignature],
) -> Result<Outcome> {
    let now = Utc::now();
    let measurements = measure(store, meta, heartbeat, now);

    let capacity = match exit_code {
        Some(code) if code != 0 => {
            let log = store.paths(&meta.provider, &meta.beads).log;
            let text = std::fs::read(&log)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            capacity::scan(&text, signatures)
        }
        _ => None,
    };

    let commit_gate = (meta.commit_required && exit_code == Some(0)).then(|| commit_gate(meta));
    if let Some(gate) = commit_gate.as_ref().filter(|g| !g.passed) {
        tracing::warn!(beads = %meta.beads, details = %gate.details, "commit-required contract violated");
    }

    let verdict = classify_exit(exit_code, &measurements, commit_gate.as_ref(), capacity.as_ref());

    persist(store, build_outcome(meta, verdict, &measurements, now))
}

//! Health classification.
//!
//! `classify` is a pure function of the artifacts plus two liveness bits, so
//! `check`, `status`, and `report` agree on the answer and it can be tested
//! without processes.

use super::heartbeat::Heartbeat;
use super::meta::JobMeta;
use super::outcome::{Outcome, OutcomeState};
use crate::exit_codes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Every state a job can be reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Missing,
    Launching,
    SlowStart,
    Running,
    Stalled,
    AwaitingFinalize,
    ExitedOk,
    ExitedErr,
    NoOpSuccess,
    ManualStop,
    CapacityExhausted,
    Failed,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Missing => "missing",
            HealthState::Launching => "launching",
            HealthState::SlowStart => "slow_start",
            HealthState::Running => "running",
            HealthState::Stalled => "stalled",
            HealthState::AwaitingFinalize => "awaiting_finalize",
            HealthState::ExitedOk => "exited_ok",
            HealthState::ExitedErr => "exited_err",
            HealthState::NoOpSuccess => "no_op_success",
            HealthState::ManualStop => "manual_stop",
            HealthState::CapacityExhausted => "capacity_exhausted",
            HealthState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HealthState::ExitedOk
                | HealthState::ExitedErr
                | HealthState::NoOpSuccess
                | HealthState::ManualStop
                | HealthState::CapacityExhausted
                | HealthState::Failed
        )
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<OutcomeState> for HealthState {
    fn from(state: OutcomeState) -> Self {
        match state {
            OutcomeState::ExitedOk => HealthState::ExitedOk,
            OutcomeState::ExitedErr => HealthState::ExitedErr,
            OutcomeState::NoOpSuccess => HealthState::NoOpSuccess,
            OutcomeState::ManualStop => HealthState::ManualStop,
            OutcomeState::CapacityExhausted => HealthState::CapacityExhausted,
            OutcomeState::Failed => HealthState::Failed,
        }
    }
}

/// Timing thresholds for live jobs.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub launch_grace: Duration,
    pub stall_after: Duration,
}

/// Evidence gathered from disk and the process table.
#[derive(Debug, Clone, Copy)]
pub struct HealthInput<'a> {
    pub meta: Option<&'a JobMeta>,
    pub outcome: Option<&'a Outcome>,
    pub heartbeat: Option<&'a Heartbeat>,
    pub pid_alive: bool,
    pub monitor_alive: bool,
    pub log_bytes: u64,
    pub log_modified: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// Classification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub state: HealthState,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    /// Remediation hint for text output.
    #[serde(skip)]
    pub hint: Option<String>,
}

impl Health {
    fn new(state: HealthState, reason_code: impl Into<String>) -> Self {
        Self {
            state,
            reason_code: reason_code.into(),
            next_action: None,
            hint: None,
        }
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Exit code for `check`.
    pub fn check_exit_code(&self) -> i32 {
        match self.state {
            HealthState::Launching
            | HealthState::SlowStart
            | HealthState::Running
            | HealthState::ExitedOk => exit_codes::SUCCESS,
            HealthState::Missing => exit_codes::JOB_MISSING,
            HealthState::Stalled
            | HealthState::AwaitingFinalize
            | HealthState::ExitedErr
            | HealthState::ManualStop => exit_codes::JOB_UNHEALTHY,
            HealthState::CapacityExhausted => exit_codes::CAPACITY_EXHAUSTED,
            HealthState::NoOpSuccess => exit_codes::NO_OP_SUCCESS,
            HealthState::Failed => {
                exit_codes::for_reason(&self.reason_code, exit_codes::JOB_UNHEALTHY)
            }
        }
    }
}

/// Classify a job from its evidence.
pub fn classify(input: &HealthInput<'_>, thresholds: &Thresholds) -> Health {
    if let Some(outcome) = input.outcome {
        return classify_terminal(outcome);
    }

    let Some(meta) = input.meta else {
        return Health::new(HealthState::Missing, "no_metadata")
            .hint("no job recorded; dispatch it with `dx-runner start`");
    };

    if !input.pid_alive {
        let reason = if input.monitor_alive {
            "awaiting_monitor"
        } else {
            "monitor_missing"
        };
        return Health::new(HealthState::AwaitingFinalize, reason).hint(format!(
            "provider exited without an outcome; run `dx-runner finalize --beads {} --provider {}`",
            meta.beads, meta.provider
        ));
    }

    let age = meta.age_secs(input.now);
    let last_progress = last_progress(input, meta);

    match last_progress {
        None if age < thresholds.launch_grace.as_secs() => {
            Health::new(HealthState::Launching, "awaiting_first_output")
        }
        None if age < thresholds.stall_after.as_secs() => {
            Health::new(HealthState::SlowStart, "no_output_yet")
                .hint("provider is alive but silent; check the log shortly")
        }
        None => Health::new(HealthState::Stalled, "no_output").hint(stalled_hint(meta)),
        Some(ts) => {
            let idle = input.now.signed_duration_since(ts).num_seconds().max(0) as u64;
            if idle <= thresholds.stall_after.as_secs() {
                Health::new(HealthState::Running, "progress_recent")
            } else {
                Health::new(HealthState::Stalled, "no_progress").hint(stalled_hint(meta))
            }
        }
    }
}

fn stalled_hint(meta: &JobMeta) -> String {
    format!(
        "inspect the log; `dx-runner restart --beads {} --provider {}` to retry",
        meta.beads, meta.provider
    )
}

/// Latest progress evidence: a progress heartbeat from this run, or log growth.
fn last_progress(input: &HealthInput<'_>, meta: &JobMeta) -> Option<DateTime<Utc>> {
    let heartbeat = input
        .heartbeat
        .filter(|hb| hb.run_instance.is_empty() || hb.run_instance == meta.run_instance)
        .and_then(|hb| hb.last_progress);
    let log = if input.log_bytes > 0 {
        input.log_modified.or(Some(meta.started_at))
    } else {
        None
    };
    heartbeat.max(log)
}

fn classify_terminal(outcome: &Outcome) -> Health {
    let mut state = HealthState::from(outcome.state);
    let mut reason = outcome.reason_code.clone();
    let mut next_action = outcome.next_action.clone();

    if state == HealthState::ExitedOk && outcome.mutation_count == Some(0) {
        state = HealthState::NoOpSuccess;
        reason = "no_mutations".to_string();
        next_action = Some("redispatch_with_guardrails".to_string());
    }

    let hint = match state {
        HealthState::ExitedOk => None,
        HealthState::NoOpSuccess => {
            Some("exit 0 without changes; redispatch with tighter guardrails".to_string())
        }
        HealthState::CapacityExhausted => Some(match next_action.as_deref() {
            Some("switch_provider") => "provider quota exhausted; switch provider".to_string(),
            _ => "provider rate limited; retry with backoff".to_string(),
        }),
        HealthState::ManualStop => Some("stopped by operator; `dx-runner restart` to resume".to_string()),
        HealthState::Failed if reason == "no_commit_artifact" => {
            Some("exit 0 without a new commit; commit the work or redispatch".to_string())
        }
        _ => Some("inspect the log; `dx-runner restart` to retry".to_string()),
    };

    Health {
        state,
        reason_code: reason,
        next_action,
        hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::meta::sample_meta;
    use crate::job::outcome::sample_outcome;
    use chrono::Duration as ChronoDuration;

    fn thresholds() -> Thresholds {
        Thresholds {
            launch_grace: Duration::from_secs(60),
            stall_after: Duration::from_secs(600),
        }
    }

    fn input<'a>(meta: Option<&'a JobMeta>, now: DateTime<Utc>) -> HealthInput<'a> {
        HealthInput {
            meta,
            outcome: None,
            heartbeat: None,
            pid_alive: true,
            monitor_alive: true,
            log_bytes: 0,
            log_modified: None,
            now,
        }
    }

    #[test]
    fn test_no_artifacts_is_missing() {
        let health = classify(&input(None, Utc::now()), &thresholds());
        assert_eq!(health.state, HealthState::Missing);
        assert_eq!(health.check_exit_code(), exit_codes::JOB_MISSING);
    }

    #[test]
    fn test_silent_job_ages_through_launch_states() {
        let meta = sample_meta("gemini", "bd-1");
        let t = meta.started_at;

        let h = classify(&input(Some(&meta), t + ChronoDuration::seconds(10)), &thresholds());
        assert_eq!(h.state, HealthState::Launching);
        assert_eq!(h.check_exit_code(), exit_codes::SUCCESS);

        let h = classify(&input(Some(&meta), t + ChronoDuration::seconds(120)), &thresholds());
        assert_eq!(h.state, HealthState::SlowStart);

        let h = classify(&input(Some(&meta), t + ChronoDuration::seconds(900)), &thresholds());
        assert_eq!(h.state, HealthState::Stalled);
        assert_eq!(h.check_exit_code(), exit_codes::JOB_UNHEALTHY);
    }

    #[test]
    fn test_recent_progress_is_running_and_stale_is_stalled() {
        let meta = sample_meta("gemini", "bd-1");
        let t = meta.started_at;
        let mut hb = Heartbeat::initial(&meta.run_instance, t);
        hb.observe(t + ChronoDuration::seconds(5), Some(1.0), 10);

        let mut evidence = input(Some(&meta), t + ChronoDuration::seconds(300));
        evidence.heartbeat = Some(&hb);
        assert_eq!(classify(&evidence, &thresholds()).state, HealthState::Running);

        evidence.now = t + ChronoDuration::seconds(5000);
        let h = classify(&evidence, &thresholds());
        assert_eq!(h.state, HealthState::Stalled);
        assert_eq!(h.reason_code, "no_progress");
    }

    #[test]
    fn test_heartbeat_from_other_run_is_ignored() {
        let meta = sample_meta("gemini", "bd-1");
        let t = meta.started_at;
        let mut hb = Heartbeat::initial("old-run", t);
        hb.observe(t, Some(5.0), 100);

        let mut evidence = input(Some(&meta), t + ChronoDuration::seconds(10));
        evidence.heartbeat = Some(&hb);
        assert_eq!(classify(&evidence, &thresholds()).state, HealthState::Launching);
    }

    #[test]
    fn test_log_output_counts_as_progress() {
        let meta = sample_meta("gemini", "bd-1");
        let t = meta.started_at;
        let mut evidence = input(Some(&meta), t + ChronoDuration::seconds(30));
        evidence.log_bytes = 42;
        evidence.log_modified = Some(t + ChronoDuration::seconds(20));
        assert_eq!(classify(&evidence, &thresholds()).state, HealthState::Running);
    }

    #[test]
    fn test_dead_pid_without_outcome_awaits_finalize() {
        let meta = sample_meta("opencode", "bd-7");
        let mut evidence = input(Some(&meta), Utc::now());
        evidence.pid_alive = false;
        evidence.monitor_alive = false;

        let h = classify(&evidence, &thresholds());
        assert_eq!(h.state, HealthState::AwaitingFinalize);
        assert_eq!(h.reason_code, "monitor_missing");
        assert!(h.hint.unwrap().contains("dx-runner finalize"));
        assert!(!HealthState::AwaitingFinalize.is_terminal());
    }

    #[test]
    fn test_outcome_wins_over_liveness() {
        let meta = sample_meta("opencode", "bd-7");
        let outcome = sample_outcome("opencode", "bd-7", OutcomeState::ExitedErr);
        let mut evidence = input(Some(&meta), Utc::now());
        evidence.outcome = Some(&outcome);

        let h = classify(&evidence, &thresholds());
        assert_eq!(h.state, HealthState::ExitedErr);
        assert!(h.state.is_terminal());
    }

    #[test]
    fn test_exit_zero_with_zero_mutations_is_no_op() {
        let mut outcome = sample_outcome("opencode", "bd-7", OutcomeState::ExitedOk);
        outcome.mutation_count = Some(0);
        let mut evidence = input(None, Utc::now());
        evidence.outcome = Some(&outcome);

        let h = classify(&evidence, &thresholds());
        assert_eq!(h.state, HealthState::NoOpSuccess);
        assert_eq!(h.next_action.as_deref(), Some("redispatch_with_guardrails"));
        assert_eq!(h.check_exit_code(), exit_codes::NO_OP_SUCCESS);
    }

    #[test]
    fn test_terminal_exit_codes() {
        let mut outcome = sample_outcome("cc-glm", "bd-8", OutcomeState::Failed);
        outcome.reason_code = "no_commit_artifact".to_string();
        let mut evidence = input(None, Utc::now());
        evidence.outcome = Some(&outcome);
        assert_eq!(
            classify(&evidence, &thresholds()).check_exit_code(),
            exit_codes::NO_COMMIT_ARTIFACT
        );

        let capacity = sample_outcome("cc-glm", "bd-8", OutcomeState::CapacityExhausted);
        evidence.outcome = Some(&capacity);
        assert_eq!(
            classify(&evidence, &thresholds()).check_exit_code(),
            exit_codes::CAPACITY_EXHAUSTED
        );
    }
}

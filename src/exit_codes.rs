//! Exit code constants for the dx-runner CLI.
//!
//! These codes are an automation-facing contract and must never be renumbered:
//! - 0: Success
//! - 1: User error (bad args, invalid state, I/O)
//! - 2: Governance gate failure
//! - 3: Git operation failure
//! - 4: Job already has a live pid
//! - 10-12: `check` classifications that are not healthy
//! - 20-26: Dispatch contract failures, each paired with a fixed reason code

/// Successful execution (or a healthy job for `check`).
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid state, or filesystem failure.
pub const USER_ERROR: i32 = 1;

/// A governance gate failed without a more specific code.
pub const GATE_FAILURE: i32 = 2;

/// Git operation failure.
pub const GIT_FAILURE: i32 = 3;

/// The job id already has a live pid; nothing was launched.
pub const JOB_ACTIVE: i32 = 4;

/// `check` found no artifacts for the job id.
pub const JOB_MISSING: i32 = 10;

/// `check` found a job that is stalled, awaiting finalization, stopped, or failed.
pub const JOB_UNHEALTHY: i32 = 11;

/// `check` found a job that ended on provider quota or rate limits.
pub const CAPACITY_EXHAUSTED: i32 = 12;

/// Adapter or auth/service-context preflight failed.
pub const PREFLIGHT_FAILED: i32 = 20;

/// Provider exited 0 but changed nothing in the worktree.
pub const NO_OP_SUCCESS: i32 = 21;

/// The external issue-tracker repository path does not exist.
pub const BEADS_REPO_MISSING: i32 = 22;

/// Model resolution returned `unavailable`.
pub const MODEL_UNAVAILABLE: i32 = 23;

/// The provider is already running its configured maximum of jobs.
pub const CONCURRENCY_CAP_EXCEEDED: i32 = 24;

/// Commit-required contract: provider exited 0 without producing a commit.
pub const NO_COMMIT_ARTIFACT: i32 = 25;

/// The issue-tracker CLI is not reachable.
pub const BEADS_CLI_MISSING: i32 = 26;

/// Map a gate or outcome reason code onto its fixed exit code.
///
/// Reason codes without a dedicated exit code map to `fallback`.
pub fn for_reason(reason_code: &str, fallback: i32) -> i32 {
    match reason_code {
        "concurrency_cap_exceeded" => CONCURRENCY_CAP_EXCEEDED,
        "beads_repo_missing" => BEADS_REPO_MISSING,
        "beads_cli_missing" => BEADS_CLI_MISSING,
        "no_commit_artifact" => NO_COMMIT_ARTIFACT,
        "no_mutations" => NO_OP_SUCCESS,
        r if r.starts_with("model_") || r.starts_with("non_canonical_model") => MODEL_UNAVAILABLE,
        r if r.ends_with("_auth_missing")
            || r.ends_with("_service_context_missing")
            || r.starts_with("preflight_") =>
        {
            PREFLIGHT_FAILED
        }
        _ => fallback,
    }
}

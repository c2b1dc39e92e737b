//! Error types for the dx-runner CLI.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.
//! Every error carries a stable `reason_code` and maps to a fixed exit code; the
//! mapping is only applied at the process boundary in `main`.

use crate::exit_codes;
use crate::gates::GateResult;
use thiserror::Error;

/// Main error type for dx-runner operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// User provided invalid arguments or the filesystem is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// Git operation failed.
    #[error("Git operation failed: {0}")]
    GitError(String),

    /// The job id already has a live provider pid.
    #[error("Job already running: {0}")]
    JobActive(String),

    /// A governance gate (including adapter preflight) rejected the command.
    #[error("{} gate failed ({}): {}", .0.gate, .0.reason_code, .0.details)]
    GateFailed(GateResult),

    /// Model resolution returned `unavailable`.
    #[error("Model unavailable for {provider}: {reason}")]
    ModelUnavailable { provider: String, reason: String },

    /// The adapter could not launch the provider process.
    #[error("Launch failed: {0}")]
    LaunchFailed(String),
}

impl RunnerError {
    /// Returns the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::UserError(_) => exit_codes::USER_ERROR,
            RunnerError::GitError(_) => exit_codes::GIT_FAILURE,
            RunnerError::JobActive(_) => exit_codes::JOB_ACTIVE,
            RunnerError::GateFailed(gate) => {
                exit_codes::for_reason(&gate.reason_code, exit_codes::GATE_FAILURE)
            }
            RunnerError::ModelUnavailable { .. } => exit_codes::MODEL_UNAVAILABLE,
            RunnerError::LaunchFailed(_) => exit_codes::PREFLIGHT_FAILED,
        }
    }

    /// Returns the stable reason code surfaced in JSON output.
    pub fn reason_code(&self) -> String {
        match self {
            RunnerError::UserError(_) => "user_error".to_string(),
            RunnerError::GitError(_) => "git_error".to_string(),
            RunnerError::JobActive(_) => "job_already_running".to_string(),
            RunnerError::GateFailed(gate) => gate.reason_code.clone(),
            RunnerError::ModelUnavailable { reason, .. } => {
                // Reasons look like `model_not_in_catalogue:<id>`; the code is the prefix.
                reason.split(':').next().unwrap_or("model_unavailable").to_string()
            }
            RunnerError::LaunchFailed(_) => "launch_failed".to_string(),
        }
    }
}

/// Result type alias for dx-runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_has_correct_exit_code() {
        let err = RunnerError::UserError("bad argument".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
        assert_eq!(err.reason_code(), "user_error");
    }

    #[test]
    fn git_error_has_correct_exit_code() {
        let err = RunnerError::GitError("rev-parse failed".to_string());
        assert_eq!(err.exit_code(), exit_codes::GIT_FAILURE);
    }

    #[test]
    fn job_active_has_correct_exit_code() {
        let err = RunnerError::JobActive("bd-1 (pid 42)".to_string());
        assert_eq!(err.exit_code(), exit_codes::JOB_ACTIVE);
        assert_eq!(err.reason_code(), "job_already_running");
    }

    #[test]
    fn gate_failure_uses_reason_specific_exit_code() {
        let err = RunnerError::GateFailed(GateResult::fail(
            "concurrency",
            "concurrency_cap_exceeded",
            "opencode has 2/2 live jobs",
        ));
        assert_eq!(err.exit_code(), exit_codes::CONCURRENCY_CAP_EXCEEDED);
        assert_eq!(err.reason_code(), "concurrency_cap_exceeded");

        let err = RunnerError::GateFailed(GateResult::fail("scope", "scope_violation", "x"));
        assert_eq!(err.exit_code(), exit_codes::GATE_FAILURE);
    }

    #[test]
    fn model_unavailable_reason_code_is_prefix() {
        let err = RunnerError::ModelUnavailable {
            provider: "opencode".to_string(),
            reason: "non_canonical_model:zai-coding-plan/glm-5".to_string(),
        };
        assert_eq!(err.exit_code(), exit_codes::MODEL_UNAVAILABLE);
        assert_eq!(err.reason_code(), "non_canonical_model");
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = RunnerError::GateFailed(GateResult::fail(
            "baseline",
            "baseline_behind",
            "HEAD abc1234 does not contain def5678",
        ));
        assert_eq!(
            err.to_string(),
            "baseline gate failed (baseline_behind): HEAD abc1234 does not contain def5678"
        );
    }
}

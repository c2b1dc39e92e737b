//! Governance gates.
//!
//! Every gate is an independent check returning a [`GateResult`] with a
//! stable reason code. A gate never substitutes a default when it cannot
//! decide: missing inputs fail with their own reason code.

pub mod auth;
pub mod baseline;
pub mod beads;
pub mod commit_required;
pub mod concurrency;
pub mod evidence;
pub mod feature_key;
pub mod scope;

use crate::error::{RunnerError, Result};
use crate::exit_codes;
use serde::Serialize;
use std::collections::BTreeMap;

/// Uniform outcome of any gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    pub reason_code: String,
    pub details: String,
    /// Extra machine-readable facts (ids, counts, sentinels).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
}

impl GateResult {
    pub fn pass(
        gate: impl Into<String>,
        reason_code: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            gate: gate.into(),
            passed: true,
            reason_code: reason_code.into(),
            details: details.into(),
            identifiers: BTreeMap::new(),
        }
    }

    pub fn fail(
        gate: impl Into<String>,
        reason_code: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            ..Self::pass(gate, reason_code, details)
        }
    }

    pub fn with_identifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.identifiers.insert(key.into(), value.into());
        self
    }

    /// Process exit code for a standalone gate command.
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            exit_codes::SUCCESS
        } else {
            exit_codes::for_reason(&self.reason_code, exit_codes::GATE_FAILURE)
        }
    }

    /// `Ok(self)` when passed, `Err(GateFailed)` otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.passed {
            Ok(self)
        } else {
            Err(RunnerError::GateFailed(self))
        }
    }
}

/// Abbreviate a SHA for messages.
pub(crate) fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

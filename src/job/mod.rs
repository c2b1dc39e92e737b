//! Job artifacts and their interpretation.
//!
//! A job is a (provider, beads id) pair. Its artifacts live under
//! `<state_dir>/<provider>/<beads>.*` and are the only record of its state.

pub mod health;
pub mod heartbeat;
pub mod kv;
pub mod meta;
pub mod outcome;
pub mod store;

pub use health::{Health, HealthInput, HealthState, Thresholds, classify};
pub use heartbeat::Heartbeat;
pub use meta::JobMeta;
pub use outcome::{Outcome, OutcomeState};
pub use store::{JobSnapshot, JobStore, PidFile, RcRecord};

use crate::error::{RunnerError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static BEADS_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid beads id regex")
});

/// Validate a beads id for use as an artifact file name.
pub fn validate_beads_id(beads: &str) -> Result<()> {
    if beads.len() > 128 || !BEADS_ID_RE.is_match(beads) || beads.contains("..") {
        return Err(RunnerError::UserError(format!(
            "invalid beads id '{}'\n\
             Fix: use letters, digits, '.', '_' and '-' only (e.g. bd-xga8.6.2).",
            beads
        )));
    }
    Ok(())
}

/// A fresh run instance id: UTC timestamp plus the creating pid.
pub fn new_run_instance(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), std::process::id())
}

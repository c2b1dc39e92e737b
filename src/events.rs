//! Audit event log for dx-runner.
//!
//! Every state-changing command appends one JSON object per line to
//! `<state_dir>/events.ndjson`. The log is an audit trail only: job state is
//! always re-derived from the artifacts, never replayed from events.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: start, stop, restart, finalize, prune, supersede, start_rejected
//! - `actor`: `user@host`
//! - `provider` / `beads`: the job, when the event concerns one
//! - `details`: freeform object with action-specific details

use crate::context::RunnerContext;
use crate::error::{RunnerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Provider process launched and Monitor spawned.
    Start,
    /// A start was refused by a gate or the model resolver.
    StartRejected,
    /// Operator stop.
    Stop,
    /// Stop followed by a fresh run instance.
    Restart,
    /// Outcome written.
    Finalize,
    /// Artifacts removed by `prune`.
    Prune,
    /// Terminal artifacts of another provider removed on redispatch.
    Supersede,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Start => write!(f, "start"),
            EventAction::StartRejected => write!(f, "start_rejected"),
            EventAction::Stop => write!(f, "stop"),
            EventAction::Restart => write!(f, "restart"),
            EventAction::Finalize => write!(f, "finalize"),
            EventAction::Prune => write!(f, "prune"),
            EventAction::Supersede => write!(f, "supersede"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// The actor who performed the action (e.g., `user@HOST`).
    pub actor: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub beads: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: actor_string(),
            provider: None,
            beads: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach the job this event concerns.
    pub fn with_job(mut self, provider: impl Into<String>, beads: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.beads = Some(beads.into());
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            RunnerError::UserError(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// Get the actor string for event metadata.
pub(crate) fn actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host_name())
}

/// Hostname of this machine, or `unknown`.
pub(crate) fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Append an event to the events log.
///
/// The file and its directory are created on first use. Each append writes
/// exactly one line with a trailing newline.
pub fn append_event(ctx: &RunnerContext, event: &Event) -> Result<()> {
    let events_file = ctx.events_file();
    let json_line = event.to_ndjson_line()?;

    if let Some(dir) = events_file.parent()
        && !dir.exists()
    {
        fs::create_dir_all(dir).map_err(|e| {
            RunnerError::UserError(format!(
                "failed to create state directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&events_file)
        .map_err(|e| {
            RunnerError::UserError(format!(
                "failed to open events file '{}': {}",
                events_file.display(),
                e
            ))
        })?;

    writeln!(file, "{}", json_line).map_err(|e| {
        RunnerError::UserError(format!(
            "failed to write event to '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    Ok(())
}

/// Append an event, logging instead of failing.
///
/// The audit log must never turn a successful state change into a failure.
pub fn record(ctx: &RunnerContext, event: Event) {
    if let Err(e) = append_event(ctx, &event) {
        tracing::warn!(action = %event.action, error = %e, "failed to append audit event");
    }
}

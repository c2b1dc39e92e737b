//! Implementation of `dx-runner stop`.
//!
//! Stop is the only cancellation path. The Monitor is terminated first so it
//! cannot race the Runner to the Outcome; then the provider's process group
//! is terminated (SIGTERM, bounded wait, SIGKILL) and a `manual_stop`
//! Outcome is written with metrics measured at the stop moment.
//! Stopping a job that already has an Outcome changes nothing.

use super::launch::append_log_line;
use super::{Env, print_json, resolve_job};
use crate::cli::StopArgs;
use crate::error::{RunnerError, Result};
use crate::events::{self, Event, EventAction, actor_string};
use crate::exit_codes;
use crate::job::{JobMeta, JobSnapshot, Outcome, OutcomeState};
use crate::monitor::finalize::{Verdict, build_outcome, measure, persist};
use crate::process::{self, Termination};
use crate::provider::{self, ProviderAdapter};
use chrono::Utc;
use serde_json::json;
use std::time::Duration;

/// Grace period for the Monitor, which has nothing to flush.
const MONITOR_GRACE: Duration = Duration::from_secs(2);

/// Terminate a job's Monitor and then its provider group.
///
/// Returns how the provider went down.
pub(super) fn halt(
    adapter: &dyn ProviderAdapter,
    snapshot: &JobSnapshot,
    grace: Duration,
) -> Result<Termination> {
    let monitor_pid = snapshot
        .monitor_pid
        .pid()
        .or_else(|| snapshot.meta.as_ref().and_then(|m| m.monitor_pid));
    if let Some(pid) = monitor_pid.filter(|pid| process::is_alive(*pid)) {
        let how = process::terminate_group(pid, MONITOR_GRACE)?;
        tracing::info!(beads = %snapshot.beads, pid, ?how, "monitor terminated");
    }

    match snapshot.job_pid() {
        Some(pid) if process::is_alive(pid) => {
            let how = adapter.stop(pid, grace)?;
            tracing::info!(beads = %snapshot.beads, pid, ?how, "provider terminated");
            Ok(how)
        }
        _ => Ok(Termination::AlreadyExited),
    }
}

/// Freeze a halted run as `manual_stop`, measured now.
pub(super) fn record_manual_stop(
    env: &Env,
    meta: &JobMeta,
    snapshot: &JobSnapshot,
    termination: Termination,
) -> Result<Outcome> {
    let store = env.store();

    // A provider that finished on its own just before the stop keeps its code.
    let exit_code = crate::job::store::read_rc(&snapshot.paths.rc)?
        .filter(|rc| rc.belongs_to(&meta.run_instance))
        .map_or(termination.signal_exit_code(), |rc| rc.exit_code);

    let now = Utc::now();
    let latest = store.snapshot(&meta.provider, &meta.beads)?;
    let heartbeat = latest
        .heartbeat
        .as_ref()
        .filter(|hb| hb.run_instance == meta.run_instance);
    let measurements = measure(&store, meta, heartbeat, now);
    let verdict = Verdict {
        state: OutcomeState::ManualStop,
        exit_code,
        reason_code: "manual_stop".to_string(),
        next_action: None,
    };
    persist(&store, build_outcome(meta, verdict, &measurements, now))
}

/// Execute the `dx-runner stop` command.
pub fn cmd_stop(env: &Env, args: StopArgs) -> Result<i32> {
    let (beads, provider) = resolve_job(env, &args.job)?;
    let provider = provider.ok_or_else(|| {
        RunnerError::UserError(format!("no job recorded for '{}'", beads))
    })?;

    let store = env.store();
    let snapshot = store.snapshot(&provider, &beads)?;

    if let Some(outcome) = &snapshot.outcome {
        tracing::info!(beads = %beads, state = %outcome.state, "already terminal; nothing to stop");
        print_stopped(env, outcome, true)?;
        return Ok(exit_codes::SUCCESS);
    }

    let meta = snapshot.meta.clone().ok_or_else(|| {
        RunnerError::UserError(format!(
            "job '{}' on {} has no metadata; use `dx-runner prune` to clear stray files",
            beads, provider
        ))
    })?;

    let adapter = provider::adapter_for(&provider, &env.ctx, &env.config)?;
    append_log_line(
        &snapshot.paths.log,
        &format!("stop requested by {}", actor_string()),
    );
    let termination = halt(adapter.as_ref(), &snapshot, env.config.stop_grace())?;

    let outcome = record_manual_stop(env, &meta, &snapshot, termination)?;

    events::record(
        &env.ctx,
        Event::new(EventAction::Stop)
            .with_job(&provider, &beads)
            .with_details(json!({
                "run_instance": meta.run_instance,
                "pid": snapshot.job_pid(),
                "termination": format!("{:?}", termination),
                "exit_code": outcome.exit_code,
            })),
    );

    print_stopped(env, &outcome, false)?;
    Ok(exit_codes::SUCCESS)
}

fn print_stopped(env: &Env, outcome: &Outcome, already: bool) -> Result<()> {
    if env.json {
        return print_json(&json!({
            "ok": true,
            "already_terminal": already,
            "outcome": outcome,
        }));
    }

    if already {
        println!(
            "{} on {} is already {} ({})",
            outcome.beads, outcome.provider, outcome.state, outcome.reason_code
        );
    } else {
        println!(
            "Stopped {} on {} (exit {}, {} log bytes, mutations {})",
            outcome.beads,
            outcome.provider,
            outcome.exit_code,
            outcome.log_bytes,
            outcome
                .mutation_count
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
    }
    Ok(())
}

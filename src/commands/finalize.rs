//! Implementations of `dx-runner finalize` and the hidden `__monitor` entry point.

use super::{Env, print_json, resolve_job};
use crate::cli::{CheckArgs, MonitorArgs};
use crate::error::{RunnerError, Result};
use crate::exit_codes;
use crate::job::Outcome;
use crate::job::store::read_rc;
use crate::monitor::{self, MonitorJob, MonitorTiming, finalize_job};
use crate::provider;
use serde_json::json;

fn print_outcome(env: &Env, outcome: &Outcome, already: bool) -> Result<()> {
    if env.json {
        return print_json(&json!({
            "ok": true,
            "already_terminal": already,
            "outcome": outcome,
        }));
    }
    println!(
        "{} on {}: {} (exit {}, {})",
        outcome.beads, outcome.provider, outcome.state, outcome.exit_code, outcome.reason_code
    );
    Ok(())
}

/// Execute the `dx-runner finalize` command.
///
/// Writes the Outcome for a run whose provider is gone but whose Monitor
/// never recorded one. The exit code comes from the rc file of the same run
/// instance; without one the run is recorded as `rc_missing`.
pub fn cmd_finalize(env: &Env, args: CheckArgs) -> Result<i32> {
    let (beads, provider) = resolve_job(env, &args.job)?;
    let provider = provider.ok_or_else(|| {
        RunnerError::UserError(format!("no job recorded for '{}'", beads))
    })?;

    let store = env.store();
    let snapshot = store.snapshot(&provider, &beads)?;

    if let Some(outcome) = &snapshot.outcome {
        print_outcome(env, outcome, true)?;
        return Ok(exit_codes::SUCCESS);
    }

    let meta = snapshot.meta.as_ref().ok_or_else(|| {
        RunnerError::UserError(format!(
            "job '{}' on {} has no metadata to finalize",
            beads, provider
        ))
    })?;

    if snapshot.pid_alive() {
        return Err(RunnerError::UserError(format!(
            "job '{}' on {} is still running (pid {})\n\
             Fix: wait for it to exit, or use `dx-runner stop`.",
            beads,
            provider,
            snapshot.job_pid().unwrap_or_default()
        )));
    }

    let exit_code = read_rc(&snapshot.paths.rc)?
        .filter(|rc| rc.belongs_to(&meta.run_instance))
        .map(|rc| rc.exit_code);
    let heartbeat = snapshot
        .heartbeat
        .as_ref()
        .filter(|hb| hb.run_instance == meta.run_instance);

    let adapter = provider::adapter_for(&provider, &env.ctx, &env.config)?;
    let outcome = finalize_job(
        &store,
        meta,
        exit_code,
        heartbeat,
        adapter.capacity_signatures(),
    )?;

    print_outcome(env, &outcome, false)?;
    Ok(exit_codes::SUCCESS)
}

/// Execute the hidden `__monitor` command.
///
/// Runs in the background for the life of one run instance.
pub fn cmd_monitor(env: &Env, args: MonitorArgs) -> Result<i32> {
    let adapter = provider::adapter_for(&args.provider, &env.ctx, &env.config)?;
    let job = MonitorJob {
        provider: args.provider,
        beads: args.beads,
        run_instance: args.run_instance,
    };

    match monitor::run(
        &env.store(),
        &job,
        MonitorTiming::from_config(&env.config),
        adapter.capacity_signatures(),
    )? {
        Some(outcome) => tracing::info!(
            beads = %job.beads,
            state = %outcome.state,
            "monitor finished"
        ),
        None => tracing::info!(beads = %job.beads, "monitor exiting; run superseded"),
    }
    Ok(exit_codes::SUCCESS)
}

//! Implementation of `dx-runner start` and `dx-runner restart`.
//!
//! Order of operations for a launch:
//!
//! 1. Exclusivity: no instance of the beads id may be live under any provider
//! 2. Gates: concurrency cap, then the gates the profile/flags require
//! 3. Adapter preflight (per preflight mode)
//! 4. Model resolution (`unavailable` aborts)
//! 5. Supersede terminal instances under other providers
//! 6. Write metadata, launch detached, spawn the Monitor
//!
//! Failures in steps 1-4 leave no job artifacts behind. A launch failure in
//! step 6 is recorded as a `failed` outcome.
//!
//! `restart` runs steps 1-4 while the old run is still up; only then is it
//! halted. If step 5 or 6 fails before the new run's metadata is written,
//! the old run instance is closed with a `manual_stop` outcome.

use super::stop::{halt, record_manual_stop};
use super::{Env, print_json, require_beads, require_provider, resolve_job, worktree_or_cwd};
use crate::cli::StartArgs;
use crate::config::{PreflightMode, RequiredGate};
use crate::error::{RunnerError, Result};
use crate::events::{self, Event, EventAction};
use crate::gates::GateResult;
use crate::gates::auth::{AuthCheck, check_auth};
use crate::gates::baseline::check_baseline;
use crate::gates::beads::check_beads;
use crate::gates::concurrency::check_concurrency;
use crate::git;
use crate::job::store::remove_if_exists;
use crate::job::{JobMeta, OutcomeState, new_run_instance};
use crate::monitor::finalize::{Verdict, build_outcome, measure, persist};
use crate::process::{self, Termination};
use crate::provider::{self, LaunchRequest, ModelRequest, ProviderAdapter, Resolution};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A fully resolved dispatch.
#[derive(Debug, Clone)]
struct LaunchPlan {
    beads: String,
    provider: String,
    worktree: PathBuf,
    prompt_file: Option<PathBuf>,
    request: ModelRequest,
    preflight: PreflightMode,
    gates: Vec<RequiredGate>,
    baseline: Option<String>,
    profile: Option<String>,
    retries: u32,
}

impl LaunchPlan {
    /// Merge flags, the named profile, and (for restart) the previous run.
    fn resolve(env: &Env, args: &StartArgs, previous: Option<&JobMeta>) -> Result<Self> {
        let beads = require_beads(&args.job)?.to_string();

        let profile_name = args
            .profile
            .clone()
            .or_else(|| previous.and_then(|m| m.profile.clone()));
        let profile = profile_name
            .as_deref()
            .map(|name| env.config.profile(name))
            .transpose()?;

        let fallback_provider = profile
            .map(|p| p.provider.as_str())
            .or_else(|| previous.map(|m| m.provider.as_str()));
        let provider = require_provider(&args.job, fallback_provider)?.to_string();

        let worktree = match (&args.job.worktree, previous) {
            (None, Some(meta)) => meta.worktree.clone(),
            _ => worktree_or_cwd(&args.job)?,
        };
        let prompt_file = match &args.job.prompt_file {
            Some(path) => Some(super::absolute(path)?),
            None => previous.and_then(|m| m.prompt_file.clone()),
        };

        let requested = args
            .job
            .model
            .clone()
            .or_else(|| profile.and_then(|p| p.model.clone()))
            .or_else(|| previous.and_then(|m| m.requested_model.clone()));

        let preflight = match args.preflight.as_deref() {
            Some(mode) => PreflightMode::from_str(mode).ok_or_else(|| {
                RunnerError::UserError(format!(
                    "invalid preflight mode '{}' (expected strict, lenient or skip)",
                    mode
                ))
            })?,
            None => profile.map(|p| p.preflight).unwrap_or_default(),
        };

        let mut gates: Vec<RequiredGate> = profile.map(|p| p.gates.clone()).unwrap_or_default();
        for name in &args.require {
            let gate = RequiredGate::from_str(name).ok_or_else(|| {
                RunnerError::UserError(format!(
                    "unknown gate '{}' (expected beads, baseline, auth, commit-required)",
                    name
                ))
            })?;
            gates.push(gate);
        }
        if env.config.provider(&provider).auth_preflight {
            gates.push(RequiredGate::Auth);
        }
        if previous.is_some_and(|m| m.commit_required) {
            gates.push(RequiredGate::CommitRequired);
        }
        let mut seen = Vec::new();
        gates.retain(|g| {
            let fresh = !seen.contains(g);
            seen.push(*g);
            fresh
        });

        Ok(Self {
            beads,
            provider,
            worktree,
            prompt_file,
            request: ModelRequest {
                requested,
                env_override: args.env_model.clone(),
                allow_override: args.allow_model_override,
            },
            preflight,
            gates,
            baseline: args.baseline.clone(),
            profile: profile_name,
            retries: previous.map_or(0, |m| m.retries + 1),
        })
    }

    fn commit_required(&self) -> bool {
        self.gates.contains(&RequiredGate::CommitRequired)
    }
}

/// What `start`/`restart` print.
#[derive(Debug, Serialize)]
struct LaunchReport {
    ok: bool,
    beads: String,
    provider: String,
    run_instance: String,
    pid: Option<u32>,
    monitor_pid: Option<u32>,
    selected_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_reason: Option<String>,
    launch_mode: String,
    retries: u32,
    log: PathBuf,
    rc_file: PathBuf,
    gates: Vec<GateResult>,
}

/// Execute the `dx-runner start` command.
pub fn cmd_start(env: &Env, args: StartArgs) -> Result<i32> {
    let plan = LaunchPlan::resolve(env, &args, None)?;
    ensure_not_live(env, &plan.beads, None)?;
    let prepared = prepare(env, &plan)?;
    launch(env, plan, prepared, true)
}

/// Execute the `dx-runner restart` command.
///
/// The replacement is fully validated before the old run is touched. A live
/// run is then halted without an outcome; the new run gets a fresh run
/// instance and `retries + 1`.
pub fn cmd_restart(env: &Env, args: StartArgs) -> Result<i32> {
    let (beads, provider) = resolve_job(env, &args.job)?;
    let provider = provider.ok_or_else(|| {
        RunnerError::UserError(format!(
            "no job recorded for '{}'; dispatch it with `dx-runner start`",
            beads
        ))
    })?;

    let store = env.store();
    let snapshot = store.snapshot(&provider, &beads)?;
    let previous = snapshot.meta.clone().ok_or_else(|| {
        RunnerError::UserError(format!(
            "job '{}' on {} has no metadata to restart from",
            beads, provider
        ))
    })?;

    let mut args = args;
    args.job.provider = Some(provider.clone());
    let plan = LaunchPlan::resolve(env, &args, Some(&previous))?;
    ensure_not_live(env, &plan.beads, Some(&provider))?;
    let prepared = prepare(env, &plan)?;

    let termination = if snapshot.is_live() || snapshot.monitor_alive() {
        halt(prepared.adapter.as_ref(), &snapshot, env.config.stop_grace())?
    } else {
        Termination::AlreadyExited
    };

    events::record(
        &env.ctx,
        Event::new(EventAction::Restart)
            .with_job(&provider, &beads)
            .with_details(json!({
                "previous_run_instance": previous.run_instance,
                "previous_pid": previous.pid,
                "retries": plan.retries,
            })),
    );

    launch(env, plan, prepared, false).inspect_err(|e| {
        if let Err(close_err) = close_abandoned_run(env, &previous, termination) {
            tracing::warn!(
                beads = %previous.beads,
                error = %close_err,
                "failed to close halted run after restart error"
            );
        }
        tracing::warn!(beads = %previous.beads, error = %e, "restart failed after halting the old run");
    })
}

/// Give a halted run an outcome if the replacement never took its place.
fn close_abandoned_run(env: &Env, previous: &JobMeta, termination: Termination) -> Result<()> {
    let store = env.store();
    let current = store.snapshot(&previous.provider, &previous.beads)?;
    let replaced = current
        .meta
        .as_ref()
        .is_some_and(|m| m.run_instance != previous.run_instance);
    if replaced || current.outcome.is_some() {
        return Ok(());
    }
    record_manual_stop(env, previous, &current, termination)?;
    Ok(())
}

/// Refuse when any provider already runs this beads id.
///
/// `replacing` names the provider whose run a restart is about to halt.
fn ensure_not_live(env: &Env, beads: &str, replacing: Option<&str>) -> Result<()> {
    for snapshot in env.store().instances(beads)? {
        if snapshot.is_live() && replacing != Some(snapshot.provider.as_str()) {
            return Err(RunnerError::JobActive(format!(
                "{} on {} (pid {})",
                beads,
                snapshot.provider,
                snapshot.job_pid().unwrap_or_default()
            )));
        }
    }
    Ok(())
}

/// Run the start-time gates; the first failure aborts.
fn run_gates(env: &Env, plan: &LaunchPlan) -> Result<Vec<GateResult>> {
    let store = env.store();
    let mut passed = Vec::new();

    // A restart's own run is about to be halted; it does not count.
    let own = usize::from(store.snapshot(&plan.provider, &plan.beads)?.is_live());
    let live = store.live_count(&plan.provider)?.saturating_sub(own);
    let cap = env.config.max_concurrent(&plan.provider);
    passed.push(reject_unless_passed(
        env,
        plan,
        check_concurrency(&plan.provider, live, cap),
    )?);

    for gate in &plan.gates {
        let result = match gate {
            RequiredGate::Beads => check_beads(
                &env.config.beads_repo,
                &env.config.beads_cli,
                Some(&plan.beads),
            ),
            RequiredGate::Baseline => {
                let sha = plan.baseline.as_deref().ok_or_else(|| {
                    RunnerError::UserError(
                        "the baseline gate needs --baseline <sha>".to_string(),
                    )
                })?;
                check_baseline(&plan.worktree, sha)?
            }
            RequiredGate::Auth => check_auth(&AuthCheck {
                provider: &plan.provider,
                cli: &env.config.auth_cli,
                args: &env.config.auth_check_args,
                service_url_env: &env.config.service_url_env,
                service_url: std::env::var(&env.config.service_url_env).ok(),
            }),
            // Enforced by the Monitor once the provider exits.
            RequiredGate::CommitRequired => continue,
        };
        passed.push(reject_unless_passed(env, plan, result)?);
    }

    Ok(passed)
}

fn reject_unless_passed(env: &Env, plan: &LaunchPlan, result: GateResult) -> Result<GateResult> {
    if !result.passed {
        events::record(
            &env.ctx,
            Event::new(EventAction::StartRejected)
                .with_job(&plan.provider, &plan.beads)
                .with_details(json!({
                    "gate": result.gate,
                    "reason_code": result.reason_code,
                    "details": result.details,
                })),
        );
    }
    result.into_result()
}

fn run_preflight(adapter: &dyn ProviderAdapter, plan: &LaunchPlan) -> Result<Option<GateResult>> {
    match plan.preflight {
        PreflightMode::Skip => Ok(None),
        PreflightMode::Strict => adapter.preflight().into_result().map(Some),
        PreflightMode::Lenient => {
            let result = adapter.preflight();
            if !result.passed {
                tracing::warn!(
                    provider = adapter.name(),
                    reason = %result.reason_code,
                    "preflight failed; continuing in lenient mode"
                );
            }
            Ok(Some(result))
        }
    }
}

/// Remove another provider's terminal artifacts for the same beads id.
fn supersede_others(env: &Env, plan: &LaunchPlan) -> Result<()> {
    let store = env.store();
    for snapshot in store.instances(&plan.beads)? {
        if snapshot.provider == plan.provider {
            continue;
        }
        let removed = store.remove_job(&snapshot.provider, &plan.beads)?;
        tracing::info!(
            beads = %plan.beads,
            from = %snapshot.provider,
            to = %plan.provider,
            "superseded previous provider instance"
        );
        events::record(
            &env.ctx,
            Event::new(EventAction::Supersede)
                .with_job(&snapshot.provider, &plan.beads)
                .with_details(json!({
                    "superseded_by": plan.provider,
                    "removed": removed.len(),
                })),
        );
    }
    Ok(())
}

/// Everything checked before any artifact is touched.
struct Prepared {
    adapter: Box<dyn ProviderAdapter>,
    gates: Vec<GateResult>,
    selected_model: String,
    fallback_reason: Option<String>,
}

/// Gates, preflight, and model resolution.
fn prepare(env: &Env, plan: &LaunchPlan) -> Result<Prepared> {
    let mut gates = run_gates(env, plan)?;

    let adapter = provider::adapter_for(&plan.provider, &env.ctx, &env.config)?;
    if let Some(result) = run_preflight(adapter.as_ref(), plan)? {
        gates.push(result);
    }

    let (selected_model, fallback_reason) = match adapter.resolve_model(&plan.request) {
        Resolution::Resolved { model } => (model, None),
        Resolution::Fallback { model, reason } => (model, Some(reason)),
        Resolution::Unavailable { reason } => {
            events::record(
                &env.ctx,
                Event::new(EventAction::StartRejected)
                    .with_job(&plan.provider, &plan.beads)
                    .with_details(json!({ "reason_code": reason })),
            );
            return Err(RunnerError::ModelUnavailable {
                provider: plan.provider.clone(),
                reason,
            });
        }
    };

    Ok(Prepared {
        adapter,
        gates,
        selected_model,
        fallback_reason,
    })
}

fn launch(env: &Env, plan: LaunchPlan, prepared: Prepared, fresh_log: bool) -> Result<i32> {
    let store = env.store();
    let Prepared {
        adapter,
        gates,
        selected_model,
        fallback_reason,
    } = prepared;

    supersede_others(env, &plan)?;
    env.ctx.ensure_provider_dir(&plan.provider)?;
    store.clear_run_artifacts(&plan.provider, &plan.beads)?;
    let paths = store.paths(&plan.provider, &plan.beads);
    if fresh_log {
        remove_if_exists(&paths.log)?;
    }

    let now = Utc::now();
    let run_instance = new_run_instance(now);
    let start_sha = if git::is_git_repo(&plan.worktree) {
        git::head_sha(&plan.worktree).ok()
    } else {
        None
    };

    let mut meta = JobMeta {
        beads: plan.beads.clone(),
        provider: plan.provider.clone(),
        run_instance: run_instance.clone(),
        pid: None,
        monitor_pid: None,
        retries: plan.retries,
        started_at: now,
        updated_at: now,
        worktree: plan.worktree.clone(),
        prompt_file: plan.prompt_file.clone(),
        host: events::host_name(),
        cwd: super::current_dir()?,
        requested_model: plan.request.effective().map(str::to_string),
        selected_model,
        fallback_reason,
        launch_mode: provider::launch::LAUNCH_MODE.to_string(),
        start_sha,
        commit_required: plan.commit_required(),
        profile: plan.profile.clone(),
    };
    store.write_meta(&meta)?;

    if !fresh_log {
        append_log_line(&paths.log, &format!("restart run_instance={} retries={}", run_instance, plan.retries));
    }

    let request = LaunchRequest {
        beads: &plan.beads,
        run_instance: &run_instance,
        worktree: &plan.worktree,
        prompt_file: plan.prompt_file.as_deref(),
        model: &meta.selected_model,
        log: &paths.log,
        rc_file: &paths.rc,
    };
    let launched = match adapter.start(&request) {
        Ok(launched) => launched,
        Err(e) => {
            record_launch_failure(env, &meta, &e)?;
            return Err(e);
        }
    };

    meta.pid = Some(launched.pid);
    meta.launch_mode = launched.launch_mode.clone();
    meta.updated_at = Utc::now();
    store.write_meta(&meta)?;
    store.write_pid(&paths.pid, launched.pid, &run_instance)?;

    match spawn_monitor(env, &meta) {
        Ok(monitor_pid) => {
            meta.monitor_pid = Some(monitor_pid);
            store.write_meta(&meta)?;
            store.write_pid(&paths.monitor_pid, monitor_pid, &run_instance)?;
        }
        Err(e) => {
            tracing::warn!(beads = %meta.beads, error = %e, "failed to spawn monitor");
        }
    }

    events::record(
        &env.ctx,
        Event::new(EventAction::Start)
            .with_job(&meta.provider, &meta.beads)
            .with_details(json!({
                "run_instance": meta.run_instance,
                "pid": meta.pid,
                "monitor_pid": meta.monitor_pid,
                "selected_model": meta.selected_model,
                "fallback_reason": meta.fallback_reason,
                "retries": meta.retries,
                "profile": meta.profile,
            })),
    );

    let report = LaunchReport {
        ok: true,
        beads: meta.beads.clone(),
        provider: meta.provider.clone(),
        run_instance: meta.run_instance.clone(),
        pid: meta.pid,
        monitor_pid: meta.monitor_pid,
        selected_model: meta.selected_model.clone(),
        fallback_reason: meta.fallback_reason.clone(),
        launch_mode: meta.launch_mode.clone(),
        retries: meta.retries,
        log: paths.log.clone(),
        rc_file: launched.rc_file,
        gates,
    };

    if env.json {
        print_json(&report)?;
    } else {
        println!(
            "Started {} on {} (pid {}, model {})",
            report.beads,
            report.provider,
            launched.pid,
            report.selected_model
        );
        if let Some(reason) = &report.fallback_reason {
            println!("  model fallback: {}", reason);
        }
        if report.monitor_pid.is_none() {
            println!("  monitor not running; use `dx-runner finalize` once the job exits");
        }
        println!("  log: {}", report.log.display());
    }

    Ok(crate::exit_codes::SUCCESS)
}

/// Spawn the detached Monitor for `meta`'s run instance.
fn spawn_monitor(env: &Env, meta: &JobMeta) -> Result<u32> {
    let exe = std::env::current_exe().map_err(|e| {
        RunnerError::LaunchFailed(format!("failed to locate dx-runner executable: {}", e))
    })?;
    let paths = env.ctx.job_paths(&meta.provider, &meta.beads);

    let mut command = Command::new(exe);
    command.arg("--state-dir").arg(&env.ctx.state_dir);
    if let Some(config) = &env.config_path {
        command.arg("--config").arg(config);
    }
    command
        .args([
            "__monitor",
            "--provider",
            &meta.provider,
            "--beads",
            &meta.beads,
            "--run-instance",
            &meta.run_instance,
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(process::append_stdio(&paths.monitor_log)?);

    process::spawn_detached(command, "dx-runner monitor")
}

/// The provider never started: freeze that as a `failed` outcome.
fn record_launch_failure(env: &Env, meta: &JobMeta, error: &RunnerError) -> Result<()> {
    let store = env.store();
    let now = Utc::now();
    let paths = store.paths(&meta.provider, &meta.beads);
    append_log_line(&paths.log, &format!("launch failed: {}", error));

    let verdict = Verdict {
        state: OutcomeState::Failed,
        exit_code: -1,
        reason_code: "launch_failed".to_string(),
        next_action: None,
    };
    let measurements = measure(&store, meta, None, now);
    persist(&store, build_outcome(meta, verdict, &measurements, now))?;
    Ok(())
}

/// Append a runner line to the job log; failures only warn.
pub(super) fn append_log_line(log: &std::path::Path, line: &str) {
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .and_then(|mut file| {
            writeln!(
                file,
                "[dx-runner {}] {}",
                crate::job::meta::format_ts(&Utc::now()),
                line
            )
        });
    if let Err(e) = result {
        tracing::warn!(log = %log.display(), error = %e, "failed to append to job log");
    }
}

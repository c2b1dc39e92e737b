//! Implementations of `dx-runner check`, `status` and `report`.
//!
//! These are pure reads: artifacts plus two liveness probes, classified by
//! [`crate::job::classify`]. A beads id present under several providers
//! resolves to the most recently updated instance unless `--provider` is
//! given.

use super::{Env, check_provider, print_json, resolve_job};
use crate::cli::{CheckArgs, ReportArgs};
use crate::error::Result;
use crate::exit_codes;
use crate::job::{Health, HealthInput, HealthState, JobSnapshot, JobStore, Thresholds, classify};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub(super) fn thresholds(env: &Env) -> Thresholds {
    Thresholds {
        launch_grace: env.config.launch_grace(),
        stall_after: env.config.stall_after(),
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Classify one snapshot as of now.
pub(super) fn assess(snapshot: &JobSnapshot, thresholds: &Thresholds) -> Health {
    classify(
        &HealthInput {
            meta: snapshot.meta.as_ref(),
            outcome: snapshot.outcome.as_ref(),
            heartbeat: snapshot.heartbeat.as_ref(),
            pid_alive: snapshot.pid_alive(),
            monitor_alive: snapshot.monitor_alive(),
            log_bytes: snapshot.log_bytes,
            log_modified: modified_at(&snapshot.paths.log),
            now: Utc::now(),
        },
        thresholds,
    )
}

fn missing(beads: &str) -> Health {
    let mut health = classify(
        &HealthInput {
            meta: None,
            outcome: None,
            heartbeat: None,
            pid_alive: false,
            monitor_alive: false,
            log_bytes: 0,
            log_modified: None,
            now: Utc::now(),
        },
        &Thresholds {
            launch_grace: Duration::ZERO,
            stall_after: Duration::ZERO,
        },
    );
    health.hint = Some(format!(
        "no job recorded for '{}'; dispatch it with `dx-runner start`",
        beads
    ));
    health
}

/// One line of `check`/`status` output.
#[derive(Debug, Serialize)]
struct JobLine {
    beads: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(flatten)]
    health: Health,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    hint: Option<String>,
    exit_code: i32,
}

impl JobLine {
    fn new(snapshot: Option<&JobSnapshot>, beads: &str, health: Health) -> Self {
        let exit_code = health.check_exit_code();
        Self {
            beads: beads.to_string(),
            provider: snapshot.map(|s| s.provider.clone()),
            pid: snapshot.and_then(|s| s.job_pid()),
            run_instance: snapshot
                .and_then(|s| s.meta.as_ref())
                .map(|m| m.run_instance.clone()),
            selected_model: snapshot
                .and_then(|s| s.meta.as_ref())
                .map(|m| m.selected_model.clone()),
            updated_at: snapshot.and_then(JobSnapshot::updated_at),
            hint: health.hint.clone(),
            health,
            exit_code,
        }
    }

    fn render(&self) -> String {
        format!(
            "{:<20} {:<9} {:<18} {}",
            self.beads,
            self.provider.as_deref().unwrap_or("-"),
            self.health.state.as_str(),
            self.health.reason_code
        )
    }
}

/// Execute the `dx-runner check` command.
///
/// The exit code is the classification: 0 healthy, 10 missing, 11
/// unhealthy, 12 capacity exhausted, or the outcome's own contract code.
pub fn cmd_check(env: &Env, args: CheckArgs) -> Result<i32> {
    let (beads, provider) = resolve_job(env, &args.job)?;
    let store = env.store();

    let line = match provider {
        Some(provider) => {
            let snapshot = store.snapshot(&provider, &beads)?;
            let health = assess(&snapshot, &thresholds(env));
            JobLine::new(Some(&snapshot), &beads, health)
        }
        None => JobLine::new(None, &beads, missing(&beads)),
    };

    if env.json {
        print_json(&line)?;
    } else {
        println!(
            "{} [{}] {} ({})",
            line.beads,
            line.provider.as_deref().unwrap_or("-"),
            line.health.state,
            line.health.reason_code
        );
        if let Some(hint) = &line.hint {
            println!("  hint: {}", hint);
        }
    }

    Ok(line.exit_code)
}

/// Newest instance of every beads id, optionally for one provider.
fn newest_instances(store: &JobStore<'_>, provider: Option<&str>) -> Result<Vec<JobSnapshot>> {
    let mut newest: BTreeMap<String, JobSnapshot> = BTreeMap::new();
    for (provider, beads) in store.list_jobs(provider)? {
        let snapshot = store.snapshot(&provider, &beads)?;
        if !snapshot.exists() && !snapshot.pid.is_present() {
            continue;
        }
        let replace = newest.get(&beads).is_none_or(|current| {
            (snapshot.updated_at(), snapshot.mtime()) > (current.updated_at(), current.mtime())
        });
        if replace {
            newest.insert(beads, snapshot);
        }
    }
    Ok(newest.into_values().collect())
}

/// Execute the `dx-runner status` command.
pub fn cmd_status(env: &Env, args: CheckArgs) -> Result<i32> {
    if let Some(provider) = args.job.provider.as_deref() {
        check_provider(provider)?;
    }
    let store = env.store();
    let thresholds = thresholds(env);

    let lines: Vec<JobLine> = newest_instances(&store, args.job.provider.as_deref())?
        .into_iter()
        .filter(|s| args.job.beads.as_deref().is_none_or(|b| b == s.beads))
        .map(|s| {
            let health = assess(&s, &thresholds);
            JobLine::new(Some(&s), &s.beads, health)
        })
        .collect();

    if env.json {
        print_json(&json!({ "jobs": lines }))?;
        return Ok(exit_codes::SUCCESS);
    }

    if lines.is_empty() {
        println!("No jobs under {}", env.ctx.state_dir.display());
        return Ok(exit_codes::SUCCESS);
    }

    println!("{:<20} {:<9} {:<18} REASON", "BEADS", "PROVIDER", "STATE");
    for line in &lines {
        println!("{}", line.render());
    }
    let live = lines
        .iter()
        .filter(|l| !l.health.state.is_terminal() && l.health.state != HealthState::Missing)
        .count();
    println!();
    println!("{} job(s), {} not terminal", lines.len(), live);

    Ok(exit_codes::SUCCESS)
}

/// Last `n` lines of a log, lossily decoded.
fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(bytes) = std::fs::read(path) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

/// Execute the `dx-runner report` command.
pub fn cmd_report(env: &Env, args: ReportArgs) -> Result<i32> {
    let (beads, provider) = resolve_job(env, &args.job)?;
    let Some(provider) = provider else {
        let health = missing(&beads);
        if env.json {
            print_json(&JobLine::new(None, &beads, health))?;
        } else {
            println!("{}: missing", beads);
        }
        return Ok(exit_codes::JOB_MISSING);
    };

    let snapshot = env.store().snapshot(&provider, &beads)?;
    let health = assess(&snapshot, &thresholds(env));
    let exit_code = health.check_exit_code();

    if env.json {
        print_json(&json!({
            "beads": beads,
            "provider": provider,
            "health": health,
            "exit_code": exit_code,
            "pid": snapshot.job_pid(),
            "pid_alive": snapshot.pid_alive(),
            "monitor_alive": snapshot.monitor_alive(),
            "log": snapshot.paths.log,
            "log_bytes": snapshot.log_bytes,
            "meta": snapshot.meta,
            "heartbeat": snapshot.heartbeat,
            "outcome": snapshot.outcome,
        }))?;
        return Ok(exit_code);
    }

    println!("Job {} on {}", beads, provider);
    println!("  state:       {} ({})", health.state, health.reason_code);
    if let Some(next) = &health.next_action {
        println!("  next action: {}", next);
    }
    if let Some(meta) = &snapshot.meta {
        println!("  run:         {} (retries {})", meta.run_instance, meta.retries);
        println!("  model:       {}", meta.selected_model);
        if let Some(reason) = &meta.fallback_reason {
            println!("  fallback:    {}", reason);
        }
        println!("  worktree:    {}", meta.worktree.display());
        println!("  host:        {}", meta.host);
        println!("  started:     {}", crate::job::meta::format_ts(&meta.started_at));
    }
    if let Some(pid) = snapshot.job_pid() {
        println!(
            "  pid:         {} ({})",
            pid,
            if snapshot.pid_alive() { "alive" } else { "dead" }
        );
    }
    if let Some(hb) = &snapshot.heartbeat {
        println!(
            "  heartbeat:   #{} {} at {} (cpu {:.2}s)",
            hb.count,
            hb.last_type.as_str(),
            crate::job::meta::format_ts(&hb.last_seen),
            hb.cpu_time_sec
        );
    }
    if let Some(outcome) = &snapshot.outcome {
        println!(
            "  outcome:     exit {} after {}s, mutations {}, {} log bytes",
            outcome.exit_code,
            outcome.duration_sec,
            outcome
                .mutation_count
                .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            outcome.log_bytes
        );
    }
    if let Some(hint) = &health.hint {
        println!("  hint:        {}", hint);
    }

    let tail = tail_lines(&snapshot.paths.log, args.tail);
    if !tail.is_empty() {
        println!();
        println!("Log tail ({}):", snapshot.paths.log.display());
        for line in tail {
            println!("  {}", line);
        }
    }

    Ok(exit_code)
}

//! Implementation of the `dx-runner prune` command.
//!
//! Removes artifacts that no longer describe a running job:
//! - terminal jobs whose outcome is older than the threshold
//! - abandoned jobs (no outcome, provider and Monitor both dead) older than the threshold
//! - pid files that are unparseable or name a dead process
//!
//! A job with a live provider or Monitor is never touched.

use super::{Env, check_provider, print_json};
use crate::cli::PruneArgs;
use crate::error::Result;
use crate::events::{self, Event, EventAction};
use crate::exit_codes;
use crate::job::store::remove_if_exists;
use crate::job::{JobSnapshot, PidFile};
use crate::process;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

/// Thresholds beyond a century are clamped.
const MAX_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum PruneReason {
    Terminal,
    Abandoned,
    StalePid,
}

/// One unit of removal.
#[derive(Debug, Clone, Serialize)]
struct PruneCandidate {
    provider: String,
    beads: String,
    reason: PruneReason,
    /// Paths removed (or that would be removed on a dry run).
    paths: Vec<PathBuf>,
}

fn older_than(ts: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    ts.is_none_or(|ts| ts <= cutoff)
}

fn stale_pid(pid: &PidFile) -> bool {
    match pid {
        PidFile::Absent => false,
        PidFile::Invalid(_) => true,
        PidFile::Pid(pid) => !process::is_alive(*pid),
    }
}

/// Decide what, if anything, to remove for one job.
fn plan_job(snapshot: &JobSnapshot, cutoff: DateTime<Utc>) -> Option<PruneCandidate> {
    if snapshot.pid_alive() || snapshot.monitor_alive() {
        return None;
    }

    let candidate = |reason, paths: Vec<PathBuf>| PruneCandidate {
        provider: snapshot.provider.clone(),
        beads: snapshot.beads.clone(),
        reason,
        paths,
    };
    let existing = || {
        snapshot
            .paths
            .all()
            .iter()
            .filter(|p| p.exists())
            .map(|p| p.to_path_buf())
            .collect::<Vec<_>>()
    };

    if let Some(outcome) = &snapshot.outcome {
        if older_than(Some(outcome.completed_at), cutoff) {
            return Some(candidate(PruneReason::Terminal, existing()));
        }
    } else {
        let mtime = snapshot.mtime().map(DateTime::<Utc>::from);
        let last_touched = snapshot.updated_at().max(mtime);
        if older_than(last_touched, cutoff) {
            return Some(candidate(PruneReason::Abandoned, existing()));
        }
    }

    let stale: Vec<PathBuf> = [
        (&snapshot.pid, &snapshot.paths.pid),
        (&snapshot.monitor_pid, &snapshot.paths.monitor_pid),
    ]
    .into_iter()
    .filter(|(pid, _)| stale_pid(pid))
    .map(|(_, path)| path.clone())
    .collect();
    (!stale.is_empty()).then(|| candidate(PruneReason::StalePid, stale))
}

/// Execute the `dx-runner prune` command.
pub fn cmd_prune(env: &Env, args: PruneArgs) -> Result<i32> {
    if let Some(provider) = args.job.provider.as_deref() {
        check_provider(provider)?;
    }
    let hours = args.older_than_hours.unwrap_or(env.config.prune_after_hours);
    let cutoff = Utc::now() - Duration::hours(hours.min(MAX_HOURS) as i64);
    let store = env.store();

    let mut candidates = Vec::new();
    for (provider, beads) in store.list_jobs(args.job.provider.as_deref())? {
        if args.job.beads.as_deref().is_some_and(|b| b != beads) {
            continue;
        }
        let snapshot = store.snapshot(&provider, &beads)?;
        if let Some(candidate) = plan_job(&snapshot, cutoff) {
            candidates.push(candidate);
        }
    }

    if !args.dry_run {
        for candidate in &mut candidates {
            let mut removed = Vec::new();
            for path in &candidate.paths {
                if remove_if_exists(path)? {
                    removed.push(path.clone());
                }
            }
            candidate.paths = removed;
            tracing::info!(
                provider = %candidate.provider,
                beads = %candidate.beads,
                reason = ?candidate.reason,
                files = candidate.paths.len(),
                "pruned"
            );
        }

        if !candidates.is_empty() {
            events::record(
                &env.ctx,
                Event::new(EventAction::Prune).with_details(json!({
                    "older_than_hours": hours,
                    "jobs": candidates
                        .iter()
                        .map(|c| json!({"provider": c.provider, "beads": c.beads, "reason": c.reason}))
                        .collect::<Vec<_>>(),
                })),
            );
        }
    }

    if env.json {
        print_json(&json!({
            "dry_run": args.dry_run,
            "older_than_hours": hours,
            "pruned": candidates,
        }))?;
        return Ok(exit_codes::SUCCESS);
    }

    if candidates.is_empty() {
        println!("Nothing to prune.");
        return Ok(exit_codes::SUCCESS);
    }

    let verb = if args.dry_run { "Would remove" } else { "Removed" };
    for c in &candidates {
        println!(
            "{} {} file(s) of {} on {} ({:?})",
            verb,
            c.paths.len(),
            c.beads,
            c.provider,
            c.reason
        );
    }
    if args.dry_run {
        println!();
        println!("Dry run; nothing was removed.");
    }

    Ok(exit_codes::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::JobArgs;
    use crate::config::RunnerConfig;
    use crate::context::RunnerContext;
    use crate::job::meta::sample_meta;
    use crate::job::outcome::sample_outcome;
    use crate::job::{JobStore, OutcomeState};
    use tempfile::TempDir;

    fn env(state: &TempDir) -> Env {
        Env {
            ctx: RunnerContext::new(state.path()),
            config: RunnerConfig::default(),
            config_path: None,
            json: true,
        }
    }

    fn prune_args(dry_run: bool, hours: u64) -> PruneArgs {
        PruneArgs {
            job: JobArgs::default(),
            dry_run,
            older_than_hours: Some(hours),
        }
    }

    #[test]
    fn test_prune_removes_terminal_and_keeps_live() {
        let state = TempDir::new().unwrap();
        let env = env(&state);
        let store = JobStore::new(&env.ctx);

        store.write_meta(&sample_meta("gemini", "bd-done")).unwrap();
        store
            .write_outcome(&sample_outcome("gemini", "bd-done", OutcomeState::ExitedOk))
            .unwrap();

        let mut live = sample_meta("gemini", "bd-live");
        live.pid = Some(std::process::id());
        store.write_meta(&live).unwrap();

        assert_eq!(cmd_prune(&env, prune_args(false, 0)).unwrap(), 0);

        assert!(!store.snapshot("gemini", "bd-done").unwrap().exists());
        assert!(store.snapshot("gemini", "bd-live").unwrap().exists());
    }

    #[test]
    fn test_dry_run_removes_nothing() {
        let state = TempDir::new().unwrap();
        let env = env(&state);
        let store = JobStore::new(&env.ctx);

        store.write_meta(&sample_meta("cc-glm", "bd-done")).unwrap();
        store
            .write_outcome(&sample_outcome("cc-glm", "bd-done", OutcomeState::ManualStop))
            .unwrap();

        cmd_prune(&env, prune_args(true, 0)).unwrap();
        assert!(store.snapshot("cc-glm", "bd-done").unwrap().exists());
    }

    #[test]
    fn test_recent_terminal_job_is_kept_but_stale_pid_removed() {
        let state = TempDir::new().unwrap();
        let env = env(&state);
        let store = JobStore::new(&env.ctx);
        let paths = store.paths("opencode", "bd-recent");

        store.write_meta(&sample_meta("opencode", "bd-recent")).unwrap();
        store
            .write_outcome(&sample_outcome("opencode", "bd-recent", OutcomeState::ExitedOk))
            .unwrap();
        std::fs::write(&paths.pid, "not-a-pid\n").unwrap();

        cmd_prune(&env, prune_args(false, 24)).unwrap();

        assert!(paths.outcome.exists());
        assert!(!paths.pid.exists());
    }

    #[test]
    fn test_abandoned_job_is_pruned() {
        let state = TempDir::new().unwrap();
        let env = env(&state);
        let store = JobStore::new(&env.ctx);

        let mut meta = sample_meta("gemini", "bd-abandoned");
        meta.updated_at = Utc::now() - Duration::hours(48);
        meta.started_at = meta.updated_at;
        store.write_meta(&meta).unwrap();

        let snapshot = store.snapshot("gemini", "bd-abandoned").unwrap();
        // The meta file itself was just written, so its mtime keeps it recent.
        assert!(plan_job(&snapshot, Utc::now() - Duration::hours(24)).is_none());

        let candidate = plan_job(&snapshot, Utc::now() + Duration::seconds(5)).unwrap();
        assert_eq!(candidate.reason, PruneReason::Abandoned);
        assert!(candidate.paths.contains(&snapshot.paths.meta));
    }
}

//! The detached Monitor.
//!
//! One Monitor runs per run instance, in its own process group, with stderr
//! pointed at `<beads>.monitor.log`. It polls the job's artifacts until the
//! rc file for its run instance appears or the provider pid disappears, then
//! writes the Outcome. It never holds a handle to the provider process, so
//! it works the same whether or not the Runner that launched it is alive.
//!
//! The Monitor exits without writing anything when its run instance is no
//! longer the job's current one (restart) or an Outcome already exists
//! (stop).

pub mod finalize;

pub use finalize::{Measurements, Verdict, classify_exit, finalize_job, measure};

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::job::store::read_rc;
use crate::job::{Heartbeat, JobStore, Outcome};
use crate::process;
use crate::provider::CapacitySignature;
use chrono::Utc;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Identity of the run being watched.
#[derive(Debug, Clone)]
pub struct MonitorJob {
    pub provider: String,
    pub beads: String,
    pub run_instance: String,
}

/// Poll timings, taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    pub poll: Duration,
    pub heartbeat_interval: Duration,
    pub rc_grace: Duration,
}

impl MonitorTiming {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            poll: config.monitor_poll(),
            heartbeat_interval: config.heartbeat_interval(),
            rc_grace: config.rc_grace(),
        }
    }
}

/// Watch a run until it finishes. Returns the Outcome, or `None` when the
/// run was superseded before finishing.
pub fn run(
    store: &JobStore<'_>,
    job: &MonitorJob,
    timing: MonitorTiming,
    signatures: &[CapacitySignature],
) -> Result<Option<Outcome>> {
    tracing::info!(
        provider = %job.provider,
        beads = %job.beads,
        run_instance = %job.run_instance,
        "monitor started"
    );

    let mut heartbeat = Heartbeat::initial(&job.run_instance, Utc::now());
    store.write_heartbeat(&job.provider, &job.beads, &heartbeat)?;
    let mut next_beat = Instant::now() + timing.heartbeat_interval;

    loop {
        let snapshot = store.snapshot(&job.provider, &job.beads)?;

        let Some(meta) = snapshot
            .meta
            .filter(|m| m.run_instance == job.run_instance)
        else {
            tracing::info!(beads = %job.beads, "run instance superseded; monitor exiting");
            return Ok(None);
        };

        if let Some(outcome) = snapshot.outcome {
            if outcome.run_instance == job.run_instance {
                store.clear_pid_files(&job.provider, &job.beads)?;
            }
            tracing::info!(beads = %job.beads, state = %outcome.state, "outcome already present");
            return Ok(Some(outcome));
        }

        if let Some(rc) = snapshot
            .rc
            .as_ref()
            .filter(|rc| rc.belongs_to(&job.run_instance))
        {
            let outcome = finalize_job(store, &meta, Some(rc.exit_code), Some(&heartbeat), signatures)?;
            return Ok(Some(outcome));
        }

        if !meta.pid.is_some_and(process::is_alive) {
            let exit_code = wait_for_rc(&snapshot.paths.rc, &job.run_instance, timing)?;
            if exit_code.is_none() {
                tracing::warn!(beads = %job.beads, "provider exited without an rc file");
            }
            let outcome = finalize_job(store, &meta, exit_code, Some(&heartbeat), signatures)?;
            return Ok(Some(outcome));
        }

        if Instant::now() >= next_beat {
            let cpu = meta.pid.and_then(process::cpu_time_secs);
            heartbeat.observe(Utc::now(), cpu, snapshot.log_bytes);
            store.write_heartbeat(&job.provider, &job.beads, &heartbeat)?;
            tracing::debug!(
                beads = %job.beads,
                count = heartbeat.count,
                kind = heartbeat.last_type.as_str(),
                "heartbeat"
            );
            next_beat = Instant::now() + timing.heartbeat_interval;
        }

        thread::sleep(timing.poll);
    }
}

/// The pid is gone; give the wrapper's rename a moment to land.
fn wait_for_rc(rc: &Path, run_instance: &str, timing: MonitorTiming) -> Result<Option<i32>> {
    let deadline = Instant::now() + timing.rc_grace;
    loop {
        if let Some(record) = read_rc(rc)?
            && record.belongs_to(run_instance)
        {
            return Ok(Some(record.exit_code));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(timing.poll.min(Duration::from_millis(100)));
    }
}

//! Command implementations for dx-runner.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command receives an explicit [`Env`] (state
//! directory, configuration, output mode) and returns the process exit code
//! for non-error outcomes; errors are mapped to exit codes in `main`.

mod finalize;
mod gates;
mod inspect;
mod launch;
mod preflight;
mod prune;
mod stop;

use crate::cli::{Cli, Command, GlobalArgs, JobArgs};
use crate::config::RunnerConfig;
use crate::context::RunnerContext;
use crate::error::{RunnerError, Result};
use crate::job::{JobStore, validate_beads_id};
use crate::provider;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resolved state directory, configuration and output mode.
#[derive(Debug, Clone)]
pub struct Env {
    pub ctx: RunnerContext,
    pub config: RunnerConfig,
    /// Path of an explicit `--config`, forwarded to the Monitor.
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl Env {
    pub fn from_global(global: &GlobalArgs) -> Result<Self> {
        let ctx = RunnerContext::resolve(global.state_dir.as_deref())?;
        let config_path = global.config.as_deref().map(absolute).transpose()?;
        let config = RunnerConfig::load_or_default(config_path.as_deref(), &ctx.config_path())?;
        Ok(Self {
            ctx,
            config,
            config_path,
            json: global.json,
        })
    }

    pub fn store(&self) -> JobStore<'_> {
        JobStore::new(&self.ctx)
    }
}

/// Dispatch a command to its implementation.
///
/// Returns the exit code for commands whose answer is itself a status
/// (`check`, gates, `probe`).
pub fn dispatch(cli: Cli) -> Result<i32> {
    let env = Env::from_global(&cli.global)?;

    match cli.command {
        Command::Start(args) => launch::cmd_start(&env, args),
        Command::Restart(args) => launch::cmd_restart(&env, args),
        Command::Stop(args) => stop::cmd_stop(&env, args),
        Command::Check(args) => inspect::cmd_check(&env, args),
        Command::Status(args) => inspect::cmd_status(&env, args),
        Command::Report(args) => inspect::cmd_report(&env, args),
        Command::Prune(args) => prune::cmd_prune(&env, args),
        Command::Preflight(args) => preflight::cmd_preflight(&env, args),
        Command::Probe(args) => preflight::cmd_probe(&env, args),
        Command::Profiles(_) => preflight::cmd_profiles(&env),
        Command::Finalize(args) => finalize::cmd_finalize(&env, args),
        Command::BaselineGate(args) => gates::cmd_baseline_gate(&env, args),
        Command::FeatureKeyGate(args) => gates::cmd_feature_key_gate(&env, args),
        Command::ScopeGate(args) => gates::cmd_scope_gate(&env, args),
        Command::EvidenceGate(args) => gates::cmd_evidence_gate(&env, args),
        Command::BeadsGate(args) => gates::cmd_beads_gate(&env, args),
        Command::Monitor(args) => finalize::cmd_monitor(&env, args),
    }
}

/// The validated `--beads` value.
pub(crate) fn require_beads(job: &JobArgs) -> Result<&str> {
    let beads = job
        .beads
        .as_deref()
        .ok_or_else(|| RunnerError::UserError("--beads is required".to_string()))?;
    validate_beads_id(beads)?;
    Ok(beads)
}

/// The validated `--provider` value, or `fallback`.
pub(crate) fn require_provider<'a>(job: &'a JobArgs, fallback: Option<&'a str>) -> Result<&'a str> {
    let provider = job
        .provider
        .as_deref()
        .or(fallback)
        .ok_or_else(|| RunnerError::UserError("--provider is required".to_string()))?;
    check_provider(provider)?;
    Ok(provider)
}

pub(crate) fn check_provider(provider: &str) -> Result<()> {
    if provider::is_registered(provider) {
        Ok(())
    } else {
        Err(RunnerError::UserError(format!(
            "unknown provider '{}' (known: {})",
            provider,
            provider::PROVIDERS.join(", ")
        )))
    }
}

/// Which provider a job query refers to, or `None` when no instance exists.
pub(crate) fn resolve_job(env: &Env, job: &JobArgs) -> Result<(String, Option<String>)> {
    let beads = require_beads(job)?.to_string();
    if let Some(provider) = job.provider.as_deref() {
        check_provider(provider)?;
    }
    let provider = env
        .store()
        .resolve_provider(&beads, job.provider.as_deref())?;
    Ok((beads, provider))
}

/// `--worktree`, or the current directory.
pub(crate) fn worktree_or_cwd(job: &JobArgs) -> Result<PathBuf> {
    match job.worktree.as_deref() {
        Some(path) => absolute(path),
        None => current_dir(),
    }
}

pub(crate) fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|e| {
        RunnerError::UserError(format!("failed to determine current directory: {}", e))
    })
}

/// Make `path` absolute against the current directory without resolving links.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(current_dir()?.join(path))
    }
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| RunnerError::UserError(format!("failed to serialize output: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

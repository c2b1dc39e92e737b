//! CLI argument parsing for dx-runner.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Environment variable holding an ambient model override.
pub const MODEL_OVERRIDE_ENV: &str = "DX_RUNNER_MODEL";

/// dx-runner: supervise unattended coding-agent runs.
///
/// Jobs are dispatched to a provider CLI as detached processes, watched by a
/// detached Monitor, and classified from the artifacts they leave under the
/// state directory.
#[derive(Parser, Debug)]
#[command(name = "dx-runner")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// State directory (default: $TMPDIR/dx-runner).
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Configuration file (default: <state-dir>/config.yaml when present).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Job selection flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Issue-tracker id of the job (e.g. bd-xga8.6.2).
    #[arg(long)]
    pub beads: Option<String>,

    /// Provider name (cc-glm, opencode, gemini).
    #[arg(long)]
    pub provider: Option<String>,

    /// Worktree the provider runs in.
    #[arg(long)]
    pub worktree: Option<PathBuf>,

    /// File fed to the provider on stdin.
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Requested model id.
    #[arg(long)]
    pub model: Option<String>,
}

/// Available commands for dx-runner.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Dispatch a job: gates, preflight, model resolution, detached launch.
    Start(StartArgs),

    /// Stop a job and record a manual_stop outcome.
    Stop(StopArgs),

    /// Stop (if live) and relaunch a job under a fresh run instance.
    Restart(StartArgs),

    /// Classify one job; the exit code reflects its health.
    Check(CheckArgs),

    /// List jobs and their health.
    Status(CheckArgs),

    /// Full record of one job: metadata, heartbeat, outcome, log tail.
    Report(ReportArgs),

    /// Remove artifacts of terminal or abandoned jobs.
    Prune(PruneArgs),

    /// Run adapter preflight for a provider.
    Preflight(CheckArgs),

    /// Check whether a model resolves exactly for a provider.
    Probe(CheckArgs),

    /// List configured dispatch profiles.
    Profiles(CheckArgs),

    /// Write the outcome of a job whose Monitor is gone.
    Finalize(CheckArgs),

    /// Check that the worktree HEAD contains a required commit.
    BaselineGate(BaselineGateArgs),

    /// Check that every commit in a range carries the Feature-Key trailer.
    FeatureKeyGate(FeatureKeyGateArgs),

    /// Check that changed paths stay inside an allowlist.
    ScopeGate(ScopeGateArgs),

    /// Cross-check signoff claims against the job's outcome.
    EvidenceGate(EvidenceGateArgs),

    /// Check that the issue tracker repository and CLI are reachable.
    BeadsGate(BeadsGateArgs),

    /// Monitor entry point (spawned by `start`).
    #[command(name = "__monitor", hide = true)]
    Monitor(MonitorArgs),
}

impl Command {
    pub fn is_monitor(&self) -> bool {
        matches!(self, Command::Monitor(_))
    }
}

/// Arguments for `start` and `restart`.
#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Dispatch profile supplying provider, model, preflight mode and gates.
    #[arg(long)]
    pub profile: Option<String>,

    /// Preflight strictness (strict, lenient, skip).
    #[arg(long, value_name = "MODE")]
    pub preflight: Option<String>,

    /// Extra gates to require (beads, baseline, auth, commit-required).
    #[arg(long = "require", value_delimiter = ',', value_name = "GATE")]
    pub require: Vec<String>,

    /// Required baseline SHA for the baseline gate.
    #[arg(long, value_name = "SHA")]
    pub baseline: Option<String>,

    /// Honour the DX_RUNNER_MODEL environment override.
    #[arg(long)]
    pub allow_model_override: bool,

    /// Ambient model override, captured from the environment.
    #[arg(skip)]
    pub env_model: Option<String>,
}

/// Arguments for `stop`.
#[derive(Args, Debug, Clone, Default)]
pub struct StopArgs {
    #[command(flatten)]
    pub job: JobArgs,
}

/// Arguments for the read-only and provider-level commands.
#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    #[command(flatten)]
    pub job: JobArgs,
}

/// Arguments for `report`.
#[derive(Args, Debug, Clone, Default)]
pub struct ReportArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Number of log lines shown in text mode.
    #[arg(long, default_value_t = 20)]
    pub tail: usize,
}

/// Arguments for `prune`.
#[derive(Args, Debug, Clone, Default)]
pub struct PruneArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Show what would be removed without removing it.
    #[arg(long)]
    pub dry_run: bool,

    /// Age threshold (default: prune_after_hours from config).
    #[arg(long, value_name = "HOURS")]
    pub older_than_hours: Option<u64>,
}

/// Arguments for `baseline-gate`.
#[derive(Args, Debug, Clone, Default)]
pub struct BaselineGateArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Commit the worktree HEAD must contain.
    #[arg(long, value_name = "SHA")]
    pub required_sha: String,
}

/// Arguments for `feature-key-gate`.
#[derive(Args, Debug, Clone, Default)]
pub struct FeatureKeyGateArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Feature key to require (default: the beads id).
    #[arg(long)]
    pub feature_key: Option<String>,

    /// Range start (exclusive).
    #[arg(long)]
    pub base: String,

    /// Range end.
    #[arg(long, default_value = "HEAD")]
    pub head: String,
}

/// Arguments for `scope-gate`.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeGateArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Commit the changes are measured from.
    #[arg(long)]
    pub base: String,

    /// Allowed path prefixes or globs.
    #[arg(long, value_delimiter = ',')]
    pub allow: Vec<String>,

    /// Forbidden path prefixes or globs.
    #[arg(long, value_delimiter = ',')]
    pub deny: Vec<String>,
}

/// Arguments for `evidence-gate`.
#[derive(Args, Debug, Clone, Default)]
pub struct EvidenceGateArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Signoff document containing `- [x]` claims.
    #[arg(long)]
    pub signoff: Option<PathBuf>,
}

/// Arguments for `beads-gate`.
#[derive(Args, Debug, Clone, Default)]
pub struct BeadsGateArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Issue tracker repository (default: beads_repo from config).
    #[arg(long)]
    pub beads_repo: Option<PathBuf>,
}

/// Arguments for the hidden Monitor entry point.
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    #[arg(long)]
    pub provider: String,

    #[arg(long)]
    pub beads: String,

    #[arg(long)]
    pub run_instance: String,
}

impl Cli {
    /// Parse command line arguments and capture the ambient model override.
    pub fn parse_args() -> Self {
        let mut cli = Cli::parse();
        let ambient = std::env::var(MODEL_OVERRIDE_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty());
        if let Command::Start(args) | Command::Restart(args) = &mut cli.command {
            args.env_model = ambient;
        }
        cli
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start_with_job_flags() {
        let cli = Cli::try_parse_from([
            "dx-runner",
            "start",
            "--beads",
            "bd-xga8.6.2",
            "--provider",
            "opencode",
            "--worktree",
            "/tmp/wt",
            "--prompt-file",
            "/tmp/p.md",
            "--model",
            "zhipuai-coding-plan/glm-5",
            "--require",
            "beads,commit-required",
            "--json",
        ])
        .unwrap();

        assert!(cli.global.json);
        match cli.command {
            Command::Start(args) => {
                assert_eq!(args.job.beads.as_deref(), Some("bd-xga8.6.2"));
                assert_eq!(args.job.provider.as_deref(), Some("opencode"));
                assert_eq!(args.job.worktree, Some(PathBuf::from("/tmp/wt")));
                assert_eq!(args.require, vec!["beads", "commit-required"]);
                assert!(!args.allow_model_override);
                assert_eq!(args.env_model, None);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dx-runner",
            "check",
            "--beads",
            "bd-1",
            "--state-dir",
            "/tmp/state",
        ])
        .unwrap();
        assert_eq!(cli.global.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn test_gate_commands_parse() {
        let cli = Cli::try_parse_from([
            "dx-runner",
            "scope-gate",
            "--worktree",
            ".",
            "--base",
            "abc",
            "--allow",
            "src/,docs/*.md",
        ])
        .unwrap();
        match cli.command {
            Command::ScopeGate(args) => assert_eq!(args.allow, vec!["src/", "docs/*.md"]),
            _ => panic!("Expected ScopeGate command"),
        }

        let cli = Cli::try_parse_from(["dx-runner", "beads-gate", "--beads", "bd-1"]).unwrap();
        assert!(matches!(cli.command, Command::BeadsGate(_)));
    }

    #[test]
    fn test_hidden_monitor_command() {
        let cli = Cli::try_parse_from([
            "dx-runner",
            "__monitor",
            "--provider",
            "gemini",
            "--beads",
            "bd-1",
            "--run-instance",
            "r1",
        ])
        .unwrap();
        assert!(cli.command.is_monitor());
    }

    #[test]
    fn test_prune_flags() {
        let cli = Cli::try_parse_from([
            "dx-runner",
            "prune",
            "--dry-run",
            "--older-than-hours",
            "0",
        ])
        .unwrap();
        match cli.command {
            Command::Prune(args) => {
                assert!(args.dry_run);
                assert_eq!(args.older_than_hours, Some(0));
            }
            _ => panic!("Expected Prune command"),
        }
    }
}

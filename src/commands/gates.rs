//! Standalone gate commands.
//!
//! Each command runs one gate, prints its [`GateResult`] and exits with the
//! gate's code: 0 on pass, otherwise the code paired with its reason.

use super::{Env, absolute, print_json, resolve_job, worktree_or_cwd};
use crate::cli::{
    BaselineGateArgs, BeadsGateArgs, EvidenceGateArgs, FeatureKeyGateArgs, ScopeGateArgs,
};
use crate::error::{RunnerError, Result};
use crate::gates::GateResult;
use crate::gates::baseline::check_baseline;
use crate::gates::beads::check_beads;
use crate::gates::evidence::{ClaimCheck, EvidenceFacts, check_evidence};
use crate::gates::feature_key::check_feature_key;
use crate::gates::scope::{ScopeRules, check_scope};
use crate::git;
use serde_json::json;

fn report(env: &Env, result: &GateResult) -> Result<i32> {
    let exit_code = result.exit_code();
    if env.json {
        print_json(&json!({
            "gate": result.gate,
            "passed": result.passed,
            "reason_code": result.reason_code,
            "details": result.details,
            "identifiers": result.identifiers,
            "exit_code": exit_code,
        }))?;
    } else {
        print_text(result);
    }
    Ok(exit_code)
}

fn print_text(result: &GateResult) {
    println!(
        "{} gate: {} ({})",
        result.gate,
        if result.passed { "PASS" } else { "FAIL" },
        result.reason_code
    );
    if !result.details.is_empty() {
        println!("  {}", result.details);
    }
}

/// Execute the `dx-runner baseline-gate` command.
pub fn cmd_baseline_gate(env: &Env, args: BaselineGateArgs) -> Result<i32> {
    let worktree = worktree_or_cwd(&args.job)?;
    let result = check_baseline(&worktree, &args.required_sha)?;
    report(env, &result)
}

/// Execute the `dx-runner feature-key-gate` command.
pub fn cmd_feature_key_gate(env: &Env, args: FeatureKeyGateArgs) -> Result<i32> {
    let key = args
        .feature_key
        .as_deref()
        .or(args.job.beads.as_deref())
        .ok_or_else(|| {
            RunnerError::UserError("--feature-key or --beads is required".to_string())
        })?;
    let worktree = worktree_or_cwd(&args.job)?;
    let result = check_feature_key(&worktree, key, &args.base, &args.head)?;
    report(env, &result)
}

/// Execute the `dx-runner scope-gate` command.
pub fn cmd_scope_gate(env: &Env, args: ScopeGateArgs) -> Result<i32> {
    let worktree = worktree_or_cwd(&args.job)?;
    let rules = ScopeRules {
        allow: args.allow,
        deny: args.deny,
    };
    let result = check_scope(&worktree, &args.base, &rules)?;
    report(env, &result)
}

/// Execute the `dx-runner evidence-gate` command.
///
/// Claims come from `--signoff`; the evidence is the job's Outcome plus
/// whether HEAD moved past the commit the job was launched on.
pub fn cmd_evidence_gate(env: &Env, args: EvidenceGateArgs) -> Result<i32> {
    let (beads, provider) = resolve_job(env, &args.job)?;
    let snapshot = provider
        .map(|p| env.store().snapshot(&p, &beads))
        .transpose()?;

    let signoff = args
        .signoff
        .as_deref()
        .map(|path| {
            std::fs::read_to_string(path).map_err(|e| {
                RunnerError::UserError(format!(
                    "failed to read signoff '{}': {}",
                    path.display(),
                    e
                ))
            })
        })
        .transpose()?;

    let new_commit = snapshot
        .as_ref()
        .and_then(|s| s.meta.as_ref())
        .and_then(|meta| {
            let start = meta.start_sha.as_deref()?;
            let head = git::head_sha(&meta.worktree).ok()?;
            Some(head != start)
        });

    let (result, claims) = check_evidence(
        signoff.as_deref(),
        snapshot.as_ref().and_then(|s| s.outcome.as_ref()),
        &EvidenceFacts { new_commit },
    );

    let exit_code = result.exit_code();
    if env.json {
        print_json(&json!({
            "gate": result.gate,
            "passed": result.passed,
            "reason_code": result.reason_code,
            "details": result.details,
            "claims": claims,
            "exit_code": exit_code,
        }))?;
        return Ok(exit_code);
    }

    print_text(&result);
    for ClaimCheck {
        claim,
        supported,
        reason,
    } in &claims
    {
        println!(
            "  [{}] {} ({})",
            if *supported { "ok" } else { "!!" },
            claim,
            reason
        );
    }
    Ok(exit_code)
}

/// Execute the `dx-runner beads-gate` command.
pub fn cmd_beads_gate(env: &Env, args: BeadsGateArgs) -> Result<i32> {
    let repo = match args.beads_repo.as_deref() {
        Some(path) => absolute(path)?,
        None => env.config.beads_repo.clone(),
    };
    let result = check_beads(&repo, &env.config.beads_cli, args.job.beads.as_deref());
    report(env, &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::JobArgs;
    use crate::config::RunnerConfig;
    use crate::context::RunnerContext;
    use crate::exit_codes;
    use crate::job::meta::sample_meta;
    use crate::job::outcome::sample_outcome;
    use crate::job::{JobStore, OutcomeState};
    use crate::test_support::{commit_file, create_test_repo};
    use tempfile::TempDir;

    fn env(state: &TempDir) -> Env {
        Env {
            ctx: RunnerContext::new(state.path()),
            config: RunnerConfig::default(),
            config_path: None,
            json: true,
        }
    }

    fn job(beads: Option<&str>, worktree: Option<&std::path::Path>) -> JobArgs {
        JobArgs {
            beads: beads.map(str::to_string),
            worktree: worktree.map(|p| p.to_path_buf()),
            ..JobArgs::default()
        }
    }

    #[test]
    fn test_beads_gate_missing_repo() {
        let state = TempDir::new().unwrap();
        let args = BeadsGateArgs {
            job: job(Some("bd-1"), None),
            beads_repo: Some(state.path().join("no-such-repo")),
        };
        assert_eq!(
            cmd_beads_gate(&env(&state), args).unwrap(),
            exit_codes::BEADS_REPO_MISSING
        );
    }

    #[test]
    fn test_feature_key_gate_defaults_to_beads() {
        let state = TempDir::new().unwrap();
        let repo = create_test_repo();
        let base = git::head_sha(repo.path()).unwrap();
        commit_file(
            repo.path(),
            "src/lib.rs",
            "// x\n",
            "Add lib\n\nFeature-Key: bd-xga8.6.2",
        );

        let ok = FeatureKeyGateArgs {
            job: job(Some("bd-xga8.6.2"), Some(repo.path())),
            feature_key: None,
            base: base.clone(),
            head: "HEAD".to_string(),
        };
        assert_eq!(cmd_feature_key_gate(&env(&state), ok).unwrap(), 0);

        let bad = FeatureKeyGateArgs {
            job: job(Some("xga8.6.2"), Some(repo.path())),
            feature_key: None,
            base,
            head: "HEAD".to_string(),
        };
        assert_ne!(cmd_feature_key_gate(&env(&state), bad).unwrap(), 0);
    }

    #[test]
    fn test_scope_gate_flags_out_of_scope() {
        let state = TempDir::new().unwrap();
        let repo = create_test_repo();
        let base = git::head_sha(repo.path()).unwrap();
        commit_file(repo.path(), "secrets/key.txt", "k\n", "oops");

        let args = ScopeGateArgs {
            job: job(None, Some(repo.path())),
            base,
            allow: vec!["src/".to_string()],
            deny: Vec::new(),
        };
        assert_eq!(
            cmd_scope_gate(&env(&state), args).unwrap(),
            exit_codes::GATE_FAILURE
        );
    }

    #[test]
    fn test_evidence_gate_checks_claims_against_outcome() {
        let state = TempDir::new().unwrap();
        let env = env(&state);
        let store = JobStore::new(&env.ctx);
        store.write_meta(&sample_meta("gemini", "bd-ev")).unwrap();
        store
            .write_outcome(&sample_outcome("gemini", "bd-ev", OutcomeState::ExitedOk))
            .unwrap();

        let signoff = state.path().join("signoff.md");
        std::fs::write(&signoff, "- [x] task complete\n").unwrap();
        let args = EvidenceGateArgs {
            job: job(Some("bd-ev"), None),
            signoff: Some(signoff),
        };
        assert_eq!(cmd_evidence_gate(&env, args).unwrap(), 0);

        let no_job = EvidenceGateArgs {
            job: job(Some("bd-none"), None),
            signoff: None,
        };
        assert_ne!(cmd_evidence_gate(&env, no_job).unwrap(), 0);
    }
}

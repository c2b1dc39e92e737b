//! Issue-tracker reachability gate.
//!
//! The repository path is checked before the CLI, so a missing repository is
//! always reported as such even on hosts without the CLI installed.

use super::GateResult;
use super::feature_key::is_valid_feature_key;
use std::path::Path;
use std::process::{Command, Stdio};

const GATE: &str = "beads";

/// Sentinel for an id that could not be established.
pub const BEADS_MISSING: &str = "unavailable:beads_missing";
/// Sentinel for a field the tracker could not supply.
pub const FIELD_MISSING: &str = "unavailable:field_missing";

/// Check that the tracker repository exists and its CLI answers.
pub fn check_beads(repo: &Path, cli: &str, beads: Option<&str>) -> GateResult {
    if !repo.is_dir() {
        return GateResult::fail(
            GATE,
            "beads_repo_missing",
            format!(
                "issue tracker repository '{}' does not exist; clone it or set beads_repo",
                repo.display()
            ),
        )
        .with_identifier("beads_id", BEADS_MISSING)
        .with_identifier("feature_key", FIELD_MISSING);
    }

    let probe = Command::new(cli)
        .arg("--version")
        .current_dir(repo)
        .stdin(Stdio::null())
        .output();

    let version = match probe {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(output) => {
            return GateResult::fail(
                GATE,
                "beads_cli_missing",
                format!(
                    "'{} --version' failed (exit code {})",
                    cli,
                    output.status.code().unwrap_or(-1)
                ),
            )
            .with_identifier("beads_id", BEADS_MISSING)
            .with_identifier("feature_key", FIELD_MISSING);
        }
        Err(e) => {
            return GateResult::fail(
                GATE,
                "beads_cli_missing",
                format!("issue tracker CLI '{}' not runnable: {}", cli, e),
            )
            .with_identifier("beads_id", BEADS_MISSING)
            .with_identifier("feature_key", FIELD_MISSING);
        }
    };

    let beads_id = beads.unwrap_or(BEADS_MISSING);
    let feature_key = beads
        .filter(|id| is_valid_feature_key(id))
        .unwrap_or(FIELD_MISSING);

    GateResult::pass(
        GATE,
        "beads_ok",
        format!("{} reachable at {} ({})", cli, repo.display(), version),
    )
    .with_identifier("beads_id", beads_id)
    .with_identifier("feature_key", feature_key)
}

//! Baseline gate: the worktree must already contain a required commit.

use super::{GateResult, short_sha};
use crate::error::Result;
use crate::git;
use std::path::Path;

const GATE: &str = "baseline";

/// Check that `required` is an ancestor of (or equal to) the worktree's HEAD.
pub fn check_baseline(worktree: &Path, required: &str) -> Result<GateResult> {
    let required_sha = match git::rev_parse(worktree, required) {
        Ok(sha) => sha,
        Err(_) => {
            return Ok(GateResult::fail(
                GATE,
                "baseline_unknown_sha",
                format!(
                    "required baseline '{}' is not known in {}; fetch it first",
                    required,
                    worktree.display()
                ),
            )
            .with_identifier("required_sha", required));
        }
    };

    let head = git::head_sha(worktree)?;

    if git::is_ancestor(worktree, &required_sha, &head)? {
        return Ok(GateResult::pass(
            GATE,
            "baseline_ok",
            format!(
                "HEAD {} contains {}",
                short_sha(&head),
                short_sha(&required_sha)
            ),
        )
        .with_identifier("head_sha", head)
        .with_identifier("required_sha", required_sha));
    }

    let behind = git::commit_count(worktree, &head, &required_sha)?;
    Ok(GateResult::fail(
        GATE,
        "baseline_behind",
        format!(
            "HEAD {} is {} commit(s) behind required baseline {}; rebase onto it",
            short_sha(&head),
            behind,
            short_sha(&required_sha)
        ),
    )
    .with_identifier("commits_behind", behind.to_string())
    .with_identifier("head_sha", head)
    .with_identifier("required_sha", required_sha))
}

//! Commit-required contract: a successful run must leave a new commit.

use super::{GateResult, short_sha};
use crate::error::Result;
use crate::git;
use std::path::Path;

pub const GATE: &str = "commit_required";

/// Check that the worktree's HEAD has moved past `start_sha`.
pub fn check_commit_required(worktree: &Path, start_sha: Option<&str>) -> Result<GateResult> {
    let Some(start_sha) = start_sha else {
        return Ok(GateResult::fail(
            GATE,
            "no_commit_artifact",
            "launch commit unknown; worktree is not a git repository",
        ));
    };

    let head = git::head_sha(worktree)?;
    if head == start_sha {
        return Ok(GateResult::fail(
            GATE,
            "no_commit_artifact",
            format!("HEAD is still {}; no new commit was made", short_sha(&head)),
        )
        .with_identifier("head_sha", head));
    }

    let count = git::commit_count(worktree, start_sha, &head).unwrap_or(0);
    Ok(GateResult::pass(
        GATE,
        "commit_present",
        format!(
            "{} new commit(s) since {}",
            count,
            short_sha(start_sha)
        ),
    )
    .with_identifier("head_sha", head))
}

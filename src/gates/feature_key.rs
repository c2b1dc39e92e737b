//! Feature-key gate: every commit in a range carries the work-item trailer.
//!
//! The key format is checked before any git access, so a malformed key fails
//! the same way whether the range holds zero commits or fifty.

use super::GateResult;
use crate::error::Result;
use crate::git;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

const GATE: &str = "feature_key";

/// `bd-<alnum>` with up to two numeric dotted suffixes (`bd-xga8.6.2`).
static FEATURE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bd-[a-z0-9]+(\.\d+){0,2}$").expect("valid feature key regex")
});

pub fn is_valid_feature_key(key: &str) -> bool {
    FEATURE_KEY_RE.is_match(key)
}

/// Whether `message` carries a `Feature-Key: <key>` trailer line.
fn has_trailer(message: &str, key: &str) -> bool {
    message.lines().any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("feature-key") && value.trim() == key
        })
    })
}

/// Check the commits in `base..head` for `key`.
pub fn check_feature_key(worktree: &Path, key: &str, base: &str, head: &str) -> Result<GateResult> {
    if !is_valid_feature_key(key) {
        return Ok(GateResult::fail(
            GATE,
            "invalid_feature_key_format",
            format!("'{}' is not a valid feature key (expected bd-xxxx[.n[.n]])", key),
        )
        .with_identifier("feature_key", key));
    }

    let commits = git::commit_messages(worktree, base, head)?;
    if commits.is_empty() {
        return Ok(GateResult::pass(
            GATE,
            "no_commits_in_range",
            format!("no commits in {}..{}", base, head),
        )
        .with_identifier("feature_key", key));
    }

    let missing: Vec<&str> = commits
        .iter()
        .filter(|c| !has_trailer(&c.message, key))
        .map(|c| super::short_sha(&c.sha))
        .collect();

    if missing.is_empty() {
        Ok(GateResult::pass(
            GATE,
            "feature_key_ok",
            format!("{} commit(s) tagged Feature-Key: {}", commits.len(), key),
        )
        .with_identifier("feature_key", key)
        .with_identifier("commits", commits.len().to_string()))
    } else {
        Ok(GateResult::fail(
            GATE,
            "missing_feature_key",
            format!(
                "{} of {} commit(s) lack 'Feature-Key: {}': {}",
                missing.len(),
                commits.len(),
                key,
                missing.join(", ")
            ),
        )
        .with_identifier("feature_key", key)
        .with_identifier("commits", commits.len().to_string()))
    }
}

//! Scope gate: changes must stay inside allow-listed paths.
//!
//! - A changed path matching a `deny` glob fails, even if it is also allowed.
//! - Every other changed path must sit under an allowed prefix or match an
//!   allowed glob.
//!
//! Changes are measured against the baseline and include uncommitted and
//! untracked files, so a provider cannot slip an edit past the gate by not
//! committing it.

use super::GateResult;
use crate::error::{RunnerError, Result};
use crate::git::{self, normalize_path};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

const GATE: &str = "scope";

/// Allow- and deny-lists for a scope check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeRules {
    /// Path prefixes (`src/`, `docs/guide.md`) or globs (`tests/**/*.rs`).
    pub allow: Vec<String>,
    /// Globs that are always out of bounds.
    pub deny: Vec<String>,
}

/// Type of scope violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeViolationType {
    /// Path matches a `deny` glob.
    Forbidden,
    /// Path is not under any allowed prefix or glob.
    OutOfScope,
}

/// A single scope violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeViolation {
    /// Repo-relative path with forward slashes.
    pub file_path: String,
    pub violation_type: ScopeViolationType,
    /// The deny glob that matched (for Forbidden violations).
    pub matched_pattern: Option<String>,
}

impl ScopeViolation {
    pub fn forbidden(file_path: impl Into<String>, matched_pattern: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            violation_type: ScopeViolationType::Forbidden,
            matched_pattern: Some(matched_pattern.into()),
        }
    }

    pub fn out_of_scope(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            violation_type: ScopeViolationType::OutOfScope,
            matched_pattern: None,
        }
    }

    fn describe(&self) -> String {
        match &self.violation_type {
            ScopeViolationType::Forbidden => format!(
                "{} (matches deny: {})",
                self.file_path,
                self.matched_pattern.as_deref().unwrap_or("<unknown>")
            ),
            ScopeViolationType::OutOfScope => format!("{} (not allow-listed)", self.file_path),
        }
    }
}

/// Result of scope validation.
#[derive(Debug, Clone)]
pub struct ScopeValidationResult {
    pub passed: bool,
    pub violations: Vec<ScopeViolation>,
}

impl ScopeValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    pub fn fail(violations: Vec<ScopeViolation>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }
}

/// Validate that `changed_files` are within `rules`.
///
/// # Arguments
///
/// * `rules` - Allow- and deny-lists
/// * `changed_files` - Changed paths (repo-relative, forward slashes)
///
/// # Returns
///
/// * `Ok(ScopeValidationResult)` - Pass/fail with violations
/// * `Err(RunnerError)` - If a glob pattern is invalid
pub fn validate_scope(rules: &ScopeRules, changed_files: &[String]) -> Result<ScopeValidationResult> {
    if changed_files.is_empty() {
        return Ok(ScopeValidationResult::pass());
    }

    let forbidden_globs = build_globset(&rules.deny, "deny")?;

    let (glob_patterns, prefixes): (Vec<String>, Vec<String>) = rules
        .allow
        .iter()
        .map(|p| normalize_path(p))
        .partition(|p| is_glob(p));
    let allowed_globs = build_globset(&glob_patterns, "allow")?;

    let mut violations = Vec::new();

    for file in changed_files {
        let normalized_file = normalize_path(file);

        if let Some(pattern) = matches_globset(&forbidden_globs, &normalized_file, &rules.deny) {
            violations.push(ScopeViolation::forbidden(&normalized_file, pattern));
            continue;
        }

        let allowed = allowed_globs.is_match(&normalized_file)
            || prefixes.iter().any(|prefix| is_under_prefix(&normalized_file, prefix));

        if !allowed {
            violations.push(ScopeViolation::out_of_scope(&normalized_file));
        }
    }

    if violations.is_empty() {
        Ok(ScopeValidationResult::pass())
    } else {
        Ok(ScopeValidationResult::fail(violations))
    }
}

/// Diff the worktree against `base` and check the changed paths.
pub fn check_scope(worktree: &Path, base: &str, rules: &ScopeRules) -> Result<GateResult> {
    if rules.allow.is_empty() {
        return Ok(GateResult::fail(
            GATE,
            "scope_allowlist_missing",
            "no allowed paths given; pass at least one --allow prefix",
        ));
    }

    let changed = git::changed_paths_since(worktree, base)?;
    let result = validate_scope(rules, &changed)?;

    if result.passed {
        return Ok(GateResult::pass(
            GATE,
            "scope_ok",
            format!("{} changed path(s) within scope", changed.len()),
        )
        .with_identifier("changed", changed.len().to_string()));
    }

    let listed: Vec<String> = result.violations.iter().map(ScopeViolation::describe).collect();
    Ok(GateResult::fail(
        GATE,
        "scope_violation",
        format!(
            "{} path(s) outside allowed scope: {}",
            result.violations.len(),
            listed.join(", ")
        ),
    )
    .with_identifier("changed", changed.len().to_string())
    .with_identifier("violations", result.violations.len().to_string()))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Build a GlobSet from a list of glob patterns.
fn build_globset(patterns: &[String], field_name: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let normalized_pattern = normalize_path(pattern);
        let glob = Glob::new(&normalized_pattern).map_err(|e| {
            RunnerError::UserError(format!(
                "invalid glob pattern in {}: '{}' - {}",
                field_name, pattern, e
            ))
        })?;
        builder.add(glob);
    }

    builder
        .build()
        .map_err(|e| RunnerError::UserError(format!("failed to compile {} globs: {}", field_name, e)))
}

/// Check if a file matches any pattern in the globset, returning the matched pattern.
fn matches_globset(globset: &GlobSet, file: &str, patterns: &[String]) -> Option<String> {
    globset
        .matches(file)
        .first()
        .and_then(|&idx| patterns.get(idx).cloned())
}

/// Whether `file` equals `prefix` or lives under it as a directory.
///
/// `src/` and `src` both admit `src/main.rs`; `src` does not admit `srcs/x`.
fn is_under_prefix(file: &str, prefix: &str) -> bool {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return true;
    }
    file == trimmed || file.starts_with(&format!("{}/", trimmed))
}

//! Git command runner for dx-runner.
//!
//! Provides a safe wrapper around git commands with captured stdout/stderr
//! and structured error handling. Gates and the Monitor read worktree state
//! exclusively through this module.

use crate::error::{RunnerError, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Output};

/// Result of a successful git command execution.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Standard output from the command (trimmed).
    pub stdout: String,
    /// Standard error from the command (trimmed).
    pub stderr: String,
}

impl GitOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Returns stdout lines as a vector.
    pub fn lines(&self) -> Vec<&str> {
        if self.stdout.is_empty() {
            Vec::new()
        } else {
            self.stdout.lines().collect()
        }
    }
}

/// A commit and its full message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub sha: String,
    pub message: String,
}

/// Run a git command with the specified working directory.
///
/// # Returns
///
/// * `Ok(GitOutput)` - On successful execution (exit code 0)
/// * `Err(RunnerError::GitError)` - On spawn failure or non-zero exit code
pub fn run_git<P: AsRef<Path>>(cwd: P, args: &[&str]) -> Result<GitOutput> {
    let cwd = cwd.as_ref();

    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .map_err(|e| {
            RunnerError::GitError(format!(
                "failed to execute git {}: {}",
                args.first().unwrap_or(&""),
                e
            ))
        })?;

    let git_output = GitOutput::from_output(&output);

    if output.status.success() {
        Ok(git_output)
    } else {
        let exit_code = output.status.code().unwrap_or(-1);
        let error_msg = if git_output.stderr.is_empty() {
            git_output.stdout.clone()
        } else {
            git_output.stderr.clone()
        };

        Err(RunnerError::GitError(format!(
            "git {} failed (exit code {}): {}",
            args.first().unwrap_or(&""),
            exit_code,
            error_msg
        )))
    }
}

/// Whether `cwd` is inside a git work tree.
pub fn is_git_repo<P: AsRef<Path>>(cwd: P) -> bool {
    let cwd = cwd.as_ref();
    cwd.is_dir()
        && run_git(cwd, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.stdout == "true")
            .unwrap_or(false)
}

/// Resolve a revision to a full commit SHA.
pub fn rev_parse<P: AsRef<Path>>(cwd: P, rev: &str) -> Result<String> {
    let target = format!("{}^{{commit}}", rev);
    let output = run_git(cwd, &["rev-parse", "--verify", "--quiet", &target])?;
    Ok(output.stdout)
}

/// Full SHA of `HEAD`.
pub fn head_sha<P: AsRef<Path>>(cwd: P) -> Result<String> {
    rev_parse(cwd, "HEAD")
}

/// Whether `ancestor` is reachable from `descendant` (equal counts as reachable).
pub fn is_ancestor<P: AsRef<Path>>(cwd: P, ancestor: &str, descendant: &str) -> Result<bool> {
    let cwd = cwd.as_ref();
    let output = Command::new("git")
        .current_dir(cwd)
        .args(["merge-base", "--is-ancestor", ancestor, descendant])
        .output()
        .map_err(|e| RunnerError::GitError(format!("failed to execute git merge-base: {}", e)))?;

    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        code => Err(RunnerError::GitError(format!(
            "git merge-base failed (exit code {}): {}",
            code.unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}

/// Number of commits in `from..to`.
pub fn commit_count<P: AsRef<Path>>(cwd: P, from: &str, to: &str) -> Result<u64> {
    let range = format!("{}..{}", from, to);
    let output = run_git(cwd, &["rev-list", "--count", &range])?;
    output.stdout.parse::<u64>().map_err(|e| {
        RunnerError::GitError(format!(
            "unexpected rev-list output '{}': {}",
            output.stdout, e
        ))
    })
}

/// Commits in `from..to` with their full messages, oldest first.
pub fn commit_messages<P: AsRef<Path>>(cwd: P, from: &str, to: &str) -> Result<Vec<CommitMessage>> {
    let range = format!("{}..{}", from, to);
    // NUL-separated records; the unit separator splits sha from body.
    let output = run_git(
        cwd,
        &["log", "--reverse", "--format=%H%x1f%B%x00", &range],
    )?;

    let commits = output
        .stdout
        .split('\0')
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            let (sha, message) = record.split_once('\x1f')?;
            Some(CommitMessage {
                sha: sha.trim().to_string(),
                message: message.trim().to_string(),
            })
        })
        .filter(|c| !c.sha.is_empty())
        .collect();

    Ok(commits)
}

/// Paths changed in the worktree relative to `base_sha`.
///
/// Includes committed changes since `base_sha`, staged and unstaged edits to
/// tracked files, and untracked files that are not ignored. Paths are
/// repo-relative with forward slashes, sorted and deduplicated.
pub fn changed_paths_since<P: AsRef<Path>>(cwd: P, base_sha: &str) -> Result<Vec<String>> {
    let cwd = cwd.as_ref();
    let mut paths = BTreeSet::new();

    let tracked = run_git(cwd, &["diff", "--name-only", base_sha])?;
    paths.extend(tracked.lines().into_iter().map(normalize_path));

    let untracked = run_git(cwd, &["ls-files", "--others", "--exclude-standard"])?;
    paths.extend(untracked.lines().into_iter().map(normalize_path));

    Ok(paths.into_iter().collect())
}

/// Normalize a file path to use forward slashes.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{commit_file, create_test_repo};
    use tempfile::TempDir;

    #[test]
    fn test_run_git_captures_stdout() {
        let temp_dir = create_test_repo();
        let output = run_git(temp_dir.path(), &["rev-parse", "--show-toplevel"]).unwrap();
        assert!(!output.stdout.is_empty());
    }

    #[test]
    fn test_run_git_failure_returns_git_error() {
        let temp_dir = create_test_repo();
        let result = run_git(temp_dir.path(), &["checkout", "nonexistent-branch"]);
        assert!(matches!(result.unwrap_err(), RunnerError::GitError(_)));
    }

    #[test]
    fn test_is_git_repo() {
        let repo = create_test_repo();
        assert!(is_git_repo(repo.path()));

        let plain = TempDir::new().unwrap();
        assert!(!is_git_repo(plain.path()));
        assert!(!is_git_repo(plain.path().join("missing")));
    }

    #[test]
    fn test_head_sha_is_full_length() {
        let repo = create_test_repo();
        let sha = head_sha(repo.path()).unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn test_rev_parse_unknown_revision_fails() {
        let repo = create_test_repo();
        assert!(rev_parse(repo.path(), "deadbeefdeadbeef").is_err());
    }

    #[test]
    fn test_is_ancestor() {
        let repo = create_test_repo();
        let base = head_sha(repo.path()).unwrap();
        commit_file(repo.path(), "a.txt", "a", "Add a");
        let head = head_sha(repo.path()).unwrap();

        assert!(is_ancestor(repo.path(), &base, &head).unwrap());
        assert!(is_ancestor(repo.path(), &head, &head).unwrap());
        assert!(!is_ancestor(repo.path(), &head, &base).unwrap());
    }

    #[test]
    fn test_commit_count_and_messages() {
        let repo = create_test_repo();
        let base = head_sha(repo.path()).unwrap();
        commit_file(repo.path(), "a.txt", "a", "First\n\nFeature-Key: bd-1");
        commit_file(repo.path(), "b.txt", "b", "Second");

        assert_eq!(commit_count(repo.path(), &base, "HEAD").unwrap(), 2);
        assert_eq!(commit_count(repo.path(), "HEAD", "HEAD").unwrap(), 0);

        let commits = commit_messages(repo.path(), &base, "HEAD").unwrap();
        assert_eq!(commits.len(), 2);
        assert!(commits[0].message.starts_with("First"));
        assert!(commits[0].message.contains("Feature-Key: bd-1"));
        assert_eq!(commits[1].message, "Second");
        assert_eq!(commits[1].sha.len(), 40);
    }

    #[test]
    fn test_commit_messages_empty_range() {
        let repo = create_test_repo();
        let commits = commit_messages(repo.path(), "HEAD", "HEAD").unwrap();
        assert!(commits.is_empty());
    }

    #[test]
    fn test_changed_paths_since_counts_all_kinds_of_change() {
        let repo = create_test_repo();
        let base = head_sha(repo.path()).unwrap();

        commit_file(repo.path(), "src/committed.rs", "x", "Commit");
        std::fs::write(repo.path().join("README.md"), "# Edited\n").unwrap();
        std::fs::write(repo.path().join("untracked.txt"), "new\n").unwrap();

        let changed = changed_paths_since(repo.path(), &base).unwrap();
        assert_eq!(
            changed,
            vec![
                "README.md".to_string(),
                "src/committed.rs".to_string(),
                "untracked.txt".to_string()
            ]
        );
    }

    #[test]
    fn test_changed_paths_since_clean_tree_is_empty() {
        let repo = create_test_repo();
        let base = head_sha(repo.path()).unwrap();
        assert!(changed_paths_since(repo.path(), &base).unwrap().is_empty());
    }

    #[test]
    fn test_git_output_lines() {
        let output = GitOutput {
            stdout: "line1\nline2".to_string(),
            stderr: String::new(),
        };
        assert_eq!(output.lines(), vec!["line1", "line2"]);

        let empty = GitOutput {
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(empty.lines().is_empty());
    }
}

//! Atomic filesystem operations for dx-runner.
//!
//! Job artifacts are read by processes that may be racing the writer (the
//! Runner CLI, the Monitor, a second Runner invocation), so every write must
//! leave either the old content or the new content on disk, never a mix.
//!
//! # Implementation Strategy
//!
//! All atomic writes follow this pattern:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Atomically replace (or, for write-once artifacts, hard-link) the target
//!
//! Temporary names carry a caller-supplied tag (the run instance) plus the
//! writer's pid, so a Monitor still finalizing an old run never shares a temp
//! file with the writer of a new run.

use crate::error::{RunnerError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file, replacing any previous content.
///
/// # Arguments
///
/// * `path` - The target file path
/// * `content` - The bytes to write
/// * `tag` - Disambiguates the temp file name (typically the run instance)
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8], tag: &str) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path, tag)?;
    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        RunnerError::UserError(format!(
            "failed to atomically replace '{}': {}",
            path.display(),
            e
        ))
    })?;

    sync_parent(path);
    Ok(())
}

/// Atomically write a string to a file.
///
/// Convenience wrapper around `atomic_write` for string content.
pub fn atomic_write_file<P: AsRef<Path>>(path: P, content: &str, tag: &str) -> Result<()> {
    atomic_write(path, content.as_bytes(), tag)
}

/// Write a file exactly once.
///
/// The content is staged in a temp file and published with `hard_link`, which
/// fails if the target already exists. Readers therefore see either no file or
/// the complete content, and a second writer can never clobber the first.
///
/// # Returns
///
/// * `Ok(true)` - This call published the file
/// * `Ok(false)` - The file already existed; nothing was written
pub fn write_once<P: AsRef<Path>>(path: P, content: &str, tag: &str) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(false);
    }
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path, tag)?;
    write_and_sync(&temp_path, content.as_bytes())?;

    let published = match fs::hard_link(&temp_path, path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(RunnerError::UserError(format!(
                "failed to publish '{}': {}",
                path.display(),
                e
            )));
        }
    };

    let _ = fs::remove_file(&temp_path);
    if published {
        sync_parent(path);
    }
    Ok(published)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            RunnerError::UserError(format!(
                "failed to create parent directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Generate a temporary file path in the same directory as the target.
fn generate_temp_path(target: &Path, tag: &str) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RunnerError::UserError("invalid file path".to_string()))?;

    let tag: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let temp_name = format!(".{}.{}.{}.tmp", filename, tag, std::process::id());
    Ok(parent.join(temp_name))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        RunnerError::UserError(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        RunnerError::UserError(format!("failed to write to temporary file: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        RunnerError::UserError(format!("failed to sync temporary file to disk: {}", e))
    })?;

    Ok(())
}

fn sync_parent(target: &Path) {
    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        atomic_write(&file_path, b"hello world", "run-1").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_atomic_write_replace_existing() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, "original content").unwrap();

        atomic_write_file(&file_path, "new content", "run-1").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "new content");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("opencode").join("bd-1.meta");

        atomic_write(&file_path, b"beads=bd-1\n", "run-1").unwrap();

        assert!(file_path.exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        atomic_write(&file_path, b"content", "run-1").unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_temp_path_differs_per_run_instance() {
        let target = Path::new("/state/cc-glm/bd-1.outcome");
        let a = generate_temp_path(target, "20260101T000000-1").unwrap();
        let b = generate_temp_path(target, "20260101T000005-2").unwrap();

        assert_ne!(a, b);
        assert_eq!(a.parent().unwrap(), Path::new("/state/cc-glm"));
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with('.'));
        assert!(a.file_name().unwrap().to_str().unwrap().ends_with(".tmp"));
    }

    #[test]
    fn test_temp_path_sanitizes_tag() {
        let target = Path::new("/state/x.rc");
        let temp = generate_temp_path(target, "a/b c").unwrap();
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.contains("a_b_c"));
        assert_eq!(temp.parent().unwrap(), Path::new("/state"));
    }

    #[test]
    fn test_write_once_publishes_first_writer_only() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("bd-1.outcome");

        assert!(write_once(&file_path, "state=manual_stop\n", "run-1").unwrap());
        assert!(!write_once(&file_path, "state=exited_ok\n", "run-1").unwrap());

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "state=manual_stop\n");
    }

    #[test]
    fn test_write_once_concurrent_writers_single_winner() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("bd-2.outcome");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = file_path.clone();
                std::thread::spawn(move || {
                    write_once(&path, &format!("writer={}\n", i), &format!("t{}", i)).unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|published| *published)
            .count();
        assert_eq!(winners, 1);
    }
}

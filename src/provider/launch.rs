//! Detached provider launch with the rc-file convention.
//!
//! The provider argv runs under a small `sh` wrapper in a new process group.
//! When the tool exits, the wrapper writes `exit_code` and `run_instance` to a
//! temp file named after the run instance and renames it onto the job's rc
//! file, so the Monitor sees either no rc file or a complete one.

use crate::error::{RunnerError, Result};
use crate::process;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Shell wrapper: `$1` rc file, `$2` run instance, remaining args the argv.
const RC_WRAPPER: &str = r#"rc_file="$1"; run="$2"; shift 2
"$@"
rc=$?
tmp="$rc_file.$run.tmp"
printf 'exit_code=%s\nrun_instance=%s\n' "$rc" "$run" > "$tmp" && mv -f "$tmp" "$rc_file"
exit "$rc""#;

/// Inputs for one provider launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub beads: &'a str,
    pub run_instance: &'a str,
    pub worktree: &'a Path,
    pub prompt_file: Option<&'a Path>,
    pub model: &'a str,
    pub log: &'a Path,
    pub rc_file: &'a Path,
}

/// What `start` reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    /// Pid of the wrapper, which leads the job's process group.
    pub pid: u32,
    pub launch_mode: String,
    pub rc_file: PathBuf,
}

/// Launch mode recorded in metadata.
pub const LAUNCH_MODE: &str = "detached_pgroup";

/// Spawn `argv` detached with stdout/stderr appended to the job log.
///
/// The prompt file (when given) is connected to stdin; otherwise stdin is
/// null so the tool never blocks on a terminal.
pub fn spawn_with_rc(
    argv: &[String],
    request: &LaunchRequest<'_>,
    environment: &HashMap<String, String>,
) -> Result<Launched> {
    if argv.is_empty() {
        return Err(RunnerError::LaunchFailed(
            "provider command is empty".to_string(),
        ));
    }

    if !request.worktree.is_dir() {
        return Err(RunnerError::LaunchFailed(format!(
            "worktree '{}' is not a directory",
            request.worktree.display()
        )));
    }

    let stdin = match request.prompt_file {
        Some(path) => {
            let file = std::fs::File::open(path).map_err(|e| {
                RunnerError::LaunchFailed(format!(
                    "failed to open prompt file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Stdio::from(file)
        }
        None => Stdio::null(),
    };

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(RC_WRAPPER)
        .arg("dx-runner-job")
        .arg(request.rc_file)
        .arg(request.run_instance)
        .args(argv)
        .current_dir(request.worktree)
        .stdin(stdin)
        .stdout(process::append_stdio(request.log)?)
        .stderr(process::append_stdio(request.log)?)
        .env("DX_RUNNER_BEADS", request.beads)
        .env("DX_RUNNER_RUN_INSTANCE", request.run_instance)
        .env("DX_RUNNER_MODEL_SELECTED", request.model);

    for (key, value) in environment {
        command.env(key, value);
    }

    let pid = process::spawn_detached(command, &argv[0])?;
    tracing::info!(pid, beads = request.beads, program = %argv[0], "provider launched");

    Ok(Launched {
        pid,
        launch_mode: LAUNCH_MODE.to_string(),
        rc_file: request.rc_file.to_path_buf(),
    })
}

/// Split a configured binary string (`"npx opencode"`) into argv words.
pub fn split_binary(binary: &str) -> Result<Vec<String>> {
    let words = shell_words::split(binary).map_err(|e| {
        RunnerError::UserError(format!(
            "failed to parse provider binary '{}': {}\n\
             Fix: check for unmatched quotes or invalid escape sequences.",
            binary, e
        ))
    })?;
    if words.is_empty() {
        return Err(RunnerError::UserError(format!(
            "provider binary is empty after parsing: '{}'",
            binary
        )));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::store::read_rc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_for(path: &Path) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !path.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn request<'a>(dir: &'a Path, log: &'a Path, rc: &'a Path) -> LaunchRequest<'a> {
        LaunchRequest {
            beads: "bd-1",
            run_instance: "run-1",
            worktree: dir,
            prompt_file: None,
            model: "glm-5",
            log,
            rc_file: rc,
        }
    }

    #[test]
    fn test_rc_file_records_exit_code_and_both_streams_are_logged() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("job.log");
        let rc = temp_dir.path().join("job.rc");
        let argv: Vec<String> = ["sh", "-c", "echo out; echo err >&2; exit 7"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let launched =
            spawn_with_rc(&argv, &request(temp_dir.path(), &log, &rc), &HashMap::new()).unwrap();
        assert!(launched.pid > 0);
        assert_eq!(launched.launch_mode, LAUNCH_MODE);

        wait_for(&rc);
        let record = read_rc(&rc).unwrap().unwrap();
        assert_eq!(record.exit_code, 7);
        assert_eq!(record.run_instance.as_deref(), Some("run-1"));

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("out"));
        assert!(content.contains("err"));
    }

    #[test]
    fn test_prompt_file_is_stdin_and_env_is_passed() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("job.log");
        let rc = temp_dir.path().join("job.rc");
        let prompt = temp_dir.path().join("prompt.md");
        std::fs::write(&prompt, "do the thing\n").unwrap();

        let argv: Vec<String> = ["sh", "-c", "cat; echo \"extra=$EXTRA\""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut req = request(temp_dir.path(), &log, &rc);
        req.prompt_file = Some(&prompt);
        let env = HashMap::from([("EXTRA".to_string(), "yes".to_string())]);

        spawn_with_rc(&argv, &req, &env).unwrap();
        wait_for(&rc);

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("do the thing"));
        assert!(content.contains("extra=yes"));
        assert_eq!(read_rc(&rc).unwrap().unwrap().exit_code, 0);
    }

    #[test]
    fn test_missing_worktree_is_launch_failure() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let log = temp_dir.path().join("job.log");
        let rc = temp_dir.path().join("job.rc");
        let argv = vec!["true".to_string()];

        let err = spawn_with_rc(&argv, &request(&missing, &log, &rc), &HashMap::new()).unwrap_err();
        assert!(matches!(err, RunnerError::LaunchFailed(_)));
    }

    #[test]
    fn test_split_binary() {
        assert_eq!(split_binary("npx opencode").unwrap(), vec!["npx", "opencode"]);
        assert!(split_binary("   ").is_err());
        assert!(split_binary("'unterminated").is_err());
    }
}

//! End-to-end lifecycle tests.
//!
//! Drives the compiled binary against mock provider scripts: each test gets
//! its own state directory, a git worktree, and a `config.yaml` pointing the
//! provider at a shell script. The detached Monitor is the real one.

use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    state: TempDir,
    worktree: TempDir,
    bin: TempDir,
}

impl Harness {
    /// A harness whose `gemini` provider runs `gemini_script`.
    ///
    /// `gemini_settings` is extra YAML under `providers.gemini` (four-space
    /// indented), or empty.
    fn new(gemini_script: &str, gemini_settings: &str) -> Self {
        let harness = Self {
            state: TempDir::new().expect("state tempdir"),
            worktree: init_repo(),
            bin: TempDir::new().expect("bin tempdir"),
        };
        let gemini = harness.script("gemini-mock", gemini_script);
        let cc_glm = harness.script("cc-glm-mock", "echo cc-glm ran\necho change > cc.txt");
        let config = [
            "monitor_poll_ms: 50".to_string(),
            "heartbeat_interval_secs: 1".to_string(),
            "rc_grace_ms: 500".to_string(),
            "stop_grace_secs: 2".to_string(),
            "providers:".to_string(),
            "  gemini:".to_string(),
            format!("    binary: {}", gemini.display()),
            gemini_settings.to_string(),
            "  cc-glm:".to_string(),
            format!("    binary: {}", cc_glm.display()),
        ]
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
        std::fs::write(harness.state.path().join("config.yaml"), config + "\n")
            .expect("write config");
        harness
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod script");
        path
    }

    fn run(&self, args: &[&str]) -> (i32, Value) {
        let output = Command::new(env!("CARGO_BIN_EXE_dx-runner"))
            .arg("--state-dir")
            .arg(self.state.path())
            .arg("--json")
            .args(args)
            .current_dir(self.worktree.path())
            .output()
            .expect("run dx-runner");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let json = serde_json::from_str(&stdout).unwrap_or_else(|_| {
            panic!(
                "non-JSON stdout for {:?}: {}\nstderr: {}",
                args,
                stdout,
                String::from_utf8_lossy(&output.stderr)
            )
        });
        (output.status.code().expect("exit code"), json)
    }

    fn start(&self, beads: &str, provider: &str, extra: &[&str]) -> (i32, Value) {
        let worktree = self.worktree.path().to_str().expect("utf-8 path").to_string();
        let mut args = vec![
            "start",
            "--beads",
            beads,
            "--provider",
            provider,
            "--worktree",
            &worktree,
        ];
        args.extend_from_slice(extra);
        self.run(&args)
    }

    fn artifact(&self, provider: &str, beads: &str, suffix: &str) -> PathBuf {
        self.state
            .path()
            .join(provider)
            .join(format!("{}.{}", beads, suffix))
    }

    fn wait_for_outcome(&self, provider: &str, beads: &str) {
        let outcome = self.artifact(provider, beads, "outcome");
        let deadline = Instant::now() + Duration::from_secs(20);
        while !outcome.exists() {
            assert!(
                Instant::now() < deadline,
                "no outcome for {} on {} within 20s",
                beads,
                provider
            );
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn report(&self, beads: &str) -> (i32, Value) {
        self.run(&["report", "--beads", beads])
    }
}

/// Dead or a zombie, within a few seconds.
fn process_gone(pid: u64) -> bool {
    let stat = PathBuf::from(format!("/proc/{}/stat", pid));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let gone = match std::fs::read_to_string(&stat) {
            Err(_) => true,
            Ok(text) => text
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state == "Z" || state == "X"),
        };
        if gone || Instant::now() >= deadline {
            return gone;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {:?} failed", args);
}

fn init_repo() -> TempDir {
    let dir = TempDir::new().expect("worktree tempdir");
    let path = dir.path();
    git(path, &["init"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "commit.gpgsign", "false"]);
    std::fs::write(path.join("README.md"), "# Test\n").expect("write readme");
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "Initial commit"]);
    dir
}

#[test]
fn exit_zero_with_output_on_both_streams_is_exited_ok() {
    let h = Harness::new("echo to-stdout\necho to-stderr >&2\necho work > out.txt", "");
    let (code, started) = h.start("bd-ok", "gemini", &[]);
    assert_eq!(code, 0, "{}", started);
    assert_eq!(started["selected_model"], "gemini-2.5-pro");

    h.wait_for_outcome("gemini", "bd-ok");
    let (code, report) = h.report("bd-ok");
    assert_eq!(code, 0);
    assert_eq!(report["outcome"]["state"], "exited_ok");
    assert_eq!(report["outcome"]["exit_code"], 0);

    let log = std::fs::read_to_string(h.artifact("gemini", "bd-ok", "log")).unwrap();
    assert!(log.contains("to-stdout"));
    assert!(log.contains("to-stderr"));
}

#[test]
fn nonzero_exit_is_exited_err_with_the_exit_code() {
    let h = Harness::new("echo failing\nexit 7", "");
    let (code, _) = h.start("bd-err", "gemini", &[]);
    assert_eq!(code, 0);

    h.wait_for_outcome("gemini", "bd-err");
    let (code, report) = h.report("bd-err");
    assert_eq!(code, 11);
    assert_eq!(report["outcome"]["state"], "exited_err");
    assert_eq!(report["outcome"]["exit_code"], 7);
}

#[test]
fn exit_zero_without_changes_is_no_op_success() {
    let h = Harness::new("echo nothing to do", "");
    h.start("bd-noop", "gemini", &[]);
    h.wait_for_outcome("gemini", "bd-noop");

    let (code, check) = h.run(&["check", "--beads", "bd-noop"]);
    assert_eq!(code, 21);
    assert_eq!(check["state"], "no_op_success");
    assert_eq!(check["next_action"], "redispatch_with_guardrails");
}

#[test]
fn commit_required_without_commit_is_failed() {
    let h = Harness::new("echo edit > edited.txt", "");
    let (code, _) = h.start("bd-commit", "gemini", &["--require", "commit-required"]);
    assert_eq!(code, 0);
    h.wait_for_outcome("gemini", "bd-commit");

    let (code, check) = h.run(&["check", "--beads", "bd-commit"]);
    assert_eq!(code, 25);
    assert_eq!(check["state"], "failed");
    assert_eq!(check["reason_code"], "no_commit_artifact");

    let (_, report) = h.report("bd-commit");
    assert_eq!(report["outcome"]["exit_code"], 25);
}

#[test]
fn capacity_signature_in_log_is_capacity_exhausted() {
    let h = Harness::new("echo 'Error: 429 Too Many Requests'\nexit 1", "");
    h.start("bd-cap", "gemini", &[]);
    h.wait_for_outcome("gemini", "bd-cap");

    let (code, check) = h.run(&["check", "--beads", "bd-cap"]);
    assert_eq!(code, 12);
    assert_eq!(check["state"], "capacity_exhausted");
    assert_eq!(check["next_action"], "retry_with_backoff");
}

#[test]
fn second_start_over_cap_is_rejected_and_first_untouched() {
    let h = Harness::new("sleep 30", "    max_concurrent: 1");
    let (code, first) = h.start("bd-cap-1", "gemini", &[]);
    assert_eq!(code, 0, "{}", first);

    let (code, rejected) = h.start("bd-cap-2", "gemini", &[]);
    assert_eq!(code, 24);
    assert_eq!(rejected["reason_code"], "concurrency_cap_exceeded");
    assert!(!h.artifact("gemini", "bd-cap-2", "meta").exists());

    let (code, check) = h.run(&["check", "--beads", "bd-cap-1"]);
    assert_eq!(code, 0);
    assert_ne!(check["state"], "missing");
    assert_eq!(check["pid"], first["pid"]);

    h.run(&["stop", "--beads", "bd-cap-1"]);
}

#[test]
fn stop_records_manual_stop_with_metrics() {
    let h = Harness::new("echo started\nsleep 30", "");
    let (code, _) = h.start("bd-stop", "gemini", &[]);
    assert_eq!(code, 0);
    std::thread::sleep(Duration::from_millis(300));

    let (code, stopped) = h.run(&["stop", "--beads", "bd-stop"]);
    assert_eq!(code, 0, "{}", stopped);
    assert_eq!(stopped["outcome"]["reason_code"], "manual_stop");
    assert!(stopped["outcome"]["log_bytes"].as_u64().unwrap() > 0);
    assert_eq!(stopped["outcome"]["mutation_count"], 0);

    let (code, check) = h.run(&["check", "--beads", "bd-stop"]);
    assert_eq!(code, 11);
    assert_eq!(check["state"], "manual_stop");

    let (code, again) = h.run(&["stop", "--beads", "bd-stop"]);
    assert_eq!(code, 0);
    assert_eq!(again["already_terminal"], true);
}

#[test]
fn restart_gets_new_pid_and_increments_retries() {
    let h = Harness::new("sleep 30", "");
    let (_, first) = h.start("bd-re", "gemini", &[]);
    let first_pid = first["pid"].as_u64().unwrap();

    let (code, second) = h.run(&["restart", "--beads", "bd-re"]);
    assert_eq!(code, 0, "{}", second);
    assert_ne!(second["pid"].as_u64().unwrap(), first_pid);
    assert_ne!(second["run_instance"], first["run_instance"]);
    assert_eq!(second["retries"], 1);

    assert!(process_gone(first_pid), "old provider must be gone");
    let first_monitor = first["monitor_pid"].as_u64().unwrap();
    assert!(process_gone(first_monitor), "old monitor must be gone");

    let (_, report) = h.report("bd-re");
    assert_eq!(report["pid"], second["pid"]);
    assert_eq!(report["meta"]["retries"], 1);
    assert_eq!(report["meta"]["run_instance"], second["run_instance"]);

    h.run(&["stop", "--beads", "bd-re"]);
}

#[test]
fn rejected_restart_leaves_the_running_job_alone() {
    let h = Harness::new("sleep 30", "");
    let (_, first) = h.start("bd-keep", "gemini", &[]);
    let first_pid = first["pid"].as_u64().unwrap();

    let (code, rejected) = h.run(&["restart", "--beads", "bd-keep", "--preflight", "loose"]);
    assert_eq!(code, 1, "{}", rejected);
    assert_eq!(rejected["reason_code"], "user_error");

    let (code, check) = h.run(&["check", "--beads", "bd-keep"]);
    assert_eq!(code, 0, "{}", check);
    assert_eq!(check["pid"].as_u64(), Some(first_pid));
    assert_eq!(check["run_instance"], first["run_instance"]);
    assert!(!h.artifact("gemini", "bd-keep", "outcome").exists());

    h.run(&["stop", "--beads", "bd-keep"]);
}

#[test]
fn check_without_artifacts_is_missing() {
    let h = Harness::new("true", "");
    let (code, check) = h.run(&["check", "--beads", "bd-nothing"]);
    assert_eq!(code, 10);
    assert_eq!(check["state"], "missing");
}

#[test]
fn provider_switch_shows_only_newest_provider() {
    let h = Harness::new("echo gemini ran\necho a > a.txt", "");
    h.start("bd-switch", "gemini", &[]);
    h.wait_for_outcome("gemini", "bd-switch");

    let (code, started) = h.start("bd-switch", "cc-glm", &[]);
    assert_eq!(code, 0, "{}", started);
    h.wait_for_outcome("cc-glm", "bd-switch");

    let (_, check) = h.run(&["check", "--beads", "bd-switch"]);
    assert_eq!(check["provider"], "cc-glm");

    let (_, report) = h.report("bd-switch");
    assert_eq!(report["provider"], "cc-glm");

    let (_, status) = h.run(&["status"]);
    let jobs = status["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["provider"], "cc-glm");
}

#[test]
fn beads_gate_on_missing_repo_exits_22() {
    let h = Harness::new("true", "");
    let missing = h.state.path().join("no-such-beads-repo");
    let (code, gate) = h.run(&[
        "beads-gate",
        "--beads",
        "bd-1",
        "--beads-repo",
        missing.to_str().unwrap(),
    ]);
    assert_eq!(code, 22);
    assert_eq!(gate["reason_code"], "beads_repo_missing");
}

use chrono::{Duration, Utc};
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    workspace: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let workspace = base.join("workspace");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        seed_workspace_fixture(&workspace);

        let env = Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
            workspace,
        };
        env.write_config(&env.default_config_path());
        env
    }

    fn default_config_path(&self) -> PathBuf {
        self.xdg_config.join("jobwatch/config.toml")
    }

    fn write_config(&self, path: &Path) {
        let gateway = fixture_root().join("gateway");
        let text = format!(
            "[paths]\nworkspace_root = '{}'\ngateway_log_dir = '{}'\n\n[process]\ntimeout_ms = 2000\n",
            self.workspace.display(),
            gateway.display()
        );
        fs::create_dir_all(path.parent().expect("missing config parent"))
            .expect("failed to create config directory");
        fs::write(path, text).expect("failed to write config");
    }

    fn output_dir(&self) -> PathBuf {
        self.workspace.join("logs/codex")
    }
}

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../jobwatch-core/tests/fixtures")
}

fn seed_workspace_fixture(workspace: &Path) {
    let source = fixture_root().join("workspace/logs");
    let target = workspace.join("logs");
    fs::create_dir_all(target.join("codex")).expect("failed to create workspace logs");

    for name in [
        "actions.ndjson",
        "codex/msg42-20240101T000000Z.jsonl",
        "codex/msg7-20240101T010000Z.jsonl",
    ] {
        fs::copy(source.join(name), target.join(name))
            .unwrap_or_else(|e| panic!("failed to copy fixture {name}: {e}"));
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("jobwatch"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute jobwatch: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "jobwatch {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}):\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn recent_lists_fixture_jobs_newest_first() {
    let env = CliTestEnv::new();
    let args = ["recent", "--json"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let jobs = stdout_json(&output);
    let ids: Vec<&str> = jobs
        .as_array()
        .expect("recent jobs should be an array")
        .iter()
        .map(|job| job["jobId"].as_str().expect("jobId"))
        .collect();
    assert_eq!(ids, vec!["43", "7", "42"]);
    assert_eq!(jobs[1]["status"], "ok");
    assert_eq!(jobs[2]["status"], "error");
    assert_eq!(jobs[2]["durationSeconds"], 300.0);
}

#[test]
fn actions_filters_audit_events_by_job() {
    let env = CliTestEnv::new();
    let args = ["actions", "42", "--json"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let events = stdout_json(&output);
    let kinds: Vec<&str> = events
        .as_array()
        .expect("events should be an array")
        .iter()
        .map(|event| event["event"].as_str().expect("event"))
        .collect();
    assert_eq!(kinds, vec!["start", "note"]);
}

#[test]
fn timeline_prints_steps_and_summary() {
    let env = CliTestEnv::new();
    let args = ["timeline", "42"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("command  bash -lc 'make deploy' [failed, exit 2]"),
        "expected the failed command in stdout, got:\n{stdout}"
    );
    assert!(stdout.contains("files    deploy/config.yaml"));
    assert!(!stdout.contains("Planning deploy"));
    assert!(stdout.contains("status: completed (errors)"));
    assert!(stdout.contains("output tokens: 150"));
}

#[test]
fn timeline_with_reasoning_includes_notes() {
    let env = CliTestEnv::new();
    let args = ["timeline", "42", "--reasoning", "--json"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let timeline = stdout_json(&output);
    assert_eq!(timeline["jobId"], "42");
    assert_eq!(timeline["items"][0]["kind"], "text");
    assert_eq!(timeline["items"][0]["role"], "reasoning");
    assert_eq!(timeline["summary"]["latestError"]["exitCode"], 2);
}

#[test]
fn usage_counts_fresh_output_logs() {
    let env = CliTestEnv::new();
    let stamp = (Utc::now() - Duration::hours(1)).format("%Y%m%dT%H%M%SZ");
    fs::write(
        env.output_dir().join(format!("msg9-{stamp}.jsonl")),
        "{\"type\":\"turn.completed\",\"usage\":{\"input_tokens\":10,\"cached_input_tokens\":4,\"output_tokens\":5}}\n",
    )
    .expect("failed to write output log");
    let args = ["usage", "--json"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let summary = stdout_json(&output);
    assert_eq!(summary["last5h"]["runs"], 1);
    assert_eq!(summary["last5h"]["inputTokens"], 10);
    assert_eq!(summary["last7d"]["totalTokens"], 15);
    assert_eq!(summary["scannedFiles"], 1);
}

#[test]
fn explicit_config_path_overrides_default() {
    let env = CliTestEnv::new();
    fs::remove_file(env.default_config_path()).expect("failed to remove default config");
    let custom = env.home.join("custom.toml");
    env.write_config(&custom);
    let custom = custom.to_string_lossy().into_owned();
    let args = ["--config", custom.as_str(), "actions", "7", "--json"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let events = stdout_json(&output);
    assert_eq!(events.as_array().map(Vec::len), Some(2));
}

#[test]
fn invalid_job_id_is_rejected() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["timeline", "../42"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid job id"),
        "expected invalid job id error, got:\n{stderr}"
    );
}

#[test]
fn missing_output_log_reports_not_found() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["timeline", "43"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no output log found for message_id 43"));
}

#[test]
fn malformed_config_fails_startup() {
    let env = CliTestEnv::new();
    fs::write(env.default_config_path(), "[stream]\nkeepalive_secs = 0\n")
        .expect("failed to overwrite config");

    let output = run_bin(&env, &["recent"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"));
}

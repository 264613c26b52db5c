use assert_cmd::Command;
use homeplan_testkit::{MockResponse, ScriptedServer, progress_reply};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_settings(workspace: &Path, endpoint: &str) {
    let runtime = workspace.join(".homeplan");
    fs::create_dir_all(&runtime).expect("runtime dir");
    let settings = json!({
        "llm": {
            "endpoint": endpoint,
            "api_keys": ["gsk-test-key"],
            "api_key_envs": [],
            "request_spacing_ms": 0,
            "cooldown_ms": 0,
            "timeout_seconds": 5
        },
        "status": { "enabled": false }
    });
    fs::write(
        runtime.join("settings.local.json"),
        serde_json::to_vec_pretty(&settings).expect("settings json"),
    )
    .expect("settings override");
}

fn homeplan(workspace: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("homeplan"));
    cmd.current_dir(workspace).env("HOME", workspace);
    cmd
}

fn run_json(workspace: &Path, args: &[&str]) -> Value {
    let output = homeplan(workspace)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn execute_runs_tasks_through_the_plan_loop() {
    let workspace = TempDir::new().expect("workspace");
    let server = ScriptedServer::start(vec![
        MockResponse::completion("<final-answer>Living room lights are on.</final-answer>"),
        MockResponse::completion(&progress_reply(&["turn on AC"], &["check lights"])),
        MockResponse::completion("AC running at 24C"),
        MockResponse::completion(&progress_reply(&[], &["check lights", "turn on AC"])),
        MockResponse::completion("<final-answer>Lights on and AC at 24C.</final-answer>"),
    ])
    .expect("server");
    write_settings(workspace.path(), &server.endpoint());

    let out = run_json(
        workspace.path(),
        &[
            "--json",
            "execute",
            "--task",
            "check lights",
            "--task",
            "turn on AC",
            "--goal",
            "get the living room ready",
        ],
    );

    assert_eq!(out["final_answer"], "Lights on and AC at 24C.");
    assert_eq!(out["goal"], "get the living room ready");
    assert_eq!(out["executions"], 2);
    assert_eq!(out["tasks"][0]["result"], "Living room lights are on.");
    assert_eq!(out["tasks"][1]["status"], "completed");
    assert_eq!(out["plan_type"], Value::Null);
    assert_eq!(server.request_count(), 5);
    assert!(
        server
            .requests()
            .iter()
            .all(|req| req.authorization.as_deref() == Some("Bearer gsk-test-key"))
    );
}

#[test]
fn run_executes_the_requested_priority_plan() {
    let workspace = TempDir::new().expect("workspace");
    let plans = json!({
        "security": ["lock front door"],
        "convenience": ["dim lights"],
        "energy": ["switch off standby devices"]
    });
    let server = ScriptedServer::start(vec![
        MockResponse::completion(&plans.to_string()),
        MockResponse::completion("standby devices are off"),
        MockResponse::completion(&progress_reply(&[], &["switch off standby devices"])),
        MockResponse::completion("<final-answer>Standby power cut.</final-answer>"),
    ])
    .expect("server");
    write_settings(workspace.path(), &server.endpoint());

    let out = run_json(
        workspace.path(),
        &["--json", "run", "going to bed", "--priority", "3", "--no-status"],
    );

    assert_eq!(out["plan_type"], "priority_energy");
    assert_eq!(out["tasks"][0]["content"], "switch off standby devices");
    assert_eq!(out["final_answer"], "Standby power cut.");
    let first = server.requests()[0].json().expect("request body");
    assert_eq!(first["response_format"]["type"], "json_object");
}

#[test]
fn plan_prints_a_simple_proposal() {
    let workspace = TempDir::new().expect("workspace");
    let server = ScriptedServer::start(vec![MockResponse::completion(
        "<plan>\n1. close blinds\n2. set thermostat to 20C\n</plan>",
    )])
    .expect("server");
    write_settings(workspace.path(), &server.endpoint());

    let out = run_json(
        workspace.path(),
        &["--json", "plan", "prepare for a movie", "--strategy", "simple"],
    );

    assert_eq!(out["strategy"], "simple");
    assert_eq!(out["proposal"]["kind"], "single");
    assert_eq!(
        out["proposal"]["tasks"],
        json!(["close blinds", "set thermostat to 20C"])
    );
}

#[test]
fn exhausted_credentials_fail_the_command() {
    let workspace = TempDir::new().expect("workspace");
    let server = ScriptedServer::start(vec![
        MockResponse::rate_limited(),
        MockResponse::rate_limited(),
        MockResponse::rate_limited(),
    ])
    .expect("server");
    write_settings(workspace.path(), &server.endpoint());

    let output = homeplan(workspace.path())
        .args(["execute", "--task", "turn on AC"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("rate limited"), "stderr: {stderr}");
    assert_eq!(server.request_count(), 3);
}

#[test]
fn config_show_redacts_api_keys() {
    let workspace = TempDir::new().expect("workspace");
    write_settings(workspace.path(), "http://127.0.0.1:9/chat/completions");

    let out = run_json(workspace.path(), &["--json", "config", "show"]);

    assert_eq!(out["llm"]["api_keys"], json!(["***REDACTED***"]));
    assert_eq!(out["status"]["enabled"], false);
    assert_eq!(out["planner"]["strategy"], "priority");
}

use assert_cmd::prelude::*;
use rstest::rstest;
use serde_json::Value;
use std::process::Command;

fn run_json(args: &[&str]) -> Vec<Value> {
    let mut cmd = Command::cargo_bin("pour_cli").unwrap();
    cmd.arg("--json").args(["--log-level", "error"]).args(args);
    let out = cmd.output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad JSON line {l}: {e}")))
        .collect()
}

/// Validate the JSONL schema for a completed simulated pour.
#[rstest]
fn jsonl_success_schema() {
    let lines = run_json(&["run", "--fast", "--target", "20", "--samples", "300"]);

    for v in &lines {
        assert!(v["type"].is_string(), "untagged line {v}");
    }
    assert_eq!(lines[0]["type"], "pour");
    assert_eq!(lines[0]["event"], "started");
    assert_eq!(lines[0]["target_g"], 20.0);

    let finished = lines
        .iter()
        .find(|v| v["event"] == "finished")
        .expect("a finished event");
    assert_eq!(finished["outcome"]["result"], "completed");
    for key in ["accuracy", "stability", "responsiveness", "overshoot", "composite"] {
        let s = finished["score"][key].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&s), "{key} = {s}");
    }

    let summary = lines.last().unwrap();
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["exit"], "sample_limit");
    assert_eq!(summary["samples"], 300);
    assert_eq!(summary["filter_failures"], 0);

    // default stats window is 100
    assert_eq!(lines.iter().filter(|v| v["type"] == "stats").count(), 3);
}

#[rstest]
fn jsonl_records_carry_every_channel() {
    let lines = run_json(&["run", "--fast", "--records", "--samples", "5"]);
    let records: Vec<&Value> = lines.iter().filter(|v| v["type"] == "record").collect();
    assert_eq!(records.len(), 5);
    for r in records {
        let est = r["estimates"].as_object().unwrap();
        assert_eq!(est.len(), 7);
        assert!(est.contains_key("kalman_pv_velocity"));
        assert!(r["stale"].as_array().unwrap().is_empty());
    }
}

#[rstest]
fn jsonl_stop_reports_abort_reason() {
    let mut cmd = Command::cargo_bin("pour_cli").unwrap();
    cmd.args(["--json", "run", "--fast", "--target", "500", "--samples", "30"]);
    let out = cmd.output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    let finished: Value = text
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).unwrap())
        .find(|v| v["event"] == "finished")
        .expect("run end stops the active pour");
    assert_eq!(finished["outcome"]["result"], "aborted");
    assert_eq!(finished["outcome"]["reason"], "stopped");
}

#[rstest]
fn json_errors_are_structured() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    std::fs::write(&cfg, "[filters.ema]\nalpha = 2.0\n").unwrap();

    let mut cmd = Command::cargo_bin("pour_cli").unwrap();
    cmd.arg("--json").arg("--config").arg(&cfg).arg("self-check");
    let out = cmd.output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8(out.stderr).unwrap();
    let last = stderr.lines().last().unwrap();
    let v: Value = serde_json::from_str(last).unwrap();
    assert_eq!(v["reason"], "InvalidConfiguration");
    assert!(v["message"].as_str().unwrap().contains("filters.ema.alpha"));
}

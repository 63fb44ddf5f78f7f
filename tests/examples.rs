use std::fs;
use std::io::ErrorKind;
use std::process::{Command, Stdio};

use nix::unistd::geteuid;
use serde_json::Value;

fn cmd(bin: &str, args: &[&str]) {
    assert!(Command::new(bin)
        .args(args)
        .stderr(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .expect("failed to run command")
        .success());
}

// The launched command's own fork notification arrives after it is tracked,
// so it always counts as one process and one thread.

/// Observing process events needs root; without it these tests have nothing
/// to look at.
fn can_observe() -> bool {
    if !geteuid().is_root() {
        eprintln!("skipping: needs root to subscribe to process events");
        return false;
    }
    true
}

fn run(example_name: &str) -> Value {
    let bin = format!("./target/debug/examples/{}", example_name);
    let out = std::env::temp_dir().join(format!("treetime-{}.json", example_name));
    let out = out.to_str().expect("temp dir is not utf-8");

    cmd("cargo", &["build", "--example", example_name]);

    match fs::remove_file(out) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => panic!("{}", e),
    }

    cmd(
        env!("CARGO_BIN_EXE_treetime"),
        &["--quiet", "--output", out, "--", &bin],
    );

    let text = fs::read_to_string(out).expect("failed to read output");
    let json = serde_json::from_str::<Value>(&text).expect("failed to parse JSON");

    dbg!(json)
}

fn sampled(json: &Value) -> bool {
    let samples = json["samples"].as_array().expect("samples is not an array");
    !samples.is_empty() && json["max_pss_bytes"].as_u64() > Some(0)
}

#[test]
fn fork() {
    if !can_observe() {
        return;
    }
    let json = run("fork");
    assert_eq!(json["processes"], 2);
    assert_eq!(json["threads"], 2);
    assert_eq!(json["termination"]["exited"], 0);
    assert!(sampled(&json));
}

#[test]
fn double_fork() {
    if !can_observe() {
        return;
    }
    let json = run("double-fork");
    assert_eq!(json["processes"], 4);
    assert_eq!(json["threads"], 4);
    assert!(sampled(&json));
}

#[test]
fn threads() {
    if !can_observe() {
        return;
    }
    let json = run("threads");
    assert_eq!(json["processes"], 1);
    assert_eq!(json["threads"], 11);
    assert!(sampled(&json));
}

#[test]
fn fork_threads() {
    if !can_observe() {
        return;
    }
    let json = run("fork-threads");
    assert_eq!(json["processes"], 2);
    assert_eq!(json["threads"], 12);
    assert!(sampled(&json));
}

#[test]
fn missing_command_fails() {
    let status = Command::new(env!("CARGO_BIN_EXE_treetime"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("failed to run treetime");
    assert!(!status.success());
}

//! Integration tests for clean exit of `arnold serve`.
//! Verifies that closing stdin (EOF) and the `stop` command end the process.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn arnold_binary() -> std::path::PathBuf {
    assert_cmd::cargo::cargo_bin!("arnold").into()
}

fn spawn_serve(dir: &TempDir) -> std::process::Child {
    let config = dir.path().join("arnold.toml");
    std::fs::write(&config, "[model]\nkind = \"rhythm\"\nradius = 3.0\n").unwrap();
    Command::new(arnold_binary())
        .arg("serve")
        .arg("--config")
        .arg(&config)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn arnold serve")
}

fn send(child: &mut std::process::Child, msg: &serde_json::Value) {
    let stdin = child.stdin.as_mut().expect("stdin pipe");
    let line = serde_json::to_string(msg).unwrap();
    writeln!(stdin, "{line}").unwrap();
    stdin.flush().unwrap();
}

/// Read stdout lines until one has the given `type`.
fn wait_for(reader: &mut impl BufRead, kind: &str) -> serde_json::Value {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).unwrap();
        assert!(n > 0, "stdout closed before {kind}");
        let event: serde_json::Value = serde_json::from_str(&line).unwrap();
        if event["type"] == kind {
            return event;
        }
    }
}

/// Closing stdin before the engine is ready should still exit cleanly.
#[test]
fn serve_exits_on_early_stdin_eof() {
    let dir = TempDir::new().unwrap();
    let mut child = spawn_serve(&dir);
    drop(child.stdin.take());

    let start = Instant::now();
    let output = child.wait_with_output().expect("wait");
    let elapsed = start.elapsed();

    assert!(
        output.status.success(),
        "early stdin EOF should exit 0, got {}",
        output.status
    );
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

/// A self-clocked session stops pushing and exits once stdin closes.
#[test]
fn serve_exits_on_stdin_eof_while_running() {
    let dir = TempDir::new().unwrap();
    let mut child = spawn_serve(&dir);
    let mut stdout = BufReader::new(child.stdout.take().expect("stdout pipe"));
    wait_for(&mut stdout, "ready");

    send(&mut child, &serde_json::json!({"cmd": "start", "rateHz": 100}));
    wait_for(&mut stdout, "mass");
    drop(child.stdin.take());

    let start = Instant::now();
    let status = child.wait().expect("wait");
    assert!(status.success(), "exit status {status}");
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn serve_exits_on_stop() {
    let dir = TempDir::new().unwrap();
    let mut child = spawn_serve(&dir);
    let mut stdout = BufReader::new(child.stdout.take().expect("stdout pipe"));
    wait_for(&mut stdout, "ready");

    send(&mut child, &serde_json::json!({"cmd": "stop"}));
    wait_for(&mut stdout, "ack");

    // stdin still open: the stop alone ends the process
    let start = Instant::now();
    let status = child.wait().expect("wait");
    assert!(status.success(), "exit status {status}");
    assert!(start.elapsed() < Duration::from_secs(5));
}

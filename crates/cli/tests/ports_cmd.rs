//! CLI tests for the `udw ports` subcommand.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

use assert_cmd::cargo;

fn udw_cmd() -> Command {
    Command::new(cargo::cargo_bin!("udw"))
}

/// A one-connection broker answering `list` and `info`.
fn mock_broker() -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock broker");
    let addr = listener.local_addr().expect("local addr").to_string();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut writer = stream.try_clone().expect("clone stream");
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            let reply = match line.trim() {
                "list" => "dev1",
                "info dev1" => "MFG:Acme;MDL:Pen 9000;SN:ABC123;",
                _ => "error: unknown request",
            };
            if writer.write_all(format!("{reply}\n").as_bytes()).is_err() {
                break;
            }
        }
    });
    (addr, handle)
}

#[test]
fn ports_help_shows_broker_flag() {
    let output = udw_cmd()
        .args(["ports", "--help"])
        .output()
        .expect("run ports help");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--broker"));
}

#[test]
fn ports_lists_broker_devices() {
    let (addr, handle) = mock_broker();
    let output = udw_cmd()
        .args(["ports", "--broker", &addr, "--output", "json"])
        .output()
        .expect("run ports");
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("ports json");
    assert!(json["serial"].is_array());
    assert_eq!(json["broker"]["ok"], true);
    let devices = json["broker"]["devices"].as_array().expect("devices");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["id"], "dev1");
    assert_eq!(devices[0]["model"], "Pen 9000");
    assert_eq!(devices[0]["serial"], "ABC123");
    handle.join().expect("mock broker thread");
}

#[test]
fn ports_without_broker_lists_serial_only() {
    let output = udw_cmd()
        .args(["ports", "--output", "json"])
        .output()
        .expect("run ports");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("ports json");
    assert!(json["serial"].is_array());
    assert!(json["broker"].is_null());
}

#[test]
fn unreachable_broker_fails() {
    // Bind then drop so the port is very likely closed.
    let addr = TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("free port")
        .to_string();
    let output = udw_cmd()
        .args(["ports", "--broker", &addr, "--output", "json"])
        .output()
        .expect("run ports");
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("ports json");
    assert_eq!(json["broker"]["ok"], false);
}

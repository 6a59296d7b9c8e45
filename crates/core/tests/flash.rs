//! Firmware upload through a live session.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use common::{Wire, connected, session_with, test_config, wait_for};
use udw_toolchain_core::Tag;

fn payload(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn step_line(texts: &[String], step: &str) -> Option<String> {
    texts
        .iter()
        .find(|t| t.starts_with(&format!("flash: {step}: ")))
        .cloned()
}

#[test]
fn flash_over_a_socket() {
    let dir = tempfile::tempdir().unwrap();
    let fw = payload(&dir, "fw.bin", &[1, 2, 3, 4, 5]);
    let wire = Wire::new();
    wire.reply_to("fm.reflash", "ready for data\n");
    let (mut session, sink) = connected("tgt", &wire);

    session.execute(&format!("flash {}", fw.display())).unwrap();

    assert_eq!(wire.flashed(), [1, 2, 3, 4, 5]);
    assert!(wire.sent_lines().iter().any(|l| l == "fm.reflash"));
    let texts = sink.texts();
    assert_eq!(
        step_line(&texts, "enter flash mode").as_deref(),
        Some("flash: enter flash mode: done")
    );
    assert_eq!(
        step_line(&texts, "wait for reset").as_deref(),
        Some("flash: wait for reset: skipped")
    );
    assert_eq!(
        step_line(&texts, "restore connection").as_deref(),
        Some("flash: restore connection: done")
    );
    assert!(session.is_open());
    assert_eq!(wire.opened().len(), 2);

    // The restored connection has a live reader.
    wire.feed("A F13()\n");
    assert!(wait_for(|| sink.texts().iter().any(|t| t == "flow_pen_eject()")));
    assert!(!sink.texts().iter().any(|t| t.starts_with("connection lost")));
}

#[test]
fn silent_target_times_out_and_flashes_anyway() {
    let dir = tempfile::tempdir().unwrap();
    let fw = payload(&dir, "fw.bin", &[9; 10]);
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);

    session.execute(&format!("flash {}", fw.display())).unwrap();

    assert_eq!(wire.flashed().len(), 10);
    let line = sink
        .lines()
        .into_iter()
        .find(|l| l.text().starts_with("flash: enter flash mode: "))
        .unwrap();
    assert!(line.text().ends_with("timed out, continuing"));
    assert!(line.has_tag(Tag::Warning));
    assert!(sink.texts().iter().any(|t| t.starts_with("flashed ")));
}

#[test]
fn dump_files_are_word_swapped() {
    let dir = tempfile::tempdir().unwrap();
    let fw = payload(&dir, "image.DMP", &[1, 2, 3, 4, 5]);
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt", &wire);

    session.execute(&format!("flash {}", fw.display())).unwrap();
    assert_eq!(wire.flashed(), [2, 1, 4, 3, 5]);
}

#[test]
fn unopenable_flash_route_aborts_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let fw = payload(&dir, "fw.bin", &[1, 2]);
    let wire = Wire::new();
    wire.flash_fails.store(true, Ordering::Release);
    let (mut session, sink) = connected("tgt", &wire);

    session.execute(&format!("flash {}", fw.display())).unwrap();

    assert!(wire.flashed().is_empty());
    let texts = sink.texts();
    assert!(
        step_line(&texts, "open flash connection")
            .unwrap()
            .contains("failed: ")
    );
    assert!(step_line(&texts, "send payload").is_none());
    assert_eq!(
        step_line(&texts, "restore connection").as_deref(),
        Some("flash: restore connection: done")
    );
    assert!(
        texts
            .iter()
            .any(|t| t.starts_with("flash failed: cannot open the flashing connection"))
    );
    assert!(session.is_open());
    assert!(session.shared().is_open.is_set());
}

#[test]
fn serial_targets_wait_for_the_device_to_reset() {
    let dir = tempfile::tempdir().unwrap();
    let fw = payload(&dir, "fw.bin", &[7, 7]);
    let wire = Wire::new();
    wire.reply_to("fm.reflash", "ready for data\n");
    wire.script_device(&[true, false, false, true]);
    let (mut session, sink) = connected("serial:/dev/ttyUDW0", &wire);

    session.execute(&format!("flash {}", fw.display())).unwrap();

    assert_eq!(
        step_line(&sink.texts(), "wait for reset").as_deref(),
        Some("flash: wait for reset: done")
    );
    assert_eq!(wire.flashed(), [7, 7]);
}

#[test]
fn serial_reset_that_never_comes_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let fw = payload(&dir, "fw.bin", &[7]);
    let wire = Wire::new();
    wire.reply_to("fm.reflash", "ready for data\n");
    let mut config = test_config();
    config.flash.reset_timeout = std::time::Duration::from_millis(100);
    let (mut session, sink) = session_with(config, &wire);
    session.connect("serial:/dev/ttyUDW0").unwrap();

    session.execute(&format!("flash {}", fw.display())).unwrap();

    assert_eq!(
        step_line(&sink.texts(), "wait for reset").as_deref(),
        Some("flash: wait for reset: timed out, continuing")
    );
    assert_eq!(wire.flashed(), [7]);
}

#[test]
fn flash_needs_a_connection() {
    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    session.execute("flash fw.bin").unwrap();
    assert_eq!(
        sink.texts().last().map(String::as_str),
        Some("flash failed: not connected")
    );
    assert!(wire.opened().is_empty());
}

#[test]
fn missing_payload_leaves_the_connection_alone() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("flash /nonexistent/fw.bin").unwrap();
    assert!(
        sink.texts()
            .iter()
            .any(|t| t.starts_with("flash failed: cannot read firmware"))
    );
    assert!(!wire.sent_lines().iter().any(|l| l == "fm.reflash"));
    assert_eq!(wire.opened().len(), 1);
    assert!(session.is_open());
}

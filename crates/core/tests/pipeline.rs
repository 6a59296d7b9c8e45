//! The reader/consumer pipeline under a live session.

mod common;

use std::fs;
use std::thread;
use std::time::Duration;

use common::{Wire, connected, session_with, test_config, wait_for};
use udw_toolchain_core::Tag;

#[test]
fn paused_display_keeps_draining_the_target() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("pause").unwrap();
    assert!(!session.shared().gate.is_set());

    wire.feed("A F12(1,2)\nA F13()\nA R13\n");
    assert!(wait_for(|| session.interpreter().pipeline().pending() == 3));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(session.interpreter().pipeline().pending(), 3);
    assert!(!sink.texts().iter().any(|t| t.starts_with("flow_pen")));

    // Other commands do not lift a pause.
    session.execute("history").unwrap();
    assert!(!session.shared().gate.is_set());

    session.execute("unpause").unwrap();
    assert!(session.wait_idle(Duration::from_secs(5)));
    let texts = sink.texts();
    let decoded: Vec<&String> = texts.iter().filter(|t| t.starts_with("flow_pen")).collect();
    assert_eq!(
        decoded,
        ["flow_pen_load(x=1, y=2)", "flow_pen_eject()", "flow_pen_eject returned"]
    );
}

#[test]
fn decode_file_replays_a_saved_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("capture.log");
    fs::write(&log, "+0A F12(3,4)\r\n\n+2B L1=8\n+1A R12=9\n").unwrap();

    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    assert_eq!(session.decode_file(&log).unwrap(), 3);
    assert!(session.wait_idle(Duration::from_secs(5)));
    assert_eq!(
        sink.texts(),
        [
            "flow_pen_load(x=3, y=4)",
            "slot = 8",
            "flow_pen_load -> STATUS_JAM"
        ]
    );
    assert_eq!(sink.raw().len(), 3);
}

#[test]
fn decode_command_reports_a_missing_file() {
    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    session.execute("decode /nonexistent/capture.log").unwrap();
    let last = sink.lines().pop().unwrap();
    assert!(last.has_tag(Tag::Error));
    assert!(last.text().contains("/nonexistent/capture.log"));
}

#[test]
fn prompt_without_newline_is_shown() {
    let wire = Wire::new();
    let (session, sink) = connected("tgt", &wire);
    wire.feed("booted\n> ");
    assert!(wait_for(|| session.shared().prompt_seen.is_set()));
    assert!(wait_for(|| sink
        .lines()
        .iter()
        .any(|l| l.has_tag(Tag::Prompt))));
    assert!(sink.texts().iter().any(|t| t == "booted"));
}

#[test]
fn arrows_in_live_output_do_not_split_lines() {
    let wire = Wire::new();
    let (session, sink) = connected("tgt", &wire);
    wire.feed("engine state 1 -> 4\n");
    assert!(wait_for(|| sink
        .texts()
        .iter()
        .any(|t| t.starts_with("engine state "))));
    let line = sink
        .lines()
        .into_iter()
        .find(|l| l.text().starts_with("engine state "))
        .unwrap();
    assert!(line.has_tag(Tag::Info));
    assert!(line.text().contains(" -> "));
    assert!(!sink.texts().iter().any(|t| t == "> 4"));
    assert!(wait_for(|| sink.raw() == ["engine state 1 -> 4"]));
    assert!(!session.shared().prompt_seen.is_set());
}

#[test]
fn target_output_is_backed_up_raw() {
    let wire = Wire::new();
    let (session, sink) = connected("tgt", &wire);
    wire.feed("A F12(1,2)\nplain text\n");
    assert!(wait_for(|| sink.raw().len() == 2));
    assert_eq!(sink.raw(), ["A F12(1,2)", "plain text"]);
    drop(session);
}

#[test]
fn typing_pauses_a_busy_display() {
    let wire = Wire::new();
    let (session, _sink) = session_with(test_config(), &wire);

    session.note_typing();
    assert!(session.shared().gate.is_set());

    for i in 0..20 {
        session.interpreter().pipeline().push(format!("line {i}"));
    }
    assert!(session.wait_idle(Duration::from_secs(5)));
    session.note_typing();
    assert!(!session.shared().gate.is_set());
}

#[test]
fn any_command_resumes_after_typing_paused() {
    let wire = Wire::new();
    let (mut session, _sink) = session_with(test_config(), &wire);
    for i in 0..20 {
        session.interpreter().pipeline().push(format!("line {i}"));
    }
    assert!(session.wait_idle(Duration::from_secs(5)));
    session.note_typing();
    assert!(!session.shared().gate.is_set());

    session.execute("").unwrap();
    assert!(session.shared().gate.is_set());
}

#[test]
fn shutdown_stops_the_threads() {
    let wire = Wire::new();
    let (session, _sink) = connected("tgt", &wire);
    let shared = std::sync::Arc::clone(session.shared());
    session.shutdown();
    assert!(shared.cancel.is_set());
    assert!(!shared.is_open.is_set());
}

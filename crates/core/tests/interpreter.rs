//! Commands typed into a session, checked on the wire.

mod common;

use std::fs;
use std::time::{Duration, Instant};

use common::{Wire, connected, session_with, test_config, wait_for};
use udw_toolchain_core::target::RAW_MODE_PREAMBLE;
use udw_toolchain_core::{Flow, SessionError, Tag};

fn protocol_lines(wire: &Wire) -> Vec<String> {
    wire.sent_lines()
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect()
}

#[test]
fn door_open_sends_the_sensor_macro() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt", &wire);
    session.execute("door open").unwrap();
    assert_eq!(protocol_lines(&wire), ["pe_digital_sensor.set MAIN_DOOR 1"]);
}

#[test]
fn breakpoints_resolve_through_the_symbol_tables() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt", &wire);
    session.execute("break pen:7136").unwrap();
    session.execute("break flow_pen_load").unwrap();
    session.execute("break g_speed 3").unwrap();
    session.execute("clear").unwrap();
    assert_eq!(
        protocol_lines(&wire),
        [
            "fm.break 42",
            "fm.break_flow 12",
            "fm.watch 5 3",
            "fm.clear all"
        ]
    );
}

#[test]
fn unresolvable_breakpoint_is_rejected_locally() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("break pen:1").unwrap();
    assert!(protocol_lines(&wire).is_empty());
    assert!(sink.texts().iter().any(|t| t.contains("no statement at pen:1")));
}

#[test]
fn invocation_pushes_arguments_in_order_and_annotates_the_reply() {
    let wire = Wire::new();
    wire.reply_to("fm.peek", "7;\n");
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("flow_pen_load(3, 4)").unwrap();
    assert_eq!(
        protocol_lines(&wire),
        ["fm.push 3", "fm.push 4", "fm.call F12", "fm.peek", "fm.pop"]
    );
    assert!(wait_for(|| sink
        .texts()
        .iter()
        .any(|t| t == "flow_pen_load(3, 4) = 7")));
}

#[test]
fn global_query_and_assignment() {
    let wire = Wire::new();
    wire.reply_to("fm.get_global 5", "12;\n");
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("g_speed").unwrap();
    session.execute("g_speed = MAX_SPEED").unwrap();
    session.execute("g_table[2] = 0x10").unwrap();
    assert_eq!(
        protocol_lines(&wire),
        ["fm.get_global 5", "fm.set_global 5 90", "fm.set_array 6 2 16"]
    );
    assert!(wait_for(|| sink.texts().iter().any(|t| t == "g_speed = 12")));
}

#[test]
fn constants_are_answered_locally() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("MAX_SPEED").unwrap();
    assert!(protocol_lines(&wire).is_empty());
    assert!(sink.texts().iter().any(|t| t == "MAX_SPEED = 90"));
}

#[test]
fn trace_commands() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt", &wire);
    session.execute("trace flow local").unwrap();
    session.execute("trace reset").unwrap();
    assert_eq!(
        protocol_lines(&wire),
        ["fm.trace 5", "fm.trace 0", "fm.trace_startup 0"]
    );
}

#[test]
fn unknown_input_is_sent_as_is() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt", &wire);
    session.execute("sys.version").unwrap();
    assert_eq!(protocol_lines(&wire), ["sys.version"]);
}

#[test]
fn without_a_connection_protocol_commands_warn() {
    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    session.execute("history").unwrap();
    assert!(sink.lines().iter().all(|l| !l.has_tag(Tag::Warning)));

    session.execute("go").unwrap();
    let warning = sink.lines().pop().unwrap();
    assert!(warning.has_tag(Tag::Warning));
    assert!(warning.text().contains("not connected"));
    assert!(wire.sent_text().is_empty());
}

#[test]
fn shell_channel_wraps_commands() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt:shell", &wire);
    session.execute("go").unwrap();
    assert_eq!(protocol_lines(&wire), ["udw \"fm.go\""]);
}

#[test]
fn framed_mode_terminates_and_echoes() {
    let wire = Wire::new();
    let config = udw_toolchain_core::SessionConfig {
        framed: true,
        ..test_config()
    };
    let (mut session, sink) = session_with(config, &wire);
    session.connect("tgt").unwrap();
    session.execute("go").unwrap();
    assert_eq!(protocol_lines(&wire), ["fm.go;"]);
    assert!(
        sink.lines()
            .iter()
            .any(|l| l.has_tag(Tag::Comment) && l.text() == "fm.go;")
    );
}

#[test]
fn raw_print_port_sends_the_preamble_once() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt:9100", &wire);
    session.execute("go").unwrap();
    session.execute("step").unwrap();
    let sent = wire.sent_text();
    assert!(sent.starts_with(RAW_MODE_PREAMBLE));
    assert_eq!(sent.matches(RAW_MODE_PREAMBLE).count(), 1);
    assert!(sent.ends_with("fm.go\nfm.step\n"));
}

#[test]
fn manual_connect_is_remembered_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let config = || udw_toolchain_core::SessionConfig {
        state_dir: Some(dir.path().to_path_buf()),
        ..test_config()
    };

    let wire = Wire::new();
    let (mut first, _sink) = session_with(config(), &wire);
    first.execute("connect tgt:7000").unwrap();
    assert!(first.is_open());
    first.shutdown();

    let wire2 = Wire::new();
    let (mut second, _sink) = session_with(config(), &wire2);
    second.execute("connect").unwrap();
    assert!(second.is_open());
    assert_eq!(wire2.opened(), wire.opened());
}

#[test]
fn failing_to_remember_the_port_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let config = udw_toolchain_core::SessionConfig {
        state_dir: Some(blocker.join("state")),
        ..test_config()
    };

    let wire = Wire::new();
    let (mut session, _sink) = session_with(config, &wire);
    let err = session.execute("connect tgt").unwrap_err();
    assert!(matches!(err, SessionError::PersistLastPort { .. }));
}

#[test]
fn connect_without_history_is_reported_not_fatal() {
    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    assert_eq!(session.execute("connect").unwrap(), Flow::Continue);
    assert!(!session.is_open());
    assert!(sink.texts().iter().any(|t| t.starts_with("connect failed")));
}

#[test]
fn sync_returns_on_the_echo() {
    let wire = Wire::new();
    wire.reply_to("udw.echo", "@@udw-sync@@\n");
    let (mut session, sink) = connected("tgt", &wire);
    let started = Instant::now();
    session.execute("sync 3").unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(session.shared().sync_seen.is_set());
    assert_eq!(protocol_lines(&wire), ["udw.echo @@udw-sync@@"]);
    assert!(sink.lines().iter().all(|l| !l.has_tag(Tag::Warning)));
}

#[test]
fn sync_accepts_a_quiet_target() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    let started = Instant::now();
    session.execute("sync 10").unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!session.shared().sync_seen.is_set());
    assert!(sink.lines().iter().all(|l| !l.has_tag(Tag::Warning)));
}

#[test]
fn hang_up_is_reported_and_reconnect_recovers() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    assert!(session.shared().is_open.is_set());

    wire.hang_up();
    assert!(wait_for(|| !session.shared().is_open.is_set()));
    assert!(wait_for(|| sink
        .texts()
        .iter()
        .any(|t| t.starts_with("connection lost"))));

    session.execute("reconnect").unwrap();
    assert!(session.shared().is_open.is_set());
    assert_eq!(wire.opened().len(), 2);

    wire.feed("A F13()\n");
    assert!(wait_for(|| sink.texts().iter().any(|t| t == "flow_pen_eject()")));
}

#[test]
fn disconnect_is_quiet() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    session.execute("disconnect").unwrap();
    assert!(!session.is_open());
    std::thread::sleep(Duration::from_millis(50));
    assert!(!sink.texts().iter().any(|t| t.starts_with("connection lost")));
}

#[test]
fn list_follows_the_last_stop() {
    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    wire.feed("A B42\n");
    assert!(wait_for(|| sink.sources().len() == 1));

    session.execute("list").unwrap();
    session.execute("l+").unwrap();
    session.execute("l.").unwrap();
    session.execute("list flow_pen_load").unwrap();
    assert_eq!(
        sink.sources(),
        [
            ("pen.fml".to_string(), 7136, 7136),
            ("pen.fml".to_string(), 7136, 7136),
            ("pen.fml".to_string(), 7146, 7136),
            ("pen.fml".to_string(), 7136, 7136),
            ("pen.fml".to_string(), 7100, 7136),
        ]
    );
}

#[test]
fn go_leaves_the_breakpoint() {
    let wire = Wire::new();
    let (mut session, _sink) = connected("tgt", &wire);
    wire.feed("A B42\n");
    assert!(wait_for(|| session.shared().at_breakpoint.is_set()));
    session.execute("go").unwrap();
    assert!(!session.shared().at_breakpoint.is_set());
}

#[test]
fn source_runs_a_script_until_quit() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("setup.udw");
    fs::write(&script, "door open\n\n# setting up\nquit\ngo\n").unwrap();

    let wire = Wire::new();
    let (mut session, sink) = connected("tgt", &wire);
    let flow = session
        .execute(&format!("source {}", script.display()))
        .unwrap();
    assert_eq!(flow, Flow::Quit);
    assert_eq!(protocol_lines(&wire), ["pe_digital_sensor.set MAIN_DOOR 1"]);
    assert!(sink.texts().iter().any(|t| t == "# setting up"));
}

#[test]
fn history_lists_previous_input() {
    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    session.execute("door open").unwrap();
    session.execute("history").unwrap();
    assert_eq!(
        session.interpreter().history(),
        ["door open".to_string(), "history".to_string()]
    );
    assert!(sink.texts().iter().any(|t| t.ends_with("door open")));
}

#[test]
fn shell_escape_runs_on_the_host() {
    let wire = Wire::new();
    let (mut session, sink) = session_with(test_config(), &wire);
    session.execute("!echo from-the-host").unwrap();
    assert!(sink.texts().iter().any(|t| t == "from-the-host"));
}

#[test]
fn reload_rereads_the_symbol_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("symbols.json");
    fs::write(&path, common::SYMBOLS).unwrap();
    let config = udw_toolchain_core::SessionConfig {
        symbols_path: Some(path),
        ..test_config()
    };

    let wire = Wire::new();
    let (mut session, sink) = session_with(config, &wire);
    session.shared().mark_symbols_stale();
    let before = session.symbols().generation();

    session.execute("reload").unwrap();
    assert!(session.symbols().generation() > before);
    assert!(!session.shared().symbols_stale());
    assert!(sink.texts().iter().any(|t| t.contains("build test-build")));
}

#[test]
fn quit_ends_the_loop() {
    let wire = Wire::new();
    let (mut session, _sink) = session_with(test_config(), &wire);
    assert_eq!(session.execute("quit").unwrap(), Flow::Quit);
    assert!(!session.interpreter().state().running);
}

//! Decoding trace output against the test symbol tables.

mod common;

use std::sync::Arc;

use udw_toolchain_core::{Decoder, MemorySink, Outcome, RenderSink, Shared, SourceSink, Tag};
use udw_toolchain_symbols::SymbolStore;

struct Fixture {
    decoder: Decoder,
    shared: Arc<Shared>,
    symbols: Arc<SymbolStore>,
    sink: Arc<MemorySink>,
}

fn fixture() -> Fixture {
    let symbols = Arc::new(SymbolStore::new(common::tables()));
    let shared = Arc::new(Shared::new());
    let sink = Arc::new(MemorySink::new());
    let render: Arc<dyn RenderSink> = Arc::<MemorySink>::clone(&sink);
    let source: Arc<dyn SourceSink> = Arc::<MemorySink>::clone(&sink);
    let decoder = Decoder::new(Arc::clone(&symbols), Arc::clone(&shared), render, source)
        .with_prompt("> ");
    Fixture {
        decoder,
        shared,
        symbols,
        sink,
    }
}

fn last_text(sink: &MemorySink) -> String {
    sink.texts().pop().unwrap_or_default()
}

#[test]
fn flow_call_names_its_arguments() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("+0A F12(3,4)"), Outcome::Event);
    assert_eq!(last_text(&fx.sink), "flow_pen_load(x=3, y=4)");
    assert_eq!(fx.decoder.frames().len(), 1);
    assert_eq!(fx.decoder.frames().get(1).unwrap().flow, "flow_pen_load");

    let line = fx.sink.lines().pop().unwrap();
    assert_eq!(line.depth, 0);
    assert!(line.has_tag(Tag::Named));
    assert!(line.has_tag(Tag::Args));
}

#[test]
fn return_pops_the_frame_and_names_the_value() {
    let mut fx = fixture();
    fx.decoder.decode("+0A F12(3,4)");
    assert_eq!(fx.decoder.decode("+5A R12=0"), Outcome::Event);
    assert_eq!(last_text(&fx.sink), "flow_pen_load -> STATUS_OK");
    assert!(fx.decoder.frames().is_empty());
    assert_eq!(fx.decoder.clock(), 5);
}

#[test]
fn unmatched_return_leaves_frames_alone() {
    let mut fx = fixture();
    fx.decoder.decode("A F12(1,2)");
    assert_eq!(fx.decoder.decode("A R13"), Outcome::Event);
    assert_eq!(last_text(&fx.sink), "flow_pen_eject returned");
    assert_eq!(fx.decoder.frames().len(), 1);
}

#[test]
fn a_new_call_at_the_same_depth_replaces_deeper_frames() {
    let mut fx = fixture();
    fx.decoder.decode("A F12(1,2)");
    fx.decoder.decode("B F13()");
    assert_eq!(fx.decoder.frames().len(), 2);
    fx.decoder.decode("A F13()");
    assert_eq!(fx.decoder.frames().len(), 1);
    assert_eq!(fx.decoder.frames().get(1).unwrap().flow, "flow_pen_eject");
}

#[test]
fn locals_resolve_through_the_enclosing_flow() {
    let mut fx = fixture();
    fx.decoder.decode("A F12(1,2)");
    fx.decoder.decode("B L1=5");
    assert_eq!(last_text(&fx.sink), "slot = 5");
    fx.decoder.decode("B L2=6");
    assert_eq!(last_text(&fx.sink), "count = 6");

    let frame = fx.decoder.frames().get(1).unwrap();
    assert_eq!(frame.locals.get("slot").map(String::as_str), Some("5"));
    assert_eq!(frame.locals.get("count").map(String::as_str), Some("6"));
}

#[test]
fn local_without_a_frame_keeps_its_number() {
    let mut fx = fixture();
    fx.decoder.decode("C L1=5");
    assert_eq!(last_text(&fx.sink), "L1 = 5");
}

#[test]
fn global_writes_show_index_and_value() {
    let mut fx = fixture();
    fx.decoder.decode("A G6[2]=9");
    assert_eq!(last_text(&fx.sink), "g_table[2] = 9 (STATUS_JAM?)");
    fx.decoder.decode("A G5=12");
    assert_eq!(last_text(&fx.sink), "g_speed = 12");
}

#[test]
fn unknown_id_marks_symbols_stale_once() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("A F99(1)"), Outcome::ProtocolMismatch);
    assert!(fx.shared.symbols_stale());
    assert_eq!(fx.decoder.decode("A F98(1)"), Outcome::ProtocolMismatch);

    let warnings = fx
        .sink
        .lines()
        .into_iter()
        .filter(|l| l.has_tag(Tag::Warning))
        .count();
    assert_eq!(warnings, 1);
    // The raw text is still shown.
    assert!(fx.sink.texts().iter().any(|t| t == "A F98(1)"));
}

#[test]
fn new_symbol_generation_drops_frames() {
    let mut fx = fixture();
    fx.decoder.decode("A F12(1,2)");
    assert_eq!(fx.decoder.frames().len(), 1);
    fx.symbols.replace(common::tables());
    fx.decoder.decode("hello");
    assert!(fx.decoder.frames().is_empty());
}

#[test]
fn breakpoint_shows_source_and_records_the_stop() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("A B42"), Outcome::Event);
    assert_eq!(
        last_text(&fx.sink),
        "breakpoint at pen.fml:7136 in flow_pen_load"
    );
    assert!(fx.shared.at_breakpoint.is_set());
    assert_eq!(fx.sink.sources(), vec![("pen.fml".to_string(), 7136, 7136)]);

    let stop = fx.shared.take_stop().unwrap();
    assert_eq!((stop.file.as_str(), stop.line), ("pen.fml", 7136));
}

#[test]
fn breakpoint_at_unknown_offset_is_a_compatibility_error() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("A B7"), Outcome::ResolutionFailure);
    assert!(fx.shared.compat_error());
    assert!(!fx.shared.at_breakpoint.is_set());
    assert!(fx.sink.sources().is_empty());
}

#[test]
fn reply_is_annotated_with_the_pending_query() {
    let mut fx = fixture();
    fx.shared.set_last_query("g_speed");
    assert_eq!(fx.decoder.decode("42;"), Outcome::Reply);
    assert_eq!(last_text(&fx.sink), "g_speed = 42");
    assert_eq!(fx.shared.last_reply().as_deref(), Some("42"));

    // The query is consumed by the first reply.
    fx.decoder.decode("43;");
    assert_eq!(last_text(&fx.sink), "43");
}

#[test]
fn error_replies_are_flagged() {
    let mut fx = fixture();
    fx.decoder.decode("ERROR bad id;");
    assert!(fx.sink.lines().pop().unwrap().has_tag(Tag::Error));
}

#[test]
fn flash_ready_sets_the_signal() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("Ready for data"), Outcome::FlashReady);
    assert!(fx.shared.ready_for_data.is_set());
}

#[test]
fn dsid_traps_and_state_changes_are_named() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("DSID TRAP 301 at boot"), Outcome::DsidTrap);
    assert!(last_text(&fx.sink).contains("DSID_PAPER_OUT (301)"));

    assert_eq!(fx.decoder.decode("pen state 1 -> 2"), Outcome::StateChange);
    assert!(last_text(&fx.sink).starts_with("pen state "));
}

#[test]
fn prompt_and_plain_text() {
    let mut fx = fixture();
    assert_eq!(fx.decoder.decode("> "), Outcome::Prompt);
    assert!(fx.sink.lines().pop().unwrap().has_tag(Tag::Prompt));
    assert_eq!(fx.decoder.decode("booting..."), Outcome::Text);
    assert_eq!(last_text(&fx.sink), "booting...");
}

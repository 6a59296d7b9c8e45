//! The trace decoder.
//!
//! Turns one line at a time into rendered output. Trace events are resolved
//! against the current symbol snapshot; everything else goes through the
//! fallback patterns. Decoding never fails: unknown ids and unresolvable
//! offsets degrade to plain text and set a flag on [`Shared`].

pub mod fallback;
pub mod frames;
pub mod grammar;

use std::sync::Arc;

use udw_toolchain_symbols::{SymbolStore, SymbolTables};

use crate::mask::TraceMask;
use crate::render::{RenderSink, RenderedLine, SourceSink, Tag};
use crate::shared::Shared;

pub use fallback::{FallbackLine, classify};
pub use frames::{Frame, FrameStack};
pub use grammar::{TraceEvent, parse_event};

/// What the decoder made of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A trace event, fully resolved.
    Event,
    /// A trace event whose id is not in the symbol tables; shown as text.
    ProtocolMismatch,
    /// A breakpoint/assert offset with no statement; shown with the raw id.
    ResolutionFailure,
    /// A DSID trap or error report.
    DsidTrap,
    /// A state machine transition.
    StateChange,
    /// The target is ready for a firmware payload.
    FlashReady,
    /// A reply to a query.
    Reply,
    /// The target's prompt.
    Prompt,
    /// Anything else.
    Text,
}

/// Stateful line decoder. Owned by the consumer thread.
pub struct Decoder {
    symbols: Arc<SymbolStore>,
    generation: u64,
    frames: FrameStack,
    clock: u64,
    prompt: String,
    shared: Arc<Shared>,
    render: Arc<dyn RenderSink>,
    source: Arc<dyn SourceSink>,
}

impl Decoder {
    /// A decoder with an empty frame stack.
    pub fn new(
        symbols: Arc<SymbolStore>,
        shared: Arc<Shared>,
        render: Arc<dyn RenderSink>,
        source: Arc<dyn SourceSink>,
    ) -> Self {
        let generation = symbols.generation();
        Self {
            symbols,
            generation,
            frames: FrameStack::new(),
            clock: 0,
            prompt: String::new(),
            shared,
            render,
            source,
        }
    }

    /// Recognize `prompt` as the target's prompt line.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Live call frames.
    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Decoder clock (sum of relative times, or the last absolute time).
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Decode one line and emit the result.
    pub fn decode(&mut self, line: &str) -> Outcome {
        let tables = self.snapshot();
        if let Some(event) = parse_event(line) {
            match self.decode_event(&tables, &event) {
                Some(outcome) => return outcome,
                None => {
                    if self.shared.mark_symbols_stale() {
                        crate::render::warning(
                            &*self.render,
                            format!(
                                "symbols may be stale: no {} id {} ({})",
                                table_name(event.kind),
                                event.id,
                                line.trim()
                            ),
                        );
                    } else {
                        log::debug!("unknown {}{} in {line:?}", event.kind, event.id);
                    }
                    self.fallback(&tables, line);
                    return Outcome::ProtocolMismatch;
                }
            }
        }
        self.fallback(&tables, line)
    }

    /// Current snapshot; a new generation drops the frames built on the old one.
    fn snapshot(&mut self) -> Arc<SymbolTables> {
        let generation = self.symbols.generation();
        if generation != self.generation {
            log::debug!("symbols changed (generation {generation}); dropping frames");
            self.generation = generation;
            self.frames.clear();
        }
        self.symbols.snapshot()
    }

    fn emit(&self, line: RenderedLine) {
        self.render.emit(line);
    }

    // ── Trace events ────────────────────────────────────────────────────

    /// `None` when the id is unknown to its table.
    fn decode_event(&mut self, tables: &SymbolTables, ev: &TraceEvent<'_>) -> Option<Outcome> {
        match ev.kind {
            'F' => {
                let flow = tables.flow(ev.id)?;
                self.tick(ev);
                self.frames.truncate_deeper(ev.depth);
                self.frames
                    .push(ev.depth + 1, Frame::new(&flow.name, self.clock));
                let args = render_args(tables, &flow.args, &flow.arg_domains, ev.args);
                self.emit_call(ev, &flow.name, args);
            }
            'K' => {
                let keyword = tables.keyword(ev.id)?;
                self.tick(ev);
                self.frames.truncate_deeper(ev.depth);
                let args = render_args(tables, &keyword.args, &keyword.arg_domains, ev.args);
                self.emit_call(ev, &keyword.name, args);
            }
            'R' => {
                let flow = tables.flow(ev.id)?;
                self.tick(ev);
                if !self.frames.pop_matching(ev.depth + 1, &flow.name) {
                    log::debug!("return from {} without a matching frame", flow.name);
                }
                self.emit_return(tables, ev, &flow.name, flow.value_domain.as_deref());
            }
            'r' => {
                let keyword = tables.keyword(ev.id)?;
                self.tick(ev);
                self.emit_return(tables, ev, &keyword.name, keyword.value_domain.as_deref());
            }
            'G' => {
                let global = tables.global(ev.id)?;
                self.tick(ev);
                let mut line = self.start_line(ev);
                line.push(&global.name, Tag::Named);
                if let Some(index) = ev.index {
                    line.push(format!("[{index}]"), Tag::Args);
                }
                if let Some(value) = ev.result {
                    line.push(" = ", Tag::Default);
                    line.push(
                        tables.render_value(global.value_domain.as_deref(), value),
                        Tag::Number,
                    );
                }
                self.emit(line);
            }
            'L' => {
                self.tick(ev);
                self.local_write(tables, ev);
            }
            'B' | 'A' => {
                self.tick(ev);
                return Some(self.stop_event(tables, ev));
            }
            'T' => {
                self.tick(ev);
                let mask = TraceMask(ev.id);
                let line = self
                    .start_line(ev)
                    .span("trace ", Tag::Info)
                    .span(mask.to_string(), Tag::Named);
                self.emit(line);
            }
            _ => {
                let mut line = RenderedLine::new(ev.depth);
                line.push(ev_text(ev), Tag::Default);
                self.emit(line);
            }
        }
        Some(Outcome::Event)
    }

    fn tick(&mut self, ev: &TraceEvent<'_>) {
        if let Some(time) = ev.time {
            self.clock = if ev.relative {
                self.clock.saturating_add(time)
            } else {
                time
            };
        }
    }

    fn start_line(&self, ev: &TraceEvent<'_>) -> RenderedLine {
        let mut line = RenderedLine::new(ev.depth);
        if let Some(header) = ev.header {
            line.push(format!("{header}: "), Tag::Comment);
        }
        line
    }

    fn emit_call(&self, ev: &TraceEvent<'_>, name: &str, args: String) {
        let mut line = self.start_line(ev);
        line.push(name, Tag::Named);
        line.push(format!("({args})"), Tag::Args);
        line.push(ev.rest.trim_end(), Tag::Default);
        self.emit(line);
    }

    fn emit_return(
        &self,
        tables: &SymbolTables,
        ev: &TraceEvent<'_>,
        name: &str,
        domain: Option<&str>,
    ) {
        let mut line = self.start_line(ev);
        line.push(name, Tag::Named);
        match ev.result {
            Some(value) => {
                line.push(" -> ", Tag::Default);
                line.push(tables.render_value(domain, value), Tag::Number);
            }
            None => line.push(" returned", Tag::Default),
        }
        self.emit(line);
    }

    fn local_write(&mut self, tables: &SymbolTables, ev: &TraceEvent<'_>) {
        let value = ev
            .result
            .map(|v| tables.render_value(None, v))
            .unwrap_or_default();
        let name = self
            .frames
            .get(ev.depth)
            .and_then(|frame| tables.flow_by_name(&frame.flow))
            .and_then(|flow| local_name(&flow.locals, ev.id))
            .map(str::to_string);

        let mut line = self.start_line(ev);
        match name {
            Some(name) => {
                if let Some(frame) = self.frames.get_mut(ev.depth) {
                    frame.locals.insert(name.clone(), value.clone());
                }
                line.push(name, Tag::Named);
            }
            None => line.push(format!("L{}", ev.id), Tag::Named),
        }
        if ev.result.is_some() {
            line.push(" = ", Tag::Default);
            line.push(value, Tag::Number);
        }
        self.emit(line);
    }

    fn stop_event(&mut self, tables: &SymbolTables, ev: &TraceEvent<'_>) -> Outcome {
        let (what, tag) = if ev.kind == 'B' {
            ("breakpoint", Tag::Info)
        } else {
            ("assert", Tag::Warning)
        };
        let Some(stmt) = tables.statement_at(ev.id) else {
            self.shared.mark_compat_error();
            log::warn!("{what} at unknown offset {}", ev.id);
            let line = self
                .start_line(ev)
                .span(format!("{what} at offset "), tag)
                .span(ev.id.to_string(), Tag::Number);
            self.emit(line);
            return Outcome::ResolutionFailure;
        };

        self.shared.set_stop(&stmt.file, stmt.line);
        self.shared.at_breakpoint.set();
        let mut line = self
            .start_line(ev)
            .span(format!("{what} at "), tag)
            .span(format!("{}:{}", stmt.file, stmt.line), Tag::Named);
        if !stmt.flow.is_empty() {
            line.push(format!(" in {}", stmt.flow), Tag::Comment);
        }
        self.emit(line);
        self.source.show(&stmt.file, stmt.line, stmt.line);
        Outcome::Event
    }

    // ── Non-trace lines ─────────────────────────────────────────────────

    fn fallback(&self, tables: &SymbolTables, line: &str) -> Outcome {
        if !self.prompt.is_empty() && line.trim_end() == self.prompt.trim_end() {
            self.emit(RenderedLine::tagged(Tag::Prompt, line));
            return Outcome::Prompt;
        }
        match classify(line) {
            FallbackLine::DsidTrap { kind, id, rest } => {
                let name = tables
                    .dsid(id)
                    .map_or_else(|| id.to_string(), |d| format!("{} ({id})", d.name));
                let out = RenderedLine::new(0)
                    .span(format!("DSID {kind} "), Tag::Error)
                    .span(name, Tag::Named)
                    .span(rest, Tag::Default);
                self.emit(out);
                Outcome::DsidTrap
            }
            FallbackLine::StateChange { machine, from, to } => {
                let out = RenderedLine::new(0)
                    .span(format!("{machine} state "), Tag::Info)
                    .span(fallback::state_name(from), Tag::Named)
                    .span(" -> ", Tag::Default)
                    .span(fallback::state_name(to), Tag::Named);
                self.emit(out);
                Outcome::StateChange
            }
            FallbackLine::FlashReady => {
                self.shared.ready_for_data.set();
                self.emit(RenderedLine::tagged(Tag::Info, line));
                Outcome::FlashReady
            }
            FallbackLine::Reply(payload) => {
                self.shared.set_last_reply(payload);
                let mut out = RenderedLine::new(0);
                if let Some(query) = self.shared.take_last_query() {
                    out.push(format!("{query} = "), Tag::Comment);
                }
                let tag = if payload.starts_with("ERROR") || payload.starts_with("UNKNOWN") {
                    Tag::Error
                } else {
                    Tag::Number
                };
                out.push(payload, tag);
                self.emit(out);
                Outcome::Reply
            }
            FallbackLine::Text => {
                self.emit(RenderedLine::tagged(Tag::Default, line));
                Outcome::Text
            }
        }
    }
}

fn table_name(kind: char) -> &'static str {
    match kind {
        'F' | 'R' => "flow",
        'K' | 'r' => "keyword",
        'G' => "global",
        _ => "symbol",
    }
}

/// The raw event text without time and header, for types with no table.
fn ev_text(ev: &TraceEvent<'_>) -> String {
    let mut text = format!("{}{}", ev.kind, ev.id);
    if let Some(args) = ev.args {
        text.push_str(&format!("({args})"));
    }
    if let Some(index) = ev.index {
        text.push_str(&format!("[{index}]"));
    }
    if let Some(result) = ev.result {
        text.push_str(&format!("={result}"));
    }
    text.push_str(ev.rest.trim_end());
    text
}

/// Local `index` counted from the end of `locals` (1 = last).
fn local_name(locals: &[String], index: u32) -> Option<&str> {
    let index = usize::try_from(index).ok()?;
    if index == 0 || index > locals.len() {
        return None;
    }
    Some(locals[locals.len() - index].as_str())
}

/// `x=3, y=RED` from the declared argument names and the raw wire values.
fn render_args(
    tables: &SymbolTables,
    names: &[String],
    domains: &[Option<String>],
    raw: Option<&str>,
) -> String {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return String::new();
    };
    raw.split(',')
        .enumerate()
        .map(|(i, arg)| {
            let arg = arg.trim();
            let value = match arg.parse::<i64>() {
                Ok(v) => {
                    let domain = domains.get(i).and_then(Option::as_deref);
                    tables.render_value(domain, v)
                }
                Err(_) => arg.to_string(),
            };
            match names.get(i) {
                Some(name) => format!("{name}={value}"),
                None => value,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

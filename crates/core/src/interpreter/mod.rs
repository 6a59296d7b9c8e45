//! The command interpreter.
//!
//! Runs on the caller's thread. It is the only writer to the target, so a
//! multi-line sequence (function invocation) always goes out uninterrupted.
//! Failures of individual commands are rendered and never end the session;
//! only [`SessionError`]s are returned.

pub mod command;
pub mod cursor;

use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use udw_toolchain_symbols::SymbolStore;
use udw_toolchain_transport::{ConnectionSpec, LastPortStore, PortError};

use crate::pipeline::Pipeline;
use crate::render::{self, RenderedLine, Tag};
use crate::session::{SessionError, Sinks};
use crate::shared::Shared;
use crate::signal::WaitResult;
use crate::target::{FlashError, FlashReport, StepOutcome, Target};

pub use command::{Command, ListMove, TraceVerb, parse};
pub use cursor::ListCursor;

/// Default time `sync` waits for its echo.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence after a `sync` that also counts as synchronized.
const SYNC_QUIET: Duration = Duration::from_secs(1);

/// Nesting limit for `source` scripts.
const MAX_SOURCE_DEPTH: usize = 8;

/// Whether the session goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading commands.
    Continue,
    /// `quit` was entered.
    Quit,
}

/// Interpreter settings.
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// Symbol file for `reload` and `compile`.
    pub symbols_path: Option<PathBuf>,
    /// Host command run by `compile`.
    pub build_command: Option<String>,
    /// Default `sync` timeout.
    pub sync_timeout: Option<Duration>,
    /// Where a manual connect is remembered.
    pub last_port: Option<LastPortStore>,
}

/// Interpreter state besides the shared signals.
#[derive(Debug, Clone)]
pub struct InterpreterState {
    /// Cleared by `quit`.
    pub running: bool,
    /// Whether commands may re-open the gate (`pause` forbids it).
    pub unpause_allowed: bool,
}

/// Dispatches parsed commands.
pub struct Interpreter {
    target: Target,
    pipeline: Pipeline,
    symbols: Arc<SymbolStore>,
    shared: Arc<Shared>,
    sinks: Sinks,
    config: InterpreterConfig,
    state: InterpreterState,
    history: Vec<String>,
    cursor: ListCursor,
    source_depth: usize,
}

impl Interpreter {
    /// Wire an interpreter to its target and pipeline.
    pub fn new(
        target: Target,
        pipeline: Pipeline,
        symbols: Arc<SymbolStore>,
        shared: Arc<Shared>,
        sinks: Sinks,
        config: InterpreterConfig,
    ) -> Self {
        Self {
            target,
            pipeline,
            symbols,
            shared,
            sinks,
            config,
            state: InterpreterState {
                running: true,
                unpause_allowed: true,
            },
            history: Vec::new(),
            cursor: ListCursor::new(),
            source_depth: 0,
        }
    }

    /// The target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The pipeline, mutably.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Interpreter state.
    pub fn state(&self) -> &InterpreterState {
        &self.state
    }

    /// Inputs entered so far.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Parse and run one input line.
    pub fn execute(&mut self, input: &str) -> Result<Flow, SessionError> {
        let line = input.trim();
        if !line.is_empty() {
            self.history.push(line.to_string());
        }
        let command = parse(line, &self.symbols.snapshot());
        log::debug!("{line:?} -> {command:?}");
        let flow = self.dispatch(command)?;
        if self.state.unpause_allowed {
            self.shared.gate.set();
        }
        Ok(flow)
    }

    fn render(&self) -> &dyn render::RenderSink {
        &*self.sinks.render
    }

    fn dispatch(&mut self, command: Command) -> Result<Flow, SessionError> {
        match &command {
            Command::Resume | Command::Unpause => {
                self.state.unpause_allowed = true;
                self.shared.gate.set();
            }
            Command::Pause => {
                self.state.unpause_allowed = false;
                self.shared.gate.clear();
            }
            Command::Comment(text) => {
                self.sinks
                    .render
                    .emit(RenderedLine::tagged(Tag::Comment, format!("# {text}")));
            }
            Command::Shell(cmd) => self.run_shell(cmd),
            Command::History => {
                let lines: Vec<RenderedLine> = self
                    .history
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        RenderedLine::new(0)
                            .span(format!("{:>4}  ", i + 1), Tag::Number)
                            .span(h.clone(), Tag::Default)
                    })
                    .collect();
                for line in lines {
                    self.sinks.render.emit(line);
                }
            }
            Command::Rotate => match self.sinks.backup.rotate() {
                Ok(()) => render::info(self.render(), "backup rotated"),
                Err(e) => render::error(self.render(), format!("rotate failed: {e}")),
            },
            Command::Help => {
                for text in HELP {
                    render::info(self.render(), *text);
                }
            }
            Command::Quit => {
                self.state.running = false;
                return Ok(Flow::Quit);
            }
            Command::Sync(timeout) => {
                let timeout = timeout
                    .or(self.config.sync_timeout)
                    .unwrap_or(DEFAULT_SYNC_TIMEOUT);
                self.sync(timeout);
                return Ok(Flow::Continue);
            }
            Command::Connect(input) => {
                self.connect(input.as_deref().unwrap_or_default())?;
                return Ok(Flow::Continue);
            }
            Command::Disconnect => {
                self.target.close();
                render::info(self.render(), "disconnected");
                return Ok(Flow::Continue);
            }
            Command::Reconnect => {
                let opened = self.target.reconnect();
                self.after_open(opened);
                return Ok(Flow::Continue);
            }
            Command::Reload => {
                self.reload();
                return Ok(Flow::Continue);
            }
            Command::Decode(path) => {
                if let Err(e) = self.decode_file(path) {
                    render::error(self.render(), e.to_string());
                }
                return Ok(Flow::Continue);
            }
            Command::Flash(path) => {
                self.flash(path);
                return Ok(Flow::Continue);
            }
            Command::Compile => {
                self.compile();
                return Ok(Flow::Continue);
            }
            Command::Download(path) => {
                if let Err(e) = self.download(path) {
                    render::error(self.render(), format!("download {}: {e}", path.display()));
                }
                return Ok(Flow::Continue);
            }
            Command::Source(path) => return self.source(path),
            Command::List(mv) => {
                if let Some(stop) = self.shared.take_stop() {
                    self.cursor.reset_to(stop);
                }
                match self.cursor.apply(mv) {
                    Some((file, center, mark)) => self.sinks.source.show(&file, center, mark),
                    None => render::warning(self.render(), "no current source location"),
                }
                return Ok(Flow::Continue);
            }
            Command::ConstantValue { name, value } => {
                let line = RenderedLine::new(0)
                    .span(name.clone(), Tag::Named)
                    .span(" = ", Tag::Default)
                    .span(value.to_string(), Tag::Number);
                self.sinks.render.emit(line);
                return Ok(Flow::Continue);
            }
            Command::Rejected(msg) => {
                render::warning(self.render(), msg.clone());
                return Ok(Flow::Continue);
            }
            Command::Go => self.shared.at_breakpoint.clear(),
            Command::Query { what, .. } => self.shared.set_last_query(what.clone()),
            Command::Invoke { name, args, .. } => {
                self.shared
                    .set_last_query(format!("{name}({})", args.join(", ")));
            }
            _ => {}
        }
        self.send(&command.protocol(), command.is_local());
        Ok(Flow::Continue)
    }

    /// Send protocol lines. Local no-ops are skipped quietly when nothing is
    /// connected.
    fn send(&mut self, lines: &[String], local: bool) {
        if lines.is_empty() {
            return;
        }
        if !self.target.is_open() {
            if !local {
                render::warning(self.render(), format!("not connected; dropped {:?}", lines[0]));
            }
            return;
        }
        if let Err(e) = self.target.write_sequence(lines) {
            render::error(self.render(), format!("write failed: {e}"));
        }
    }

    // ── Session commands ────────────────────────────────────────────────

    /// Open `input` (empty = last good), start its reader, and remember it.
    pub fn connect(&mut self, input: &str) -> Result<Option<ConnectionSpec>, SessionError> {
        let opened = self.target.open(input);
        let Some(spec) = self.after_open(opened) else {
            return Ok(None);
        };
        if let Some(store) = &self.config.last_port {
            store
                .save(&spec)
                .map_err(|source| SessionError::PersistLastPort {
                    path: store.path().to_path_buf(),
                    source,
                })?;
        }
        Ok(Some(spec))
    }

    /// Open `input` without the interactive fallback: errors are returned.
    pub fn connect_strict(&mut self, input: &str) -> Result<ConnectionSpec, SessionError> {
        let spec = self
            .target
            .open(input)
            .map_err(|source| SessionError::Connect {
                input: input.to_string(),
                source,
            })?;
        self.attach_reader();
        render::info(self.render(), format!("connected to {}", self.target.describe()));
        if let Some(store) = &self.config.last_port {
            store
                .save(&spec)
                .map_err(|source| SessionError::PersistLastPort {
                    path: store.path().to_path_buf(),
                    source,
                })?;
        }
        Ok(spec)
    }

    fn after_open(&mut self, opened: Result<ConnectionSpec, PortError>) -> Option<ConnectionSpec> {
        match opened {
            Ok(spec) => {
                self.attach_reader();
                render::info(self.render(), format!("connected to {}", self.target.describe()));
                Some(spec)
            }
            Err(e) => {
                render::error(self.render(), format!("connect failed: {e}"));
                None
            }
        }
    }

    fn attach_reader(&mut self) {
        match self.target.reader() {
            Ok(reader) => {
                let terminator = self.target.terminator();
                self.pipeline.attach(reader, terminator);
            }
            Err(e) => render::error(self.render(), format!("no reader for the port: {e}")),
        }
    }

    /// Disconnect on purpose.
    pub fn disconnect(&mut self) {
        self.target.close();
    }

    fn sync(&mut self, timeout: Duration) {
        self.shared.sync_seen.clear();
        let sent = Instant::now();
        let echo = Command::Sync(None).protocol();
        self.send(&echo, false);
        if !self.target.is_open() {
            return;
        }
        let deadline = sent + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = remaining.min(Duration::from_millis(100));
            match self.shared.sync_seen.wait_timeout(slice, &self.shared.cancel) {
                WaitResult::Set | WaitResult::Cancelled => return,
                WaitResult::TimedOut => {}
            }
            if self.shared.activity.quiet_since(sent, SYNC_QUIET) {
                log::debug!("sync: output went quiet");
                return;
            }
            if Instant::now() >= deadline {
                render::warning(
                    self.render(),
                    format!("sync timed out after {:.1}s", timeout.as_secs_f64()),
                );
                return;
            }
        }
    }

    /// Reread the symbol file.
    pub fn reload(&mut self) -> bool {
        let Some(path) = self.config.symbols_path.clone() else {
            render::warning(self.render(), "no symbol file configured");
            return false;
        };
        match self.symbols.reload(&path) {
            Ok(generation) => {
                self.shared.clear_symbol_flags();
                let build = self.symbols.snapshot().build.clone();
                render::info(
                    self.render(),
                    format!(
                        "symbols reloaded from {} (generation {generation}{})",
                        path.display(),
                        build.map(|b| format!(", build {b}")).unwrap_or_default()
                    ),
                );
                true
            }
            Err(e) => {
                render::error(self.render(), format!("reload failed: {e}"));
                false
            }
        }
    }

    /// Push every line of a saved log through the decoder.
    pub fn decode_file(&mut self, path: &Path) -> Result<usize, SessionError> {
        let io_err = |source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::open(path).map_err(io_err)?;
        let mut count = 0;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err)?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            self.pipeline.push(line);
            count += 1;
        }
        log::info!("queued {count} lines from {}", path.display());
        Ok(count)
    }

    fn flash(&mut self, path: &Path) {
        let report = match self.target.flash(path) {
            Ok(report) => {
                self.show_report(&report);
                render::info(self.render(), format!("flashed {}", path.display()));
                Some(report)
            }
            Err(e) => {
                let report = match &e {
                    FlashError::FlashConnect { report, .. } | FlashError::Transfer { report, .. } => {
                        self.show_report(report);
                        Some(report.clone())
                    }
                    _ => None,
                };
                render::error(self.render(), format!("flash failed: {e}"));
                report
            }
        };
        // The old reader went quiet with the old port; the restored one needs its own.
        if report.is_some_and(|r| r.restored()) {
            self.attach_reader();
        }
    }

    fn show_report(&self, report: &FlashReport) {
        for (step, outcome) in &report.steps {
            let (text, tag) = match outcome {
                StepOutcome::Done => ("done".to_string(), Tag::Info),
                StepOutcome::Skipped => ("skipped".to_string(), Tag::Comment),
                StepOutcome::TimedOut => ("timed out, continuing".to_string(), Tag::Warning),
                StepOutcome::Failed(msg) => (format!("failed: {msg}"), Tag::Error),
            };
            let line = RenderedLine::new(0)
                .span(format!("flash: {step}: "), Tag::Comment)
                .span(text, tag);
            self.sinks.render.emit(line);
        }
    }

    fn compile(&mut self) {
        let Some(cmd) = self.config.build_command.clone() else {
            render::warning(self.render(), "no build command configured");
            return;
        };
        if self.run_host(&cmd) {
            self.reload();
        } else {
            render::error(self.render(), "build failed; symbols not reloaded");
        }
    }

    fn run_shell(&mut self, cmd: &str) {
        if cmd.is_empty() {
            return;
        }
        self.run_host(cmd);
    }

    /// Run `cmd` through `sh -c`, rendering its output. `true` on success.
    fn run_host(&self, cmd: &str) -> bool {
        log::info!("running `{cmd}`");
        match Process::new("sh").arg("-c").arg(cmd).output() {
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    self.sinks
                        .render
                        .emit(RenderedLine::tagged(Tag::Default, line));
                }
                for line in String::from_utf8_lossy(&output.stderr).lines() {
                    self.sinks
                        .render
                        .emit(RenderedLine::tagged(Tag::Warning, line));
                }
                if !output.status.success() {
                    render::error(self.render(), format!("`{cmd}` exited with {}", output.status));
                }
                output.status.success()
            }
            Err(e) => {
                render::error(self.render(), format!("cannot run `{cmd}`: {e}"));
                false
            }
        }
    }

    fn download(&mut self, path: &Path) -> io::Result<()> {
        let text = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        if !self.target.is_open() {
            render::warning(self.render(), "not connected; nothing downloaded");
            return Ok(());
        }
        match self.target.write_sequence(lines.as_slice()) {
            Ok(()) => render::info(
                self.render(),
                format!("downloaded {} lines from {}", lines.len(), path.display()),
            ),
            Err(e) => render::error(self.render(), format!("download interrupted: {e}")),
        }
        Ok(())
    }

    fn source(&mut self, path: &Path) -> Result<Flow, SessionError> {
        if self.source_depth >= MAX_SOURCE_DEPTH {
            render::error(self.render(), format!("{}: scripts nested too deeply", path.display()));
            return Ok(Flow::Continue);
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                render::error(self.render(), format!("source {}: {e}", path.display()));
                return Ok(Flow::Continue);
            }
        };
        self.source_depth += 1;
        let mut result = Ok(Flow::Continue);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match self.execute(line) {
                Ok(Flow::Continue) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.source_depth -= 1;
        result
    }

    /// Stop the pipeline threads and close the port.
    pub fn shutdown(&mut self) {
        self.target.close();
        self.pipeline.shutdown();
    }
}

const HELP: &[&str] = &[
    "pause | unpause | history | rotate | help | quit",
    "sync [secs] | connect [spec] | disconnect | reconnect | reload",
    "decode <file> | flash <file> | compile | download <file> | source <file>",
    "break <flow|global [value]|file:line|offset> | clear [where] | step | next | finish | go",
    "list [file:line|flow] | l | l+ | l- | l.",
    "trace|tick|tock|sweep <flow global local keyword slow off|names> | trace reset",
    "name(args) | name | name = value | name[i] | name[i] = value",
    "# comment | !shell command | anything else is sent as is",
];

//! Command grammar.
//!
//! [`parse`] runs an ordered list of matchers over one input line; the first
//! that claims the line decides the [`Command`]. Formatting the protocol
//! text ([`Command::protocol`]) depends only on the command and the symbol
//! tables, never on the transport.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use udw_toolchain_symbols::SymbolTables;

use crate::mask::TraceMask;
use crate::shared::SYNC_TOKEN;

/// File extensions that keep a dotted line from being a pass-through command.
pub const FILE_EXTENSIONS: [&str; 8] = [".fml", ".lua", ".bin", ".dmp", ".fw", ".txt", ".log", ".json"];

static INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*\((.*)\)\s*$").expect("invocation pattern compiles")
});

static VALUE_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(?:\[\s*([^\]]+?)\s*\])?\s*(?:=\s*(.+?))?\s*$")
        .expect("value access pattern compiles")
});

static FILE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+):(\d+)$").expect("file:line pattern compiles"));

/// Trace control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceVerb {
    /// `trace`: the persistent trace mask.
    Trace,
    /// `tick`: timing on entry.
    Tick,
    /// `tock`: timing on exit.
    Tock,
    /// `sweep`: one-shot trace.
    Sweep,
}

impl TraceVerb {
    fn from_word(word: &str) -> Option<TraceVerb> {
        match word {
            "trace" => Some(TraceVerb::Trace),
            "tick" => Some(TraceVerb::Tick),
            "tock" => Some(TraceVerb::Tock),
            "sweep" => Some(TraceVerb::Sweep),
            _ => None,
        }
    }

    /// The verb as typed.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceVerb::Trace => "trace",
            TraceVerb::Tick => "tick",
            TraceVerb::Tock => "tock",
            TraceVerb::Sweep => "sweep",
        }
    }
}

/// Movement of the source listing cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListMove {
    /// `list`, `l`, `l+`: next window.
    Forward,
    /// `l-`: previous window.
    Back,
    /// `l.`: back to the last stop location.
    Stop,
    /// `list file:line` or `list <flow>`.
    At {
        /// Source file.
        file: String,
        /// Line to center on.
        line: u32,
    },
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty line: resume the display.
    Resume,
    /// `# text`.
    Comment(String),
    /// `!cmd`: run a host shell command.
    Shell(String),
    /// `pause`.
    Pause,
    /// `unpause` / `resume`.
    Unpause,
    /// `history`.
    History,
    /// `rotate`: start a fresh raw backup.
    Rotate,
    /// `help`.
    Help,
    /// `quit` / `exit`.
    Quit,
    /// `sync [secs]`.
    Sync(Option<Duration>),
    /// `connect [spec]`.
    Connect(Option<String>),
    /// `disconnect`.
    Disconnect,
    /// `reconnect`.
    Reconnect,
    /// `reload`: reread the symbol file.
    Reload,
    /// `decode <file>`: replay a saved log.
    Decode(PathBuf),
    /// `flash <file>`.
    Flash(PathBuf),
    /// `compile`: run the build command, then reload.
    Compile,
    /// `download <file>`: send a file's lines to the target.
    Download(PathBuf),
    /// `source <file>`: execute a command script.
    Source(PathBuf),
    /// A fixed command string.
    Macro(&'static str),
    /// A resolved breakpoint command.
    Break(String),
    /// `clear` (all) or `clear <offset>`.
    Clear(Option<u32>),
    /// `step`.
    Step,
    /// `next`.
    Next,
    /// `finish`.
    Finish,
    /// `go`.
    Go,
    /// Source listing.
    List(ListMove),
    /// Trace control. `mask == None` queries the current setting.
    Trace {
        /// Which verb.
        verb: TraceVerb,
        /// Category bits, if any tokens were given.
        mask: Option<u32>,
        /// `F<id>` / `K<id>` selectors.
        ids: Vec<String>,
    },
    /// `trace reset`.
    TraceReset,
    /// `name(args)` for a known flow or keyword.
    Invoke {
        /// Name as typed.
        name: String,
        /// `F<id>` or `K<id>`.
        callee: String,
        /// Resolved argument values.
        args: Vec<String>,
    },
    /// Read a DSID, global, or array element.
    Query {
        /// What was asked, for annotating the reply.
        what: String,
        /// Protocol text.
        protocol: String,
    },
    /// Write a DSID, global, array element, or constant.
    Assign(String),
    /// A constant's value, answered from the symbol tables.
    ConstantValue {
        /// Constant name.
        name: String,
        /// Its value.
        value: i64,
    },
    /// A dotted protocol command, sent verbatim.
    PassThrough(String),
    /// Anything else, sent verbatim.
    Raw(String),
    /// Recognized but unusable.
    Rejected(String),
}

impl Command {
    /// Whether this command is handled without sending a real command.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Command::Resume
                | Command::Comment(_)
                | Command::Shell(_)
                | Command::Pause
                | Command::Unpause
                | Command::History
                | Command::Rotate
                | Command::Help
        )
    }

    /// Protocol lines this command sends, in order.
    ///
    /// Local-only commands send one empty line so the target prints its
    /// prompt again. Session commands (connect, flash, ...) send nothing
    /// here.
    pub fn protocol(&self) -> Vec<String> {
        match self {
            c if c.is_local() => vec![String::new()],
            Command::Sync(_) => vec![format!("udw.echo {SYNC_TOKEN}")],
            Command::Macro(text) => vec![(*text).to_string()],
            Command::Break(text) | Command::Assign(text) => vec![text.clone()],
            Command::Clear(None) => vec!["fm.clear all".into()],
            Command::Clear(Some(offset)) => vec![format!("fm.clear {offset}")],
            Command::Step => vec!["fm.step".into()],
            Command::Next => vec!["fm.next".into()],
            Command::Finish => vec!["fm.finish".into()],
            Command::Go => vec!["fm.go".into()],
            Command::Trace { verb, mask, ids } => {
                let mut text = format!("fm.{}", verb.as_str());
                if let Some(mask) = mask {
                    text.push_str(&format!(" {mask}"));
                }
                for id in ids {
                    text.push(' ');
                    text.push_str(id);
                }
                vec![text]
            }
            Command::TraceReset => vec!["fm.trace 0".into(), "fm.trace_startup 0".into()],
            Command::Invoke { callee, args, .. } => {
                let mut lines: Vec<String> = args.iter().map(|a| format!("fm.push {a}")).collect();
                lines.push(format!("fm.call {callee}"));
                lines.push("fm.peek".into());
                lines.push("fm.pop".into());
                lines
            }
            Command::Query { protocol, .. } => vec![protocol.clone()],
            Command::PassThrough(text) | Command::Raw(text) => vec![text.clone()],
            _ => Vec::new(),
        }
    }
}

/// Parse one input line.
pub fn parse(input: &str, tables: &SymbolTables) -> Command {
    let line = input.trim();
    let matchers: [fn(&str, &SymbolTables) -> Option<Command>; 9] = [
        match_empty,
        match_escape,
        match_word,
        match_macro,
        match_debug,
        match_trace,
        match_invocation,
        match_value_access,
        match_pass_through,
    ];
    matchers
        .iter()
        .find_map(|m| m(line, tables))
        .unwrap_or_else(|| Command::Raw(line.to_string()))
}

fn split_first(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (line, ""),
    }
}

fn optional(rest: &str) -> Option<String> {
    (!rest.is_empty()).then(|| rest.to_string())
}

fn needs_file(word: &str, rest: &str, make: fn(PathBuf) -> Command) -> Command {
    if rest.is_empty() {
        Command::Rejected(format!("{word} needs a file name"))
    } else {
        make(PathBuf::from(rest))
    }
}

// ── Matchers, in order ──────────────────────────────────────────────────

fn match_empty(line: &str, _: &SymbolTables) -> Option<Command> {
    line.is_empty().then_some(Command::Resume)
}

fn match_escape(line: &str, _: &SymbolTables) -> Option<Command> {
    if let Some(text) = line.strip_prefix('#') {
        return Some(Command::Comment(text.trim().to_string()));
    }
    line.strip_prefix('!')
        .map(|cmd| Command::Shell(cmd.trim().to_string()))
}

fn match_word(line: &str, _: &SymbolTables) -> Option<Command> {
    let (word, rest) = split_first(line);
    let bare = |cmd: Command| rest.is_empty().then_some(cmd);
    match word {
        "pause" => bare(Command::Pause),
        "unpause" | "resume" => bare(Command::Unpause),
        "history" => bare(Command::History),
        "rotate" => bare(Command::Rotate),
        "help" => bare(Command::Help),
        "quit" | "exit" => bare(Command::Quit),
        "disconnect" => bare(Command::Disconnect),
        "reconnect" => bare(Command::Reconnect),
        "reload" => bare(Command::Reload),
        "compile" => bare(Command::Compile),
        "sync" => Some(if rest.is_empty() {
            Command::Sync(None)
        } else {
            match rest.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    Command::Sync(Some(Duration::from_secs_f64(secs)))
                }
                _ => Command::Rejected(format!("sync: bad timeout {rest:?}")),
            }
        }),
        "connect" => Some(Command::Connect(optional(rest))),
        "decode" => Some(needs_file(word, rest, Command::Decode)),
        "flash" => Some(needs_file(word, rest, Command::Flash)),
        "download" => Some(needs_file(word, rest, Command::Download)),
        "source" => Some(needs_file(word, rest, Command::Source)),
        _ => None,
    }
}

fn match_macro(line: &str, _: &SymbolTables) -> Option<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["door", "open"] => Some(Command::Macro("pe_digital_sensor.set MAIN_DOOR 1")),
        ["door", "close"] => Some(Command::Macro("pe_digital_sensor.set MAIN_DOOR 0")),
        _ => None,
    }
}

fn match_debug(line: &str, tables: &SymbolTables) -> Option<Command> {
    let (word, rest) = split_first(line);
    match word {
        "break" => Some(if rest.is_empty() {
            Command::Rejected("break needs a flow, global, file:line or offset".into())
        } else {
            resolve_break(rest, tables)
        }),
        "clear" => Some(if rest.is_empty() {
            Command::Clear(None)
        } else {
            match resolve_offset(rest, tables) {
                Ok(offset) => Command::Clear(Some(offset)),
                Err(msg) => Command::Rejected(msg),
            }
        }),
        "step" if rest.is_empty() => Some(Command::Step),
        "next" if rest.is_empty() => Some(Command::Next),
        "finish" if rest.is_empty() => Some(Command::Finish),
        "go" if rest.is_empty() => Some(Command::Go),
        "list" | "l" | "l+" if rest.is_empty() => Some(Command::List(ListMove::Forward)),
        "l-" if rest.is_empty() => Some(Command::List(ListMove::Back)),
        "l." if rest.is_empty() => Some(Command::List(ListMove::Stop)),
        "list" | "l" => Some(resolve_list(rest, tables)),
        _ => None,
    }
}

fn resolve_break(arg: &str, tables: &SymbolTables) -> Command {
    let (target, value) = split_first(arg);
    if value.is_empty()
        && let Some(flow) = tables.flow_by_name(target)
    {
        return Command::Break(format!("fm.break_flow {}", flow.id));
    }
    if let Some(global) = tables.global_by_name(target) {
        if value.is_empty() {
            return Command::Break(format!("fm.watch {}", global.id));
        }
        return match resolve_value(value, tables) {
            Ok(v) => Command::Break(format!("fm.watch {} {v}", global.id)),
            Err(msg) => Command::Rejected(msg),
        };
    }
    if !value.is_empty() {
        return Command::Rejected(format!("unknown breakpoint location {arg:?}"));
    }
    match resolve_offset(target, tables) {
        Ok(offset) => Command::Break(format!("fm.break {offset}")),
        Err(msg) => Command::Rejected(msg),
    }
}

/// `file:line` through the statement table, or a bare offset.
fn resolve_offset(arg: &str, tables: &SymbolTables) -> Result<u32, String> {
    if let Some(caps) = FILE_LINE.captures(arg) {
        let file = &caps[1];
        let line: u32 = caps[2]
            .parse()
            .map_err(|_| format!("bad line number in {arg:?}"))?;
        return tables
            .statement_at_line(file, line)
            .map(|s| s.offset)
            .ok_or_else(|| format!("no statement at {file}:{line}"));
    }
    arg.parse()
        .map_err(|_| format!("unknown breakpoint location {arg:?}"))
}

fn resolve_list(arg: &str, tables: &SymbolTables) -> Command {
    if let Some(caps) = FILE_LINE.captures(arg)
        && let Ok(line) = caps[2].parse()
    {
        return Command::List(ListMove::At {
            file: caps[1].to_string(),
            line,
        });
    }
    match tables.flow_by_name(arg) {
        Some(flow) => match (&flow.file, flow.line) {
            (Some(file), Some(line)) => Command::List(ListMove::At {
                file: file.clone(),
                line,
            }),
            _ => Command::Rejected(format!("no source location for {arg}")),
        },
        None => Command::Rejected(format!("cannot list {arg:?}")),
    }
}

fn match_trace(line: &str, tables: &SymbolTables) -> Option<Command> {
    let (word, rest) = split_first(line);
    let verb = TraceVerb::from_word(word)?;
    if verb == TraceVerb::Trace && rest == "reset" {
        return Some(Command::TraceReset);
    }
    if rest.is_empty() {
        return Some(Command::Trace {
            verb,
            mask: None,
            ids: Vec::new(),
        });
    }

    let mut mask = 0;
    let mut ids = Vec::new();
    for token in rest.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if let Some(bits) = TraceMask::word_bits(token) {
            mask |= bits;
        } else if let Ok(bits) = token.parse::<u32>() {
            mask |= bits;
        } else if let Some(flow) = tables.flow_by_name(token) {
            ids.push(format!("F{}", flow.id));
        } else if let Some(keyword) = tables.keyword_by_name(token) {
            ids.push(format!("K{}", keyword.id));
        } else {
            return Some(Command::Rejected(format!("{word}: unknown token {token:?}")));
        }
    }
    Some(Command::Trace {
        verb,
        mask: Some(mask),
        ids,
    })
}

fn match_invocation(line: &str, tables: &SymbolTables) -> Option<Command> {
    let caps = INVOCATION.captures(line)?;
    let name = caps.get(1)?.as_str();
    let callee = if let Some(flow) = tables.flow_by_name(name) {
        format!("F{}", flow.id)
    } else if let Some(keyword) = tables.keyword_by_name(name) {
        format!("K{}", keyword.id)
    } else {
        return None;
    };

    let raw = caps.get(2).map_or("", |m| m.as_str());
    let mut args = Vec::new();
    for arg in raw.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        match resolve_value(arg, tables) {
            Ok(v) => args.push(v),
            Err(msg) => return Some(Command::Rejected(msg)),
        }
    }
    Some(Command::Invoke {
        name: name.to_string(),
        callee,
        args,
    })
}

fn match_value_access(line: &str, tables: &SymbolTables) -> Option<Command> {
    let caps = VALUE_ACCESS.captures(line)?;
    let name = caps.get(1)?.as_str();
    let index = caps.get(2).map(|m| m.as_str());
    let value = caps.get(3).map(|m| m.as_str());

    let resolved = |v: &str| resolve_value(v, tables);

    if index.is_none()
        && let Some(dsid) = tables.dsid_by_name(name)
    {
        return Some(match value {
            None => Command::Query {
                what: name.to_string(),
                protocol: format!("dsid.get {}", dsid.id),
            },
            Some(v) => match resolved(v) {
                Ok(v) => Command::Assign(format!("dsid.set {} {v}", dsid.id)),
                Err(msg) => Command::Rejected(msg),
            },
        });
    }

    if let Some(index) = index {
        let global = tables.global_by_name(name).filter(|g| g.is_array())?;
        let index = match resolved(index) {
            Ok(i) => i,
            Err(msg) => return Some(Command::Rejected(msg)),
        };
        return Some(match value {
            None => Command::Query {
                what: format!("{name}[{index}]"),
                protocol: format!("fm.get_array {} {index}", global.id),
            },
            Some(v) => match resolved(v) {
                Ok(v) => Command::Assign(format!("fm.set_array {} {index} {v}", global.id)),
                Err(msg) => Command::Rejected(msg),
            },
        });
    }

    if let Some(constant) = tables.constant_by_name(name) {
        return Some(match value {
            None => Command::ConstantValue {
                name: name.to_string(),
                value: constant.value,
            },
            Some(_) if constant.is_enum => {
                Command::Rejected(format!("{name} is an enumeration constant"))
            }
            Some(v) => match resolved(v) {
                Ok(v) => Command::Assign(format!("fm.set_const {} {v}", constant.id)),
                Err(msg) => Command::Rejected(msg),
            },
        });
    }

    let global = tables.global_by_name(name)?;
    Some(match value {
        None => Command::Query {
            what: name.to_string(),
            protocol: format!("fm.get_global {}", global.id),
        },
        Some(v) => match resolved(v) {
            Ok(v) => Command::Assign(format!("fm.set_global {} {v}", global.id)),
            Err(msg) => Command::Rejected(msg),
        },
    })
}

fn match_pass_through(line: &str, _: &SymbolTables) -> Option<Command> {
    let lower = line.to_ascii_lowercase();
    (line.contains('.') && !FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)))
        .then(|| Command::PassThrough(line.to_string()))
}

/// A numeric literal, or a constant name replaced by its value.
fn resolve_value(text: &str, tables: &SymbolTables) -> Result<String, String> {
    let text = text.trim();
    if text.parse::<i64>().is_ok() {
        return Ok(text.to_string());
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        && let Ok(v) = i64::from_str_radix(hex, 16)
    {
        return Ok(v.to_string());
    }
    if let Some(constant) = tables.constant_by_name(text) {
        return Ok(constant.value.to_string());
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return Ok(text.to_string());
    }
    Err(format!("cannot resolve value {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use udw_toolchain_symbols::load_symbols_from_str;

    fn tables() -> SymbolTables {
        load_symbols_from_str(
            r#"{
                "flows": [{"id": 12, "name": "flow_pen_load", "args": ["x", "y"],
                           "file": "pen.fml", "line": 7100}],
                "keywords": [{"id": 3, "name": "kw_beep"}],
                "globals": [{"id": 5, "name": "g_speed"},
                            {"id": 6, "name": "g_table", "length": 8}],
                "constants": [{"id": 1, "name": "RED", "value": 2, "domain": "color", "is_enum": true},
                              {"id": 2, "name": "MAX_SPEED", "value": 90}],
                "dsids": [{"id": 301, "name": "DSID_PAPER_OUT"}],
                "statements": [{"offset": "42", "flow": "flow_pen_load", "file": "pen.fml", "line": "7136"}]
            }"#,
        )
        .unwrap()
    }

    fn proto(line: &str) -> Vec<String> {
        parse(line, &tables()).protocol()
    }

    #[test]
    fn door_macros() {
        assert_eq!(proto("door open"), ["pe_digital_sensor.set MAIN_DOOR 1"]);
        assert_eq!(proto("door  close"), ["pe_digital_sensor.set MAIN_DOOR 0"]);
    }

    #[test]
    fn break_resolution_order() {
        assert_eq!(proto("break pen:7136"), ["fm.break 42"]);
        assert_eq!(proto("break flow_pen_load"), ["fm.break_flow 12"]);
        assert_eq!(proto("break g_speed"), ["fm.watch 5"]);
        assert_eq!(proto("break g_speed MAX_SPEED"), ["fm.watch 5 90"]);
        assert_eq!(proto("break 77"), ["fm.break 77"]);
        assert!(matches!(parse("break pen:1", &tables()), Command::Rejected(_)));
        assert!(matches!(parse("break nowhere", &tables()), Command::Rejected(_)));
    }

    #[test]
    fn clear_and_stepping() {
        assert_eq!(proto("clear"), ["fm.clear all"]);
        assert_eq!(proto("clear pen:7136"), ["fm.clear 42"]);
        assert_eq!(proto("step"), ["fm.step"]);
        assert_eq!(proto("go"), ["fm.go"]);
    }

    #[test]
    fn trace_masks_and_ids() {
        assert_eq!(proto("trace flow local"), ["fm.trace 5"]);
        assert_eq!(proto("sweep flow flow_pen_load kw_beep"), ["fm.sweep 1 F12 K3"]);
        assert_eq!(proto("tick off"), ["fm.tick 0"]);
        assert_eq!(proto("trace"), ["fm.trace"]);
        assert_eq!(proto("trace reset"), ["fm.trace 0", "fm.trace_startup 0"]);
        assert!(matches!(parse("trace bogus", &tables()), Command::Rejected(_)));
    }

    #[test]
    fn invocation_pushes_calls_peeks_pops() {
        assert_eq!(
            proto("flow_pen_load(3, RED)"),
            ["fm.push 3", "fm.push 2", "fm.call F12", "fm.peek", "fm.pop"]
        );
        assert_eq!(proto("kw_beep()"), ["fm.call K3", "fm.peek", "fm.pop"]);
    }

    #[test]
    fn value_access_precedence() {
        assert_eq!(proto("DSID_PAPER_OUT"), ["dsid.get 301"]);
        assert_eq!(proto("DSID_PAPER_OUT = 1"), ["dsid.set 301 1"]);
        assert_eq!(proto("g_table[2]"), ["fm.get_array 6 2"]);
        assert_eq!(proto("g_table[2] = RED"), ["fm.set_array 6 2 2"]);
        assert_eq!(proto("g_speed"), ["fm.get_global 5"]);
        assert_eq!(proto("g_speed=10"), ["fm.set_global 5 10"]);
        assert_eq!(proto("MAX_SPEED = 80"), ["fm.set_const 2 80"]);
        assert_eq!(
            parse("MAX_SPEED", &tables()),
            Command::ConstantValue {
                name: "MAX_SPEED".into(),
                value: 90
            }
        );
        assert!(matches!(parse("RED = 3", &tables()), Command::Rejected(_)));
    }

    #[test]
    fn pass_through_and_raw() {
        assert_eq!(
            parse("mech.home all", &tables()),
            Command::PassThrough("mech.home all".into())
        );
        assert_eq!(parse("notes.txt", &tables()), Command::Raw("notes.txt".into()));
        assert_eq!(parse("whatever", &tables()), Command::Raw("whatever".into()));
    }

    #[test]
    fn session_words() {
        let t = tables();
        assert_eq!(parse("", &t), Command::Resume);
        assert_eq!(parse("  # note ", &t), Command::Comment("note".into()));
        assert_eq!(parse("!ls -l", &t), Command::Shell("ls -l".into()));
        assert_eq!(parse("resume", &t), Command::Unpause);
        assert_eq!(parse("sync 2", &t), Command::Sync(Some(Duration::from_secs(2))));
        assert_eq!(parse("connect", &t), Command::Connect(None));
        assert_eq!(parse("connect host:udw", &t), Command::Connect(Some("host:udw".into())));
        assert_eq!(parse("flash fw.bin", &t), Command::Flash("fw.bin".into()));
        assert!(matches!(parse("flash", &t), Command::Rejected(_)));
        assert_eq!(parse("list pen.fml:10", &t), Command::List(ListMove::At {
            file: "pen.fml".into(),
            line: 10
        }));
        assert_eq!(parse("list flow_pen_load", &t), Command::List(ListMove::At {
            file: "pen.fml".into(),
            line: 7100
        }));
        assert_eq!(parse("l-", &t), Command::List(ListMove::Back));
    }

    #[test]
    fn local_commands_send_a_no_op() {
        assert_eq!(proto("pause"), [""]);
        assert_eq!(proto("# hi"), [""]);
        assert!(proto("connect").is_empty());
        assert_eq!(proto("sync"), ["udw.echo @@udw-sync@@"]);
    }
}

//! Terminal output for rendered session lines.
//!
//! Tagged spans become ariadne-coloured text in pretty mode, or one JSON
//! object per line when the output is piped or JSON is requested.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use ariadne::{Color, Fmt};
use udw_toolchain_core::interpreter::cursor::LIST_WINDOW;
use udw_toolchain_core::{RenderSink, RenderedLine, SourceSink, Span, Tag};

// ── Output format ───────────────────────────────────────────────────────

/// Output format for everything the CLI prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    /// Coloured terminal output.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl Format {
    /// Explicit choice, or pretty for a terminal and JSON for a pipe.
    pub(crate) fn resolve_or_detect(explicit: Option<&str>) -> Self {
        match explicit {
            Some("json") => Format::Json,
            Some("pretty") => Format::Pretty,
            _ => {
                if io::stdout().is_terminal() {
                    Format::Pretty
                } else {
                    Format::Json
                }
            }
        }
    }
}

// ── Tag colours ─────────────────────────────────────────────────────────

fn tag_color(tag: Tag) -> Option<Color> {
    match tag {
        Tag::Default => None,
        Tag::Error => Some(Color::Red),
        Tag::Warning => Some(Color::Yellow),
        Tag::Info => Some(Color::Blue),
        Tag::Number => Some(Color::Magenta),
        Tag::Named => Some(Color::Green),
        Tag::Args => Some(Color::Cyan),
        Tag::Comment => Some(Color::Fixed(244)),
        Tag::Prompt => Some(Color::White),
    }
}

fn paint(span: &Span) -> String {
    match tag_color(span.tag) {
        Some(color) => format!("{}", span.text.as_str().fg(color)),
        None => span.text.clone(),
    }
}

/// A rendered line as coloured terminal text.
pub(crate) fn pretty_line(line: &RenderedLine) -> String {
    let mut out = "  ".repeat(line.depth);
    for span in &line.spans {
        out.push_str(&paint(span));
    }
    out
}

// ── Sink ────────────────────────────────────────────────────────────────

/// Writes session output to stdout.
pub(crate) struct TerminalSink {
    format: Format,
    source_dirs: Vec<PathBuf>,
}

impl TerminalSink {
    /// A sink looking up source files in `source_dirs` (after the path as given).
    pub(crate) fn new(format: Format, source_dirs: Vec<PathBuf>) -> Self {
        Self {
            format,
            source_dirs,
        }
    }

    fn write_line(&self, text: &str) {
        let mut out = io::stdout().lock();
        if writeln!(out, "{text}").and_then(|()| out.flush()).is_err() {
            log::debug!("stdout closed");
        }
    }

    fn find_source(&self, file: &str) -> Option<PathBuf> {
        let given = Path::new(file);
        if given.is_file() {
            return Some(given.to_path_buf());
        }
        self.source_dirs
            .iter()
            .map(|dir| dir.join(file))
            .find(|p| p.is_file())
    }
}

impl RenderSink for TerminalSink {
    fn emit(&self, line: RenderedLine) {
        match self.format {
            Format::Pretty => self.write_line(&pretty_line(&line)),
            Format::Json => match serde_json::to_string(&line) {
                Ok(json) => self.write_line(&json),
                Err(e) => log::error!("cannot serialize output line: {e}"),
            },
        }
    }
}

impl SourceSink for TerminalSink {
    fn show(&self, file: &str, center: u32, mark: u32) {
        let window = source_window(self.find_source(file).as_deref(), center);
        match self.format {
            Format::Json => {
                let out = serde_json::json!({
                    "source": {
                        "file": file,
                        "center": center,
                        "mark": mark,
                        "lines": window.iter().map(|(n, text)| {
                            serde_json::json!({ "line": n, "text": text })
                        }).collect::<Vec<_>>(),
                    }
                });
                self.write_line(&out.to_string());
            }
            Format::Pretty => {
                if window.is_empty() {
                    self.write_line(&format!(
                        "{}",
                        format!("(no source for {file}:{center})").fg(Color::Yellow)
                    ));
                    return;
                }
                self.write_line(&format!("{}", format!("-- {file}:{center}").fg(Color::Fixed(244))));
                for (n, text) in window {
                    let gutter = if n == mark { ">" } else { " " };
                    let number = format!("{gutter}{n:>6} ");
                    if n == mark {
                        self.write_line(&format!("{}{}", number.fg(Color::Yellow), text));
                    } else {
                        self.write_line(&format!("{}{}", number.fg(Color::Fixed(244)), text));
                    }
                }
            }
        }
    }
}

/// Up to `LIST_WINDOW` numbered lines of `path` starting a few lines above
/// `center`. Empty when the file cannot be read.
fn source_window(path: Option<&Path>, center: u32) -> Vec<(u32, String)> {
    let Some(text) = path.and_then(|p| fs::read_to_string(p).ok()) else {
        return Vec::new();
    };
    let first = center.saturating_sub(LIST_WINDOW / 2).max(1);
    text.lines()
        .zip(1u32..)
        .skip_while(|(_, n)| *n < first)
        .take(LIST_WINDOW as usize)
        .map(|(line, n)| (n, line.to_string()))
        .collect()
}

//! Output sinks.
//!
//! The core never formats colors. It produces [`RenderedLine`]s made of
//! tagged spans and hands them to a [`RenderSink`]; the front end decides
//! what a tag looks like.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Semantic tag of a span of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    /// Plain target output.
    Default,
    /// Failures.
    Error,
    /// Degraded-but-continuing conditions.
    Warning,
    /// Session status messages.
    Info,
    /// Numeric values.
    Number,
    /// Resolved symbol names.
    Named,
    /// Call arguments.
    Args,
    /// Echoed commands and annotations.
    Comment,
    /// The target's prompt.
    Prompt,
}

/// One run of text with a single tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    /// The text.
    pub text: String,
    /// How to show it.
    pub tag: Tag,
}

/// One line of output at a call depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedLine {
    /// Indentation depth (trace call depth; 0 for everything else).
    pub depth: usize,
    /// Spans, in order.
    pub spans: Vec<Span>,
}

impl RenderedLine {
    /// An empty line at `depth`.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            spans: Vec::new(),
        }
    }

    /// A depth-0 line holding one span.
    pub fn tagged(tag: Tag, text: impl Into<String>) -> Self {
        Self::new(0).span(text, tag)
    }

    /// Append a span (builder style). Empty text is skipped.
    pub fn span(mut self, text: impl Into<String>, tag: Tag) -> Self {
        self.push(text, tag);
        self
    }

    /// Append a span. Empty text is skipped.
    pub fn push(&mut self, text: impl Into<String>, tag: Tag) {
        let text = text.into();
        if !text.is_empty() {
            self.spans.push(Span { text, tag });
        }
    }

    /// The spans' text concatenated, without indentation.
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Whether any span carries `tag`.
    pub fn has_tag(&self, tag: Tag) -> bool {
        self.spans.iter().any(|s| s.tag == tag)
    }
}

/// Receives rendered output.
pub trait RenderSink: Send + Sync {
    /// Show one line.
    fn emit(&self, line: RenderedLine);
}

/// Shows source code around a location.
pub trait SourceSink: Send + Sync {
    /// Show a window of `file` around `center`, marking `mark`.
    fn show(&self, file: &str, center: u32, mark: u32);
}

/// Keeps a raw copy of every line received from the target.
pub trait BackupSink: Send + Sync {
    /// Append one raw line.
    fn record(&self, line: &str);

    /// Start a fresh backup, keeping the previous one aside.
    fn rotate(&self) -> io::Result<()>;
}

// ── Convenience emitters ────────────────────────────────────────────────

/// Emit a one-span info line.
pub fn info(sink: &dyn RenderSink, text: impl Into<String>) {
    sink.emit(RenderedLine::tagged(Tag::Info, text));
}

/// Emit a one-span warning line and log it.
pub fn warning(sink: &dyn RenderSink, text: impl Into<String>) {
    let text = text.into();
    log::warn!("{text}");
    sink.emit(RenderedLine::tagged(Tag::Warning, text));
}

/// Emit a one-span error line and log it.
pub fn error(sink: &dyn RenderSink, text: impl Into<String>) {
    let text = text.into();
    log::error!("{text}");
    sink.emit(RenderedLine::tagged(Tag::Error, text));
}

// ── Sinks ───────────────────────────────────────────────────────────────

/// Collects everything in memory. Used by tests and for capturing output.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<RenderedLine>>,
    sources: Mutex<Vec<(String, u32, u32)>>,
    raw: Mutex<Vec<String>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered lines so far.
    pub fn lines(&self) -> Vec<RenderedLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rendered lines so far, as plain text.
    pub fn texts(&self) -> Vec<String> {
        self.lines().iter().map(RenderedLine::text).collect()
    }

    /// Source windows requested so far.
    pub fn sources(&self) -> Vec<(String, u32, u32)> {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw backup lines so far.
    pub fn raw(&self) -> Vec<String> {
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget everything collected.
    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RenderSink for MemorySink {
    fn emit(&self, line: RenderedLine) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

impl SourceSink for MemorySink {
    fn show(&self, file: &str, center: u32, mark: u32) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((file.to_string(), center, mark));
    }
}

impl BackupSink for MemorySink {
    fn record(&self, line: &str) {
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }

    fn rotate(&self) -> io::Result<()> {
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn emit(&self, _line: RenderedLine) {}
}

impl SourceSink for NullSink {
    fn show(&self, _file: &str, _center: u32, _mark: u32) {}
}

impl BackupSink for NullSink {
    fn record(&self, _line: &str) {}

    fn rotate(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends raw lines to a file; rotation renames it to `<name>.1`.
#[derive(Debug)]
pub struct FileBackup {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileBackup {
    /// Open (append) the backup file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    /// Path of the live backup file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl BackupSink for FileBackup {
    fn record(&self, line: &str) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = file.as_mut()
            && let Err(e) = writeln!(f, "{line}")
        {
            log::warn!("backup write to {} failed: {e}; backup disabled", self.path.display());
            *file = None;
        }
    }

    fn rotate(&self) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        *file = None;
        std::fs::rename(&self.path, self.rotated_path())?;
        *file = Some(open_append(&self.path)?);
        log::info!("rotated backup {}", self.path.display());
        Ok(())
    }
}

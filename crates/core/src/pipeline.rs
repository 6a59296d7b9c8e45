//! The line pipeline: reader threads feed the FIFO, one consumer drains it.
//!
//! Readers never look at the processing gate; they always drain the
//! transport. Only the consumer's hand-off to the decoder waits for the gate,
//! so pausing the display never backs up the target.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use udw_toolchain_transport::{PortError, PortReader, ServiceClass};

use crate::decoder::Decoder;
use crate::fifo::{LineFifo, Pop};
use crate::render::{self, BackupSink, RenderSink, RenderedLine, Tag};
use crate::shared::{SYNC_TOKEN, Shared};

/// Default prompt marker of the underware console.
pub const DEFAULT_PROMPT: &str = "> ";

/// Pause after a `TryAgain` read before retrying.
const TRY_AGAIN_PAUSE: Duration = Duration::from_millis(10);

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Prompt marker that splits lines mid-stream.
    pub prompt: String,
    /// Upper bound on the step of idle waits.
    pub poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            poll: Duration::from_millis(100),
        }
    }
}

// ── Line assembly ───────────────────────────────────────────────────────

/// Cuts a byte stream into lines.
///
/// Keeps printable ASCII and tab. `\n` (or the port's terminator) ends a
/// line. The prompt marker is recognized where it starts a line, or where it
/// trails the buffer when the transport goes idle; in the latter case the
/// text before it becomes a line of its own. A marker inside a line
/// (`state 1 -> 4` with the default `"> "`) is ordinary text.
#[derive(Debug, Clone)]
pub struct LineAssembler {
    buf: String,
    prompt: String,
    terminator: Option<u8>,
    prompt_seen: bool,
}

impl LineAssembler {
    /// An empty assembler.
    pub fn new(prompt: impl Into<String>, terminator: Option<u8>) -> Self {
        Self {
            buf: String::new(),
            prompt: prompt.into(),
            terminator,
            prompt_seen: false,
        }
    }

    /// Feed bytes; returns the lines they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || Some(b) == self.terminator {
                if !self.buf.is_empty() {
                    lines.push(mem::take(&mut self.buf));
                }
                continue;
            }
            if b != b'\t' && !(0x20..=0x7e).contains(&b) {
                continue;
            }
            self.buf.push(char::from(b));
            if !self.prompt.is_empty() && self.buf == self.prompt {
                self.prompt_seen = true;
            }
        }
        lines
    }

    /// Whether the prompt went by since the last call.
    pub fn take_prompt_seen(&mut self) -> bool {
        mem::take(&mut self.prompt_seen)
    }

    /// On an idle transport, release a buffer that ends with the prompt:
    /// the text before it (if any), then the prompt.
    pub fn flush_idle(&mut self) -> Vec<String> {
        if self.prompt.is_empty() || !self.buf.ends_with(&self.prompt) {
            return Vec::new();
        }
        self.prompt_seen = true;
        let mut prompt = mem::take(&mut self.buf);
        let head_len = prompt.len() - self.prompt.len();
        if head_len == 0 {
            return vec![prompt];
        }
        let head = prompt[..head_len].to_string();
        prompt.replace_range(..head_len, "");
        vec![head, prompt]
    }

    /// Release whatever is buffered.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.buf))
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────

/// Entry side of the FIFO, counting lines until the consumer is done with
/// them.
#[derive(Clone)]
struct Inbox {
    fifo: LineFifo,
    pending: Arc<AtomicUsize>,
}

impl Inbox {
    fn push(&self, line: String) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if !self.fifo.push(line) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Reader threads, the FIFO, and the consumer thread.
pub struct Pipeline {
    inbox: Inbox,
    shared: Arc<Shared>,
    config: PipelineConfig,
    render: Arc<dyn RenderSink>,
    consumer: Option<JoinHandle<()>>,
    readers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the consumer thread around `decoder`.
    pub fn start(
        config: PipelineConfig,
        shared: Arc<Shared>,
        mut decoder: Decoder,
        render: Arc<dyn RenderSink>,
        backup: Arc<dyn BackupSink>,
    ) -> Self {
        let inbox = Inbox {
            fifo: LineFifo::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        };
        let consumer = {
            let inbox = inbox.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("udw-consumer".into())
                .spawn(move || consume(&inbox, &shared, &mut decoder, &*backup))
        };
        let consumer = match consumer {
            Ok(handle) => Some(handle),
            Err(e) => {
                render::error(&*render, format!("could not start the consumer thread: {e}"));
                None
            }
        };
        Self {
            inbox,
            shared,
            config,
            render,
            consumer,
            readers: Vec::new(),
        }
    }

    /// The pipeline settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a reader thread draining `reader` into the FIFO.
    pub fn attach(&mut self, reader: Box<dyn PortReader>, terminator: Option<u8>) {
        self.readers.retain(|h| !h.is_finished());
        let inbox = self.inbox.clone();
        let shared = Arc::clone(&self.shared);
        let render = Arc::clone(&self.render);
        let assembler = LineAssembler::new(self.config.prompt.clone(), terminator);
        let spawned = thread::Builder::new()
            .name("udw-reader".into())
            .spawn(move || read_loop(reader, assembler, &inbox, &shared, &*render));
        match spawned {
            Ok(handle) => self.readers.push(handle),
            Err(e) => render::error(&*self.render, format!("could not start a reader: {e}")),
        }
    }

    /// Queue a line as if the target had sent it.
    pub fn push(&self, line: impl Into<String>) {
        self.inbox.push(line.into());
    }

    /// Lines queued or being processed.
    pub fn pending(&self) -> usize {
        self.inbox.pending.load(Ordering::Acquire)
    }

    /// Lines waiting in the FIFO.
    pub fn queued(&self) -> usize {
        self.inbox.fifo.len()
    }

    /// Wait until every queued line has been processed. `false` on timeout
    /// or cancellation.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if self.shared.cancel.is_set() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.config.poll.min(Duration::from_millis(5)));
        }
        true
    }

    /// Cancel every thread and wait for them. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.cancel.set();
        self.inbox.fifo.close();
        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    mut reader: Box<dyn PortReader>,
    mut assembler: LineAssembler,
    inbox: &Inbox,
    shared: &Shared,
    render: &dyn RenderSink,
) {
    let mut buf = [0u8; 4096];
    while !shared.cancel.is_set() {
        match reader.read(&mut buf) {
            Ok(n) => {
                shared.activity.stamp();
                for line in assembler.feed(&buf[..n]) {
                    inbox.push(line);
                }
                if assembler.take_prompt_seen() {
                    shared.prompt_seen.set();
                }
            }
            Err(e) if e.class() == ServiceClass::TryAgain => {
                for line in assembler.flush_idle() {
                    inbox.push(line);
                }
                if assembler.take_prompt_seen() {
                    shared.prompt_seen.set();
                }
                thread::sleep(TRY_AGAIN_PAUSE);
            }
            Err(e) => {
                if let Some(rest) = assembler.finish() {
                    inbox.push(rest);
                }
                report_loss(&e, reader.loss_expected(), shared, render);
                return;
            }
        }
    }
    log::debug!("reader cancelled");
}

fn report_loss(e: &PortError, expected: bool, shared: &Shared, render: &dyn RenderSink) {
    if expected {
        log::debug!("reader finished after an expected close: {e}");
        return;
    }
    shared.is_open.clear();
    log::warn!("connection lost: {e}");
    render.emit(RenderedLine::tagged(Tag::Error, format!("connection lost: {e}")));
}

fn consume(inbox: &Inbox, shared: &Shared, decoder: &mut Decoder, backup: &dyn BackupSink) {
    loop {
        let line = match inbox.fifo.pop(&shared.cancel) {
            Pop::Line(line) => line,
            Pop::Closed | Pop::Cancelled => break,
        };
        if line.contains(SYNC_TOKEN) {
            shared.sync_seen.set();
        }
        shared.rate.record();
        if !shared.gate.wait(&shared.cancel) {
            break;
        }
        decoder.decode(&line);
        backup.record(&line);
        inbox.pending.fetch_sub(1, Ordering::AcqRel);
    }
    log::debug!("consumer finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_and_terminator_end_lines() {
        let mut asm = LineAssembler::new("> ", Some(b'\r'));
        assert_eq!(asm.feed(b"one\r\ntwo\n\nthr"), ["one", "two"]);
        assert_eq!(asm.feed(b"ee\n"), ["three"]);
    }

    #[test]
    fn control_bytes_are_dropped() {
        let mut asm = LineAssembler::new("> ", None);
        assert_eq!(asm.feed(b"a\x07b\tc\xffd\r\n"), ["ab\tcd"]);
    }

    #[test]
    fn prompt_at_line_start_is_seen() {
        let mut asm = LineAssembler::new("> ", None);
        assert_eq!(asm.feed(b"> fm.go\n"), ["> fm.go"]);
        assert!(asm.take_prompt_seen());
        assert!(!asm.take_prompt_seen());
    }

    #[test]
    fn arrow_inside_a_line_is_not_a_prompt() {
        let mut asm = LineAssembler::new(DEFAULT_PROMPT, None);
        assert_eq!(asm.feed(b"engine state 1 -> 4\n"), ["engine state 1 -> 4"]);
        assert!(!asm.take_prompt_seen());
        assert!(matches!(
            crate::decoder::classify("engine state 1 -> 4"),
            crate::decoder::FallbackLine::StateChange { from: 1, to: 4, .. }
        ));
    }

    #[test]
    fn idle_flush_splits_a_trailing_prompt() {
        let mut asm = LineAssembler::new("> ", None);
        assert!(asm.feed(b"done> ").is_empty());
        assert_eq!(asm.flush_idle(), ["done", "> "]);
        assert!(asm.take_prompt_seen());
        assert!(asm.flush_idle().is_empty());
    }

    #[test]
    fn idle_flush_releases_a_bare_prompt() {
        let mut asm = LineAssembler::new("> ", None);
        assert!(asm.feed(b"ok\n> ").len() == 1);
        assert_eq!(asm.flush_idle(), ["> "]);
        assert!(asm.flush_idle().is_empty());

        asm.feed(b"partial");
        assert!(asm.flush_idle().is_empty());
        assert_eq!(asm.finish().as_deref(), Some("partial"));
    }
}

//! Underware debugging session core.
//!
//! Reads target output through a threaded line pipeline, decodes the trace
//! wire format against the firmware's symbol tables, and turns user input
//! into underware protocol commands. The main entry point is [`Session`];
//! the pieces are usable on their own ([`Decoder`] for offline logs,
//! [`command::parse`](interpreter::command::parse) for command formatting).

#![warn(missing_docs)]

/// Trace decoder: grammar, frame stack, fallback patterns.
pub mod decoder;
/// The line FIFO between readers and the consumer.
pub mod fifo;
/// Command interpreter: grammar, listing cursor, dispatch.
pub mod interpreter;
/// Trace category bitmask.
pub mod mask;
/// Reader threads, line assembly, and the consumer.
pub mod pipeline;
/// Output tags, rendered lines, and sinks.
pub mod render;
/// Session wiring.
pub mod session;
/// Signals and hand-off slots shared by the session threads.
pub mod shared;
/// Binary signals and the activity monitor.
pub mod signal;
/// Output framing and the flash handshake.
pub mod target;

// ── Convenience re-exports ──────────────────────────────────────────────────

// Session
pub use session::{Session, SessionConfig, SessionError, Sinks};

// Pipeline
pub use fifo::{LineFifo, Pop};
pub use pipeline::{DEFAULT_PROMPT, LineAssembler, Pipeline, PipelineConfig};
pub use shared::{SYNC_TOKEN, Shared, StopLocation};
pub use signal::{ActivityMonitor, Signal, WaitResult};

// Decoder
pub use decoder::{Decoder, Frame, FrameStack, Outcome};
pub use mask::TraceMask;

// Interpreter
pub use interpreter::{Command, Flow, Interpreter, InterpreterConfig, ListMove};

// Target
pub use target::{
    FlashConfig, FlashError, FlashReport, FlashStep, StepOutcome, Target, TargetError,
};

// Output
pub use render::{
    BackupSink, FileBackup, MemorySink, NullSink, RenderSink, RenderedLine, SourceSink, Span, Tag,
};

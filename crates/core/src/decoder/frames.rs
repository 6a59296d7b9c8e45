//! Call frames keyed by declared depth.
//!
//! The stack is indexed by the depth the wire reports, never by a local
//! counter, so a missed call or return heals on the next well-formed line.

use std::collections::BTreeMap;

/// One active flow invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Flow name.
    pub flow: String,
    /// Last rendered value of each local written so far.
    pub locals: BTreeMap<String, String>,
    /// Decoder clock when the call was seen.
    pub timestamp: u64,
}

impl Frame {
    /// A frame with no locals written yet.
    pub fn new(flow: impl Into<String>, timestamp: u64) -> Self {
        Self {
            flow: flow.into(),
            locals: BTreeMap::new(),
            timestamp,
        }
    }
}

/// Frames by depth.
#[derive(Debug, Clone, Default)]
pub struct FrameStack {
    frames: BTreeMap<usize, Frame>,
}

impl FrameStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `frame` at `depth`, replacing whatever was there.
    pub fn push(&mut self, depth: usize, frame: Frame) {
        self.frames.insert(depth, frame);
    }

    /// Drop every frame deeper than `depth`.
    pub fn truncate_deeper(&mut self, depth: usize) {
        let _ = self.frames.split_off(&(depth + 1));
    }

    /// Drop the frame at `depth` and everything deeper, but only if the frame
    /// at `depth` belongs to `flow`. Returns whether anything was popped.
    pub fn pop_matching(&mut self, depth: usize, flow: &str) -> bool {
        match self.frames.get(&depth) {
            Some(frame) if frame.flow == flow => {
                let _ = self.frames.split_off(&depth);
                true
            }
            _ => false,
        }
    }

    /// Frame at `depth`.
    pub fn get(&self, depth: usize) -> Option<&Frame> {
        self.frames.get(&depth)
    }

    /// Mutable frame at `depth`.
    pub fn get_mut(&mut self, depth: usize) -> Option<&mut Frame> {
        self.frames.get_mut(&depth)
    }

    /// Whether any frame belongs to `flow`.
    pub fn contains_flow(&self, flow: &str) -> bool {
        self.frames.values().any(|f| f.flow == flow)
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames exist.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

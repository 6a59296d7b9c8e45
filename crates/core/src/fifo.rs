//! The line FIFO between the reader threads and the consumer.
//!
//! Unbounded, so a push never blocks and the reader always drains the
//! transport. Closing sends an end-of-stream marker; once the consumer has
//! seen it, every later pop reports [`Pop::Closed`]. A push either lands
//! ahead of the marker or is refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::signal::{Signal, WAIT_POLL};

enum Message {
    Line(String),
    EndOfStream,
}

/// Result of [`LineFifo::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    /// The next line, in push order.
    Line(String),
    /// The FIFO was closed; it stays closed.
    Closed,
    /// Cancellation was signalled while waiting.
    Cancelled,
}

/// Ordered, unbounded queue of lines. Clones share the same queue.
#[derive(Clone)]
pub struct LineFifo {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    /// Held for reading across a push's check-and-send, so the end-of-stream
    /// marker never overtakes an accepted line.
    closed: Arc<RwLock<bool>>,
    eos: Arc<AtomicBool>,
}

impl Default for LineFifo {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFifo {
    /// An empty, open FIFO.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            closed: Arc::new(RwLock::new(false)),
            eos: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append a line. Returns `false` (and drops the line) once closed.
    pub fn push(&self, line: impl Into<String>) -> bool {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        self.tx.send(Message::Line(line.into())).is_ok()
    }

    /// Remove the oldest line, blocking until one arrives, the FIFO is
    /// closed, or `cancel` is set.
    pub fn pop(&self, cancel: &Signal) -> Pop {
        loop {
            if self.eos.load(Ordering::Acquire) {
                return Pop::Closed;
            }
            if cancel.is_set() {
                return Pop::Cancelled;
            }
            match self.rx.recv_timeout(WAIT_POLL) {
                Ok(Message::Line(line)) => return Pop::Line(line),
                Ok(Message::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                    self.eos.store(true, Ordering::Release);
                    log::debug!("line fifo reached end of stream");
                    return Pop::Closed;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Remove the oldest line without blocking.
    pub fn try_pop(&self) -> Option<String> {
        if self.eos.load(Ordering::Acquire) {
            return None;
        }
        match self.rx.try_recv() {
            Ok(Message::Line(line)) => Some(line),
            Ok(Message::EndOfStream) => {
                self.eos.store(true, Ordering::Release);
                None
            }
            Err(_) => None,
        }
    }

    /// Close the FIFO. Lines already queued are still delivered first.
    pub fn close(&self) {
        let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
        if !*closed {
            *closed = true;
            let _ = self.tx.send(Message::EndOfStream);
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of queued lines.
    pub fn len(&self) -> usize {
        let queued = self.rx.len();
        if self.is_closed() && !self.eos.load(Ordering::Acquire) {
            queued.saturating_sub(1)
        } else {
            queued
        }
    }

    /// Whether no lines are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

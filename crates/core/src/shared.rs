//! State shared by the threads of one session.
//!
//! Everything in here is either a [`Signal`], the activity monitor, or a
//! small mutex-guarded slot handed from one thread to another (the last stop
//! location, the last query and its reply).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::signal::{ActivityMonitor, Signal};

/// Token echoed by the target to acknowledge a `sync`.
pub const SYNC_TOKEN: &str = "@@udw-sync@@";

/// A source location the target stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopLocation {
    /// Source file.
    pub file: String,
    /// Source line.
    pub line: u32,
}

/// Signals and hand-off slots of one session.
#[derive(Debug)]
pub struct Shared {
    /// Process-wide cancellation; every blocking wait watches it.
    pub cancel: Signal,
    /// The processing gate. Set means decoded output is displayed.
    pub gate: Signal,
    /// A port is open and its reader is running.
    pub is_open: Signal,
    /// The sync token came back.
    pub sync_seen: Signal,
    /// The target's prompt was seen.
    pub prompt_seen: Signal,
    /// The target reported a breakpoint.
    pub at_breakpoint: Signal,
    /// The target is waiting for a firmware payload.
    pub ready_for_data: Signal,
    /// When data last arrived.
    pub activity: ActivityMonitor,
    /// Consumed-line rate, for auto-pause.
    pub rate: RateMeter,
    symbols_stale: AtomicBool,
    compat_error: AtomicBool,
    stop: Mutex<Option<StopLocation>>,
    last_query: Mutex<Option<String>>,
    last_reply: Mutex<Option<String>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Fresh state: gate open, everything else clear.
    pub fn new() -> Self {
        Self {
            cancel: Signal::new("cancel", false),
            gate: Signal::new("gate", true),
            is_open: Signal::new("is_open", false),
            sync_seen: Signal::new("sync_seen", false),
            prompt_seen: Signal::new("prompt_seen", false),
            at_breakpoint: Signal::new("at_breakpoint", false),
            ready_for_data: Signal::new("ready_for_data", false),
            activity: ActivityMonitor::default(),
            rate: RateMeter::default(),
            symbols_stale: AtomicBool::new(false),
            compat_error: AtomicBool::new(false),
            stop: Mutex::new(None),
            last_query: Mutex::new(None),
            last_reply: Mutex::new(None),
        }
    }

    /// Flag the symbol tables as possibly out of date. Returns `true` the
    /// first time.
    pub fn mark_symbols_stale(&self) -> bool {
        !self.symbols_stale.swap(true, Ordering::AcqRel)
    }

    /// Whether a trace id missed the symbol tables.
    pub fn symbols_stale(&self) -> bool {
        self.symbols_stale.load(Ordering::Acquire)
    }

    /// Flag a breakpoint/assert offset that had no statement.
    pub fn mark_compat_error(&self) {
        self.compat_error.store(true, Ordering::Release);
    }

    /// Whether a breakpoint/assert offset failed to resolve.
    pub fn compat_error(&self) -> bool {
        self.compat_error.load(Ordering::Acquire)
    }

    /// Forget both symbol flags (after a reload).
    pub fn clear_symbol_flags(&self) {
        self.symbols_stale.store(false, Ordering::Release);
        self.compat_error.store(false, Ordering::Release);
    }

    /// Record where the target stopped.
    pub fn set_stop(&self, file: impl Into<String>, line: u32) {
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(StopLocation {
            file: file.into(),
            line,
        });
    }

    /// Take the stop location recorded since the last call, if any.
    pub fn take_stop(&self) -> Option<StopLocation> {
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Remember what was last asked of the target.
    pub fn set_last_query(&self, query: impl Into<String>) {
        *self
            .last_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(query.into());
    }

    /// Take the pending query, if any.
    pub fn take_last_query(&self) -> Option<String> {
        self.last_query
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Cache a reply payload.
    pub fn set_last_reply(&self, reply: impl Into<String>) {
        *self
            .last_reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reply.into());
    }

    /// The last reply payload.
    pub fn last_reply(&self) -> Option<String> {
        self.last_reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Lines within [`RATE_WINDOW`] above which output counts as busy.
pub const RATE_LIMIT: usize = 10;
/// Window of the busy measurement.
pub const RATE_WINDOW: Duration = Duration::from_secs(3);

/// Counts consumed lines over a sliding window.
#[derive(Debug, Default)]
pub struct RateMeter {
    seen: Mutex<VecDeque<Instant>>,
}

impl RateMeter {
    /// Record one line now.
    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    fn record_at(&self, now: Instant) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.push_back(now);
        prune(&mut seen, now);
    }

    /// Whether more than [`RATE_LIMIT`] lines arrived within the window.
    pub fn is_busy(&self) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut seen, Instant::now());
        seen.len() > RATE_LIMIT
    }
}

fn prune(seen: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&oldest) = seen.front() {
        if now.duration_since(oldest) > RATE_WINDOW {
            seen.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_after_a_burst() {
        let meter = RateMeter::default();
        for _ in 0..RATE_LIMIT {
            meter.record();
        }
        assert!(!meter.is_busy());
        meter.record();
        assert!(meter.is_busy());
    }

    #[test]
    fn old_lines_age_out() {
        let meter = RateMeter::default();
        let Some(long_ago) = Instant::now().checked_sub(Duration::from_secs(10)) else {
            return;
        };
        for _ in 0..20 {
            meter.record_at(long_ago);
        }
        assert!(!meter.is_busy());
    }

    #[test]
    fn stop_location_is_taken_once() {
        let shared = Shared::new();
        shared.set_stop("pen.fml", 7136);
        assert_eq!(
            shared.take_stop(),
            Some(StopLocation {
                file: "pen.fml".into(),
                line: 7136
            })
        );
        assert_eq!(shared.take_stop(), None);
    }

    #[test]
    fn stale_flag_reports_first_time_only() {
        let shared = Shared::new();
        assert!(shared.mark_symbols_stale());
        assert!(!shared.mark_symbols_stale());
        assert!(shared.symbols_stale());
        shared.clear_symbol_flags();
        assert!(!shared.symbols_stale());
    }

    #[test]
    fn gate_starts_open() {
        let shared = Shared::new();
        assert!(shared.gate.is_set());
        assert!(!shared.is_open.is_set());
        assert!(!shared.cancel.is_set());
    }
}

//! Named binary signals and the data-activity monitor.
//!
//! Threads in a session talk through the line FIFO and these flags only.
//! Every blocking wait also watches a cancellation signal, re-checking it at
//! least every [`WAIT_POLL`].

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Upper bound on how long any wait goes without re-checking cancellation.
pub const WAIT_POLL: Duration = Duration::from_millis(100);

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The awaited signal was set.
    Set,
    /// The deadline passed first.
    TimedOut,
    /// The cancellation signal was set first.
    Cancelled,
}

/// A binary flag with wait/set/clear semantics.
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    state: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    /// A new signal, initially set or clear.
    pub fn new(name: &'static str, set: bool) -> Self {
        Self {
            name,
            state: Mutex::new(set),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal name, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the flag and wake all waiters.
    pub fn set(&self) {
        *self.lock() = true;
        self.changed.notify_all();
    }

    /// Clear the flag.
    pub fn clear(&self) {
        *self.lock() = false;
    }

    /// Current value.
    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until set or `cancel` is set. Returns `false` on cancellation.
    pub fn wait(&self, cancel: &Signal) -> bool {
        self.wait_until(None, cancel) == WaitResult::Set
    }

    /// Block until set, cancelled, or `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration, cancel: &Signal) -> WaitResult {
        self.wait_until(Some(Instant::now() + timeout), cancel)
    }

    fn wait_until(&self, deadline: Option<Instant>, cancel: &Signal) -> WaitResult {
        let mut set = self.lock();
        loop {
            if *set {
                return WaitResult::Set;
            }
            if cancel.is_set() {
                return WaitResult::Cancelled;
            }
            let mut slice = WAIT_POLL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return WaitResult::TimedOut;
                }
                slice = slice.min(deadline - now);
            }
            set = self
                .changed
                .wait_timeout(set, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Remembers when data last arrived from the target.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    last: Mutex<Option<Instant>>,
}

impl ActivityMonitor {
    /// Record that data arrived now.
    pub fn stamp(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// When data last arrived.
    pub fn last_seen(&self) -> Option<Instant> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether data has been seen within `window`.
    pub fn seen_within(&self, window: Duration) -> bool {
        self.last_seen().is_some_and(|t| t.elapsed() < window)
    }

    /// Whether nothing arrived for `quiet` since `since` (or since the last
    /// arrival, if that was later).
    pub fn quiet_since(&self, since: Instant, quiet: Duration) -> bool {
        let reference = match self.last_seen() {
            Some(last) if last > since => last,
            _ => since,
        };
        reference.elapsed() >= quiet
    }
}

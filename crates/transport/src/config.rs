//! Configuration types for target transports.

use std::path::PathBuf;
use std::time::Duration;

/// Default serial baud rate for underware consoles (115200 8N1).
pub const DEFAULT_BAUD: u32 = 115_200;

/// Complete port configuration: timeouts, retry settings, and per-medium knobs.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Network/transport timeout settings.
    pub timeouts: PortTimeouts,
    /// Retry settings for opening a port.
    pub retry: RetryConfig,
    /// Serial baud rate.
    pub baud: u32,
    /// Host device file used for flashing serial-attached targets.
    ///
    /// When `None`, the serial device path itself is opened for writing.
    pub flash_device: Option<PathBuf>,
    /// Command used to start the broker daemon when none is listening.
    pub broker_command: Option<String>,
    /// Enable transport-level byte tracing (logged at `trace` level).
    pub trace_io: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            timeouts: PortTimeouts::default(),
            retry: RetryConfig::default(),
            baud: DEFAULT_BAUD,
            flash_device: None,
            broker_command: None,
            trace_io: false,
        }
    }
}

/// Timeout settings for target connections.
///
/// - `connect`: 3s for the TCP handshake
/// - `probe`: 100ms for a target to reject the one-byte probe
/// - `poll`: 100ms read timeout, the upper bound on how long a reader
///   blocks before re-checking for cancellation
/// - `write`: 10s (firmware chunks over slow links)
/// - `broker`: 3s for each broker reply line
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PortTimeouts {
    /// Maximum time to wait for a connection to establish.
    pub connect: Duration,
    /// How long to watch for a hang-up after the probe byte.
    pub probe: Duration,
    /// Read timeout used by the reader loop.
    pub poll: Duration,
    /// Maximum time to wait for a write to complete.
    pub write: Duration,
    /// Maximum time to wait for a broker reply.
    pub broker: Duration,
}

impl Default for PortTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(3),
            probe: Duration::from_millis(100),
            poll: Duration::from_millis(100),
            write: Duration::from_secs(10),
            broker: Duration::from_secs(3),
        }
    }
}

/// Retry settings for opening a port.
///
/// Uses exponential backoff with optional jitter. Only errors where
/// `PortError::is_retryable()` returns `true` are retried.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Whether to add random jitter to retry delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt with no backoff.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

//! Typed error types for target transports.

use std::fmt;
use std::io;
use std::time::Duration;

/// How a caller should react to a [`PortError`].
///
/// Transports never signal routine states through panics; every failure
/// carries one of these classes so the caller can decide between retrying,
/// reconnecting, or giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServiceClass {
    /// The port could not be established. Retry with backoff or give up.
    NoService,
    /// The port was open and is not anymore. Close it; a reconnect may help.
    LostService,
    /// Transient condition. Retry immediately without telling the user.
    TryAgain,
    /// Configuration or usage error. Retrying cannot help.
    Fatal,
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceClass::NoService => write!(f, "no service"),
            ServiceClass::LostService => write!(f, "lost service"),
            ServiceClass::TryAgain => write!(f, "try again"),
            ServiceClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Transport error conditions, categorized by type.
///
/// Use [`PortError::class()`] to map a variant onto the
/// NoService / LostService / TryAgain / Fatal taxonomy.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    // -- Establishing --
    /// The target actively refused the connection.
    #[error("connection refused: {addr}")]
    ConnectionRefused {
        /// The address that was attempted.
        addr: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// TCP connect timed out before the target responded.
    #[error("connection timed out: {addr} ({timeout:?})")]
    ConnectionTimeout {
        /// The address that was attempted.
        addr: String,
        /// The configured timeout that elapsed.
        timeout: Duration,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Connection failed for a reason other than refusal or timeout.
    #[error("connection failed: {addr}")]
    ConnectionFailed {
        /// The address that was attempted.
        addr: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The target accepted the TCP connection but dropped it on the probe byte.
    #[error("target at {addr} rejected the probe (no underware service)")]
    ProbeRejected {
        /// The address that was probed.
        addr: String,
    },

    /// DNS resolution found no addresses for the given hostname.
    #[error("no address found for hostname: {0}")]
    NoAddressFound(String),

    /// A serial port transport error occurred.
    #[error("serial port error: {0}")]
    SerialError(String),

    /// Serial support was not compiled in.
    #[error("serial transport unavailable (built without the `serial` feature)")]
    SerialUnavailable,

    /// The broker answered with something other than what was asked for.
    #[error("broker error: {0}")]
    Broker(String),

    /// No discovered device matched the requested specifier.
    #[error("no device found matching {specifier:?}")]
    DeviceNotFound {
        /// The specifier substring that was searched for (empty for "any").
        specifier: String,
    },

    // -- Lost --
    /// The target closed the connection unexpectedly.
    #[error("connection closed by target")]
    ConnectionClosed,

    /// Writing data to the target failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Reading data from the target failed.
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// The port has been closed locally.
    #[error("port is closed")]
    PortClosed,

    // -- Transient --
    /// Nothing to read right now.
    #[error("no data yet, try again")]
    TryAgain,

    // -- Fatal --
    /// The connection specifier string could not be parsed.
    #[error("invalid connection specifier: {0}")]
    InvalidSpec(String),

    /// An invalid configuration was provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// All open attempts have been exhausted.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Total number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last_error: Box<PortError>,
    },
}

impl PortError {
    /// Classify this error.
    pub fn class(&self) -> ServiceClass {
        match self {
            PortError::ConnectionRefused { .. }
            | PortError::ConnectionTimeout { .. }
            | PortError::ConnectionFailed { .. }
            | PortError::ProbeRejected { .. }
            | PortError::NoAddressFound(_)
            | PortError::SerialError(_)
            | PortError::SerialUnavailable
            | PortError::Broker(_)
            | PortError::DeviceNotFound { .. } => ServiceClass::NoService,
            PortError::ConnectionClosed
            | PortError::WriteFailed(_)
            | PortError::ReadFailed(_)
            | PortError::PortClosed => ServiceClass::LostService,
            PortError::TryAgain => ServiceClass::TryAgain,
            PortError::InvalidSpec(_)
            | PortError::InvalidConfig(_)
            | PortError::RetriesExhausted { .. } => ServiceClass::Fatal,
        }
    }

    /// Returns `true` if an open attempt that failed with this error is worth
    /// repeating.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ServiceClass::NoService | ServiceClass::TryAgain
        )
    }

    /// Map an `io::Error` from a read into the matching variant.
    ///
    /// Timeouts and would-block are transient; everything else means the
    /// link is gone.
    pub(crate) fn from_read(e: io::Error) -> PortError {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                PortError::TryAgain
            }
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => PortError::ConnectionClosed,
            _ => PortError::ReadFailed(e),
        }
    }
}

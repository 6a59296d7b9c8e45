//! Transports for talking underware to embedded targets.
//!
//! Supports raw TCP sockets, the device broker daemon, serial lines
//! (feature `serial`), and a no-op port. The API is synchronous
//! (`std::net`, blocking reads with a short timeout) with no async runtime.
mod addr;
mod broker;
mod config;
mod connection;
mod error;
mod file;
mod last_port;
mod noconn;
mod retry;
#[cfg(feature = "serial")]
mod serial;
mod spec;
mod tcp;

pub use addr::resolve_target_addr;
pub use broker::{BrokerClient, DeviceInfo, select_device};
pub use config::{DEFAULT_BAUD, PortConfig, PortTimeouts, RetryConfig};
pub use connection::{Connection, DefaultOpener, PortOpener};
pub use error::{PortError, ServiceClass};
pub use file::DeviceFilePort;
pub use last_port::LastPortStore;
pub use noconn::NoConnPort;
pub use retry::retry_open;
#[cfg(feature = "serial")]
pub use serial::SerialLine;
pub use spec::{
    BROKER_PORT, Channel, ConnectionSpec, RAW_PRINT_PORT, SHELL_PORT, TransportKind, UDW_PORT,
};
pub use tcp::SocketPort;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Traits ──────────────────────────────────────────────────────────────

/// An open link to a target. All transports implement this.
///
/// A port hands out independent [`PortReader`]s so one thread can block in
/// `read` while another writes. Once [`close`](Port::close) has been called,
/// writes fail with [`PortError::PortClosed`] and reads on the port or any of
/// its readers fail with a LostService-class error instead of blocking.
pub trait Port: Send {
    /// Write raw bytes to the target.
    fn write(&mut self, data: &[u8]) -> Result<(), PortError>;

    /// Read whatever is available (at most `buf.len()` bytes).
    ///
    /// Returns [`PortError::TryAgain`] when nothing arrived within the
    /// configured poll interval. Never returns `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;

    /// A second handle on the same link for a dedicated reader thread.
    fn reader(&self) -> Result<Box<dyn PortReader>, PortError>;

    /// Close the link. `loss_expected` suppresses error reporting in readers
    /// that are still draining it.
    fn close(&mut self, loss_expected: bool);

    /// Whether the port has not been closed yet.
    fn is_open(&self) -> bool;

    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Byte that ends a line on this medium in addition to `\n`.
    fn terminator(&self) -> Option<u8> {
        None
    }
}

/// The read half of a [`Port`].
pub trait PortReader: Send {
    /// Same contract as [`Port::read`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;

    /// Whether the port was closed on purpose.
    fn loss_expected(&self) -> bool;
}

// ── Shared open/closed state ────────────────────────────────────────────

/// Open/closed flags shared between a port and its readers.
#[derive(Debug)]
pub struct PortState {
    open: AtomicBool,
    loss_expected: AtomicBool,
}

impl PortState {
    /// State for a freshly opened port.
    pub fn new_open() -> Arc<PortState> {
        Arc::new(PortState {
            open: AtomicBool::new(true),
            loss_expected: AtomicBool::new(false),
        })
    }

    /// Whether the port is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether the close (if any) was deliberate.
    pub fn loss_expected(&self) -> bool {
        self.loss_expected.load(Ordering::Acquire)
    }

    /// Mark closed. The loss flag is written first so a reader that sees
    /// `open == false` also sees the right flag.
    pub fn mark_closed(&self, loss_expected: bool) {
        self.loss_expected.store(loss_expected, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }

    /// `Err(PortClosed)` once closed.
    pub fn check_open(&self) -> Result<(), PortError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(PortError::PortClosed)
        }
    }
}

/// Whether a serial device node currently exists on the host.
///
/// Used while flashing to watch a target reset: its device node disappears
/// and comes back.
pub fn device_present(device: &str) -> bool {
    if device.starts_with('/') {
        return std::path::Path::new(device).exists();
    }
    #[cfg(feature = "serial")]
    {
        SerialLine::list_ports().iter().any(|p| p == device)
    }
    #[cfg(not(feature = "serial"))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_state_transitions() {
        let state = PortState::new_open();
        assert!(state.is_open());
        assert!(state.check_open().is_ok());
        state.mark_closed(true);
        assert!(!state.is_open());
        assert!(state.loss_expected());
        assert!(matches!(state.check_open(), Err(PortError::PortClosed)));
    }

    #[test]
    fn absent_device_node() {
        assert!(!device_present("/dev/udw-test-no-such-device"));
    }
}

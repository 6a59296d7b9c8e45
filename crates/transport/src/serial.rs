//! Serial transport using the `serialport` crate.
//!
//! Feature-gated behind the `serial` Cargo feature (enabled by default in the CLI).

use std::io::{Read, Write};
use std::sync::Arc;

use crate::{Port, PortConfig, PortError, PortReader, PortState};

/// A target attached over a serial line (RS-232 or USB-serial).
pub struct SerialLine {
    /// The underlying serial port handle.
    port: Box<dyn serialport::SerialPort>,
    /// Device path, kept for logs and reset detection.
    path: String,
    state: Arc<PortState>,
    trace_io: bool,
}

impl SerialLine {
    /// Open a serial device at the configured baud rate.
    ///
    /// The read timeout is the poll interval so a reader thread can notice
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Returns `PortError::SerialError` if the device cannot be opened.
    pub fn open(path: &str, config: &PortConfig) -> Result<Self, PortError> {
        let port = serialport::new(path, config.baud)
            .timeout(config.timeouts.poll)
            .open()
            .map_err(|e| PortError::SerialError(format!("{path}: {e}")))?;
        log::info!("opened serial device {path} at {} baud", config.baud);

        Ok(Self {
            port,
            path: path.to_string(),
            state: PortState::new_open(),
            trace_io: config.trace_io,
        })
    }

    /// List available serial port names on the system.
    ///
    /// **Note:** On Linux, this crate is built with `serialport`'s default features
    /// disabled (no `libudev`). Enumeration falls back to sysfs and may return
    /// fewer details.
    pub fn list_ports() -> Vec<String> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.port_name)
            .collect()
    }
}

impl Port for SerialLine {
    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.state.check_open()?;
        if self.trace_io {
            log::trace!("-> {} {:?}", self.path, String::from_utf8_lossy(data));
        }
        self.port.write_all(data).map_err(PortError::WriteFailed)?;
        self.port.flush().map_err(PortError::WriteFailed)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        read_serial(&mut *self.port, &self.state, buf)
    }

    fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        self.state.check_open()?;
        let port = self
            .port
            .try_clone()
            .map_err(|e| PortError::SerialError(e.to_string()))?;
        Ok(Box::new(SerialReader {
            port,
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self, loss_expected: bool) {
        if self.state.is_open() {
            log::info!("closing {} (loss expected: {loss_expected})", self.path);
        }
        self.state.mark_closed(loss_expected);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn describe(&self) -> String {
        format!("serial {}", self.path)
    }

    fn terminator(&self) -> Option<u8> {
        // Consoles on a serial line often finish prompts with a bare CR.
        Some(b'\r')
    }
}

struct SerialReader {
    port: Box<dyn serialport::SerialPort>,
    state: Arc<PortState>,
}

impl PortReader for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        read_serial(&mut *self.port, &self.state, buf)
    }

    fn loss_expected(&self) -> bool {
        self.state.loss_expected()
    }
}

fn read_serial(
    port: &mut dyn serialport::SerialPort,
    state: &PortState,
    buf: &mut [u8],
) -> Result<usize, PortError> {
    state.check_open()?;
    match port.read(buf) {
        // A serial line has no end-of-stream; zero bytes is just a quiet poll.
        Ok(0) => Err(PortError::TryAgain),
        Ok(n) => Ok(n),
        Err(_) if !state.is_open() => Err(PortError::PortClosed),
        Err(e) => Err(PortError::from_read(e)),
    }
}

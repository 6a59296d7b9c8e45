//! The target: a connection plus the output framing and the flash handshake.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use udw_toolchain_transport::{
    Channel, Connection, ConnectionSpec, Port, PortError, PortReader, RAW_PRINT_PORT,
    ServiceClass, TransportKind,
};

use crate::render::{RenderSink, RenderedLine, Tag};
use crate::shared::Shared;
use crate::signal::WaitResult;

/// Sent before a command when the raw-protocol target may have timed out of
/// underware mode.
pub const RAW_MODE_PREAMBLE: &str = "\x1b%-12345X@PJL ENTER LANGUAGE=UDW\r\n";

/// Idle time after which the raw-protocol preamble is sent again.
pub const RAW_MODE_IDLE: Duration = Duration::from_secs(5 * 60);

/// Command that puts the target into flash mode.
pub const FLASH_MODE_COMMAND: &str = "fm.reflash";

/// Size of each firmware write.
pub const FLASH_CHUNK: usize = 4096;

/// Errors from writing to the target.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// No port is open.
    #[error("not connected")]
    NotConnected,

    /// The transport failed.
    #[error(transparent)]
    Port(#[from] PortError),
}

impl TargetError {
    /// Whether the connection is gone (as opposed to never established).
    pub fn is_lost_service(&self) -> bool {
        match self {
            TargetError::NotConnected => false,
            TargetError::Port(e) => e.class() == ServiceClass::LostService,
        }
    }
}

// ── Flash types ─────────────────────────────────────────────────────────

/// Flash handshake timing.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// How long to wait for "ready for data" after `fm.reflash`.
    pub ready_timeout: Duration,
    /// How long to wait for a serial device node to go away and return.
    pub reset_timeout: Duration,
    /// Poll interval of the device-node watch.
    pub poll: Duration,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(10),
            poll: Duration::from_millis(100),
        }
    }
}

/// The steps of a flash, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStep {
    /// Send `fm.reflash` and wait for "ready for data".
    EnterFlashMode,
    /// Serial only: wait for the device node to disappear and reappear.
    WaitReset,
    /// Close the debugging connection.
    CloseConnection,
    /// Open the flashing route.
    OpenFlashConnection,
    /// Stream the payload.
    SendPayload,
    /// Close the flashing route and reopen the debugging connection.
    Restore,
}

impl fmt::Display for FlashStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlashStep::EnterFlashMode => "enter flash mode",
            FlashStep::WaitReset => "wait for reset",
            FlashStep::CloseConnection => "close connection",
            FlashStep::OpenFlashConnection => "open flash connection",
            FlashStep::SendPayload => "send payload",
            FlashStep::Restore => "restore connection",
        })
    }
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Completed.
    Done,
    /// Not applicable to this transport or state.
    Skipped,
    /// The wait expired; the flash carried on anyway.
    TimedOut,
    /// Failed with the given reason.
    Failed(String),
}

/// Step-by-step record of a flash attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// Steps in execution order.
    pub steps: Vec<(FlashStep, StepOutcome)>,
    /// Payload bytes written.
    pub bytes_sent: usize,
}

impl FlashReport {
    fn record(&mut self, step: FlashStep, outcome: StepOutcome) {
        log::info!("flash: {step}: {outcome:?}");
        self.steps.push((step, outcome));
    }

    /// Outcome of `step`, if it ran.
    pub fn outcome(&self, step: FlashStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    /// Whether the debugging connection was reopened.
    pub fn restored(&self) -> bool {
        self.outcome(FlashStep::Restore) == Some(&StepOutcome::Done)
    }
}

/// Why a flash attempt stopped.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    /// Flashing needs an open (or previously opened) connection.
    #[error("not connected")]
    NotConnected,

    /// The payload file could not be read.
    #[error("cannot read firmware {}: {source}", path.display())]
    Payload {
        /// Payload path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The flashing route could not be opened. The original connection was
    /// restored (see the report).
    #[error("cannot open the flashing connection: {source}")]
    FlashConnect {
        /// Underlying error.
        #[source]
        source: PortError,
        /// Steps up to the failure, plus the restore.
        report: FlashReport,
    },

    /// Writing the payload failed.
    #[error("firmware transfer failed: {source}")]
    Transfer {
        /// Underlying error.
        #[source]
        source: PortError,
        /// Steps up to the failure, plus the restore.
        report: FlashReport,
    },

    /// The session was cancelled mid-flash.
    #[error("flash cancelled")]
    Cancelled,
}

/// Encode a firmware file for the wire. `.dmp` dumps are stored with 16-bit
/// words byte-swapped; swapping again restores them. Anything else is sent
/// as is.
pub fn encode_payload(path: &Path, mut bytes: Vec<u8>) -> Vec<u8> {
    let is_dump = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dmp"));
    if is_dump {
        for pair in bytes.chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
    }
    bytes
}

// ── Target ──────────────────────────────────────────────────────────────

/// The device under debug.
///
/// Only the interpreter thread writes. Every outgoing command goes through
/// [`Target::write`], which applies the framing of the current mode.
pub struct Target {
    conn: Connection,
    shared: Arc<Shared>,
    render: Arc<dyn RenderSink>,
    running_shell: bool,
    running_raw_protocol: bool,
    running_framed: bool,
    last_write: Option<Instant>,
    flash: FlashConfig,
    in_flash_mode: bool,
}

impl Target {
    /// A target around a closed `conn`.
    pub fn new(
        conn: Connection,
        shared: Arc<Shared>,
        render: Arc<dyn RenderSink>,
        flash: FlashConfig,
    ) -> Self {
        Self {
            conn,
            shared,
            render,
            running_shell: false,
            running_raw_protocol: false,
            running_framed: false,
            last_write: None,
            flash,
            in_flash_mode: false,
        }
    }

    /// Turn framed mode (`;` terminator plus echo) on or off.
    pub fn set_framed(&mut self, framed: bool) {
        self.running_framed = framed;
    }

    /// Whether commands are wrapped for a shell channel.
    pub fn running_shell(&self) -> bool {
        self.running_shell
    }

    /// Whether the raw-protocol preamble is in use.
    pub fn running_raw_protocol(&self) -> bool {
        self.running_raw_protocol
    }

    /// Whether framed mode is on.
    pub fn running_framed(&self) -> bool {
        self.running_framed
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Seed the last good spec.
    pub fn set_last_good(&mut self, spec: ConnectionSpec) {
        self.conn.set_last_good(spec);
    }

    /// Whether a port is open.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// Open from user input (`""`/`last` reopens the last good spec).
    pub fn open(&mut self, input: &str) -> Result<ConnectionSpec, PortError> {
        let opened = self.conn.open(input);
        self.after_open(opened)
    }

    /// Open `spec`.
    pub fn open_spec(&mut self, spec: ConnectionSpec) -> Result<ConnectionSpec, PortError> {
        let opened = self.conn.open_spec(spec);
        self.after_open(opened)
    }

    /// Reopen the current or last good spec.
    pub fn reconnect(&mut self) -> Result<ConnectionSpec, PortError> {
        let opened = self.conn.reconnect();
        self.after_open(opened)
    }

    fn after_open(
        &mut self,
        opened: Result<ConnectionSpec, PortError>,
    ) -> Result<ConnectionSpec, PortError> {
        match opened {
            Ok(spec) => {
                self.running_shell = spec.channel() == Channel::Shell;
                self.running_raw_protocol = (spec.kind() == TransportKind::Socket
                    && spec.port() == RAW_PRINT_PORT)
                    || spec.channel() == Channel::Print;
                self.last_write = None;
                self.in_flash_mode = false;
                self.shared.is_open.set();
                Ok(spec)
            }
            Err(e) => {
                self.shared.is_open.clear();
                Err(e)
            }
        }
    }

    /// Close the port on purpose.
    pub fn close(&mut self) {
        self.conn.close(true);
        self.shared.is_open.clear();
    }

    /// Reader handle for the open port.
    pub fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        self.conn.reader()
    }

    /// Extra line terminator of the open port.
    pub fn terminator(&self) -> Option<u8> {
        self.conn.terminator()
    }

    /// Description of the open port.
    pub fn describe(&self) -> String {
        self.conn.describe()
    }

    /// Frame `text` for the current mode.
    ///
    /// Returns the command as it will appear on the wire (without the
    /// preamble and trailing newline).
    pub fn frame(&self, text: &str) -> String {
        let mut line = text.to_string();
        if self.running_shell && !line.starts_with("udw \"") {
            line = format!("udw \"{}\"", line.replace('"', "\\\""));
        }
        if self.running_framed && !line.trim_end().ends_with(';') {
            line.push(';');
        }
        line
    }

    /// Send one command.
    pub fn write(&mut self, text: &str) -> Result<(), TargetError> {
        if !self.conn.is_open() {
            return Err(TargetError::NotConnected);
        }
        let line = self.frame(text);
        if self.running_framed {
            self.render.emit(RenderedLine::tagged(Tag::Comment, line.clone()));
        }

        let mut out = Vec::with_capacity(line.len() + RAW_MODE_PREAMBLE.len() + 1);
        if self.running_raw_protocol
            && self
                .last_write
                .is_none_or(|t| t.elapsed() > RAW_MODE_IDLE)
        {
            log::debug!("sending underware mode preamble");
            out.extend_from_slice(RAW_MODE_PREAMBLE.as_bytes());
        }
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');

        log::debug!("-> {line}");
        match self.conn.write(&out) {
            Ok(()) => {
                self.last_write = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                if e.class() == ServiceClass::LostService {
                    self.shared.is_open.clear();
                }
                Err(e.into())
            }
        }
    }

    /// Send several commands back to back, stopping at the first failure.
    pub fn write_sequence<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<(), TargetError> {
        for line in lines {
            self.write(line.as_ref())?;
        }
        Ok(())
    }

    // ── Flash ───────────────────────────────────────────────────────────

    /// Upload the firmware in `path`.
    ///
    /// Waits time out optimistically. A failure to open the flashing route
    /// or to send the payload aborts the attempt; the original connection is
    /// reopened in every case once it has been closed.
    pub fn flash(&mut self, path: &Path) -> Result<FlashReport, FlashError> {
        let original = self.conn.spec().cloned().ok_or(FlashError::NotConnected)?;
        let bytes = std::fs::read(path).map_err(|source| FlashError::Payload {
            path: path.to_path_buf(),
            source,
        })?;
        let payload = encode_payload(path, bytes);
        log::info!("flashing {} ({} bytes) via {original}", path.display(), payload.len());
        let mut report = FlashReport::default();

        // 1. flash mode
        if self.in_flash_mode {
            report.record(FlashStep::EnterFlashMode, StepOutcome::Skipped);
        } else {
            self.shared.ready_for_data.clear();
            let outcome = match self.write(FLASH_MODE_COMMAND) {
                Err(e) => StepOutcome::Failed(e.to_string()),
                Ok(()) => {
                    self.in_flash_mode = true;
                    match self
                        .shared
                        .ready_for_data
                        .wait_timeout(self.flash.ready_timeout, &self.shared.cancel)
                    {
                        WaitResult::Set => StepOutcome::Done,
                        WaitResult::TimedOut => StepOutcome::TimedOut,
                        WaitResult::Cancelled => return Err(FlashError::Cancelled),
                    }
                }
            };
            report.record(FlashStep::EnterFlashMode, outcome);
        }

        // 2. serial reset
        let outcome = match original.device() {
            Some(device) if original.kind() == TransportKind::Serial => {
                self.wait_reset(device)?
            }
            _ => StepOutcome::Skipped,
        };
        report.record(FlashStep::WaitReset, outcome);

        // 3. close
        self.close();
        report.record(FlashStep::CloseConnection, StepOutcome::Done);

        // 4. flash route
        let mut port = match self.conn.open_flash() {
            Ok(port) => {
                report.record(FlashStep::OpenFlashConnection, StepOutcome::Done);
                port
            }
            Err(source) => {
                report.record(
                    FlashStep::OpenFlashConnection,
                    StepOutcome::Failed(source.to_string()),
                );
                self.restore(&original, &mut report);
                return Err(FlashError::FlashConnect { source, report });
            }
        };

        // 5. payload
        let sent = send_payload(&mut *port, &payload, &mut report.bytes_sent);
        port.close(true);
        if let Err(source) = sent {
            report.record(FlashStep::SendPayload, StepOutcome::Failed(source.to_string()));
            self.restore(&original, &mut report);
            return Err(FlashError::Transfer { source, report });
        }
        report.record(FlashStep::SendPayload, StepOutcome::Done);

        // 6. restore
        self.restore(&original, &mut report);
        Ok(report)
    }

    /// Watch `device` vanish and come back, bounded by the reset timeout.
    fn wait_reset(&self, device: &str) -> Result<StepOutcome, FlashError> {
        let deadline = Instant::now() + self.flash.reset_timeout;
        let mut gone = false;
        loop {
            if self.shared.cancel.is_set() {
                return Err(FlashError::Cancelled);
            }
            let present = self.conn.device_present(device);
            if !present && !gone {
                log::debug!("{device} disappeared");
                gone = true;
            } else if present && gone {
                log::debug!("{device} is back");
                return Ok(StepOutcome::Done);
            }
            if Instant::now() >= deadline {
                return Ok(StepOutcome::TimedOut);
            }
            thread::sleep(self.flash.poll);
        }
    }

    fn restore(&mut self, original: &ConnectionSpec, report: &mut FlashReport) {
        let outcome = match self.open_spec(original.clone()) {
            Ok(_) => StepOutcome::Done,
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        self.in_flash_mode = false;
        report.record(FlashStep::Restore, outcome);
    }
}

fn send_payload(port: &mut dyn Port, payload: &[u8], sent: &mut usize) -> Result<(), PortError> {
    for chunk in payload.chunks(FLASH_CHUNK) {
        port.write(chunk)?;
        *sent += chunk.len();
    }
    log::info!("sent {sent} firmware bytes via {}", port.describe());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_payloads_are_word_swapped() {
        let swapped = encode_payload(Path::new("fw.DMP"), vec![1, 2, 3, 4, 5]);
        assert_eq!(swapped, [2, 1, 4, 3, 5]);
        assert_eq!(encode_payload(Path::new("fw.DMP"), swapped), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn other_payloads_are_raw() {
        assert_eq!(encode_payload(Path::new("fw.bin"), vec![1, 2]), [1, 2]);
    }

    #[test]
    fn report_tracks_restore() {
        let mut report = FlashReport::default();
        report.record(FlashStep::SendPayload, StepOutcome::Done);
        assert!(!report.restored());
        report.record(FlashStep::Restore, StepOutcome::Done);
        assert!(report.restored());
        assert_eq!(report.outcome(FlashStep::WaitReset), None);
    }
}

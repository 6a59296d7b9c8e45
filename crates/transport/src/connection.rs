//! The connection: one target, one open port at a time.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::broker::open_broker_port;
use crate::retry::retry_open;
use crate::{
    Channel, ConnectionSpec, DeviceFilePort, NoConnPort, Port, PortConfig, PortError, PortReader,
    RAW_PRINT_PORT, ServiceClass, SocketPort, TransportKind,
};

/// How long a freshly spawned broker gets before the retry.
const BROKER_STARTUP: Duration = Duration::from_secs(1);

/// Turns a [`ConnectionSpec`] into an open [`Port`].
///
/// The seam between a [`Connection`] and real hardware; tests substitute
/// their own.
pub trait PortOpener: Send {
    /// Open the port `spec` describes.
    fn open(&self, spec: &ConnectionSpec, config: &PortConfig) -> Result<Box<dyn Port>, PortError>;

    /// Open the firmware upload route for `spec`.
    fn open_flash(
        &self,
        spec: &ConnectionSpec,
        config: &PortConfig,
    ) -> Result<Box<dyn Port>, PortError>;

    /// Whether a host device node is present (serial reset detection).
    fn device_present(&self, device: &str) -> bool {
        crate::device_present(device)
    }
}

/// Opens real sockets, broker sessions, and serial lines.
///
/// Keeps the broker launch command's process handle and reaps it once it
/// exits.
#[derive(Debug, Default)]
pub struct DefaultOpener {
    broker_spawned: AtomicBool,
    launcher: Mutex<Option<Child>>,
}

impl DefaultOpener {
    /// A fresh opener that has not spawned a broker yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pid of the broker launch command while it is still running.
    pub fn launcher_pid(&self) -> Option<u32> {
        self.reap_launcher();
        self.launcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Child::id)
    }

    fn reap_launcher(&self) {
        let mut slot = self.launcher.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(child) = slot.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("broker launcher {} exited: {status}", child.id());
                *slot = None;
            }
            Ok(None) => {}
            Err(e) => log::warn!("broker launcher {}: {e}", child.id()),
        }
    }

    fn open_broker(
        &self,
        spec: &ConnectionSpec,
        channel: Channel,
        config: &PortConfig,
    ) -> Result<SocketPort, PortError> {
        match open_broker_port(spec, channel, config) {
            Err(e) if e.class() == ServiceClass::NoService => {
                let Some(cmd) = config.broker_command.as_deref() else {
                    return Err(e);
                };
                if self.broker_spawned.swap(true, Ordering::AcqRel) {
                    return Err(e);
                }
                log::info!("no broker answering ({e}); starting `{cmd}`");
                let child = Command::new("sh")
                    .arg("-c")
                    .arg(cmd)
                    .spawn()
                    .map_err(|err| PortError::Broker(format!("could not start broker: {err}")))?;
                log::info!("broker launcher running as pid {}", child.id());
                *self.launcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
                std::thread::sleep(BROKER_STARTUP);
                self.reap_launcher();
                open_broker_port(spec, channel, config)
            }
            other => other,
        }
    }
}

impl Drop for DefaultOpener {
    fn drop(&mut self) {
        self.reap_launcher();
    }
}

impl PortOpener for DefaultOpener {
    fn open(&self, spec: &ConnectionSpec, config: &PortConfig) -> Result<Box<dyn Port>, PortError> {
        match spec.kind() {
            TransportKind::Socket => Ok(Box::new(SocketPort::connect(
                spec.host(),
                spec.port(),
                config,
            )?)),
            TransportKind::Broker => Ok(Box::new(self.open_broker(spec, spec.channel(), config)?)),
            TransportKind::Serial => open_serial(spec, config),
            TransportKind::None => Ok(Box::new(NoConnPort::new(config.timeouts.poll))),
        }
    }

    fn open_flash(
        &self,
        spec: &ConnectionSpec,
        config: &PortConfig,
    ) -> Result<Box<dyn Port>, PortError> {
        match spec.kind() {
            TransportKind::Socket => Ok(Box::new(SocketPort::connect_unprobed(
                spec.host(),
                RAW_PRINT_PORT,
                config,
            )?)),
            TransportKind::Broker => Ok(Box::new(self.open_broker(
                spec,
                Channel::Reflash,
                config,
            )?)),
            TransportKind::Serial => {
                let path = match (&config.flash_device, spec.device()) {
                    (Some(dev), _) => dev.clone(),
                    (None, Some(dev)) => dev.into(),
                    (None, None) => {
                        return Err(PortError::InvalidSpec("serial spec without device".into()));
                    }
                };
                Ok(Box::new(DeviceFilePort::open(&path)?))
            }
            TransportKind::None => Ok(Box::new(NoConnPort::new(config.timeouts.poll))),
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(spec: &ConnectionSpec, config: &PortConfig) -> Result<Box<dyn Port>, PortError> {
    let device = spec
        .device()
        .ok_or_else(|| PortError::InvalidSpec("serial spec without device".into()))?;
    Ok(Box::new(crate::SerialLine::open(device, config)?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(_spec: &ConnectionSpec, _config: &PortConfig) -> Result<Box<dyn Port>, PortError> {
    Err(PortError::SerialUnavailable)
}

// ── Connection ──────────────────────────────────────────────────────────

/// Owns the current port and remembers which spec opened it.
///
/// At most one port is open at a time; opening a new one closes the old
/// one first (as an expected loss, so its reader goes quiet).
pub struct Connection {
    opener: Box<dyn PortOpener>,
    config: PortConfig,
    port: Option<Box<dyn Port>>,
    spec: Option<ConnectionSpec>,
    last_good: Option<ConnectionSpec>,
}

impl Connection {
    /// A closed connection using real transports.
    pub fn new(config: PortConfig) -> Self {
        Self::with_opener(Box::new(DefaultOpener::new()), config)
    }

    /// A closed connection using `opener` for every open.
    pub fn with_opener(opener: Box<dyn PortOpener>, config: PortConfig) -> Self {
        Self {
            opener,
            config,
            port: None,
            spec: None,
            last_good: None,
        }
    }

    /// Open a connection from user input.
    ///
    /// `last` (or nothing) reuses the last spec that opened successfully.
    pub fn open(&mut self, input: &str) -> Result<ConnectionSpec, PortError> {
        let input = input.trim();
        let spec = if input.is_empty() || input.eq_ignore_ascii_case("last") {
            self.last_good
                .clone()
                .ok_or_else(|| PortError::InvalidSpec("no previous connection".into()))?
        } else {
            ConnectionSpec::parse(input)?
        };
        self.open_spec(spec)
    }

    /// Open `spec`, retrying per the retry config.
    pub fn open_spec(&mut self, spec: ConnectionSpec) -> Result<ConnectionSpec, PortError> {
        self.close(true);
        log::debug!("opening {spec}");
        let port = retry_open(&self.config.retry, || self.opener.open(&spec, &self.config))?;
        log::info!("connected: {}", port.describe());
        self.port = Some(port);
        self.spec = Some(spec.clone());
        self.last_good = Some(spec.clone());
        Ok(spec)
    }

    /// Close and reopen the current (or last good) spec.
    pub fn reconnect(&mut self) -> Result<ConnectionSpec, PortError> {
        let spec = self
            .spec
            .clone()
            .or_else(|| self.last_good.clone())
            .ok_or_else(|| PortError::InvalidSpec("nothing to reconnect to".into()))?;
        self.open_spec(spec)
    }

    /// Close the port, if any. Idempotent.
    pub fn close(&mut self, loss_expected: bool) {
        if let Some(mut port) = self.port.take() {
            port.close(loss_expected);
        }
    }

    /// Write raw bytes to the open port.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        match self.port.as_mut() {
            Some(port) => port.write(data),
            None => Err(PortError::PortClosed),
        }
    }

    /// A reader handle for the open port.
    pub fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        match self.port.as_ref() {
            Some(port) => port.reader(),
            None => Err(PortError::PortClosed),
        }
    }

    /// Whether a port is open.
    pub fn is_open(&self) -> bool {
        self.port.as_ref().is_some_and(|p| p.is_open())
    }

    /// Spec of the current port (kept after a close, for reconnect).
    pub fn spec(&self) -> Option<&ConnectionSpec> {
        self.spec.as_ref()
    }

    /// Last spec that opened successfully.
    pub fn last_good(&self) -> Option<&ConnectionSpec> {
        self.last_good.as_ref()
    }

    /// Seed the last good spec (from the persisted store).
    pub fn set_last_good(&mut self, spec: ConnectionSpec) {
        self.last_good = Some(spec);
    }

    /// Open the firmware upload route for the current spec.
    pub fn open_flash(&self) -> Result<Box<dyn Port>, PortError> {
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| PortError::InvalidSpec("not connected".into()))?;
        self.opener.open_flash(spec, &self.config)
    }

    /// Whether `device` is currently present on the host.
    pub fn device_present(&self, device: &str) -> bool {
        self.opener.device_present(device)
    }

    /// Extra line terminator of the open port.
    pub fn terminator(&self) -> Option<u8> {
        self.port.as_ref().and_then(|p| p.terminator())
    }

    /// The port configuration.
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Description of the open port, or "closed".
    pub fn describe(&self) -> String {
        match &self.port {
            Some(port) if port.is_open() => port.describe(),
            _ => "closed".to_string(),
        }
    }
}

//! Client for the device broker daemon.
//!
//! The broker multiplexes directly attached devices over TCP with a tiny
//! line protocol. Each request is one line; each reply is one line:
//!
//! ```text
//! list                  -> "<id> <id> ..."
//! info <id>             -> "MFG:...;MDL:<model>;SN:<serial>;..."
//! connect <id> <chan>   -> "ok" | <error text>
//! ```
//!
//! After `ok` the same socket carries the device's channel data.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::addr::resolve_target_addr;
use crate::tcp::open_stream;
use crate::{Channel, ConnectionSpec, PortConfig, PortError, SocketPort};

static MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"MDL:(.*?);").expect("model pattern is valid"));
static SERIAL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SN:(.*?);").expect("serial number pattern is valid"));

/// Longest reply line accepted from the broker.
const MAX_REPLY: usize = 4096;

/// What the broker knows about one attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Broker-assigned device id.
    pub id: String,
    /// Raw device descriptor string.
    pub raw: String,
    /// Model name (`MDL:` field), if present.
    pub model: Option<String>,
    /// Serial number (`SN:` field), if present.
    pub serial: Option<String>,
}

impl DeviceInfo {
    /// Split a raw descriptor into model and serial number.
    pub fn parse(id: &str, raw: &str) -> DeviceInfo {
        let field = |re: &Regex| {
            re.captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        };
        DeviceInfo {
            id: id.to_string(),
            raw: raw.to_string(),
            model: field(&MODEL),
            serial: field(&SERIAL_NUMBER),
        }
    }

    fn matches(&self, specifier: &str) -> bool {
        self.id.contains(specifier)
            || self.raw.contains(specifier)
            || self.model.as_deref().is_some_and(|m| m.contains(specifier))
            || self.serial.as_deref().is_some_and(|s| s.contains(specifier))
    }
}

/// Pick the device a specifier refers to.
///
/// With a specifier, the first device whose id or descriptor contains it.
/// Without one, the first device.
pub fn select_device<'a>(
    devices: &'a [DeviceInfo],
    specifier: Option<&str>,
) -> Result<&'a DeviceInfo, PortError> {
    let found = match specifier {
        Some(sp) => devices.iter().find(|d| d.matches(sp)),
        None => {
            if devices.len() > 1 {
                log::warn!(
                    "{} devices attached, using {} (add #specifier to choose)",
                    devices.len(),
                    devices[0].id
                );
            }
            devices.first()
        }
    };
    found.ok_or_else(|| PortError::DeviceNotFound {
        specifier: specifier.unwrap_or_default().to_string(),
    })
}

/// An open control connection to a broker.
pub struct BrokerClient {
    stream: TcpStream,
    addr: SocketAddr,
    reply_timeout: Duration,
}

impl BrokerClient {
    /// Connect to the broker at `host:port`.
    pub fn connect(host: &str, port: u16, config: &PortConfig) -> Result<Self, PortError> {
        let addr = resolve_target_addr(host, port)?;
        let stream = open_stream(&addr, config)?;
        Ok(Self {
            stream,
            addr,
            reply_timeout: config.timeouts.broker,
        })
    }

    /// Ids of all attached devices.
    pub fn list(&mut self) -> Result<Vec<String>, PortError> {
        let reply = self.request("list")?;
        Ok(reply.split_whitespace().map(str::to_string).collect())
    }

    /// Descriptor of one device.
    pub fn device_info(&mut self, id: &str) -> Result<DeviceInfo, PortError> {
        let reply = self.request(&format!("info {id}"))?;
        Ok(DeviceInfo::parse(id, &reply))
    }

    /// Every attached device with its descriptor.
    pub fn devices(&mut self) -> Result<Vec<DeviceInfo>, PortError> {
        let ids = self.list()?;
        ids.iter().map(|id| self.device_info(id)).collect()
    }

    /// Switch this connection to carry `channel` of device `id`.
    pub fn attach(
        mut self,
        id: &str,
        channel: Channel,
        config: &PortConfig,
    ) -> Result<SocketPort, PortError> {
        let reply = self.request(&format!("connect {id} {channel}"))?;
        if reply != "ok" {
            return Err(PortError::Broker(format!(
                "connect {id} {channel} refused: {reply}"
            )));
        }
        log::info!("broker {} attached device {id} on {channel}", self.addr);
        Ok(SocketPort::from_stream(self.stream, self.addr, config))
    }

    fn request(&mut self, line: &str) -> Result<String, PortError> {
        log::debug!("broker <- {line}");
        self.stream
            .write_all(format!("{line}\n").as_bytes())
            .map_err(|e| PortError::Broker(format!("send {line:?}: {e}")))?;
        let reply = self.read_line()?;
        log::debug!("broker -> {reply}");
        if let Some(msg) = reply.strip_prefix("error") {
            return Err(PortError::Broker(msg.trim_start_matches([':', ' ']).to_string()));
        }
        Ok(reply)
    }

    /// Read one reply line a byte at a time, so nothing that follows the
    /// line (device data after `ok`) gets swallowed by a buffer.
    fn read_line(&mut self) -> Result<String, PortError> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if Instant::now() >= deadline {
                return Err(PortError::Broker("timed out waiting for reply".into()));
            }
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(PortError::Broker("broker closed the connection".into())),
                Ok(_) => match byte[0] {
                    b'\n' => break,
                    b'\r' => {}
                    b => {
                        if line.len() >= MAX_REPLY {
                            return Err(PortError::Broker("reply too long".into()));
                        }
                        line.push(b);
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(PortError::Broker(format!("read reply: {e}"))),
            }
        }
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Open a data port for `spec` through the broker.
pub(crate) fn open_broker_port(
    spec: &ConnectionSpec,
    channel: Channel,
    config: &PortConfig,
) -> Result<SocketPort, PortError> {
    let mut client = BrokerClient::connect(spec.host(), spec.port(), config)?;
    let devices = client.devices()?;
    let id = select_device(&devices, spec.specifier())?.id.clone();
    client.attach(&id, channel, config)
}

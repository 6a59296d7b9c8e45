//! Connection specifier parsing.
//!
//! A specifier is the single string a user types to pick a target:
//!
//! ```text
//! serialDevice | [host][:port|channel][/channel][#specifier] | none
//! ```
//!
//! `port` is a number or one of the names `broker`, `shell`, `udw`. A bare
//! channel name in the port position means "go through the broker on that
//! channel". The `#specifier` substring picks one device when a broker
//! reports several. `last` is not a specifier; [`Connection`](crate::Connection)
//! resolves it to the last spec that opened successfully.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::PortError;

/// Default port of the raw underware socket service.
pub const UDW_PORT: u16 = 7436;
/// Default port of the device broker daemon.
pub const BROKER_PORT: u16 = 7435;
/// Default port of the target's shell service.
pub const SHELL_PORT: u16 = 7437;
/// Raw (JetDirect) port used to stream firmware to network targets.
pub const RAW_PRINT_PORT: u16 = 9100;

static HOST_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>[^:/#]*)(?::(?P<port>[^/#]*))?(?:/(?P<channel>[^#]*))?(?:#(?P<spec>.*))?$")
        .expect("host specifier pattern is valid")
});

static COM_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^com\d+$").expect("COM port pattern is valid"));

/// Which medium a [`ConnectionSpec`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// Direct serial line.
    Serial,
    /// Raw TCP socket to the target.
    Socket,
    /// TCP connection through the device broker daemon.
    Broker,
    /// No connection; writes are discarded.
    None,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Socket => write!(f, "socket"),
            TransportKind::Broker => write!(f, "broker"),
            TransportKind::None => write!(f, "none"),
        }
    }
}

/// Logical channel on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Channel {
    /// Print data channel.
    Print,
    /// Underware/trace channel.
    #[default]
    Debug,
    /// Target shell.
    Shell,
    /// Firmware upload channel (used while flashing).
    Reflash,
}

impl Channel {
    /// Wire name of the channel, as used by the broker protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Print => "print",
            Channel::Debug => "debug",
            Channel::Shell => "shell",
            Channel::Reflash => "reflash",
        }
    }

    /// Parse a channel name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Channel> {
        match name.to_ascii_lowercase().as_str() {
            "print" => Some(Channel::Print),
            "debug" => Some(Channel::Debug),
            "shell" => Some(Channel::Shell),
            "reflash" => Some(Channel::Reflash),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed connection specifier. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionSpec {
    kind: TransportKind,
    host: String,
    port: u16,
    channel: Channel,
    specifier: Option<String>,
    device: Option<String>,
}

impl ConnectionSpec {
    /// A raw socket spec.
    pub fn socket(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: TransportKind::Socket,
            host: host.into(),
            port,
            channel: Channel::Debug,
            specifier: None,
            device: None,
        }
    }

    /// A broker spec on the default broker port.
    pub fn broker(host: impl Into<String>, specifier: Option<String>) -> Self {
        Self {
            kind: TransportKind::Broker,
            host: host.into(),
            port: BROKER_PORT,
            channel: Channel::Debug,
            specifier,
            device: None,
        }
    }

    /// A serial device spec.
    pub fn serial(device: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Serial,
            host: String::new(),
            port: 0,
            channel: Channel::Debug,
            specifier: None,
            device: Some(device.into()),
        }
    }

    /// The "no connection" spec.
    pub fn none() -> Self {
        Self {
            kind: TransportKind::None,
            host: String::new(),
            port: 0,
            channel: Channel::Debug,
            specifier: None,
            device: None,
        }
    }

    /// A copy of this spec on another channel.
    pub fn with_channel(&self, channel: Channel) -> Self {
        Self {
            channel,
            ..self.clone()
        }
    }

    /// Parse a specifier string.
    ///
    /// Pure: the same input always yields the same spec, and
    /// `parse(&spec.to_string()) == Ok(spec)`.
    pub fn parse(input: &str) -> Result<ConnectionSpec, PortError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(PortError::InvalidSpec("empty specifier".into()));
        }
        if s.eq_ignore_ascii_case("last") {
            return Err(PortError::InvalidSpec(
                "\"last\" must be resolved against the previous connection".into(),
            ));
        }
        if s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("noconn") {
            return Ok(ConnectionSpec::none());
        }
        if let Some(path) = s.strip_prefix("serial:") {
            if path.is_empty() {
                return Err(PortError::InvalidSpec("serial: needs a device path".into()));
            }
            return Ok(ConnectionSpec::serial(path));
        }
        if is_serial_device(s) {
            return Ok(ConnectionSpec::serial(s));
        }

        let caps = HOST_SPEC
            .captures(s)
            .ok_or_else(|| PortError::InvalidSpec(s.to_string()))?;
        let host = caps.name("host").map_or("", |m| m.as_str());
        if host.chars().any(char::is_whitespace) {
            return Err(PortError::InvalidSpec(format!("bad host in {s:?}")));
        }
        // `serial:` is the serial device prefix, so it cannot name a host.
        if host == "serial" {
            return Err(PortError::InvalidSpec(format!(
                "{s:?}: use serial:<device> for a serial line"
            )));
        }
        let port_part = caps
            .name("port")
            .map(|m| m.as_str())
            .filter(|p| !p.is_empty());

        let (kind, port, mut channel) = match port_part {
            None if host.is_empty() => (TransportKind::Broker, BROKER_PORT, Channel::Debug),
            None => (TransportKind::Socket, UDW_PORT, Channel::Debug),
            Some("broker") => (TransportKind::Broker, BROKER_PORT, Channel::Debug),
            Some("shell") => (TransportKind::Socket, SHELL_PORT, Channel::Shell),
            Some("udw") => (TransportKind::Socket, UDW_PORT, Channel::Debug),
            Some(p) => {
                if let Some(ch) = Channel::from_name(p) {
                    (TransportKind::Broker, BROKER_PORT, ch)
                } else {
                    let n: u16 = p
                        .parse()
                        .map_err(|_| PortError::InvalidSpec(format!("bad port {p:?} in {s:?}")))?;
                    if n == 0 {
                        return Err(PortError::InvalidSpec(format!("port 0 in {s:?}")));
                    }
                    (TransportKind::Socket, n, Channel::Debug)
                }
            }
        };

        if let Some(ch) = caps.name("channel").map(|m| m.as_str()) {
            channel = Channel::from_name(ch)
                .ok_or_else(|| PortError::InvalidSpec(format!("unknown channel {ch:?}")))?;
        }

        let specifier = caps
            .name("spec")
            .map(|m| m.as_str().to_string())
            .filter(|sp| !sp.is_empty());

        Ok(ConnectionSpec {
            kind,
            host: if host.is_empty() {
                "localhost".to_string()
            } else {
                host.to_string()
            },
            port,
            channel,
            specifier,
            device: None,
        })
    }

    /// Transport medium.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Host name or address (empty for serial and none).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port (0 for serial and none).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Target channel.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Device disambiguation substring.
    pub fn specifier(&self) -> Option<&str> {
        self.specifier.as_deref()
    }

    /// Serial device path.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl fmt::Display for ConnectionSpec {
    /// Canonical form; always re-parses to an equal spec.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportKind::None => write!(f, "none"),
            TransportKind::Serial => {
                let dev = self.device.as_deref().unwrap_or_default();
                if is_serial_device(dev) {
                    write!(f, "{dev}")
                } else {
                    write!(f, "serial:{dev}")
                }
            }
            TransportKind::Socket | TransportKind::Broker => {
                if self.kind == TransportKind::Broker {
                    write!(f, "{}:broker/{}", self.host, self.channel)?;
                } else {
                    write!(f, "{}:{}/{}", self.host, self.port, self.channel)?;
                }
                if let Some(sp) = &self.specifier {
                    write!(f, "#{sp}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::str::FromStr for ConnectionSpec {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionSpec::parse(s)
    }
}

fn is_serial_device(s: &str) -> bool {
    s.starts_with("/dev/") || COM_PORT.is_match(s)
}

//! Raw TCP transport for targets exposing an underware socket.
//!
//! Provides [`SocketPort`], a synchronous TCP transport. Opening performs a
//! one-byte probe so a target without an underware service is reported as
//! NoService right away instead of dropping the link on the first command.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

use crate::addr::resolve_target_addr;
use crate::{Port, PortConfig, PortError, PortReader, PortState};

/// The probe is a bare newline: an empty underware command.
const PROBE: &[u8] = b"\n";

/// A synchronous TCP connection to a target.
pub struct SocketPort {
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<PortState>,
    trace_io: bool,
}

impl SocketPort {
    /// Connect to `host:port` and probe the service.
    ///
    /// Configures the socket with TCP_NODELAY, TCP keepalive (60s interval),
    /// and the poll/write timeouts from [`PortConfig`].
    pub fn connect(host: &str, port: u16, config: &PortConfig) -> Result<Self, PortError> {
        let socket_addr = resolve_target_addr(host, port)?;
        let stream = open_stream(&socket_addr, config)?;
        probe(&stream, &socket_addr, config)?;
        log::info!("connected to {socket_addr}");
        Ok(Self::from_stream(stream, socket_addr, config))
    }

    /// Connect without the probe (firmware upload ports never answer it).
    pub fn connect_unprobed(host: &str, port: u16, config: &PortConfig) -> Result<Self, PortError> {
        let socket_addr = resolve_target_addr(host, port)?;
        let stream = open_stream(&socket_addr, config)?;
        Ok(Self::from_stream(stream, socket_addr, config))
    }

    /// Wrap an already configured stream.
    pub(crate) fn from_stream(stream: TcpStream, addr: SocketAddr, config: &PortConfig) -> Self {
        Self {
            stream,
            addr,
            state: PortState::new_open(),
            trace_io: config.trace_io,
        }
    }

    /// Return the resolved socket address of the target.
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Port for SocketPort {
    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.state.check_open()?;
        if self.trace_io {
            log::trace!("-> {} {:?}", self.addr, String::from_utf8_lossy(data));
        }
        self.stream
            .write_all(data)
            .map_err(PortError::WriteFailed)?;
        self.stream.flush().map_err(PortError::WriteFailed)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        read_stream(&mut self.stream, &self.state, buf)
    }

    fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        self.state.check_open()?;
        let stream = self.stream.try_clone().map_err(PortError::ReadFailed)?;
        Ok(Box::new(SocketReader {
            stream,
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self, loss_expected: bool) {
        if self.state.is_open() {
            log::info!("closing {} (loss expected: {loss_expected})", self.addr);
        }
        self.state.mark_closed(loss_expected);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn describe(&self) -> String {
        format!("socket {}", self.addr)
    }
}

impl Drop for SocketPort {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Read half of a [`SocketPort`].
struct SocketReader {
    stream: TcpStream,
    state: Arc<PortState>,
}

impl PortReader for SocketReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        read_stream(&mut self.stream, &self.state, buf)
    }

    fn loss_expected(&self) -> bool {
        self.state.loss_expected()
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn read_stream(
    stream: &mut TcpStream,
    state: &PortState,
    buf: &mut [u8],
) -> Result<usize, PortError> {
    state.check_open()?;
    match stream.read(buf) {
        Ok(0) if !state.is_open() => Err(PortError::PortClosed),
        Ok(0) => Err(PortError::ConnectionClosed),
        Ok(n) => Ok(n),
        Err(_) if !state.is_open() => Err(PortError::PortClosed),
        Err(e) => Err(PortError::from_read(e)),
    }
}

/// Open a TCP connection and configure the stream (nodelay, keepalive, timeouts).
pub(crate) fn open_stream(addr: &SocketAddr, config: &PortConfig) -> Result<TcpStream, PortError> {
    let stream = TcpStream::connect_timeout(addr, config.timeouts.connect).map_err(|e| {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => PortError::ConnectionRefused {
                addr: addr.to_string(),
                source: e,
            },
            io::ErrorKind::TimedOut => PortError::ConnectionTimeout {
                addr: addr.to_string(),
                timeout: config.timeouts.connect,
                source: e,
            },
            _ => PortError::ConnectionFailed {
                addr: addr.to_string(),
                source: e,
            },
        }
    })?;

    configure_stream(&stream, addr, config)?;
    Ok(stream)
}

/// Write the probe byte and watch for the target hanging up on it.
fn probe(stream: &TcpStream, addr: &SocketAddr, config: &PortConfig) -> Result<(), PortError> {
    let failed = |source: io::Error| PortError::ConnectionFailed {
        addr: addr.to_string(),
        source,
    };

    (&*stream).write_all(PROBE).map_err(|_| PortError::ProbeRejected {
        addr: addr.to_string(),
    })?;

    stream
        .set_read_timeout(Some(config.timeouts.probe.max(Duration::from_millis(1))))
        .map_err(failed)?;
    let verdict = match stream.peek(&mut [0u8; 1]) {
        Ok(0) => Err(PortError::ProbeRejected {
            addr: addr.to_string(),
        }),
        Ok(_) => Ok(()),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            ) =>
        {
            Err(PortError::ProbeRejected {
                addr: addr.to_string(),
            })
        }
        Err(e) => Err(failed(e)),
    };
    stream
        .set_read_timeout(Some(poll_timeout(config)))
        .map_err(failed)?;
    verdict
}

fn poll_timeout(config: &PortConfig) -> Duration {
    config.timeouts.poll.max(Duration::from_millis(1))
}

/// Configure TCP_NODELAY, keepalive, and read/write timeouts on a stream.
fn configure_stream(
    stream: &TcpStream,
    addr: &SocketAddr,
    config: &PortConfig,
) -> Result<(), PortError> {
    let failed = |source: io::Error| PortError::ConnectionFailed {
        addr: addr.to_string(),
        source,
    };

    // Commands are short lines; don't let Nagle hold them back.
    stream.set_nodelay(true).map_err(failed)?;
    configure_keepalive(stream, Duration::from_secs(60)).map_err(failed)?;
    stream
        .set_write_timeout(Some(config.timeouts.write))
        .map_err(failed)?;
    // Reads time out at the poll interval so readers can observe cancellation.
    stream
        .set_read_timeout(Some(poll_timeout(config)))
        .map_err(failed)?;

    Ok(())
}

/// Configure TCP keepalive on a `TcpStream` via `socket2`.
fn configure_keepalive(stream: &TcpStream, interval: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(interval);

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_interval(interval);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}

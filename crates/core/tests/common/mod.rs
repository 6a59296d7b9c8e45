//! Shared test helpers for `udw_toolchain_core` integration tests.

#![allow(unreachable_pub, dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use udw_toolchain_core::{MemorySink, Session, SessionConfig, Sinks};
use udw_toolchain_symbols::{SymbolTables, load_symbols_from_str};
use udw_toolchain_transport::{
    ConnectionSpec, Port, PortConfig, PortError, PortOpener, PortReader, PortState,
};

/// Symbol tables used across the tests.
pub const SYMBOLS: &str = r#"{
    "build": "test-build",
    "flows": [
        {"id": 12, "name": "flow_pen_load", "args": ["x", "y"], "locals": ["count", "slot"],
         "file": "pen.fml", "line": 7100, "value_domain": "status"},
        {"id": 13, "name": "flow_pen_eject", "args": []}
    ],
    "keywords": [{"id": 3, "name": "kw_beep", "args": ["tone"]}],
    "globals": [
        {"id": 5, "name": "g_speed"},
        {"id": 6, "name": "g_table", "length": 8}
    ],
    "constants": [
        {"id": 1, "name": "STATUS_OK", "value": 0, "domain": "status", "is_enum": true},
        {"id": 2, "name": "STATUS_JAM", "value": 9, "domain": "status", "is_enum": true},
        {"id": 3, "name": "MAX_SPEED", "value": 90}
    ],
    "dsids": [{"id": 301, "name": "DSID_PAPER_OUT"}],
    "statements": [
        {"offset": "42", "flow": "flow_pen_load", "file": "pen.fml", "line": "7136"}
    ]
}"#;

/// The test symbol tables.
pub fn tables() -> SymbolTables {
    load_symbols_from_str(SYMBOLS).unwrap()
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ── In-memory target ────────────────────────────────────────────────────

/// Both ends of the in-memory link, plus scripted target behavior.
#[derive(Default)]
pub struct Wire {
    sent: Mutex<Vec<u8>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    flashed: Mutex<Vec<u8>>,
    opened: Mutex<Vec<String>>,
    replies: Mutex<Vec<(String, String)>>,
    device_script: Mutex<VecDeque<bool>>,
    hung_up: AtomicBool,
    /// Opening the flashing route fails.
    pub flash_fails: AtomicBool,
}

impl Wire {
    /// A fresh link.
    pub fn new() -> Arc<Wire> {
        Arc::new(Wire::default())
    }

    /// Make the target send `bytes`.
    pub fn feed(&self, bytes: impl AsRef<[u8]>) {
        self.inbound
            .lock()
            .unwrap()
            .push_back(bytes.as_ref().to_vec());
    }

    /// When a written line contains `trigger`, the target answers `reply`.
    pub fn reply_to(&self, trigger: &str, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .push((trigger.to_string(), reply.to_string()));
    }

    /// Answers of `device_present`, in order; `true` once exhausted.
    pub fn script_device(&self, presence: &[bool]) {
        self.device_script
            .lock()
            .unwrap()
            .extend(presence.iter().copied());
    }

    /// The target drops the link.
    pub fn hang_up(&self) {
        self.hung_up.store(true, Ordering::Release);
    }

    /// Everything written, as text.
    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.sent.lock().unwrap()).into_owned()
    }

    /// Written lines, without the trailing newline.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent_text().lines().map(str::to_string).collect()
    }

    /// Bytes written to the flashing route.
    pub fn flashed(&self) -> Vec<u8> {
        self.flashed.lock().unwrap().clone()
    }

    /// Specs opened, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    fn write(&self, data: &[u8]) {
        self.sent.lock().unwrap().extend_from_slice(data);
        let text = String::from_utf8_lossy(data).into_owned();
        for (trigger, reply) in self.replies.lock().unwrap().iter() {
            if text.contains(trigger.as_str()) {
                self.feed(reply.as_bytes());
            }
        }
    }
}

/// A port backed by a [`Wire`].
pub struct MemoryPort {
    wire: Arc<Wire>,
    state: Arc<PortState>,
    describe: String,
}

impl Port for MemoryPort {
    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.state.check_open()?;
        self.wire.write(data);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        read_wire(&self.wire, &self.state, buf)
    }

    fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        self.state.check_open()?;
        Ok(Box::new(MemoryReader {
            wire: Arc::clone(&self.wire),
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self, loss_expected: bool) {
        self.state.mark_closed(loss_expected);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn describe(&self) -> String {
        self.describe.clone()
    }
}

struct MemoryReader {
    wire: Arc<Wire>,
    state: Arc<PortState>,
}

impl PortReader for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        read_wire(&self.wire, &self.state, buf)
    }

    fn loss_expected(&self) -> bool {
        self.state.loss_expected()
    }
}

fn read_wire(wire: &Wire, state: &PortState, buf: &mut [u8]) -> Result<usize, PortError> {
    if !state.is_open() {
        return Err(PortError::PortClosed);
    }
    if wire.hung_up.load(Ordering::Acquire) {
        return Err(PortError::ConnectionClosed);
    }
    let next = wire.inbound.lock().unwrap().pop_front();
    match next {
        Some(mut chunk) => {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                wire.inbound.lock().unwrap().push_front(chunk);
            }
            Ok(n)
        }
        None => {
            thread::sleep(Duration::from_millis(5));
            Err(PortError::TryAgain)
        }
    }
}

/// The flashing route: records bytes into the wire.
struct FlashPort {
    wire: Arc<Wire>,
    state: Arc<PortState>,
}

impl Port for FlashPort {
    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.state.check_open()?;
        self.wire.flashed.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, PortError> {
        Err(PortError::TryAgain)
    }

    fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        Err(PortError::PortClosed)
    }

    fn close(&mut self, loss_expected: bool) {
        self.state.mark_closed(loss_expected);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn describe(&self) -> String {
        "flash route".to_string()
    }
}

/// Opens [`MemoryPort`]s on a shared [`Wire`] for any spec.
pub struct MockOpener {
    wire: Arc<Wire>,
}

impl MockOpener {
    /// An opener on `wire`.
    pub fn boxed(wire: &Arc<Wire>) -> Box<dyn PortOpener> {
        Box::new(MockOpener {
            wire: Arc::clone(wire),
        })
    }
}

impl PortOpener for MockOpener {
    fn open(&self, spec: &ConnectionSpec, _config: &PortConfig) -> Result<Box<dyn Port>, PortError> {
        self.wire.opened.lock().unwrap().push(spec.to_string());
        self.wire.hung_up.store(false, Ordering::Release);
        Ok(Box::new(MemoryPort {
            wire: Arc::clone(&self.wire),
            state: PortState::new_open(),
            describe: format!("memory {spec}"),
        }))
    }

    fn open_flash(
        &self,
        spec: &ConnectionSpec,
        _config: &PortConfig,
    ) -> Result<Box<dyn Port>, PortError> {
        if self.wire.flash_fails.load(Ordering::Acquire) {
            return Err(PortError::Broker(format!("no reflash channel on {spec}")));
        }
        Ok(Box::new(FlashPort {
            wire: Arc::clone(&self.wire),
            state: PortState::new_open(),
        }))
    }

    fn device_present(&self, _device: &str) -> bool {
        self.wire.device_script.lock().unwrap().pop_front().unwrap_or(true)
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

/// Port settings that fail fast.
pub fn fast_port_config() -> PortConfig {
    let mut cfg = PortConfig::default();
    cfg.retry.max_attempts = 1;
    cfg.timeouts.poll = Duration::from_millis(20);
    cfg
}

/// Session settings with fast timeouts.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig {
        port: fast_port_config(),
        sync_timeout: Some(Duration::from_secs(2)),
        ..SessionConfig::default()
    };
    config.flash.ready_timeout = Duration::from_millis(200);
    config.flash.reset_timeout = Duration::from_secs(2);
    config.flash.poll = Duration::from_millis(5);
    config
}

/// A session on `wire` with the test symbols, collecting output in memory.
pub fn session_with(config: SessionConfig, wire: &Arc<Wire>) -> (Session, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let session = Session::with_tables(
        config,
        tables(),
        Sinks::all(&sink),
        Some(MockOpener::boxed(wire)),
    );
    (session, sink)
}

/// A connected session on `wire`.
pub fn connected(spec: &str, wire: &Arc<Wire>) -> (Session, Arc<MemorySink>) {
    let (mut session, sink) = session_with(test_config(), wire);
    session.connect(spec).unwrap();
    (session, sink)
}

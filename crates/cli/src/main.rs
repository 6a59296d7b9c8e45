mod config;
mod render;

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ariadne::{Color, Fmt};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Receiver;
use udw_toolchain_core::{
    BackupSink, DEFAULT_PROMPT, Decoder, FileBackup, Flow, NullSink, Outcome, PipelineConfig,
    RenderSink, RenderedLine, Session, SessionConfig, Shared, Sinks, SourceSink, Tag,
};
use udw_toolchain_symbols::{SymbolStore, SymbolTables, load_symbols};
use udw_toolchain_transport::{
    BROKER_PORT, BrokerClient, ConnectionSpec, DEFAULT_BAUD, DeviceInfo, PortConfig, PortError,
};

use crate::config::{FileConfig, default_state_dir, expand_home};
use crate::render::{Format, TerminalSink};

/// How long queued target output may take to drain at exit.
const DRAIN_ON_EXIT: Duration = Duration::from_millis(500);

// ── CLI definition ──────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "udw",
    version,
    about = "Underware debugging client: interactive sessions, offline trace decoding, and port discovery"
)]
struct Cli {
    /// Output mode: "pretty" for coloured terminal output, "json" for one
    /// JSON object per line. Defaults to "pretty" when stdout is a TTY,
    /// "json" otherwise.
    #[arg(long, global = true, value_parser = ["pretty", "json"])]
    output: Option<String>,

    /// JSON configuration file (prompt, symbols, build_command,
    /// broker_command, backup, state_dir, source_dirs).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start a debugging session. Commands are read from stdin, one per line.
    Session(SessionArgs),

    /// Decode a saved trace log.
    Decode {
        file: PathBuf,
        /// Symbol table JSON.
        #[arg(long)]
        symbols: Option<PathBuf>,
        /// Prompt marker of the target console.
        #[arg(long)]
        prompt: Option<String>,
    },

    /// List serial ports and, with --broker, the broker's devices.
    Ports {
        /// Broker address as host[:port].
        #[arg(long)]
        broker: Option<String>,
    },

    /// Parse a port specifier and print its canonical form.
    ParseSpec { spec: String },
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Port to open: host[:port|:shell|:broker][/channel][#device], a serial
    /// device, `none`, or `last`. Without it the session starts unconnected.
    port: Option<String>,

    /// Symbol table JSON.
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Prompt marker of the target console.
    #[arg(long)]
    prompt: Option<String>,

    /// Terminate commands with `;` and echo them.
    #[arg(long)]
    framed: bool,

    /// Append a raw copy of target output to this file.
    #[arg(long)]
    backup: Option<PathBuf>,

    /// Directory holding the last good port.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Host command run by `compile`.
    #[arg(long)]
    build_command: Option<String>,

    /// Command that starts the broker daemon when none is listening.
    #[arg(long)]
    broker_command: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Host device written when flashing a serial target.
    #[arg(long)]
    flash_device: Option<PathBuf>,

    /// Default `sync` timeout, in seconds.
    #[arg(long)]
    sync_timeout: Option<f64>,

    /// Log every transport byte at trace level.
    #[arg(long)]
    trace_io: bool,

    /// Run a command before reading stdin (repeatable).
    #[arg(long = "exec", short = 'e')]
    exec: Vec<String>,
}

// ── Main ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    let format = Format::resolve_or_detect(cli.output.as_deref());
    let file_config = FileConfig::load(cli.config.as_deref())?;

    match cli.cmd {
        Cmd::Session(args) => cmd_session(args, file_config, format),
        Cmd::Decode {
            file,
            symbols,
            prompt,
        } => cmd_decode(&file, symbols, prompt, file_config, format),
        Cmd::Ports { broker } => cmd_ports(broker.as_deref(), format),
        Cmd::ParseSpec { spec } => cmd_parse_spec(&spec, format),
    }
}

// ── Commands ────────────────────────────────────────────────────────────

fn cmd_session(args: SessionArgs, file: FileConfig, format: Format) -> Result<()> {
    let symbols = args.symbols.or(file.symbols);
    let terminal = Arc::new(TerminalSink::new(
        format,
        source_dirs(&file.source_dirs, symbols.as_deref()),
    ));
    let backup: Arc<dyn BackupSink> = match args.backup.or(file.backup) {
        Some(path) => Arc::new(
            FileBackup::open(&path)
                .with_context(|| format!("failed to open backup file '{}'", path.display()))?,
        ),
        None => Arc::new(NullSink),
    };
    let render: Arc<dyn RenderSink> = Arc::<TerminalSink>::clone(&terminal);
    let source: Arc<dyn SourceSink> = terminal;
    let sinks = Sinks {
        render,
        source,
        backup,
    };

    let sync_timeout = match args.sync_timeout {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => bail!("invalid --sync-timeout {secs}"),
        None => None,
    };

    let mut port = PortConfig::default();
    port.baud = args.baud;
    port.flash_device = args.flash_device;
    port.broker_command = args.broker_command.or(file.broker_command);
    port.trace_io = args.trace_io;

    let config = SessionConfig {
        port,
        pipeline: PipelineConfig {
            prompt: args
                .prompt
                .or(file.prompt)
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            ..PipelineConfig::default()
        },
        symbols_path: symbols,
        build_command: args.build_command.or(file.build_command),
        state_dir: args
            .state_dir
            .map(|d| expand_home(&d))
            .or(file.state_dir)
            .or_else(default_state_dir),
        sync_timeout,
        framed: args.framed,
        ..SessionConfig::default()
    };

    let mut session = Session::start(config, sinks.clone(), None);
    match args.port.as_deref() {
        Some(spec) => {
            session
                .connect(spec)
                .with_context(|| format!("failed to open port '{spec}'"))?;
        }
        None => sinks.render.emit(RenderedLine::tagged(
            Tag::Info,
            "not connected; use `connect <port>`",
        )),
    }

    let mut flow = Flow::Continue;
    for command in &args.exec {
        flow = session.execute(command)?;
        if flow == Flow::Quit {
            break;
        }
    }
    if flow == Flow::Continue {
        let input = spawn_stdin();
        while let Ok(line) = input.recv() {
            if session.execute(&line)? == Flow::Quit {
                break;
            }
        }
    }

    session.wait_idle(DRAIN_ON_EXIT);
    session.shutdown();
    Ok(())
}

fn cmd_decode(
    file: &Path,
    symbols: Option<PathBuf>,
    prompt: Option<String>,
    config: FileConfig,
    format: Format,
) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("failed to read trace log '{}'", file.display()))?;
    let symbols = symbols.or(config.symbols);
    let tables = match &symbols {
        Some(path) => load_symbols(path)
            .with_context(|| format!("failed to load symbols '{}'", path.display()))?,
        None => SymbolTables::default(),
    };

    let terminal = Arc::new(TerminalSink::new(
        format,
        source_dirs(&config.source_dirs, symbols.as_deref()),
    ));
    let shared = Arc::new(Shared::new());
    let mut decoder = Decoder::new(
        Arc::new(SymbolStore::new(tables)),
        Arc::clone(&shared),
        Arc::<TerminalSink>::clone(&terminal),
        Arc::<TerminalSink>::clone(&terminal),
    )
    .with_prompt(
        prompt
            .or(config.prompt)
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
    );

    let (mut lines, mut mismatches, mut unresolved) = (0usize, 0usize, 0usize);
    for line in text.lines().map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() {
            continue;
        }
        match decoder.decode(line) {
            Outcome::ProtocolMismatch => mismatches += 1,
            Outcome::ResolutionFailure => unresolved += 1,
            _ => {}
        }
        lines += 1;
    }

    match format {
        Format::Json => {
            let out = serde_json::json!({
                "summary": {
                    "lines": lines,
                    "mismatches": mismatches,
                    "unresolved": unresolved,
                    "symbols_stale": shared.symbols_stale(),
                }
            });
            println!("{out}");
        }
        Format::Pretty => {
            eprintln!("decoded {lines} lines");
            if mismatches + unresolved > 0 {
                eprintln!(
                    "{}",
                    format!(
                        "{mismatches} unknown ids, {unresolved} unresolved stops; are the symbols current?"
                    )
                    .fg(Color::Yellow)
                );
            }
        }
    }
    Ok(())
}

fn cmd_ports(broker: Option<&str>, format: Format) -> Result<()> {
    let serial = serial_ports();
    let devices = broker.map(list_broker);

    match format {
        Format::Json => {
            let broker_json = match (broker, &devices) {
                (Some(addr), Some(Ok(devices))) => serde_json::json!({
                    "address": addr,
                    "ok": true,
                    "devices": devices,
                }),
                (Some(addr), Some(Err(e))) => serde_json::json!({
                    "address": addr,
                    "ok": false,
                    "message": e.to_string(),
                }),
                _ => serde_json::Value::Null,
            };
            let out = serde_json::json!({ "serial": serial, "broker": broker_json });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Format::Pretty => {
            if serial.is_empty() {
                println!("no serial ports");
            }
            for name in &serial {
                println!("{}", name.as_str().fg(Color::Green));
            }
            if let (Some(addr), Some(Ok(devices))) = (broker, &devices) {
                println!("broker {addr}: {} device(s)", devices.len());
                for d in devices {
                    println!(
                        "  {}  {}  {}",
                        d.id.as_str().fg(Color::Green),
                        d.model.as_deref().unwrap_or("?"),
                        d.serial.as_deref().unwrap_or("?").fg(Color::Cyan)
                    );
                }
            }
        }
    }

    if let (Some(addr), Some(Err(e))) = (broker, devices) {
        return Err(e).with_context(|| format!("failed to query broker '{addr}'"));
    }
    Ok(())
}

fn cmd_parse_spec(input: &str, format: Format) -> Result<()> {
    let spec = ConnectionSpec::parse(input)
        .with_context(|| format!("invalid port specifier '{input}'"))?;
    match format {
        Format::Json => {
            let out = serde_json::json!({
                "canonical": spec.to_string(),
                "spec": spec,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Format::Pretty => {
            println!("{}", spec.to_string().fg(Color::Cyan));
            println!("  kind:    {}", spec.kind());
            println!("  host:    {}", spec.host());
            println!("  port:    {}", spec.port());
            println!("  channel: {}", spec.channel());
            if let Some(sp) = spec.specifier() {
                println!("  device:  #{sp}");
            }
            if let Some(dev) = spec.device() {
                println!("  serial:  {dev}");
            }
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Lines typed on stdin, read on their own thread. The channel closes at EOF.
fn spawn_stdin() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new()
        .name("udw-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("stdin: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        log::error!("cannot read stdin: {e}");
    }
    rx
}

/// Config directories, then the directory holding the symbol file.
fn source_dirs(configured: &[PathBuf], symbols: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = configured.to_vec();
    if let Some(dir) = symbols.and_then(Path::parent)
        && !dir.as_os_str().is_empty()
    {
        dirs.push(dir.to_path_buf());
    }
    dirs
}

#[cfg(feature = "serial")]
fn serial_ports() -> Vec<String> {
    udw_toolchain_transport::SerialLine::list_ports()
}

#[cfg(not(feature = "serial"))]
fn serial_ports() -> Vec<String> {
    Vec::new()
}

fn list_broker(addr: &str) -> Result<Vec<DeviceInfo>, PortError> {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| PortError::InvalidSpec(format!("bad broker port in {addr:?}")))?;
            (host, port)
        }
        None => (addr, BROKER_PORT),
    };
    BrokerClient::connect(host, port, &PortConfig::default())?.devices()
}

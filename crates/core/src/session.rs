//! Session wiring: shared signals, pipeline, decoder, target, interpreter.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use udw_toolchain_symbols::{SymbolStore, SymbolTables, load_symbols};
use udw_toolchain_transport::{
    Connection, ConnectionSpec, LastPortStore, PortConfig, PortError, PortOpener,
};

use crate::decoder::Decoder;
use crate::interpreter::{Flow, Interpreter, InterpreterConfig};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::render::{self, BackupSink, NullSink, RenderSink, SourceSink};
use crate::shared::Shared;
use crate::target::{FlashConfig, Target};

/// Errors that end a session.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The requested port could not be opened.
    #[error("cannot connect to {input:?}: {source}")]
    Connect {
        /// Specifier as given.
        input: String,
        /// Underlying error.
        #[source]
        source: PortError,
    },

    /// The last-port record could not be written.
    #[error("cannot save the last port to {}: {source}", path.display())]
    PersistLastPort {
        /// Record path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Where a session's output goes.
#[derive(Clone)]
pub struct Sinks {
    /// Rendered lines.
    pub render: Arc<dyn RenderSink>,
    /// Source windows.
    pub source: Arc<dyn SourceSink>,
    /// Raw copy of target output.
    pub backup: Arc<dyn BackupSink>,
}

impl Sinks {
    /// One object serving all three roles.
    pub fn all<S>(sink: &Arc<S>) -> Self
    where
        S: RenderSink + SourceSink + BackupSink + 'static,
    {
        let render: Arc<dyn RenderSink> = Arc::<S>::clone(sink);
        let source: Arc<dyn SourceSink> = Arc::<S>::clone(sink);
        let backup: Arc<dyn BackupSink> = Arc::<S>::clone(sink);
        Self {
            render,
            source,
            backup,
        }
    }

    /// Render only; source windows and backups are discarded.
    pub fn render_only(render: Arc<dyn RenderSink>) -> Self {
        Self {
            render,
            source: Arc::new(NullSink),
            backup: Arc::new(NullSink),
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Transport settings.
    pub port: PortConfig,
    /// Flash handshake timing.
    pub flash: FlashConfig,
    /// Line pipeline settings.
    pub pipeline: PipelineConfig,
    /// Symbol file (JSON).
    pub symbols_path: Option<PathBuf>,
    /// Host command run by `compile`.
    pub build_command: Option<String>,
    /// Directory holding the last-port record.
    pub state_dir: Option<PathBuf>,
    /// Default `sync` timeout.
    pub sync_timeout: Option<Duration>,
    /// Start in framed mode.
    pub framed: bool,
}

/// A running debugging session.
pub struct Session {
    interpreter: Interpreter,
    shared: Arc<Shared>,
    symbols: Arc<SymbolStore>,
    sinks: Sinks,
}

impl Session {
    /// Build every component and start the consumer thread.
    ///
    /// `opener` replaces the real transports (tests, embedding). A symbol
    /// file that cannot be loaded is reported and the session starts with
    /// empty tables.
    pub fn start(config: SessionConfig, sinks: Sinks, opener: Option<Box<dyn PortOpener>>) -> Self {
        let tables = match &config.symbols_path {
            Some(path) => match load_symbols(path) {
                Ok(tables) => tables,
                Err(e) => {
                    render::warning(&*sinks.render, format!("symbols not loaded: {e}"));
                    SymbolTables::default()
                }
            },
            None => SymbolTables::default(),
        };
        Self::with_tables(config, tables, sinks, opener)
    }

    /// Like [`Session::start`], with tables already loaded.
    pub fn with_tables(
        config: SessionConfig,
        tables: SymbolTables,
        sinks: Sinks,
        opener: Option<Box<dyn PortOpener>>,
    ) -> Self {
        let symbols = Arc::new(SymbolStore::new(tables));
        let shared = Arc::new(Shared::new());

        let decoder = Decoder::new(
            Arc::clone(&symbols),
            Arc::clone(&shared),
            Arc::clone(&sinks.render),
            Arc::clone(&sinks.source),
        )
        .with_prompt(config.pipeline.prompt.clone());
        let pipeline = Pipeline::start(
            config.pipeline.clone(),
            Arc::clone(&shared),
            decoder,
            Arc::clone(&sinks.render),
            Arc::clone(&sinks.backup),
        );

        let connection = match opener {
            Some(opener) => Connection::with_opener(opener, config.port.clone()),
            None => Connection::new(config.port.clone()),
        };
        let mut target = Target::new(
            connection,
            Arc::clone(&shared),
            Arc::clone(&sinks.render),
            config.flash.clone(),
        );
        target.set_framed(config.framed);

        let last_port = config.state_dir.as_deref().map(LastPortStore::in_dir);
        if let Some(store) = &last_port {
            match store.load() {
                Ok(Some(spec)) => {
                    log::debug!("last port: {spec}");
                    target.set_last_good(spec);
                }
                Ok(None) => {}
                Err(e) => log::warn!("cannot read {}: {e}", store.path().display()),
            }
        }

        let interpreter = Interpreter::new(
            target,
            pipeline,
            Arc::clone(&symbols),
            Arc::clone(&shared),
            sinks.clone(),
            InterpreterConfig {
                symbols_path: config.symbols_path,
                build_command: config.build_command,
                sync_timeout: config.sync_timeout,
                last_port,
            },
        );
        Self {
            interpreter,
            shared,
            symbols,
            sinks,
        }
    }

    /// Open the port named on the command line (empty = last good).
    ///
    /// Unlike the `connect` command, failure is returned: a port that was
    /// asked for up front and cannot be opened ends the session.
    pub fn connect(&mut self, input: &str) -> Result<ConnectionSpec, SessionError> {
        self.interpreter.connect_strict(input)
    }

    /// Run one input line.
    pub fn execute(&mut self, line: &str) -> Result<Flow, SessionError> {
        self.interpreter.execute(line)
    }

    /// The user started typing: pause the display while output is busy.
    pub fn note_typing(&self) {
        if self.shared.rate.is_busy() && self.shared.gate.is_set() {
            log::debug!("output busy; pausing display while typing");
            self.shared.gate.clear();
        }
    }

    /// Queue a saved log for decoding.
    pub fn decode_file(&mut self, path: &Path) -> Result<usize, SessionError> {
        self.interpreter.decode_file(path)
    }

    /// Wait for queued lines to be decoded.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.interpreter.pipeline().wait_idle(timeout)
    }

    /// Shared signals.
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Symbol snapshot store.
    pub fn symbols(&self) -> &Arc<SymbolStore> {
        &self.symbols
    }

    /// Output sinks.
    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    /// The interpreter.
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Whether a port is open.
    pub fn is_open(&self) -> bool {
        self.interpreter.target().is_open()
    }

    /// Close the port and stop all threads.
    pub fn shutdown(mut self) {
        self.interpreter.shutdown();
    }
}

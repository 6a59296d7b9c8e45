//! The optional JSON configuration file.
//!
//! Every field is optional; command-line flags override the file.
//!
//! ```json
//! {
//!   "prompt": "> ",
//!   "symbols": "build/pen.symbols.json",
//!   "build_command": "make -C firmware",
//!   "broker_command": "udw-broker --daemon",
//!   "backup": "logs/session.log",
//!   "state_dir": "~/.udw",
//!   "source_dirs": ["firmware/src"]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings read from `--config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    /// Prompt marker of the target console.
    pub prompt: Option<String>,
    /// Symbol table JSON.
    pub symbols: Option<PathBuf>,
    /// Host command run by `compile`.
    pub build_command: Option<String>,
    /// Command that starts the broker daemon.
    pub broker_command: Option<String>,
    /// Raw backup of everything the target sends.
    pub backup: Option<PathBuf>,
    /// Where the last good port is remembered.
    pub state_dir: Option<PathBuf>,
    /// Directories searched for source files shown by `list`.
    pub source_dirs: Vec<PathBuf>,
}

impl FileConfig {
    /// Read `path`, or the defaults when no path is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let mut config: FileConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        config.state_dir = config.state_dir.map(|d| expand_home(&d));
        Ok(config)
    }
}

/// `~/x` with `$HOME` substituted.
pub(crate) fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// `$HOME/.udw`, when there is a home directory.
pub(crate) fn default_state_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".udw"))
}

//! Persisting the last connection that worked.

use std::io;
use std::path::{Path, PathBuf};

use crate::ConnectionSpec;

/// File name of the store inside the state directory.
const FILE_NAME: &str = "last_port";

/// One-line file holding the canonical form of the last good spec.
#[derive(Debug, Clone)]
pub struct LastPortStore {
    path: PathBuf,
}

impl LastPortStore {
    /// A store at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store inside a state directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(FILE_NAME))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The persisted spec, if any.
    ///
    /// A missing file is `Ok(None)`. An unparseable one is logged and
    /// treated as missing.
    pub fn load(&self) -> io::Result<Option<ConnectionSpec>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match ConnectionSpec::parse(text.trim()) {
            Ok(spec) => Ok(Some(spec)),
            Err(e) => {
                log::warn!("ignoring {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }

    /// Persist `spec`, creating the state directory if needed.
    pub fn save(&self, spec: &ConnectionSpec) -> io::Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, format!("{spec}\n"))
    }
}

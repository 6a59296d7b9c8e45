//! Firmware symbol tables.
//!
//! The trace decoder and command interpreter resolve numeric wire ids
//! (flows, keywords, globals, constants, DSIDs, statement offsets) to names
//! through these tables. They are produced outside this workspace from build
//! artifacts and exported as JSON; the core only reads them.
//!
//! Tables are immutable once loaded. A [`SymbolStore`] hands out
//! `Arc<SymbolTables>` snapshots and swaps in a whole new snapshot on reload,
//! so a reader never observes a half-updated table.

mod store;
mod tables;
mod values;

pub use store::SymbolStore;
pub use tables::{Constant, Dsid, Flow, Global, Keyword, Statement, SymbolTables, source_key};
pub use values::ValueName;

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur when loading symbol tables.
#[derive(Debug, Error)]
pub enum SymbolError {
    /// The symbol file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// JSON deserialization failed.
    #[error("invalid symbol JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Two entries of one table share an id.
    #[error("duplicate id {id} in {table}")]
    DuplicateId {
        /// Table name (`flows`, `globals`, ...).
        table: &'static str,
        /// The repeated id.
        id: u32,
    },
}

/// Load and validate symbol tables from a JSON string.
///
/// Every table is optional; missing tables are empty. Ids must be unique
/// within a table.
pub fn load_symbols_from_str(s: &str) -> Result<SymbolTables, SymbolError> {
    let tables: SymbolTables = serde_json::from_str(s)?;
    tables.validate()?;
    log::debug!(
        "loaded symbols: {} flows, {} keywords, {} globals, {} constants, {} dsids, {} statements",
        tables.flows.len(),
        tables.keywords.len(),
        tables.globals.len(),
        tables.constants.len(),
        tables.dsids.len(),
        tables.statements.len()
    );
    Ok(tables)
}

/// Load and validate symbol tables from a JSON file.
pub fn load_symbols(path: &Path) -> Result<SymbolTables, SymbolError> {
    let text = std::fs::read_to_string(path).map_err(|source| SymbolError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_symbols_from_str(&text)
}

//! Versioned snapshot holder.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::{SymbolError, SymbolTables, load_symbols};

#[derive(Debug)]
struct Snapshot {
    generation: u64,
    tables: Arc<SymbolTables>,
}

/// The current symbol tables, replaced wholesale on reload.
///
/// Readers take an `Arc` snapshot and keep using it for as long as they
/// like; a reload never mutates a snapshot someone is holding.
#[derive(Debug)]
pub struct SymbolStore {
    current: RwLock<Snapshot>,
}

impl Default for SymbolStore {
    fn default() -> Self {
        Self::new(SymbolTables::default())
    }
}

impl SymbolStore {
    /// A store holding `tables` as generation 0.
    pub fn new(tables: SymbolTables) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                generation: 0,
                tables: Arc::new(tables),
            }),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<SymbolTables> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current.tables)
    }

    /// Number of replacements so far.
    pub fn generation(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Swap in new tables; returns the new generation.
    pub fn replace(&self, tables: SymbolTables) -> u64 {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.generation += 1;
        current.tables = Arc::new(tables);
        log::info!(
            "symbols replaced (generation {}, build {})",
            current.generation,
            current.tables.build.as_deref().unwrap_or("unknown")
        );
        current.generation
    }

    /// Load `path` and swap it in. On error the current snapshot stays.
    pub fn reload(&self, path: &Path) -> Result<u64, SymbolError> {
        let tables = load_symbols(path)?;
        Ok(self.replace(tables))
    }
}

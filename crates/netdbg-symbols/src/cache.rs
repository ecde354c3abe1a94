//! Session-scoped cache of open portable PDB readers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::paths::normalize_path;
use crate::pdb::PortablePdb;

/// Result of looking up symbols for a module.
#[derive(Debug, Clone)]
pub enum SymbolLookup {
    /// A parsed reader, shared for the life of the cache entry.
    Loaded(Arc<PortablePdb>),
    /// No `.pdb` exists next to the module.
    NoSymbols,
    /// The symbol file exists but failed to load; retried only after
    /// [`SymbolCache::invalidate`].
    Failed(String),
}

impl SymbolLookup {
    /// The reader, if symbols loaded.
    #[must_use]
    pub fn reader(&self) -> Option<Arc<PortablePdb>> {
        match self {
            SymbolLookup::Loaded(pdb) => Some(Arc::clone(pdb)),
            _ => None,
        }
    }
}

/// Owns open PDB readers keyed by normalized module path.
///
/// Readers are opened lazily, kept for the session, and shared out as
/// `Arc`s so an in-flight query can never observe a closed reader.
/// Load failures become negative entries so a malformed PDB is not
/// re-parsed on every query.
#[derive(Debug, Default)]
pub struct SymbolCache {
    entries: RwLock<FxHashMap<String, SymbolLookup>>,
}

impl SymbolCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached lookup for a module, loading on first use.
    pub fn get_or_load(&self, module_path: &str) -> SymbolLookup {
        let key = normalize_path(module_path);
        if let Some(entry) = self.entries.read().get(&key) {
            return entry.clone();
        }
        let lookup = load_symbols(module_path);
        let mut entries = self.entries.write();
        entries
            .entry(key)
            .or_insert_with(|| lookup.clone())
            .clone()
    }

    /// Drop both positive and negative entries for a module.
    pub fn invalidate(&self, module_path: &str) {
        let key = normalize_path(module_path);
        self.entries.write().remove(&key);
    }

    /// Drop every entry (session teardown against a new target).
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached entries, including negative ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Standard symbol location: same directory, same base name, `.pdb`.
fn pdb_path_for(module_path: &str) -> PathBuf {
    Path::new(module_path).with_extension("pdb")
}

fn load_symbols(module_path: &str) -> SymbolLookup {
    let pdb_path = pdb_path_for(module_path);
    if !pdb_path.is_file() {
        debug!(module = module_path, "no symbol file");
        return SymbolLookup::NoSymbols;
    }
    match PortablePdb::open(&pdb_path) {
        Ok(pdb) => {
            debug!(
                module = module_path,
                documents = pdb.documents().len(),
                methods = pdb.methods().len(),
                "symbols loaded"
            );
            SymbolLookup::Loaded(Arc::new(pdb))
        }
        Err(err) => {
            warn!(module = module_path, error = %err, "symbol load failed");
            SymbolLookup::Failed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pdb_is_a_negative_entry() {
        let cache = SymbolCache::new();
        let lookup = cache.get_or_load("/nonexistent/app.dll");
        assert!(matches!(lookup, SymbolLookup::NoSymbols));
        assert_eq!(cache.len(), 1);

        cache.invalidate("/nonexistent/app.dll");
        assert!(cache.is_empty());
    }

    #[test]
    fn lookup_is_keyed_by_normalized_path() {
        let cache = SymbolCache::new();
        let _ = cache.get_or_load("/Missing/App.dll");
        let _ = cache.get_or_load("/missing/app.dll");
        assert_eq!(cache.len(), 1);
    }
}

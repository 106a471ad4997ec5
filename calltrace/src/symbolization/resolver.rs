//! Address → symbol resolution against a snapshot's memory map
//!
//! Lookups are two binary searches: the mapping containing the address,
//! then the nearest preceding symbol in that mapping's module. Module
//! tables are loaded lazily on first reference and shared by every
//! resolver (and every decode worker thread) built on the same
//! [`SymbolCache`].

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use super::memory_maps::ProcMaps;
use super::symbolizer::{ElfSymbolLoader, ModuleSymbols, SymbolLoader, UNKNOWN};

type ModuleSlot = Arc<OnceLock<Option<Arc<ModuleSymbols>>>>;

/// Lazily populated per-module symbol tables
///
/// Each module is loaded at most once: concurrent first lookups of the
/// same module wait for the single load. A module that fails to load is
/// remembered as unavailable.
pub struct SymbolCache {
    loader: Box<dyn SymbolLoader>,
    modules: Mutex<HashMap<Arc<str>, ModuleSlot>>,
}

impl SymbolCache {
    pub fn new(loader: impl SymbolLoader + 'static) -> Self {
        Self { loader: Box::new(loader), modules: Mutex::new(HashMap::new()) }
    }

    /// Cache backed by ELF files on disk
    #[must_use]
    pub fn from_disk() -> Self {
        Self::new(ElfSymbolLoader)
    }

    /// Symbol table of `module`, loading it on first use
    pub fn module(&self, module: &Arc<str>) -> Option<Arc<ModuleSymbols>> {
        let slot = {
            let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(modules.entry(Arc::clone(module)).or_default())
        };

        slot.get_or_init(|| match self.loader.load(module) {
            Ok(symbols) => {
                info!("Symbol table for {module}: {} entries", symbols.len());
                Some(Arc::new(symbols))
            }
            Err(e) => {
                warn!("{e} - addresses in {module} will not be symbolized");
                None
            }
        })
        .clone()
    }

    /// Number of modules referenced so far (loaded or failed)
    pub fn module_count(&self) -> usize {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A resolved function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymInfo {
    /// Path of the executable or shared object
    pub module: Arc<str>,
    /// Demangled function name, or `module+0xOFFSET` without a symbol
    pub name: Arc<str>,
    pub file: Arc<str>,
    pub line: u32,
    /// Offset of the function start within the module file
    pub static_addr: u64,
}

/// Identity used to match returns to calls and to merge call counts
///
/// Every address inside the same function body maps to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolKey {
    Symbol { module: Arc<str>, offset: u64 },
    Address(u64),
}

/// Result of resolving a runtime address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Known(Arc<SymInfo>),
    /// No file-backed mapping contains the address
    Unknown { address: u64 },
}

impl Resolution {
    #[must_use]
    pub fn key(&self) -> SymbolKey {
        match self {
            Self::Known(sym) => {
                SymbolKey::Symbol { module: Arc::clone(&sym.module), offset: sym.static_addr }
            }
            Self::Unknown { address } => SymbolKey::Address(*address),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Known(sym) => &sym.name,
            Self::Unknown { .. } => UNKNOWN,
        }
    }

    /// Display label: `name (file:line)`, optionally with `0xSTATIC@module`
    #[must_use]
    pub fn label(&self, executable_file_info: bool) -> String {
        match self {
            Self::Known(sym) if executable_file_info => format!(
                "{} ({}:{} {:#x}@{})",
                sym.name, sym.file, sym.line, sym.static_addr, sym.module
            ),
            Self::Known(sym) => format!("{} ({}:{})", sym.name, sym.file, sym.line),
            Self::Unknown { address } if executable_file_info => format!("{UNKNOWN} ({address:#x})"),
            Self::Unknown { .. } => UNKNOWN.to_string(),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label(false))
    }
}

/// Resolves runtime addresses of one snapshot sample
#[derive(Clone)]
pub struct SymbolResolver {
    maps: Arc<ProcMaps>,
    cache: Arc<SymbolCache>,
}

impl SymbolResolver {
    pub fn new(maps: Arc<ProcMaps>, cache: Arc<SymbolCache>) -> Self {
        Self { maps, cache }
    }

    /// Resolve a runtime address to its function
    ///
    /// Never fails: addresses outside any file-backed mapping are
    /// `Unknown`, addresses in a module without a usable symbol get an
    /// address-only name.
    pub fn resolve(&self, address: u64) -> Resolution {
        let Some(mapping) = self.maps.find(address) else {
            return Resolution::Unknown { address };
        };
        let Some(offset) = mapping.module_offset(address) else {
            debug!("{address:#x} maps past the end of {}", mapping.path);
            return Resolution::Unknown { address };
        };

        let entry = self.cache.module(&mapping.path).and_then(|symbols| symbols.lookup(offset).cloned());

        let info = match entry {
            Some(entry) => SymInfo {
                module: Arc::clone(&mapping.path),
                name: entry.name,
                file: entry.file,
                line: entry.line,
                static_addr: entry.offset,
            },
            None => SymInfo {
                module: Arc::clone(&mapping.path),
                name: Arc::from(format!("{}+{offset:#x}", module_basename(&mapping.path))),
                file: Arc::from(UNKNOWN),
                line: 0,
                static_addr: offset,
            },
        };
        Resolution::Known(Arc::new(info))
    }

}

fn module_basename(path: &str) -> &str {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path)
}

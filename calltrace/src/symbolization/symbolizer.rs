use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, info};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use rustc_demangle::try_demangle;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::rc::Rc;
use std::sync::Arc;

use crate::domain::SymbolError;

/// Placeholder for a missing name, file or symbol
pub const UNKNOWN: &str = "??";

/// One function entry of a module's symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Offset of the function's first byte within the module file
    pub offset: u64,
    /// Demangled function name
    pub name: Arc<str>,
    /// Source file of the function (`??` without debug info)
    pub file: Arc<str>,
    /// Source line of the function (0 without debug info)
    pub line: u32,
}

impl SymbolEntry {
    pub fn new(offset: u64, name: &str, file: &str, line: u32) -> Self {
        Self { offset, name: Arc::from(name), file: Arc::from(file), line }
    }
}

/// Per-module symbol table sorted by file offset
#[derive(Debug, Clone, Default)]
pub struct ModuleSymbols {
    entries: Vec<SymbolEntry>,
}

impl ModuleSymbols {
    /// Build a table from unordered entries
    ///
    /// Entries sharing an offset (aliases) collapse to the first one given.
    #[must_use]
    pub fn new(mut entries: Vec<SymbolEntry>) -> Self {
        entries.sort_by_key(|e| e.offset);
        entries.dedup_by_key(|e| e.offset);
        Self { entries }
    }

    /// Nearest preceding symbol: the entry with the greatest offset <= `offset`
    ///
    /// Addresses inside a function body resolve to that function.
    #[must_use]
    pub fn lookup(&self, offset: u64) -> Option<&SymbolEntry> {
        let idx = self.entries.partition_point(|e| e.offset <= offset);
        self.entries.get(idx.checked_sub(1)?)
    }

    /// Entries in offset order
    #[must_use]
    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of module symbol tables, consulted at most once per module
pub trait SymbolLoader: Send + Sync {
    /// Load the symbol table of the module at `path`
    ///
    /// # Errors
    /// Returns an error if the module's symbols cannot be read; callers
    /// degrade to address-only names.
    fn load(&self, path: &str) -> Result<ModuleSymbols, SymbolError>;
}

/// Loads symbol tables from ELF files on disk
///
/// Function names come from `.symtab`/`.dynsym`, file:line from DWARF when
/// present. Symbol addresses are converted from virtual addresses to file
/// offsets through the loadable segments so they can be matched against
/// `/proc/<pid>/maps` offsets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfSymbolLoader;

impl SymbolLoader for ElfSymbolLoader {
    fn load(&self, path: &str) -> Result<ModuleSymbols, SymbolError> {
        let binary_data = fs::read(path)
            .map_err(|error| SymbolError::Unreadable { path: path.to_string(), error })?;

        let obj_file = object::File::parse(&*binary_data)
            .map_err(|e| SymbolError::BadObject { path: path.to_string(), reason: e.to_string() })?;

        let segments: Vec<Segment> = obj_file
            .segments()
            .map(|s| {
                let (file_start, file_size) = s.file_range();
                Segment { vaddr: s.address(), size: s.size().max(file_size), file_start }
            })
            .collect();

        let dwarf = match load_dwarf(&obj_file) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                debug!("No usable DWARF in {path}: {e}");
                None
            }
        };

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for symbol in obj_file.symbols().chain(obj_file.dynamic_symbols()) {
            if symbol.kind() != SymbolKind::Text || !symbol.is_definition() || symbol.address() == 0 {
                continue;
            }
            let Ok(raw_name) = symbol.name() else { continue };
            if raw_name.is_empty() {
                continue;
            }
            let vaddr = symbol.address();
            let Some(offset) = vaddr_to_file_offset(&segments, vaddr) else { continue };
            if !seen.insert(offset) {
                continue;
            }

            let (file, line) = dwarf
                .as_ref()
                .and_then(|ctx| ctx.find_location(vaddr).ok().flatten())
                .map_or((UNKNOWN.to_string(), 0), |loc| {
                    (loc.file.unwrap_or(UNKNOWN).to_string(), loc.line.unwrap_or(0))
                });

            entries.push(SymbolEntry::new(offset, &demangle_symbol(raw_name), &file, line));
        }

        info!("Loaded {} function symbols from {path}", entries.len());
        Ok(ModuleSymbols::new(entries))
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    vaddr: u64,
    size: u64,
    file_start: u64,
}

/// Map a link-time virtual address to a file offset via the segment containing it
///
/// Objects without segments (relocatable files) use the address as-is.
fn vaddr_to_file_offset(segments: &[Segment], vaddr: u64) -> Option<u64> {
    if segments.is_empty() {
        return Some(vaddr);
    }
    segments
        .iter()
        .find(|s| vaddr >= s.vaddr && vaddr < s.vaddr + s.size)
        .map(|s| vaddr - s.vaddr + s.file_start)
}

fn load_dwarf(
    obj_file: &object::File<'_>,
) -> Result<Context<EndianRcSlice<RunTimeEndian>>, gimli::Error> {
    let endian = if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

    let load_section = |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
        let data = obj_file
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
        Ok(EndianRcSlice::new(Rc::from(&*data), endian))
    };

    let dwarf = gimli::Dwarf::load(&load_section)?;
    Context::from_dwarf(dwarf)
}

/// Demangle a Rust or C++ symbol name, returning it unchanged otherwise
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    let looks_rust = symbol.starts_with("_R")
        || (symbol.starts_with("_ZN") && symbol.ends_with('E') && symbol.contains("17h"));
    if looks_rust {
        if let Ok(demangled) = try_demangle(symbol) {
            return format!("{demangled:#}");
        }
    }
    addr2line::demangle(symbol, gimli::DW_LANG_C_plus_plus).unwrap_or_else(|| symbol.to_string())
}

/// In-memory symbol tables keyed by module path
///
/// Used when tables are prepared ahead of time instead of read from disk.
#[derive(Debug, Default, Clone)]
pub struct TableLoader {
    tables: HashMap<String, ModuleSymbols>,
}

impl TableLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the table for `path`
    #[must_use]
    pub fn with_module(mut self, path: &str, symbols: ModuleSymbols) -> Self {
        self.tables.insert(path.to_string(), symbols);
        self
    }
}

impl SymbolLoader for TableLoader {
    fn load(&self, path: &str) -> Result<ModuleSymbols, SymbolError> {
        self.tables.get(path).cloned().ok_or_else(|| SymbolError::NotFound(path.to_string()))
    }
}

//! # Symbol Resolution and Address Translation
//!
//! Trace buffers record raw runtime addresses like `0x55f3a2b4c780`. This
//! module turns them into `function (file:line)` using the memory map saved
//! in the snapshot and the symbol tables of the mapped modules.
//!
//! ## Address Translation Flow
//!
//! ```text
//! 1. Runtime address from a ring-buffer slot
//!    0x55f3a2b4d780
//!
//! 2. Find the mapping in the snapshot's PROCMAPS (binary search)
//!    55f3a2b4d000-55f3a2b5f000 r-xp 00001000 ... /usr/bin/app
//!
//! 3. Compute the module file offset
//!    0x55f3a2b4d780 - 0x55f3a2b4d000 + 0x1000 = 0x1780
//!
//! 4. Nearest preceding symbol in /usr/bin/app's table (binary search)
//!    0x1700 → worker_loop() at worker.cpp:42
//! ```
//!
//! PIE executables and shared objects are handled uniformly: symbol tables
//! are keyed by file offset, and the ELF loader converts link-time virtual
//! addresses to file offsets through the program headers.
//!
//! ## Module Structure
//!
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing into a sorted interval table
//! - **`symbolizer`**: per-module symbol tables, ELF/DWARF loading, demangling
//! - **`resolver`**: lazy per-module cache and the address → symbol lookup
//!
//! ## Failure Handling
//!
//! Symbolization never fails a decode. Addresses outside file-backed
//! mappings render as `??`; modules that cannot be read render as
//! `module+0xOFFSET`.

pub mod memory_maps;
pub mod resolver;
pub mod symbolizer;

pub use memory_maps::{Mapping, ProcMaps};
pub use resolver::{Resolution, SymInfo, SymbolCache, SymbolKey, SymbolResolver};
pub use symbolizer::{
    demangle_symbol, ElfSymbolLoader, ModuleSymbols, SymbolEntry, SymbolLoader, TableLoader, UNKNOWN,
};

//! Memory mapping utilities for process address space analysis
//!
//! This module parses the `/proc/<pid>/maps` text saved in a snapshot's
//! `PROCMAPS` chunk to find which module backs a runtime address and at
//! which file offset. This is what makes addresses from position-independent
//! executables and shared objects symbolizable after the process is gone.

use log::debug;
use std::sync::Arc;

use crate::domain::FormatError;

/// One file-backed region of the traced process's address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub start: u64,
    pub end: u64,
    pub file_offset: u64,
    pub path: Arc<str>,
}

impl Mapping {
    /// Check if an address falls within this mapping
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Offset of `addr` within the backing file
    ///
    /// `None` when `addr` is below the mapping or the recorded file offset
    /// pushes the result past `u64::MAX`.
    #[must_use]
    pub fn module_offset(&self, addr: u64) -> Option<u64> {
        addr.checked_sub(self.start)?.checked_add(self.file_offset)
    }
}

/// Interval table of file-backed mappings, sorted by start address
#[derive(Debug, Clone, Default)]
pub struct ProcMaps {
    mappings: Vec<Mapping>,
}

impl ProcMaps {
    /// Build from already-parsed mappings
    #[must_use]
    pub fn from_mappings(mut mappings: Vec<Mapping>) -> Self {
        mappings.sort_by_key(|m| m.start);
        Self { mappings }
    }

    /// Parse `/proc/<pid>/maps` text
    ///
    /// Each line is `START-END PERMS OFFSET DEV INODE [PATH]`. Anonymous
    /// mappings and kernel pseudo-paths (`[heap]`, `[vdso]`, ...) are dropped
    /// since no symbols can be found for them. Padding spaces inside the
    /// address range (as written by debugger-side dumpers) are tolerated.
    ///
    /// # Errors
    /// Returns `FormatError::BadProcMaps` for a line whose numeric fields
    /// cannot be parsed.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let mut mappings = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let bad = |reason: &str| FormatError::BadProcMaps { line: line_no, reason: reason.to_string() };

            let (start_str, rest) = line.split_once('-').ok_or_else(|| bad("missing address range"))?;
            let (end_str, rest) = next_field(rest).ok_or_else(|| bad("missing range end"))?;
            let (_perms, rest) = next_field(rest).ok_or_else(|| bad("missing permissions"))?;
            let (offset_str, rest) = next_field(rest).ok_or_else(|| bad("missing offset"))?;
            let (_dev, rest) = next_field(rest).ok_or_else(|| bad("missing device"))?;
            let (_inode, rest) = next_field(rest).ok_or_else(|| bad("missing inode"))?;

            let start = parse_hex(start_str.trim()).ok_or_else(|| bad("bad range start"))?;
            let end = parse_hex(end_str).ok_or_else(|| bad("bad range end"))?;
            let file_offset = parse_hex(offset_str).ok_or_else(|| bad("bad offset"))?;
            if end < start {
                return Err(bad("range end before start"));
            }

            let path = rest.trim();
            let path = path.strip_suffix(" (deleted)").unwrap_or(path);
            if path.is_empty() || path.starts_with('[') {
                continue;
            }

            mappings.push(Mapping { start, end, file_offset, path: Arc::from(path) });
        }

        debug!("Parsed {} file-backed mappings", mappings.len());
        Ok(Self::from_mappings(mappings))
    }

    /// Binary-search the mapping containing `addr`
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<&Mapping> {
        let idx = self.mappings.partition_point(|m| m.start <= addr);
        let candidate = self.mappings.get(idx.checked_sub(1)?)?;
        candidate.contains(addr).then_some(candidate)
    }

    #[must_use]
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

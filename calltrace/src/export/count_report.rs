//! Plain-text call-count report
//!
//! One line per function, most called first:
//!
//! ```text
//! 1200 parse_header(char const*) src/parse.cpp:41 /usr/bin/app
//!    3 ?? ??:0 0x7f001000
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::analysis::FunctionCounts;
use crate::domain::ExportError;
use crate::symbolization::Resolution;

/// Write `counts` as a report
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_count_report<W: Write>(counts: &FunctionCounts, mut writer: W) -> Result<(), ExportError> {
    let sorted = counts.sorted();
    let width = sorted.first().map_or(1, |top| top.count.to_string().len());
    for entry in sorted {
        match &entry.symbol {
            Resolution::Known(sym) => writeln!(
                writer,
                "{:>width$} {} {}:{} {}",
                entry.count, sym.name, sym.file, sym.line, sym.module
            )?,
            Resolution::Unknown { address } => {
                writeln!(writer, "{:>width$} ?? ??:0 {address:#x}", entry.count)?;
            }
        }
    }
    Ok(())
}

/// Write the report to `path`
///
/// # Errors
/// `ExportError::WriteFailed` if the file cannot be created, otherwise any
/// write error.
pub fn write_count_report_file(counts: &FunctionCounts, path: &Path) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|e| ExportError::WriteFailed(format!("{}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    write_count_report(counts, &mut writer)?;
    writer.flush()?;
    Ok(())
}

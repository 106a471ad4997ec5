//! Text form of a call-count snapshot
//!
//! ```text
//! FUNCOUNT
//! PROCMAPS
//! 400000-401000 r-xp 00000000 00:00 1 /tmp/prog
//! COUNTS
//! 0x400120 5
//! 0x400280 1
//! ```

use std::sync::Arc;

use super::{CountSample, Snapshot};
use crate::analysis::{CountTableLayout, CounterSnapshot};
use crate::domain::FormatError;
use crate::symbolization::ProcMaps;

const HEADER: &str = "FUNCOUNT";
const MAPS_MARKER: &str = "PROCMAPS";
const COUNTS_MARKER: &str = "COUNTS";

/// Cheap sniff used to pick the text parser over the binary one
#[must_use]
pub fn is_counts_text(data: &[u8]) -> bool {
    data.starts_with(b"FUNCOUNT\n") || data.starts_with(b"FUNCOUNT\r\n")
}

/// Parse a text count report into a counting-mode [`Snapshot`]
///
/// # Errors
/// Returns `FormatError::BadCountsText` for a missing section marker or a
/// malformed count line, `FormatError::BadProcMaps` for a bad map line.
pub fn parse_counts_text(text: &str) -> Result<Snapshot, FormatError> {
    let mut lines = text.lines().enumerate();
    let bad = |line: usize, reason: &str| FormatError::BadCountsText { line, reason: reason.to_string() };

    match lines.next() {
        Some((_, l)) if l.trim() == HEADER => {}
        _ => return Err(bad(1, "expected FUNCOUNT header")),
    }
    match lines.next() {
        Some((_, l)) if l.trim() == MAPS_MARKER => {}
        _ => return Err(bad(2, "expected PROCMAPS section")),
    }

    let mut maps_text = String::new();
    let mut saw_counts = false;
    for (_, line) in lines.by_ref() {
        if line.trim() == COUNTS_MARKER {
            saw_counts = true;
            break;
        }
        maps_text.push_str(line);
        maps_text.push('\n');
    }
    if !saw_counts {
        return Err(bad(text.lines().count(), "missing COUNTS section"));
    }
    let maps = ProcMaps::parse(&maps_text)?;

    let mut counts = CounterSnapshot::new(CountTableLayout::RUNTIME_DEFAULT);
    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(addr), Some(count), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(bad(line_no, "expected `ADDRESS COUNT`"));
        };
        let address = u64::from_str_radix(addr.trim_start_matches("0x"), 16)
            .map_err(|_| bad(line_no, "bad address"))?;
        let count: u64 = count.parse().map_err(|_| bad(line_no, "bad count"))?;
        counts.add(address, count);
    }

    Ok(Snapshot {
        samples: Vec::new(),
        counters: Some(CountSample { maps: Arc::new(maps), counts }),
    })
}

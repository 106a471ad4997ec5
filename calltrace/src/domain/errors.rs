//! Structured error types for calltrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

/// Whole-snapshot failure: nothing is decoded or emitted
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unrecognized leading chunk tag {0:?}")]
    BadMagic(String),

    #[error("truncated chunk {tag} at offset {offset}: {needed} bytes declared, {available} available")]
    Truncated { tag: String, offset: usize, needed: u64, available: usize },

    #[error("missing {0} chunk")]
    MissingChunk(&'static str),

    #[error("unexpected length {length} for {tag} chunk")]
    BadChunkLength { tag: &'static str, length: usize },

    #[error("snapshot mixes call/return trace buffers with a call-count table")]
    MixedModes,

    #[error("malformed PROCMAPS line {line}: {reason}")]
    BadProcMaps { line: usize, reason: String },

    #[error("malformed call-count table: {0}")]
    BadCounterTable(String),

    #[error("malformed call-count report line {line}: {reason}")]
    BadCountsText { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A module's debug data could not be loaded; resolution degrades to addresses
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("failed to read {path}: {error}")]
    Unreadable { path: String, error: std::io::Error },

    #[error("failed to parse object file {path}: {reason}")]
    BadObject { path: String, reason: String },

    #[error("no symbol table registered for {0}")]
    NotFound(String),
}

/// Scoped failure in one thread's buffer; the thread is emitted truncated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadDecodeError {
    #[error("buffer length {length} is not a multiple of the entry size, {trailing} trailing bytes ignored")]
    PartialEntry { length: usize, trailing: usize },

    #[error("invalid event tag {tag:#x} in slot {slot}, decoding stopped")]
    InvalidEventTag { slot: usize, tag: u64 },
}

/// Scheduler trace could not be aligned with the decoded timeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("ftrace text has no FUNTRACE reference marker")]
    NoReferenceMarker,

    #[error("timestamp counter frequency unknown, kernel timestamps cannot be converted")]
    UnknownClockRate,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write trace file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display() {
        let err = FormatError::MissingChunk("PROCMAPS");
        assert_eq!(err.to_string(), "missing PROCMAPS chunk");
    }

    #[test]
    fn test_truncated_error_mentions_tag() {
        let err = FormatError::Truncated {
            tag: "TRACEBUF".to_string(),
            offset: 64,
            needed: 4096,
            available: 100,
        };
        assert!(err.to_string().contains("TRACEBUF"));
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_thread_error_display() {
        let err = ThreadDecodeError::InvalidEventTag { slot: 3, tag: 1 << 62 };
        assert!(err.to_string().contains("slot 3"));
    }
}

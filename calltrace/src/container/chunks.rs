//! Chunk-level reader for the snapshot container
//!
//! A snapshot is a flat sequence of `tag(8) | length(8, LE) | payload`
//! records. This reader only splits the byte stream; interpreting chunk
//! order and payloads is up to [`super::parse_snapshot`].

use calltrace_common::{
    CHUNK_HEADER_LEN, TAG_ENDTRACE, TAG_FTRACETX, TAG_FUNCOUNT, TAG_FUNTRACE, TAG_LEN,
    TAG_PROCMAPS, TAG_THREADID, TAG_TRACEBUF,
};

use crate::domain::FormatError;

/// Tags this decoder understands
pub const KNOWN_TAGS: [[u8; TAG_LEN]; 7] = [
    TAG_PROCMAPS,
    TAG_FUNTRACE,
    TAG_THREADID,
    TAG_TRACEBUF,
    TAG_FTRACETX,
    TAG_ENDTRACE,
    TAG_FUNCOUNT,
];

/// One chunk borrowed from the snapshot bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub tag: [u8; TAG_LEN],
    /// Offset of the chunk header within the snapshot
    pub offset: usize,
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    /// Printable form of the tag
    #[must_use]
    pub fn tag_str(&self) -> String {
        tag_to_string(&self.tag)
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        KNOWN_TAGS.contains(&self.tag)
    }
}

pub fn tag_to_string(tag: &[u8]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

/// Iterator over the chunks of a snapshot
///
/// Yields an error (and then stops) on a header or payload that runs past
/// the end of the input.
pub struct ChunkReader<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> ChunkReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, failed: false }
    }

    fn read_chunk(&mut self) -> Result<Chunk<'a>, FormatError> {
        let offset = self.pos;
        let remaining = &self.data[offset..];
        if remaining.len() < CHUNK_HEADER_LEN {
            return Err(FormatError::Truncated {
                tag: tag_to_string(&remaining[..remaining.len().min(TAG_LEN)]),
                offset,
                needed: CHUNK_HEADER_LEN as u64,
                available: remaining.len(),
            });
        }

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&remaining[..TAG_LEN]);
        let mut length_bytes = [0u8; 8];
        length_bytes.copy_from_slice(&remaining[TAG_LEN..CHUNK_HEADER_LEN]);
        let length = u64::from_le_bytes(length_bytes);

        let body = &remaining[CHUNK_HEADER_LEN..];
        let payload_len = usize::try_from(length)
            .ok()
            .filter(|&len| len <= body.len())
            .ok_or_else(|| FormatError::Truncated {
                tag: tag_to_string(&tag),
                offset,
                needed: length,
                available: body.len(),
            })?;

        self.pos = offset + CHUNK_HEADER_LEN + payload_len;
        Ok(Chunk { tag, offset, payload: &body[..payload_len] })
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Result<Chunk<'a>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let chunk = self.read_chunk();
        self.failed = chunk.is_err();
        Some(chunk)
    }
}

/// Append one chunk to `out` (used by snapshot writers and tests)
pub fn write_chunk(out: &mut Vec<u8>, tag: &[u8; TAG_LEN], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
}

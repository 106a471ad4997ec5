//! # Shared Wire Format (Runtime ↔ Decoder)
//!
//! Defines the snapshot container layout written by the instrumentation
//! runtime (or by the debugger-side dumper) and read by the `calltrace`
//! decoder. All integers are little-endian and all records use `#[repr(C)]`
//! so the runtime can write them straight out of memory.
//!
//! ## Container
//!
//! ```text
//! repeat:
//!   tag:      8 bytes ASCII   (PROCMAPS, FUNTRACE, THREADID, TRACEBUF, ...)
//!   length:   8 bytes u64
//!   payload:  length bytes
//! ```
//!
//! ## Key Types
//!
//! - [`TraceEntry`] - One ring-buffer slot (tagged address + timestamp)
//! - [`ThreadIdRecord`] - Identity of the thread owning the next `TRACEBUF`
//! - [`Backend`] - Instrumentation backend that produced a sample

#![no_std]

// ============================================================================
// Chunk Tags
// ============================================================================

/// Length of a chunk tag in bytes
pub const TAG_LEN: usize = 8;

/// Length of a chunk's length field in bytes
pub const LENGTH_LEN: usize = 8;

/// Size of a chunk header (tag + length)
pub const CHUNK_HEADER_LEN: usize = TAG_LEN + LENGTH_LEN;

/// `/proc/self/maps` text of the traced process at capture time
pub const TAG_PROCMAPS: [u8; TAG_LEN] = *b"PROCMAPS";

/// Opens a trace sample. Payload: empty, `freq_hz u64`, or `freq_hz u64, backend u64`
pub const TAG_FUNTRACE: [u8; TAG_LEN] = *b"FUNTRACE";

/// Identity of the thread whose `TRACEBUF` follows (see [`ThreadIdRecord`])
pub const TAG_THREADID: [u8; TAG_LEN] = *b"THREADID";

/// Raw bytes of one thread's ring buffer (array of [`TraceEntry`])
pub const TAG_TRACEBUF: [u8; TAG_LEN] = *b"TRACEBUF";

/// Kernel ftrace text captured alongside the sample
pub const TAG_FTRACETX: [u8; TAG_LEN] = *b"FTRACETX";

/// Closes a trace sample. Payload: empty
pub const TAG_ENDTRACE: [u8; TAG_LEN] = *b"ENDTRACE";

/// Multi-level sparse call-count table (counting mode only)
pub const TAG_FUNCOUNT: [u8; TAG_LEN] = *b"FUNCOUNT";

// ============================================================================
// Ring Buffer Entries
// ============================================================================

/// Set on the address of a return event
pub const RETURN_BIT: u32 = 63;

/// Combined with [`RETURN_BIT`], marks a catch event (exception landed in the function)
pub const CATCH_BIT: u32 = 62;

/// Mask of all tag bits carried in [`TraceEntry::address`]
pub const TAG_MASK: u64 = (1 << RETURN_BIT) | (1 << CATCH_BIT);

/// Tag value of a catch event
pub const CATCH_TAG: u64 = TAG_MASK;

/// Tag value of a return event
pub const RETURN_TAG: u64 = 1 << RETURN_BIT;

/// One ring-buffer slot as written by the runtime
///
/// **Memory Layout**: 16 bytes, no padding. A slot that was never written
/// is all zeroes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceEntry {
    /// Function address with the event tag in bits 62-63
    pub address: u64,

    /// Timestamp counter value (TSC) when the event was logged
    pub timestamp: u64,
}

impl TraceEntry {
    /// Size of an entry on the wire
    pub const SIZE: usize = 16;

    /// Decode an entry from its little-endian wire form
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut address = [0u8; 8];
        let mut timestamp = [0u8; 8];
        address.copy_from_slice(&bytes[..8]);
        timestamp.copy_from_slice(&bytes[8..]);
        Self { address: u64::from_le_bytes(address), timestamp: u64::from_le_bytes(timestamp) }
    }

    /// Encode an entry to its little-endian wire form
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..8].copy_from_slice(&self.address.to_le_bytes());
        out[8..].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    /// True for slots the runtime never wrote
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.address == 0 && self.timestamp == 0
    }

    /// Tag bits of the address
    #[must_use]
    pub fn tag(&self) -> u64 {
        self.address & TAG_MASK
    }

    /// Address with the tag bits cleared
    #[must_use]
    pub fn untagged_address(&self) -> u64 {
        self.address & !TAG_MASK
    }
}

// ============================================================================
// Thread Identity
// ============================================================================

/// Maximum thread name length (matches the kernel's `TASK_COMM_LEN`)
pub const THREAD_NAME_LEN: usize = 16;

/// Payload of a `THREADID` chunk
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadIdRecord {
    /// Process ID (TGID)
    pub pid: u64,

    /// Kernel thread ID
    pub tid: u64,

    /// Thread name, NUL-padded
    pub name: [u8; THREAD_NAME_LEN],
}

impl ThreadIdRecord {
    /// Size of the record on the wire
    pub const SIZE: usize = 16 + THREAD_NAME_LEN;

    /// Decode a record from its little-endian wire form
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut pid = [0u8; 8];
        let mut tid = [0u8; 8];
        let mut name = [0u8; THREAD_NAME_LEN];
        pid.copy_from_slice(&bytes[..8]);
        tid.copy_from_slice(&bytes[8..16]);
        name.copy_from_slice(&bytes[16..]);
        Self { pid: u64::from_le_bytes(pid), tid: u64::from_le_bytes(tid), name }
    }

    /// Name bytes up to the first NUL
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(THREAD_NAME_LEN);
        &self.name[..end]
    }
}

// ============================================================================
// Capture Metadata
// ============================================================================

/// Instrumentation backend that produced a sample
///
/// Carried in the second word of a 16-byte `FUNTRACE` payload.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Compiler call-site callbacks (`-finstrument-functions`)
    Finstrument = 0,
    /// Profiling-counter entry/return hooks (`-pg`)
    Pg = 1,
    /// Sled-based binary patching (XRay)
    Xray = 2,
}

impl Backend {
    /// Map a wire id to a backend, `None` for ids this decoder doesn't know
    #[must_use]
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            0 => Some(Self::Finstrument),
            1 => Some(Self::Pg),
            2 => Some(Self::Xray),
            _ => None,
        }
    }
}

// ============================================================================
// Counter Tables
// ============================================================================

/// Node tag of an inner (pointer) level of a `FUNCOUNT` table
pub const COUNT_NODE_INNER: u64 = 0;

/// Node tag of a leaf (count array) level of a `FUNCOUNT` table
pub const COUNT_NODE_LEAF: u64 = 1;

/// Size of the `FUNCOUNT` payload header (`page_bits`, `depth`, `granularity`)
pub const COUNT_HEADER_LEN: usize = 24;

//! Snapshot construction helpers mimicking the instrumentation runtime

#![allow(dead_code)]

use calltrace::container::write_chunk;
use calltrace::symbolization::{ModuleSymbols, SymbolCache, SymbolEntry, TableLoader};
use calltrace_common::{
    TraceEntry, CATCH_TAG, RETURN_TAG, TAG_ENDTRACE, TAG_FTRACETX, TAG_FUNCOUNT, TAG_FUNTRACE,
    TAG_PROCMAPS, TAG_THREADID, TAG_TRACEBUF, THREAD_NAME_LEN,
};
use std::sync::Arc;

pub const MODULE: &str = "/opt/app/bin/app";
pub const BASE: u64 = 0x5555_0000_0000;
pub const MAPS: &str = "\
555500000000-555500010000 r-xp 00000000 08:01 42         /opt/app/bin/app
555500010000-555500011000 rw-p 00010000 08:01 42         /opt/app/bin/app
7ffc00000000-7ffc00021000 rw-p 00000000 00:00 0          [stack]
";

/// Functions of the fake executable, one per 0x100 bytes starting at 0x100
pub const FUNCTIONS: &[&str] = &["main", "f", "g", "A", "B", "C", "B1", "B2", "worker", "handler"];

/// Runtime address of the first instruction of `name`
pub fn addr(name: &str) -> u64 {
    BASE + offset(name)
}

pub fn offset(name: &str) -> u64 {
    let idx = FUNCTIONS.iter().position(|f| *f == name).unwrap_or_else(|| panic!("unknown function {name}"));
    0x100 * (idx as u64 + 1)
}

/// Symbol cache serving the fake executable's table
pub fn symbol_cache() -> Arc<SymbolCache> {
    let entries = FUNCTIONS
        .iter()
        .enumerate()
        .map(|(i, name)| SymbolEntry::new(offset(name), name, "app.cpp", 10 * (i as u32 + 1)))
        .collect();
    Arc::new(SymbolCache::new(TableLoader::new().with_module(MODULE, ModuleSymbols::new(entries))))
}

/// Writes events into a fixed-size ring the way the runtime does
pub struct RingWriter {
    slots: Vec<TraceEntry>,
    pos: usize,
    now: u64,
}

impl RingWriter {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![TraceEntry::default(); capacity], pos: 0, now: 1000 }
    }

    fn push(&mut self, address: u64) -> &mut Self {
        let capacity = self.slots.len();
        self.now += 10;
        self.slots[self.pos % capacity] = TraceEntry { address, timestamp: self.now };
        self.pos += 1;
        self
    }

    pub fn call(&mut self, name: &str) -> &mut Self {
        self.push(addr(name))
    }

    /// Logged with a pointer inside the function body, like the runtime's return hooks
    pub fn ret(&mut self, name: &str) -> &mut Self {
        self.push((addr(name) + 0x20) | RETURN_TAG)
    }

    pub fn catch(&mut self, name: &str) -> &mut Self {
        self.push((addr(name) + 0x40) | CATCH_TAG)
    }

    /// Let time pass without logging anything
    pub fn idle(&mut self, ticks: u64) -> &mut Self {
        self.now += ticks;
        self
    }

    /// Raw tagged entry
    pub fn raw(&mut self, address: u64) -> &mut Self {
        self.push(address)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.slots.iter().flat_map(|e| e.to_le_bytes()).collect()
    }
}

pub struct ThreadRing {
    pub identity: Option<(u64, u64, &'static str)>,
    pub ring: Vec<u8>,
}

impl ThreadRing {
    pub fn anonymous(ring: Vec<u8>) -> Self {
        Self { identity: None, ring }
    }

    pub fn named(pid: u64, tid: u64, name: &'static str, ring: Vec<u8>) -> Self {
        Self { identity: Some((pid, tid, name)), ring }
    }
}

/// Builds snapshot bytes chunk by chunk
pub struct SnapshotBuilder {
    data: Vec<u8>,
}

impl SnapshotBuilder {
    /// Snapshot starting with the fake executable's memory map
    pub fn new() -> Self {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS.as_bytes());
        Self { data }
    }

    pub fn empty() -> Self {
        Self { data: Vec::new() }
    }

    pub fn chunk(mut self, tag: &[u8; 8], payload: &[u8]) -> Self {
        write_chunk(&mut self.data, tag, payload);
        self
    }

    /// A complete FUNTRACE..ENDTRACE sample
    pub fn sample(self, freq_hz: Option<u64>, backend: Option<u64>, threads: &[ThreadRing]) -> Self {
        self.sample_with_ftrace(freq_hz, backend, threads, None)
    }

    pub fn sample_with_ftrace(
        mut self,
        freq_hz: Option<u64>,
        backend: Option<u64>,
        threads: &[ThreadRing],
        ftrace: Option<&str>,
    ) -> Self {
        let mut header = Vec::new();
        if let Some(freq) = freq_hz {
            header.extend_from_slice(&freq.to_le_bytes());
            if let Some(id) = backend {
                header.extend_from_slice(&id.to_le_bytes());
            }
        }
        write_chunk(&mut self.data, &TAG_FUNTRACE, &header);

        for thread in threads {
            if let Some((pid, tid, name)) = thread.identity {
                let mut record = Vec::new();
                record.extend_from_slice(&pid.to_le_bytes());
                record.extend_from_slice(&tid.to_le_bytes());
                let mut padded = [0u8; THREAD_NAME_LEN];
                padded[..name.len()].copy_from_slice(name.as_bytes());
                record.extend_from_slice(&padded);
                write_chunk(&mut self.data, &TAG_THREADID, &record);
            }
            write_chunk(&mut self.data, &TAG_TRACEBUF, &thread.ring);
        }
        if let Some(text) = ftrace {
            write_chunk(&mut self.data, &TAG_FTRACETX, text.as_bytes());
        }
        write_chunk(&mut self.data, &TAG_ENDTRACE, &[]);
        self
    }

    pub fn funcount(mut self, payload: &[u8]) -> Self {
        write_chunk(&mut self.data, &TAG_FUNCOUNT, payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

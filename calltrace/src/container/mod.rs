//! # Snapshot Container
//!
//! Parses the chunked snapshot written by the instrumentation runtime (or a
//! debugger-side dumper) into [`Snapshot`]: trace samples with their raw
//! per-thread ring buffers, or a call-count table.
//!
//! ```text
//! PROCMAPS            memory map in effect for the following samples
//! FUNTRACE            opens a sample (TSC frequency, backend id)
//!   THREADID          identity of the next TRACEBUF (optional)
//!   TRACEBUF          one thread's ring buffer, kept as raw bytes
//!   FTRACETX          kernel ftrace text (optional)
//! ENDTRACE            closes the sample
//! FUNCOUNT            call-count table (counting mode only)
//! ```
//!
//! Ring buffers are not decoded here. A malformed buffer is a per-thread
//! problem reported by the reconstructor; only container-level damage is
//! fatal.

pub mod chunks;
pub mod counts_text;

use calltrace_common::{
    Backend, ThreadIdRecord, TAG_ENDTRACE, TAG_FTRACETX, TAG_FUNCOUNT, TAG_FUNTRACE, TAG_PROCMAPS,
    TAG_THREADID, TAG_TRACEBUF,
};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::analysis::CounterSnapshot;
use crate::domain::{FormatError, Pid, Tid};
use crate::symbolization::ProcMaps;

pub use chunks::{write_chunk, Chunk, ChunkReader};
pub use counts_text::{is_counts_text, parse_counts_text};

/// Identity recorded by a `THREADID` chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity {
    pub pid: Pid,
    pub tid: Tid,
    pub name: String,
}

/// One thread's ring buffer, undecoded
#[derive(Debug, Clone)]
pub struct ThreadBuffer {
    /// 1-based position within the sample
    pub index: usize,
    pub identity: Option<ThreadIdentity>,
    pub bytes: Vec<u8>,
}

/// Everything between one `FUNTRACE` and its `ENDTRACE`
#[derive(Debug, Clone)]
pub struct TraceSample {
    pub maps: Arc<ProcMaps>,
    /// Timestamp counter frequency; `None` when the capture didn't know it
    pub freq_hz: Option<u64>,
    /// Backend recorded by the runtime, `None` for older captures
    pub backend: Option<Backend>,
    pub threads: Vec<ThreadBuffer>,
    pub ftrace: Option<String>,
}

/// Call counts together with the memory map needed to symbolize them
#[derive(Debug, Clone)]
pub struct CountSample {
    pub maps: Arc<ProcMaps>,
    pub counts: CounterSnapshot,
}

/// A parsed snapshot file
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub samples: Vec<TraceSample>,
    pub counters: Option<CountSample>,
}

impl Snapshot {
    /// True when the snapshot came from counting mode
    #[must_use]
    pub fn is_counting(&self) -> bool {
        self.counters.is_some()
    }
}

struct OpenSample {
    freq_hz: Option<u64>,
    backend: Option<Backend>,
    threads: Vec<ThreadBuffer>,
    ftrace: Option<String>,
    pending_identity: Option<ThreadIdentity>,
}

/// Read and parse a snapshot file, binary or counts text
///
/// # Errors
/// Returns `FormatError::Io` if the file cannot be read, or any parse error.
pub fn read_snapshot(path: &Path) -> Result<Snapshot, FormatError> {
    let data = std::fs::read(path)?;
    info!("Read {} bytes from {}", data.len(), path.display());
    if is_counts_text(&data) {
        let text = String::from_utf8_lossy(&data);
        return parse_counts_text(&text);
    }
    parse_snapshot(&data)
}

/// Parse a binary snapshot
///
/// # Errors
/// Any container-level violation: unknown leading tag, truncated chunk,
/// missing or misplaced mandatory chunk, bad fixed-size payload, malformed
/// memory map or count table, or trace buffers mixed with a count table.
pub fn parse_snapshot(data: &[u8]) -> Result<Snapshot, FormatError> {
    let mut snapshot = Snapshot::default();
    let mut maps: Option<Arc<ProcMaps>> = None;
    let mut open: Option<OpenSample> = None;
    let mut saw_trace_buffer = false;

    for (idx, chunk) in ChunkReader::new(data).enumerate() {
        let chunk = chunk?;
        if idx == 0 && !chunk.is_known() {
            return Err(FormatError::BadMagic(chunk.tag_str()));
        }

        match chunk.tag {
            TAG_PROCMAPS => {
                let text = String::from_utf8_lossy(chunk.payload);
                maps = Some(Arc::new(ProcMaps::parse(&text)?));
            }
            TAG_FUNTRACE => {
                if open.is_some() {
                    return Err(FormatError::MissingChunk("ENDTRACE"));
                }
                let (freq_hz, backend) = parse_funtrace_payload(chunk.payload)?;
                open = Some(OpenSample {
                    freq_hz,
                    backend,
                    threads: Vec::new(),
                    ftrace: None,
                    pending_identity: None,
                });
            }
            TAG_THREADID => {
                let sample = open.as_mut().ok_or(FormatError::MissingChunk("FUNTRACE"))?;
                let bytes: &[u8; ThreadIdRecord::SIZE] = chunk.payload.try_into().map_err(|_| {
                    FormatError::BadChunkLength { tag: "THREADID", length: chunk.payload.len() }
                })?;
                let record = ThreadIdRecord::from_le_bytes(bytes);
                sample.pending_identity = Some(ThreadIdentity {
                    pid: Pid(record.pid),
                    tid: Tid(record.tid),
                    name: String::from_utf8_lossy(record.name_bytes()).into_owned(),
                });
            }
            TAG_TRACEBUF => {
                let sample = open.as_mut().ok_or(FormatError::MissingChunk("FUNTRACE"))?;
                if maps.is_none() {
                    return Err(FormatError::MissingChunk("PROCMAPS"));
                }
                saw_trace_buffer = true;
                let index = sample.threads.len() + 1;
                sample.threads.push(ThreadBuffer {
                    index,
                    identity: sample.pending_identity.take(),
                    bytes: chunk.payload.to_vec(),
                });
            }
            TAG_FTRACETX => {
                let sample = open.as_mut().ok_or(FormatError::MissingChunk("FUNTRACE"))?;
                sample.ftrace = Some(String::from_utf8_lossy(chunk.payload).into_owned());
            }
            TAG_ENDTRACE => {
                let sample = open.take().ok_or(FormatError::MissingChunk("FUNTRACE"))?;
                if !chunk.payload.is_empty() {
                    return Err(FormatError::BadChunkLength {
                        tag: "ENDTRACE",
                        length: chunk.payload.len(),
                    });
                }
                debug!(
                    "Sample {}: {} thread buffers, freq {:?}, backend {:?}",
                    snapshot.samples.len(),
                    sample.threads.len(),
                    sample.freq_hz,
                    sample.backend
                );
                snapshot.samples.push(TraceSample {
                    maps: maps.clone().unwrap_or_default(),
                    freq_hz: sample.freq_hz,
                    backend: sample.backend,
                    threads: sample.threads,
                    ftrace: sample.ftrace,
                });
            }
            TAG_FUNCOUNT => {
                let current = maps.clone().ok_or(FormatError::MissingChunk("PROCMAPS"))?;
                let counts = CounterSnapshot::parse_table(chunk.payload)?;
                match snapshot.counters.as_mut() {
                    Some(existing) => existing.counts.merge(&counts)?,
                    None => snapshot.counters = Some(CountSample { maps: current, counts }),
                }
            }
            _ => {
                warn!(
                    "Skipping unknown chunk {:?} ({} bytes) at offset {}",
                    chunk.tag_str(),
                    chunk.payload.len(),
                    chunk.offset
                );
            }
        }
    }

    if open.is_some() {
        return Err(FormatError::MissingChunk("ENDTRACE"));
    }
    if maps.is_none() {
        return Err(FormatError::MissingChunk("PROCMAPS"));
    }
    if snapshot.samples.is_empty() && snapshot.counters.is_none() {
        return Err(FormatError::MissingChunk("FUNTRACE"));
    }
    if saw_trace_buffer && snapshot.counters.is_some() {
        return Err(FormatError::MixedModes);
    }

    Ok(snapshot)
}

fn parse_funtrace_payload(payload: &[u8]) -> Result<(Option<u64>, Option<Backend>), FormatError> {
    let word = |i: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&payload[i * 8..(i + 1) * 8]);
        u64::from_le_bytes(bytes)
    };

    match payload.len() {
        0 => Ok((None, None)),
        8 => Ok((Some(word(0)).filter(|&f| f > 0), None)),
        16 => {
            let id = word(1);
            let backend = Backend::from_id(id);
            if backend.is_none() {
                warn!("Unknown backend id {id}, decoding with the default recovery policy");
            }
            Ok((Some(word(0)).filter(|&f| f > 0), backend))
        }
        length => Err(FormatError::BadChunkLength { tag: "FUNTRACE", length }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltrace_common::{TraceEntry, THREAD_NAME_LEN};

    const MAPS: &[u8] = b"400000-401000 r-xp 00000000 00:00 1 /tmp/prog\n";

    fn thread_id_payload(pid: u64, tid: u64, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&pid.to_le_bytes());
        out.extend_from_slice(&tid.to_le_bytes());
        let mut padded = [0u8; THREAD_NAME_LEN];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&padded);
        out
    }

    fn one_sample(funtrace: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS);
        write_chunk(&mut data, &TAG_FUNTRACE, funtrace);
        write_chunk(&mut data, &TAG_THREADID, &thread_id_payload(7, 8, "worker"));
        write_chunk(
            &mut data,
            &TAG_TRACEBUF,
            &TraceEntry { address: 0x40_0010, timestamp: 1 }.to_le_bytes(),
        );
        write_chunk(&mut data, &TAG_TRACEBUF, &[]);
        write_chunk(&mut data, &TAG_ENDTRACE, &[]);
        data
    }

    #[test]
    fn test_parse_single_sample() {
        let mut funtrace = 2_000_000_000u64.to_le_bytes().to_vec();
        funtrace.extend_from_slice(&1u64.to_le_bytes());
        let snapshot = parse_snapshot(&one_sample(&funtrace)).unwrap();

        assert_eq!(snapshot.samples.len(), 1);
        let sample = &snapshot.samples[0];
        assert_eq!(sample.freq_hz, Some(2_000_000_000));
        assert_eq!(sample.backend, Some(Backend::Pg));
        assert_eq!(sample.threads.len(), 2);
        assert_eq!(sample.threads[0].index, 1);
        let identity = sample.threads[0].identity.as_ref().unwrap();
        assert_eq!(identity.tid, Tid(8));
        assert_eq!(identity.name, "worker");
        assert!(sample.threads[1].identity.is_none());
        assert_eq!(sample.maps.mappings().len(), 1);
    }

    #[test]
    fn test_empty_funtrace_payload() {
        let snapshot = parse_snapshot(&one_sample(&[])).unwrap();
        assert_eq!(snapshot.samples[0].freq_hz, None);
        assert_eq!(snapshot.samples[0].backend, None);
    }

    #[test]
    fn test_bad_funtrace_length() {
        let err = parse_snapshot(&one_sample(&[0; 5])).unwrap_err();
        assert!(matches!(err, FormatError::BadChunkLength { tag: "FUNTRACE", length: 5 }));
    }

    #[test]
    fn test_bad_magic() {
        let mut data = Vec::new();
        write_chunk(&mut data, b"GARBAGE!", &[]);
        assert!(matches!(parse_snapshot(&data), Err(FormatError::BadMagic(_))));
    }

    #[test]
    fn test_unknown_chunk_after_first_is_skipped() {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS);
        write_chunk(&mut data, b"FUTURE!!", &[1, 2, 3]);
        write_chunk(&mut data, &TAG_FUNTRACE, &[]);
        write_chunk(&mut data, &TAG_ENDTRACE, &[]);
        assert_eq!(parse_snapshot(&data).unwrap().samples.len(), 1);
    }

    #[test]
    fn test_missing_endtrace() {
        let mut data = one_sample(&[]);
        data.truncate(data.len() - 16);
        assert!(matches!(parse_snapshot(&data), Err(FormatError::MissingChunk("ENDTRACE"))));
    }

    #[test]
    fn test_tracebuf_before_procmaps() {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_FUNTRACE, &[]);
        write_chunk(&mut data, &TAG_TRACEBUF, &[0; 16]);
        write_chunk(&mut data, &TAG_ENDTRACE, &[]);
        assert!(matches!(parse_snapshot(&data), Err(FormatError::MissingChunk("PROCMAPS"))));
    }

    #[test]
    fn test_tracebuf_outside_sample() {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS);
        write_chunk(&mut data, &TAG_TRACEBUF, &[0; 16]);
        assert!(matches!(parse_snapshot(&data), Err(FormatError::MissingChunk("FUNTRACE"))));
    }

    #[test]
    fn test_bad_threadid_length() {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS);
        write_chunk(&mut data, &TAG_FUNTRACE, &[]);
        write_chunk(&mut data, &TAG_THREADID, &[0; 8]);
        assert!(matches!(
            parse_snapshot(&data),
            Err(FormatError::BadChunkLength { tag: "THREADID", length: 8 })
        ));
    }

    #[test]
    fn test_only_procmaps_has_no_samples() {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS);
        assert!(matches!(parse_snapshot(&data), Err(FormatError::MissingChunk("FUNTRACE"))));
    }

    #[test]
    fn test_later_procmaps_applies_to_later_samples() {
        let mut data = one_sample(&[]);
        write_chunk(
            &mut data,
            &TAG_PROCMAPS,
            b"400000-401000 r-xp 00000000 00:00 1 /tmp/prog\n500000-501000 r-xp 00000000 00:00 2 /tmp/lib.so\n",
        );
        write_chunk(&mut data, &TAG_FUNTRACE, &[]);
        write_chunk(&mut data, &TAG_ENDTRACE, &[]);

        let snapshot = parse_snapshot(&data).unwrap();
        assert_eq!(snapshot.samples[0].maps.mappings().len(), 1);
        assert_eq!(snapshot.samples[1].maps.mappings().len(), 2);
    }

    #[test]
    fn test_ftrace_text_attached_to_sample() {
        let mut data = Vec::new();
        write_chunk(&mut data, &TAG_PROCMAPS, MAPS);
        write_chunk(&mut data, &TAG_FUNTRACE, &[]);
        write_chunk(&mut data, &TAG_FTRACETX, b"# tracer: nop\n");
        write_chunk(&mut data, &TAG_ENDTRACE, &[]);
        let snapshot = parse_snapshot(&data).unwrap();
        assert_eq!(snapshot.samples[0].ftrace.as_deref(), Some("# tracer: nop\n"));
    }
}

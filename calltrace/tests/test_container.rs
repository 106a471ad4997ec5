mod common;

use std::io::Write;

use calltrace::analysis::{CountTableLayout, CounterSnapshot};
use calltrace::container::{parse_snapshot, read_snapshot};
use calltrace::domain::FormatError;
use calltrace_common::{
    Backend, TAG_ENDTRACE, TAG_FUNTRACE, TAG_PROCMAPS, TAG_THREADID, TAG_TRACEBUF,
};
use common::{RingWriter, SnapshotBuilder, ThreadRing, BASE, MAPS};

fn one_thread() -> Vec<ThreadRing> {
    let mut ring = RingWriter::new(8);
    ring.call("main").ret("main");
    vec![ThreadRing::named(100, 101, "main", ring.bytes())]
}

fn count_table() -> Vec<u8> {
    let mut counts = CounterSnapshot::new(CountTableLayout::RUNTIME_DEFAULT);
    counts.add(BASE + 0x100, 3);
    counts.to_table_bytes()
}

#[test]
fn test_parse_trace_snapshot() {
    let data = SnapshotBuilder::new().sample(Some(2_400_000_000), Some(2), &one_thread()).build();
    let snapshot = parse_snapshot(&data).expect("Failed to parse snapshot");

    assert!(!snapshot.is_counting());
    assert_eq!(snapshot.samples.len(), 1);
    let sample = &snapshot.samples[0];
    assert_eq!(sample.freq_hz, Some(2_400_000_000));
    assert_eq!(sample.backend, Some(Backend::Xray));
    assert!(sample.ftrace.is_none());
    assert_eq!(sample.threads.len(), 1);

    let thread = &sample.threads[0];
    assert_eq!(thread.index, 1);
    assert_eq!(thread.bytes.len(), 8 * 16);
    let identity = thread.identity.as_ref().unwrap();
    assert_eq!((identity.pid.0, identity.tid.0, identity.name.as_str()), (100, 101, "main"));
    assert!(sample.maps.find(BASE + 0x100).is_some());
}

#[test]
fn test_funtrace_header_variants() {
    let freq_only = SnapshotBuilder::new().sample(Some(1_000), None, &one_thread()).build();
    let sample = &parse_snapshot(&freq_only).unwrap().samples[0];
    assert_eq!((sample.freq_hz, sample.backend), (Some(1_000), None));

    let empty = SnapshotBuilder::new().sample(None, None, &one_thread()).build();
    let sample = &parse_snapshot(&empty).unwrap().samples[0];
    assert_eq!((sample.freq_hz, sample.backend), (None, None));

    // Zero frequency means unknown; unknown backend ids fall back later
    let zero = SnapshotBuilder::new().sample(Some(0), Some(99), &one_thread()).build();
    let sample = &parse_snapshot(&zero).unwrap().samples[0];
    assert_eq!((sample.freq_hz, sample.backend), (None, None));
}

#[test]
fn test_bad_funtrace_length() {
    let data = SnapshotBuilder::new()
        .chunk(&TAG_FUNTRACE, &[0u8; 4])
        .chunk(&TAG_ENDTRACE, &[])
        .build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::BadChunkLength { tag: "FUNTRACE", length: 4 }));
}

#[test]
fn test_bad_magic() {
    let data = SnapshotBuilder::empty().chunk(b"GARBAGE!", b"junk").build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::BadMagic(ref tag) if tag == "GARBAGE!"));
}

#[test]
fn test_truncated_chunk() {
    let mut data = SnapshotBuilder::new().sample(None, None, &one_thread()).build();
    data.truncate(data.len() - 20);
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::Truncated { .. }), "{err}");
}

#[test]
fn test_missing_endtrace() {
    let mut ring = RingWriter::new(4);
    ring.call("main");
    let data = SnapshotBuilder::new()
        .chunk(&TAG_FUNTRACE, &[])
        .chunk(&TAG_TRACEBUF, &ring.bytes())
        .build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MissingChunk("ENDTRACE")));

    // A new sample may not start inside another
    let data = SnapshotBuilder::new()
        .chunk(&TAG_FUNTRACE, &[])
        .chunk(&TAG_FUNTRACE, &[])
        .chunk(&TAG_ENDTRACE, &[])
        .build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MissingChunk("ENDTRACE")));
}

#[test]
fn test_buffers_outside_a_sample() {
    let data = SnapshotBuilder::new().chunk(&TAG_TRACEBUF, &[0u8; 16]).build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MissingChunk("FUNTRACE")));

    let data = SnapshotBuilder::new().chunk(&TAG_ENDTRACE, &[]).build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MissingChunk("FUNTRACE")));
}

#[test]
fn test_missing_procmaps() {
    let data = SnapshotBuilder::empty()
        .chunk(&TAG_FUNTRACE, &[])
        .chunk(&TAG_TRACEBUF, &[0u8; 16])
        .chunk(&TAG_ENDTRACE, &[])
        .build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MissingChunk("PROCMAPS")));
}

#[test]
fn test_maps_without_samples() {
    let data = SnapshotBuilder::new().build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MissingChunk("FUNTRACE")));
}

#[test]
fn test_bad_thread_record_length() {
    let data = SnapshotBuilder::new()
        .chunk(&TAG_FUNTRACE, &[])
        .chunk(&TAG_THREADID, &[0u8; 10])
        .chunk(&TAG_ENDTRACE, &[])
        .build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::BadChunkLength { tag: "THREADID", length: 10 }));
}

#[test]
fn test_trace_and_counts_cannot_mix() {
    let data = SnapshotBuilder::new().sample(None, None, &one_thread()).funcount(&count_table()).build();
    let err = parse_snapshot(&data).unwrap_err();
    assert!(matches!(err, FormatError::MixedModes));
}

#[test]
fn test_unknown_chunks_are_skipped() {
    let data = SnapshotBuilder::new()
        .chunk(b"FUTURE01", b"whatever")
        .sample(None, None, &one_thread())
        .chunk(b"FUTURE02", &[])
        .build();
    let snapshot = parse_snapshot(&data).unwrap();
    assert_eq!(snapshot.samples.len(), 1);
}

#[test]
fn test_samples_use_latest_maps() {
    let lib = "700000000000-700000001000 r-xp 00000000 08:01 7 /opt/app/lib/libx.so\n";
    let data = SnapshotBuilder::new()
        .sample(None, None, &one_thread())
        .chunk(&TAG_PROCMAPS, format!("{MAPS}{lib}").as_bytes())
        .sample_with_ftrace(None, None, &one_thread(), Some("# tracer: nop\n"))
        .build();
    let snapshot = parse_snapshot(&data).unwrap();

    assert_eq!(snapshot.samples.len(), 2);
    assert!(snapshot.samples[0].maps.find(0x7000_0000_0100).is_none());
    assert!(snapshot.samples[1].maps.find(0x7000_0000_0100).is_some());
    assert!(snapshot.samples[0].ftrace.is_none());
    assert_eq!(snapshot.samples[1].ftrace.as_deref(), Some("# tracer: nop\n"));
}

#[test]
fn test_counting_snapshot() {
    let data = SnapshotBuilder::new().funcount(&count_table()).funcount(&count_table()).build();
    let snapshot = parse_snapshot(&data).unwrap();

    assert!(snapshot.is_counting());
    assert!(snapshot.samples.is_empty());
    let counters = snapshot.counters.unwrap();
    assert_eq!(counters.counts.get(BASE + 0x100), 6);
}

#[test]
fn test_read_snapshot_from_file() {
    let data = SnapshotBuilder::new().sample(None, Some(0), &one_thread()).build();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();

    let snapshot = read_snapshot(file.path()).expect("Failed to read snapshot");
    assert_eq!(snapshot.samples.len(), 1);
}

#[test]
fn test_read_counts_text_file() {
    let text = format!("FUNCOUNT\nPROCMAPS\n{MAPS}COUNTS\n{:#x} 7\n{:#x} 2\n", BASE + 0x200, BASE + 0x300);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();

    let snapshot = read_snapshot(file.path()).unwrap();
    let counters = snapshot.counters.unwrap();
    assert_eq!(counters.counts.total(), 9);
    assert_eq!(counters.counts.get(BASE + 0x200), 7);
}

#[test]
fn test_read_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_snapshot(&dir.path().join("nope.raw")).unwrap_err();
    assert!(matches!(err, FormatError::Io(_)));
}

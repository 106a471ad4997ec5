mod common;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use calltrace::analysis::{CountTableLayout, CounterSnapshot};
use common::{addr, RingWriter, SnapshotBuilder, ThreadRing};

fn calltrace(input: &Path, out: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_calltrace"))
        .arg(input)
        .arg("-o")
        .arg(out)
        .args(extra)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run calltrace")
}

fn write_input(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn healthy_ring() -> Vec<u8> {
    let mut ring = RingWriter::new(8);
    ring.call("main").call("f").ret("f").ret("main");
    ring.bytes()
}

#[test]
fn test_truncated_snapshot_fails_without_output() {
    let mut data = SnapshotBuilder::new()
        .sample(Some(1_000_000_000), Some(0), &[ThreadRing::anonymous(healthy_ring())])
        .build();
    data.truncate(data.len() - 20);

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "cut.raw", &data);
    let out = dir.path().join("trace");

    let output = calltrace(&input, &out, &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
    assert!(!dir.path().join("trace.json").exists());
}

#[test]
fn test_damaged_thread_still_exported() {
    let mut damaged = RingWriter::new(8);
    damaged.call("worker").raw(addr("worker") | (1 << 62)).ret("worker");
    let data = SnapshotBuilder::new()
        .sample(
            Some(1_000_000_000),
            Some(0),
            &[
                ThreadRing::named(9, 9, "main", healthy_ring()),
                ThreadRing::named(9, 10, "worker", damaged.bytes()),
            ],
        )
        .build();

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "damaged.raw", &data);
    let out = dir.path().join("trace");

    let output = calltrace(&input, &out, &[]);
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("truncated: invalid event tag"));

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("trace.json")).unwrap()).unwrap();
    let events = json["traceEvents"].as_array().unwrap();
    let tids: Vec<_> = events.iter().filter(|e| e["ph"] == "M").map(|e| e["tid"].clone()).collect();
    assert_eq!(tids, [9, 10]);
}

#[test]
fn test_mode_mismatch_is_usage_error() {
    let mut counts = CounterSnapshot::new(CountTableLayout::RUNTIME_DEFAULT);
    counts.add(addr("f"), 3);
    let data = SnapshotBuilder::new().funcount(&counts.to_table_bytes()).build();

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "counts.raw", &data);
    let out = dir.path().join("trace");

    let output = calltrace(&input, &out, &["--mode", "timeline"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("trace.json").exists());
}

#[test]
fn test_counts_report_written() {
    let mut counts = CounterSnapshot::new(CountTableLayout::RUNTIME_DEFAULT);
    counts.add(addr("g"), 4);
    let data = SnapshotBuilder::new().funcount(&counts.to_table_bytes()).build();

    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "counts.raw", &data);
    let out = dir.path().join("counts.txt");

    let output = calltrace(&input, &out, &["-q"]);
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());

    // The module isn't on disk here, so the name degrades to module+offset
    let report = std::fs::read_to_string(&out).unwrap();
    assert_eq!(report, "4 app+0x300 ??:0 /opt/app/bin/app\n");
}

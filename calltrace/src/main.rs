//! # calltrace - Main Entry Point
//!
//! Supports two operational modes:
//! - **Timeline** (default): each trace sample becomes a Chrome trace JSON file
//! - **Counts** (`--mode counts`, or auto-detected): call counts of all inputs
//!   summed into one text report

// Time conversions lose precision for display
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

use calltrace::analysis::{aggregate_counts, FunctionCounts};
use calltrace::cli::{Args, Mode};
use calltrace::container::{read_snapshot, Snapshot, TraceSample};
use calltrace::correlation::{correlate, parse_ftrace};
use calltrace::export::{sample_output_path, write_count_report_file, TraceEventExporter};
use calltrace::reconstruction::{decode_sample, summarize_sample, DecodeOptions};
use calltrace::symbolization::{SymbolCache, SymbolResolver};
use calltrace::trace_data::DecodedSample;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Arguments that parse but don't fit the inputs
#[derive(Error, Debug)]
#[error("{0}")]
struct UsageError(String);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let snapshots = args
        .inputs
        .iter()
        .map(|path| {
            read_snapshot(path).with_context(|| format!("Failed to load snapshot {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let counting = match args.mode {
        Mode::Auto => snapshots.iter().any(Snapshot::is_counting),
        Mode::Timeline => false,
        Mode::Counts => true,
    };

    let cache = Arc::new(SymbolCache::from_disk());
    if counting {
        run_counts(&args, &snapshots, &cache)
    } else {
        run_timeline(&args, &snapshots, &cache)
    }
}

fn run_counts(args: &Args, snapshots: &[Snapshot], cache: &Arc<SymbolCache>) -> Result<()> {
    let mut total = FunctionCounts::new();

    for (snapshot, path) in snapshots.iter().zip(&args.inputs) {
        let Some(sample) = &snapshot.counters else {
            return Err(UsageError(format!(
                "{} has no call-count table (decode it with --mode timeline)",
                path.display()
            ))
            .into());
        };
        if args.dry {
            println!(
                "{}: {} counted addresses, {} calls",
                path.display(),
                sample.counts.len(),
                sample.counts.total()
            );
            continue;
        }
        let resolver = SymbolResolver::new(Arc::clone(&sample.maps), Arc::clone(cache));
        total.merge(&aggregate_counts(&sample.counts, &resolver));
    }

    if args.dry {
        return Ok(());
    }

    write_count_report_file(&total, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    if !args.quiet {
        println!(
            "{} functions, {} calls -> {}",
            total.len(),
            total.total(),
            args.output.display()
        );
    }
    Ok(())
}

fn run_timeline(args: &Args, snapshots: &[Snapshot], cache: &Arc<SymbolCache>) -> Result<()> {
    let ftrace_override = args
        .ftrace
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read ftrace file {}", path.display()))
        })
        .transpose()?;

    let options = args.decode_options();
    let mut sample_no = 0;
    let mut written = 0;

    for (snapshot, path) in snapshots.iter().zip(&args.inputs) {
        if snapshot.is_counting() {
            return Err(UsageError(format!(
                "{} holds call counts, not traces (decode it with --mode counts)",
                path.display()
            ))
            .into());
        }

        for sample in &snapshot.samples {
            let n = sample_no;
            sample_no += 1;
            if !args.wants_sample(n) {
                continue;
            }
            let out = sample_output_path(&args.output, n);

            if args.dry {
                print_dry_run(n, sample, &options);
                continue;
            }

            if !args.quiet {
                println!("decoding sample {n} into {}...", out.display());
            }
            let decoded = decode_sample(sample, cache, &options);

            let mut exporter = TraceEventExporter::new(args.emit_options());
            exporter.add_sample(&decoded);

            if let Some(text) = sample.ftrace.as_deref().or(ftrace_override.as_deref()) {
                match correlate(&parse_ftrace(text), decoded.freq_hz) {
                    Ok(trace) => {
                        info!("Sample {n}: {} scheduler events correlated", trace.events.len());
                        exporter.set_system_trace(&trace);
                    }
                    Err(e) => warn!("Sample {n}: {e}; writing trace without scheduler events"),
                }
            }

            exporter
                .write_file(&out)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            written += 1;

            if !args.quiet {
                print_thread_summaries(&decoded);
            }
        }
    }

    if sample_no == 0 {
        warn!("No trace samples in the input");
    } else if written == 0 && !args.dry {
        warn!("No samples selected ({sample_no} available)");
    }
    Ok(())
}

fn print_dry_run(n: usize, sample: &TraceSample, options: &DecodeOptions) {
    let freq = sample.freq_hz.map_or_else(|| "unknown".to_string(), |f| format!("{f} Hz"));
    println!("sample {n}: {} threads, counter frequency {freq}", sample.threads.len());
    for thread in summarize_sample(sample, options) {
        let span = thread
            .span
            .map_or_else(String::new, |(first, last)| format!(", {first}..{last}"));
        let damaged = if thread.damaged { ", damaged" } else { "" };
        println!(
            "  {}: {}/{} slots used{span}{damaged}",
            thread.name, thread.events, thread.capacity
        );
    }
}

fn print_thread_summaries(sample: &DecodedSample) {
    for thread in &sample.threads {
        let duration = thread
            .time_span()
            .map(|(first, last)| {
                let ticks = last.since(first);
                match sample.freq_hz {
                    Some(freq) if freq > 0 => format!("{:.3} ms", ticks as f64 * 1000.0 / freq as f64),
                    _ => format!("{ticks} ticks"),
                }
            })
            .unwrap_or_default();
        println!(
            "  {}: {} frames, {} open, {duration}",
            thread.name(),
            thread.completed_frames(),
            thread.open_frames
        );
        if let Some(error) = &thread.error {
            println!("    truncated: {error}");
        }
    }
}

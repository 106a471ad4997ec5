use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::correlation::CorrelatedTrace;
use crate::domain::{ExportError, Timestamp};
use crate::trace_data::{DecodedSample, DecodedThread, EventPhase};

/// Pid used when the capture didn't record one
const DEFAULT_PID: u64 = 1;

/// Chrome Trace Event format
/// Format reference: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    /// Event name: `function (file:line)`, or `thread_name` for metadata
    name: String,
    /// Phase: "B" = begin, "E" = end, "X" = complete, "M" = metadata
    ph: &'static str,
    /// Timestamp in microseconds (raw counter units without a frequency)
    ts: f64,
    /// Duration of an "X" event
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u64,
    tid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<BTreeMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [ChromeTraceEvent],
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
    #[serde(rename = "systemTraceEvents", skip_serializing_if = "Option::is_none")]
    system_trace_events: Option<&'a str>,
}

/// How frames are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmitStyle {
    /// One "X" event per closed frame
    #[default]
    Complete,
    /// A "B" and an "E" event per closed frame
    BeginEnd,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    pub style: EmitStyle,
    /// Append `0xSTATIC@module` to event names
    pub executable_file_info: bool,
}

struct OpenFrame {
    name: String,
    ts: f64,
}

/// Chrome trace exporter for timeline visualization
///
/// Frames still open at the end of a thread's buffer are written as
/// unmatched "B" events in both styles.
pub struct TraceEventExporter {
    options: EmitOptions,
    events: Vec<ChromeTraceEvent>,
    system_trace: Option<String>,
}

impl TraceEventExporter {
    #[must_use]
    pub fn new(options: EmitOptions) -> Self {
        Self { options, events: Vec::new(), system_trace: None }
    }

    /// Add every thread of a decoded sample
    pub fn add_sample(&mut self, sample: &DecodedSample) {
        for thread in &sample.threads {
            self.add_thread(thread, sample.freq_hz);
        }
    }

    /// Add one thread: its name metadata, then its frames
    pub fn add_thread(&mut self, thread: &DecodedThread, freq_hz: Option<u64>) {
        let pid = thread.identity.as_ref().map_or(DEFAULT_PID, |id| id.pid.0);
        let tid = thread.identity.as_ref().map_or(thread.index as u64, |id| id.tid.0);
        let ts_of = |timestamp: Timestamp| timestamp.as_micros(freq_hz);

        let mut args = BTreeMap::new();
        args.insert("name".to_string(), JsonValue::from(thread.name()));
        self.events.push(ChromeTraceEvent {
            name: "thread_name".to_string(),
            ph: "M",
            ts: 0.0,
            dur: None,
            pid,
            tid,
            args: Some(args),
        });

        let event = |name: String, ph: &'static str, ts: f64, dur: Option<f64>| ChromeTraceEvent {
            name,
            ph,
            ts,
            dur,
            pid,
            tid,
            args: None,
        };

        let mut open: Vec<OpenFrame> = Vec::new();
        for timeline_event in &thread.events {
            let ts = ts_of(timeline_event.timestamp);
            match (timeline_event.phase, self.options.style) {
                (EventPhase::Begin, EmitStyle::Complete) => {
                    let name = timeline_event.symbol.label(self.options.executable_file_info);
                    open.push(OpenFrame { name, ts });
                }
                (EventPhase::Begin, EmitStyle::BeginEnd) => {
                    let name = timeline_event.symbol.label(self.options.executable_file_info);
                    self.events.push(event(name.clone(), "B", ts, None));
                    open.push(OpenFrame { name, ts });
                }
                (EventPhase::End(_), style) => {
                    let Some(frame) = open.pop() else { continue };
                    if style == EmitStyle::Complete {
                        let dur = (ts - frame.ts).max(0.0);
                        self.events.push(event(frame.name, "X", frame.ts, Some(dur)));
                    } else {
                        self.events.push(event(frame.name, "E", ts, None));
                    }
                }
            }
        }

        if self.options.style == EmitStyle::Complete {
            for frame in open {
                self.events.push(event(frame.name, "B", frame.ts, None));
            }
        }
    }

    /// Attach correlated scheduler events as the `systemTraceEvents` text
    pub fn set_system_trace(&mut self, trace: &CorrelatedTrace) {
        self.system_trace = Some(trace.to_ftrace_text());
    }

    /// Number of trace events collected so far (metadata included)
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Export trace to JSON
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let trace = ChromeTrace {
            trace_events: &self.events,
            display_time_unit: "ns",
            system_trace_events: self.system_trace.as_deref(),
        };
        serde_json::to_writer(writer, &trace)?;
        Ok(())
    }

    /// Export trace to a file
    ///
    /// # Errors
    /// `ExportError::WriteFailed` if the file cannot be created, otherwise
    /// any serialization or write error.
    pub fn write_file(&self, path: &Path) -> Result<(), ExportError> {
        let file = File::create(path)
            .map_err(|e| ExportError::WriteFailed(format!("{}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        self.export(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Output path for sample `n`: `OUT.json` for the first, `OUT.N.json` after
#[must_use]
pub fn sample_output_path(base: &Path, n: usize) -> PathBuf {
    let stem = match base.extension() {
        Some(ext) if ext == "json" => base.with_extension(""),
        _ => base.to_path_buf(),
    };
    let mut name = stem.into_os_string();
    if n == 0 {
        name.push(".json");
    } else {
        name.push(format!(".{n}.json"));
    }
    PathBuf::from(name)
}

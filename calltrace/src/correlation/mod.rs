//! # Scheduler Trace Correlation
//!
//! Aligns kernel ftrace events with the decoded call timelines. Both
//! clocks are linear in each other, so one shared instant (the reference
//! marker) and the timestamp counter frequency are enough:
//!
//! ```text
//! cycles = ref_cycles + (kernel_ts - ref_kernel_ts) * freq_hz
//! us     = cycles / (freq_hz / 1e6)
//! ```
//!
//! Correlation is read-only with respect to the decoded threads: it
//! produces a separate [`CorrelatedTrace`] and, on demand, a merged view.

pub mod ftrace;

use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::domain::CorrelationError;
use crate::trace_data::{DecodedThread, TimelineEvent};

pub use ftrace::{parse_ftrace, parse_line, ClockReference, FtraceLog, SchedEvent};

/// A scheduler event placed on the decoder's time axis
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedSchedEvent {
    /// Microseconds on the timestamp counter clock
    pub ts_us: f64,
    pub event: SchedEvent,
}

/// Scheduler events converted to the decoder's clock, in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelatedTrace {
    pub events: Vec<CorrelatedSchedEvent>,
}

/// Convert parsed ftrace events to the timestamp counter clock
///
/// # Errors
/// `CorrelationError::NoReferenceMarker` when the text has no marker,
/// `CorrelationError::UnknownClockRate` without a frequency.
#[allow(clippy::cast_precision_loss)]
pub fn correlate(log: &FtraceLog, freq_hz: Option<u64>) -> Result<CorrelatedTrace, CorrelationError> {
    let reference = log.reference.ok_or(CorrelationError::NoReferenceMarker)?;
    let freq = freq_hz.filter(|&f| f > 0).ok_or(CorrelationError::UnknownClockRate)? as f64;
    let ticks_per_us = freq / 1e6;
    let ref_cycles = reference.timestamp.0 as f64;

    let events = log
        .events
        .iter()
        .map(|event| {
            let cycles = ref_cycles + (event.kernel_ts - reference.kernel_ts) * freq;
            CorrelatedSchedEvent { ts_us: cycles / ticks_per_us, event: event.clone() }
        })
        .collect();
    Ok(CorrelatedTrace { events })
}

impl CorrelatedTrace {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Render as ftrace text with timestamps on the decoder's clock
    ///
    /// This is what trace viewers read from the `systemTraceEvents` field
    /// of a trace JSON file.
    #[must_use]
    pub fn to_ftrace_text(&self) -> String {
        let mut out = String::from("# tracer: nop\n#\n");
        for CorrelatedSchedEvent { ts_us, event } in &self.events {
            let _ = writeln!(
                out,
                "{:>16}-{:<7} [{:03}] .... {:.6}: {}: {}",
                event.comm,
                event.pid,
                event.cpu,
                ts_us / 1e6,
                event.event,
                event.body
            );
        }
        out
    }
}

/// One entry of the joint timeline
#[derive(Debug, Clone, Copy)]
pub enum MergedEntry<'a> {
    Call { thread: &'a DecodedThread, event: &'a TimelineEvent, ts_us: f64 },
    Sched(&'a CorrelatedSchedEvent),
}

impl MergedEntry<'_> {
    #[must_use]
    pub fn ts_us(&self) -> f64 {
        match self {
            Self::Call { ts_us, .. } => *ts_us,
            Self::Sched(event) => event.ts_us,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Call { .. } => 0,
            Self::Sched(_) => 1,
        }
    }
}

/// Decoded events and scheduler events on one time axis
///
/// Sorted by time; on ties decoded events come before scheduler events,
/// otherwise input order is kept.
#[must_use]
pub fn merged_view<'a>(
    threads: &'a [DecodedThread],
    trace: &'a CorrelatedTrace,
    freq_hz: Option<u64>,
) -> Vec<MergedEntry<'a>> {
    let mut entries: Vec<MergedEntry<'a>> = threads
        .iter()
        .flat_map(|thread| {
            thread.events.iter().map(move |event| MergedEntry::Call {
                thread,
                event,
                ts_us: event.timestamp.as_micros(freq_hz),
            })
        })
        .chain(trace.events.iter().map(MergedEntry::Sched))
        .collect();

    entries.sort_by(|a, b| {
        a.ts_us().partial_cmp(&b.ts_us()).unwrap_or(Ordering::Equal).then(a.rank().cmp(&b.rank()))
    });
    entries
}

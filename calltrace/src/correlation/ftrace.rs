//! Kernel ftrace text parsing
//!
//! Lines look like
//!
//! ```text
//!           worker-4242    [003] d..2. 51234.567890: sched_switch: prev_comm=worker ...
//!           worker-4242    [003] ..... 51234.500000: tracing_mark_write: FUNTRACE: 123456789
//! ```
//!
//! The second form is the reference marker: the runtime writes its own
//! timestamp counter value to `trace_marker` when the capture starts, which
//! ties the kernel clock to the ring-buffer clock.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::Timestamp;

/// `COMM-PID [CPU] FLAGS TS: EVENT: BODY`, flags and TGID column optional
static FTRACE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<comm>.+?)-(?P<pid>\d+)\s+(?:\(\s*[-\d]+\)\s+)?\[(?P<cpu>\d+)\]\s+(?:\S+\s+)?(?P<ts>\d+\.\d+):\s+(?P<event>[^:\s]+):\s?(?P<body>.*)$",
    )
    .expect("Invalid ftrace line regex pattern")
});

/// Body prefix of the reference marker
const MARKER_PREFIX: &str = "FUNTRACE:";
const MARKER_EVENT: &str = "tracing_mark_write";

/// One parsed ftrace line
#[derive(Debug, Clone, PartialEq)]
pub struct SchedEvent {
    /// Kernel timestamp in seconds
    pub kernel_ts: f64,
    pub comm: String,
    pub pid: u32,
    pub cpu: u32,
    pub event: String,
    pub body: String,
}

/// The same instant on the kernel clock and the timestamp counter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReference {
    pub kernel_ts: f64,
    pub timestamp: Timestamp,
}

/// Parsed ftrace text
#[derive(Debug, Clone, Default)]
pub struct FtraceLog {
    pub events: Vec<SchedEvent>,
    /// First reference marker found
    pub reference: Option<ClockReference>,
    /// Non-comment lines that didn't parse
    pub skipped_lines: usize,
}

impl SchedEvent {
    fn reference_timestamp(&self) -> Option<Timestamp> {
        if self.event != MARKER_EVENT {
            return None;
        }
        let value = self.body.trim().strip_prefix(MARKER_PREFIX)?.trim();
        value.parse().ok().map(Timestamp)
    }
}

/// Parse one line, `None` for comments and lines in another format
#[must_use]
pub fn parse_line(line: &str) -> Option<SchedEvent> {
    if line.trim_start().starts_with('#') {
        return None;
    }
    let caps = FTRACE_LINE_RE.captures(line)?;
    Some(SchedEvent {
        kernel_ts: caps["ts"].parse().ok()?,
        comm: caps["comm"].trim().to_string(),
        pid: caps["pid"].parse().ok()?,
        cpu: caps["cpu"].parse().ok()?,
        event: caps["event"].to_string(),
        body: caps["body"].to_string(),
    })
}

/// Parse ftrace text, picking up the first reference marker
#[must_use]
pub fn parse_ftrace(text: &str) -> FtraceLog {
    let mut log = FtraceLog::default();
    for line in text.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some(event) = parse_line(line) else {
            log.skipped_lines += 1;
            continue;
        };
        if log.reference.is_none() {
            if let Some(timestamp) = event.reference_timestamp() {
                log.reference = Some(ClockReference { kernel_ts: event.kernel_ts, timestamp });
            }
        }
        log.events.push(event);
    }
    log
}

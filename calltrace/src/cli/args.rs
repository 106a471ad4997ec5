//! CLI argument definitions

use calltrace_common::Backend;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::export::{EmitOptions, EmitStyle};
use crate::reconstruction::{DecodeOptions, EventWindow};

#[derive(Parser)]
#[command(
    name = "calltrace",
    version,
    about = "Decode function-call trace snapshots into Chrome trace JSON",
    after_help = "\
EXAMPLES:
    calltrace -o trace funtrace.raw              Write trace.json (and trace.N.json per extra sample)
    calltrace --dry -o trace funtrace.raw        List samples and threads without decoding
    calltrace --mode counts -o counts.txt *.raw  Sum call counts of several snapshots"
)]
pub struct Args {
    /// Snapshot files to decode
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output path (timeline: OUT.json, OUT.1.json, ...; counts: report file)
    #[arg(short, long, value_name = "OUT")]
    pub output: PathBuf,

    /// What to produce
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    pub mode: Mode,

    /// Instrumentation backend, overriding the one recorded in the snapshot
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Frame event style
    #[arg(long, value_enum, default_value_t = EmitArg::Complete)]
    pub emit: EmitArg,

    /// Add static address and module to event names
    #[arg(short, long)]
    pub executable_file_info: bool,

    /// Ignore events older than the newest event minus this many timestamp units
    #[arg(long, value_name = "TICKS", conflicts_with = "oldest_event_time")]
    pub max_event_age: Option<u64>,

    /// Ignore events with a timestamp before this value
    #[arg(long, value_name = "TICKS")]
    pub oldest_event_time: Option<u64>,

    /// Decode only these samples (0-based, numbered across inputs)
    #[arg(long, value_name = "N", num_args = 1..)]
    pub samples: Vec<usize>,

    /// Decode only these threads (1-based within each sample)
    #[arg(long, value_name = "N", num_args = 1..)]
    pub threads: Vec<usize>,

    /// Ftrace text to correlate, used when a sample carries none
    #[arg(long, value_name = "FILE")]
    pub ftrace: Option<PathBuf>,

    /// List samples and threads without symbolizing or writing output
    #[arg(long)]
    pub dry: bool,

    /// Decode worker threads (0 = one per CPU)
    #[arg(short, long, default_value = "0")]
    pub jobs: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Counts for counting-mode snapshots, timelines otherwise
    Auto,
    Timeline,
    Counts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Finstrument,
    Pg,
    Xray,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Finstrument => Backend::Finstrument,
            BackendArg::Pg => Backend::Pg,
            BackendArg::Xray => Backend::Xray,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EmitArg {
    Complete,
    BeginEnd,
}

impl Args {
    #[must_use]
    pub fn decode_options(&self) -> DecodeOptions {
        let window = match (self.max_event_age, self.oldest_event_time) {
            (Some(age), _) => EventWindow::MaxAge(age),
            (None, Some(t)) => EventWindow::OldestTime(t),
            (None, None) => EventWindow::All,
        };
        DecodeOptions {
            backend: self.backend.map(Backend::from),
            window,
            threads: self.threads.clone(),
            jobs: self.jobs,
            ..DecodeOptions::default()
        }
    }

    #[must_use]
    pub fn emit_options(&self) -> EmitOptions {
        let style = match self.emit {
            EmitArg::Complete => EmitStyle::Complete,
            EmitArg::BeginEnd => EmitStyle::BeginEnd,
        };
        EmitOptions { style, executable_file_info: self.executable_file_info }
    }

    /// Whether sample `n` (numbered across inputs) is selected
    #[must_use]
    pub fn wants_sample(&self, n: usize) -> bool {
        self.samples.is_empty() || self.samples.contains(&n)
    }
}

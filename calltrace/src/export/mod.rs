//! Trace export functionality
//!
//! Timelines are exported in Chrome Trace Event Format for Perfetto or
//! chrome://tracing; call counts as a plain-text report.

pub mod chrome_trace;
pub mod count_report;

pub use chrome_trace::{sample_output_path, EmitOptions, EmitStyle, TraceEventExporter};
pub use count_report::{write_count_report, write_count_report_file};

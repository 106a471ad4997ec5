//! # calltrace - Function-Call Trace Decoder
//!
//! calltrace turns snapshots written by an in-process function tracer into
//! timelines a trace viewer can open. The tracer keeps a small ring buffer
//! per thread and logs every function entry and exit into it; a snapshot
//! is those buffers copied out together with the process's memory map.
//! Because each buffer only holds the most recent events, the decoder has
//! to rebuild call stacks from a window that usually starts mid-stack.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               Snapshot file (PROCMAPS, FUNTRACE, ...)           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     calltrace (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Container   │──▶│    Stack     │──▶│   Export     │         │
//! │  │   Parser     │   │Reconstructor │   │ (trace.json) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         │                   │                  ▲                │
//! │         │                   ▼                  │                │
//! │         │           ┌──────────────┐   ┌──────────────┐         │
//! │         │           │ Symbolizer   │   │   Ftrace     │         │
//! │         │           │ (ELF/DWARF)  │   │ Correlation  │         │
//! │         │           └──────────────┘   └──────────────┘         │
//! │         ▼                   ▲                                   │
//! │  ┌──────────────┐           │                                   │
//! │  │   Analysis   │───────────┘                                   │
//! │  │ (call counts)│──▶ counts report                              │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`container`]: chunked snapshot parsing into samples and count tables
//! - [`symbolization`]: memory maps, per-module symbol tables, address lookup
//! - [`reconstruction`]: ring-buffer ordering and call-stack recovery
//! - [`analysis`]: counting-mode tables aggregated per function
//! - [`correlation`]: kernel ftrace events moved onto the decoder's clock
//! - [`export`]: Chrome Trace Event JSON and the count report
//! - [`trace_data`]: decoded timeline types shared by the stages above
//! - [`cli`]: command-line arguments
//! - [`domain`]: newtypes and error enums
//!
//! ## Recovery
//!
//! A ring buffer starts wherever the oldest surviving event happens to be,
//! so returns often have no matching call. Missing calls are synthesized
//! at the buffer's first event, multi-frame returns unwind the
//! frames they skip, and frames still running at snapshot time are left
//! open. Every such event is flagged `synthetic` and counted per thread.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Decode every sample of a snapshot into trace.json, trace.1.json, ...
//! calltrace -o trace funtrace.raw
//!
//! # Only the last 10ms at 3GHz, as B/E pairs
//! calltrace --max-event-age 30000000 --emit begin-end -o trace funtrace.raw
//!
//! # Call counts summed over several runs
//! calltrace --mode counts -o counts.txt run1.raw run2.raw
//! ```

pub mod analysis;
pub mod cli;
pub mod container;
pub mod correlation;
pub mod domain;
pub mod export;
pub mod reconstruction;
pub mod symbolization;
pub mod trace_data;

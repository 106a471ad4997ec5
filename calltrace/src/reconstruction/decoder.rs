//! Sample decoding across threads
//!
//! Ring buffers are decoded up front (cheap), the event-age window is
//! computed over all selected threads, then each thread is replayed on a
//! pool of worker threads. Symbolization dominates the cost; workers share
//! one [`SymbolCache`] so each module is loaded once.

use calltrace_common::Backend;
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::policy::RecoveryPolicy;
use super::ring::{decode_ring, RawEvent, RingEvents};
use super::stack_reconstructor::StackReconstructor;
use crate::container::{ThreadBuffer, TraceSample};
use crate::domain::Timestamp;
use crate::symbolization::{SymbolCache, SymbolResolver};
use crate::trace_data::{DecodedSample, DecodedThread};

/// Functions whose events are skipped by default
///
/// Some backends log a return from these thunks without a matching call.
pub const DEFAULT_IGNORED_NAMES: &[&str] = &["virtual override thunk"];

/// Which events to keep, by age
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventWindow {
    #[default]
    All,
    /// Drop events older than the newest event (over all selected threads)
    /// minus this many timestamp units
    MaxAge(u64),
    /// Drop events before this timestamp
    OldestTime(u64),
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Overrides the backend recorded in the sample
    pub backend: Option<Backend>,
    pub window: EventWindow,
    /// 1-based thread indexes to decode; empty selects all
    pub threads: Vec<usize>,
    /// Skip events of functions whose name contains any of these
    pub ignored_names: Vec<String>,
    /// Worker threads; 0 uses the available parallelism
    pub jobs: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            backend: None,
            window: EventWindow::All,
            threads: Vec::new(),
            ignored_names: DEFAULT_IGNORED_NAMES.iter().map(ToString::to_string).collect(),
            jobs: 0,
        }
    }
}

impl DecodeOptions {
    fn selects(&self, thread: &ThreadBuffer) -> bool {
        self.threads.is_empty() || self.threads.contains(&thread.index)
    }

    fn worker_count(&self, threads: usize) -> usize {
        let jobs = if self.jobs == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.jobs
        };
        jobs.clamp(1, threads.max(1))
    }
}

/// Ring-buffer inventory of one thread, without symbolization
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub index: usize,
    pub name: String,
    pub capacity: usize,
    pub events: usize,
    pub span: Option<(Timestamp, Timestamp)>,
    pub damaged: bool,
}

struct ThreadJob<'s> {
    buffer: &'s ThreadBuffer,
    ring: RingEvents,
}

fn window_start(window: EventWindow, rings: &[ThreadJob<'_>]) -> Option<Timestamp> {
    match window {
        EventWindow::All => None,
        EventWindow::OldestTime(t) => Some(Timestamp(t)),
        EventWindow::MaxAge(age) => {
            let newest = rings
                .iter()
                .filter_map(|job| job.ring.events.iter().map(|e| e.timestamp).max())
                .max()?;
            Some(Timestamp(newest.0.saturating_sub(age)))
        }
    }
}

fn thread_name(buffer: &ThreadBuffer) -> String {
    buffer
        .identity
        .as_ref()
        .map(|identity| identity.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("thread {}", buffer.index))
}

/// Decode the ring buffers of a sample without resolving symbols
#[must_use]
pub fn summarize_sample(sample: &TraceSample, options: &DecodeOptions) -> Vec<ThreadSummary> {
    sample
        .threads
        .iter()
        .filter(|t| options.selects(t))
        .map(|buffer| {
            let ring = decode_ring(&buffer.bytes);
            let span = ring.events.first().zip(ring.events.last()).map(|(a, b)| (a.timestamp, b.timestamp));
            ThreadSummary {
                index: buffer.index,
                name: thread_name(buffer),
                capacity: ring.capacity,
                events: ring.events.len(),
                span,
                damaged: ring.error.is_some(),
            }
        })
        .collect()
}

/// Reconstruct the call timelines of every selected thread of a sample
///
/// Per-thread damage is recorded on the thread and never fails the sample.
/// Threads are returned in sample order whatever order workers finish in.
#[must_use]
pub fn decode_sample(sample: &TraceSample, cache: &Arc<SymbolCache>, options: &DecodeOptions) -> DecodedSample {
    let started = Instant::now();
    let backend = options.backend.or(sample.backend).unwrap_or(Backend::Finstrument);
    let policy = RecoveryPolicy::for_backend(backend);
    let resolver = SymbolResolver::new(Arc::clone(&sample.maps), Arc::clone(cache));

    let jobs: Vec<ThreadJob<'_>> = sample
        .threads
        .iter()
        .filter(|t| options.selects(t))
        .map(|buffer| ThreadJob { buffer, ring: decode_ring(&buffer.bytes) })
        .collect();
    let window = window_start(options.window, &jobs);

    let workers = options.worker_count(jobs.len());
    debug!("Decoding {} threads on {workers} workers, {policy:?} recovery", jobs.len());

    let (job_tx, job_rx) = unbounded::<(usize, ThreadJob<'_>)>();
    let (result_tx, result_rx) = unbounded::<(usize, Option<DecodedThread>)>();
    for job in jobs.into_iter().enumerate() {
        if job_tx.send(job).is_err() {
            break;
        }
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let resolver = &resolver;
            let ignored = &options.ignored_names;
            scope.spawn(move || {
                for (position, job) in job_rx {
                    let decoded = decode_thread(job, resolver, policy, window, ignored);
                    if result_tx.send((position, decoded)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, Option<DecodedThread>)> = result_rx.into_iter().collect();
    results.sort_by_key(|(position, _)| *position);
    let threads: Vec<DecodedThread> = results.into_iter().filter_map(|(_, thread)| thread).collect();

    info!(
        "Decoded {} threads in {:.1?} ({} modules referenced)",
        threads.len(),
        started.elapsed(),
        cache.module_count()
    );
    DecodedSample { freq_hz: sample.freq_hz, backend, threads }
}

fn decode_thread(
    job: ThreadJob<'_>,
    resolver: &SymbolResolver,
    policy: RecoveryPolicy,
    window: Option<Timestamp>,
    ignored: &[String],
) -> Option<DecodedThread> {
    let ThreadJob { buffer, ring } = job;
    if let Some(error) = &ring.error {
        warn!("{}: {error}", thread_name(buffer));
    }

    let events: Vec<RawEvent> = match window {
        Some(start) => ring.events.iter().copied().filter(|e| e.timestamp >= start).collect(),
        None => ring.events,
    };
    if window.is_some() && events.is_empty() && ring.error.is_none() {
        info!("Skipping {}: all events older than the window", thread_name(buffer));
        return None;
    }

    let first = events.first().map_or(Timestamp(0), |e| e.timestamp);
    let earliest = window.map_or(first, |start| start.max(first));

    let rec = StackReconstructor::new(resolver, policy, earliest)
        .with_ignored_names(ignored)
        .run(&events);

    if !rec.stats.is_clean() {
        debug!("{}: {}", thread_name(buffer), rec.stats);
    }

    Some(DecodedThread {
        index: buffer.index,
        identity: buffer.identity.clone(),
        events: rec.events,
        open_frames: rec.open_frames,
        stats: rec.stats,
        error: ring.error,
    })
}

//! Call-stack reconstruction from one thread's events
//!
//! Replays calls, returns and catches against a shadow stack and emits a
//! well-nested Begin/End sequence. The ring buffer only holds the tail of
//! the thread's history, so the stack at the start of the buffer is
//! unknown; the recovery rules below make up for what was overwritten.
//!
//! ```text
//! Call(A)     push A, Begin(A)
//! Return(A)   A on top          pop, End(A)
//!             A deeper          End for every frame above A, then End(A)
//!             A absent, empty   synthetic Begin(A) at the earliest event, End(A)
//!             A absent, other   Clean: drop.  Dirty: close all, then as above
//! Catch(A)    A on stack        End for every frame above A, A stays open
//!             A absent          close all, push synthetic open A
//! ```
//!
//! Frames still open when the buffer ends keep their Begin without an End.

use log::debug;
use std::collections::HashMap;

use super::policy::RecoveryPolicy;
use super::ring::{EventKind, RawEvent};
use crate::domain::Timestamp;
use crate::symbolization::{Resolution, SymbolKey, SymbolResolver};
use crate::trace_data::{EventPhase, FrameEnd, RecoveryStats, TimelineEvent};

struct Frame {
    key: SymbolKey,
    symbol: Resolution,
}

/// Result of replaying one thread
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub events: Vec<TimelineEvent>,
    pub open_frames: usize,
    pub stats: RecoveryStats,
}

pub struct StackReconstructor<'a> {
    resolver: &'a SymbolResolver,
    policy: RecoveryPolicy,
    ignored_names: &'a [String],
    /// Earliest timestamp of the replayed window; synthetic Begins sit here
    earliest: Timestamp,
    stack: Vec<Frame>,
    events: Vec<TimelineEvent>,
    stats: RecoveryStats,
    /// Resolution per raw address; `None` for ignored functions
    resolved: HashMap<u64, Option<Resolution>>,
}

impl<'a> StackReconstructor<'a> {
    pub fn new(resolver: &'a SymbolResolver, policy: RecoveryPolicy, earliest: Timestamp) -> Self {
        Self {
            resolver,
            policy,
            ignored_names: &[],
            earliest,
            stack: Vec::new(),
            events: Vec::new(),
            stats: RecoveryStats::default(),
            resolved: HashMap::new(),
        }
    }

    /// Skip events of functions whose name contains any of `names`
    #[must_use]
    pub fn with_ignored_names(mut self, names: &'a [String]) -> Self {
        self.ignored_names = names;
        self
    }

    /// Replay all events and finish
    #[must_use]
    pub fn run(mut self, events: &[RawEvent]) -> Reconstruction {
        for event in events {
            self.feed(event);
        }
        self.finish()
    }

    pub fn feed(&mut self, event: &RawEvent) {
        let Some(symbol) = self.resolve(event.address) else {
            self.stats.ignored_events += 1;
            return;
        };
        match event.kind {
            EventKind::Call => self.open(symbol, event.timestamp, false),
            EventKind::Return => self.on_return(symbol, event.timestamp),
            EventKind::Catch => self.on_catch(symbol, event.timestamp),
        }
    }

    #[must_use]
    pub fn finish(self) -> Reconstruction {
        if !self.stack.is_empty() {
            debug!("{} frames still open at end of buffer", self.stack.len());
        }
        Reconstruction { events: self.events, open_frames: self.stack.len(), stats: self.stats }
    }

    fn resolve(&mut self, address: u64) -> Option<Resolution> {
        let resolver = self.resolver;
        let ignored = self.ignored_names;
        self.resolved
            .entry(address)
            .or_insert_with(|| {
                let symbol = resolver.resolve(address);
                let skip = ignored.iter().any(|pattern| symbol.name().contains(pattern.as_str()));
                (!skip).then_some(symbol)
            })
            .clone()
    }

    fn find(&self, key: &SymbolKey) -> Option<usize> {
        self.stack.iter().rposition(|frame| frame.key == *key)
    }

    fn open(&mut self, symbol: Resolution, timestamp: Timestamp, synthetic: bool) {
        self.events.push(TimelineEvent {
            phase: EventPhase::Begin,
            symbol: symbol.clone(),
            timestamp,
            synthetic,
        });
        self.stack.push(Frame { key: symbol.key(), symbol });
    }

    fn close_top(&mut self, timestamp: Timestamp, how: FrameEnd) {
        if let Some(frame) = self.stack.pop() {
            self.events.push(TimelineEvent {
                phase: EventPhase::End(how),
                symbol: frame.symbol,
                timestamp,
                synthetic: how != FrameEnd::Returned,
            });
        }
    }

    /// Close every frame above position `keep`
    fn unwind_to(&mut self, keep: usize, timestamp: Timestamp) {
        let unwound = self.stack.len().saturating_sub(keep);
        if unwound == 0 {
            return;
        }
        self.stats.unwinds += 1;
        self.stats.unwound_frames += unwound as u64;
        debug!("Unwinding {unwound} frames at {timestamp}");
        while self.stack.len() > keep {
            self.close_top(timestamp, FrameEnd::Unwound);
        }
    }

    fn synthesize_orphan(&mut self, symbol: Resolution, timestamp: Timestamp) {
        self.stats.orphan_returns += 1;
        let start = self.earliest;
        debug!("Orphan return from {symbol}, synthetic call at {start}");
        self.open(symbol, start, true);
        self.close_top(timestamp, FrameEnd::Synthesized);
    }

    fn on_return(&mut self, symbol: Resolution, timestamp: Timestamp) {
        match self.find(&symbol.key()) {
            Some(idx) => {
                self.unwind_to(idx + 1, timestamp);
                self.close_top(timestamp, FrameEnd::Returned);
            }
            None if self.stack.is_empty() => self.synthesize_orphan(symbol, timestamp),
            None => match self.policy {
                RecoveryPolicy::Clean => {
                    self.stats.dropped_returns += 1;
                    debug!("Dropping return from {symbol}, not on the stack");
                }
                RecoveryPolicy::Dirty => {
                    self.unwind_to(0, timestamp);
                    self.synthesize_orphan(symbol, timestamp);
                }
            },
        }
    }

    fn on_catch(&mut self, symbol: Resolution, timestamp: Timestamp) {
        self.stats.catches += 1;
        if let Some(idx) = self.find(&symbol.key()) {
            self.unwind_to(idx + 1, timestamp);
        } else {
            self.unwind_to(0, timestamp);
            self.open(symbol, self.earliest, true);
        }
    }
}

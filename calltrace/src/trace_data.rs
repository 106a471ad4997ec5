//! Decoded timeline data
//!
//! Output of the stack reconstructor and input of the emitter and the
//! ftrace correlator. Each thread's events form a well-nested Begin/End
//! sequence, except that frames still open when the buffer ended have a
//! Begin without an End.

use calltrace_common::Backend;
use std::fmt;

use crate::container::ThreadIdentity;
use crate::domain::{ThreadDecodeError, Timestamp};
use crate::symbolization::Resolution;

/// How a frame was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// Matched by its own return
    Returned,
    /// Popped because a return or catch further down the stack matched
    Unwound,
    /// Manufactured pair for a return whose call was overwritten
    Synthesized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Begin,
    End(FrameEnd),
}

/// One Begin or End on a thread's timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub phase: EventPhase,
    pub symbol: Resolution,
    pub timestamp: Timestamp,
    /// Manufactured by a recovery heuristic rather than observed
    pub synthetic: bool,
}

impl TimelineEvent {
    #[must_use]
    pub fn is_begin(&self) -> bool {
        self.phase == EventPhase::Begin
    }
}

/// Count of each recovery heuristic applied to a thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Returns without a call in the buffer, given a synthetic Begin
    pub orphan_returns: u64,
    /// Returns or catches that closed more than one frame
    pub unwinds: u64,
    /// Frames closed by those unwinds without their own return
    pub unwound_frames: u64,
    /// Returns dropped under the clean policy
    pub dropped_returns: u64,
    pub catches: u64,
    /// Events skipped by the symbol-name filter
    pub ignored_events: u64,
}

impl RecoveryStats {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphan_returns == 0 && self.unwinds == 0 && self.dropped_returns == 0
    }
}

impl fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} orphan returns, {} unwinds ({} frames), {} dropped returns, {} catches",
            self.orphan_returns, self.unwinds, self.unwound_frames, self.dropped_returns, self.catches
        )
    }
}

/// One thread's reconstructed timeline
#[derive(Debug, Clone)]
pub struct DecodedThread {
    /// 1-based position in the sample
    pub index: usize,
    pub identity: Option<ThreadIdentity>,
    pub events: Vec<TimelineEvent>,
    /// Frames left open at end of buffer
    pub open_frames: usize,
    pub stats: RecoveryStats,
    /// Set when the buffer was damaged; `events` then covers what decoded
    pub error: Option<ThreadDecodeError>,
}

impl DecodedThread {
    /// Display name: the recorded thread name, else `thread N`
    #[must_use]
    pub fn name(&self) -> String {
        match &self.identity {
            Some(identity) if !identity.name.is_empty() => identity.name.clone(),
            _ => format!("thread {}", self.index),
        }
    }

    /// Earliest and latest timestamps of observed events
    #[must_use]
    pub fn time_span(&self) -> Option<(Timestamp, Timestamp)> {
        let mut observed = self.events.iter().filter(|e| !e.synthetic).map(|e| e.timestamp);
        let first = observed.next()?;
        Some(observed.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts))))
    }

    /// Number of Begin/End pairs
    #[must_use]
    pub fn completed_frames(&self) -> usize {
        self.events.iter().filter(|e| !e.is_begin()).count()
    }

    /// Check that every End closes the innermost open Begin of the same
    /// function
    ///
    /// # Errors
    /// Returns the index of the first event that breaks nesting.
    pub fn check_nesting(&self) -> Result<(), usize> {
        let mut open = Vec::new();
        for (idx, event) in self.events.iter().enumerate() {
            match event.phase {
                EventPhase::Begin => open.push(event.symbol.key()),
                EventPhase::End(_) => {
                    if open.pop() != Some(event.symbol.key()) {
                        return Err(idx);
                    }
                }
            }
        }
        if open.len() == self.open_frames {
            Ok(())
        } else {
            Err(self.events.len())
        }
    }
}

/// All threads of one decoded sample
#[derive(Debug, Clone)]
pub struct DecodedSample {
    pub freq_hz: Option<u64>,
    pub backend: Backend,
    pub threads: Vec<DecodedThread>,
}

impl DecodedSample {
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.threads.iter().map(|t| t.events.len()).sum()
    }
}

//! Raw ring-buffer decoding
//!
//! A `TRACEBUF` payload is the runtime's per-thread ring buffer copied as
//! is: an array of [`TraceEntry`] slots, the oldest entry somewhere in the
//! middle once the buffer has wrapped. This module turns it into events in
//! chronological order.

use calltrace_common::{TraceEntry, CATCH_TAG, RETURN_TAG};
use log::debug;

use crate::domain::{ThreadDecodeError, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Call,
    Return,
    Catch,
}

/// One decoded ring-buffer entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Function address with the tag bits cleared
    pub address: u64,
    pub kind: EventKind,
    pub timestamp: Timestamp,
}

/// Events of one ring buffer, oldest first
#[derive(Debug, Clone, Default)]
pub struct RingEvents {
    pub events: Vec<RawEvent>,
    /// Damage found while decoding; `events` holds what came before it
    pub error: Option<ThreadDecodeError>,
    /// Number of slots in the buffer, written or not
    pub capacity: usize,
}

/// Decode a ring buffer into chronologically ordered events
///
/// Never-written (all-zero) slots are dropped. The buffer is rotated at the
/// point where timestamps wrap; if they decrease at more than one point the
/// slots are stably sorted by timestamp instead. An invalid tag stops
/// decoding at that slot. Only the first problem found is reported.
#[must_use]
pub fn decode_ring(bytes: &[u8]) -> RingEvents {
    let slots = bytes.chunks_exact(TraceEntry::SIZE);
    let trailing = slots.remainder().len();
    let mut error =
        (trailing > 0).then_some(ThreadDecodeError::PartialEntry { length: bytes.len(), trailing });

    let capacity = bytes.len() / TraceEntry::SIZE;
    let mut written: Vec<(usize, TraceEntry)> = slots
        .enumerate()
        .filter_map(|(slot, raw)| {
            let mut entry = [0u8; TraceEntry::SIZE];
            entry.copy_from_slice(raw);
            let entry = TraceEntry::from_le_bytes(entry);
            (!entry.is_empty()).then_some((slot, entry))
        })
        .collect();

    order_oldest_first(&mut written);

    let mut events = Vec::with_capacity(written.len());
    for (slot, entry) in written {
        let kind = match entry.tag() {
            0 => EventKind::Call,
            RETURN_TAG => EventKind::Return,
            CATCH_TAG => EventKind::Catch,
            tag => {
                debug!("Invalid tag {tag:#x} in slot {slot}, {} events decoded", events.len());
                if error.is_none() {
                    error = Some(ThreadDecodeError::InvalidEventTag { slot, tag });
                }
                break;
            }
        };
        events.push(RawEvent {
            address: entry.untagged_address(),
            kind,
            timestamp: Timestamp(entry.timestamp),
        });
    }

    RingEvents { events, error, capacity }
}

fn order_oldest_first(entries: &mut [(usize, TraceEntry)]) {
    let mut descents = entries
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1].1.timestamp < pair[0].1.timestamp)
        .map(|(i, _)| i + 1);

    let Some(wrap) = descents.next() else { return };
    let single_wrap = descents.next().is_none();
    let wraps_cleanly = match (entries.last(), entries.first()) {
        (Some(last), Some(first)) => last.1.timestamp <= first.1.timestamp,
        _ => true,
    };

    if single_wrap && wraps_cleanly {
        entries.rotate_left(wrap);
    } else {
        debug!("Ring buffer timestamps are not a rotated sequence, sorting");
        entries.sort_by_key(|(_, entry)| entry.timestamp);
    }
}

//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep raw counter values, code addresses and
//! thread identities from being mixed up in function signatures.

use std::fmt;

/// Process ID of the traced process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Kernel thread ID
///
/// Distinct from the thread's position in the snapshot: a thread has a TID
/// only when the capture recorded a `THREADID` chunk for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u64);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Raw timestamp counter value (TSC cycles unless the capture says otherwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to microseconds given the counter frequency in Hz
    ///
    /// With an unknown frequency the raw counter value is used as-is.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_micros(self, freq_hz: Option<u64>) -> f64 {
        match freq_hz {
            Some(freq) if freq > 0 => self.0 as f64 / (freq as f64 / 1_000_000.0),
            _ => self.0 as f64,
        }
    }

    /// Counter ticks elapsed since `earlier` (0 if `earlier` is later)
    #[must_use]
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime code address in the traced process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

//! Recovery policy per instrumentation backend
//!
//! Backends differ in how reliably a return is logged for every call. With
//! compiler call-site callbacks every function that logs a call also logs
//! its return, so a return that matches nothing on a non-empty stack is
//! noise. The profiling-counter and sled-patching backends can miss
//! returns (tail calls, longjmp, uninstrumented frames), so the same
//! situation means the stack we hold is stale.

use calltrace_common::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Drop a return that matches no open frame
    Clean,
    /// Close every open frame, then synthesize the orphan pair
    Dirty,
}

impl RecoveryPolicy {
    #[must_use]
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Finstrument => Self::Clean,
            Backend::Pg | Backend::Xray => Self::Dirty,
        }
    }
}

impl From<Backend> for RecoveryPolicy {
    fn from(backend: Backend) -> Self {
        Self::for_backend(backend)
    }
}

//! # Timeline Reconstruction
//!
//! Turns per-thread ring buffers into well-nested call timelines.
//!
//! - **`ring`**: slot decoding, tag bits, wraparound ordering
//! - **`policy`**: recovery policy chosen from the instrumentation backend
//! - **`stack_reconstructor`**: shadow-stack replay with recovery rules
//! - **`decoder`**: per-sample driver with the event-age window and the
//!   worker pool

pub mod decoder;
pub mod policy;
pub mod ring;
pub mod stack_reconstructor;

pub use decoder::{decode_sample, summarize_sample, DecodeOptions, EventWindow, ThreadSummary};
pub use policy::RecoveryPolicy;
pub use ring::{decode_ring, EventKind, RawEvent, RingEvents};
pub use stack_reconstructor::{Reconstruction, StackReconstructor};

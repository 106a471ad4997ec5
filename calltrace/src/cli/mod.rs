//! Command-line interface

pub mod args;

pub use args::{Args, BackendArg, EmitArg, Mode};

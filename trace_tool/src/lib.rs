//! The pieces of the `trace_tool` binary that are worth testing on their own.

pub mod dump;
pub mod session;
pub mod stats;
pub mod tracing;

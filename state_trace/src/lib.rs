//! Correctness tooling for Ethereum world-state engines.
//!
//! Every engine (and every tool in this crate) speaks [`StateDb`], the call
//! surface an EVM uses to read and mutate world state. On top of that this
//! crate provides:
//! - [`RecordingStateDb`], which captures a session of calls into a compact
//!   binary trace.
//! - [`replay`], which re-issues a trace against any engine, translating
//!   snapshot identifiers on the way.
//! - [`ShadowStateDb`], which runs two engines in lockstep and records every
//!   call on which they disagree.
//! - [`proxy`], wrappers that track contract deletion, time calls, or log
//!   them.
//! - [`MemoryStateDb`], a small reference engine.
//!
//! # Trace format
//! A trace is a sequence of records, each an [`OpCode`] byte followed by a
//! payload whose width the opcode and the counts it carries determine. There
//! is no framing and no resynchronisation marker.
//!
//! Account and storage operations usually touch the contract (and slot) the
//! previous operation touched. The opcode then selects a compact [`Form`]
//! that elides the address, or the key, or refers to a small cache of
//! recently used keys. Writer and reader keep identical contexts in step, see
//! [`context`].
//!
//! Engines number snapshots however they like, so the trace stores the
//! identifiers seen while recording and [`replay`] maps them to the ones the
//! replaying engine hands out.

#![warn(missing_debug_implementations)]

pub mod context;
mod error;
pub mod memory;
pub mod opcode;
mod operation;
pub mod proxy;
pub mod record;
pub mod replay;
pub mod shadow;
mod state_db;
pub mod trace;
pub mod wire;

pub use error::{Scope, TraceError};
pub use memory::MemoryStateDb;
pub use opcode::{Form, Kind, OpCode};
pub use operation::{Operation, SlotTarget, Target};
pub use record::RecordingStateDb;
pub use replay::{replay, ReplayConfig, ReplayReport};
pub use shadow::{Mismatch, Mismatches, ShadowStateDb};
pub use state_db::{
    AccessListItem, ArchiveState, BalanceChangeReason, BulkLoad, Log, StateDb,
};
pub use trace::{Record, TraceReader, TraceWriter};

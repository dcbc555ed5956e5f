//! Transparent [`StateDb`](crate::StateDb) wrappers.
//!
//! None of these change the arguments or results of the calls they forward,
//! so they can be stacked in any order around an engine.

pub mod deletion;
pub mod logger;
pub mod profiler;

pub use deletion::{ContractLiveness, DeletedAccounts, DeletionTrackingStateDb};
pub use logger::LoggingStateDb;
pub use profiler::{OpStats, Profile, ProfilingStateDb};

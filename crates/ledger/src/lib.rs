//! Ledger implementations for taskmesh.
//!
//! [`MemoryLedger`] is an in-process stand-in for the on-chain task
//! registry. It enforces the same state machine (a task is assigned to at
//! most one node and completed at most once) and emits `TaskCreated`
//! events to every subscriber.

pub mod memory;

pub use memory::{MemoryLedger, MemoryLedgerClient};

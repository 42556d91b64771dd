//! Domain types and collaborator seams shared by every taskmesh crate.
//!
//! Nothing in here performs I/O. The broker, ledger and inference
//! implementations live in their own crates and plug in through the
//! [`ledger::LedgerClient`] and [`inference::InferenceClient`] traits.

pub mod config;
pub mod error;
pub mod inference;
pub mod ledger;
pub mod queues;
pub mod task;
pub mod types;

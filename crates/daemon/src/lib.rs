//! Local taskmesh network: control plane, workers and an in-process
//! ledger in a single process.

pub mod config;
pub mod devnet;
pub mod error;

pub use config::DevnetConfig;
pub use devnet::Devnet;
pub use error::DaemonError;

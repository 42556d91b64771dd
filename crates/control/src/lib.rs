//! Control side of taskmesh.
//!
//! Watches the ledger for new tasks, assigns each one to a registered
//! worker in round-robin order, publishes the assignment to the task
//! queue, and collects the results workers send back.

pub mod collector;
pub mod dispatcher;
pub mod error;
pub mod plane;
pub mod registration;
pub mod registry;
pub mod watcher;

pub use collector::ResultCollector;
pub use dispatcher::{DispatchOutcome, Dispatcher, RoundRobin};
pub use error::ControlError;
pub use plane::ControlPlane;
pub use registration::RegistrationListener;
pub use registry::NodeRegistry;
pub use watcher::LedgerWatcher;

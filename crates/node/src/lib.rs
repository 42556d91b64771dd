//! Worker side of taskmesh.
//!
//! A [`WorkerNode`] announces itself, then consumes assignments from the
//! task queue one at a time. For each assignment addressed to it the
//! [`TaskProcessor`] checks the ledger, claims the task, runs inference,
//! records the answer on the ledger and publishes the result.

pub mod announcer;
pub mod config;
pub mod error;
pub mod node;
pub mod openai;
pub mod processor;

pub use config::{NodeConfig, OpenAiConfig};
pub use error::{NodeError, ProcessError};
pub use node::WorkerNode;
pub use openai::OpenAiInference;
pub use processor::{ProcessOutcome, TaskProcessor};

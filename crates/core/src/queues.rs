//! Broker queue names.
//!
//! Shared between the control plane and worker nodes so both sides
//! declare and address the same queues.

/// Durable queue carrying [`Assignment`](crate::task::Assignment) messages.
pub const TASK_QUEUE: &str = "depin_tasks";

/// Durable queue carrying [`TaskResult`](crate::task::TaskResult) messages.
pub const RESULT_QUEUE: &str = "depin_results";

/// Non-durable queue carrying [`WorkerIdentity`](crate::task::WorkerIdentity)
/// announcements. Registrations do not survive a broker restart.
pub const REGISTRATION_QUEUE: &str = "depin_node_registration";

//! Handles assignments delivered from the task queue.
//!
//! The ledger is re-read before any side effect, so a redelivered or
//! duplicated assignment never triggers a second inference or a second
//! completion:
//!
//! 1. Assignments addressed to another node are acknowledged untouched.
//! 2. A task already completed on the ledger is acknowledged.
//! 3. An unassigned task is claimed with `assign`; inference only starts
//!    once the ledger has confirmed the claim.
//! 4. The answer is written with `complete`; the result is published only
//!    after that write is confirmed.
//!
//! Any ledger or broker failure rejects the assignment with requeue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskmesh_broker::{DeliveryHandler, DeliveryMode, Disposition, Publisher};
use taskmesh_core::inference::{error_answer, InferenceClient, InferenceFailurePolicy};
use taskmesh_core::ledger::{LedgerClient, LedgerTaskState};
use taskmesh_core::queues::RESULT_QUEUE;
use taskmesh_core::task::{decode, encode, Assignment, TaskResult, WorkerIdentity};

use crate::error::ProcessError;

/// What happened to one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The answer was recorded on the ledger and published.
    Completed(TaskResult),
    /// Addressed to a different node.
    Foreign,
    /// The ledger already holds an answer.
    AlreadyCompleted,
    /// The ledger has the task assigned to another address.
    OwnedElsewhere { owner: String },
    /// Inference failed and the policy says to drop the assignment.
    Abandoned,
    /// Inference failed and the policy says to try again later.
    Retry,
}

impl ProcessOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Retry => Disposition::REQUEUE,
            _ => Disposition::Ack,
        }
    }
}

pub struct TaskProcessor {
    identity: WorkerIdentity,
    ledger: Arc<dyn LedgerClient>,
    inference: Arc<dyn InferenceClient>,
    publisher: Arc<dyn Publisher>,
    failure_policy: InferenceFailurePolicy,
}

impl TaskProcessor {
    pub fn new(
        identity: WorkerIdentity,
        ledger: Arc<dyn LedgerClient>,
        inference: Arc<dyn InferenceClient>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            identity,
            ledger,
            inference,
            publisher,
            failure_policy: InferenceFailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: InferenceFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Run one assignment through the ledger guard, inference and
    /// completion.
    pub async fn process(&self, assignment: &Assignment) -> Result<ProcessOutcome, ProcessError> {
        let task_id = assignment.task_id();
        let node_id = &self.identity.node_id;

        if !assignment.is_addressed_to(node_id) {
            tracing::debug!(
                task_id,
                assigned_node = %assignment.assigned_node,
                "Assignment is for another node, skipping",
            );
            return Ok(ProcessOutcome::Foreign);
        }

        tracing::info!(task_id, question = %assignment.task.question, "Processing task");

        match self.ledger.task_state(task_id).await? {
            LedgerTaskState::Completed { .. } => {
                tracing::info!(task_id, "Task already completed on ledger, skipping");
                return Ok(ProcessOutcome::AlreadyCompleted);
            }
            LedgerTaskState::Assigned { address } if address == self.ledger.address() => {
                tracing::info!(task_id, "Task already assigned to this node, resuming");
            }
            LedgerTaskState::Assigned { address } => {
                tracing::warn!(task_id, owner = %address, "Task assigned to another address, skipping");
                return Ok(ProcessOutcome::OwnedElsewhere { owner: address });
            }
            LedgerTaskState::Created => {
                let confirmation = self.ledger.assign(task_id).await?;
                tracing::info!(task_id, tx_id = %confirmation.tx_id, "Task assigned on ledger");
            }
        }

        let answer = match self.inference.answer(&assignment.task.question).await {
            Ok(answer) => answer,
            Err(e) => match self.failure_policy {
                InferenceFailurePolicy::SubmitError => {
                    tracing::warn!(task_id, error = %e, "Inference failed, submitting error answer");
                    error_answer(&e)
                }
                InferenceFailurePolicy::Retry => {
                    tracing::warn!(task_id, error = %e, "Inference failed, requeueing assignment");
                    return Ok(ProcessOutcome::Retry);
                }
                InferenceFailurePolicy::Abandon => {
                    tracing::warn!(task_id, error = %e, "Inference failed, abandoning task");
                    return Ok(ProcessOutcome::Abandoned);
                }
            },
        };

        let confirmation = self.ledger.complete(task_id, &answer).await?;
        tracing::info!(task_id, tx_id = %confirmation.tx_id, "Task completed on ledger");

        let result = TaskResult {
            task_id: task_id.to_string(),
            node_id: node_id.clone(),
            answer,
            completed_at: Utc::now(),
        };
        self.publisher
            .publish(RESULT_QUEUE, &encode(&result)?, DeliveryMode::Persistent)
            .await?;
        tracing::info!(task_id, answer = %result.answer, "Result published");

        self.log_node_stats().await;
        Ok(ProcessOutcome::Completed(result))
    }

    async fn log_node_stats(&self) {
        match self.ledger.node_stats(self.ledger.address()).await {
            Ok(stats) => tracing::info!(
                node_id = %self.identity.node_id,
                tasks_completed = stats.tasks_completed,
                "Node stats",
            ),
            Err(e) => tracing::debug!(error = %e, "Could not read node stats"),
        }
    }
}

#[async_trait]
impl DeliveryHandler for TaskProcessor {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        let assignment = match decode::<Assignment>(payload) {
            Ok(assignment) => assignment,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed assignment, requeueing");
                return Disposition::REQUEUE;
            }
        };

        match self.process(&assignment).await {
            Ok(outcome) => outcome.disposition(),
            Err(e) => {
                tracing::error!(
                    task_id = %assignment.task_id(),
                    error = %e,
                    "Task processing failed, requeueing",
                );
                Disposition::REQUEUE
            }
        }
    }
}

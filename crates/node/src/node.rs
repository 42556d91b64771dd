//! A running worker: broker connection, announcement and task consumer.

use std::sync::Arc;
use std::time::Duration;

use taskmesh_broker::{
    join_or_abort, run_consumer, BrokerConnector, ConnectionManager, ConnectionOptions,
    ReconnectPolicy,
};
use taskmesh_core::inference::InferenceClient;
use taskmesh_core::ledger::LedgerClient;
use taskmesh_core::queues::TASK_QUEUE;
use taskmesh_core::task::WorkerIdentity;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::announcer::announce;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::processor::TaskProcessor;

/// A worker holds at most one unacknowledged assignment at a time.
const TASK_PREFETCH: u16 = 1;

const CONSUMER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WorkerNode {
    identity: WorkerIdentity,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
    consumer: JoinHandle<()>,
}

impl std::fmt::Debug for WorkerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerNode")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl WorkerNode {
    /// Connect, announce and start consuming assignments.
    pub async fn start(
        config: &NodeConfig,
        connector: Arc<dyn BrokerConnector>,
        policy: ReconnectPolicy,
        ledger: Arc<dyn LedgerClient>,
        inference: Arc<dyn InferenceClient>,
    ) -> Result<Self, NodeError> {
        let identity = config.identity(ledger.address());
        identity.validate()?;
        tracing::info!(
            node_id = %identity.node_id,
            node_name = %identity.node_name,
            address = %identity.address,
            "Starting worker node",
        );

        let manager = ConnectionManager::new(
            connector,
            ConnectionOptions::new(identity.node_id.clone())
                .with_prefetch(TASK_PREFETCH)
                .with_policy(policy),
        );
        manager.connect().await?;

        if let Err(e) = announce(&identity, ledger.as_ref(), manager.as_ref()).await {
            manager.shutdown().await;
            return Err(e);
        }

        let processor = TaskProcessor::new(identity.clone(), ledger, inference, manager.clone())
            .with_failure_policy(config.failure_policy);
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(run_consumer(
            Arc::clone(&manager),
            TASK_QUEUE.to_string(),
            Arc::new(processor),
            cancel.child_token(),
        ));

        tracing::info!(node_id = %identity.node_id, "Worker node waiting for tasks");

        Ok(Self {
            identity,
            manager,
            cancel,
            consumer,
        })
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Stop consuming and disconnect. An in-flight assignment gets five
    /// seconds to finish before the consumer is aborted.
    pub async fn shutdown(self) {
        tracing::info!(node_id = %self.identity.node_id, "Shutting down worker node");
        self.cancel.cancel();
        join_or_abort("task-consumer", self.consumer, CONSUMER_SHUTDOWN_TIMEOUT).await;
        self.manager.shutdown().await;
    }
}

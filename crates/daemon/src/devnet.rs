//! A complete local network in one process.
//!
//! [`Devnet::start`] creates an in-process ledger, connects a control
//! plane and `node_count` workers to the configured broker, and waits
//! until every worker has been registered with the control plane.
//! Tasks are created directly on the ledger with [`Devnet::submit`].

use std::sync::Arc;
use std::time::Duration;

use taskmesh_broker::MemoryBroker;
use taskmesh_control::ControlPlane;
use taskmesh_core::inference::InferenceClient;
use taskmesh_core::ledger::TaskCreated;
use taskmesh_core::task::TaskResult;
use taskmesh_ledger::MemoryLedger;
use taskmesh_node::WorkerNode;
use tokio::sync::broadcast;

use crate::config::DevnetConfig;
use crate::error::DaemonError;

const CONTROL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// How long startup waits for worker announcements to reach the registry.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);
const REGISTRATION_POLL: Duration = Duration::from_millis(20);

pub struct Devnet {
    broker: MemoryBroker,
    ledger: MemoryLedger,
    plane: ControlPlane,
    nodes: Vec<WorkerNode>,
}

impl Devnet {
    pub async fn start(
        config: &DevnetConfig,
        inference: Arc<dyn InferenceClient>,
    ) -> Result<Self, DaemonError> {
        let broker = MemoryBroker::new();
        let ledger = MemoryLedger::new();
        let connector = config.broker.backend.connector(&broker);

        let plane = ControlPlane::start(
            Arc::clone(&connector),
            config.broker.policy.clone(),
            Arc::new(ledger.client(CONTROL_ADDRESS)),
        )
        .await?;

        let mut nodes = Vec::with_capacity(config.node_count);
        for index in 0..config.node_count {
            let address = format!("0x{}", uuid::Uuid::new_v4().simple());
            let started = WorkerNode::start(
                &config.node_config(index),
                Arc::clone(&connector),
                config.broker.policy.clone(),
                Arc::new(ledger.client(address)),
                Arc::clone(&inference),
            )
            .await;

            match started {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    for node in nodes {
                        node.shutdown().await;
                    }
                    plane.shutdown().await;
                    return Err(e.into());
                }
            }
        }

        let devnet = Self {
            broker,
            ledger,
            plane,
            nodes,
        };
        devnet.wait_for_registrations().await;
        tracing::info!(nodes = devnet.nodes.len(), "Local network started");
        Ok(devnet)
    }

    /// Create a task on the ledger. The control plane picks it up from the
    /// ledger feed.
    pub fn submit(&self, question: &str) -> TaskCreated {
        let created = self.ledger.create_task(question);
        tracing::info!(task_id = %created.task_id, "Task created");
        created
    }

    pub fn results(&self) -> broadcast::Receiver<TaskResult> {
        self.plane.results()
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    /// The in-process broker. Unused when the network runs against AMQP.
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    pub fn nodes(&self) -> &[WorkerNode] {
        &self.nodes
    }

    pub fn control_plane(&self) -> &ControlPlane {
        &self.plane
    }

    /// Stop the workers first so in-flight results still reach the
    /// collector, then the control plane.
    pub async fn shutdown(self) {
        for node in self.nodes {
            node.shutdown().await;
        }
        self.plane.shutdown().await;
    }

    async fn wait_for_registrations(&self) {
        let registry = self.plane.registry();
        let expected = self.nodes.len();
        let waited = tokio::time::timeout(REGISTRATION_TIMEOUT, async {
            while registry.current_size().await < expected {
                tokio::time::sleep(REGISTRATION_POLL).await;
            }
        })
        .await;

        if waited.is_err() {
            tracing::warn!(
                expected,
                registered = registry.current_size().await,
                "Not every worker registered in time; early tasks may be dropped",
            );
        }
    }
}

//! Wires the control-side components together.
//!
//! [`ControlPlane::start`] connects to the broker, subscribes to the
//! ledger, and spawns three long-lived tasks: the ledger watcher, the
//! result consumer and the registration consumer. All of them observe a
//! shared cancellation token and are stopped by
//! [`ControlPlane::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use taskmesh_broker::{
    join_or_abort, run_consumer, BrokerConnector, ConnectionManager, ConnectionOptions,
    DeliveryHandler, Publisher, ReconnectPolicy,
};
use taskmesh_core::ledger::LedgerClient;
use taskmesh_core::queues::{REGISTRATION_QUEUE, RESULT_QUEUE};
use taskmesh_core::task::TaskResult;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::ResultCollector;
use crate::dispatcher::Dispatcher;
use crate::error::ControlError;
use crate::registration::RegistrationListener;
use crate::registry::NodeRegistry;
use crate::watcher::LedgerWatcher;

/// How long shutdown waits for each background task before aborting it.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ControlPlane {
    manager: Arc<ConnectionManager>,
    registry: Arc<NodeRegistry>,
    dispatcher: Arc<Dispatcher>,
    collector: Arc<ResultCollector>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ControlPlane {
    /// Connect to the broker and start watching the ledger.
    ///
    /// Fails if the broker cannot be reached within the startup retry
    /// budget or the ledger subscription is refused.
    pub async fn start(
        connector: Arc<dyn BrokerConnector>,
        policy: ReconnectPolicy,
        ledger: Arc<dyn LedgerClient>,
    ) -> Result<Self, ControlError> {
        let manager = ConnectionManager::new(
            connector,
            ConnectionOptions::new("control-plane").with_policy(policy),
        );
        manager.connect().await?;

        let registry = Arc::new(NodeRegistry::new());
        let publisher: Arc<dyn Publisher> = manager.clone();
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), publisher));
        let collector = Arc::new(ResultCollector::new());

        let watcher = match LedgerWatcher::subscribe(ledger.as_ref(), Arc::clone(&dispatcher)).await
        {
            Ok(watcher) => watcher,
            Err(e) => {
                manager.shutdown().await;
                return Err(e.into());
            }
        };

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let watcher_cancel = cancel.child_token();
        tasks.push((
            "ledger-watcher",
            tokio::spawn(async move {
                let handled = watcher.run(watcher_cancel).await;
                tracing::info!(handled, "Ledger watcher exited");
            }),
        ));
        tasks.push((
            "result-collector",
            spawn_consumer(&manager, RESULT_QUEUE, collector.clone(), &cancel),
        ));
        tasks.push((
            "registration-listener",
            spawn_consumer(
                &manager,
                REGISTRATION_QUEUE,
                Arc::new(RegistrationListener::new(Arc::clone(&registry))),
                &cancel,
            ),
        ));

        tracing::info!("Control plane started");

        Ok(Self {
            manager,
            registry,
            dispatcher,
            collector,
            cancel,
            tasks,
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Receive every task result collected from now on.
    pub fn results(&self) -> broadcast::Receiver<TaskResult> {
        self.collector.subscribe()
    }

    /// Stop all background tasks, then close the broker connection.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down control plane");
        self.cancel.cancel();

        for (name, task) in self.tasks {
            join_or_abort(name, task, TASK_SHUTDOWN_TIMEOUT).await;
        }

        self.manager.shutdown().await;
        tracing::info!("Control plane shut down complete");
    }
}

fn spawn_consumer(
    manager: &Arc<ConnectionManager>,
    queue: &str,
    handler: Arc<dyn DeliveryHandler>,
    cancel: &CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_consumer(
        Arc::clone(manager),
        queue.to_string(),
        handler,
        cancel.child_token(),
    ))
}

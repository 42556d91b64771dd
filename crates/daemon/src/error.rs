use taskmesh_control::ControlError;
use taskmesh_core::config::ConfigError;
use taskmesh_node::NodeError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control plane failed to start: {0}")]
    Control(#[from] ControlError),

    #[error("Worker node failed to start: {0}")]
    Node(#[from] NodeError),
}

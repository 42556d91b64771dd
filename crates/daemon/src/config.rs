use taskmesh_broker::BrokerConfig;
use taskmesh_core::config::{parse_or, process_env, ConfigError, Lookup};
use taskmesh_node::NodeConfig;

const DEFAULT_NODE_COUNT: usize = 1;

/// Settings for a local network: one control plane plus `node_count`
/// workers sharing a broker and an in-process ledger.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    pub node_count: usize,
    pub broker: BrokerConfig,
    /// Template for every worker. An explicit `NODE_ID` gets a `-<n>`
    /// suffix when more than one worker runs.
    pub node: NodeConfig,
}

impl DevnetConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var      | Default |
    /// |--------------|---------|
    /// | `NODE_COUNT` | `1`     |
    ///
    /// Broker and node variables are read by [`BrokerConfig`] and
    /// [`NodeConfig`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let node_count: usize = parse_or(lookup, "NODE_COUNT", DEFAULT_NODE_COUNT)?;
        if node_count == 0 {
            return Err(ConfigError::Invalid {
                name: "NODE_COUNT",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self {
            node_count,
            broker: BrokerConfig::from_lookup(lookup)?,
            node: NodeConfig::from_lookup(lookup)?,
        })
    }

    /// Configuration of the worker at `index` (zero-based).
    pub fn node_config(&self, index: usize) -> NodeConfig {
        let mut config = self.node.clone();
        if self.node_count > 1 {
            config.node_id = config.node_id.map(|id| format!("{id}-{}", index + 1));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use taskmesh_broker::BrokerBackend;

    fn load(pairs: &[(&str, &str)]) -> Result<DevnetConfig, ConfigError> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lookup = move |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        DevnetConfig::from_lookup(&lookup)
    }

    #[test]
    fn defaults_to_single_node_on_memory_broker() {
        let config = load(&[]).unwrap();
        assert_eq!(config.node_count, 1);
        assert_eq!(config.broker.backend, BrokerBackend::Memory);
        assert_eq!(config.node.node_name, "AI_Node");
    }

    #[test]
    fn zero_nodes_is_rejected() {
        assert_matches!(
            load(&[("NODE_COUNT", "0")]),
            Err(ConfigError::Invalid { name: "NODE_COUNT", .. })
        );
    }

    #[test]
    fn explicit_node_id_is_suffixed_per_worker() {
        let config = load(&[("NODE_COUNT", "3"), ("NODE_ID", "gpu")]).unwrap();
        assert_eq!(config.node_config(0).node_id.as_deref(), Some("gpu-1"));
        assert_eq!(config.node_config(2).node_id.as_deref(), Some("gpu-3"));
    }

    #[test]
    fn single_worker_keeps_node_id() {
        let config = load(&[("NODE_ID", "gpu")]).unwrap();
        assert_eq!(config.node_config(0).node_id.as_deref(), Some("gpu"));
    }

    #[test]
    fn derived_node_ids_stay_unset() {
        let config = load(&[("NODE_COUNT", "2")]).unwrap();
        assert_eq!(config.node_config(1).node_id, None);
    }
}

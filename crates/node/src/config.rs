use taskmesh_core::config::{
    lookup_trimmed, parse_or, process_env, required, string_or, ConfigError, Lookup,
};
use taskmesh_core::inference::InferenceFailurePolicy;
use taskmesh_core::task::WorkerIdentity;

/// Worker node settings.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Human-readable name registered on the ledger (default: `AI_Node`).
    pub node_name: String,
    /// Round-robin key. Derived from the ledger address when unset.
    pub node_id: Option<String>,
    pub failure_policy: InferenceFailurePolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "AI_Node".into(),
            node_id: None,
            failure_policy: InferenceFailurePolicy::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                    |
    /// |----------------------------|----------------------------|
    /// | `NODE_NAME`                | `AI_Node`                  |
    /// | `NODE_ID`                  | `node_` + address prefix   |
    /// | `INFERENCE_FAILURE_POLICY` | `submit-error`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            node_name: string_or(lookup, "NODE_NAME", &defaults.node_name),
            node_id: lookup_trimmed(lookup, "NODE_ID"),
            failure_policy: parse_or(
                lookup,
                "INFERENCE_FAILURE_POLICY",
                defaults.failure_policy,
            )?,
        })
    }

    /// The identity this worker announces, given its ledger address.
    pub fn identity(&self, address: &str) -> WorkerIdentity {
        let node_id = self
            .node_id
            .clone()
            .unwrap_or_else(|| default_node_id(address));
        WorkerIdentity::new(node_id, self.node_name.clone(), address)
    }
}

/// `node_` followed by the first eight characters of the address.
pub fn default_node_id(address: &str) -> String {
    format!("node_{}", address.chars().take(8).collect::<String>())
}

/// Settings for the OpenAI-compatible inference backend.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var           | Default                     |
    /// |-------------------|-----------------------------|
    /// | `OPENAI_API_KEY`  | required                    |
    /// | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
    /// | `OPENAI_MODEL`    | `gpt-4o`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required(lookup, "OPENAI_API_KEY")?,
            base_url: string_or(lookup, "OPENAI_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            model: string_or(lookup, "OPENAI_MODEL", "gpt-4o"),
        })
    }
}

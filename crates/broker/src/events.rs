//! Lifecycle events emitted by the connection manager.

use serde::Serialize;

/// A change in a [`ConnectionManager`](crate::manager::ConnectionManager)'s
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A channel was installed. `generation` increases on every connect.
    Connected { generation: u64 },

    /// The channel with this generation closed.
    Disconnected { generation: u64 },

    /// A reconnect attempt is about to be made (1-based).
    ReconnectAttempt { attempt: u32 },
}

impl ConnectionEvent {
    /// Short event name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::ReconnectAttempt { .. } => "reconnect_attempt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(ConnectionEvent::Connected { generation: 3 }).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["generation"], 3);
    }

    #[test]
    fn kind_matches_tag() {
        assert_eq!(ConnectionEvent::ReconnectAttempt { attempt: 1 }.kind(), "reconnect_attempt");
        assert_eq!(ConnectionEvent::Disconnected { generation: 1 }.kind(), "disconnected");
    }
}

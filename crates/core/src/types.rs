/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Ledger-assigned task identifier (decimal string form of the on-ledger id).
pub type TaskId = String;

/// Logical worker identifier used for round-robin assignment.
pub type NodeId = String;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

//! Abstract interface to the inference backend and the policy applied
//! when it fails.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    /// The backend could not be reached or returned a transport error.
    #[error("{0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Produce an answer for `question`.
    async fn answer(&self, question: &str) -> Result<String, InferenceError>;
}

/// What a worker does when inference fails.
///
/// Submitting an error string completes the task on the ledger, which is
/// irreversible, so the choice is left to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InferenceFailurePolicy {
    /// Complete the task with a synthesized error answer.
    #[default]
    SubmitError,
    /// Reject the assignment with requeue and leave the ledger untouched.
    Retry,
    /// Acknowledge the assignment; the ledger keeps the task `Assigned`.
    Abandon,
}

impl InferenceFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitError => "submit-error",
            Self::Retry => "retry",
            Self::Abandon => "abandon",
        }
    }
}

impl fmt::Display for InferenceFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InferenceFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submit-error" | "submit_error" => Ok(Self::SubmitError),
            "retry" => Ok(Self::Retry),
            "abandon" => Ok(Self::Abandon),
            other => Err(format!(
                "unknown inference failure policy '{other}' (expected submit-error, retry or abandon)"
            )),
        }
    }
}

/// Answer text recorded on the ledger when inference failed and the
/// policy is [`InferenceFailurePolicy::SubmitError`].
pub fn error_answer(err: &InferenceError) -> String {
    format!("Error: Unable to generate answer - {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_known_names() {
        assert_eq!(
            "submit-error".parse::<InferenceFailurePolicy>(),
            Ok(InferenceFailurePolicy::SubmitError)
        );
        assert_eq!(
            " Retry ".parse::<InferenceFailurePolicy>(),
            Ok(InferenceFailurePolicy::Retry)
        );
        assert_eq!(
            "abandon".parse::<InferenceFailurePolicy>(),
            Ok(InferenceFailurePolicy::Abandon)
        );
    }

    #[test]
    fn policy_rejects_unknown_name() {
        assert!("sometimes".parse::<InferenceFailurePolicy>().is_err());
    }

    #[test]
    fn policy_round_trips_through_display() {
        for policy in [
            InferenceFailurePolicy::SubmitError,
            InferenceFailurePolicy::Retry,
            InferenceFailurePolicy::Abandon,
        ] {
            assert_eq!(policy.to_string().parse::<InferenceFailurePolicy>(), Ok(policy));
        }
    }

    #[test]
    fn error_answer_embeds_reason() {
        let err = InferenceError::Transport("connection refused".into());
        assert_eq!(
            error_answer(&err),
            "Error: Unable to generate answer - connection refused"
        );
    }
}

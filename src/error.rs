use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient {operation} failure: {reason}")]
    Transient {
        operation: &'static str,
        reason: String,
    },
    /// The state write succeeded but the interaction log append did not.
    /// Resubmitting the request with `interaction_id` set repairs the log
    /// without applying the attempt twice.
    #[error("attempt {interaction_id} applied but not logged: {reason}")]
    Unlogged { interaction_id: Uuid, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(operation: &'static str, err: StoreError) -> Self {
        Self::Transient {
            operation,
            reason: err.to_string(),
        }
    }

    /// Callers may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Failures reported by the external state backend, interaction log and
/// evaluation-window store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = CoreError::transient("put_state", StoreError::Timeout(Duration::from_millis(5)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("put_state"));
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!CoreError::validation("empty student_id").is_retryable());
        assert!(!CoreError::NotFound("concept c1".into()).is_retryable());
    }

    #[test]
    fn unlogged_attempt_is_not_blindly_retryable() {
        let id = Uuid::new_v4();
        let err = CoreError::Unlogged {
            interaction_id: id,
            reason: "log down".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains(&id.to_string()));
    }
}

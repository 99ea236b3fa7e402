use repute_store::StoreError;
use repute_types::EntityRef;
use thiserror::Error;

/// Failure classes callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller or configuration error. Never retried.
    InvalidArgument,
    UnsupportedOperation,
    /// Uniqueness or referential failure raised by the store.
    ConstraintViolation,
    Storage,
}

#[derive(Error, Debug)]
pub enum ReputationError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{evaluator} has not evaluated {reputation} of {target} yet")]
    EvaluationNotFound {
        reputation: String,
        evaluator: EntityRef,
        target: EntityRef,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("propagation cycle detected at {reputation} of {target}")]
    PropagationCycle { reputation: String, target: EntityRef },

    #[error("propagation exceeded the maximum depth of {limit}")]
    PropagationDepthExceeded { limit: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ReputationError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ReputationError::InvalidArgument(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReputationError::InvalidArgument(_)
            | ReputationError::EvaluationNotFound { .. }
            | ReputationError::PropagationCycle { .. }
            | ReputationError::PropagationDepthExceeded { .. }
            | ReputationError::Config(_) => ErrorKind::InvalidArgument,
            ReputationError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            ReputationError::Store(StoreError::Constraint(_)) => ErrorKind::ConstraintViolation,
            ReputationError::Store(_) => ErrorKind::Storage,
        }
    }

    /// Label used by the engine error counter.
    pub fn metric_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::UnsupportedOperation => "unsupported_operation",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Storage => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReputationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use repute_types::ConstraintViolation;

    #[test]
    fn store_errors_keep_their_class() {
        let dup: ReputationError = StoreError::from(ConstraintViolation::DuplicateMessage {
            sender: "evaluation#1".into(),
            receiver_id: 2,
        })
        .into();
        assert_eq!(dup.kind(), ErrorKind::ConstraintViolation);

        let io: ReputationError = StoreError::Backend("disk full".into()).into();
        assert_eq!(io.kind(), ErrorKind::Storage);
    }

    #[test]
    fn not_found_is_an_argument_error() {
        let err = ReputationError::EvaluationNotFound {
            reputation: "votes".into(),
            evaluator: EntityRef::new("User", 1),
            target: EntityRef::new("Question", 2),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "User#1 has not evaluated votes of Question#2 yet");
    }
}

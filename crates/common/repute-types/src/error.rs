use crate::entity::EntityRef;
use thiserror::Error;

/// Uniqueness and referential-validity failures raised by a store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintViolation {
    #[error("{evaluator} has already evaluated {reputation} of {target}")]
    DuplicateEvaluation {
        reputation: String,
        evaluator: EntityRef,
        target: EntityRef,
    },

    #[error("reputation {reputation} already exists for {target}")]
    DuplicateReputation { reputation: String, target: EntityRef },

    #[error("{sender} has already sent a message to reputation {receiver_id}")]
    DuplicateMessage { sender: String, receiver_id: u64 },

    #[error("message sender must be an evaluation or a reputation, got {kind}")]
    InvalidSenderType { kind: String },

    #[error("message sender {sender} does not exist")]
    MissingSender { sender: String },

    #[error("message receiver reputation {receiver_id} does not exist")]
    MissingReceiver { receiver_id: u64 },
}

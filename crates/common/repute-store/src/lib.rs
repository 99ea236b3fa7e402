#![forbid(unsafe_code)]

pub mod memory;
pub mod sled_store;
pub mod store_metrics;

pub use memory::InMemoryReputationStore;
pub use sled_store::SledReputationStore;

use repute_types::{
    ConstraintViolation, EntityRef, Evaluation, Message, NewEvaluation, NewReputation, Reputation,
    SenderRef,
};
use thiserror::Error;

/// Errors surfaced by a store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Constraint(#[from] ConstraintViolation),

    #[error("{table} record {id} not found")]
    NotFound { table: &'static str, id: u64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(format!("sled: {}", err))
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Backend(format!("bincode: {}", err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for evaluations, reputations and messages.
///
/// Implementations own the uniqueness rules:
/// - one evaluation per `(reputation_name, source, target)`
/// - one reputation per `(reputation_name, target)`
/// - one message per `(sender, receiver)`, and both ends must exist
///
/// Cascades (message destroy hooks, reputation deletion) are the engine's job,
/// a store only removes the row it is asked to remove.
pub trait ReputationStore: Send + Sync + 'static {
    /// Short backend label used in metrics and logs.
    fn backend(&self) -> &'static str;

    // --- Evaluations ---
    fn insert_evaluation(&self, new: NewEvaluation) -> StoreResult<Evaluation>;

    fn get_evaluation(&self, id: u64) -> StoreResult<Option<Evaluation>>;

    fn find_evaluation(
        &self,
        reputation_name: &str,
        source: &EntityRef,
        target: &EntityRef,
    ) -> StoreResult<Option<Evaluation>>;

    /// Overwrites value and data of an existing evaluation.
    fn update_evaluation(&self, evaluation: &Evaluation) -> StoreResult<()>;

    fn delete_evaluation(&self, id: u64) -> StoreResult<bool>;

    /// Evaluations of `target` for one reputation, oldest first.
    fn evaluations_for_target(
        &self,
        reputation_name: &str,
        target: &EntityRef,
    ) -> StoreResult<Vec<Evaluation>>;

    /// Evaluations written by `source` on targets of `target_type`, oldest first.
    fn evaluations_by_source(
        &self,
        reputation_name: &str,
        source: &EntityRef,
        target_type: &str,
    ) -> StoreResult<Vec<Evaluation>>;

    /// Every evaluation whose target is `target`, regardless of reputation.
    fn evaluations_targeting(&self, target: &EntityRef) -> StoreResult<Vec<Evaluation>>;

    // --- Reputations ---
    fn insert_reputation(&self, new: NewReputation) -> StoreResult<Reputation>;

    fn get_reputation(&self, id: u64) -> StoreResult<Option<Reputation>>;

    fn find_reputation(
        &self,
        reputation_name: &str,
        target: &EntityRef,
    ) -> StoreResult<Option<Reputation>>;

    /// Persists the record as given. No identity coercion happens here.
    fn save_reputation(&self, reputation: &Reputation) -> StoreResult<()>;

    fn delete_reputation(&self, id: u64) -> StoreResult<bool>;

    fn reputations_for_target(&self, target: &EntityRef) -> StoreResult<Vec<Reputation>>;

    /// Values of all active reputations sharing `(reputation_name, target_type)`.
    fn active_values(&self, reputation_name: &str, target_type: &str) -> StoreResult<Vec<f64>>;

    fn max_value(&self, reputation_name: &str, target_type: &str) -> StoreResult<Option<f64>> {
        Ok(self
            .active_values(reputation_name, target_type)?
            .into_iter()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v)))))
    }

    fn min_value(&self, reputation_name: &str, target_type: &str) -> StoreResult<Option<f64>> {
        Ok(self
            .active_values(reputation_name, target_type)?
            .into_iter()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v)))))
    }

    /// Number of active reputations strictly greater than `value`.
    fn count_greater(&self, reputation_name: &str, target_type: &str, value: f64) -> StoreResult<usize> {
        Ok(self
            .active_values(reputation_name, target_type)?
            .into_iter()
            .filter(|v| *v > value)
            .count())
    }

    // --- Messages ---
    fn insert_message(&self, sender: SenderRef, receiver_id: u64) -> StoreResult<Message>;

    fn find_message(&self, sender: SenderRef, receiver_id: u64) -> StoreResult<Option<Message>>;

    fn delete_message(&self, id: u64) -> StoreResult<bool>;

    fn messages_from(&self, sender: SenderRef) -> StoreResult<Vec<Message>>;

    fn messages_to(&self, receiver_id: u64) -> StoreResult<Vec<Message>>;

    fn received_count(&self, receiver_id: u64) -> StoreResult<usize> {
        Ok(self.messages_to(receiver_id)?.len())
    }
}

use repute_store::{ReputationStore, StoreError};
use repute_types::{ConstraintViolation, Evaluation, Message, Reputation, SenderRef};
use tracing::debug;

use crate::error::Result;
use crate::metrics;

/// Delivered propagation edges and the cascades hanging off them.
///
/// A delivered evaluation belongs to its edge: destroying a message sent by
/// an evaluation destroys the evaluation as well.
#[derive(Clone, Copy)]
pub struct MessageLedger<'a> {
    store: &'a dyn ReputationStore,
}

impl<'a> MessageLedger<'a> {
    pub fn new(store: &'a dyn ReputationStore) -> Self {
        Self { store }
    }

    /// Records `sender -> receiver` unless it is already recorded. Returns
    /// whether a new edge was written.
    pub fn add_if_not_exists(&self, sender: SenderRef, receiver_id: u64) -> Result<bool> {
        if self.store.find_message(sender, receiver_id)?.is_some() {
            return Ok(false);
        }
        match self.store.insert_message(sender, receiver_id) {
            Ok(message) => {
                metrics::record_message_delivered();
                debug!(message_id = message.id, %sender, receiver_id, "Delivered message");
                Ok(true)
            }
            Err(StoreError::Constraint(ConstraintViolation::DuplicateMessage { .. })) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_delivered(&self, sender: SenderRef, receiver_id: u64) -> Result<bool> {
        Ok(self.store.find_message(sender, receiver_id)?.is_some())
    }

    pub fn received_count(&self, receiver_id: u64) -> Result<usize> {
        Ok(self.store.received_count(receiver_id)?)
    }

    pub fn sent_by(&self, sender: SenderRef) -> Result<Vec<Message>> {
        Ok(self.store.messages_from(sender)?)
    }

    pub fn received_by(&self, receiver_id: u64) -> Result<Vec<Message>> {
        Ok(self.store.messages_to(receiver_id)?)
    }

    /// Removes one edge, taking an evaluation sender down with it.
    pub fn destroy(&self, message: &Message) -> Result<()> {
        self.store.delete_message(message.id)?;
        if let SenderRef::Evaluation(id) = message.sender {
            if let Some(evaluation) = self.store.get_evaluation(id)? {
                self.destroy_evaluation(&evaluation)?;
            }
        }
        Ok(())
    }

    pub fn destroy_evaluation(&self, evaluation: &Evaluation) -> Result<()> {
        for message in self.store.messages_from(SenderRef::Evaluation(evaluation.id))? {
            self.store.delete_message(message.id)?;
        }
        self.store.delete_evaluation(evaluation.id)?;
        debug!(evaluation_id = evaluation.id, reputation = %evaluation.reputation_name, "Destroyed evaluation");
        Ok(())
    }

    /// Deletes a reputation together with every edge it sends or receives.
    pub fn destroy_reputation(&self, reputation: &Reputation) -> Result<()> {
        for message in self.store.messages_from(SenderRef::Reputation(reputation.id))? {
            self.store.delete_message(message.id)?;
        }
        for message in self.store.messages_to(reputation.id)? {
            self.destroy(&message)?;
        }
        self.store.delete_reputation(reputation.id)?;
        debug!(
            reputation = %reputation.reputation_name,
            target = %reputation.target,
            "Destroyed reputation"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repute_store::InMemoryReputationStore;
    use repute_types::{Aggregation, EntityRef, NewEvaluation, NewReputation};

    fn seeded(store: &InMemoryReputationStore) -> (Evaluation, Reputation, Reputation) {
        let question = EntityRef::new("Question", 1);
        let evaluation = store
            .insert_evaluation(NewEvaluation::new("total_votes", EntityRef::new("User", 2), question.clone(), 1.0))
            .unwrap();
        let votes = store
            .insert_reputation(NewReputation::new("total_votes", question, Aggregation::Sum, None))
            .unwrap();
        let karma = store
            .insert_reputation(NewReputation::new("question_karma", EntityRef::new("User", 3), Aggregation::Sum, None))
            .unwrap();
        (evaluation, votes, karma)
    }

    #[test]
    fn add_if_not_exists_is_idempotent() {
        let store = InMemoryReputationStore::new();
        let (evaluation, votes, _) = seeded(&store);
        let ledger = MessageLedger::new(&store);
        let sender = SenderRef::Evaluation(evaluation.id);

        assert!(ledger.add_if_not_exists(sender, votes.id).unwrap());
        assert!(!ledger.add_if_not_exists(sender, votes.id).unwrap());
        assert_eq!(ledger.received_count(votes.id).unwrap(), 1);
    }

    #[test]
    fn destroying_a_reputation_cascades_to_delivered_evaluations() {
        let store = InMemoryReputationStore::new();
        let (evaluation, votes, karma) = seeded(&store);
        let ledger = MessageLedger::new(&store);
        ledger.add_if_not_exists(SenderRef::Evaluation(evaluation.id), votes.id).unwrap();
        ledger.add_if_not_exists(SenderRef::Reputation(votes.id), karma.id).unwrap();

        ledger.destroy_reputation(&votes).unwrap();

        assert!(store.get_reputation(votes.id).unwrap().is_none());
        assert!(store.get_evaluation(evaluation.id).unwrap().is_none());
        assert_eq!(ledger.received_count(karma.id).unwrap(), 0);
        assert!(store.get_reputation(karma.id).unwrap().is_some());
    }

    #[test]
    fn missing_receiver_is_a_constraint_violation() {
        let store = InMemoryReputationStore::new();
        let (evaluation, _, _) = seeded(&store);
        let err = MessageLedger::new(&store)
            .add_if_not_exists(SenderRef::Evaluation(evaluation.id), 999)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConstraintViolation);
    }
}

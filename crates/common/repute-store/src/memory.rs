use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use repute_types::{
    ConstraintViolation, EntityRef, Evaluation, Message, NewEvaluation, NewReputation, Reputation,
    SenderRef,
};

use crate::store_metrics::record;
use crate::{ReputationStore, StoreError, StoreResult};

const BACKEND: &str = "memory";

type EvaluationKey = (String, EntityRef, EntityRef);
type ReputationKey = (String, EntityRef);

#[derive(Default)]
struct Tables {
    evaluations: BTreeMap<u64, Evaluation>,
    reputations: BTreeMap<u64, Reputation>,
    messages: BTreeMap<u64, Message>,
    evaluation_index: HashMap<EvaluationKey, u64>,
    reputation_index: HashMap<ReputationKey, u64>,
    message_index: HashMap<(SenderRef, u64), u64>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn sender_exists(&self, sender: SenderRef) -> bool {
        match sender {
            SenderRef::Evaluation(id) => self.evaluations.contains_key(&id),
            SenderRef::Reputation(id) => self.reputations.contains_key(&id),
        }
    }
}

/// Simple in-memory store, the default backend for tests and embedded use.
#[derive(Default)]
pub struct InMemoryReputationStore {
    tables: RwLock<Tables>,
}

impl InMemoryReputationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    fn tracked<T>(&self, operation: &str, result: StoreResult<T>) -> StoreResult<T> {
        record(BACKEND, operation, &result);
        result
    }
}

impl ReputationStore for InMemoryReputationStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn insert_evaluation(&self, new: NewEvaluation) -> StoreResult<Evaluation> {
        let result = (|| -> StoreResult<Evaluation> {
            let mut t = self.write()?;
            let key = (new.reputation_name.clone(), new.source.clone(), new.target.clone());
            if t.evaluation_index.contains_key(&key) {
                return Err(ConstraintViolation::DuplicateEvaluation {
                    reputation: new.reputation_name,
                    evaluator: new.source,
                    target: new.target,
                }
                .into());
            }
            let id = t.next_id();
            let evaluation = new.into_record(id, Utc::now());
            t.evaluation_index.insert(key, id);
            t.evaluations.insert(id, evaluation.clone());
            Ok(evaluation)
        })();
        self.tracked("insert_evaluation", result)
    }

    fn get_evaluation(&self, id: u64) -> StoreResult<Option<Evaluation>> {
        Ok(self.read()?.evaluations.get(&id).cloned())
    }

    fn find_evaluation(
        &self,
        reputation_name: &str,
        source: &EntityRef,
        target: &EntityRef,
    ) -> StoreResult<Option<Evaluation>> {
        let t = self.read()?;
        let key = (reputation_name.to_string(), source.clone(), target.clone());
        Ok(t
            .evaluation_index
            .get(&key)
            .and_then(|id| t.evaluations.get(id))
            .cloned())
    }

    fn update_evaluation(&self, evaluation: &Evaluation) -> StoreResult<()> {
        let result = (|| -> StoreResult<()> {
            let mut t = self.write()?;
            let stored = t
                .evaluations
                .get_mut(&evaluation.id)
                .ok_or(StoreError::NotFound {
                    table: "evaluations",
                    id: evaluation.id,
                })?;
            stored.value = evaluation.value;
            stored.data = evaluation.data.clone();
            stored.updated_at = Utc::now();
            Ok(())
        })();
        self.tracked("update_evaluation", result)
    }

    fn delete_evaluation(&self, id: u64) -> StoreResult<bool> {
        let result = (|| -> StoreResult<bool> {
            let mut t = self.write()?;
            match t.evaluations.remove(&id) {
                Some(e) => {
                    t.evaluation_index
                        .remove(&(e.reputation_name, e.source, e.target));
                    Ok(true)
                }
                None => Ok(false),
            }
        })();
        self.tracked("delete_evaluation", result)
    }

    fn evaluations_for_target(
        &self,
        reputation_name: &str,
        target: &EntityRef,
    ) -> StoreResult<Vec<Evaluation>> {
        Ok(self
            .read()?
            .evaluations
            .values()
            .filter(|e| e.reputation_name == reputation_name && &e.target == target)
            .cloned()
            .collect())
    }

    fn evaluations_by_source(
        &self,
        reputation_name: &str,
        source: &EntityRef,
        target_type: &str,
    ) -> StoreResult<Vec<Evaluation>> {
        Ok(self
            .read()?
            .evaluations
            .values()
            .filter(|e| {
                e.reputation_name == reputation_name
                    && &e.source == source
                    && e.target.is_type(target_type)
            })
            .cloned()
            .collect())
    }

    fn evaluations_targeting(&self, target: &EntityRef) -> StoreResult<Vec<Evaluation>> {
        Ok(self
            .read()?
            .evaluations
            .values()
            .filter(|e| &e.target == target)
            .cloned()
            .collect())
    }

    fn insert_reputation(&self, new: NewReputation) -> StoreResult<Reputation> {
        let result = (|| -> StoreResult<Reputation> {
            let mut t = self.write()?;
            let key = (new.reputation_name.clone(), new.target.clone());
            if t.reputation_index.contains_key(&key) {
                return Err(ConstraintViolation::DuplicateReputation {
                    reputation: new.reputation_name,
                    target: new.target,
                }
                .into());
            }
            let id = t.next_id();
            let reputation = new.into_record(id, Utc::now());
            t.reputation_index.insert(key, id);
            t.reputations.insert(id, reputation.clone());
            Ok(reputation)
        })();
        self.tracked("insert_reputation", result)
    }

    fn get_reputation(&self, id: u64) -> StoreResult<Option<Reputation>> {
        Ok(self.read()?.reputations.get(&id).cloned())
    }

    fn find_reputation(
        &self,
        reputation_name: &str,
        target: &EntityRef,
    ) -> StoreResult<Option<Reputation>> {
        let t = self.read()?;
        let key = (reputation_name.to_string(), target.clone());
        Ok(t
            .reputation_index
            .get(&key)
            .and_then(|id| t.reputations.get(id))
            .cloned())
    }

    fn save_reputation(&self, reputation: &Reputation) -> StoreResult<()> {
        let result = (|| -> StoreResult<()> {
            let mut t = self.write()?;
            let stored = t
                .reputations
                .get_mut(&reputation.id)
                .ok_or(StoreError::NotFound {
                    table: "reputations",
                    id: reputation.id,
                })?;
            stored.value = reputation.value;
            stored.active = reputation.active;
            stored.data = reputation.data.clone();
            stored.updated_at = Utc::now();
            Ok(())
        })();
        self.tracked("save_reputation", result)
    }

    fn delete_reputation(&self, id: u64) -> StoreResult<bool> {
        let result = (|| -> StoreResult<bool> {
            let mut t = self.write()?;
            match t.reputations.remove(&id) {
                Some(r) => {
                    t.reputation_index.remove(&(r.reputation_name, r.target));
                    Ok(true)
                }
                None => Ok(false),
            }
        })();
        self.tracked("delete_reputation", result)
    }

    fn reputations_for_target(&self, target: &EntityRef) -> StoreResult<Vec<Reputation>> {
        Ok(self
            .read()?
            .reputations
            .values()
            .filter(|r| &r.target == target)
            .cloned()
            .collect())
    }

    fn active_values(&self, reputation_name: &str, target_type: &str) -> StoreResult<Vec<f64>> {
        Ok(self
            .read()?
            .reputations
            .values()
            .filter(|r| {
                r.active && r.reputation_name == reputation_name && r.target.is_type(target_type)
            })
            .map(|r| r.value)
            .collect())
    }

    fn insert_message(&self, sender: SenderRef, receiver_id: u64) -> StoreResult<Message> {
        let result = (|| -> StoreResult<Message> {
            let mut t = self.write()?;
            if !t.sender_exists(sender) {
                return Err(ConstraintViolation::MissingSender {
                    sender: sender.to_string(),
                }
                .into());
            }
            if !t.reputations.contains_key(&receiver_id) {
                return Err(ConstraintViolation::MissingReceiver { receiver_id }.into());
            }
            if t.message_index.contains_key(&(sender, receiver_id)) {
                return Err(ConstraintViolation::DuplicateMessage {
                    sender: sender.to_string(),
                    receiver_id,
                }
                .into());
            }
            let id = t.next_id();
            let message = Message {
                id,
                sender,
                receiver_id,
                created_at: Utc::now(),
            };
            t.message_index.insert((sender, receiver_id), id);
            t.messages.insert(id, message.clone());
            Ok(message)
        })();
        self.tracked("insert_message", result)
    }

    fn find_message(&self, sender: SenderRef, receiver_id: u64) -> StoreResult<Option<Message>> {
        let t = self.read()?;
        Ok(t
            .message_index
            .get(&(sender, receiver_id))
            .and_then(|id| t.messages.get(id))
            .cloned())
    }

    fn delete_message(&self, id: u64) -> StoreResult<bool> {
        let result = (|| -> StoreResult<bool> {
            let mut t = self.write()?;
            match t.messages.remove(&id) {
                Some(m) => {
                    t.message_index.remove(&(m.sender, m.receiver_id));
                    Ok(true)
                }
                None => Ok(false),
            }
        })();
        self.tracked("delete_message", result)
    }

    fn messages_from(&self, sender: SenderRef) -> StoreResult<Vec<Message>> {
        Ok(self
            .read()?
            .messages
            .values()
            .filter(|m| m.sender == sender)
            .cloned()
            .collect())
    }

    fn messages_to(&self, receiver_id: u64) -> StoreResult<Vec<Message>> {
        Ok(self
            .read()?
            .messages
            .values()
            .filter(|m| m.receiver_id == receiver_id)
            .cloned()
            .collect())
    }

    fn received_count(&self, receiver_id: u64) -> StoreResult<usize> {
        Ok(self
            .read()?
            .messages
            .values()
            .filter(|m| m.receiver_id == receiver_id)
            .count())
    }
}

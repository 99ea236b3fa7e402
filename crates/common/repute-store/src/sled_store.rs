use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use repute_types::{
    ConstraintViolation, EntityRef, Evaluation, Message, NewEvaluation, NewReputation, Reputation,
    SenderRef,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use tracing::{debug, error};

use crate::store_metrics::record;
use crate::{ReputationStore, StoreError, StoreResult};

const BACKEND: &str = "sled";
const EVALUATIONS_TREE: &str = "evaluations";
const REPUTATIONS_TREE: &str = "reputations";
const MESSAGES_TREE: &str = "messages";
const EVALUATION_KEYS_TREE: &str = "evaluation_keys";
const REPUTATION_KEYS_TREE: &str = "reputation_keys";
const MESSAGE_KEYS_TREE: &str = "message_keys";
const INBOX_TREE: &str = "inbox";

/// A ReputationStore backed by Sled. Each table lives in its own tree, keyed by
/// big-endian record id so iteration follows creation order.
///
/// Unique lookups go through index trees keyed by the natural key of a record:
/// `evaluation_keys` by `(name, source, target)`, `reputation_keys` by
/// `(name, target)`, `message_keys` by `(sender, receiver)`, and `inbox` by
/// `(receiver, message)`. Indexes are maintained under a process-local write
/// lock; a sled database directory must not be shared between processes.
pub struct SledReputationStore {
    db: Db,
    evaluations: Tree,
    reputations: Tree,
    messages: Tree,
    evaluation_keys: Tree,
    reputation_keys: Tree,
    message_keys: Tree,
    inbox: Tree,
    write_lock: Mutex<()>,
}

impl SledReputationStore {
    /// Opens or creates a Sled database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            error!(path = %path.as_ref().display(), error = %e, "Failed to open Sled database for reputation store");
            StoreError::from(e)
        })?;
        Self::from_db(db)
    }

    /// A throwaway database removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let evaluations = db.open_tree(EVALUATIONS_TREE)?;
        let reputations = db.open_tree(REPUTATIONS_TREE)?;
        let messages = db.open_tree(MESSAGES_TREE)?;
        let evaluation_keys = db.open_tree(EVALUATION_KEYS_TREE)?;
        let reputation_keys = db.open_tree(REPUTATION_KEYS_TREE)?;
        let message_keys = db.open_tree(MESSAGE_KEYS_TREE)?;
        let inbox = db.open_tree(INBOX_TREE)?;
        debug!(
            evaluations = evaluations.len(),
            reputations = reputations.len(),
            messages = messages.len(),
            "Opened sled reputation store"
        );
        Ok(Self {
            db,
            evaluations,
            reputations,
            messages,
            evaluation_keys,
            reputation_keys,
            message_keys,
            inbox,
            write_lock: Mutex::new(()),
        })
    }

    /// Flushes dirty pages to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Backend("sled write lock poisoned".into()))
    }

    fn next_id(&self) -> StoreResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    fn tracked<T>(&self, operation: &str, result: StoreResult<T>) -> StoreResult<T> {
        record(BACKEND, operation, &result);
        if let Err(StoreError::Backend(e)) = &result {
            error!(operation, error = %e, "Sled reputation store operation failed");
        }
        result
    }
}

fn key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn load<T: DeserializeOwned>(tree: &Tree, id: u64) -> StoreResult<Option<T>> {
    match tree.get(key(id))? {
        Some(ivec) => Ok(Some(bincode::deserialize(&ivec)?)),
        None => Ok(None),
    }
}

fn put<T: Serialize>(tree: &Tree, id: u64, value: &T) -> StoreResult<()> {
    let bytes = bincode::serialize(value)?;
    tree.insert(key(id), bytes)?;
    Ok(())
}

fn id_of(ivec: &[u8]) -> StoreResult<u64> {
    let bytes: [u8; 8] = ivec
        .try_into()
        .map_err(|_| StoreError::Backend(format!("malformed index entry of {} bytes", ivec.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

fn evaluation_key(reputation_name: &str, source: &EntityRef, target: &EntityRef) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(&(reputation_name, source, target))?)
}

fn reputation_key(reputation_name: &str, target: &EntityRef) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(&(reputation_name, target))?)
}

fn sender_prefix(sender: SenderRef) -> Vec<u8> {
    let tag = match sender {
        SenderRef::Evaluation(_) => 0u8,
        SenderRef::Reputation(_) => 1u8,
    };
    let mut prefix = Vec::with_capacity(9);
    prefix.push(tag);
    prefix.extend_from_slice(&key(sender.id()));
    prefix
}

fn message_key(sender: SenderRef, receiver_id: u64) -> Vec<u8> {
    let mut k = sender_prefix(sender);
    k.extend_from_slice(&key(receiver_id));
    k
}

fn inbox_key(receiver_id: u64, message_id: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&key(receiver_id));
    k[8..].copy_from_slice(&key(message_id));
    k
}

/// Loads the record an index entry points at.
fn indexed<T: DeserializeOwned>(index: &Tree, table: &Tree, index_key: &[u8]) -> StoreResult<Option<T>> {
    match index.get(index_key)? {
        Some(id) => load(table, id_of(&id)?),
        None => Ok(None),
    }
}

fn scan<T, F>(tree: &Tree, mut keep: F) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    F: FnMut(&T) -> bool,
{
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, ivec) = entry?;
        let record: T = bincode::deserialize(&ivec)?;
        if keep(&record) {
            out.push(record);
        }
    }
    Ok(out)
}

impl ReputationStore for SledReputationStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn insert_evaluation(&self, new: NewEvaluation) -> StoreResult<Evaluation> {
        let result = (|| -> StoreResult<Evaluation> {
            let _guard = self.lock()?;
            if self
                .find_evaluation(&new.reputation_name, &new.source, &new.target)?
                .is_some()
            {
                return Err(ConstraintViolation::DuplicateEvaluation {
                    reputation: new.reputation_name,
                    evaluator: new.source,
                    target: new.target,
                }
                .into());
            }
            let evaluation = new.into_record(self.next_id()?, Utc::now());
            put(&self.evaluations, evaluation.id, &evaluation)?;
            self.evaluation_keys.insert(
                evaluation_key(&evaluation.reputation_name, &evaluation.source, &evaluation.target)?,
                key(evaluation.id).to_vec(),
            )?;
            Ok(evaluation)
        })();
        self.tracked("insert_evaluation", result)
    }

    fn get_evaluation(&self, id: u64) -> StoreResult<Option<Evaluation>> {
        let result = load(&self.evaluations, id);
        self.tracked("get_evaluation", result)
    }

    fn find_evaluation(
        &self,
        reputation_name: &str,
        source: &EntityRef,
        target: &EntityRef,
    ) -> StoreResult<Option<Evaluation>> {
        let index_key = evaluation_key(reputation_name, source, target)?;
        indexed(&self.evaluation_keys, &self.evaluations, &index_key)
    }

    fn update_evaluation(&self, evaluation: &Evaluation) -> StoreResult<()> {
        let result = (|| -> StoreResult<()> {
            let _guard = self.lock()?;
            let mut stored: Evaluation =
                load(&self.evaluations, evaluation.id)?.ok_or(StoreError::NotFound {
                    table: EVALUATIONS_TREE,
                    id: evaluation.id,
                })?;
            stored.value = evaluation.value;
            stored.data = evaluation.data.clone();
            stored.updated_at = Utc::now();
            put(&self.evaluations, stored.id, &stored)
        })();
        self.tracked("update_evaluation", result)
    }

    fn delete_evaluation(&self, id: u64) -> StoreResult<bool> {
        let result = (|| -> StoreResult<bool> {
            let _guard = self.lock()?;
            let Some(evaluation) = load::<Evaluation>(&self.evaluations, id)? else {
                return Ok(false);
            };
            self.evaluation_keys.remove(evaluation_key(
                &evaluation.reputation_name,
                &evaluation.source,
                &evaluation.target,
            )?)?;
            self.evaluations.remove(key(id))?;
            Ok(true)
        })();
        self.tracked("delete_evaluation", result)
    }

    fn evaluations_for_target(
        &self,
        reputation_name: &str,
        target: &EntityRef,
    ) -> StoreResult<Vec<Evaluation>> {
        scan(&self.evaluations, |e: &Evaluation| {
            e.reputation_name == reputation_name && &e.target == target
        })
    }

    fn evaluations_by_source(
        &self,
        reputation_name: &str,
        source: &EntityRef,
        target_type: &str,
    ) -> StoreResult<Vec<Evaluation>> {
        scan(&self.evaluations, |e: &Evaluation| {
            e.reputation_name == reputation_name
                && &e.source == source
                && e.target.is_type(target_type)
        })
    }

    fn evaluations_targeting(&self, target: &EntityRef) -> StoreResult<Vec<Evaluation>> {
        scan(&self.evaluations, |e: &Evaluation| &e.target == target)
    }

    fn insert_reputation(&self, new: NewReputation) -> StoreResult<Reputation> {
        let result = (|| -> StoreResult<Reputation> {
            let _guard = self.lock()?;
            if self
                .find_reputation(&new.reputation_name, &new.target)?
                .is_some()
            {
                return Err(ConstraintViolation::DuplicateReputation {
                    reputation: new.reputation_name,
                    target: new.target,
                }
                .into());
            }
            let reputation = new.into_record(self.next_id()?, Utc::now());
            put(&self.reputations, reputation.id, &reputation)?;
            self.reputation_keys.insert(
                reputation_key(&reputation.reputation_name, &reputation.target)?,
                key(reputation.id).to_vec(),
            )?;
            Ok(reputation)
        })();
        self.tracked("insert_reputation", result)
    }

    fn get_reputation(&self, id: u64) -> StoreResult<Option<Reputation>> {
        let result = load(&self.reputations, id);
        self.tracked("get_reputation", result)
    }

    fn find_reputation(
        &self,
        reputation_name: &str,
        target: &EntityRef,
    ) -> StoreResult<Option<Reputation>> {
        let index_key = reputation_key(reputation_name, target)?;
        indexed(&self.reputation_keys, &self.reputations, &index_key)
    }

    fn save_reputation(&self, reputation: &Reputation) -> StoreResult<()> {
        let result = (|| -> StoreResult<()> {
            let _guard = self.lock()?;
            let mut stored: Reputation =
                load(&self.reputations, reputation.id)?.ok_or(StoreError::NotFound {
                    table: REPUTATIONS_TREE,
                    id: reputation.id,
                })?;
            stored.value = reputation.value;
            stored.active = reputation.active;
            stored.data = reputation.data.clone();
            stored.updated_at = Utc::now();
            put(&self.reputations, stored.id, &stored)
        })();
        self.tracked("save_reputation", result)
    }

    fn delete_reputation(&self, id: u64) -> StoreResult<bool> {
        let result = (|| -> StoreResult<bool> {
            let _guard = self.lock()?;
            let Some(reputation) = load::<Reputation>(&self.reputations, id)? else {
                return Ok(false);
            };
            self.reputation_keys
                .remove(reputation_key(&reputation.reputation_name, &reputation.target)?)?;
            self.reputations.remove(key(id))?;
            Ok(true)
        })();
        self.tracked("delete_reputation", result)
    }

    fn reputations_for_target(&self, target: &EntityRef) -> StoreResult<Vec<Reputation>> {
        scan(&self.reputations, |r: &Reputation| &r.target == target)
    }

    fn active_values(&self, reputation_name: &str, target_type: &str) -> StoreResult<Vec<f64>> {
        let reps = scan(&self.reputations, |r: &Reputation| {
            r.active && r.reputation_name == reputation_name && r.target.is_type(target_type)
        })?;
        Ok(reps.into_iter().map(|r| r.value).collect())
    }

    fn insert_message(&self, sender: SenderRef, receiver_id: u64) -> StoreResult<Message> {
        let result = (|| -> StoreResult<Message> {
            let _guard = self.lock()?;
            let sender_exists = match sender {
                SenderRef::Evaluation(id) => self.evaluations.contains_key(key(id))?,
                SenderRef::Reputation(id) => self.reputations.contains_key(key(id))?,
            };
            if !sender_exists {
                return Err(ConstraintViolation::MissingSender {
                    sender: sender.to_string(),
                }
                .into());
            }
            if !self.reputations.contains_key(key(receiver_id))? {
                return Err(ConstraintViolation::MissingReceiver { receiver_id }.into());
            }
            if self.find_message(sender, receiver_id)?.is_some() {
                return Err(ConstraintViolation::DuplicateMessage {
                    sender: sender.to_string(),
                    receiver_id,
                }
                .into());
            }
            let message = Message {
                id: self.next_id()?,
                sender,
                receiver_id,
                created_at: Utc::now(),
            };
            put(&self.messages, message.id, &message)?;
            self.message_keys
                .insert(message_key(sender, receiver_id), key(message.id).to_vec())?;
            self.inbox.insert(inbox_key(receiver_id, message.id), Vec::new())?;
            Ok(message)
        })();
        self.tracked("insert_message", result)
    }

    fn find_message(&self, sender: SenderRef, receiver_id: u64) -> StoreResult<Option<Message>> {
        indexed(&self.message_keys, &self.messages, &message_key(sender, receiver_id))
    }

    fn delete_message(&self, id: u64) -> StoreResult<bool> {
        let result = (|| -> StoreResult<bool> {
            let _guard = self.lock()?;
            let Some(message) = load::<Message>(&self.messages, id)? else {
                return Ok(false);
            };
            self.message_keys
                .remove(message_key(message.sender, message.receiver_id))?;
            self.inbox.remove(inbox_key(message.receiver_id, id))?;
            self.messages.remove(key(id))?;
            Ok(true)
        })();
        self.tracked("delete_message", result)
    }

    fn messages_from(&self, sender: SenderRef) -> StoreResult<Vec<Message>> {
        let mut out = Vec::new();
        for entry in self.message_keys.scan_prefix(sender_prefix(sender)) {
            let (_, id) = entry?;
            if let Some(message) = load(&self.messages, id_of(&id)?)? {
                out.push(message);
            }
        }
        out.sort_by_key(|m: &Message| m.id);
        Ok(out)
    }

    fn messages_to(&self, receiver_id: u64) -> StoreResult<Vec<Message>> {
        let mut out = Vec::new();
        for entry in self.inbox.scan_prefix(key(receiver_id)) {
            let (inbox_entry, _) = entry?;
            if let Some(message) = load(&self.messages, id_of(&inbox_entry[8..])?)? {
                out.push(message);
            }
        }
        Ok(out)
    }

    fn received_count(&self, receiver_id: u64) -> StoreResult<usize> {
        let mut count = 0;
        for entry in self.inbox.scan_prefix(key(receiver_id)) {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}

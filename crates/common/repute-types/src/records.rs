use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::aggregation::Aggregation;
use crate::entity::EntityRef;
use crate::error::ConstraintViolation;

/// Free-form auxiliary data attached to evaluations and reputations.
pub type AuxData = BTreeMap<String, String>;

/// A raw fact: `source` rated `target` on `reputation_name` with `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: u64,
    /// Scoped reputation name (`votes`, `maturity_ja`, ...).
    pub reputation_name: String,
    /// Recorded under the declared source type after inheritance resolution.
    pub source: EntityRef,
    pub target: EntityRef,
    pub value: f64,
    pub data: AuxData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for an evaluation; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluation {
    pub reputation_name: String,
    pub source: EntityRef,
    pub target: EntityRef,
    pub value: f64,
    pub data: AuxData,
}

impl NewEvaluation {
    pub fn new(
        reputation_name: impl Into<String>,
        source: EntityRef,
        target: EntityRef,
        value: f64,
    ) -> Self {
        Self {
            reputation_name: reputation_name.into(),
            source,
            target,
            value,
            data: AuxData::new(),
        }
    }

    pub fn into_record(self, id: u64, now: DateTime<Utc>) -> Evaluation {
        Evaluation {
            id,
            reputation_name: self.reputation_name,
            source: self.source,
            target: self.target,
            value: self.value,
            data: self.data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A derived aggregate node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    pub id: u64,
    pub reputation_name: String,
    /// Recorded under the type the reputation was declared on.
    pub target: EntityRef,
    pub value: f64,
    pub aggregated_by: Aggregation,
    /// Inactive nodes are left out of normalization and ranking.
    pub active: bool,
    pub data: AuxData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reputation {
    /// A product node that reached zero is put back on the multiplicative
    /// identity. Applied on engine-driven saves only.
    pub fn coerce_product_identity(&mut self) {
        if self.value == 0.0 && self.aggregated_by.is_product() {
            self.value = 1.0;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReputation {
    pub reputation_name: String,
    pub target: EntityRef,
    pub value: f64,
    pub aggregated_by: Aggregation,
    pub active: bool,
    pub data: AuxData,
}

impl NewReputation {
    /// A fresh node seeded with `init_value`, or the aggregation identity.
    pub fn new(
        reputation_name: impl Into<String>,
        target: EntityRef,
        aggregated_by: Aggregation,
        init_value: Option<f64>,
    ) -> Self {
        let value = init_value.unwrap_or_else(|| aggregated_by.identity());
        Self {
            reputation_name: reputation_name.into(),
            target,
            value,
            aggregated_by,
            active: true,
            data: AuxData::new(),
        }
    }

    pub fn into_record(self, id: u64, now: DateTime<Utc>) -> Reputation {
        let mut rep = Reputation {
            id,
            reputation_name: self.reputation_name,
            target: self.target,
            value: self.value,
            aggregated_by: self.aggregated_by,
            active: self.active,
            data: self.data,
            created_at: now,
            updated_at: now,
        };
        rep.coerce_product_identity();
        rep
    }
}

/// Sender side of a message edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SenderRef {
    Evaluation(u64),
    Reputation(u64),
}

impl SenderRef {
    pub const EVALUATION: &'static str = "evaluation";
    pub const REPUTATION: &'static str = "reputation";

    /// Rebuilds a sender from its persisted `(type, id)` pair.
    pub fn from_parts(kind: &str, id: u64) -> Result<Self, ConstraintViolation> {
        match kind {
            Self::EVALUATION => Ok(SenderRef::Evaluation(id)),
            Self::REPUTATION => Ok(SenderRef::Reputation(id)),
            other => Err(ConstraintViolation::InvalidSenderType {
                kind: other.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SenderRef::Evaluation(_) => Self::EVALUATION,
            SenderRef::Reputation(_) => Self::REPUTATION,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            SenderRef::Evaluation(id) | SenderRef::Reputation(id) => *id,
        }
    }
}

impl fmt::Display for SenderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind(), self.id())
    }
}

/// A delivered propagation edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub sender: SenderRef,
    pub receiver_id: u64,
    pub created_at: DateTime<Utc>,
}

/// The value holder handed to aggregation: an evaluation or a reputation
/// reduced to what the formulas read.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceValue {
    pub sender: SenderRef,
    pub reputation_name: String,
    pub target: EntityRef,
    pub value: f64,
}

impl SourceValue {
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }
}

impl From<&Evaluation> for SourceValue {
    fn from(evaluation: &Evaluation) -> Self {
        Self {
            sender: SenderRef::Evaluation(evaluation.id),
            reputation_name: evaluation.reputation_name.clone(),
            target: evaluation.target.clone(),
            value: evaluation.value,
        }
    }
}

impl From<&Reputation> for SourceValue {
    fn from(reputation: &Reputation) -> Self {
        Self {
            sender: SenderRef::Reputation(reputation.id),
            reputation_name: reputation.reputation_name.clone(),
            target: reputation.target.clone(),
            value: reputation.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> EntityRef {
        EntityRef::new("User", id)
    }

    #[test]
    fn new_reputation_defaults_to_aggregation_identity() {
        let sum = NewReputation::new("karma", user(1), Aggregation::Sum, None);
        let product = NewReputation::new("karma", user(1), Aggregation::Product, None);
        let seeded = NewReputation::new("karma", user(1), Aggregation::Average, Some(2.0));
        assert_eq!(sum.value, 0.0);
        assert_eq!(product.value, 1.0);
        assert_eq!(seeded.value, 2.0);
        assert!(sum.active);
    }

    #[test]
    fn product_record_is_never_created_at_zero() {
        let new = NewReputation::new("karma", user(1), Aggregation::Product, Some(0.0));
        let rep = new.into_record(1, Utc::now());
        assert_eq!(rep.value, 1.0);
    }

    #[test]
    fn coercion_leaves_sum_at_zero() {
        let mut rep = NewReputation::new("karma", user(1), Aggregation::Sum, Some(10.0))
            .into_record(1, Utc::now());
        rep.value = 0.0;
        rep.coerce_product_identity();
        assert_eq!(rep.value, 0.0);
    }

    #[test]
    fn sender_parts_accept_only_evaluations_and_reputations() {
        assert_eq!(SenderRef::from_parts("evaluation", 4), Ok(SenderRef::Evaluation(4)));
        assert_eq!(SenderRef::from_parts("reputation", 9), Ok(SenderRef::Reputation(9)));
        assert!(matches!(
            SenderRef::from_parts("user", 1),
            Err(ConstraintViolation::InvalidSenderType { .. })
        ));
    }

    #[test]
    fn records_survive_bincode() {
        let mut rep = NewReputation::new("karma", user(1), Aggregation::Custom("weighted".into()), None)
            .into_record(3, Utc::now());
        rep.data.insert("note".into(), "seeded".into());
        let bytes = bincode::serialize(&rep).unwrap();
        let back: Reputation = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, rep);
    }
}

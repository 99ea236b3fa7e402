#![forbid(unsafe_code)]
//! Incremental reputation propagation.
//!
//! Reputations are aggregates kept per `(name, target entity)`. Primary
//! reputations are fed by evaluations, derived ones by other reputations
//! along the edges of a [`Network`] of definitions. Every write folds its
//! contribution into the receiving node and pushes the change downstream
//! without recomputing the graph.

pub mod aggregator;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
mod evaluation;
pub mod facade;
pub mod message;
pub mod metrics;
pub mod model;
pub mod network;
mod propagation;
mod reputation;

pub use aggregator::{AggregationInput, Aggregator};
pub use config::{EngineConfig, StoreBackend, StoreConfig};
pub use definition::{Attribute, ReputationDefinition, ScopeRef, Source, SourceOfSpec, SourceSpec};
pub use engine::{ReputationEngine, ReputationEngineBuilder};
pub use error::{ErrorKind, ReputationError, Result};
pub use facade::Entity;
pub use message::MessageLedger;
pub use model::{DetachedModel, EntityModel};
pub use network::{scoped_reputation_name, Network};

pub use repute_store::{InMemoryReputationStore, ReputationStore, SledReputationStore, StoreError};
pub use repute_types::{Aggregation, AuxData, EntityRef, Evaluation, Message, Reputation, SenderRef};

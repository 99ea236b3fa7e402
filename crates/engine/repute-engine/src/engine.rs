use std::sync::Arc;

use repute_store::ReputationStore;
use repute_types::EntityRef;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{ReputationError, Result};
use crate::evaluation::{effective_source, recorded_target};
use crate::facade::Entity;
use crate::message::MessageLedger;
use crate::model::{DetachedModel, EntityModel};
use crate::network::Network;
use crate::propagation::Propagation;

/// The reputation engine: a definition network, a store and the host model
/// the network's relations are resolved against.
#[derive(Clone)]
pub struct ReputationEngine {
    network: Arc<Network>,
    store: Arc<dyn ReputationStore>,
    model: Arc<dyn EntityModel>,
    config: EngineConfig,
}

impl ReputationEngine {
    pub fn builder() -> ReputationEngineBuilder {
        ReputationEngineBuilder::new()
    }

    /// Operations on one host entity.
    pub fn entity(&self, target: &EntityRef) -> Entity<'_> {
        Entity::new(self, target.clone())
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn store(&self) -> &dyn ReputationStore {
        self.store.as_ref()
    }

    pub fn model(&self) -> &dyn EntityModel {
        self.model.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn messages(&self) -> MessageLedger<'_> {
        MessageLedger::new(self.store.as_ref())
    }

    pub(crate) fn propagation(&self) -> Propagation<'_> {
        Propagation::new(
            &self.network,
            self.store.as_ref(),
            self.model.as_ref(),
            self.config.max_propagation_depth,
        )
    }

    /// Adds a scope to a scope-parameterized reputation. Callers must not
    /// run this concurrently with writes through clones of this engine.
    pub fn add_scope(&mut self, entity_type: &str, name: &str, scope: &str) -> Result<()> {
        Arc::make_mut(&mut self.network).add_scope(entity_type, name, scope)
    }

    /// Targets of `target_type` that `source` has evaluated on `name`.
    pub fn evaluated_by(
        &self,
        target_type: &str,
        name: &str,
        source: &EntityRef,
        scope: Option<&str>,
    ) -> Result<Vec<EntityRef>> {
        let scoped_name = self.network.scoped_name(target_type, name, scope)?;
        let source = effective_source(&self.network, target_type, &scoped_name, source)?;
        let recorded_type = recorded_target(&self.network, &EntityRef::new(target_type, 0), &scoped_name)?
            .entity_type;
        Ok(self
            .store
            .evaluations_by_source(&scoped_name, &source, &recorded_type)?
            .into_iter()
            .map(|e| e.target)
            .collect())
    }

    /// Removes everything the engine holds about a deleted host entity: its
    /// reputations with their message cascade, and the evaluations of it.
    /// Downstream reputations are not recomputed.
    pub fn destroy_entity(&self, entity: &EntityRef) -> Result<()> {
        let ledger = self.messages();
        for entity_type in self.network.ancestry(&entity.entity_type) {
            let recorded = entity.with_type(entity_type);
            for reputation in self.store.reputations_for_target(&recorded)? {
                ledger.destroy_reputation(&reputation)?;
            }
            for evaluation in self.store.evaluations_targeting(&recorded)? {
                ledger.destroy_evaluation(&evaluation)?;
            }
        }
        info!(entity = %entity, "Destroyed reputation data of entity");
        Ok(())
    }
}

impl std::fmt::Debug for ReputationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationEngine")
            .field("network", &self.network)
            .field("store", &self.store.backend())
            .field("config", &self.config)
            .finish()
    }
}

/// Builder pattern for ReputationEngine
#[derive(Default)]
pub struct ReputationEngineBuilder {
    network: Option<Network>,
    store: Option<Arc<dyn ReputationStore>>,
    model: Option<Arc<dyn EntityModel>>,
    config: Option<EngineConfig>,
}

impl ReputationEngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the definition network
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the store; otherwise the configured backend is opened
    pub fn with_store(mut self, store: Arc<dyn ReputationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the host entity model
    pub fn with_model(mut self, model: Arc<dyn EntityModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ReputationEngine> {
        let config = self.config.unwrap_or_default();
        if config.max_propagation_depth == 0 {
            return Err(ReputationError::Config(
                "max_propagation_depth must be at least 1".to_string(),
            ));
        }
        let store = match self.store {
            Some(store) => store,
            None => config
                .open_store()
                .map_err(|e| ReputationError::Config(format!("{:#}", e)))?,
        };
        let network = self.network.unwrap_or_default();
        info!(
            backend = store.backend(),
            max_propagation_depth = config.max_propagation_depth,
            "Built reputation engine"
        );
        Ok(ReputationEngine {
            network: Arc::new(network),
            store,
            model: self.model.unwrap_or_else(|| Arc::new(DetachedModel)),
            config,
        })
    }
}

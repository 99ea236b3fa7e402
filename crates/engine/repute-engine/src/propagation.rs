//! The incremental update protocol.
//!
//! One [`Propagation`] is created per facade write. It folds a contribution
//! into the receiving reputation, persists it, and walks the `source_of`
//! edges of every reputation it changes, creating downstream nodes lazily and
//! recording each delivered edge exactly once in the message ledger.
//!
//! Every changed reputation carries its value from before the change into the
//! next hop. A receiver that already holds a message from the sender applies
//! the delta; a receiver that does not folds the sender in as a new source.

use repute_store::ReputationStore;
use repute_types::{Aggregation, EntityRef, NewReputation, Reputation, SenderRef, SourceValue};
use tracing::{debug, warn};

use crate::aggregator::{fold_changed, fold_new, Folded};
use crate::definition::{ReputationDefinition, SourceOfSpec};
use crate::error::{ReputationError, Result};
use crate::message::MessageLedger;
use crate::metrics;
use crate::model::{evaluate_scope, resolve_attribute, EntityModel};
use crate::network::Network;

pub(crate) struct Propagation<'e> {
    network: &'e Network,
    store: &'e dyn ReputationStore,
    model: &'e dyn EntityModel,
    max_depth: usize,
    /// Reputations currently propagating, outermost first.
    path: Vec<u64>,
    deepest: usize,
}

impl<'e> Propagation<'e> {
    pub(crate) fn new(
        network: &'e Network,
        store: &'e dyn ReputationStore,
        model: &'e dyn EntityModel,
        max_depth: usize,
    ) -> Self {
        Self {
            network,
            store,
            model,
            max_depth,
            path: Vec::new(),
            deepest: 0,
        }
    }

    fn ledger(&self) -> MessageLedger<'e> {
        MessageLedger::new(self.store)
    }

    fn definition(&self, entity_type: &str, name: &str) -> Result<&'e ReputationDefinition> {
        self.network.lookup(entity_type, name).ok_or_else(|| {
            ReputationError::invalid(format!("{} is not defined for {}", name, entity_type))
        })
    }

    fn aggregation_of(&self, reputation: &Reputation) -> Aggregation {
        self.network
            .lookup(&reputation.target.entity_type, &reputation.reputation_name)
            .map(|d| d.aggregated_by.clone())
            .unwrap_or_else(|| reputation.aggregated_by.clone())
    }

    /// Reports the depth reached by this unit of work.
    pub(crate) fn finish(self) {
        if self.deepest > 0 {
            metrics::observe_propagation_depth(self.deepest);
        }
    }

    // --- Reputation nodes ---

    /// The reputation `name` of `target`, created and bootstrapped from its
    /// existing sources when absent.
    pub(crate) fn find_or_create(&mut self, name: &str, target: &EntityRef) -> Result<Reputation> {
        let declaring = self
            .network
            .declaring_type(&target.entity_type, name)
            .ok_or_else(|| {
                ReputationError::invalid(format!("{} is not defined for {}", name, target.entity_type))
            })?;
        let recorded = target.with_type(declaring);
        match self.store.find_reputation(name, &recorded)? {
            Some(reputation) => Ok(reputation),
            None => self.create(name, target, recorded),
        }
    }

    fn create(&mut self, name: &str, target: &EntityRef, recorded: EntityRef) -> Result<Reputation> {
        let definition = self.definition(&target.entity_type, name)?;
        let reputation = self.store.insert_reputation(NewReputation::new(
            name,
            recorded,
            definition.aggregated_by.clone(),
            definition.init_value,
        ))?;
        metrics::record_reputation_created();
        debug!(reputation = name, target = %reputation.target, value = reputation.value, "Created reputation");

        if definition.is_primary() {
            return Ok(reputation);
        }
        let (reputation, folded) = self.initialize(reputation, target, definition)?;
        if folded > 0 {
            // Nothing downstream has heard of this node yet.
            self.propagate(&reputation, None)?;
        }
        Ok(reputation)
    }

    /// Folds every already-existing upstream reputation into a freshly created
    /// derived node. Returns the node and the number of sources folded in.
    fn initialize(
        &mut self,
        mut reputation: Reputation,
        target: &EntityRef,
        definition: &'e ReputationDefinition,
    ) -> Result<(Reputation, usize)> {
        let mut folded = 0;
        for spec in definition.source_specs() {
            let Some(upstream_type) = spec.upstream_type(&target.entity_type) else {
                continue;
            };
            let scope = evaluate_scope(self.model, target, spec.scope.as_ref());
            let upstream_name = self
                .network
                .scoped_name(upstream_type, &spec.reputation, scope.as_deref())?;
            for entity in resolve_attribute(self.model, target, &spec.of, spec.bound_scope.as_deref()) {
                let Some(declaring) = self.network.declaring_type(&entity.entity_type, &upstream_name) else {
                    continue;
                };
                let upstream = self
                    .store
                    .find_reputation(&upstream_name, &entity.with_type(declaring))?;
                if let Some(upstream) = upstream {
                    reputation = self.fold_in_new(reputation, &SourceValue::from(&upstream), spec.weight)?;
                    folded += 1;
                }
            }
        }
        Ok((reputation, folded))
    }

    fn save(&self, reputation: &mut Reputation) -> Result<()> {
        reputation.coerce_product_identity();
        self.store.save_reputation(reputation)?;
        Ok(())
    }

    // --- Local updates ---

    fn fold_in_new(&self, mut reputation: Reputation, source: &SourceValue, weight: f64) -> Result<Reputation> {
        let aggregation = self.aggregation_of(&reputation);
        let received = self.ledger().received_count(reputation.id)?;
        reputation.value = fold_new(
            &aggregation,
            &reputation,
            source,
            weight,
            received,
            self.network.aggregator_for(&aggregation),
        )?;
        self.save(&mut reputation)?;
        self.ledger().add_if_not_exists(source.sender, reputation.id)?;
        Ok(reputation)
    }

    /// Folds a brand-new contribution into `reputation` and propagates.
    pub(crate) fn update_with_new_source(
        &mut self,
        reputation: Reputation,
        source: &SourceValue,
        weight: f64,
    ) -> Result<Reputation> {
        let previous = reputation.value;
        let reputation = self.fold_in_new(reputation, source, weight)?;
        self.propagate(&reputation, Some(previous))?;
        Ok(reputation)
    }

    /// Applies a changed (or removed) contribution and propagates.
    /// `new_count` is the number of contributions left after the change.
    pub(crate) fn update_with_changed_source(
        &mut self,
        mut reputation: Reputation,
        source: &SourceValue,
        old_value: f64,
        new_count: usize,
        weight: f64,
    ) -> Result<Reputation> {
        let previous = reputation.value;
        let aggregation = self.aggregation_of(&reputation);
        let old_count = self.ledger().received_count(reputation.id)?;
        let folded = fold_changed(
            &aggregation,
            &reputation,
            source,
            weight,
            old_value,
            old_count,
            new_count,
            self.network.aggregator_for(&aggregation),
        )?;
        reputation.value = match folded {
            Folded::Value(value) => value,
            Folded::Recompute => self.recompute_product(&reputation, source, weight)?,
        };
        self.save(&mut reputation)?;
        self.propagate(&reputation, Some(previous))?;
        Ok(reputation)
    }

    /// Rebuilds a product from the contributions currently delivered to it,
    /// reading `changed` in place of its sender's stored value.
    fn recompute_product(&self, reputation: &Reputation, changed: &SourceValue, weight: f64) -> Result<f64> {
        let mut value = self
            .network
            .lookup(&reputation.target.entity_type, &reputation.reputation_name)
            .and_then(|d| d.init_value)
            .unwrap_or(1.0);
        for message in self.ledger().received_by(reputation.id)? {
            let factor = match message.sender {
                sender if sender == changed.sender => changed.value * weight,
                SenderRef::Evaluation(id) => match self.store.get_evaluation(id)? {
                    Some(evaluation) => evaluation.value,
                    None => continue,
                },
                SenderRef::Reputation(id) => match self.store.get_reputation(id)? {
                    Some(upstream) => {
                        let weight = self
                            .network
                            .weight_of_source(
                                self.model,
                                &reputation.target,
                                &upstream.reputation_name,
                                &reputation.reputation_name,
                            )?
                            .unwrap_or(1.0);
                        upstream.value * weight
                    }
                    None => continue,
                },
            };
            value *= factor;
        }
        debug!(reputation = %reputation.reputation_name, target = %reputation.target, value, "Recomputed product");
        Ok(value)
    }

    // --- Propagation ---

    /// Pushes the change of `sender` along its `source_of` edges. `previous`
    /// is the value downstream receivers last saw, None for a fresh node.
    fn propagate(&mut self, sender: &Reputation, previous: Option<f64>) -> Result<()> {
        let Some(definition) = self
            .network
            .lookup(&sender.target.entity_type, &sender.reputation_name)
        else {
            return Ok(());
        };
        if definition.source_of.is_empty() {
            return Ok(());
        }
        if self.path.contains(&sender.id) {
            return Err(ReputationError::PropagationCycle {
                reputation: sender.reputation_name.clone(),
                target: sender.target.clone(),
            });
        }
        if self.path.len() >= self.max_depth {
            return Err(ReputationError::PropagationDepthExceeded {
                limit: self.max_depth,
            });
        }

        self.path.push(sender.id);
        self.deepest = self.deepest.max(self.path.len());
        let result = self.propagate_edges(sender, previous, &definition.source_of);
        self.path.pop();
        result
    }

    fn propagate_edges(
        &mut self,
        sender: &Reputation,
        previous: Option<f64>,
        edges: &'e [SourceOfSpec],
    ) -> Result<()> {
        for edge in edges {
            let scope = evaluate_scope(self.model, &sender.target, edge.scope.as_ref());
            for receiver_target in resolve_attribute(self.model, &sender.target, &edge.of, None) {
                let receiver_name = self.network.scoped_name(
                    &receiver_target.entity_type,
                    &edge.reputation,
                    scope.as_deref(),
                )?;
                self.send_to_receiver(sender, previous, edge, &receiver_target, &receiver_name)?;
            }
        }
        Ok(())
    }

    fn send_to_receiver(
        &mut self,
        sender: &Reputation,
        previous: Option<f64>,
        edge: &SourceOfSpec,
        receiver_target: &EntityRef,
        receiver_name: &str,
    ) -> Result<()> {
        let declaring = self
            .network
            .declaring_type(&receiver_target.entity_type, receiver_name)
            .ok_or_else(|| {
                ReputationError::invalid(format!(
                    "{} is not defined for {}",
                    receiver_name, receiver_target.entity_type
                ))
            })?;
        let recorded = receiver_target.with_type(declaring);
        let Some(receiver) = self.store.find_reputation(receiver_name, &recorded)? else {
            // Creation bootstraps from the sender's current value.
            self.create(receiver_name, receiver_target, recorded)?;
            return Ok(());
        };

        let weight = match edge.weight {
            Some(weight) => weight,
            None => match self.network.weight_of_source(
                self.model,
                receiver_target,
                &sender.reputation_name,
                receiver_name,
            )? {
                Some(weight) => weight,
                None => {
                    warn!(
                        sender = %sender.reputation_name,
                        receiver = receiver_name,
                        target = %receiver_target,
                        "Receiver does not declare this source; edge skipped"
                    );
                    return Ok(());
                }
            },
        };

        metrics::record_propagation_hop();
        debug!(
            sender = %sender.reputation_name,
            from = %sender.target,
            receiver = receiver_name,
            to = %receiver.target,
            weight,
            "Propagating"
        );

        let source = SourceValue::from(sender);
        let delivered = self
            .ledger()
            .is_delivered(SenderRef::Reputation(sender.id), receiver.id)?;
        match (delivered, previous) {
            (false, _) => {
                self.update_with_new_source(receiver, &source, weight)?;
            }
            (true, Some(old_value)) => {
                let count = self.ledger().received_count(receiver.id)?;
                self.update_with_changed_source(receiver, &source, old_value, count, weight)?;
            }
            (true, None) => {
                debug!(receiver = receiver_name, "Receiver already holds the current value");
            }
        }
        Ok(())
    }
}

use repute_store::ReputationStore;
use repute_types::{EntityRef, Evaluation, NewEvaluation};

use crate::error::{ReputationError, Result};
use crate::metrics;
use crate::network::Network;

/// Type the evaluations and reputations of `scoped_name` on `target` are
/// recorded under: the ancestor that declares the reputation.
pub(crate) fn recorded_target(
    network: &Network,
    target: &EntityRef,
    scoped_name: &str,
) -> Result<EntityRef> {
    network
        .declaring_type(&target.entity_type, scoped_name)
        .map(|declaring| target.with_type(declaring))
        .ok_or_else(|| {
            ReputationError::invalid(format!(
                "{} is not defined for {}",
                scoped_name, target.entity_type
            ))
        })
}

/// Resolves `source` against the source type declared for `scoped_name` on
/// `target_type`. A subtype satisfies a supertype-typed source slot and is
/// recorded under the declared type.
pub(crate) fn effective_source(
    network: &Network,
    target_type: &str,
    scoped_name: &str,
    source: &EntityRef,
) -> Result<EntityRef> {
    let definition = network.lookup(target_type, scoped_name).ok_or_else(|| {
        ReputationError::invalid(format!("{} is not defined for {}", scoped_name, target_type))
    })?;
    let declared = definition.primary_source_type().ok_or_else(|| {
        ReputationError::invalid(format!(
            "{} of {} is derived from other reputations and cannot be evaluated directly",
            scoped_name, target_type
        ))
    })?;
    if network.ancestry(&source.entity_type).iter().any(|t| t == declared) {
        Ok(source.with_type(declared))
    } else {
        Err(ReputationError::invalid(format!(
            "{} is not a valid source of {}: expected {}",
            source, scoped_name, declared
        )))
    }
}

/// Evaluation lookups keyed the way evaluations are recorded.
pub(crate) struct Evaluations<'a> {
    network: &'a Network,
    store: &'a dyn ReputationStore,
}

impl<'a> Evaluations<'a> {
    pub(crate) fn new(network: &'a Network, store: &'a dyn ReputationStore) -> Self {
        Self { network, store }
    }

    pub(crate) fn find(
        &self,
        scoped_name: &str,
        source: &EntityRef,
        target: &EntityRef,
    ) -> Result<Option<Evaluation>> {
        let source = effective_source(self.network, &target.entity_type, scoped_name, source)?;
        let recorded = recorded_target(self.network, target, scoped_name)?;
        Ok(self.store.find_evaluation(scoped_name, &source, &recorded)?)
    }

    pub(crate) fn find_existing(
        &self,
        scoped_name: &str,
        source: &EntityRef,
        target: &EntityRef,
    ) -> Result<Evaluation> {
        self.find(scoped_name, source, target)?
            .ok_or_else(|| ReputationError::EvaluationNotFound {
                reputation: scoped_name.to_string(),
                evaluator: source.clone(),
                target: target.clone(),
            })
    }

    /// Fails with a constraint violation if `source` already evaluated `target`.
    pub(crate) fn create(
        &self,
        scoped_name: &str,
        value: f64,
        source: &EntityRef,
        target: &EntityRef,
    ) -> Result<Evaluation> {
        let source = effective_source(self.network, &target.entity_type, scoped_name, source)?;
        let recorded = recorded_target(self.network, target, scoped_name)?;
        let evaluation = self
            .store
            .insert_evaluation(NewEvaluation::new(scoped_name, source, recorded, value))?;
        metrics::record_evaluation_write("add");
        Ok(evaluation)
    }

    pub(crate) fn save(&self, evaluation: &Evaluation, operation: &str) -> Result<()> {
        self.store.update_evaluation(evaluation)?;
        metrics::record_evaluation_write(operation);
        Ok(())
    }
}

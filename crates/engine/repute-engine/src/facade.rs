//! Per-entity operations.
//!
//! ```ignore
//! let question = engine.entity(&EntityRef::new("Question", 1));
//! question.add_evaluation("total_votes", 1.0, &EntityRef::new("User", 7), None)?;
//! assert_eq!(question.reputation_for("total_votes", None)?, 1.0);
//! ```

use repute_types::{AuxData, EntityRef, Reputation, SourceValue};
use tracing::{debug, info};

use crate::engine::ReputationEngine;
use crate::error::Result;
use crate::evaluation::{recorded_target, Evaluations};
use crate::metrics;
use crate::reputation;

/// An entity as seen by the engine. Obtained from [`ReputationEngine::entity`].
#[derive(Debug, Clone)]
pub struct Entity<'e> {
    engine: &'e ReputationEngine,
    target: EntityRef,
}

impl<'e> Entity<'e> {
    pub(crate) fn new(engine: &'e ReputationEngine, target: EntityRef) -> Self {
        Self { engine, target }
    }

    pub fn target(&self) -> &EntityRef {
        &self.target
    }

    fn tracked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            metrics::record_error(e.metric_label());
            debug!(target_entity = %self.target, error = %e, "Reputation operation failed");
        }
        result
    }

    fn scoped_name(&self, name: &str, scope: Option<&str>) -> Result<String> {
        self.engine
            .network()
            .scoped_name(&self.target.entity_type, name, scope)
    }

    fn evaluations(&self) -> Evaluations<'e> {
        Evaluations::new(self.engine.network(), self.engine.store())
    }

    // --- Evaluation writes ---

    pub fn add_evaluation(&self, name: &str, value: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        self.tracked(self.add(name, value, source, scope))
    }

    fn add(&self, name: &str, value: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        let scoped_name = self.scoped_name(name, scope)?;
        let evaluation = self.evaluations().create(&scoped_name, value, source, &self.target)?;
        let mut propagation = self.engine.propagation();
        let reputation = propagation.find_or_create(&scoped_name, &self.target)?;
        propagation.update_with_new_source(reputation, &SourceValue::from(&evaluation), 1.0)?;
        propagation.finish();
        debug!(reputation = %scoped_name, target_entity = %self.target, source = %source, value, "Added evaluation");
        Ok(())
    }

    pub fn update_evaluation(&self, name: &str, value: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        self.tracked(self.update(name, value, source, scope))
    }

    fn update(&self, name: &str, value: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        let scoped_name = self.scoped_name(name, scope)?;
        let evaluations = self.evaluations();
        let mut evaluation = evaluations.find_existing(&scoped_name, source, &self.target)?;
        let old_value = evaluation.value;
        evaluation.value = value;
        evaluations.save(&evaluation, "update")?;

        let mut propagation = self.engine.propagation();
        let reputation = propagation.find_or_create(&scoped_name, &self.target)?;
        let count = self.engine.messages().received_count(reputation.id)?;
        propagation.update_with_changed_source(reputation, &SourceValue::from(&evaluation), old_value, count, 1.0)?;
        propagation.finish();
        debug!(reputation = %scoped_name, target_entity = %self.target, source = %source, old_value, value, "Updated evaluation");
        Ok(())
    }

    pub fn add_or_update_evaluation(&self, name: &str, value: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        if self.has_evaluation(name, source, scope)? {
            self.update_evaluation(name, value, source, scope)
        } else {
            self.add_evaluation(name, value, source, scope)
        }
    }

    /// Deletes the evaluation if `source` already evaluated this entity,
    /// adds it otherwise.
    pub fn add_or_delete_evaluation(&self, name: &str, value: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        if self.has_evaluation(name, source, scope)? {
            self.delete_evaluation_strict(name, source, scope)
        } else {
            self.add_evaluation(name, value, source, scope)
        }
    }

    /// Returns false when there is nothing to delete.
    pub fn delete_evaluation(&self, name: &str, source: &EntityRef, scope: Option<&str>) -> Result<bool> {
        if !self.has_evaluation(name, source, scope)? {
            return Ok(false);
        }
        self.delete_evaluation_strict(name, source, scope)?;
        Ok(true)
    }

    /// Fails with `EvaluationNotFound` when there is nothing to delete.
    pub fn delete_evaluation_strict(&self, name: &str, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        self.tracked(self.delete(name, source, scope))
    }

    fn delete(&self, name: &str, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        let scoped_name = self.scoped_name(name, scope)?;
        let evaluation = self.evaluations().find_existing(&scoped_name, source, &self.target)?;
        let identity = self
            .engine
            .network()
            .aggregation(&self.target.entity_type, &scoped_name)?
            .identity();

        let mut propagation = self.engine.propagation();
        let reputation = propagation.find_or_create(&scoped_name, &self.target)?;
        let count = self.engine.messages().received_count(reputation.id)?;
        let withdrawn = SourceValue::from(&evaluation).with_value(identity);
        propagation.update_with_changed_source(
            reputation,
            &withdrawn,
            evaluation.value,
            count.saturating_sub(1),
            1.0,
        )?;
        propagation.finish();
        self.engine.messages().destroy_evaluation(&evaluation)?;
        metrics::record_evaluation_write("delete");
        debug!(reputation = %scoped_name, target_entity = %self.target, source = %source, "Deleted evaluation");
        Ok(())
    }

    /// Adds `delta` to the current evaluation by `source`, 0 if absent.
    pub fn increase_evaluation(&self, name: &str, delta: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        let current = self.evaluation_by(name, source, scope)?.unwrap_or(0.0);
        self.add_or_update_evaluation(name, current + delta, source, scope)
    }

    pub fn decrease_evaluation(&self, name: &str, delta: f64, source: &EntityRef, scope: Option<&str>) -> Result<()> {
        self.increase_evaluation(name, -delta, source, scope)
    }

    // --- Evaluation reads ---

    pub fn has_evaluation(&self, name: &str, source: &EntityRef, scope: Option<&str>) -> Result<bool> {
        Ok(self.evaluation_by(name, source, scope)?.is_some())
    }

    pub fn evaluation_by(&self, name: &str, source: &EntityRef, scope: Option<&str>) -> Result<Option<f64>> {
        self.tracked((|| -> Result<Option<f64>> {
            let scoped_name = self.scoped_name(name, scope)?;
            let found = self.evaluations().find(&scoped_name, source, &self.target)?;
            Ok(found.map(|e| e.value))
        })())
    }

    /// Sources that evaluated this entity on `name`, oldest first.
    pub fn evaluators_for(&self, name: &str, scope: Option<&str>) -> Result<Vec<EntityRef>> {
        self.tracked((|| -> Result<Vec<EntityRef>> {
            let scoped_name = self.scoped_name(name, scope)?;
            let recorded = recorded_target(self.engine.network(), &self.target, &scoped_name)?;
            Ok(self
                .engine
                .store()
                .evaluations_for_target(&scoped_name, &recorded)?
                .into_iter()
                .map(|e| e.source)
                .collect())
        })())
    }

    pub fn set_evaluation_data(&self, name: &str, source: &EntityRef, scope: Option<&str>, data: AuxData) -> Result<()> {
        self.tracked((|| -> Result<()> {
            let scoped_name = self.scoped_name(name, scope)?;
            let evaluations = self.evaluations();
            let mut evaluation = evaluations.find_existing(&scoped_name, source, &self.target)?;
            evaluation.data = data;
            evaluations.save(&evaluation, "data")
        })())
    }

    // --- Reputation reads ---

    /// The stored reputation node, created on first access.
    pub fn reputation_record(&self, name: &str, scope: Option<&str>) -> Result<Reputation> {
        self.tracked((|| -> Result<Reputation> {
            let scoped_name = self.scoped_name(name, scope)?;
            let mut propagation = self.engine.propagation();
            let reputation = propagation.find_or_create(&scoped_name, &self.target)?;
            propagation.finish();
            Ok(reputation)
        })())
    }

    pub fn reputation_for(&self, name: &str, scope: Option<&str>) -> Result<f64> {
        Ok(self.reputation_record(name, scope)?.value)
    }

    pub fn normalized_reputation_for(&self, name: &str, scope: Option<&str>) -> Result<f64> {
        let reputation = self.reputation_record(name, scope)?;
        self.tracked(reputation::normalized_value(self.engine.store(), &reputation))
    }

    /// 1 for the highest value among active same-type reputations.
    pub fn rank_for(&self, name: &str, scope: Option<&str>) -> Result<usize> {
        let reputation = self.reputation_record(name, scope)?;
        self.tracked(reputation::rank(self.engine.store(), &reputation))
    }

    pub fn set_reputation_data(&self, name: &str, scope: Option<&str>, data: AuxData) -> Result<()> {
        let mut reputation = self.reputation_record(name, scope)?;
        reputation.data = data;
        self.tracked(self.engine.store().save_reputation(&reputation).map_err(Into::into))
    }

    /// Writes `value` as is. The product identity is not applied and nothing
    /// downstream is updated.
    pub fn override_reputation_value(&self, name: &str, scope: Option<&str>, value: f64) -> Result<()> {
        let mut reputation = self.reputation_record(name, scope)?;
        reputation.value = value;
        self.tracked(self.engine.store().save_reputation(&reputation).map_err(Into::into))
    }

    // --- Activation ---

    pub fn activate_all_reputations(&self) -> Result<usize> {
        self.tracked(self.set_all_active(true))
    }

    pub fn deactivate_all_reputations(&self) -> Result<usize> {
        self.tracked(self.set_all_active(false))
    }

    fn set_all_active(&self, active: bool) -> Result<usize> {
        let store = self.engine.store();
        let mut changed = 0;
        for entity_type in self.engine.network().ancestry(&self.target.entity_type) {
            for mut reputation in store.reputations_for_target(&self.target.with_type(entity_type))? {
                if reputation.active != active {
                    reputation.active = active;
                    store.save_reputation(&reputation)?;
                    changed += 1;
                }
            }
        }
        info!(target_entity = %self.target, active, changed, "Set reputation activation");
        Ok(changed)
    }

    /// Whether the stored `name` reputation of this entity is active. False
    /// when no node exists yet.
    pub fn reputations_activated(&self, name: &str) -> Result<bool> {
        self.tracked((|| -> Result<bool> {
            let network = self.engine.network();
            let Some(declaring) = network.declaring_type(&self.target.entity_type, name) else {
                return Ok(false);
            };
            let found = self
                .engine
                .store()
                .find_reputation(name, &self.target.with_type(declaring))?;
            Ok(found.map_or(false, |r| r.active))
        })())
    }
}

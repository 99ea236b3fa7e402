//! The reputation network: every registered definition, the reverse edges
//! derived between them, the single-table-inheritance hierarchy and the
//! custom aggregation functions.
//!
//! A network is built once at startup through [`Network::define`] and then
//! shared read-mostly by the engine. Declaration order between mutually
//! referencing definitions does not matter: a reverse edge whose upstream
//! definition is not registered yet is parked and applied when it arrives.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use repute_types::{Aggregation, EntityRef};
use tracing::{debug, info, warn};

use crate::aggregator::{AggregationInput, Aggregator};
use crate::definition::{Attribute, ReputationDefinition, Source, SourceOfSpec, SourceSpec};
use crate::error::{ReputationError, Result};
use crate::model::{evaluate_scope, EntityModel};

type DefinitionKey = (String, String);

fn key(entity_type: &str, name: &str) -> DefinitionKey {
    (entity_type.to_string(), name.to_string())
}

/// `name` or `name_scope`.
pub fn scoped_reputation_name(name: &str, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{}_{}", name, scope),
        None => name.to_string(),
    }
}

fn snake_case(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len() + 4);
    for (i, c) in type_name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// A forward spec whose upstream definition has not been registered yet.
#[derive(Debug, Clone)]
struct PendingEdge {
    receiver_type: String,
    receiver_name: String,
    spec: SourceSpec,
}

#[derive(Clone, Default)]
pub struct Network {
    definitions: HashMap<DefinitionKey, ReputationDefinition>,
    pending: HashMap<DefinitionKey, Vec<PendingEdge>>,
    parents: HashMap<String, String>,
    aggregators: HashMap<String, Aggregator>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut aggregators: Vec<&String> = self.aggregators.keys().collect();
        aggregators.sort();
        f.debug_struct("Network")
            .field("definitions", &self.definitions.len())
            .field("pending", &self.pending_edge_count())
            .field("parents", &self.parents)
            .field("aggregators", &aggregators)
            .finish()
    }
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Type hierarchy ---

    /// Declares `child` a single-table-inheritance subtype of `parent`.
    pub fn register_subtype(&mut self, child: impl Into<String>, parent: impl Into<String>) {
        let (child, parent) = (child.into(), parent.into());
        debug!(%child, %parent, "Registered subtype");
        self.parents.insert(child, parent);
    }

    /// `[entity_type, parent, grandparent, ...]`.
    pub fn ancestry(&self, entity_type: &str) -> Vec<String> {
        let mut chain = vec![entity_type.to_string()];
        let mut current = entity_type;
        while let Some(parent) = self.parents.get(current) {
            if chain.contains(parent) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }

    // --- Custom aggregation ---

    pub fn register_aggregator<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(AggregationInput<'_>) -> f64 + Send + Sync + 'static,
    {
        let name = name.into();
        info!(aggregator = %name, "Registered custom aggregation function");
        self.aggregators.insert(name, Arc::new(f));
    }

    pub fn has_aggregator(&self, name: &str) -> bool {
        self.aggregators.contains_key(name)
    }

    pub(crate) fn aggregator_for(&self, aggregation: &Aggregation) -> Option<&Aggregator> {
        match aggregation {
            Aggregation::Custom(name) => self.aggregators.get(name),
            _ => None,
        }
    }

    // --- Registration ---

    /// Registers `name` on `entity_type`, replacing any previous definition
    /// of the same pair together with its scope expansions.
    pub fn define(
        &mut self,
        entity_type: &str,
        name: &str,
        definition: ReputationDefinition,
    ) -> Result<()> {
        self.validate(entity_type, name, &definition)?;
        if self.remove(entity_type, name).is_some() {
            warn!(
                reputation = name,
                entity_type, "Reputation redefined; reverse edges derived from the old definition are kept"
            );
        }

        let specs = definition.source_specs().to_vec();
        let scopes = definition.scopes.clone();
        let scoped = definition.has_scopes();
        self.definitions.insert(key(entity_type, name), definition);

        if scoped && !specs.is_empty() {
            warn!(
                reputation = name,
                entity_type,
                "Reverse edges are not derived for scope-parameterized reputations; upstream definitions must declare source_of"
            );
        } else {
            for spec in specs {
                let Some(upstream) = spec.upstream_type(entity_type).map(str::to_string) else {
                    continue;
                };
                if self.has_reputation(&upstream, &spec.reputation) {
                    self.derive_reverse_edge(entity_type, name, &spec, &upstream);
                } else {
                    debug!(
                        reputation = name,
                        upstream = %upstream,
                        source = %spec.reputation,
                        "Deferring reverse edge until the upstream reputation is defined"
                    );
                    self.pending
                        .entry(key(&upstream, &spec.reputation))
                        .or_default()
                        .push(PendingEdge {
                            receiver_type: entity_type.to_string(),
                            receiver_name: name.to_string(),
                            spec,
                        });
                }
            }
        }

        self.resolve_pending(entity_type, name);

        if let Some(scopes) = scopes {
            for scope in &scopes {
                self.insert_scope_expansion(entity_type, name, scope);
            }
        }
        info!(reputation = name, entity_type, "Defined reputation");
        Ok(())
    }

    fn validate(&self, entity_type: &str, name: &str, definition: &ReputationDefinition) -> Result<()> {
        if entity_type.is_empty() || name.is_empty() {
            return Err(ReputationError::invalid(
                "reputation definitions need an entity type and a name",
            ));
        }
        if let Source::Derived(specs) = &definition.source {
            if specs.is_empty() {
                return Err(ReputationError::invalid(format!(
                    "{} on {} is derived but declares no source",
                    name, entity_type
                )));
            }
            if let Some(spec) = specs.iter().find(|s| s.upstream_type(entity_type).is_none()) {
                return Err(ReputationError::invalid(format!(
                    "source {} of {} on {} is read through a relation but names no source type",
                    spec.reputation, name, entity_type
                )));
            }
        }
        if let Aggregation::Custom(process) = &definition.aggregated_by {
            if !self.has_aggregator(process) {
                return Err(ReputationError::UnsupportedOperation(format!(
                    "{} process is not supported yet",
                    process
                )));
            }
        }
        Ok(())
    }

    /// Removes a definition declared on `entity_type` and its scope expansions.
    pub fn remove(&mut self, entity_type: &str, name: &str) -> Option<ReputationDefinition> {
        let removed = self.definitions.remove(&key(entity_type, name))?;
        for scope in removed.scopes.iter().flatten() {
            self.definitions
                .remove(&key(entity_type, &scoped_reputation_name(name, Some(scope))));
        }
        Some(removed)
    }

    /// Adds a scope to a scope-parameterized reputation.
    pub fn add_scope(&mut self, entity_type: &str, name: &str, scope: &str) -> Result<()> {
        let declaring = self.declaring_type(entity_type, name).ok_or_else(|| {
            ReputationError::invalid(format!("{} is not defined for {}", name, entity_type))
        })?;
        let definition = self
            .definitions
            .get_mut(&key(&declaring, name))
            .ok_or_else(|| ReputationError::invalid(format!("{} is not defined for {}", name, entity_type)))?;
        match definition.scopes.as_mut() {
            None => {
                return Err(ReputationError::invalid(format!("{} does not have scope.", name)));
            }
            Some(scopes) if scopes.iter().any(|s| s == scope) => {
                return Err(ReputationError::invalid(format!(
                    "{} is already defined for {}",
                    scope, name
                )));
            }
            Some(scopes) => scopes.push(scope.to_string()),
        }
        self.insert_scope_expansion(&declaring, name, scope);
        info!(reputation = name, entity_type = %declaring, scope, "Added scope");
        Ok(())
    }

    fn insert_scope_expansion(&mut self, entity_type: &str, name: &str, scope: &str) {
        if let Some(base) = self.definitions.get(&key(entity_type, name)) {
            let expanded = base.expand_for_scope(scope);
            self.definitions.insert(
                key(entity_type, &scoped_reputation_name(name, Some(scope))),
                expanded,
            );
        }
    }

    fn resolve_pending(&mut self, entity_type: &str, name: &str) {
        let ready: Vec<DefinitionKey> = self
            .pending
            .keys()
            .filter(|(t, n)| n == name && self.ancestry(t).iter().any(|a| a == entity_type))
            .cloned()
            .collect();
        for pending_key in ready {
            for edge in self.pending.remove(&pending_key).unwrap_or_default() {
                self.derive_reverse_edge(
                    &edge.receiver_type,
                    &edge.receiver_name,
                    &edge.spec,
                    &pending_key.0,
                );
            }
        }
    }

    /// Records on the upstream definition the reverse of `spec`, owned by
    /// `receiver_name` on `receiver_type`.
    fn derive_reverse_edge(
        &mut self,
        receiver_type: &str,
        receiver_name: &str,
        spec: &SourceSpec,
        upstream_type: &str,
    ) {
        let Some(declaring) = self.declaring_type(upstream_type, &spec.reputation) else {
            return;
        };
        let of = spec.inverse.clone().unwrap_or_else(|| {
            if spec.of.is_self() {
                Attribute::SelfRef
            } else {
                Attribute::relation(snake_case(receiver_type))
            }
        });
        let restrict = spec
            .scope
            .as_ref()
            .and_then(|s| s.as_literal())
            .map(|s| vec![s.to_string()]);

        let Some(upstream) = self.definitions.get_mut(&key(&declaring, &spec.reputation)) else {
            return;
        };
        match upstream
            .source_of
            .iter_mut()
            .find(|so| so.reputation == receiver_name)
        {
            Some(existing) => match restrict {
                Some(added) if existing.defined_for_scope.is_some() => {
                    let known = existing.defined_for_scope.get_or_insert_with(Vec::new);
                    for scope in added {
                        if !known.contains(&scope) {
                            known.push(scope);
                        }
                    }
                }
                // An unrestricted spec reaches every upstream scope.
                _ => existing.defined_for_scope = None,
            },
            None => upstream.source_of.push(SourceOfSpec {
                reputation: receiver_name.to_string(),
                of,
                weight: None,
                scope: None,
                defined_for_scope: restrict,
            }),
        }
        let upstream = upstream.clone();
        self.sync_expansions(&declaring, &spec.reputation, &upstream, receiver_name);
        debug!(
            upstream = %spec.reputation,
            upstream_type = %declaring,
            receiver = receiver_name,
            receiver_type,
            "Derived reverse edge"
        );
    }

    /// Copies the base definition's edge to `receiver_name` into every
    /// existing scope expansion it is defined for.
    fn sync_expansions(
        &mut self,
        entity_type: &str,
        name: &str,
        base: &ReputationDefinition,
        receiver_name: &str,
    ) {
        let edge = base.source_of.iter().find(|so| so.reputation == receiver_name);
        for scope in base.scopes.iter().flatten() {
            let scoped_key = key(entity_type, &scoped_reputation_name(name, Some(scope)));
            if let Some(expansion) = self.definitions.get_mut(&scoped_key) {
                expansion.source_of.retain(|so| so.reputation != receiver_name);
                if let Some(edge) = edge.filter(|e| e.is_defined_for(scope)) {
                    expansion.source_of.push(edge.clone());
                }
            }
        }
    }

    // --- Lookup ---

    /// The definition of `name` for `entity_type`, falling back along the
    /// inheritance chain.
    pub fn lookup(&self, entity_type: &str, name: &str) -> Option<&ReputationDefinition> {
        self.ancestry(entity_type)
            .iter()
            .find_map(|t| self.definitions.get(&key(t, name)))
    }

    /// The type in `entity_type`'s ancestry that declares `name`.
    pub fn declaring_type(&self, entity_type: &str, name: &str) -> Option<String> {
        self.ancestry(entity_type)
            .into_iter()
            .find(|t| self.definitions.contains_key(&key(t, name)))
    }

    pub fn has_reputation(&self, entity_type: &str, name: &str) -> bool {
        self.lookup(entity_type, name).is_some()
    }

    pub fn is_primary(&self, entity_type: &str, name: &str) -> bool {
        self.lookup(entity_type, name).map_or(false, |d| d.is_primary())
    }

    pub fn has_scopes(&self, entity_type: &str, name: &str) -> bool {
        self.lookup(entity_type, name).map_or(false, |d| d.has_scopes())
    }

    pub fn has_scope(&self, entity_type: &str, name: &str, scope: &str) -> bool {
        self.lookup(entity_type, name).map_or(false, |d| d.has_scope(scope))
    }

    /// Validates `scope` against the definition and returns the stored name.
    pub fn scoped_name(&self, entity_type: &str, name: &str, scope: Option<&str>) -> Result<String> {
        let definition = self.lookup(entity_type, name).ok_or_else(|| {
            ReputationError::invalid(format!("{} is not defined for {}", name, entity_type))
        })?;
        match scope {
            None if definition.has_scopes() => Err(ReputationError::invalid(format!(
                "Evaluations of {} must have scope specified.",
                name
            ))),
            Some(s) if !definition.has_scope(s) => Err(ReputationError::invalid(format!(
                "{} does not have scope {}",
                name, s
            ))),
            _ => Ok(scoped_reputation_name(name, scope)),
        }
    }

    pub fn aggregation(&self, entity_type: &str, scoped_name: &str) -> Result<Aggregation> {
        self.lookup(entity_type, scoped_name)
            .map(|d| d.aggregated_by.clone())
            .ok_or_else(|| {
                ReputationError::invalid(format!("{} is not defined for {}", scoped_name, entity_type))
            })
    }

    /// Weight of the contribution `sender_name` makes to `receiver_name` on
    /// `target`, recovered from the receiver's declared sources. None when the
    /// receiver does not declare that source.
    pub fn weight_of_source(
        &self,
        model: &dyn EntityModel,
        target: &EntityRef,
        sender_name: &str,
        receiver_name: &str,
    ) -> Result<Option<f64>> {
        let Some(definition) = self.lookup(&target.entity_type, receiver_name) else {
            return Ok(None);
        };
        match &definition.source {
            Source::Primary(_) => Ok(Some(1.0)),
            Source::Derived(specs) => {
                for spec in specs {
                    let Some(upstream) = spec.upstream_type(&target.entity_type) else {
                        continue;
                    };
                    let scope = evaluate_scope(model, target, spec.scope.as_ref());
                    if self.scoped_name(upstream, &spec.reputation, scope.as_deref())? == sender_name {
                        return Ok(Some(spec.weight));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Reverse edges still waiting for their upstream definition.
    pub fn pending_edge_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

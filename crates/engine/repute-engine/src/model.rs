use repute_types::EntityRef;

use crate::definition::{Attribute, ScopeRef};

/// The host object model: relation traversal and attribute reads.
pub trait EntityModel: Send + Sync {
    /// Entities reachable from `entity` through `relation`. `scope` is set
    /// when the relation is scope-bound.
    fn related(&self, entity: &EntityRef, relation: &str, scope: Option<&str>) -> Vec<EntityRef>;

    /// Value of a scope-producing attribute of `entity`, or None if the
    /// entity has no such attribute.
    fn scope_attribute(&self, entity: &EntityRef, name: &str) -> Option<String>;
}

/// A model with no relations. Only `SelfRef` specs and literal scopes resolve.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedModel;

impl EntityModel for DetachedModel {
    fn related(&self, _entity: &EntityRef, _relation: &str, _scope: Option<&str>) -> Vec<EntityRef> {
        Vec::new()
    }

    fn scope_attribute(&self, _entity: &EntityRef, _name: &str) -> Option<String> {
        None
    }
}

pub(crate) fn resolve_attribute(
    model: &dyn EntityModel,
    entity: &EntityRef,
    of: &Attribute,
    bound_scope: Option<&str>,
) -> Vec<EntityRef> {
    let mut related = match of {
        Attribute::SelfRef => vec![entity.clone()],
        Attribute::Relation(name) => model.related(entity, name, None),
        Attribute::ScopedRelation(name) => model.related(entity, name, bound_scope),
    };
    let mut seen = std::collections::HashSet::new();
    related.retain(|e| seen.insert(e.clone()));
    related
}

pub(crate) fn evaluate_scope(
    model: &dyn EntityModel,
    entity: &EntityRef,
    scope: Option<&ScopeRef>,
) -> Option<String> {
    match scope? {
        ScopeRef::Literal(s) => Some(s.clone()),
        ScopeRef::Attribute(name) => {
            Some(model.scope_attribute(entity, name).unwrap_or_else(|| name.clone()))
        }
    }
}

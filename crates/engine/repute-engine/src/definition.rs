//! Reputation definitions as plain data.
//!
//! A definition is registered once per `(entity type, reputation name)` on the
//! [`Network`](crate::network::Network). Scope-parameterized definitions are
//! expanded into one concrete definition per scope at registration time.

use repute_types::Aggregation;

/// How to reach related entities from the entity owning a spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Attribute {
    #[default]
    SelfRef,
    /// A named relation resolved by the host model.
    Relation(String),
    /// A named relation resolved by the host model with the scope the
    /// definition was expanded for.
    ScopedRelation(String),
}

impl Attribute {
    pub fn relation(name: impl Into<String>) -> Self {
        Attribute::Relation(name.into())
    }

    pub fn scoped(name: impl Into<String>) -> Self {
        Attribute::ScopedRelation(name.into())
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Attribute::SelfRef)
    }
}

/// A scope either given literally or read from an entity attribute.
///
/// An attribute the host does not know is read as a literal scope name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeRef {
    Literal(String),
    Attribute(String),
}

impl ScopeRef {
    pub fn literal(scope: impl Into<String>) -> Self {
        ScopeRef::Literal(scope.into())
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        ScopeRef::Attribute(name.into())
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            ScopeRef::Literal(s) => Some(s),
            ScopeRef::Attribute(_) => None,
        }
    }
}

/// One upstream reputation feeding a derived reputation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub reputation: String,
    pub of: Attribute,
    /// Entity type owning the upstream reputation. Implied by `SelfRef`.
    pub source_type: Option<String>,
    pub weight: f64,
    /// Scope of the upstream reputation, evaluated on the owning entity.
    pub scope: Option<ScopeRef>,
    /// Set on per-scope expansions; handed to `ScopedRelation` lookups.
    pub bound_scope: Option<String>,
    /// Relation from the upstream entity back to the owner, used for the
    /// derived reverse edge.
    pub inverse: Option<Attribute>,
}

impl SourceSpec {
    pub fn new(reputation: impl Into<String>) -> Self {
        Self {
            reputation: reputation.into(),
            of: Attribute::SelfRef,
            source_type: None,
            weight: 1.0,
            scope: None,
            bound_scope: None,
            inverse: None,
        }
    }

    pub fn of(mut self, of: Attribute, source_type: impl Into<String>) -> Self {
        self.of = of;
        self.source_type = Some(source_type.into());
        self
    }

    pub fn of_relation(self, relation: impl Into<String>, source_type: impl Into<String>) -> Self {
        self.of(Attribute::relation(relation), source_type)
    }

    pub fn of_scoped_relation(
        self,
        relation: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        self.of(Attribute::scoped(relation), source_type)
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn scope(mut self, scope: ScopeRef) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn inverse(mut self, inverse: Attribute) -> Self {
        self.inverse = Some(inverse);
        self
    }

    /// Entity type of the upstream reputation for a spec owned by `owner_type`.
    pub fn upstream_type<'a>(&'a self, owner_type: &'a str) -> Option<&'a str> {
        match (&self.source_type, &self.of) {
            (Some(t), _) => Some(t.as_str()),
            (None, Attribute::SelfRef) => Some(owner_type),
            (None, _) => None,
        }
    }

    fn bound_to(&self, scope: &str) -> Self {
        Self {
            bound_scope: Some(scope.to_string()),
            ..self.clone()
        }
    }
}

/// One downstream reputation fed by the owning reputation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOfSpec {
    pub reputation: String,
    pub of: Attribute,
    /// Overrides the weight recovered from the receiver's declaration.
    pub weight: Option<f64>,
    /// Scope of the downstream reputation, evaluated on the sending entity.
    pub scope: Option<ScopeRef>,
    /// Restricts the edge to these scopes of a scope-parameterized sender.
    pub defined_for_scope: Option<Vec<String>>,
}

impl SourceOfSpec {
    pub fn new(reputation: impl Into<String>) -> Self {
        Self {
            reputation: reputation.into(),
            of: Attribute::SelfRef,
            weight: None,
            scope: None,
            defined_for_scope: None,
        }
    }

    pub fn of(mut self, of: Attribute) -> Self {
        self.of = of;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn scope(mut self, scope: ScopeRef) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn defined_for_scope<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defined_for_scope = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_defined_for(&self, scope: &str) -> bool {
        match &self.defined_for_scope {
            None => true,
            Some(scopes) => scopes.iter().any(|s| s == scope),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Fed directly by evaluations from this entity type.
    Primary(String),
    Derived(Vec<SourceSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReputationDefinition {
    pub source: Source,
    pub source_of: Vec<SourceOfSpec>,
    pub aggregated_by: Aggregation,
    pub scopes: Option<Vec<String>>,
    pub init_value: Option<f64>,
}

impl ReputationDefinition {
    /// A reputation fed by evaluations whose source is of `source_type`.
    pub fn primary(source_type: impl Into<String>) -> Self {
        Self::with_source(Source::Primary(source_type.into()))
    }

    /// A reputation fed by other reputations.
    pub fn derived(sources: Vec<SourceSpec>) -> Self {
        Self::with_source(Source::Derived(sources))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            source_of: Vec::new(),
            aggregated_by: Aggregation::default(),
            scopes: None,
            init_value: None,
        }
    }

    pub fn aggregated_by(mut self, aggregation: impl Into<Aggregation>) -> Self {
        self.aggregated_by = aggregation.into();
        self
    }

    pub fn source_of(mut self, spec: SourceOfSpec) -> Self {
        self.source_of.push(spec);
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    pub fn init_value(mut self, value: f64) -> Self {
        self.init_value = Some(value);
        self
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.source, Source::Primary(_))
    }

    pub fn primary_source_type(&self) -> Option<&str> {
        match &self.source {
            Source::Primary(t) => Some(t),
            Source::Derived(_) => None,
        }
    }

    pub fn source_specs(&self) -> &[SourceSpec] {
        match &self.source {
            Source::Primary(_) => &[],
            Source::Derived(specs) => specs,
        }
    }

    pub fn has_scopes(&self) -> bool {
        self.scopes.is_some()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes
            .as_ref()
            .map_or(false, |scopes| scopes.iter().any(|s| s == scope))
    }

    /// The concrete definition backing `<name>_<scope>`: sources bound to the
    /// scope, reverse edges filtered by `defined_for_scope`, no scopes of its own.
    pub fn expand_for_scope(&self, scope: &str) -> Self {
        let source = match &self.source {
            Source::Primary(t) => Source::Primary(t.clone()),
            Source::Derived(specs) => {
                Source::Derived(specs.iter().map(|s| s.bound_to(scope)).collect())
            }
        };
        Self {
            source,
            source_of: self
                .source_of
                .iter()
                .filter(|so| so.is_defined_for(scope))
                .cloned()
                .collect(),
            aggregated_by: self.aggregated_by.clone(),
            scopes: None,
            init_value: self.init_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maturity() -> ReputationDefinition {
        ReputationDefinition::derived(vec![
            SourceSpec::new("votes").of_scoped_relation("translations_for", "Translation")
        ])
        .scopes(["ja", "fr", "de"])
        .source_of(SourceOfSpec::new("maturity_all").defined_for_scope(["ja", "fr"]))
    }

    #[test]
    fn primary_is_decided_by_source_shape() {
        assert!(ReputationDefinition::primary("User").is_primary());
        assert!(!maturity().is_primary());
        assert_eq!(ReputationDefinition::primary("User").aggregated_by, Aggregation::Sum);
    }

    #[test]
    fn expansion_binds_scope_and_filters_reverse_edges() {
        let def = maturity();
        let ja = def.expand_for_scope("ja");
        assert_eq!(ja.source_specs()[0].bound_scope.as_deref(), Some("ja"));
        assert_eq!(ja.source_of.len(), 1);
        assert!(!ja.has_scopes());

        let de = def.expand_for_scope("de");
        assert!(de.source_of.is_empty());
    }

    #[test]
    fn upstream_type_defaults_to_owner_for_self() {
        let own = SourceSpec::new("question_karma");
        assert_eq!(own.upstream_type("User"), Some("User"));

        let related = SourceSpec::new("total_votes").of_relation("questions", "Question");
        assert_eq!(related.upstream_type("User"), Some("Question"));

        let mut missing = SourceSpec::new("total_votes");
        missing.of = Attribute::relation("questions");
        assert_eq!(missing.upstream_type("User"), None);
    }
}

use std::sync::Arc;

use repute_types::{Aggregation, Reputation, SourceValue};

use crate::error::{ReputationError, Result};

/// Arguments handed to a custom aggregation function.
#[derive(Debug, Clone, Copy)]
pub enum AggregationInput<'a> {
    NewSource {
        reputation: &'a Reputation,
        source: &'a SourceValue,
        weight: f64,
    },
    UpdatedSource {
        reputation: &'a Reputation,
        source: &'a SourceValue,
        weight: f64,
        old_value: f64,
        new_count: usize,
    },
}

impl<'a> AggregationInput<'a> {
    pub fn reputation(&self) -> &'a Reputation {
        match self {
            AggregationInput::NewSource { reputation, .. }
            | AggregationInput::UpdatedSource { reputation, .. } => reputation,
        }
    }

    pub fn source(&self) -> &'a SourceValue {
        match self {
            AggregationInput::NewSource { source, .. }
            | AggregationInput::UpdatedSource { source, .. } => source,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            AggregationInput::NewSource { weight, .. }
            | AggregationInput::UpdatedSource { weight, .. } => *weight,
        }
    }
}

/// A named custom aggregation function. Returns the new reputation value.
pub type Aggregator = Arc<dyn Fn(AggregationInput<'_>) -> f64 + Send + Sync>;

/// Result of folding a changed contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Folded {
    Value(f64),
    /// The delta cannot be applied (product over a zero prior); recompute the
    /// value from all current contributions.
    Recompute,
}

fn custom<'a>(name: &str, custom: Option<&'a Aggregator>) -> Result<&'a Aggregator> {
    custom.ok_or_else(|| {
        ReputationError::UnsupportedOperation(format!("{} process is not supported yet", name))
    })
}

/// Folds a brand-new contribution. `received` is the receiver's message
/// count before this contribution.
pub(crate) fn fold_new(
    aggregation: &Aggregation,
    reputation: &Reputation,
    source: &SourceValue,
    weight: f64,
    received: usize,
    aggregator: Option<&Aggregator>,
) -> Result<f64> {
    let value = reputation.value;
    let n = received as f64;
    Ok(match aggregation {
        Aggregation::Sum => value + source.value * weight,
        Aggregation::Average => (value * n + source.value * weight) / (n + 1.0),
        Aggregation::Product => value * source.value * weight,
        Aggregation::Custom(name) => custom(name, aggregator)?(AggregationInput::NewSource {
            reputation,
            source,
            weight,
        }),
    })
}

/// Folds a changed or removed contribution. `old_count` is the receiver's
/// message count before the change, `new_count` after it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fold_changed(
    aggregation: &Aggregation,
    reputation: &Reputation,
    source: &SourceValue,
    weight: f64,
    old_value: f64,
    old_count: usize,
    new_count: usize,
    aggregator: Option<&Aggregator>,
) -> Result<Folded> {
    if new_count == 0 {
        return Ok(Folded::Value(aggregation.identity()));
    }
    let value = reputation.value;
    let folded = match aggregation {
        Aggregation::Sum => Folded::Value(value + (source.value - old_value) * weight),
        Aggregation::Average => Folded::Value(
            (value * old_count as f64 + (source.value - old_value) * weight) / new_count as f64,
        ),
        Aggregation::Product if old_value == 0.0 => Folded::Recompute,
        Aggregation::Product => Folded::Value(value * source.value / old_value),
        Aggregation::Custom(name) => {
            Folded::Value(custom(name, aggregator)?(AggregationInput::UpdatedSource {
                reputation,
                source,
                weight,
                old_value,
                new_count,
            }))
        }
    };
    Ok(folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repute_types::{EntityRef, NewReputation, SenderRef};

    fn reputation(aggregation: Aggregation, value: f64) -> Reputation {
        let mut rep = NewReputation::new("r", EntityRef::new("User", 1), aggregation, None)
            .into_record(1, Default::default());
        rep.value = value;
        rep
    }

    fn source(value: f64) -> SourceValue {
        SourceValue {
            sender: SenderRef::Evaluation(9),
            reputation_name: "r".into(),
            target: EntityRef::new("User", 1),
            value,
        }
    }

    #[test]
    fn average_folds_against_previous_count() {
        let rep = reputation(Aggregation::Average, 3.0);
        let v = fold_new(&Aggregation::Average, &rep, &source(2.0), 1.0, 1, None).unwrap();
        assert_eq!(v, 2.5);

        let rep = reputation(Aggregation::Average, 2.5);
        let v = fold_changed(&Aggregation::Average, &rep, &source(0.0), 1.0, 3.0, 2, 1, None).unwrap();
        assert_eq!(v, Folded::Value(2.0));
    }

    #[test]
    fn empty_receiver_resets_to_identity() {
        let rep = reputation(Aggregation::Product, 7.0);
        let v = fold_changed(&Aggregation::Product, &rep, &source(1.0), 1.0, 7.0, 1, 0, None).unwrap();
        assert_eq!(v, Folded::Value(1.0));
    }

    #[test]
    fn product_over_zero_prior_asks_for_recompute() {
        let rep = reputation(Aggregation::Product, 1.0);
        let v = fold_changed(&Aggregation::Product, &rep, &source(3.0), 1.0, 0.0, 2, 2, None).unwrap();
        assert_eq!(v, Folded::Recompute);
    }

    #[test]
    fn unregistered_custom_aggregation_is_unsupported() {
        let agg = Aggregation::Custom("weighted".into());
        let rep = reputation(agg.clone(), 0.0);
        let err = fold_new(&agg, &rep, &source(1.0), 1.0, 0, None).unwrap_err();
        assert!(matches!(err, ReputationError::UnsupportedOperation(_)));
    }

    #[test]
    fn custom_aggregator_sees_the_update_shape() {
        let agg = Aggregation::Custom("tenfold".into());
        let f: Aggregator = Arc::new(|input: AggregationInput<'_>| match input {
            AggregationInput::NewSource { reputation, source, weight } => {
                reputation.value + weight * source.value * 10.0
            }
            AggregationInput::UpdatedSource { reputation, source, old_value, .. } => {
                reputation.value + (source.value - old_value) * 10.0
            }
        });
        let rep = reputation(agg.clone(), 30.0);
        assert_eq!(fold_new(&agg, &rep, &source(2.0), 1.0, 1, Some(&f)).unwrap(), 50.0);
        assert_eq!(
            fold_changed(&agg, &rep, &source(2.0), 1.0, 3.0, 1, 1, Some(&f)).unwrap(),
            Folded::Value(20.0)
        );
    }
}

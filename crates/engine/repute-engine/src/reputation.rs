use repute_store::ReputationStore;
use repute_types::Reputation;

use crate::error::Result;

/// `(value - min) / (max - min)` over the active reputations sharing the
/// node's name and target type. Inactive nodes and degenerate ranges read 0.
pub(crate) fn normalized_value(store: &dyn ReputationStore, reputation: &Reputation) -> Result<f64> {
    if !reputation.active {
        return Ok(0.0);
    }
    let name = &reputation.reputation_name;
    let target_type = &reputation.target.entity_type;
    let max = store.max_value(name, target_type)?;
    let min = store.min_value(name, target_type)?;
    Ok(match (max, min) {
        (Some(max), Some(min)) if max != min => (reputation.value - min) / (max - min),
        _ => 0.0,
    })
}

/// 1 + the number of active same-type reputations with a strictly greater
/// value. Ties share a rank.
pub(crate) fn rank(store: &dyn ReputationStore, reputation: &Reputation) -> Result<usize> {
    let greater = store.count_greater(
        &reputation.reputation_name,
        &reputation.target.entity_type,
        reputation.value,
    )?;
    Ok(greater + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repute_store::InMemoryReputationStore;
    use repute_types::{Aggregation, EntityRef, NewReputation};

    fn seed(store: &InMemoryReputationStore, values: &[f64]) -> Vec<Reputation> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let new = NewReputation::new("karma", EntityRef::new("User", i as u64 + 1), Aggregation::Sum, Some(*v));
                store.insert_reputation(new).unwrap()
            })
            .collect()
    }

    #[test]
    fn normalization_spans_active_extremes() {
        let store = InMemoryReputationStore::new();
        let reps = seed(&store, &[2.0, 6.0, 10.0]);
        let normalized: Vec<f64> = reps.iter().map(|r| normalized_value(&store, r).unwrap()).collect();
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn inactive_and_flat_sets_normalize_to_zero() {
        let store = InMemoryReputationStore::new();
        let mut reps = seed(&store, &[4.0, 4.0]);
        assert_eq!(normalized_value(&store, &reps[0]).unwrap(), 0.0);

        reps[1].active = false;
        store.save_reputation(&reps[1]).unwrap();
        assert_eq!(normalized_value(&store, &reps[1]).unwrap(), 0.0);
    }

    #[test]
    fn ties_share_the_higher_rank() {
        let store = InMemoryReputationStore::new();
        let reps = seed(&store, &[3.0, 5.0, 5.0]);
        assert_eq!(rank(&store, &reps[0]).unwrap(), 3);
        assert_eq!(rank(&store, &reps[1]).unwrap(), 1);
        assert_eq!(rank(&store, &reps[2]).unwrap(), 1);
    }
}

mod helpers;

use std::sync::Arc;

use helpers::{assert_close, init_test_tracing, network, World};
use repute_engine::{
    EngineConfig, ReputationEngine, ReputationStore, SledReputationStore, StoreBackend, StoreConfig,
};
use tempfile::tempdir;

#[test]
fn propagated_values_survive_a_reopen() {
    init_test_tracing();
    let dir = tempdir().unwrap();
    let world = World::new();
    let user = world.user();
    let question = world.question(&user);

    {
        let store = Arc::new(SledReputationStore::open(dir.path()).unwrap());
        let engine = ReputationEngine::builder()
            .with_network(network())
            .with_model(world.clone())
            .with_store(store.clone())
            .build()
            .unwrap();
        engine.entity(&question).add_evaluation("total_votes", 2.0, &user, None).unwrap();
        engine.entity(&question).update_evaluation("total_votes", 3.0, &user, None).unwrap();
        store.flush().unwrap();
    }

    let store = Arc::new(SledReputationStore::open(dir.path()).unwrap());
    let engine = ReputationEngine::builder()
        .with_network(network())
        .with_model(world.clone())
        .with_store(store)
        .build()
        .unwrap();
    assert_eq!(engine.store().backend(), "sled");
    assert_close(engine.entity(&user).reputation_for("question_karma", None).unwrap(), 3.0);

    // Writes after the reopen keep using the persisted edges.
    engine.entity(&question).update_evaluation("total_votes", 1.0, &user, None).unwrap();
    assert_close(engine.entity(&user).reputation_for("question_karma", None).unwrap(), 1.0);
    let karma = engine.store().find_reputation("question_karma", &user).unwrap().unwrap();
    assert_eq!(engine.messages().received_count(karma.id).unwrap(), 1);
}

#[test]
fn configured_sled_backend_is_opened_by_the_builder() {
    let dir = tempdir().unwrap();
    let world = World::new();
    let user = world.user();
    let answer = world.answer(&user, None);
    let engine = ReputationEngine::builder()
        .with_network(network())
        .with_model(world.clone())
        .with_config(EngineConfig {
            store: StoreConfig {
                backend: StoreBackend::Sled,
                path: Some(dir.path().join("db")),
            },
            ..EngineConfig::default()
        })
        .build()
        .unwrap();

    let entity = engine.entity(&answer);
    entity.add_evaluation("avg_rating", 4.0, &user, None).unwrap();
    entity.add_evaluation("avg_rating", 2.0, &world.user(), None).unwrap();
    assert_close(entity.reputation_for("avg_rating", None).unwrap(), 3.0);
    assert_eq!(engine.store().backend(), "sled");
}

#[test]
fn missing_sled_path_is_a_configuration_error() {
    let err = ReputationEngine::builder()
        .with_config(EngineConfig {
            store: StoreConfig {
                backend: StoreBackend::Sled,
                path: None,
            },
            ..EngineConfig::default()
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, repute_engine::ReputationError::Config(_)));
}

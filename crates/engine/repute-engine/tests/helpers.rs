#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use repute_engine::{
    Aggregation, AggregationInput, Attribute, EngineConfig, EntityModel, EntityRef, Network,
    ReputationDefinition, ReputationEngine, ScopeRef, SourceOfSpec, SourceSpec,
};

#[derive(Default)]
struct Relations {
    /// question -> author
    questions: BTreeMap<u64, u64>,
    /// answer -> (author, question)
    answers: BTreeMap<u64, (u64, Option<u64>)>,
    /// translation -> (user, phrase, locale)
    translations: BTreeMap<u64, (u64, u64, String)>,
}

/// In-memory host model: users, questions, answers, phrases, translations
/// and people with subtypes.
#[derive(Default)]
pub struct World {
    relations: RwLock<Relations>,
    next_id: AtomicU64,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn user(&self) -> EntityRef {
        EntityRef::new("User", self.id())
    }

    pub fn question(&self, author: &EntityRef) -> EntityRef {
        let id = self.id();
        self.relations.write().unwrap().questions.insert(id, author.id);
        EntityRef::new("Question", id)
    }

    pub fn answer(&self, author: &EntityRef, question: Option<&EntityRef>) -> EntityRef {
        let id = self.id();
        self.relations
            .write()
            .unwrap()
            .answers
            .insert(id, (author.id, question.map(|q| q.id)));
        EntityRef::new("Answer", id)
    }

    pub fn phrase(&self) -> EntityRef {
        EntityRef::new("Phrase", self.id())
    }

    pub fn translation(&self, user: &EntityRef, phrase: &EntityRef, locale: &str) -> EntityRef {
        let id = self.id();
        self.relations
            .write()
            .unwrap()
            .translations
            .insert(id, (user.id, phrase.id, locale.to_string()));
        EntityRef::new("Translation", id)
    }

    /// `Person`, `Programmer` or `Designer`.
    pub fn person(&self, kind: &str) -> EntityRef {
        EntityRef::new(kind, self.id())
    }

    pub fn post(&self) -> EntityRef {
        EntityRef::new("Post", self.id())
    }
}

impl EntityModel for World {
    fn related(&self, entity: &EntityRef, relation: &str, scope: Option<&str>) -> Vec<EntityRef> {
        let r = self.relations.read().unwrap();
        let id = entity.id;
        match relation {
            "questions" => r
                .questions
                .iter()
                .filter(|(_, author)| **author == id)
                .map(|(q, _)| EntityRef::new("Question", *q))
                .collect(),
            "answers" if entity.is_type("User") => r
                .answers
                .iter()
                .filter(|(_, (author, _))| *author == id)
                .map(|(a, _)| EntityRef::new("Answer", *a))
                .collect(),
            "answers" => r
                .answers
                .iter()
                .filter(|(_, (_, question))| *question == Some(id))
                .map(|(a, _)| EntityRef::new("Answer", *a))
                .collect(),
            "author" if entity.is_type("Question") => r
                .questions
                .get(&id)
                .map(|author| EntityRef::new("User", *author))
                .into_iter()
                .collect(),
            "author" => r
                .answers
                .get(&id)
                .map(|(author, _)| EntityRef::new("User", *author))
                .into_iter()
                .collect(),
            "question" => r
                .answers
                .get(&id)
                .and_then(|(_, question)| *question)
                .map(|q| EntityRef::new("Question", q))
                .into_iter()
                .collect(),
            "translations" => r
                .translations
                .iter()
                .filter(|(_, (_, phrase, _))| *phrase == id)
                .map(|(t, _)| EntityRef::new("Translation", *t))
                .collect(),
            "translations_for" => r
                .translations
                .iter()
                .filter(|(_, (_, phrase, locale))| *phrase == id && Some(locale.as_str()) == scope)
                .map(|(t, _)| EntityRef::new("Translation", *t))
                .collect(),
            "phrase" => r
                .translations
                .get(&id)
                .map(|(_, phrase, _)| EntityRef::new("Phrase", *phrase))
                .into_iter()
                .collect(),
            "user" => r
                .translations
                .get(&id)
                .map(|(user, _, _)| EntityRef::new("User", *user))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn scope_attribute(&self, entity: &EntityRef, name: &str) -> Option<String> {
        if name != "locale" {
            return None;
        }
        let r = self.relations.read().unwrap();
        r.translations.get(&entity.id).map(|(_, _, locale)| locale.clone())
    }
}

/// Adds ten times the weighted contribution.
pub fn custom_aggregation(input: AggregationInput<'_>) -> f64 {
    match input {
        AggregationInput::NewSource { reputation, source, weight } => {
            reputation.value + weight * source.value * 10.0
        }
        AggregationInput::UpdatedSource { reputation, source, old_value, .. } => {
            reputation.value + (source.value - old_value) * 10.0
        }
    }
}

pub fn network() -> Network {
    let mut network = Network::new();
    network.register_aggregator("custom_aggregation", custom_aggregation);
    network.register_subtype("Programmer", "Person");
    network.register_subtype("Designer", "Person");

    network
        .define(
            "User",
            "karma",
            ReputationDefinition::derived(vec![
                SourceSpec::new("question_karma"),
                SourceSpec::new("answer_karma").weight(0.2),
            ])
            .aggregated_by(Aggregation::Product),
        )
        .unwrap();
    network
        .define(
            "User",
            "question_karma",
            ReputationDefinition::derived(vec![SourceSpec::new("total_votes")
                .of_relation("questions", "Question")
                .inverse(Attribute::relation("author"))]),
        )
        .unwrap();
    network
        .define(
            "User",
            "answer_karma",
            ReputationDefinition::derived(vec![SourceSpec::new("weighted_avg_rating")
                .of_relation("answers", "Answer")
                .inverse(Attribute::relation("author"))])
            .aggregated_by(Aggregation::Average),
        )
        .unwrap();
    network
        .define(
            "User",
            "custom_rating",
            ReputationDefinition::derived(vec![SourceSpec::new("custom_rating")
                .of_relation("answers", "Answer")
                .inverse(Attribute::relation("author"))])
            .aggregated_by("custom_aggregation"),
        )
        .unwrap();

    network
        .define(
            "Question",
            "total_votes",
            ReputationDefinition::primary("User")
                .source_of(SourceOfSpec::new("question_karma").of(Attribute::relation("author"))),
        )
        .unwrap();
    network
        .define(
            "Question",
            "difficulty",
            ReputationDefinition::primary("User").aggregated_by(Aggregation::Average),
        )
        .unwrap();

    network
        .define(
            "Answer",
            "weighted_avg_rating",
            ReputationDefinition::derived(vec![
                SourceSpec::new("avg_rating"),
                SourceSpec::new("difficulty")
                    .of_relation("question", "Question")
                    .inverse(Attribute::relation("answers")),
            ])
            .aggregated_by(Aggregation::Product)
            .source_of(SourceOfSpec::new("answer_karma").of(Attribute::relation("author"))),
        )
        .unwrap();
    network
        .define(
            "Answer",
            "avg_rating",
            ReputationDefinition::primary("User").aggregated_by(Aggregation::Average),
        )
        .unwrap();
    network
        .define(
            "Answer",
            "custom_rating",
            ReputationDefinition::primary("User")
                .aggregated_by("custom_aggregation")
                .source_of(SourceOfSpec::new("custom_rating").of(Attribute::relation("author"))),
        )
        .unwrap();

    network
        .define(
            "Phrase",
            "maturity_all",
            ReputationDefinition::derived(vec![
                SourceSpec::new("maturity").scope(ScopeRef::literal("ja")),
                SourceSpec::new("maturity").scope(ScopeRef::literal("fr")),
            ]),
        )
        .unwrap();
    network
        .define(
            "Phrase",
            "maturity",
            ReputationDefinition::derived(vec![
                SourceSpec::new("votes").of_scoped_relation("translations_for", "Translation")
            ])
            .scopes(["ja", "fr", "de"])
            .source_of(SourceOfSpec::new("maturity_all").defined_for_scope(["ja", "fr"])),
        )
        .unwrap();
    network
        .define(
            "Phrase",
            "maturity_of_all_translations",
            ReputationDefinition::derived(vec![
                SourceSpec::new("votes").of_relation("translations", "Translation")
            ])
            .scopes(["ja", "fr", "de"]),
        )
        .unwrap();
    network
        .define(
            "Phrase",
            "difficulty_with_scope",
            ReputationDefinition::primary("User")
                .aggregated_by(Aggregation::Average)
                .scopes(["s1", "s2", "s3"]),
        )
        .unwrap();

    network
        .define(
            "Translation",
            "votes",
            ReputationDefinition::primary("User")
                .source_of(
                    SourceOfSpec::new("maturity")
                        .of(Attribute::relation("phrase"))
                        .scope(ScopeRef::attribute("locale")),
                )
                .source_of(
                    SourceOfSpec::new("maturity_of_all_translations")
                        .of(Attribute::relation("phrase"))
                        .scope(ScopeRef::attribute("locale")),
                ),
        )
        .unwrap();

    network
        .define("Person", "leadership", ReputationDefinition::primary("Person"))
        .unwrap();
    network
        .define("Post", "votes", ReputationDefinition::primary("Person"))
        .unwrap();

    network
}

pub fn engine_with(world: &Arc<World>, network: Network) -> ReputationEngine {
    ReputationEngine::builder()
        .with_network(network)
        .with_model(world.clone())
        .with_config(EngineConfig::default())
        .build()
        .unwrap()
}

pub fn engine(world: &Arc<World>) -> ReputationEngine {
    engine_with(world, network())
}

/// A user with one question, one answer to it, and a phrase.
pub struct Fixture {
    pub world: Arc<World>,
    pub engine: ReputationEngine,
    pub user: EntityRef,
    pub question: EntityRef,
    pub answer: EntityRef,
    pub phrase: EntityRef,
}

pub fn fixture() -> Fixture {
    let world = World::new();
    let user = world.user();
    let question = world.question(&user);
    let answer = world.answer(&user, Some(&question));
    let phrase = world.phrase();
    let engine = engine(&world);
    Fixture {
        world,
        engine,
        user,
        question,
        answer,
        phrase,
    }
}

pub const DELTA: f64 = 1e-9;

#[track_caller]
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < DELTA,
        "expected {} to be within {} of {}",
        actual,
        DELTA,
        expected
    );
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

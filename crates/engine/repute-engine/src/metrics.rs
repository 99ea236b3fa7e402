use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_counter_vec, Histogram,
    IntCounter, IntCounterVec,
};

lazy_static! {
    pub static ref EVALUATIONS_WRITTEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "repute_engine_evaluations_written_total",
        "Evaluation writes handled by the engine",
        &["operation"]
    )
    .unwrap();

    pub static ref REPUTATIONS_CREATED_TOTAL: IntCounter =
        register_int_counter!(
            opts!("repute_engine_reputations_created_total", "Reputation nodes created lazily")
        ).unwrap();

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter =
        register_int_counter!(
            opts!("repute_engine_messages_delivered_total", "Propagation edges recorded in the message ledger")
        ).unwrap();

    pub static ref PROPAGATION_HOPS_TOTAL: IntCounter =
        register_int_counter!(
            opts!("repute_engine_propagation_hops_total", "Downstream reputation updates performed during propagation")
        ).unwrap();

    pub static ref PROPAGATION_DEPTH: Histogram =
        register_histogram!(
            "repute_engine_propagation_depth",
            "Nesting depth reached while propagating a change",
            vec![1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0, 16.0, 32.0, 64.0]
        ).unwrap();

    pub static ref ENGINE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "repute_engine_errors_total",
        "Engine operation failures by error kind",
        &["kind"]
    )
    .unwrap();
}

pub fn record_evaluation_write(operation: &str) {
    EVALUATIONS_WRITTEN_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_reputation_created() {
    REPUTATIONS_CREATED_TOTAL.inc();
}

pub fn record_message_delivered() {
    MESSAGES_DELIVERED_TOTAL.inc();
}

pub fn record_propagation_hop() {
    PROPAGATION_HOPS_TOTAL.inc();
}

pub fn observe_propagation_depth(depth: usize) {
    PROPAGATION_DEPTH.observe(depth as f64);
}

pub fn record_error(kind: &str) {
    ENGINE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

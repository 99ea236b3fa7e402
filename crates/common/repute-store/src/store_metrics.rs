use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

use crate::StoreError;

lazy_static! {
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "repute_store_operations_total",
        "Total number of operations against the reputation store",
        &["backend", "operation", "status"]
    )
    .unwrap();

    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "repute_store_errors_total",
        "Total number of errors during reputation store operations",
        &["backend", "operation", "error_type"]
    )
    .unwrap();
}

/// Label for the error counter.
pub fn error_type_label(err: &StoreError) -> &'static str {
    match err {
        StoreError::Constraint(_) => "constraint",
        StoreError::NotFound { .. } => "not_found",
        StoreError::Backend(_) => "io",
    }
}

/// Counts one store operation and, on failure, its error class.
pub fn record<T>(backend: &str, operation: &str, result: &Result<T, StoreError>) {
    match result {
        Ok(_) => STORE_OPERATIONS_TOTAL
            .with_label_values(&[backend, operation, "success"])
            .inc(),
        Err(e) => {
            STORE_OPERATIONS_TOTAL
                .with_label_values(&[backend, operation, "error"])
                .inc();
            STORE_ERRORS_TOTAL
                .with_label_values(&[backend, operation, error_type_label(e)])
                .inc();
        }
    }
}

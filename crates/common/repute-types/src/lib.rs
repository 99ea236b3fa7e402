#![forbid(unsafe_code)]

pub mod aggregation;
pub mod entity;
pub mod error;
pub mod records;

pub use aggregation::Aggregation;
pub use entity::EntityRef;
pub use error::ConstraintViolation;
pub use records::{
    AuxData, Evaluation, Message, NewEvaluation, NewReputation, Reputation, SenderRef, SourceValue,
};

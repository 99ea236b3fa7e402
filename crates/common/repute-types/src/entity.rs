use serde::{Deserialize, Serialize};
use std::fmt;

/// Polymorphic reference to a host entity: the host type name plus its id.
///
/// Sources and targets of evaluations, and targets of reputations, are all
/// `EntityRef`s. The engine never owns host entities; it only remembers how
/// to point at them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: u64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Same id, different type. Used when a subtype is recorded under the
    /// ancestor type its reputation was declared on.
    pub fn with_type(&self, entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: self.id,
        }
    }

    pub fn is_type(&self, entity_type: &str) -> bool {
        self.entity_type == entity_type
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

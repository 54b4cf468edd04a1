//! Entity key model.
//!
//! # Invariants
//! - `entity_type` and `identifier` are never blank.
//! - Fields are private; an `Entity` cannot change after construction.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// `(type, identifier)` key of one row of tabular data.
///
/// Ordering is by type first, then identifier, which gives callers a stable
/// sort when they need deterministic output from a concurrent read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEntity", into = "RawEntity")]
pub struct Entity {
    entity_type: String,
    identifier: String,
}

impl Entity {
    /// Builds an entity key, rejecting blank parts.
    pub fn new(
        entity_type: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Result<Self, EntityValidationError> {
        let entity_type = entity_type.into();
        let identifier = identifier.into();
        if entity_type.trim().is_empty() {
            return Err(EntityValidationError::BlankType);
        }
        if identifier.trim().is_empty() {
            return Err(EntityValidationError::BlankIdentifier { entity_type });
        }
        Ok(Self {
            entity_type,
            identifier,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValidationError {
    BlankType,
    BlankIdentifier { entity_type: String },
}

impl Display for EntityValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankType => write!(f, "entity type must not be blank"),
            Self::BlankIdentifier { entity_type } => {
                write!(f, "entity identifier must not be blank (type `{entity_type}`)")
            }
        }
    }
}

impl Error for EntityValidationError {}

/// Wire shape used so deserialization goes through [`Entity::new`].
#[derive(Serialize, Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    entity_type: String,
    identifier: String,
}

impl TryFrom<RawEntity> for Entity {
    type Error = EntityValidationError;

    fn try_from(value: RawEntity) -> Result<Self, Self::Error> {
        Entity::new(value.entity_type, value.identifier)
    }
}

impl From<Entity> for RawEntity {
    fn from(value: Entity) -> Self {
        Self {
            entity_type: value.entity_type,
            identifier: value.identifier,
        }
    }
}

//! Error taxonomy for the costing engine

use thiserror::Error;

use crate::models::EntityKind;

pub type Result<T> = std::result::Result<T, CostingError>;

#[derive(Debug, Error)]
pub enum CostingError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
    #[error("Invalid cost: {0}")]
    InvalidCost(String),
    #[error("Invalid loss factor: {0}")]
    InvalidLossFactor(String),
    #[error("Unknown ingredient {0}")]
    UnknownIngredient(i64),
    #[error("Unknown composition item: {0}")]
    UnknownCompositionItem(String),
    #[error("Invalid composition item: {0}")]
    InvalidCompositionItem(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },
    #[error("Unit {unit} is not part of the {system} system")]
    UnitMismatch { unit: String, system: String },
    #[error("Still in use by: {}", names.join(", "))]
    Conflict { names: Vec<String> },
    #[error("Measure pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl CostingError {
    /// Names of the entities blocking a delete, if this is a conflict.
    pub fn blocking_names(&self) -> Option<&[String]> {
        match self {
            Self::Conflict { names } => Some(names),
            _ => None,
        }
    }
}

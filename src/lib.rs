//! Recipe costing for a confectionery back office.
//!
//! Turns purchase prices of ingredients and materials into per-unit costs,
//! aggregates them into base recipes, and from there into final products
//! with profit and margin. A usage index guards deletes of anything still
//! referenced.

pub mod catalog;
pub mod costing;
pub mod db;
pub mod error;
pub mod import;
pub mod integrity;
pub mod models;
pub mod store;
pub mod units;

pub use costing::{BaseCosting, ProductCosting, Snapshot};
pub use db::SqliteStore;
pub use error::{CostingError, Result};
pub use integrity::{DeleteCheck, UsageIndex};
pub use models::{BaseRecipe, BaseUnit, CompositionItem, EntityKind, FinalProduct, Ingredient, InputKind};
pub use store::CatalogStore;
pub use units::{DisplayUnit, MeasurementSystem};

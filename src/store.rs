//! Persistence boundary of the costing engine
//!
//! The engine never persists state itself. Callers fetch a snapshot through
//! a [`CatalogStore`], run the pure costing functions over it, and write the
//! recomputed derived fields back.

use crate::error::Result;
use crate::models::{BaseRecipe, EntityKind, FinalProduct, Ingredient};

pub trait CatalogStore {
    fn fetch_ingredients(&self) -> Result<Vec<Ingredient>>;

    /// Base recipes with their composition in stored order.
    fn fetch_bases(&self) -> Result<Vec<BaseRecipe>>;

    /// Final products with their composition in stored order.
    fn fetch_products(&self) -> Result<Vec<FinalProduct>>;

    /// Insert (no id) or update an input, returning it with its id.
    fn save_ingredient(&mut self, ingredient: &Ingredient) -> Result<Ingredient>;

    /// Insert or update a base recipe and replace its composition.
    fn save_base(&mut self, base: &BaseRecipe) -> Result<BaseRecipe>;

    /// Insert or update a product and replace its composition.
    fn save_product(&mut self, product: &FinalProduct) -> Result<FinalProduct>;

    /// Remove an entity unconditionally. Returns `false` if nothing matched.
    ///
    /// Use [`crate::catalog::delete_entity`] to delete with integrity checks.
    fn delete(&mut self, id: i64, kind: EntityKind) -> Result<bool>;
}

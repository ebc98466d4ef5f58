//! Catalog operations: validated saves, guarded deletes and recalculation
//!
//! These run the pure costing functions against a fresh snapshot from the
//! store and write the derived fields back, so the cached values in storage
//! only ever come from a recomputation.

use std::fmt;

use tracing::{debug, info, warn};

use crate::costing::{self, BaseCosting, ProductCosting, Snapshot};
use crate::error::{CostingError, Result};
use crate::integrity::{self, DeleteCheck};
use crate::models::{BaseRecipe, CompositionItem, EntityKind, FinalProduct, Ingredient, InputKind};
use crate::store::CatalogStore;

fn apply_product_costing(product: &mut FinalProduct, costing: &ProductCosting) {
    product.total_cost = costing.total_cost;
    product.profit = costing.profit;
    product.margin_percent = costing.margin_percent;
}

/// Names of the products listing input `id` directly in their composition.
fn products_using_input(snapshot: &Snapshot, id: i64) -> Vec<String> {
    snapshot
        .products()
        .iter()
        .filter(|p| {
            p.composition
                .iter()
                .any(|item| matches!(item, CompositionItem::Input { id: used, .. } if *used == id))
        })
        .map(|p| p.name.clone())
        .collect()
}

/// Validate an input, recompute its unit cost and persist it.
///
/// A material used directly by products cannot be turned into an
/// ingredient; that fails with [`CostingError::Conflict`] naming them.
pub fn save_ingredient<S: CatalogStore + ?Sized>(
    store: &mut S,
    mut ingredient: Ingredient,
) -> Result<Ingredient> {
    ingredient.unit_cost = costing::unit_cost(&ingredient)?;

    if let Some(id) = ingredient.id.filter(|_| ingredient.kind != InputKind::Material) {
        let snapshot = Snapshot::load(&*store)?;
        let was_material = snapshot.ingredient(id).is_some_and(|i| i.kind == InputKind::Material);
        let mut users = if was_material { products_using_input(&snapshot, id) } else { Vec::new() };
        if !users.is_empty() {
            users.sort();
            warn!(id, name = %ingredient.name, blocked_by = ?users, "kind change blocked");
            return Err(CostingError::Conflict { names: users });
        }
    }

    let saved = store.save_ingredient(&ingredient)?;
    info!(id = ?saved.id, name = %saved.name, unit_cost = saved.unit_cost, "saved input");
    Ok(saved)
}

/// Recompute a base recipe's total cost against the current catalog and persist it.
pub fn save_base<S: CatalogStore + ?Sized>(store: &mut S, mut base: BaseRecipe) -> Result<BaseRecipe> {
    let snapshot = Snapshot::load(&*store)?;
    base.total_cost = costing::base_costing(&snapshot, &base)?.total_cost;
    let saved = store.save_base(&base)?;
    info!(id = ?saved.id, name = %saved.name, total_cost = saved.total_cost, "saved base recipe");
    Ok(saved)
}

/// Recompute a product's cost, profit and margin against the current catalog and persist it.
pub fn save_product<S: CatalogStore + ?Sized>(
    store: &mut S,
    mut product: FinalProduct,
) -> Result<FinalProduct> {
    let snapshot = Snapshot::load(&*store)?;
    let costing = costing::product_costing(&snapshot, &product)?;
    apply_product_costing(&mut product, &costing);
    let saved = store.save_product(&product)?;
    info!(
        id = ?saved.id,
        name = %saved.name,
        total_cost = saved.total_cost,
        margin_percent = saved.margin_percent,
        "saved product"
    );
    Ok(saved)
}

/// Delete an entity unless something still references it.
///
/// Returns `Ok(false)` if there was nothing to delete and
/// [`CostingError::Conflict`] with the referencing names if blocked.
pub fn delete_entity<S: CatalogStore + ?Sized>(store: &mut S, id: i64, kind: EntityKind) -> Result<bool> {
    let snapshot = Snapshot::load(&*store)?;
    let index = integrity::build_usage_index(snapshot.bases(), snapshot.products());

    match integrity::can_delete(id, kind, &index) {
        DeleteCheck::Blocked { by } => {
            warn!(id, %kind, blocked_by = ?by, "delete blocked");
            Err(CostingError::Conflict { names: by })
        }
        DeleteCheck::Allowed => {
            let removed = store.delete(id, kind)?;
            info!(id, %kind, removed, "delete");
            Ok(removed)
        }
    }
}

/// Costing breakdown of a stored base recipe.
pub fn base_report<S: CatalogStore + ?Sized>(store: &S, id: i64) -> Result<(BaseRecipe, BaseCosting)> {
    let snapshot = Snapshot::load(&*store)?;
    let base = snapshot
        .base(id)
        .cloned()
        .ok_or(CostingError::NotFound { kind: EntityKind::BaseRecipe, id })?;
    let costing = costing::base_costing(&snapshot, &base)?;
    Ok((base, costing))
}

/// Costing breakdown of a stored product.
pub fn product_report<S: CatalogStore + ?Sized>(store: &S, id: i64) -> Result<(FinalProduct, ProductCosting)> {
    let snapshot = Snapshot::load(&*store)?;
    let product = snapshot
        .products()
        .iter()
        .find(|p| p.id == Some(id))
        .cloned()
        .ok_or(CostingError::NotFound { kind: EntityKind::Product, id })?;
    let costing = costing::product_costing(&snapshot, &product)?;
    Ok((product, costing))
}

/// Outcome of [`recalculate_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecalcReport {
    pub inputs: usize,
    pub bases: usize,
    pub products: usize,
    pub unchanged: usize,
    /// `(name, error)` of entities that could not be recomputed; their caches are left as they were
    pub failed: Vec<(String, String)>,
}

impl RecalcReport {
    fn record_failure(&mut self, kind: EntityKind, name: &str, err: CostingError) {
        warn!(%kind, name, error = %err, "recalculation skipped");
        self.failed.push((name.to_string(), err.to_string()));
    }
}

impl fmt::Display for RecalcReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Updated {} inputs, {} base recipes, {} products. Unchanged: {}",
            self.inputs, self.bases, self.products, self.unchanged
        )?;
        if !self.failed.is_empty() {
            write!(f, ". Failed: {}", self.failed.len())?;
        }
        Ok(())
    }
}

/// Recompute every cached derived value, inputs first, and write back those
/// that changed.
///
/// Every entity is costed against the same snapshot. One that cannot be
/// costed is recorded in [`RecalcReport::failed`] and skipped; the others
/// are still written. Only storage errors abort.
pub fn recalculate_all<S: CatalogStore + ?Sized>(store: &mut S) -> Result<RecalcReport> {
    let mut report = RecalcReport::default();

    let mut ingredients = store.fetch_ingredients()?;
    for ingredient in &mut ingredients {
        let fresh = match costing::unit_cost(ingredient) {
            Ok(cost) => cost,
            Err(e) => {
                report.record_failure(EntityKind::Input, &ingredient.name, e);
                continue;
            }
        };
        if fresh != ingredient.unit_cost {
            debug!(name = %ingredient.name, old = ingredient.unit_cost, new = fresh, "unit cost changed");
            ingredient.unit_cost = fresh;
            store.save_ingredient(ingredient)?;
            report.inputs += 1;
        } else {
            report.unchanged += 1;
        }
    }

    let bases = store.fetch_bases()?;
    let products = store.fetch_products()?;
    let snapshot = Snapshot::new(ingredients, bases.clone(), products.clone());

    for mut base in bases {
        let fresh = match costing::base_costing(&snapshot, &base) {
            Ok(costing) => costing.total_cost,
            Err(e) => {
                report.record_failure(EntityKind::BaseRecipe, &base.name, e);
                continue;
            }
        };
        if fresh != base.total_cost {
            debug!(name = %base.name, old = base.total_cost, new = fresh, "base cost changed");
            base.total_cost = fresh;
            store.save_base(&base)?;
            report.bases += 1;
        } else {
            report.unchanged += 1;
        }
    }

    for mut product in products {
        let costing = match costing::product_costing(&snapshot, &product) {
            Ok(costing) => costing,
            Err(e) => {
                report.record_failure(EntityKind::Product, &product.name, e);
                continue;
            }
        };
        let changed = costing.total_cost != product.total_cost
            || costing.profit != product.profit
            || costing.margin_percent != product.margin_percent;
        if changed {
            debug!(name = %product.name, old = product.total_cost, new = costing.total_cost, "product cost changed");
            apply_product_costing(&mut product, &costing);
            store.save_product(&product)?;
            report.products += 1;
        } else {
            report.unchanged += 1;
        }
    }

    if report.failed.is_empty() {
        info!(%report, "recalculated catalog");
    } else {
        warn!(%report, "recalculated catalog with failures");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::BaseUnit;

    const TOLERANCE: f64 = 1e-9;

    fn input(name: &str, kind: InputKind, quantity: f64, cost: f64, loss: f64) -> Ingredient {
        Ingredient {
            id: None,
            name: name.to_string(),
            kind,
            quantity,
            base_unit: BaseUnit::Grams,
            average_cost: cost,
            loss_factor: loss,
            unit_cost: 0.0,
        }
    }

    struct Fixture {
        store: SqliteStore,
        cocoa: Ingredient,
        packaging: Ingredient,
        dough: BaseRecipe,
        cake: FinalProduct,
    }

    fn fixture() -> Fixture {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let cocoa = save_ingredient(
            &mut store,
            input("Cacau", InputKind::Ingredient, 1000.0, 19.0, 2.0),
        )
        .unwrap();
        let packaging = save_ingredient(&mut store, input("Caixa", InputKind::Material, 10.0, 25.0, 0.0)).unwrap();

        let dough = save_base(
            &mut store,
            BaseRecipe {
                id: None,
                name: "Massa de Chocolate".to_string(),
                loss_factor: 10.0,
                yield_quantity: None,
                yield_unit: None,
                composition: vec![CompositionItem::Input { id: cocoa.id.unwrap(), quantity: 500.0 }],
                total_cost: 0.0,
            },
        )
        .unwrap();

        let cake = save_product(
            &mut store,
            FinalProduct {
                id: None,
                name: "Bolo de Chocolate".to_string(),
                category: Some("Bolos".to_string()),
                loss_factor: 0.0,
                selling_price: Some(50.0),
                composition: vec![
                    CompositionItem::BaseRecipe { id: dough.id.unwrap(), quantity: 2.0 },
                    CompositionItem::Input { id: packaging.id.unwrap(), quantity: 1.0 },
                ],
                total_cost: 0.0,
                profit: None,
                margin_percent: 0.0,
            },
        )
        .unwrap();

        Fixture { store, cocoa, packaging, dough, cake }
    }

    #[test]
    fn saves_store_derived_values() {
        let f = fixture();
        assert!((f.cocoa.unit_cost - 0.01938).abs() < TOLERANCE);
        assert!((f.dough.total_cost - 500.0 * 0.01938 * 1.1).abs() < TOLERANCE);

        let expected = 2.0 * f.dough.total_cost + 2.5;
        assert!((f.cake.total_cost - expected).abs() < TOLERANCE);
        assert!((f.cake.profit.unwrap() - (50.0 - expected)).abs() < TOLERANCE);
    }

    #[test]
    fn stored_unit_cost_is_ignored_on_save() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut sugar = input("Açúcar", InputKind::Ingredient, 1000.0, 5.0, 0.0);
        sugar.unit_cost = 42.0;
        let saved = save_ingredient(&mut store, sugar).unwrap();
        assert!((saved.unit_cost - 0.005).abs() < TOLERANCE);
    }

    #[test]
    fn invalid_input_is_not_persisted() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = save_ingredient(&mut store, input("Ovo", InputKind::Ingredient, 0.0, 10.0, 0.0)).unwrap_err();
        assert!(matches!(err, CostingError::InvalidQuantity(_)));
        assert!(store.fetch_ingredients().unwrap().is_empty());
    }

    #[test]
    fn delete_blocked_until_reference_removed() {
        let mut f = fixture();
        let cocoa_id = f.cocoa.id.unwrap();

        let err = delete_entity(&mut f.store, cocoa_id, EntityKind::Input).unwrap_err();
        assert_eq!(err.blocking_names(), Some(&["Massa de Chocolate".to_string()][..]));

        let mut dough = f.dough.clone();
        dough.composition.clear();
        save_base(&mut f.store, dough).unwrap();

        assert!(delete_entity(&mut f.store, cocoa_id, EntityKind::Input).unwrap());
        assert!(f.store.fetch_ingredients().unwrap().iter().all(|i| i.id != Some(cocoa_id)));
    }

    #[test]
    fn base_used_by_product_cannot_be_deleted() {
        let mut f = fixture();
        let err = delete_entity(&mut f.store, f.dough.id.unwrap(), EntityKind::BaseRecipe).unwrap_err();
        assert_eq!(err.blocking_names(), Some(&["Bolo de Chocolate".to_string()][..]));

        assert!(delete_entity(&mut f.store, f.cake.id.unwrap(), EntityKind::Product).unwrap());
        assert!(delete_entity(&mut f.store, f.dough.id.unwrap(), EntityKind::BaseRecipe).unwrap());
    }

    #[test]
    fn material_used_by_product_cannot_be_deleted() {
        let mut f = fixture();
        let packaging_id = f.packaging.id.unwrap();

        let err = delete_entity(&mut f.store, packaging_id, EntityKind::Input).unwrap_err();
        assert_eq!(err.blocking_names(), Some(&["Bolo de Chocolate".to_string()][..]));
        assert!(product_report(&f.store, f.cake.id.unwrap()).is_ok());

        assert!(delete_entity(&mut f.store, f.cake.id.unwrap(), EntityKind::Product).unwrap());
        assert!(delete_entity(&mut f.store, packaging_id, EntityKind::Input).unwrap());
    }

    #[test]
    fn material_used_by_product_keeps_its_kind() {
        let mut f = fixture();
        let mut packaging = f.packaging.clone();
        packaging.kind = InputKind::Ingredient;

        let err = save_ingredient(&mut f.store, packaging).unwrap_err();
        assert_eq!(err.blocking_names(), Some(&["Bolo de Chocolate".to_string()][..]));
        let stored = f.store.fetch_ingredients().unwrap();
        let stored = stored.iter().find(|i| i.id == f.packaging.id).unwrap();
        assert_eq!(stored.kind, InputKind::Material);

        // unused materials may still change kind
        let mut ribbon = save_ingredient(&mut f.store, input("Fita", InputKind::Material, 100.0, 8.0, 0.0)).unwrap();
        ribbon.kind = InputKind::Ingredient;
        assert_eq!(save_ingredient(&mut f.store, ribbon).unwrap().kind, InputKind::Ingredient);
    }

    #[test]
    fn recalculation_skips_uncostable_products() {
        let mut f = fixture();

        let mut twin = f.cake.clone();
        twin.id = None;
        twin.name = "Z bolo".to_string();
        save_product(&mut f.store, twin).unwrap();

        // stored directly, skipping validation
        let broken = FinalProduct {
            id: None,
            name: "M caixa".to_string(),
            category: None,
            loss_factor: 0.0,
            selling_price: Some(10.0),
            composition: vec![CompositionItem::Input { id: 999, quantity: 1.0 }],
            total_cost: 0.0,
            profit: None,
            margin_percent: 0.0,
        };
        f.store.save_product(&broken).unwrap();

        let mut cocoa = f.cocoa.clone();
        cocoa.average_cost = 38.0;
        save_ingredient(&mut f.store, cocoa).unwrap();

        let report = recalculate_all(&mut f.store).unwrap();
        assert_eq!(report.bases, 1);
        assert_eq!(report.products, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "M caixa");
        assert!(report.failed[0].1.starts_with("Unknown composition item"));
        assert!(report.to_string().ends_with("Failed: 1"));

        let products = f.store.fetch_products().unwrap();
        let cost_of = |name: &str| products.iter().find(|p| p.name == name).unwrap().total_cost;
        assert!(cost_of("Bolo de Chocolate") > f.cake.total_cost);
        assert!((cost_of("Bolo de Chocolate") - cost_of("Z bolo")).abs() < TOLERANCE);
        assert_eq!(cost_of("M caixa"), 0.0);
    }

    #[test]
    fn price_change_propagates_through_both_levels() {
        let mut f = fixture();
        let old_cake_cost = f.cake.total_cost;

        let mut cocoa = f.cocoa.clone();
        cocoa.average_cost = 38.0;
        save_ingredient(&mut f.store, cocoa).unwrap();

        // stale caches until recomputation is invoked
        let (_, costing) = product_report(&f.store, f.cake.id.unwrap()).unwrap();
        let expected_base = 500.0 * (38.0 / 1000.0 * 1.02) * 1.1;
        assert!((costing.total_cost - (2.0 * expected_base + 2.5)).abs() < TOLERANCE);

        let report = recalculate_all(&mut f.store).unwrap();
        assert_eq!(report.bases, 1);
        assert_eq!(report.products, 1);

        let bases = f.store.fetch_bases().unwrap();
        assert!((bases[0].total_cost - expected_base).abs() < TOLERANCE);
        let products = f.store.fetch_products().unwrap();
        assert!(products[0].total_cost > old_cake_cost);
        assert!((products[0].total_cost - costing.total_cost).abs() < TOLERANCE);

        let again = recalculate_all(&mut f.store).unwrap();
        assert_eq!(again.inputs + again.bases + again.products, 0);
        assert!(again.failed.is_empty());
    }

    #[test]
    fn nested_base_is_rejected_on_save() {
        let mut f = fixture();
        let err = save_base(
            &mut f.store,
            BaseRecipe {
                id: None,
                name: "Camada dupla".to_string(),
                loss_factor: 0.0,
                yield_quantity: None,
                yield_unit: None,
                composition: vec![CompositionItem::BaseRecipe { id: f.dough.id.unwrap(), quantity: 1.0 }],
                total_cost: 0.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CostingError::InvalidCompositionItem(_)));
    }

    #[test]
    fn missing_report_target_is_not_found() {
        let f = fixture();
        assert!(matches!(
            product_report(&f.store, 999),
            Err(CostingError::NotFound { kind: EntityKind::Product, id: 999 })
        ));
    }
}

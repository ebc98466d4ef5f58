//! Cost aggregation from purchase prices up to final product margins
//!
//! Everything here is a pure function of a [`Snapshot`]. Cached derived
//! fields on the models (`unit_cost`, `total_cost`, ...) are never read;
//! every figure is recomputed from source fields so a changed purchase price
//! propagates through both composition levels.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{CostingError, Result};
use crate::models::{BaseRecipe, CompositionItem, FinalProduct, Ingredient, InputKind};
use crate::store::CatalogStore;

/// A consistent view of the catalog that costing runs against.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    ingredients: BTreeMap<i64, Ingredient>,
    bases: BTreeMap<i64, BaseRecipe>,
    products: Vec<FinalProduct>,
}

impl Snapshot {
    /// Build a snapshot. Entities without an id have never been persisted and
    /// cannot be referenced, so they are left out of the lookup tables.
    pub fn new(
        ingredients: Vec<Ingredient>,
        bases: Vec<BaseRecipe>,
        products: Vec<FinalProduct>,
    ) -> Self {
        Self {
            ingredients: ingredients
                .into_iter()
                .filter_map(|i| i.id.map(|id| (id, i)))
                .collect(),
            bases: bases
                .into_iter()
                .filter_map(|b| b.id.map(|id| (id, b)))
                .collect(),
            products,
        }
    }

    /// Fetch the whole catalog from the store.
    pub fn load<S: CatalogStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(Self::new(
            store.fetch_ingredients()?,
            store.fetch_bases()?,
            store.fetch_products()?,
        ))
    }

    pub fn ingredient(&self, id: i64) -> Option<&Ingredient> {
        self.ingredients.get(&id)
    }

    pub fn base(&self, id: i64) -> Option<&BaseRecipe> {
        self.bases.get(&id)
    }

    pub fn ingredients(&self) -> impl Iterator<Item = &Ingredient> {
        self.ingredients.values()
    }

    pub fn bases(&self) -> impl Iterator<Item = &BaseRecipe> {
        self.bases.values()
    }

    pub fn products(&self) -> &[FinalProduct] {
        &self.products
    }
}

fn check_loss_factor(loss_factor: f64, owner: &str) -> Result<()> {
    if !loss_factor.is_finite() || loss_factor < 0.0 {
        return Err(CostingError::InvalidLossFactor(format!(
            "{owner}: {loss_factor}"
        )));
    }
    Ok(())
}

fn check_line_quantity(quantity: f64, owner: &str, item: &CompositionItem) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(CostingError::InvalidQuantity(format!(
            "{owner}: line {} {} has quantity {quantity}",
            item.item_type(),
            item.id()
        )));
    }
    Ok(())
}

fn with_loss(subtotal: f64, loss_factor: f64) -> f64 {
    subtotal * (1.0 + loss_factor / 100.0)
}

/// Cost per canonical unit of an input, loss included.
///
/// `(average_cost / quantity) * (1 + loss_factor / 100)`
pub fn unit_cost(ingredient: &Ingredient) -> Result<f64> {
    if !ingredient.quantity.is_finite() || ingredient.quantity <= 0.0 {
        return Err(CostingError::InvalidQuantity(format!(
            "{}: {}",
            ingredient.name, ingredient.quantity
        )));
    }
    if !ingredient.average_cost.is_finite() || ingredient.average_cost < 0.0 {
        return Err(CostingError::InvalidCost(format!(
            "{}: {}",
            ingredient.name, ingredient.average_cost
        )));
    }
    check_loss_factor(ingredient.loss_factor, &ingredient.name)?;

    Ok(with_loss(
        ingredient.average_cost / ingredient.quantity,
        ingredient.loss_factor,
    ))
}

/// Cost of one composition line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineCost {
    pub item: CompositionItem,
    pub name: String,
    /// Cost per unit of `item.quantity()`
    pub unit_cost: f64,
    pub cost: f64,
    /// Breakdown of the referenced base, for base recipe lines
    pub base: Option<Box<BaseCosting>>,
}

/// Result of aggregating a base recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseCosting {
    pub name: String,
    pub lines: Vec<LineCost>,
    pub subtotal: f64,
    pub total_cost: f64,
}

/// Recompute a base recipe's total cost from its ingredients.
///
/// Base recipes only hold inputs; a nested base recipe is rejected.
pub fn base_costing(snapshot: &Snapshot, base: &BaseRecipe) -> Result<BaseCosting> {
    check_loss_factor(base.loss_factor, &base.name)?;

    let mut lines = Vec::with_capacity(base.composition.len());
    for item in &base.composition {
        let CompositionItem::Input { id, quantity } = *item else {
            return Err(CostingError::InvalidCompositionItem(format!(
                "base recipe '{}' cannot contain base recipe {}",
                base.name,
                item.id()
            )));
        };
        check_line_quantity(quantity, &base.name, item)?;

        let ingredient = snapshot
            .ingredient(id)
            .ok_or(CostingError::UnknownIngredient(id))?;
        let per_unit = unit_cost(ingredient)?;

        lines.push(LineCost {
            item: *item,
            name: ingredient.name.clone(),
            unit_cost: per_unit,
            cost: quantity * per_unit,
            base: None,
        });
    }

    let subtotal: f64 = lines.iter().map(|l| l.cost).sum();
    let total_cost = with_loss(subtotal, base.loss_factor);
    debug!(base = %base.name, subtotal, total_cost, "recomputed base recipe");

    Ok(BaseCosting {
        name: base.name.clone(),
        lines,
        subtotal,
        total_cost,
    })
}

/// Result of aggregating a final product.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductCosting {
    pub name: String,
    pub lines: Vec<LineCost>,
    pub subtotal: f64,
    pub total_cost: f64,
    pub selling_price: Option<f64>,
    /// `None` while the product has no selling price
    pub profit: Option<f64>,
    /// 0 when there is no positive selling price
    pub margin_percent: f64,
}

/// Profit and margin for a total cost at an optional selling price.
pub fn profit_and_margin(total_cost: f64, selling_price: Option<f64>) -> (Option<f64>, f64) {
    match selling_price {
        Some(price) => {
            let profit = price - total_cost;
            let margin = if price > 0.0 { profit / price * 100.0 } else { 0.0 };
            (Some(profit), margin)
        }
        None => (None, 0.0),
    }
}

/// Recompute a final product's total cost, profit and margin.
///
/// A base recipe line costs `quantity * base.total_cost`: quantity counts
/// batches of the base, independent of the base's declared yield.
pub fn product_costing(snapshot: &Snapshot, product: &FinalProduct) -> Result<ProductCosting> {
    check_loss_factor(product.loss_factor, &product.name)?;
    if let Some(price) = product.selling_price {
        if !price.is_finite() || price < 0.0 {
            return Err(CostingError::InvalidCost(format!(
                "{}: selling price {price}",
                product.name
            )));
        }
    }

    let mut lines = Vec::with_capacity(product.composition.len());
    for item in &product.composition {
        check_line_quantity(item.quantity(), &product.name, item)?;

        let line = match *item {
            CompositionItem::Input { id, quantity } => {
                let material = snapshot
                    .ingredient(id)
                    .filter(|i| i.kind == InputKind::Material)
                    .ok_or_else(|| {
                        CostingError::UnknownCompositionItem(format!(
                            "{}: material {id}",
                            product.name
                        ))
                    })?;
                let per_unit = unit_cost(material)?;
                LineCost {
                    item: *item,
                    name: material.name.clone(),
                    unit_cost: per_unit,
                    cost: quantity * per_unit,
                    base: None,
                }
            }
            CompositionItem::BaseRecipe { id, quantity } => {
                let base = snapshot.base(id).ok_or_else(|| {
                    CostingError::UnknownCompositionItem(format!(
                        "{}: base recipe {id}",
                        product.name
                    ))
                })?;
                let costing = base_costing(snapshot, base)?;
                LineCost {
                    item: *item,
                    name: base.name.clone(),
                    unit_cost: costing.total_cost,
                    cost: quantity * costing.total_cost,
                    base: Some(Box::new(costing)),
                }
            }
        };
        lines.push(line);
    }

    let subtotal: f64 = lines.iter().map(|l| l.cost).sum();
    let total_cost = with_loss(subtotal, product.loss_factor);
    let (profit, margin_percent) = profit_and_margin(total_cost, product.selling_price);
    debug!(product = %product.name, total_cost, margin_percent, "recomputed product");

    Ok(ProductCosting {
        name: product.name.clone(),
        lines,
        subtotal,
        total_cost,
        selling_price: product.selling_price,
        profit,
        margin_percent,
    })
}

/// Cost of one unit of a base's declared yield. Informational only; product
/// costing multiplies by the whole batch cost.
pub fn cost_per_yield_unit(total_cost: f64, yield_quantity: Option<f64>) -> Option<f64> {
    yield_quantity
        .filter(|y| y.is_finite() && *y > 0.0)
        .map(|y| total_cost / y)
}

/// Selling price that achieves `target_margin_percent` over `total_cost`.
pub fn suggested_price(total_cost: f64, target_margin_percent: f64) -> Option<f64> {
    if !(0.0..100.0).contains(&target_margin_percent) {
        return None;
    }
    Some(total_cost / (1.0 - target_margin_percent / 100.0))
}

/// Format a costing breakdown as an indented tree
pub fn format_breakdown(lines: &[LineCost], indent: usize) -> String {
    let mut output = String::new();
    let prefix = "  ".repeat(indent);

    for line in lines {
        output.push_str(&format!(
            "{}{} x {} @ {:.4} = {:.2}\n",
            prefix,
            line.item.quantity(),
            line.name,
            line.unit_cost,
            line.cost
        ));
        if let Some(base) = &line.base {
            output.push_str(&format_breakdown(&base.lines, indent + 2));
        }
    }

    output
}

impl fmt::Display for BaseCosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.name)?;
        writeln!(f, "Lines:         {}", self.lines.len())?;
        writeln!(f, "Subtotal:      {:.2}", self.subtotal)?;
        writeln!(f, "Total cost:    {:.2}", self.total_cost)
    }
}

impl fmt::Display for ProductCosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.name)?;
        writeln!(f, "Subtotal:      {:.2}", self.subtotal)?;
        writeln!(f, "Total cost:    {:.2}", self.total_cost)?;
        match (self.selling_price, self.profit) {
            (Some(price), Some(profit)) => {
                writeln!(f, "Selling price: {:.2}", price)?;
                writeln!(f, "Profit:        {:.2}", profit)?;
            }
            _ => writeln!(f, "Selling price: unset")?,
        }
        writeln!(f, "Margin:        {:.2}%", self.margin_percent)
    }
}

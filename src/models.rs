//! Data models for purchasable inputs, base recipes and final products

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CostingError;

/// Whether a purchasable input goes into recipes or into packaging/assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Ingredient,
    Material,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingredient => "ingredient",
            Self::Material => "material",
        }
    }
}

impl FromStr for InputKind {
    type Err = CostingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingredient" => Ok(Self::Ingredient),
            "material" => Ok(Self::Material),
            other => Err(CostingError::InvalidValue(format!(
                "unknown input kind '{other}'"
            ))),
        }
    }
}

/// Canonical small unit every stored quantity is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseUnit {
    Grams,
    Milliliters,
    Units,
}

impl BaseUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grams => "grams",
            Self::Milliliters => "milliliters",
            Self::Units => "units",
        }
    }
}

impl fmt::Display for BaseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseUnit {
    type Err = CostingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grams" | "g" => Ok(Self::Grams),
            "milliliters" | "ml" => Ok(Self::Milliliters),
            "units" | "un" => Ok(Self::Units),
            other => Err(CostingError::InvalidValue(format!(
                "unknown base unit '{other}'"
            ))),
        }
    }
}

/// A purchasable raw input (ingredient or material).
///
/// `unit_cost` is a cache of [`crate::costing::unit_cost`]; it is overwritten
/// on every save and never read back as a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub kind: InputKind,
    /// Purchased quantity, in `base_unit`
    pub quantity: f64,
    pub base_unit: BaseUnit,
    /// Total price paid for `quantity`
    pub average_cost: f64,
    /// Percentage, >= 0
    #[serde(default)]
    pub loss_factor: f64,
    #[serde(default)]
    pub unit_cost: f64,
}

/// One line of a bill of materials.
///
/// Base recipes may only hold `Input` lines; final products may hold both,
/// with `Input` restricted to materials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum CompositionItem {
    #[serde(rename = "material")]
    Input { id: i64, quantity: f64 },
    BaseRecipe { id: i64, quantity: f64 },
}

impl CompositionItem {
    pub const INPUT_TAG: &'static str = "material";
    pub const BASE_RECIPE_TAG: &'static str = "base_recipe";

    pub fn id(&self) -> i64 {
        match *self {
            Self::Input { id, .. } | Self::BaseRecipe { id, .. } => id,
        }
    }

    pub fn quantity(&self) -> f64 {
        match *self {
            Self::Input { quantity, .. } | Self::BaseRecipe { quantity, .. } => quantity,
        }
    }

    pub fn item_type(&self) -> &'static str {
        match self {
            Self::Input { .. } => Self::INPUT_TAG,
            Self::BaseRecipe { .. } => Self::BASE_RECIPE_TAG,
        }
    }

    /// Rebuild an item from its stored `(item_type, item_id, quantity)` columns.
    pub fn from_parts(item_type: &str, id: i64, quantity: f64) -> Result<Self, CostingError> {
        match item_type {
            Self::INPUT_TAG => Ok(Self::Input { id, quantity }),
            Self::BASE_RECIPE_TAG => Ok(Self::BaseRecipe { id, quantity }),
            other => Err(CostingError::InvalidCompositionItem(format!(
                "unknown item type '{other}' for item {id}"
            ))),
        }
    }
}

/// A prepared intermediate (dough, filling, frosting...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRecipe {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub loss_factor: f64,
    #[serde(default)]
    pub yield_quantity: Option<f64>,
    #[serde(default)]
    pub yield_unit: Option<String>,
    #[serde(default)]
    pub composition: Vec<CompositionItem>,
    /// Cached result of the last recomputation
    #[serde(default)]
    pub total_cost: f64,
}

/// A sellable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalProduct {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub loss_factor: f64,
    #[serde(default)]
    pub selling_price: Option<f64>,
    #[serde(default)]
    pub composition: Vec<CompositionItem>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub profit: Option<f64>,
    #[serde(default)]
    pub margin_percent: f64,
}

/// Kind of catalog entity, used to address deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum EntityKind {
    Input,
    BaseRecipe,
    Product,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::BaseRecipe => "base recipe",
            Self::Product => "product",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_item_parts() {
        let item = CompositionItem::from_parts("base_recipe", 7, 2.0).unwrap();
        assert_eq!(item, CompositionItem::BaseRecipe { id: 7, quantity: 2.0 });
        assert_eq!(item.item_type(), "base_recipe");
        assert_eq!(item.id(), 7);

        let err = CompositionItem::from_parts("recipe", 7, 2.0).unwrap_err();
        assert!(matches!(err, CostingError::InvalidCompositionItem(_)));
    }

    #[test]
    fn composition_item_json_tag() {
        let json = r#"[{"item_type":"material","id":3,"quantity":1.0},
                       {"item_type":"base_recipe","id":4,"quantity":0.5}]"#;
        let items: Vec<CompositionItem> = serde_json::from_str(json).unwrap();
        assert_eq!(
            items,
            vec![
                CompositionItem::Input { id: 3, quantity: 1.0 },
                CompositionItem::BaseRecipe { id: 4, quantity: 0.5 },
            ]
        );
    }

    #[test]
    fn base_unit_parsing() {
        assert_eq!("g".parse::<BaseUnit>().unwrap(), BaseUnit::Grams);
        assert_eq!("milliliters".parse::<BaseUnit>().unwrap(), BaseUnit::Milliliters);
        let err = "kg".parse::<BaseUnit>().unwrap_err();
        assert!(matches!(err, CostingError::InvalidValue(_)));
    }

    #[test]
    fn input_kind_parsing() {
        assert_eq!("material".parse::<InputKind>().unwrap(), InputKind::Material);
        let err = "packaging".parse::<InputKind>().unwrap_err();
        assert!(matches!(err, CostingError::InvalidValue(_)));
        assert_eq!(err.to_string(), "Invalid value: unknown input kind 'packaging'");
    }
}

//! Bulk import of catalog files
//!
//! Walks a directory for `*.json` catalog files and saves their contents
//! through the catalog operations, so every derived cost is computed on the
//! way in. Entries reference each other by name; names resolve against the
//! file being imported and everything already stored.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::catalog;
use crate::models::{BaseRecipe, BaseUnit, CompositionItem, FinalProduct, Ingredient, InputKind};
use crate::store::CatalogStore;
use crate::units::canonical_measure;

/// A quantity written either as a bare canonical number or as a measure
/// string such as `"1,5 kg"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Measure(String),
}

impl Amount {
    /// Canonical value, checked against the unit the value must be stored in.
    fn canonical(&self, expected: Option<BaseUnit>) -> Result<(f64, Option<BaseUnit>)> {
        match self {
            Self::Number(value) => Ok((*value, expected)),
            Self::Measure(text) => {
                let (value, unit) = canonical_measure(text)?;
                if let Some(expected) = expected {
                    if expected != unit {
                        bail!("'{text}' is not measured in {expected}");
                    }
                }
                Ok((value, Some(unit)))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InputEntry {
    pub name: String,
    pub kind: InputKind,
    /// Purchased amount; a bare number needs `base_unit`
    pub purchase: Amount,
    #[serde(default)]
    pub base_unit: Option<BaseUnit>,
    pub average_cost: f64,
    #[serde(default)]
    pub loss_factor: f64,
}

#[derive(Debug, Deserialize)]
pub struct BaseLine {
    pub input: String,
    pub quantity: Amount,
}

#[derive(Debug, Deserialize)]
pub struct BaseEntry {
    pub name: String,
    #[serde(default)]
    pub loss_factor: f64,
    #[serde(default)]
    pub yield_quantity: Option<f64>,
    #[serde(default)]
    pub yield_unit: Option<String>,
    #[serde(default)]
    pub items: Vec<BaseLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductLine {
    Material { name: String, quantity: Amount },
    /// `batches` of the named base recipe
    BaseRecipe { name: String, batches: f64 },
}

#[derive(Debug, Deserialize)]
pub struct ProductEntry {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub loss_factor: f64,
    #[serde(default)]
    pub selling_price: Option<f64>,
    #[serde(default)]
    pub items: Vec<ProductLine>,
}

/// Contents of one catalog file
#[derive(Debug, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub inputs: Vec<InputEntry>,
    #[serde(default)]
    pub bases: Vec<BaseEntry>,
    #[serde(default)]
    pub products: Vec<ProductEntry>,
}

/// Find all catalog files under `dir`
pub fn find_catalog_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn input_ids<S: CatalogStore + ?Sized>(store: &S) -> Result<HashMap<String, (i64, InputKind, BaseUnit)>> {
    Ok(store
        .fetch_ingredients()?
        .into_iter()
        .filter_map(|i| i.id.map(|id| (i.name, (id, i.kind, i.base_unit))))
        .collect())
}

fn base_ids<S: CatalogStore + ?Sized>(store: &S) -> Result<HashMap<String, i64>> {
    Ok(store
        .fetch_bases()?
        .into_iter()
        .filter_map(|b| b.id.map(|id| (b.name, id)))
        .collect())
}

/// Save the contents of one parsed catalog file
pub fn import_catalog<S: CatalogStore + ?Sized>(store: &mut S, file: CatalogFile) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    for entry in file.inputs {
        let (quantity, unit) = entry.purchase.canonical(entry.base_unit)?;
        let base_unit = unit.ok_or_else(|| anyhow!("input '{}' needs a base_unit", entry.name))?;
        catalog::save_ingredient(
            store,
            Ingredient {
                id: None,
                name: entry.name.clone(),
                kind: entry.kind,
                quantity,
                base_unit,
                average_cost: entry.average_cost,
                loss_factor: entry.loss_factor,
                unit_cost: 0.0,
            },
        )
        .with_context(|| format!("input '{}'", entry.name))?;
        stats.inputs += 1;
    }

    let inputs = input_ids(&*store)?;
    for entry in file.bases {
        let mut composition = Vec::with_capacity(entry.items.len());
        for line in &entry.items {
            let &(id, _, unit) = inputs
                .get(&line.input)
                .ok_or_else(|| anyhow!("base '{}': unknown input '{}'", entry.name, line.input))?;
            let (quantity, _) = line.quantity.canonical(Some(unit))?;
            composition.push(CompositionItem::Input { id, quantity });
        }

        catalog::save_base(
            store,
            BaseRecipe {
                id: None,
                name: entry.name.clone(),
                loss_factor: entry.loss_factor,
                yield_quantity: entry.yield_quantity,
                yield_unit: entry.yield_unit,
                composition,
                total_cost: 0.0,
            },
        )
        .with_context(|| format!("base recipe '{}'", entry.name))?;
        stats.bases += 1;
    }

    let bases = base_ids(&*store)?;
    for entry in file.products {
        let mut composition = Vec::with_capacity(entry.items.len());
        for line in &entry.items {
            let item = match line {
                ProductLine::Material { name, quantity } => {
                    let &(id, _, unit) = inputs
                        .get(name)
                        .filter(|(_, kind, _)| *kind == InputKind::Material)
                        .ok_or_else(|| anyhow!("product '{}': unknown material '{name}'", entry.name))?;
                    let (quantity, _) = quantity.canonical(Some(unit))?;
                    CompositionItem::Input { id, quantity }
                }
                ProductLine::BaseRecipe { name, batches } => {
                    let id = *bases
                        .get(name)
                        .ok_or_else(|| anyhow!("product '{}': unknown base recipe '{name}'", entry.name))?;
                    CompositionItem::BaseRecipe { id, quantity: *batches }
                }
            };
            composition.push(item);
        }

        catalog::save_product(
            store,
            FinalProduct {
                id: None,
                name: entry.name.clone(),
                category: entry.category,
                loss_factor: entry.loss_factor,
                selling_price: entry.selling_price,
                composition,
                total_cost: 0.0,
                profit: None,
                margin_percent: 0.0,
            },
        )
        .with_context(|| format!("product '{}'", entry.name))?;
        stats.products += 1;
    }

    Ok(stats)
}

/// Import every catalog file found under `dir`.
///
/// A file that fails to parse or references unknown names is counted as an
/// error; entries it saved before the failure stay in the catalog.
pub fn import_directory<S: CatalogStore + ?Sized>(store: &mut S, dir: &Path) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    info!(dir = %dir.display(), "scanning for catalog files");
    let files = find_catalog_files(dir)?;
    info!(count = files.len(), "found catalog files");

    for path in &files {
        let parsed = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .and_then(|content| {
                serde_json::from_str::<CatalogFile>(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))
            });

        let file = match parsed {
            Ok(file) => file,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping catalog file");
                stats.skipped += 1;
                continue;
            }
        };

        match import_catalog(store, file) {
            Ok(imported) => {
                info!(file = %path.display(), %imported, "imported");
                stats.merge(&imported);
            }
            Err(e) => {
                warn!(file = %path.display(), error = ?e, "import failed");
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub inputs: usize,
    pub bases: usize,
    pub products: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ImportStats {
    fn merge(&mut self, other: &ImportStats) {
        self.inputs += other.inputs;
        self.bases += other.bases;
        self.products += other.products;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Imported {} inputs, {} base recipes, {} products. Skipped: {}, Errors: {}",
            self.inputs, self.bases, self.products, self.skipped, self.errors
        )
    }
}

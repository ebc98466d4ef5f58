//! Confectionery costing CLI
//!
//! Maintains the ingredient/recipe/product catalog in SQLite and reports
//! costs and margins.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use confectionery_costing::costing::{cost_per_yield_unit, format_breakdown, suggested_price};
use confectionery_costing::units::{self, canonical_measure, from_canonical};
use confectionery_costing::{
    catalog, import, BaseRecipe, BaseUnit, CatalogStore, CompositionItem, EntityKind, FinalProduct,
    Ingredient, InputKind, MeasurementSystem, SqliteStore,
};

#[derive(Parser)]
#[command(name = "confectionery-costing")]
#[command(about = "Recipe costing for ingredients, base recipes and final products")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, env = "COSTING_DATABASE", default_value = "costing.db")]
    database: PathBuf,

    /// Measurement system used to show and enter quantities
    #[arg(short, long, env = "COSTING_UNITS", value_enum, default_value_t = MeasurementSystem::MetricLarge)]
    units: MeasurementSystem,

    /// Log filter when RUST_LOG is not set (e.g. "debug")
    #[arg(long, env = "COSTING_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Load a small sample catalog
    LoadSample,

    /// Import every *.json catalog file under a directory
    Import {
        dir: PathBuf,

        /// Clear the catalog before importing
        #[arg(long)]
        clear: bool,
    },

    /// List ingredients and materials
    ListInputs,

    /// List base recipes
    ListBases,

    /// List final products
    ListProducts {
        /// Only show this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Add an ingredient or material
    AddInput {
        name: String,

        /// Purchased amount, e.g. "1 kg", "395 g", "12 un"
        purchase: String,

        /// Price paid for the purchased amount
        cost: f64,

        /// Loss factor in percent
        #[arg(short, long, default_value = "0")]
        loss: f64,

        /// Register as a material (packaging, decoration) instead of an ingredient
        #[arg(long)]
        material: bool,
    },

    /// Add a base recipe
    AddBase {
        name: String,

        /// Composition line as INPUT_ID=AMOUNT (e.g. 3=500g); repeatable
        #[arg(short, long = "item")]
        items: Vec<String>,

        #[arg(short, long, default_value = "0")]
        loss: f64,

        /// Declared yield, e.g. "1.2 kg" or "30 un"
        #[arg(long = "yield")]
        yield_measure: Option<String>,
    },

    /// Add a final product
    AddProduct {
        name: String,

        /// Material line as MATERIAL_ID=AMOUNT; repeatable
        #[arg(short, long = "material")]
        materials: Vec<String>,

        /// Base recipe line as BASE_ID=BATCHES; repeatable
        #[arg(short, long = "base")]
        bases: Vec<String>,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(short, long, default_value = "0")]
        loss: f64,

        /// Selling price
        #[arg(short, long)]
        price: Option<f64>,
    },

    /// Show the cost breakdown of a final product
    Cost {
        id: i64,

        /// Show the full composition tree
        #[arg(short, long)]
        verbose: bool,

        /// Also print the price that reaches this margin (percent)
        #[arg(short, long)]
        target_margin: Option<f64>,
    },

    /// Show the cost breakdown of a base recipe
    Base { id: i64 },

    /// Delete an entity unless something still uses it
    Delete {
        #[arg(value_enum)]
        kind: EntityKind,
        id: i64,
    },

    /// Recompute every stored cost
    Recalc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut store = SqliteStore::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::LoadSample => {
            load_sample_data(&mut store)?;
            println!("Sample data loaded successfully!");
        }

        Commands::Import { dir, clear } => {
            if clear {
                println!("Clearing existing catalog...");
                store.clear()?;
            }
            let stats = import::import_directory(&mut store, &dir)?;
            println!("{}", stats);
        }

        Commands::ListInputs => {
            let inputs = store.fetch_ingredients()?;
            if inputs.is_empty() {
                println!("No inputs in database. Run 'import' or 'load-sample' first.");
            } else {
                println!(
                    "{:>4} {:<28} {:<10} {:>12} {:>10} {:>6} {:>12}",
                    "ID", "Name", "Kind", "Quantity", "Cost", "Loss%", "Cost/unit"
                );
                println!("{}", "-".repeat(88));
                for i in inputs {
                    let display = cli.units.display_unit(i.base_unit);
                    let per_display_unit =
                        i.unit_cost * units::to_canonical(1.0, display, cli.units)?;
                    println!(
                        "{:>4} {:<28} {:<10} {:>9.3} {:<2} {:>10.2} {:>6.1} {:>9.4}/{}",
                        i.id.unwrap_or_default(),
                        i.name,
                        i.kind.as_str(),
                        from_canonical(i.quantity, i.base_unit, cli.units),
                        display.symbol(),
                        i.average_cost,
                        i.loss_factor,
                        per_display_unit,
                        display
                    );
                }
            }
        }

        Commands::ListBases => {
            let bases = store.fetch_bases()?;
            if bases.is_empty() {
                println!("No base recipes in database.");
            } else {
                println!("{:>4} {:<30} {:>6} {:>8} {:>12}", "ID", "Base recipe", "Lines", "Loss%", "Total cost");
                println!("{}", "-".repeat(64));
                for b in bases {
                    println!(
                        "{:>4} {:<30} {:>6} {:>8.1} {:>12.2}",
                        b.id.unwrap_or_default(),
                        b.name,
                        b.composition.len(),
                        b.loss_factor,
                        b.total_cost
                    );
                }
            }
        }

        Commands::ListProducts { category } => {
            let products: Vec<FinalProduct> = store
                .fetch_products()?
                .into_iter()
                .filter(|p| category.is_none() || p.category == category)
                .collect();
            if products.is_empty() {
                println!("No products found.");
            } else {
                println!(
                    "{:>4} {:<30} {:<14} {:>10} {:>10} {:>8}",
                    "ID", "Product", "Category", "Cost", "Price", "Margin"
                );
                println!("{}", "-".repeat(80));
                for p in products {
                    let price = p.selling_price.map_or("-".to_string(), |v| format!("{v:.2}"));
                    println!(
                        "{:>4} {:<30} {:<14} {:>10.2} {:>10} {:>7.1}%",
                        p.id.unwrap_or_default(),
                        p.name,
                        p.category.as_deref().unwrap_or("-"),
                        p.total_cost,
                        price,
                        p.margin_percent
                    );
                }
            }
        }

        Commands::AddInput { name, purchase, cost, loss, material } => {
            let (quantity, base_unit) = canonical_measure(&purchase)?;
            let kind = if material { InputKind::Material } else { InputKind::Ingredient };
            let saved = catalog::save_ingredient(
                &mut store,
                Ingredient {
                    id: None,
                    name,
                    kind,
                    quantity,
                    base_unit,
                    average_cost: cost,
                    loss_factor: loss,
                    unit_cost: 0.0,
                },
            )?;
            println!(
                "Added {} #{} ({:.6} per {})",
                saved.kind.as_str(),
                saved.id.unwrap_or_default(),
                saved.unit_cost,
                saved.base_unit
            );
        }

        Commands::AddBase { name, items, loss, yield_measure } => {
            let inputs = store.fetch_ingredients()?;
            let mut composition = Vec::with_capacity(items.len());
            for line in &items {
                let (id, amount) = split_line(line)?;
                let unit = inputs
                    .iter()
                    .find(|i| i.id == Some(id))
                    .map(|i| i.base_unit);
                let quantity = parse_amount(amount, unit)?;
                composition.push(CompositionItem::Input { id, quantity });
            }

            let (yield_quantity, yield_unit) = match yield_measure {
                Some(text) => {
                    let (value, unit) = units::parse_measure(&text)?;
                    (Some(value), Some(unit.symbol().to_string()))
                }
                None => (None, None),
            };

            let saved = catalog::save_base(
                &mut store,
                BaseRecipe {
                    id: None,
                    name,
                    loss_factor: loss,
                    yield_quantity,
                    yield_unit,
                    composition,
                    total_cost: 0.0,
                },
            )?;
            println!(
                "Added base recipe #{} (total cost {:.2})",
                saved.id.unwrap_or_default(),
                saved.total_cost
            );
        }

        Commands::AddProduct { name, materials, bases, category, loss, price } => {
            let inputs = store.fetch_ingredients()?;
            let mut composition = Vec::with_capacity(materials.len() + bases.len());
            for line in &materials {
                let (id, amount) = split_line(line)?;
                let unit = inputs
                    .iter()
                    .find(|i| i.id == Some(id))
                    .map(|i| i.base_unit);
                composition.push(CompositionItem::Input { id, quantity: parse_amount(amount, unit)? });
            }
            for line in &bases {
                let (id, batches) = split_line(line)?;
                let quantity: f64 = batches
                    .replace(',', ".")
                    .parse()
                    .with_context(|| format!("'{batches}' is not a number of batches"))?;
                composition.push(CompositionItem::BaseRecipe { id, quantity });
            }

            let saved = catalog::save_product(
                &mut store,
                FinalProduct {
                    id: None,
                    name,
                    category,
                    loss_factor: loss,
                    selling_price: price,
                    composition,
                    total_cost: 0.0,
                    profit: None,
                    margin_percent: 0.0,
                },
            )?;
            println!(
                "Added product #{} (cost {:.2}, margin {:.1}%)",
                saved.id.unwrap_or_default(),
                saved.total_cost,
                saved.margin_percent
            );
        }

        Commands::Cost { id, verbose, target_margin } => {
            let (_, costing) = catalog::product_report(&store, id)?;

            if verbose {
                println!("Composition:\n");
                println!("{}", format_breakdown(&costing.lines, 1));
            }
            println!("{}", costing);

            if let Some(margin) = target_margin {
                match suggested_price(costing.total_cost, margin) {
                    Some(price) => println!("Price for {margin:.1}% margin: {price:.2}"),
                    None => bail!("target margin must be in [0, 100)"),
                }
            }
        }

        Commands::Base { id } => {
            let (base, costing) = catalog::base_report(&store, id)?;
            println!("{}", format_breakdown(&costing.lines, 1));
            println!("{}", costing);
            if let Some(per_unit) = cost_per_yield_unit(costing.total_cost, base.yield_quantity) {
                println!(
                    "Cost per {}: {:.4}",
                    base.yield_unit.as_deref().unwrap_or("yield unit"),
                    per_unit
                );
            }
        }

        Commands::Delete { kind, id } => {
            if catalog::delete_entity(&mut store, id, kind)? {
                println!("Deleted {kind} {id}");
            } else {
                println!("{kind} {id} not found");
            }
        }

        Commands::Recalc => {
            let report = catalog::recalculate_all(&mut store)?;
            println!("{}", report);
            for (name, error) in &report.failed {
                println!("  {name}: {error}");
            }
        }
    }

    Ok(())
}

/// Split an `ID=AMOUNT` composition argument
fn split_line(line: &str) -> Result<(i64, &str)> {
    let Some((id, amount)) = line.split_once('=') else {
        bail!("expected ID=AMOUNT, got '{line}'");
    };
    let id = id.trim().parse().with_context(|| format!("bad id in '{line}'"))?;
    Ok((id, amount.trim()))
}

/// A bare number is taken as canonical; a measure must match the input's unit
fn parse_amount(amount: &str, unit: Option<BaseUnit>) -> Result<f64> {
    if let Ok(value) = amount.replace(',', ".").parse::<f64>() {
        return Ok(value);
    }
    let (value, measured) = canonical_measure(amount)?;
    if let Some(unit) = unit {
        if unit != measured {
            bail!("'{amount}' is not measured in {unit}");
        }
    }
    Ok(value)
}

/// Load a sample chocolate cake catalog
fn load_sample_data(store: &mut SqliteStore) -> Result<()> {
    store.clear()?;

    let purchases = [
        ("Farinha de trigo", InputKind::Ingredient, "1 kg", 6.49, 2.0),
        ("Açúcar refinado", InputKind::Ingredient, "1 kg", 4.99, 0.0),
        ("Chocolate em pó 50%", InputKind::Ingredient, "1 kg", 42.90, 1.0),
        ("Leite condensado", InputKind::Ingredient, "395 g", 7.49, 3.0),
        ("Creme de leite", InputKind::Ingredient, "200 g", 3.99, 3.0),
        ("Manteiga", InputKind::Ingredient, "500 g", 24.90, 0.0),
        ("Ovos", InputKind::Ingredient, "30 un", 22.00, 5.0),
        ("Leite integral", InputKind::Ingredient, "1 l", 5.49, 0.0),
        ("Caixa para bolo 20cm", InputKind::Material, "10 un", 35.00, 0.0),
        ("Fita de cetim", InputKind::Material, "10 un", 8.00, 10.0),
    ];

    let mut ids = std::collections::HashMap::new();
    for (name, kind, purchase, cost, loss) in purchases {
        let (quantity, base_unit) = canonical_measure(purchase)?;
        let saved = catalog::save_ingredient(
            store,
            Ingredient {
                id: None,
                name: name.to_string(),
                kind,
                quantity,
                base_unit,
                average_cost: cost,
                loss_factor: loss,
                unit_cost: 0.0,
            },
        )?;
        ids.insert(name, saved.id.unwrap_or_default());
    }

    let line = |name: &str, quantity: f64| CompositionItem::Input { id: ids[name], quantity };

    let dough = catalog::save_base(
        store,
        BaseRecipe {
            id: None,
            name: "Massa de Chocolate".to_string(),
            loss_factor: 5.0,
            yield_quantity: Some(1.2),
            yield_unit: Some("kg".to_string()),
            composition: vec![
                line("Farinha de trigo", 300.0),
                line("Açúcar refinado", 250.0),
                line("Chocolate em pó 50%", 100.0),
                line("Ovos", 4.0),
                line("Leite integral", 240.0),
                line("Manteiga", 100.0),
            ],
            total_cost: 0.0,
        },
    )?;

    let filling = catalog::save_base(
        store,
        BaseRecipe {
            id: None,
            name: "Brigadeiro".to_string(),
            loss_factor: 8.0,
            yield_quantity: Some(30.0),
            yield_unit: Some("un".to_string()),
            composition: vec![
                line("Leite condensado", 395.0),
                line("Creme de leite", 200.0),
                line("Chocolate em pó 50%", 50.0),
                line("Manteiga", 20.0),
            ],
            total_cost: 0.0,
        },
    )?;

    let (Some(dough_id), Some(filling_id)) = (dough.id, filling.id) else {
        bail!("sample base recipes were not assigned ids");
    };

    catalog::save_product(
        store,
        FinalProduct {
            id: None,
            name: "Bolo de Chocolate com Brigadeiro".to_string(),
            category: Some("Bolos".to_string()),
            loss_factor: 3.0,
            selling_price: Some(95.0),
            composition: vec![
                CompositionItem::BaseRecipe { id: dough_id, quantity: 1.0 },
                CompositionItem::BaseRecipe { id: filling_id, quantity: 1.5 },
                line("Caixa para bolo 20cm", 1.0),
                line("Fita de cetim", 1.0),
            ],
            total_cost: 0.0,
            profit: None,
            margin_percent: 0.0,
        },
    )?;

    catalog::save_product(
        store,
        FinalProduct {
            id: None,
            name: "Bolo de Chocolate simples".to_string(),
            category: Some("Bolos".to_string()),
            loss_factor: 0.0,
            selling_price: None,
            composition: vec![CompositionItem::BaseRecipe { id: dough_id, quantity: 1.0 }],
            total_cost: 0.0,
            profit: None,
            margin_percent: 0.0,
        },
    )?;

    println!("Loaded {} inputs, 2 base recipes, 2 products", ids.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_composition_arguments() {
        assert_eq!(split_line("3=500g").unwrap(), (3, "500g"));
        assert_eq!(split_line(" 7 = 1,5 kg ").unwrap(), (7, "1,5 kg"));
        assert!(split_line("500g").is_err());
        assert!(split_line("x=1").is_err());
    }

    #[test]
    fn amounts_are_checked_against_the_input_unit() {
        assert_eq!(parse_amount("250", Some(BaseUnit::Grams)).unwrap(), 250.0);
        assert_eq!(parse_amount("0,5 kg", Some(BaseUnit::Grams)).unwrap(), 500.0);
        assert!(parse_amount("1 l", Some(BaseUnit::Grams)).is_err());
    }

    #[test]
    fn sample_catalog_costs_every_product() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        load_sample_data(&mut store).unwrap();

        let products = store.fetch_products().unwrap();
        assert_eq!(products.len(), 2);
        assert!(products.iter().all(|p| p.total_cost > 0.0));

        let unpriced = products.iter().find(|p| p.selling_price.is_none()).unwrap();
        assert_eq!(unpriced.profit, None);
        assert_eq!(unpriced.margin_percent, 0.0);

        let report = catalog::recalculate_all(&mut store).unwrap();
        assert_eq!(report.inputs + report.bases + report.products, 0);
    }
}

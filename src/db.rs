//! SQLite schema and the `CatalogStore` implementation on top of it

use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Transaction};
use tracing::debug;

use crate::error::Result;
use crate::models::{BaseRecipe, BaseUnit, CompositionItem, EntityKind, FinalProduct, Ingredient, InputKind};
use crate::store::CatalogStore;

impl ToSql for InputKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for InputKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for BaseUnit {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for BaseUnit {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Purchasable ingredients and materials
        CREATE TABLE IF NOT EXISTS inputs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            quantity REAL NOT NULL,
            base_unit TEXT NOT NULL,
            average_cost REAL NOT NULL,
            loss_factor REAL NOT NULL DEFAULT 0,
            unit_cost REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS base_recipes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            loss_factor REAL NOT NULL DEFAULT 0,
            yield_quantity REAL,
            yield_unit TEXT,
            total_cost REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS base_recipe_items (
            base_id INTEGER NOT NULL REFERENCES base_recipes(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            item_type TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            quantity REAL NOT NULL,
            PRIMARY KEY (base_id, position)
        );

        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            category TEXT,
            loss_factor REAL NOT NULL DEFAULT 0,
            selling_price REAL,
            total_cost REAL NOT NULL DEFAULT 0,
            profit REAL,
            margin_percent REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS product_items (
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            item_type TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            quantity REAL NOT NULL,
            PRIMARY KEY (product_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_base_recipe_items_item ON base_recipe_items(item_id);
        CREATE INDEX IF NOT EXISTS idx_product_items_item ON product_items(item_type, item_id);
        "#,
    )?;
    Ok(())
}

type ItemRows = HashMap<i64, Vec<CompositionItem>>;

/// Load every composition row of `table`, grouped by owner id in stored order.
fn load_items(conn: &Connection, table: &str, owner_column: &str) -> Result<ItemRows> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {owner_column}, item_type, item_id, quantity FROM {table}
         ORDER BY {owner_column}, position"
    ))?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    let mut items: ItemRows = HashMap::new();
    for row in rows {
        let (owner, item_type, item_id, quantity) = row?;
        let item = CompositionItem::from_parts(&item_type, item_id, quantity)?;
        items.entry(owner).or_default().push(item);
    }
    Ok(items)
}

fn replace_items(
    tx: &Transaction<'_>,
    table: &str,
    owner_column: &str,
    owner: i64,
    items: &[CompositionItem],
) -> Result<()> {
    tx.execute(
        &format!("DELETE FROM {table} WHERE {owner_column} = ?1"),
        [owner],
    )?;

    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {table} ({owner_column}, position, item_type, item_id, quantity)
         VALUES (?1, ?2, ?3, ?4, ?5)"
    ))?;
    for (position, item) in items.iter().enumerate() {
        stmt.execute(params![
            owner,
            position as i64,
            item.item_type(),
            item.id(),
            item.quantity()
        ])?;
    }
    Ok(())
}

/// SQLite-backed catalog
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Remove the whole catalog
    pub fn clear(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DELETE FROM product_items;
            DELETE FROM products;
            DELETE FROM base_recipe_items;
            DELETE FROM base_recipes;
            DELETE FROM inputs;
            "#,
        )?;
        Ok(())
    }
}

impl CatalogStore for SqliteStore {
    fn fetch_ingredients(&self) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, kind, quantity, base_unit, average_cost, loss_factor, unit_cost
             FROM inputs ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Ingredient {
                id: Some(row.get(0)?),
                name: row.get(1)?,
                kind: row.get(2)?,
                quantity: row.get(3)?,
                base_unit: row.get(4)?,
                average_cost: row.get(5)?,
                loss_factor: row.get(6)?,
                unit_cost: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn fetch_bases(&self) -> Result<Vec<BaseRecipe>> {
        let mut items = load_items(&self.conn, "base_recipe_items", "base_id")?;
        let mut stmt = self.conn.prepare(
            "SELECT id, name, loss_factor, yield_quantity, yield_unit, total_cost
             FROM base_recipes ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(BaseRecipe {
                id: Some(row.get(0)?),
                name: row.get(1)?,
                loss_factor: row.get(2)?,
                yield_quantity: row.get(3)?,
                yield_unit: row.get(4)?,
                composition: Vec::new(),
                total_cost: row.get(5)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            let mut base = row?;
            if let Some(id) = base.id {
                base.composition = items.remove(&id).unwrap_or_default();
            }
            results.push(base);
        }
        Ok(results)
    }

    fn fetch_products(&self) -> Result<Vec<FinalProduct>> {
        let mut items = load_items(&self.conn, "product_items", "product_id")?;
        let mut stmt = self.conn.prepare(
            "SELECT id, name, category, loss_factor, selling_price, total_cost, profit, margin_percent
             FROM products ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(FinalProduct {
                id: Some(row.get(0)?),
                name: row.get(1)?,
                category: row.get(2)?,
                loss_factor: row.get(3)?,
                selling_price: row.get(4)?,
                composition: Vec::new(),
                total_cost: row.get(5)?,
                profit: row.get(6)?,
                margin_percent: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            let mut product = row?;
            if let Some(id) = product.id {
                product.composition = items.remove(&id).unwrap_or_default();
            }
            results.push(product);
        }
        Ok(results)
    }

    fn save_ingredient(&mut self, ingredient: &Ingredient) -> Result<Ingredient> {
        self.conn.execute(
            "INSERT INTO inputs (id, name, kind, quantity, base_unit, average_cost, loss_factor, unit_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                quantity = excluded.quantity,
                base_unit = excluded.base_unit,
                average_cost = excluded.average_cost,
                loss_factor = excluded.loss_factor,
                unit_cost = excluded.unit_cost",
            params![
                ingredient.id,
                ingredient.name,
                ingredient.kind,
                ingredient.quantity,
                ingredient.base_unit,
                ingredient.average_cost,
                ingredient.loss_factor,
                ingredient.unit_cost
            ],
        )?;

        let id = ingredient.id.unwrap_or_else(|| self.conn.last_insert_rowid());
        debug!(id, name = %ingredient.name, "stored input");
        Ok(Ingredient {
            id: Some(id),
            ..ingredient.clone()
        })
    }

    fn save_base(&mut self, base: &BaseRecipe) -> Result<BaseRecipe> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO base_recipes (id, name, loss_factor, yield_quantity, yield_unit, total_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                loss_factor = excluded.loss_factor,
                yield_quantity = excluded.yield_quantity,
                yield_unit = excluded.yield_unit,
                total_cost = excluded.total_cost",
            params![
                base.id,
                base.name,
                base.loss_factor,
                base.yield_quantity,
                base.yield_unit,
                base.total_cost
            ],
        )?;

        let id = base.id.unwrap_or_else(|| tx.last_insert_rowid());
        replace_items(&tx, "base_recipe_items", "base_id", id, &base.composition)?;
        tx.commit()?;

        debug!(id, name = %base.name, lines = base.composition.len(), "stored base recipe");
        Ok(BaseRecipe {
            id: Some(id),
            ..base.clone()
        })
    }

    fn save_product(&mut self, product: &FinalProduct) -> Result<FinalProduct> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO products (id, name, category, loss_factor, selling_price, total_cost, profit, margin_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                loss_factor = excluded.loss_factor,
                selling_price = excluded.selling_price,
                total_cost = excluded.total_cost,
                profit = excluded.profit,
                margin_percent = excluded.margin_percent",
            params![
                product.id,
                product.name,
                product.category,
                product.loss_factor,
                product.selling_price,
                product.total_cost,
                product.profit,
                product.margin_percent
            ],
        )?;

        let id = product.id.unwrap_or_else(|| tx.last_insert_rowid());
        replace_items(&tx, "product_items", "product_id", id, &product.composition)?;
        tx.commit()?;

        debug!(id, name = %product.name, lines = product.composition.len(), "stored product");
        Ok(FinalProduct {
            id: Some(id),
            ..product.clone()
        })
    }

    fn delete(&mut self, id: i64, kind: EntityKind) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let removed = match kind {
            EntityKind::Input => tx.execute("DELETE FROM inputs WHERE id = ?1", [id])?,
            EntityKind::BaseRecipe => {
                tx.execute("DELETE FROM base_recipe_items WHERE base_id = ?1", [id])?;
                tx.execute("DELETE FROM base_recipes WHERE id = ?1", [id])?
            }
            EntityKind::Product => {
                tx.execute("DELETE FROM product_items WHERE product_id = ?1", [id])?;
                tx.execute("DELETE FROM products WHERE id = ?1", [id])?
            }
        };
        tx.commit()?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flour() -> Ingredient {
        Ingredient {
            id: None,
            name: "Farinha".to_string(),
            kind: InputKind::Ingredient,
            quantity: 1000.0,
            base_unit: BaseUnit::Grams,
            average_cost: 19.0,
            loss_factor: 2.0,
            unit_cost: 0.01938,
        }
    }

    #[test]
    fn ingredient_insert_then_update() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let saved = store.save_ingredient(&flour()).unwrap();
        let id = saved.id.unwrap();

        let mut edited = saved.clone();
        edited.average_cost = 21.0;
        let updated = store.save_ingredient(&edited).unwrap();
        assert_eq!(updated.id, Some(id));

        let all = store.fetch_ingredients().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].average_cost, 21.0);
        assert_eq!(all[0].kind, InputKind::Ingredient);
        assert_eq!(all[0].base_unit, BaseUnit::Grams);
    }

    #[test]
    fn base_composition_keeps_order_and_is_replaced() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let a = store.save_ingredient(&flour()).unwrap().id.unwrap();
        let b = store
            .save_ingredient(&Ingredient { name: "Ovos".to_string(), ..flour() })
            .unwrap()
            .id
            .unwrap();

        let mut base = BaseRecipe {
            id: None,
            name: "Massa".to_string(),
            loss_factor: 5.0,
            yield_quantity: Some(1.2),
            yield_unit: Some("kg".to_string()),
            composition: vec![
                CompositionItem::Input { id: b, quantity: 3.0 },
                CompositionItem::Input { id: a, quantity: 500.0 },
            ],
            total_cost: 0.0,
        };
        base = store.save_base(&base).unwrap();

        let fetched = store.fetch_bases().unwrap();
        assert_eq!(fetched, vec![base.clone()]);

        base.composition.pop();
        store.save_base(&base).unwrap();
        let fetched = store.fetch_bases().unwrap();
        assert_eq!(fetched[0].composition, vec![CompositionItem::Input { id: b, quantity: 3.0 }]);
    }

    #[test]
    fn product_round_trips_optional_fields() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let product = FinalProduct {
            id: None,
            name: "Bolo".to_string(),
            category: None,
            loss_factor: 0.0,
            selling_price: None,
            composition: vec![CompositionItem::BaseRecipe { id: 4, quantity: 1.0 }],
            total_cost: 12.5,
            profit: None,
            margin_percent: 0.0,
        };
        let saved = store.save_product(&product).unwrap();
        assert_eq!(store.fetch_products().unwrap(), vec![saved]);
    }

    #[test]
    fn delete_removes_rows_and_composition() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let base = store
            .save_base(&BaseRecipe {
                id: None,
                name: "Calda".to_string(),
                loss_factor: 0.0,
                yield_quantity: None,
                yield_unit: None,
                composition: vec![CompositionItem::Input { id: 1, quantity: 10.0 }],
                total_cost: 0.0,
            })
            .unwrap();
        let id = base.id.unwrap();

        assert!(store.delete(id, EntityKind::BaseRecipe).unwrap());
        assert!(!store.delete(id, EntityKind::BaseRecipe).unwrap());
        assert!(store.fetch_bases().unwrap().is_empty());

        let leftover: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM base_recipe_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn unknown_item_type_surfaces_as_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "INSERT INTO base_recipes (id, name) VALUES (1, 'Massa');
                 INSERT INTO base_recipe_items VALUES (1, 0, 'recipe', 2, 1.0);",
            )
            .unwrap();
        assert!(matches!(
            store.fetch_bases(),
            Err(crate::error::CostingError::InvalidCompositionItem(_))
        ));
    }

    #[test]
    fn file_database_persists_between_opens() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut store = SqliteStore::open(file.path()).unwrap();
            store.save_ingredient(&flour()).unwrap();
        }
        let store = SqliteStore::open(file.path()).unwrap();
        assert_eq!(store.fetch_ingredients().unwrap().len(), 1);
    }
}

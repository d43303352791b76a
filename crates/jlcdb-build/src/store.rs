//! The authoritative components store
//!
//! One SQLite database holding every component ever seen, keyed by LCSC
//! number. Each scrape upserts into it; the age-out and compaction passes
//! run after a scrape and are both idempotent. Parts-view builders never
//! read the live store: they read a point-in-time snapshot taken with
//! [`ComponentStore::snapshot`] after the write sequence finishes.
//!
//! Manufacturer and category names are interned into side tables with
//! in-memory caches in front of them, so component rows carry integer ids.

use crate::error::{PipelineError, Result};
use crate::model::{description_from_extra, Component};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Age-out threshold: a component not reconfirmed for this long is assumed
/// out of stock (seconds)
pub const DEFAULT_AGE_OUT_SECS: i64 = 7 * 24 * 60 * 60;

/// Compaction threshold: a component continuously out of stock for this
/// long loses its price history and attribute blob (seconds)
pub const DEFAULT_COMPACT_SECS: i64 = 365 * 24 * 60 * 60;

const CREATE_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS components (
        lcsc INTEGER PRIMARY KEY NOT NULL,
        category_id INTEGER NOT NULL,
        mfr TEXT NOT NULL,
        package TEXT NOT NULL,
        joints INTEGER NOT NULL,
        manufacturer_id INTEGER NOT NULL,
        basic INTEGER NOT NULL,
        preferred INTEGER NOT NULL DEFAULT 0,
        description TEXT NOT NULL,
        datasheet TEXT NOT NULL,
        stock INTEGER NOT NULL,
        price TEXT NOT NULL,
        last_update INTEGER NOT NULL,
        extra TEXT,
        flag INTEGER NOT NULL DEFAULT 0,
        last_on_stock INTEGER NOT NULL DEFAULT 0)",
    "CREATE INDEX IF NOT EXISTS components_category
        ON components (category_id)",
    "CREATE INDEX IF NOT EXISTS components_manufacturer
        ON components (manufacturer_id)",
    "CREATE TABLE IF NOT EXISTS manufacturers (
        id INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        UNIQUE (id, name))",
    "CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY NOT NULL,
        category TEXT NOT NULL,
        subcategory TEXT NOT NULL,
        UNIQUE (category, subcategory))",
];

/// A component row as stored, with interned category/manufacturer ids
#[derive(Debug, Clone, PartialEq)]
pub struct StoredComponent {
    pub lcsc: i64,
    pub category_id: i64,
    pub manufacturer_id: i64,
    pub mfr: String,
    pub package: String,
    pub joints: i64,
    pub basic: bool,
    pub preferred: bool,
    pub description: String,
    pub datasheet: String,
    pub stock: i64,
    /// Price breaks as a JSON array string
    pub price: String,
    /// Attribute blob as a JSON object string, if retained
    pub extra: Option<String>,
    pub last_update: i64,
    pub last_on_stock: i64,
}

/// Handle on the components cache database
pub struct ComponentStore {
    conn: Connection,
    manufacturer_cache: HashMap<String, i64>,
    category_cache: HashMap<(String, String), i64>,
}

impl ComponentStore {
    /// Open (creating if necessary) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a read-only handle, e.g. on a snapshot
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn,
            manufacturer_cache: HashMap::new(),
            category_cache: HashMap::new(),
        })
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        for stmt in CREATE_STATEMENTS {
            conn.execute(stmt, [])?;
        }
        Ok(Self {
            conn,
            manufacturer_cache: HashMap::new(),
            category_cache: HashMap::new(),
        })
    }

    /// Intern a manufacturer name, inserting on first sight.
    ///
    /// Inserts commit immediately, so lookups must happen outside the
    /// upsert transaction.
    pub fn manufacturer_id(&mut self, name: &str) -> Result<i64> {
        if let Some(&id) = self.manufacturer_cache.get(name) {
            return Ok(id);
        }
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM manufacturers WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        let id = match existing {
            Some(id) => id,
            None => {
                self.conn.execute(
                    "INSERT INTO manufacturers (name) VALUES (?1)",
                    params![name],
                )?;
                self.conn.last_insert_rowid()
            }
        };
        self.manufacturer_cache.insert(name.to_string(), id);
        Ok(id)
    }

    /// Intern a (category, subcategory) pair, inserting on first sight
    pub fn category_id(&mut self, category: &str, subcategory: &str) -> Result<i64> {
        let key = (category.to_string(), subcategory.to_string());
        if let Some(&id) = self.category_cache.get(&key) {
            return Ok(id);
        }
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM categories WHERE category = ?1 AND subcategory = ?2",
                params![category, subcategory],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        let id = match existing {
            Some(id) => id,
            None => {
                self.conn.execute(
                    "INSERT INTO categories (category, subcategory) VALUES (?1, ?2)",
                    params![category, subcategory],
                )?;
                self.conn.last_insert_rowid()
            }
        };
        self.category_cache.insert(key, id);
        Ok(id)
    }

    /// Insert or replace a batch of components.
    ///
    /// Stock, price and metadata are replaced and `last_update` set to the
    /// record's scrape timestamp; `last_on_stock` advances only when the
    /// new stock is positive. Never deletes. Constraint violations abort
    /// the whole batch as a store integrity error.
    pub fn upsert_batch(&mut self, components: &[Component]) -> Result<usize> {
        // Interning can insert and commit, so resolve ids before the
        // upsert transaction starts.
        let mut resolved = Vec::with_capacity(components.len());
        for comp in components {
            let category_id = self.category_id(&comp.category, &comp.subcategory)?;
            let manufacturer_id = self.manufacturer_id(&comp.manufacturer)?;
            resolved.push((comp, category_id, manufacturer_id));
        }

        let tx = self.conn.transaction().map_err(integrity)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO components (
                        lcsc, category_id, mfr, package, joints, manufacturer_id,
                        basic, preferred, description, datasheet, stock, price,
                        last_update, extra, last_on_stock
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    ON CONFLICT(lcsc) DO UPDATE SET
                        category_id = excluded.category_id,
                        mfr = excluded.mfr,
                        package = excluded.package,
                        joints = excluded.joints,
                        manufacturer_id = excluded.manufacturer_id,
                        basic = excluded.basic,
                        preferred = excluded.preferred,
                        description = excluded.description,
                        datasheet = excluded.datasheet,
                        stock = excluded.stock,
                        price = excluded.price,
                        last_update = excluded.last_update,
                        extra = excluded.extra,
                        last_on_stock = CASE
                            WHEN excluded.stock > 0 THEN excluded.last_update
                            ELSE components.last_on_stock END",
                )
                .map_err(integrity)?;
            for (comp, category_id, manufacturer_id) in &resolved {
                let last_on_stock = if comp.stock > 0 { comp.last_update } else { 0 };
                stmt.execute(params![
                    comp.lcsc.to_db_key(),
                    category_id,
                    comp.mfr,
                    comp.package,
                    comp.joints,
                    manufacturer_id,
                    comp.basic as i64,
                    comp.preferred as i64,
                    comp.description,
                    comp.datasheet,
                    comp.stock,
                    comp.prices_json(),
                    comp.last_update,
                    comp.extra_json(),
                    last_on_stock,
                ])
                .map_err(integrity)?;
            }
        }
        tx.commit().map_err(integrity)?;
        debug!(count = components.len(), "upserted components");
        Ok(components.len())
    }

    /// Zero the stock of every component not reconfirmed since
    /// `now - threshold_secs`.
    ///
    /// The scrape updates every in-stock component, so anything it hasn't
    /// touched within the threshold can be assumed out of stock. Only the
    /// stock column is altered; running the pass twice with the same
    /// threshold changes nothing further.
    pub fn age_out_stock(&mut self, threshold_secs: i64, now: i64) -> Result<usize> {
        let cutoff = now - threshold_secs;
        let changed = self.conn.execute(
            "UPDATE components SET stock = 0 WHERE stock > 0 AND last_update < ?1",
            params![cutoff],
        )?;
        info!(aged_out = changed, "aged out stale stock");
        Ok(changed)
    }

    /// Clear bulky volatile fields of components continuously out of stock
    /// since before `now - threshold_secs`, then VACUUM.
    ///
    /// Price history becomes `[]` and the attribute blob NULL; identity,
    /// category, description and timestamps are retained so the record
    /// stays discoverable. Idempotent.
    pub fn compact(&mut self, threshold_secs: i64, now: i64) -> Result<usize> {
        let cutoff = now - threshold_secs;
        let changed = self.conn.execute(
            "UPDATE components SET price = '[]', extra = NULL
             WHERE stock = 0 AND last_on_stock < ?1
               AND (price != '[]' OR extra IS NOT NULL)",
            params![cutoff],
        )?;
        // Reclaim the freed pages; this can take a while on a large store.
        self.conn.execute("VACUUM", [])?;
        info!(compacted = changed, "compacted long-out-of-stock components");
        Ok(changed)
    }

    /// Repair empty descriptions by copying them out of the attribute blob
    pub fn fix_descriptions(&mut self) -> Result<usize> {
        let mut fixed = 0;
        let rows: Vec<(i64, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT lcsc, extra FROM components
                 WHERE (description IS NULL OR description = '') AND extra IS NOT NULL",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };
        for (lcsc, extra_json) in rows {
            let extra: Option<serde_json::Value> = serde_json::from_str(&extra_json).ok();
            if let Some(description) = description_from_extra(extra.as_ref()) {
                if !description.is_empty() {
                    self.conn.execute(
                        "UPDATE components SET description = ?1 WHERE lcsc = ?2",
                        params![description, lcsc],
                    )?;
                    fixed += 1;
                }
            }
        }
        if fixed > 0 {
            info!(fixed, "repaired empty descriptions from attribute blobs");
        }
        Ok(fixed)
    }

    /// Count components, optionally restricted by a WHERE clause (without
    /// the keyword)
    pub fn count_components(&self, where_clause: Option<&str>) -> Result<i64> {
        let query = match where_clause {
            Some(w) => format!("SELECT COUNT(*) FROM components WHERE {w}"),
            None => "SELECT COUNT(*) FROM components".to_string(),
        };
        Ok(self.conn.query_row(&query, [], |row| row.get(0))?)
    }

    /// Visit components in `lcsc` order, optionally restricted by a WHERE
    /// clause (without the keyword)
    pub fn for_each_component<F>(&self, where_clause: Option<&str>, mut f: F) -> Result<()>
    where
        F: FnMut(StoredComponent) -> Result<()>,
    {
        let query = match where_clause {
            Some(w) => format!("SELECT * FROM components WHERE {w} ORDER BY lcsc"),
            None => "SELECT * FROM components ORDER BY lcsc".to_string(),
        };
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredComponent {
                lcsc: row.get("lcsc")?,
                category_id: row.get("category_id")?,
                manufacturer_id: row.get("manufacturer_id")?,
                mfr: row.get("mfr")?,
                package: row.get("package")?,
                joints: row.get("joints")?,
                basic: row.get::<_, i64>("basic")? != 0,
                preferred: row.get::<_, i64>("preferred")? != 0,
                description: row.get("description")?,
                datasheet: row.get("datasheet")?,
                stock: row.get("stock")?,
                price: row.get("price")?,
                extra: row.get("extra")?,
                last_update: row.get("last_update")?,
                last_on_stock: row.get("last_on_stock")?,
            })
        })?;
        for row in rows {
            f(row?)?;
        }
        Ok(())
    }

    /// Fetch one component by LCSC number
    pub fn get_component(&self, lcsc: i64) -> Result<Option<StoredComponent>> {
        let mut found = None;
        self.for_each_component(Some(&format!("lcsc = {lcsc}")), |c| {
            found = Some(c);
            Ok(())
        })?;
        Ok(found)
    }

    /// Manufacturer id → name lookup table
    pub fn manufacturers(&self) -> Result<HashMap<i64, String>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM manufacturers")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(PipelineError::from)
    }

    /// Category id → (category, subcategory) lookup table
    pub fn categories(&self) -> Result<HashMap<i64, (String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, category, subcategory FROM categories")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, (row.get(1)?, row.get(2)?)))
        })?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(PipelineError::from)
    }

    /// Latest scrape timestamp in the store (0 when empty).
    ///
    /// Build metadata derives from this rather than the wall clock so that
    /// rebuilding from the same snapshot is byte-identical.
    pub fn max_last_update(&self) -> Result<i64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(last_update) FROM components", [], |row| {
                    row.get(0)
                })?;
        Ok(max.unwrap_or(0))
    }

    /// Write a point-in-time copy of the store to `path`.
    ///
    /// Taken after the scrape/age-out/compact sequence finishes; the
    /// parts-view builders read only this snapshot, never the live store.
    pub fn snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut dst = Connection::open(path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
        backup.run_to_completion(1024, std::time::Duration::ZERO, None)?;
        info!(snapshot = %path.as_ref().display(), "wrote store snapshot");
        Ok(())
    }
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

/// Map a constraint violation to the fatal store-integrity error, leaving
/// other database errors as-is
fn integrity(err: rusqlite::Error) -> PipelineError {
    if let rusqlite::Error::SqliteFailure(code, ref msg) = err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return PipelineError::StoreIntegrity(
                msg.clone().unwrap_or_else(|| code.to_string()),
            );
        }
    }
    PipelineError::Database(err)
}

//! Parts-view database generation
//!
//! A parts view is a fully derived artifact: one FTS5-indexed SQLite
//! database per filter profile, regenerated from scratch on every build.
//! Builds are a pure function of (snapshot, profile) — the metadata
//! timestamp comes from the snapshot's latest scrape time, not the wall
//! clock, so identical inputs produce byte-identical files.

use crate::error::{PipelineError, Result};
use crate::profiles::FilterProfile;
use crate::store::ComponentStore;
use crate::translate::{PartRow, Translator};
use chrono::DateTime;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Bulk columns are unindexed to keep the FTS index (and the database)
// small: joint counts, URLs, price strings and stock numbers aren't
// useful as search tokens.
const CREATE_STATEMENTS: &[&str] = &[
    r#"CREATE VIRTUAL TABLE IF NOT EXISTS parts USING fts5 (
        'LCSC Part',
        'First Category',
        'Second Category',
        'MFR.Part',
        'Package',
        'Solder Joint' unindexed,
        'Manufacturer',
        'Library Type',
        'Description',
        'Datasheet' unindexed,
        'Price' unindexed,
        'Stock' unindexed
    , tokenize="trigram")"#,
    "CREATE TABLE IF NOT EXISTS mapping (
        'footprint',
        'value',
        'LCSC'
    )",
    "CREATE TABLE IF NOT EXISTS meta (
        'filename',
        'size',
        'partcount',
        'date',
        'last_update'
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        'First Category',
        'Second Category'
    )",
];

/// Rows per insert transaction
const BATCH_SIZE: usize = 50_000;

/// Result of one profile's build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub profile: String,
    pub part_count: usize,
    pub output: PathBuf,
}

/// Build the parts-view database for one profile.
///
/// Reads the read-only components snapshot at `snapshot` and writes a
/// fresh database to `out` (any existing file there is replaced). Fails
/// fast when the snapshot is unreadable or holds no components — an empty
/// output is only legitimate for the `empty` profile, whose database is
/// still structurally complete so consumers can tell it from a build that
/// never ran.
pub fn build(profile: &FilterProfile, snapshot: &Path, out: &Path) -> Result<BuildOutcome> {
    build_inner(profile, snapshot, out).map_err(|err| {
        // A failed build must not leave a half-written database where a
        // valid one is expected.
        let _ = std::fs::remove_file(out);
        match err {
            already @ PipelineError::ProfileBuild { .. } => already,
            other => PipelineError::profile_build(&profile.name, other.to_string()),
        }
    })
}

fn build_inner(profile: &FilterProfile, snapshot: &Path, out: &Path) -> Result<BuildOutcome> {
    if !snapshot.exists() {
        return Err(PipelineError::profile_build(
            &profile.name,
            format!("components snapshot not found: {}", snapshot.display()),
        ));
    }
    let store = ComponentStore::open_read_only(snapshot)?;
    let total = store.count_components(None)?;
    if total == 0 && !profile.is_empty_profile() {
        return Err(PipelineError::profile_build(
            &profile.name,
            "components snapshot is empty; refusing to build an empty view",
        ));
    }

    let reference_time = store.max_last_update()?;
    let mut translator = Translator::new(store.manufacturers()?, store.categories()?);

    if out.exists() {
        std::fs::remove_file(out)?;
    }
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut view = PartsView::create(out)?;

    let where_clause = profile.where_clause(reference_time);
    info!(
        profile = %profile.name,
        total,
        filter = where_clause.as_deref().unwrap_or("<all>"),
        "building parts view"
    );

    let mut batch: Vec<PartRow> = Vec::with_capacity(BATCH_SIZE);
    store.for_each_component(where_clause.as_deref(), |component| {
        batch.push(translator.translate(&component, &profile.price)?);
        if batch.len() >= BATCH_SIZE {
            view.insert_rows(&batch)?;
            batch.clear();
        }
        Ok(())
    })?;
    view.insert_rows(&batch)?;

    view.populate_categories()?;
    view.optimize()?;
    view.write_meta(&profile.output_name(), reference_time)?;
    let part_count = view.part_count;
    view.close()?;

    let stats = translator.stats();
    info!(
        profile = %profile.name,
        parts = part_count,
        price_tiers = stats.total,
        tiers_trimmed = stats.deleted,
        "parts view complete"
    );

    Ok(BuildOutcome {
        profile: profile.name.clone(),
        part_count,
        output: out.to_path_buf(),
    })
}

/// An output database under construction
struct PartsView {
    conn: Connection,
    path: PathBuf,
    part_count: usize,
}

impl PartsView {
    fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        for stmt in CREATE_STATEMENTS {
            conn.execute(stmt, [])?;
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            part_count: 0,
        })
    }

    fn insert_rows(&mut self, rows: &[PartRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO parts VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.lcsc_part,
                    row.first_category,
                    row.second_category,
                    row.mfr_part,
                    row.package,
                    row.solder_joint,
                    row.manufacturer,
                    row.library_type,
                    row.description,
                    row.datasheet,
                    row.price,
                    row.stock,
                ])?;
            }
        }
        tx.commit()?;
        self.part_count += rows.len();
        debug!(inserted = rows.len(), total = self.part_count, "inserted parts");
        Ok(())
    }

    fn populate_categories(&self) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO categories
               SELECT DISTINCT "First Category", "Second Category" FROM parts
               ORDER BY UPPER("First Category"), UPPER("Second Category")"#,
            [],
        )?;
        Ok(())
    }

    /// FTS5 index merge; keeps query times down for the consumer
    fn optimize(&self) -> Result<()> {
        self.conn
            .execute("INSERT INTO parts(parts) VALUES('optimize')", [])?;
        Ok(())
    }

    fn write_meta(&self, filename: &str, reference_time: i64) -> Result<()> {
        let timestamp = DateTime::from_timestamp(reference_time, 0).unwrap_or_default();
        let size = self.path.metadata().map(|m| m.len()).unwrap_or(0);
        self.conn.execute(
            "INSERT INTO meta VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                filename,
                size as i64,
                self.part_count as i64,
                timestamp.date_naive().to_string(),
                timestamp.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string(),
            ],
        )?;
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| PipelineError::Database(err))
    }
}

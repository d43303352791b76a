//! Parts-view builds: determinism, profile predicates, failure modes

use jlcdb_build::model::{Component, LcscId, PriceBreak};
use jlcdb_build::partsview;
use jlcdb_build::profiles::FilterProfile;
use jlcdb_build::store::ComponentStore;
use jlcdb_build::PipelineError;
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

const DAY: i64 = 24 * 60 * 60;
const NOW: i64 = 1_750_000_000;

fn component(lcsc: i64, stock: i64, last_update: i64) -> Component {
    Component {
        lcsc: LcscId(lcsc),
        category: "Capacitors".to_string(),
        subcategory: "Multilayer Ceramic Capacitors MLCC - SMD/SMT".to_string(),
        mfr: format!("CL05A{lcsc}"),
        package: "0402".to_string(),
        joints: 2,
        manufacturer: "Samsung Electro-Mechanics".to_string(),
        basic: false,
        preferred: false,
        description: "10uF ±20% 16V Multilayer Ceramic Capacitor ROHS".to_string(),
        datasheet: "https://datasheet.lcsc.com/cap.pdf".to_string(),
        stock,
        prices: vec![PriceBreak {
            q_from: 1,
            q_to: None,
            price: 0.013,
        }],
        extra: Some(json!({"attributes": {"Capacitance": "10uF"}})),
        last_update,
    }
}

/// Write a snapshot holding `flagged` preferred parts out of `total`
fn make_snapshot(path: &Path, total: i64, flagged: i64) {
    let mut store = ComponentStore::open(path).unwrap();
    let mut batch = Vec::new();
    for i in 1..=total {
        let mut comp = component(i, 1000, NOW);
        if i <= flagged {
            comp.preferred = true;
        }
        batch.push(comp);
        if batch.len() == 1000 {
            store.upsert_batch(&batch).unwrap();
            batch.clear();
        }
    }
    store.upsert_batch(&batch).unwrap();
}

fn profile(name: &str) -> FilterProfile {
    FilterProfile::builtin()
        .into_iter()
        .find(|p| p.name == name)
        .unwrap()
}

fn part_count(db: &Path) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row("SELECT COUNT(*) FROM parts", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn build_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    make_snapshot(&snapshot, 500, 20);

    let out_a = dir.path().join("a.db");
    let out_b = dir.path().join("b.db");
    partsview::build(&profile("all"), &snapshot, &out_a).unwrap();
    partsview::build(&profile("all"), &snapshot, &out_b).unwrap();

    assert_eq!(
        jlcdb_common::checksum::compute_file_checksum(&out_a).unwrap(),
        jlcdb_common::checksum::compute_file_checksum(&out_b).unwrap()
    );
}

#[test]
fn preferred_profile_selects_exactly_the_flagged_parts() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    make_snapshot(&snapshot, 10_000, 120);

    let out = dir.path().join("parts-preferred-fts5.db");
    let outcome = partsview::build(&profile("preferred"), &snapshot, &out).unwrap();

    assert_eq!(outcome.part_count, 120);
    assert_eq!(part_count(&out), 120);
}

#[test]
fn recently_stocked_profile_excludes_long_unstocked_parts() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    {
        let mut store = ComponentStore::open(&snapshot).unwrap();
        // Part 1 is fresh; part 2 was last in stock 400 days before the
        // latest scrape and has been reconfirmed out-of-stock since.
        store.upsert_batch(&[component(1, 50, NOW)]).unwrap();
        store
            .upsert_batch(&[component(2, 10, NOW - 400 * DAY)])
            .unwrap();
        store.upsert_batch(&[component(2, 0, NOW)]).unwrap();
    }

    let out = dir.path().join("parts-recently-stocked-fts5.db");
    let outcome = partsview::build(&profile("recently-stocked"), &snapshot, &out).unwrap();
    assert_eq!(outcome.part_count, 1);

    let conn = Connection::open(&out).unwrap();
    let lcsc: String = conn
        .query_row("SELECT \"LCSC Part\" FROM parts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(lcsc, "C1");
}

#[test]
fn empty_profile_produces_valid_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    make_snapshot(&snapshot, 50, 5);

    let out = dir.path().join("parts-empty-fts5.db");
    let outcome = partsview::build(&profile("empty"), &snapshot, &out).unwrap();

    assert_eq!(outcome.part_count, 0);
    assert_eq!(part_count(&out), 0);

    // Structurally complete: meta row present with a zero part count.
    let conn = Connection::open(&out).unwrap();
    let (filename, partcount): (String, i64) = conn
        .query_row("SELECT filename, partcount FROM meta", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(filename, "parts-empty-fts5.db");
    assert_eq!(partcount, 0);
}

#[test]
fn empty_snapshot_fails_fast_for_non_empty_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    // Schema but no components.
    drop(ComponentStore::open(&snapshot).unwrap());

    let out = dir.path().join("parts-all-fts5.db");
    let err = partsview::build(&profile("all"), &snapshot, &out).unwrap_err();
    assert!(matches!(err, PipelineError::ProfileBuild { .. }));
    assert!(!out.exists());
}

#[test]
fn missing_snapshot_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.sqlite3");
    let out = dir.path().join("out.db");
    let err = partsview::build(&profile("all"), &missing, &out).unwrap_err();
    assert!(matches!(err, PipelineError::ProfileBuild { .. }));
}

#[test]
fn empty_profile_still_fails_on_unreadable_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.sqlite3");
    let out = dir.path().join("out.db");
    assert!(partsview::build(&profile("empty"), &missing, &out).is_err());
}

#[test]
fn full_text_search_finds_parts_by_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    make_snapshot(&snapshot, 20, 0);

    let out = dir.path().join("parts-all-fts5.db");
    partsview::build(&profile("all"), &snapshot, &out).unwrap();

    let conn = Connection::open(&out).unwrap();
    let hits: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM parts WHERE parts MATCH 'ceramic'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(hits, 20);

    let misses: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM parts WHERE parts MATCH 'inductor'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(misses, 0);
}

#[test]
fn build_compresses_prices_into_tier_strings() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.sqlite3");
    {
        let mut store = ComponentStore::open(&snapshot).unwrap();
        let mut comp = component(1, 100, NOW);
        comp.prices = vec![
            PriceBreak {
                q_from: 1,
                q_to: Some(99),
                price: 0.05,
            },
            PriceBreak {
                q_from: 100,
                q_to: Some(499),
                price: 0.05,
            },
            PriceBreak {
                q_from: 500,
                q_to: None,
                price: 0.04,
            },
        ];
        store.upsert_batch(&[comp]).unwrap();
    }

    let out = dir.path().join("parts-all-fts5.db");
    partsview::build(&profile("all"), &snapshot, &out).unwrap();

    let conn = Connection::open(&out).unwrap();
    let price: String = conn
        .query_row("SELECT Price FROM parts", [], |row| row.get(0))
        .unwrap();
    // Equal-price tiers merged, final tier open-ended.
    assert_eq!(price, "1-499:0.050,500-:0.040");
}

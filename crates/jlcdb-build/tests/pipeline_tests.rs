//! Full pipeline runs against a mocked catalog API
//!
//! Exercises the stage machine end to end: scrape, maintenance passes,
//! concurrent profile builds, split and the publish commit point.

use jlcdb_build::api::client::RetryPolicy;
use jlcdb_build::pipeline::{Pipeline, PipelineConfig, COMPONENTS_ARTIFACT};
use jlcdb_build::profiles::FilterProfile;
use jlcdb_build::store::ComponentStore;
use jlcdb_common::chunk::ChunkManifest;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn raw_entry(lcsc: i64, basic: bool) -> Value {
    json!({
        "componentCode": format!("C{lcsc}"),
        "firstSortName": "Chip Resistor - Surface Mount",
        "secondSortName": "Resistors",
        "componentModelEn": format!("0603WAF{lcsc}"),
        "componentSpecificationEn": "0603",
        "componentBrandEn": "UNI-ROYAL(Uniroyal Elec)",
        "componentLibraryType": if basic { "base" } else { "expand" },
        "preferredComponentFlag": false,
        "describe": "1kΩ ±1% 100mW Chip Resistor ROHS",
        "dataManualUrl": "https://datasheet.lcsc.com/ds.pdf",
        "stockCount": 10_000,
        "componentPrices": [
            {"startNumber": 1, "endNumber": -1, "productPrice": 0.004}
        ]
    })
}

async fn mount_api(server: &MockServer, entries: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/getXSRFToken"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "XSRF-TOKEN=test-token; Path=/"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/selectSmtComponentList"))
        .and(body_partial_json(json!({"searchType": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "data": {"sortAndCountVoList": [{
                "sortName": "Resistors",
                "childSortList": [
                    {"sortName": "Chip Resistor - Surface Mount",
                     "componentCount": entries.len()}
                ]
            }]}
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/selectSmtComponentList"))
        .and(body_partial_json(json!({"searchType": 2, "currentPage": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "data": {"componentPageInfo": {"list": entries}}
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/selectSmtComponentList"))
        .and(body_partial_json(json!({"searchType": 2, "currentPage": 2})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 563, "message": "no more data"})),
        )
        .mount(server)
        .await;
}

fn test_config(server: &MockServer, work_dir: &Path, publish_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        publish_dir: publish_dir.to_path_buf(),
        previous_release_url: None,
        api_base_url: server.uri(),
        profiles: FilterProfile::builtin(),
        chunk_size: 16_384,
        page_delay: Duration::ZERO,
        retry: RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn full_run_publishes_every_artifact() {
    let server = MockServer::start().await;
    mount_api(&server, vec![raw_entry(1, true), raw_entry(2, false)]).await;

    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let publish = dir.path().join("publish");

    let report = Pipeline::new(test_config(&server, &work, &publish))
        .run()
        .await
        .unwrap();

    assert!(report.succeeded(), "report: {report:?}");
    assert_eq!(report.profiles.len(), 4);
    assert!(report.profiles.iter().all(|p| p.ok()));

    // Components release plus one release per profile, each with chunks,
    // manifest and sentinel.
    for artifact in [
        COMPONENTS_ARTIFACT.to_string(),
        "parts-recently-stocked-fts5.db.gz".to_string(),
        "parts-preferred-fts5.db.gz".to_string(),
        "parts-all-fts5.db.gz".to_string(),
        "parts-empty-fts5.db.gz".to_string(),
    ] {
        assert!(
            publish.join(ChunkManifest::manifest_file_name(&artifact)).exists(),
            "missing manifest for {artifact}"
        );
        assert!(publish.join(format!("{artifact}.001")).exists());
        assert!(publish.join(ChunkManifest::sentinel_file_name(&artifact)).exists());
    }

    // The published components release restores to a working store.
    let manifest =
        ChunkManifest::load(publish.join(ChunkManifest::manifest_file_name(COMPONENTS_ARTIFACT)))
            .unwrap();
    let restored = dir.path().join("restored.sqlite3");
    jlcdb_build::artifact::join_and_decompress(&manifest, &publish, &restored).unwrap();
    let store = ComponentStore::open_read_only(&restored).unwrap();
    assert_eq!(store.count_components(None).unwrap(), 2);
}

#[tokio::test]
async fn empty_scrape_fails_builds_and_blocks_publish() {
    let server = MockServer::start().await;
    // Upstream returns an empty first page everywhere; the store stays
    // empty.
    mount_api(&server, Vec::new()).await;

    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let publish = dir.path().join("publish");

    let report = Pipeline::new(test_config(&server, &work, &publish))
        .run()
        .await
        .unwrap();

    assert!(!report.succeeded());
    assert!(!report.published);

    // The empty profile is the only one whose build legitimately succeeds.
    let failed: Vec<&str> = report
        .profiles
        .iter()
        .filter(|p| !p.ok())
        .map(|p| p.profile.as_str())
        .collect();
    assert_eq!(failed, ["recently-stocked", "preferred", "all"]);

    // Nothing reaches the publish directory.
    assert!(!publish.exists() || std::fs::read_dir(&publish).unwrap().next().is_none());
}

//! Round-trip and failure-mode tests for the artifact splitter/joiner

use jlcdb_common::chunk::{chunk_file_name, join, split, ChunkManifest};
use jlcdb_common::JlcdbError;
use std::path::{Path, PathBuf};

fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn roundtrip(bytes: &[u8], chunk_size: u64) {
    let dir = tempfile::tempdir().unwrap();
    let chunks_dir = dir.path().join("chunks");
    let input = write_input(dir.path(), "cache.sqlite3.gz", bytes);

    let manifest = split(&input, chunk_size, &chunks_dir).unwrap();

    let output = dir.path().join("restored.gz");
    join(&manifest, &chunks_dir, &output).unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), bytes);
}

// ============================================================================
// Round-trip properties
// ============================================================================

#[test]
fn roundtrip_empty_file() {
    roundtrip(b"", 1);
    roundtrip(b"", 1024);
}

#[test]
fn roundtrip_file_smaller_than_one_chunk() {
    roundtrip(b"tiny", 1024);
}

#[test]
fn roundtrip_exact_chunk_boundary() {
    let data = vec![0xabu8; 4096];
    roundtrip(&data, 1024);
    roundtrip(&data, 4096);
}

#[test]
fn roundtrip_chunk_size_one() {
    roundtrip(b"abcdef", 1);
}

#[test]
fn roundtrip_uneven_tail() {
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    roundtrip(&data, 4099);
}

#[test]
fn split_declares_total_and_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "parts.db.gz", &[1u8; 10_000]);
    let manifest = split(&input, 3000, dir.path()).unwrap();

    assert_eq!(manifest.chunk_count(), 4);
    let mut indexes: Vec<u32> = manifest.chunks.iter().map(|c| c.index).collect();
    indexes.sort_unstable();
    assert_eq!(indexes, vec![1, 2, 3, 4]);
    for chunk in &manifest.chunks {
        assert!(dir.path().join(chunk_file_name("parts.db.gz", chunk.index)).exists());
    }
}

#[test]
fn join_is_indifferent_to_manifest_chunk_order() {
    let dir = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 13) as u8).collect();
    let input = write_input(dir.path(), "cache.gz", &data);

    let mut manifest = split(&input, 7777, dir.path()).unwrap();
    // Chunks arrive as independent assets; the declared index drives
    // reassembly, so a scrambled listing must still join correctly.
    manifest.chunks.reverse();

    let output = dir.path().join("out.gz");
    join(&manifest, dir.path(), &output).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn join_fails_on_missing_chunk_and_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "cache.gz", &[9u8; 9000]);
    let manifest = split(&input, 2048, dir.path()).unwrap();

    std::fs::remove_file(dir.path().join(manifest.chunk_file_name(3))).unwrap();

    let output = dir.path().join("out.gz");
    let err = join(&manifest, dir.path(), &output).unwrap_err();
    assert!(matches!(err, JlcdbError::Reconstruction(_)));
    assert!(!output.exists());
}

#[test]
fn join_fails_on_duplicated_index() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "cache.gz", &[5u8; 6000]);
    let mut manifest = split(&input, 2048, dir.path()).unwrap();

    // Corrupt the declared chunk set: index 2 appears twice, 3 never.
    let dup = manifest.chunks[0].clone();
    manifest.chunks[2] = jlcdb_common::chunk::ChunkInfo {
        index: 2,
        ..dup
    };

    let output = dir.path().join("out.gz");
    let err = join(&manifest, dir.path(), &output).unwrap_err();
    assert!(matches!(err, JlcdbError::Reconstruction(_)));
    assert!(!output.exists());
}

#[test]
fn join_fails_on_corrupted_chunk_content() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "cache.gz", &[3u8; 5000]);
    let manifest = split(&input, 2000, dir.path()).unwrap();

    let victim = dir.path().join(manifest.chunk_file_name(2));
    let mut bytes = std::fs::read(&victim).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(&victim, bytes).unwrap();

    let output = dir.path().join("out.gz");
    let err = join(&manifest, dir.path(), &output).unwrap_err();
    assert!(matches!(err, JlcdbError::Reconstruction(_)));
    assert!(!output.exists());
}

#[test]
fn manifest_load_rejects_inconsistent_count() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "cache.gz", &[8u8; 4000]);
    let manifest = split(&input, 1000, dir.path()).unwrap();

    let manifest_path = dir.path().join(ChunkManifest::manifest_file_name("cache.gz"));
    let mut value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
    value["chunk_count"] = serde_json::json!(manifest.chunk_count() + 1);
    std::fs::write(&manifest_path, value.to_string()).unwrap();

    assert!(ChunkManifest::load(&manifest_path).is_err());
}

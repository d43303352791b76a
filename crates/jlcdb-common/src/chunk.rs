//! Artifact chunking
//!
//! Release hosting limits the size of a single uploaded file, so large
//! database artifacts are split into numbered chunks (`<name>.001`,
//! `<name>.002`, ...) accompanied by a JSON manifest and a plain-text
//! sentinel file holding the chunk count. Consumers download the chunks as
//! independent assets and reassemble them; the joiner validates index
//! coverage, per-chunk checksums and the whole-file checksum before it will
//! produce an output file.
//!
//! Reassembly is driven by the declared chunk index, never by arrival or
//! directory order.

use crate::checksum::{compute_bytes_checksum, compute_file_checksum};
use crate::error::{JlcdbError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata for a single chunk of a split artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// 1-based sequence index
    pub index: u32,
    /// Chunk size in bytes
    pub size: u64,
    /// SHA-256 of the chunk contents, hex-encoded
    pub sha256: String,
}

/// Manifest describing a split artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// File name of the original artifact (no directory component)
    pub artifact: String,
    /// Total size of the original artifact in bytes
    pub total_size: u64,
    /// SHA-256 of the original artifact, hex-encoded
    pub sha256: String,
    /// Maximum chunk size the artifact was split with
    pub max_chunk_size: u64,
    /// Declared number of chunks
    pub chunk_count: u32,
    /// Per-chunk metadata; may appear in any order
    pub chunks: Vec<ChunkInfo>,
}

impl ChunkManifest {
    /// Number of chunks declared by this manifest
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// File name of the chunk with the given 1-based index
    pub fn chunk_file_name(&self, index: u32) -> String {
        chunk_file_name(&self.artifact, index)
    }

    /// Manifest file name for an artifact
    pub fn manifest_file_name(artifact: &str) -> String {
        format!("{artifact}.manifest.json")
    }

    /// Sentinel file name for an artifact (plain text chunk count)
    pub fn sentinel_file_name(artifact: &str) -> String {
        format!("{artifact}.chunks")
    }

    /// Load a manifest from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let manifest: ChunkManifest = serde_json::from_reader(BufReader::new(file))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Write the manifest (and the sentinel) into a directory
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::manifest_file_name(&self.artifact));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        std::fs::write(
            dir.join(Self::sentinel_file_name(&self.artifact)),
            format!("{}\n", self.chunk_count),
        )?;
        Ok(path)
    }

    /// Check internal consistency: indexes must cover 1..=chunk_count with
    /// no duplicates, and the sizes must add up to the declared total.
    pub fn validate(&self) -> Result<()> {
        if self.chunks.len() as u32 != self.chunk_count {
            return Err(JlcdbError::InvalidManifest(format!(
                "manifest for '{}' declares {} chunks but lists {}",
                self.artifact,
                self.chunk_count,
                self.chunks.len()
            )));
        }

        let mut seen = vec![false; self.chunk_count as usize];
        for chunk in &self.chunks {
            if chunk.index == 0 || chunk.index > self.chunk_count {
                return Err(JlcdbError::reconstruction(format!(
                    "chunk index {} out of range 1..={} for '{}'",
                    chunk.index, self.chunk_count, self.artifact
                )));
            }
            let slot = &mut seen[(chunk.index - 1) as usize];
            if *slot {
                return Err(JlcdbError::reconstruction(format!(
                    "duplicate chunk index {} for '{}'",
                    chunk.index, self.artifact
                )));
            }
            *slot = true;
        }
        // Full coverage follows from len == count and no duplicates.

        let sum: u64 = self.chunks.iter().map(|c| c.size).sum();
        if sum != self.total_size {
            return Err(JlcdbError::reconstruction(format!(
                "chunk sizes for '{}' sum to {} but the artifact is {} bytes",
                self.artifact, sum, self.total_size
            )));
        }
        Ok(())
    }

    /// Chunks ordered by their declared index
    fn ordered_chunks(&self) -> Vec<&ChunkInfo> {
        let mut ordered: Vec<&ChunkInfo> = self.chunks.iter().collect();
        ordered.sort_by_key(|c| c.index);
        ordered
    }
}

/// File name of chunk `index` (1-based) of `artifact`
pub fn chunk_file_name(artifact: &str, index: u32) -> String {
    format!("{artifact}.{index:03}")
}

/// Split a file into size-bounded chunks.
///
/// Writes `<name>.001`, `<name>.002`, ... plus the manifest and sentinel
/// into `out_dir` and returns the manifest. An empty input file produces
/// zero chunks and a valid manifest.
pub fn split(file: &Path, max_chunk_size: u64, out_dir: &Path) -> Result<ChunkManifest> {
    if max_chunk_size == 0 {
        return Err(JlcdbError::Config(
            "chunk size must be at least 1 byte".to_string(),
        ));
    }
    let artifact = file_name(file)?;
    std::fs::create_dir_all(out_dir)?;

    let total_size = file.metadata()?.len();
    let sha256 = compute_file_checksum(file)?;

    let mut reader = BufReader::new(File::open(file)?);
    let mut chunks = Vec::new();
    let mut buffer = vec![0u8; max_chunk_size as usize];

    loop {
        let filled = fill_buffer(&mut reader, &mut buffer)?;
        if filled == 0 {
            break;
        }
        let data = &buffer[..filled];
        let index = chunks.len() as u32 + 1;
        let name = chunk_file_name(&artifact, index);
        std::fs::write(out_dir.join(&name), data)?;
        debug!(chunk = %name, size = filled, "wrote chunk");
        chunks.push(ChunkInfo {
            index,
            size: filled as u64,
            sha256: compute_bytes_checksum(data),
        });
    }

    let manifest = ChunkManifest {
        artifact: artifact.clone(),
        total_size,
        sha256,
        max_chunk_size,
        chunk_count: chunks.len() as u32,
        chunks,
    };
    manifest.save(out_dir)?;
    info!(
        artifact = %artifact,
        chunks = manifest.chunk_count,
        bytes = total_size,
        "split artifact"
    );
    Ok(manifest)
}

/// Reassemble a split artifact.
///
/// Reads the chunks named by `manifest` from `dir` and writes the
/// reconstructed file to `output`. Every chunk's size and checksum and the
/// final whole-file checksum are verified; on any failure the partial
/// output is removed and `JlcdbError::Reconstruction` (or
/// `ChecksumMismatch`) is returned, so a failed join never leaves a file
/// behind.
pub fn join(manifest: &ChunkManifest, dir: &Path, output: &Path) -> Result<()> {
    manifest.validate()?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Assemble into a scratch file next to the target so a failure part-way
    // through can be cleaned up without touching `output`.
    let scratch = scratch_path(output);
    let result = join_into(manifest, dir, &scratch);
    match result {
        Ok(()) => {
            std::fs::rename(&scratch, output)?;
            info!(artifact = %manifest.artifact, output = %output.display(), "joined artifact");
            Ok(())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&scratch);
            Err(err)
        }
    }
}

fn join_into(manifest: &ChunkManifest, dir: &Path, scratch: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(scratch)?);

    for chunk in manifest.ordered_chunks() {
        let name = manifest.chunk_file_name(chunk.index);
        let path = dir.join(&name);
        let data = std::fs::read(&path).map_err(|e| {
            JlcdbError::reconstruction(format!("chunk '{name}' is missing or unreadable: {e}"))
        })?;
        if data.len() as u64 != chunk.size {
            return Err(JlcdbError::reconstruction(format!(
                "chunk '{}' is {} bytes, expected {}",
                name,
                data.len(),
                chunk.size
            )));
        }
        let actual = compute_bytes_checksum(&data);
        if actual != chunk.sha256 {
            return Err(JlcdbError::reconstruction(format!(
                "chunk '{}' checksum mismatch: expected {}, got {}",
                name, chunk.sha256, actual
            )));
        }
        writer.write_all(&data)?;
    }
    writer.flush()?;
    drop(writer);

    let actual = compute_file_checksum(scratch)?;
    if actual != manifest.sha256 {
        return Err(JlcdbError::reconstruction(format!(
            "reassembled '{}' checksum mismatch: expected {}, got {}",
            manifest.artifact, manifest.sha256, actual
        )));
    }
    Ok(())
}

fn scratch_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    name.push_str(".part");
    output.with_file_name(name)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| JlcdbError::Config(format!("not a file path: {}", path.display())))
}

/// Read up to `buffer.len()` bytes, tolerating short reads
fn fill_buffer<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

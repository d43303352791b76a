//! Release artifact plumbing
//!
//! Published databases travel as gzip-compressed files split into
//! upload-sized chunks (see [`jlcdb_common::chunk`]). This module owns the
//! compress-then-split side used when publishing and the
//! fetch-then-join-then-decompress side used to restore the previous
//! components store at the start of a run.

use crate::error::{PipelineError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use jlcdb_common::chunk::{join, split, ChunkManifest};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Maximum chunk size: 80 MB, comfortably below the 100 MB release-asset
/// limit
pub const DEFAULT_CHUNK_SIZE: u64 = 80_000_000;

/// Gzip a database and split the result into chunks under `out_dir`.
///
/// The intermediate `.gz` file is deleted after splitting; only the
/// chunks, manifest and sentinel remain.
pub fn compress_and_split(file: &Path, max_chunk_size: u64, out_dir: &Path) -> Result<ChunkManifest> {
    std::fs::create_dir_all(out_dir)?;
    let name = file
        .file_name()
        .ok_or_else(|| PipelineError::Config(format!("not a file: {}", file.display())))?
        .to_string_lossy();
    let gz_path = out_dir.join(format!("{name}.gz"));

    compress(file, &gz_path)?;
    let manifest = split(&gz_path, max_chunk_size, out_dir)?;
    std::fs::remove_file(&gz_path)?;
    Ok(manifest)
}

/// Reassemble and decompress a fetched artifact into `out`
pub fn join_and_decompress(manifest: &ChunkManifest, dir: &Path, out: &Path) -> Result<()> {
    let gz_path = dir.join(format!("{}.joined", manifest.artifact));
    join(manifest, dir, &gz_path)?;
    let result = decompress(&gz_path, out);
    let _ = std::fs::remove_file(&gz_path);
    result
}

fn compress(input: &Path, output: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(output)?), Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(())
}

fn decompress(input: &Path, output: &Path) -> Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(input)?));
    let mut writer = BufWriter::new(File::create(output)?);
    std::io::copy(&mut decoder, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Download a previous release's chunk set into `dest_dir`.
///
/// Fetches `<base_url>/<artifact>.manifest.json` first; a 404 there means
/// no prior release exists (the first run), reported as `Ok(None)` so the
/// caller can bootstrap an empty store. Any other failure is an error.
pub async fn fetch_release(
    client: &reqwest::Client,
    base_url: &str,
    artifact: &str,
    dest_dir: &Path,
) -> Result<Option<ChunkManifest>> {
    std::fs::create_dir_all(dest_dir)?;
    let manifest_url = format!("{}/{}", base_url, ChunkManifest::manifest_file_name(artifact));

    let response = client.get(&manifest_url).send().await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        warn!(url = %manifest_url, "no previous release manifest");
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(PipelineError::Api {
            code: response.status().as_u16() as i64,
            message: format!("fetching {manifest_url}"),
        });
    }
    let manifest: ChunkManifest = response.json().await?;
    manifest.validate().map_err(PipelineError::Artifact)?;

    let progress = ProgressBar::new(manifest.total_size);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("Invalid progress bar template")
            .progress_chars("#>-"),
    );
    progress.set_message(format!("Downloading {artifact}"));

    for index in 1..=manifest.chunk_count() {
        let name = manifest.chunk_file_name(index);
        let url = format!("{base_url}/{name}");
        download_file(client, &url, &dest_dir.join(&name), &progress).await?;
    }
    progress.finish_with_message(format!("Downloaded {artifact}"));

    manifest.save(dest_dir).map_err(PipelineError::Artifact)?;
    info!(artifact, chunks = manifest.chunk_count(), "fetched previous release");
    Ok(Some(manifest))
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    progress: &ProgressBar,
) -> Result<()> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(PipelineError::Api {
            code: response.status().as_u16() as i64,
            message: format!("fetching {url}"),
        });
    }
    let mut file = BufWriter::new(File::create(output)?);
    let mut stream = response.bytes_stream();
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        file.write_all(&piece)?;
        progress.inc(piece.len() as u64);
    }
    file.flush()?;
    Ok(())
}

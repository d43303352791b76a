//! jlcdb-build - JLCPCB parts database build pipeline

use anyhow::Result;
use clap::{Parser, Subcommand};
use jlcdb_build::artifact::DEFAULT_CHUNK_SIZE;
use jlcdb_build::pipeline::{Pipeline, PipelineConfig};
use jlcdb_build::profiles::FilterProfile;
use jlcdb_build::scraper::{JlcPageSource, Scraper};
use jlcdb_build::store::{ComponentStore, DEFAULT_AGE_OUT_SECS, DEFAULT_COMPACT_SECS};
use jlcdb_build::{api::JlcClient, partsview};
use jlcdb_common::chunk::{join, split, ChunkManifest};
use jlcdb_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jlcdb-build")]
#[command(author, version, about = "JLCPCB parts database build pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: fetch, scrape, maintain, build, split, publish
    Run {
        /// Scratch directory for intermediate databases
        #[arg(long, default_value = "db_working")]
        work_dir: PathBuf,

        /// Directory the finished chunk sets are published into
        #[arg(long, default_value = "publish")]
        publish_dir: PathBuf,

        /// Base URL of the previous components release to resume from
        #[arg(long)]
        previous_release_url: Option<String>,

        /// Profile configuration file (JSON); defaults to the built-ins
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Maximum chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
    },

    /// Scrape the catalog into a local components store
    Scrape {
        /// Components store database
        #[arg(long, default_value = "db_working/cache.sqlite3")]
        store: PathBuf,

        /// Skip the age-out and compaction passes after the scrape
        #[arg(long)]
        skip_maintenance: bool,
    },

    /// Build parts-view databases from an existing components store
    BuildViews {
        /// Components store (or snapshot) to read
        #[arg(long, default_value = "db_working/cache.sqlite3")]
        snapshot: PathBuf,

        /// Output directory for the view databases
        #[arg(long, default_value = "db_working/views")]
        out_dir: PathBuf,

        /// Profile configuration file (JSON); defaults to the built-ins
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Build only the named profile
        #[arg(long)]
        profile: Option<String>,
    },

    /// Split a file into upload-sized, checksummed chunks
    Split {
        /// File to split
        file: PathBuf,

        /// Output directory for chunks, manifest and sentinel
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Maximum chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
    },

    /// Reassemble chunks into the original file
    Join {
        /// Chunk manifest (…manifest.json)
        manifest: PathBuf,

        /// Output file
        #[arg(long)]
        out: PathBuf,
    },
}

fn load_profiles(path: Option<&PathBuf>) -> Result<Vec<FilterProfile>> {
    Ok(match path {
        Some(path) => FilterProfile::load_file(path)?,
        None => FilterProfile::builtin(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            work_dir,
            publish_dir,
            previous_release_url,
            profiles,
            chunk_size,
        } => {
            let config = PipelineConfig {
                work_dir,
                publish_dir,
                previous_release_url,
                profiles: load_profiles(profiles.as_ref())?,
                chunk_size,
                ..PipelineConfig::default()
            };
            let report = Pipeline::new(config).run().await?;
            report.log_summary();
            if !report.succeeded() {
                std::process::exit(1);
            }
        }

        Command::Scrape {
            store,
            skip_maintenance,
        } => {
            if let Some(parent) = store.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut db = ComponentStore::open(&store)?;
            let now = chrono::Utc::now().timestamp();
            let scraper = Scraper::new(JlcPageSource::new(JlcClient::production()?));
            let stats = scraper.scrape(&mut db, now).await?;
            info!(records = stats.records, skipped = stats.skipped, "scrape done");
            if !skip_maintenance {
                db.fix_descriptions()?;
                db.age_out_stock(DEFAULT_AGE_OUT_SECS, now)?;
                db.compact(DEFAULT_COMPACT_SECS, now)?;
            }
        }

        Command::BuildViews {
            snapshot,
            out_dir,
            profiles,
            profile,
        } => {
            let mut selected = load_profiles(profiles.as_ref())?;
            if let Some(name) = profile {
                selected.retain(|p| p.name == name);
                if selected.is_empty() {
                    anyhow::bail!("no profile named '{name}'");
                }
            }
            let mut failures = 0;
            for profile in &selected {
                let out = out_dir.join(profile.output_name());
                match partsview::build(profile, &snapshot, &out) {
                    Ok(outcome) => {
                        info!(profile = %outcome.profile, parts = outcome.part_count, "built")
                    }
                    Err(err) => {
                        tracing::error!(profile = %profile.name, error = %err, "build failed");
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                std::process::exit(1);
            }
        }

        Command::Split {
            file,
            out_dir,
            chunk_size,
        } => {
            let manifest = split(&file, chunk_size, &out_dir)?;
            info!(
                artifact = %manifest.artifact,
                chunks = manifest.chunk_count(),
                "split complete"
            );
        }

        Command::Join { manifest, out } => {
            let dir = manifest
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let manifest = ChunkManifest::load(&manifest)?;
            join(&manifest, &dir, &out)?;
            info!(out = %out.display(), "join complete");
        }
    }

    Ok(())
}

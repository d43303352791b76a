//! Pipeline orchestration
//!
//! Sequences the build stages, isolates per-profile build failures, and
//! publishes atomically: outputs accumulate in a staging directory and
//! move into the publish directory only after every mandatory artifact
//! exists, so a failed run never corrupts what a prior run published.
//!
//! Store-mutating stages run strictly sequentially; the per-profile view
//! builds run concurrently on blocking tasks over a read-only snapshot
//! taken after the last mutation.

use crate::api::client::{JlcClient, RetryPolicy, DEFAULT_BASE_URL};
use crate::artifact::{self, DEFAULT_CHUNK_SIZE};
use crate::error::Result;
use crate::partsview;
use crate::profiles::FilterProfile;
use crate::scraper::{JlcPageSource, ScrapeStats, Scraper, DEFAULT_PAGE_DELAY};
use crate::store::{ComponentStore, DEFAULT_AGE_OUT_SECS, DEFAULT_COMPACT_SECS};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// File name of the components cache database
pub const COMPONENTS_DB_NAME: &str = "cache.sqlite3";

/// Release artifact name of the (compressed) components cache
pub const COMPONENTS_ARTIFACT: &str = "cache.sqlite3.gz";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchPrevious,
    Join,
    ScrapeUpdate,
    AgeOut,
    Compact,
    BuildPartsViews,
    SplitAll,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::FetchPrevious => "fetch-previous",
            Stage::Join => "join",
            Stage::ScrapeUpdate => "scrape-update",
            Stage::AgeOut => "age-out",
            Stage::Compact => "compact",
            Stage::BuildPartsViews => "build-parts-views",
            Stage::SplitAll => "split-all",
            Stage::Publish => "publish",
        };
        write!(f, "{name}")
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Scratch directory for the store, snapshot, views and staging
    pub work_dir: PathBuf,
    /// Directory the finished chunk sets are moved into
    pub publish_dir: PathBuf,
    /// Base URL of the previous release; `None` reuses a local store (or
    /// bootstraps an empty one)
    pub previous_release_url: Option<String>,
    /// Catalog API base URL
    pub api_base_url: String,
    /// Profiles to build, one parts view each
    pub profiles: Vec<FilterProfile>,
    pub chunk_size: u64,
    pub age_out_secs: i64,
    pub compact_secs: i64,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("db_working"),
            publish_dir: PathBuf::from("publish"),
            previous_release_url: None,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            profiles: FilterProfile::builtin(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            age_out_secs: DEFAULT_AGE_OUT_SECS,
            compact_secs: DEFAULT_COMPACT_SECS,
            page_delay: DEFAULT_PAGE_DELAY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one stage
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Outcome of one profile's parts-view build
#[derive(Debug, Clone)]
pub struct ProfileOutcome {
    pub profile: String,
    pub part_count: Option<usize>,
    pub error: Option<String>,
}

impl ProfileOutcome {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated result of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stages: Vec<StageOutcome>,
    pub scrape: Option<ScrapeStats>,
    pub profiles: Vec<ProfileOutcome>,
    pub published: bool,
}

impl RunReport {
    fn complete(&mut self, stage: Stage) {
        info!(stage = %stage, "stage complete");
        self.stages.push(StageOutcome {
            stage,
            ok: true,
            detail: None,
        });
    }

    fn fail(&mut self, stage: Stage, detail: impl std::fmt::Display) {
        error!(stage = %stage, error = %detail, "stage failed; halting pipeline");
        self.stages.push(StageOutcome {
            stage,
            ok: false,
            detail: Some(detail.to_string()),
        });
    }

    /// True when every stage and every profile succeeded and the outputs
    /// were published
    pub fn succeeded(&self) -> bool {
        self.published
            && self.stages.iter().all(|s| s.ok)
            && self.profiles.iter().all(ProfileOutcome::ok)
    }

    /// Log a human-readable summary of the run
    pub fn log_summary(&self) {
        for stage in &self.stages {
            if stage.ok {
                info!(stage = %stage.stage, "ok");
            } else {
                error!(stage = %stage.stage, error = %stage.detail.as_deref().unwrap_or("?"), "failed");
            }
        }
        if let Some(stats) = &self.scrape {
            info!(
                pages = stats.pages,
                records = stats.records,
                skipped = stats.skipped,
                "scrape totals"
            );
        }
        for profile in &self.profiles {
            match (&profile.part_count, &profile.error) {
                (Some(count), _) => info!(profile = %profile.profile, parts = count, "view built"),
                (None, Some(err)) => error!(profile = %profile.profile, error = %err, "view failed"),
                _ => {}
            }
        }
        if self.published {
            info!("all outputs published");
        } else {
            warn!("nothing published");
        }
    }
}

/// The pipeline runner
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run all stages.
    ///
    /// Stage failures are captured in the returned report rather than in
    /// the `Err` channel; `Err` is reserved for setup problems like an
    /// uncreatable work directory.
    pub async fn run(&self) -> Result<RunReport> {
        let config = &self.config;
        let mut report = RunReport::default();
        std::fs::create_dir_all(&config.work_dir)?;
        let store_path = config.work_dir.join(COMPONENTS_DB_NAME);

        // FetchPrevious + Join: restore the previous components release.
        if let Some(base_url) = &config.previous_release_url {
            let chunks_dir = config.work_dir.join("previous");
            let http = reqwest::Client::new();
            match artifact::fetch_release(&http, base_url, COMPONENTS_ARTIFACT, &chunks_dir).await
            {
                Ok(Some(manifest)) => {
                    report.complete(Stage::FetchPrevious);
                    match artifact::join_and_decompress(&manifest, &chunks_dir, &store_path) {
                        Ok(()) => report.complete(Stage::Join),
                        Err(err) => {
                            report.fail(Stage::Join, err);
                            return Ok(report);
                        }
                    }
                }
                Ok(None) => {
                    // First run: no release to restore, start from scratch.
                    info!("no previous release; bootstrapping an empty store");
                    report.complete(Stage::FetchPrevious);
                    report.complete(Stage::Join);
                }
                Err(err) => {
                    report.fail(Stage::FetchPrevious, err);
                    return Ok(report);
                }
            }
        } else {
            info!(store = %store_path.display(), "using local store; fetch skipped");
            report.complete(Stage::FetchPrevious);
            report.complete(Stage::Join);
        }

        // ScrapeUpdate: the only stage that talks to the catalog API.
        let now = Utc::now().timestamp();
        let mut store = match ComponentStore::open(&store_path) {
            Ok(store) => store,
            Err(err) => {
                report.fail(Stage::ScrapeUpdate, err);
                return Ok(report);
            }
        };
        let scrape_result = async {
            let client = JlcClient::new(&config.api_base_url)?.with_retry(config.retry);
            let scraper = Scraper::new(JlcPageSource::new(client))
                .with_retry(config.retry)
                .with_page_delay(config.page_delay);
            scraper.scrape(&mut store, now).await
        }
        .await;
        match scrape_result {
            Ok(stats) => {
                report.scrape = Some(stats);
                if let Err(err) = store.fix_descriptions() {
                    warn!(error = %err, "description repair failed; continuing");
                }
                report.complete(Stage::ScrapeUpdate);
            }
            Err(err) => {
                report.fail(Stage::ScrapeUpdate, err);
                return Ok(report);
            }
        }

        // AgeOut, then Compact, strictly in that order.
        if let Err(err) = store.age_out_stock(config.age_out_secs, now) {
            report.fail(Stage::AgeOut, err);
            return Ok(report);
        }
        report.complete(Stage::AgeOut);

        if let Err(err) = store.compact(config.compact_secs, now) {
            report.fail(Stage::Compact, err);
            return Ok(report);
        }
        report.complete(Stage::Compact);

        // BuildPartsViews: point-in-time snapshot, then concurrent builds.
        let snapshot_path = config.work_dir.join("snapshot.sqlite3");
        if snapshot_path.exists() {
            if let Err(err) = std::fs::remove_file(&snapshot_path) {
                report.fail(Stage::BuildPartsViews, err);
                return Ok(report);
            }
        }
        if let Err(err) = store.snapshot(&snapshot_path) {
            report.fail(Stage::BuildPartsViews, err);
            return Ok(report);
        }
        drop(store);

        let views_dir = config.work_dir.join("views");
        report.profiles = self
            .build_views(&snapshot_path, &views_dir)
            .await;
        let failed = report.profiles.iter().filter(|p| !p.ok()).count();
        if failed > 0 {
            report.fail(
                Stage::BuildPartsViews,
                format!("{failed} of {} profile builds failed", report.profiles.len()),
            );
            return Ok(report);
        }
        report.complete(Stage::BuildPartsViews);

        // SplitAll into staging.
        let staging = config.work_dir.join("staging");
        if let Err(err) = self.split_all(&store_path, &views_dir, &staging) {
            report.fail(Stage::SplitAll, err);
            return Ok(report);
        }
        report.complete(Stage::SplitAll);

        // Publish: the commit point.
        match publish_dir_swap(&staging, &config.publish_dir) {
            Ok(count) => {
                info!(files = count, dir = %config.publish_dir.display(), "published");
                report.published = true;
                report.complete(Stage::Publish);
            }
            Err(err) => report.fail(Stage::Publish, err),
        }
        Ok(report)
    }

    /// Fan the profile builds out over blocking tasks; every build runs to
    /// completion regardless of the others' outcomes
    async fn build_views(&self, snapshot: &Path, views_dir: &Path) -> Vec<ProfileOutcome> {
        let mut tasks = JoinSet::new();
        for profile in &self.config.profiles {
            let profile = profile.clone();
            let snapshot = snapshot.to_path_buf();
            let out = views_dir.join(profile.output_name());
            tasks.spawn_blocking(move || {
                let name = profile.name.clone();
                (name, partsview::build(&profile, &snapshot, &out))
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(outcome))) => outcomes.push(ProfileOutcome {
                    profile: name,
                    part_count: Some(outcome.part_count),
                    error: None,
                }),
                Ok((name, Err(err))) => outcomes.push(ProfileOutcome {
                    profile: name,
                    part_count: None,
                    error: Some(err.to_string()),
                }),
                Err(join_err) => outcomes.push(ProfileOutcome {
                    profile: "<panicked>".to_string(),
                    part_count: None,
                    error: Some(join_err.to_string()),
                }),
            }
        }
        // Completion order is nondeterministic; report in config order.
        let order: Vec<&str> = self.config.profiles.iter().map(|p| p.name.as_str()).collect();
        outcomes.sort_by_key(|o| {
            order
                .iter()
                .position(|n| *n == o.profile)
                .unwrap_or(usize::MAX)
        });
        outcomes
    }

    /// Compress and split the store plus every built view into `staging`
    fn split_all(&self, store_path: &Path, views_dir: &Path, staging: &Path) -> Result<()> {
        if staging.exists() {
            std::fs::remove_dir_all(staging)?;
        }
        std::fs::create_dir_all(staging)?;

        artifact::compress_and_split(store_path, self.config.chunk_size, staging)?;
        for profile in &self.config.profiles {
            let view = views_dir.join(profile.output_name());
            artifact::compress_and_split(&view, self.config.chunk_size, staging)?;
        }
        Ok(())
    }
}

/// Move every staged file into the publish directory, replacing the
/// previous release's files
fn publish_dir_swap(staging: &Path, publish_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(publish_dir)?;

    // Drop the previous release's files so stale higher-numbered chunks
    // can't linger next to a smaller new chunk set.
    for entry in std::fs::read_dir(publish_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }

    let mut moved = 0;
    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        let target = publish_dir.join(entry.file_name());
        std::fs::rename(entry.path(), &target).or_else(|_| {
            // Cross-device fallback
            std::fs::copy(entry.path(), &target)
                .map(|_| ())
                .and_then(|()| std::fs::remove_file(entry.path()))
        })?;
        moved += 1;
    }
    Ok(moved)
}

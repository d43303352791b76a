//! jlcdb Build Library
//!
//! The parts-database build pipeline: scrape the JLCPCB catalog API into an
//! authoritative SQLite component cache, age and compact that cache, derive
//! filtered full-text-search databases from it, and split every produced
//! database into upload-sized release chunks.
//!
//! # Pipeline stages
//!
//! ```text
//! FetchPrevious -> Join -> ScrapeUpdate -> AgeOut -> Compact
//!     -> BuildPartsViews (one per filter profile, concurrent)
//!     -> SplitAll -> Publish
//! ```
//!
//! # Example
//!
//! ```no_run
//! use jlcdb_build::pipeline::{Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default();
//!     let report = Pipeline::new(config).run().await?;
//!     report.log_summary();
//!     std::process::exit(if report.succeeded() { 0 } else { 1 });
//! }
//! ```

pub mod api;
pub mod artifact;
pub mod error;
pub mod model;
pub mod partsview;
pub mod pipeline;
pub mod profiles;
pub mod scraper;
pub mod store;
pub mod translate;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use model::{Component, LcscId, PriceBreak};
pub use profiles::FilterProfile;

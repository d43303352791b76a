//! jlcdb Common Library
//!
//! Shared types and utilities for the jlcdb build pipeline.
//!
//! # Overview
//!
//! This crate provides the functionality shared by the pipeline crates:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: File integrity verification utilities
//! - **Chunking**: Splitting large release artifacts into size-bounded,
//!   checksummed chunks and reassembling them byte-identically
//! - **Logging**: tracing-based logging setup shared by all binaries
//!
//! # Example
//!
//! ```no_run
//! use jlcdb_common::chunk::split;
//! use std::path::Path;
//!
//! fn publish(db: &Path, out: &Path) -> jlcdb_common::Result<()> {
//!     let manifest = split(db, 80_000_000, out)?;
//!     println!("{} chunks", manifest.chunk_count());
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod chunk;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{JlcdbError, Result};

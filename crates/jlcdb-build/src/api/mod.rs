//! Typed surface over the JLCPCB catalog API
//!
//! The upstream API is a paginated JSON POST endpoint guarded by an XSRF
//! token. This module owns the request/response models, the HTTP client
//! with its bounded-retry policy, and the category-collapsing logic that
//! keeps the number of paginated queries manageable.

pub mod client;
pub mod types;

pub use client::{JlcClient, RetryPolicy};
pub use types::{collapse_categories, ApiCategory, ComponentListRequest};

//! Filter profiles
//!
//! A profile names the policy that turns the components store into one
//! parts-view database: which components are included, how far back the
//! retention window reaches, and how aggressively prices are compressed.
//! Profiles are plain data consumed by the one generic builder; four are
//! built in and more can be loaded from a JSON file.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Inclusion predicate variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
    /// Seen in stock within the retention window (the default profile)
    RecentlyStocked,
    /// Basic or preferred classification flag set
    Preferred,
    /// Every component in the store
    All,
    /// No components; produces a structurally valid empty database
    Empty,
}

/// Price compression policy applied during translation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePolicy {
    /// Decimal places kept per tier price
    pub decimals: u32,
    /// Tiers priced below this (dollars) are dropped, except the first
    pub cutoff: f64,
}

impl Default for PricePolicy {
    fn default() -> Self {
        // Sub-cent tiers only matter at quantities where buyers negotiate
        // directly; three decimals keeps the common tiers exact.
        Self {
            decimals: 3,
            cutoff: 0.01,
        }
    }
}

/// A named filter profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterProfile {
    pub name: String,
    pub selection: Selection,
    /// Retention window in days, used by `recently-stocked`
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default)]
    pub price: PricePolicy,
}

fn default_retention_days() -> i64 {
    365
}

impl FilterProfile {
    /// The four built-in profiles, `recently-stocked` first
    pub fn builtin() -> Vec<FilterProfile> {
        vec![
            FilterProfile {
                name: "recently-stocked".to_string(),
                selection: Selection::RecentlyStocked,
                retention_days: default_retention_days(),
                price: PricePolicy::default(),
            },
            FilterProfile {
                name: "preferred".to_string(),
                selection: Selection::Preferred,
                retention_days: default_retention_days(),
                price: PricePolicy::default(),
            },
            FilterProfile {
                name: "all".to_string(),
                selection: Selection::All,
                retention_days: default_retention_days(),
                price: PricePolicy::default(),
            },
            FilterProfile {
                name: "empty".to_string(),
                selection: Selection::Empty,
                retention_days: default_retention_days(),
                price: PricePolicy::default(),
            },
        ]
    }

    /// Load profiles from a JSON file (an array of profile objects)
    pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<FilterProfile>> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let profiles: Vec<FilterProfile> = serde_json::from_str(&text)?;
        if profiles.is_empty() {
            return Err(PipelineError::Config(format!(
                "profile file '{}' declares no profiles",
                path.as_ref().display()
            )));
        }
        Ok(profiles)
    }

    /// SQL WHERE clause (without the keyword) selecting this profile's
    /// components.
    ///
    /// `reference_time` anchors the retention window; callers pass the
    /// snapshot's latest scrape timestamp so the predicate is a pure
    /// function of the snapshot.
    pub fn where_clause(&self, reference_time: i64) -> Option<String> {
        match self.selection {
            Selection::RecentlyStocked => {
                let cutoff = reference_time - self.retention_days * 24 * 60 * 60;
                Some(format!("last_on_stock >= {cutoff}"))
            }
            Selection::Preferred => Some("basic = 1 OR preferred = 1".to_string()),
            Selection::All => None,
            Selection::Empty => Some("0".to_string()),
        }
    }

    /// True for the profile whose empty output is intentional
    pub fn is_empty_profile(&self) -> bool {
        self.selection == Selection::Empty
    }

    /// File name of the parts-view database this profile produces
    pub fn output_name(&self) -> String {
        format!("parts-{}-fts5.db", self.name)
    }
}

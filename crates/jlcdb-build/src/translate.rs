//! Component-to-parts-row translation
//!
//! Turns stored component rows into the denormalized shape the parts-view
//! databases carry: compressed price strings, cleaned descriptions, and
//! resolved category/manufacturer names.
//!
//! Price compression is lossy but monotonic: tier prices are rounded UP to
//! the policy's precision, so the compressed table can overstate a tier by
//! at most one rounding step but never reports a price below the true
//! minimum. All arithmetic happens on integer price units to keep the
//! output deterministic.

use crate::error::{PipelineError, Result};
use crate::model::PriceBreak;
use crate::profiles::PricePolicy;
use crate::store::StoredComponent;
use serde_json::Value;
use std::collections::HashMap;

/// One translated parts-view row, column-for-column
#[derive(Debug, Clone, PartialEq)]
pub struct PartRow {
    pub lcsc_part: String,
    pub first_category: String,
    pub second_category: String,
    pub mfr_part: String,
    pub package: String,
    pub solder_joint: i64,
    pub manufacturer: String,
    pub library_type: &'static str,
    pub description: String,
    pub datasheet: String,
    pub price: String,
    pub stock: String,
}

/// Counters for price-compression reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceStats {
    /// Tiers seen before filtering
    pub total: usize,
    /// Tiers removed by the cutoff and duplicate filters
    pub deleted: usize,
    /// Subset of `deleted` removed as duplicates
    pub duplicates: usize,
}

impl PriceStats {
    fn absorb(&mut self, other: PriceStats) {
        self.total += other.total;
        self.deleted += other.deleted;
        self.duplicates += other.duplicates;
    }
}

// Price tier with the price in integer units of 10^-decimals dollars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tier {
    q_from: i64,
    q_to: Option<i64>,
    units: i64,
}

/// Compress a price-break table into its string representation.
///
/// Rounds every tier up to the policy precision, drops tiers priced below
/// the cutoff (always keeping the first tier), merges adjacent equal-price
/// tiers, and forces the last kept tier open-ended. Returns the rendered
/// `"qFrom-qTo:price,..."` string plus filtering statistics.
pub fn compress_prices(breaks: &[PriceBreak], policy: &PricePolicy) -> (String, PriceStats) {
    let factor = 10i64.pow(policy.decimals);
    let mut stats = PriceStats {
        total: breaks.len(),
        ..PriceStats::default()
    };

    let mut tiers: Vec<Tier> = breaks
        .iter()
        .map(|b| Tier {
            q_from: b.q_from,
            q_to: b.q_to,
            units: ceil_units(b.price, factor),
        })
        .collect();

    // Cutoff filter: tiers below the cutoff are noise, but the first tier
    // always survives so a part never loses its price entirely.
    let cutoff_units = ceil_units(policy.cutoff, factor);
    if !tiers.is_empty() {
        let first = tiers[0];
        let mut kept: Vec<Tier> = vec![first];
        kept.extend(tiers.iter().skip(1).filter(|t| t.units >= cutoff_units));
        stats.deleted += tiers.len() - kept.len();
        tiers = kept;
        // The cheapest surviving tier extends indefinitely.
        if let Some(last) = tiers.last_mut() {
            last.q_to = None;
        }
    }

    // Merge runs of equal prices, widening the quantity range.
    let mut unique: Vec<Tier> = Vec::with_capacity(tiers.len());
    for tier in tiers {
        match unique.last_mut() {
            Some(prev) if prev.units == tier.units => {
                prev.q_to = tier.q_to;
                stats.deleted += 1;
                stats.duplicates += 1;
            }
            _ => unique.push(tier),
        }
    }

    let rendered = unique
        .iter()
        .map(|t| {
            let to = t.q_to.map(|q| q.to_string()).unwrap_or_default();
            format!(
                "{}-{}:{}",
                t.q_from,
                to,
                format_units(t.units, policy.decimals)
            )
        })
        .collect::<Vec<_>>()
        .join(",");

    (rendered, stats)
}

/// Round a dollar price up to integer units of 10^-decimals dollars.
///
/// The epsilon guard keeps float noise (0.012 * 1000 = 12.000000000000002)
/// from bumping an exact value to the next unit.
fn ceil_units(price: f64, factor: i64) -> i64 {
    let scaled = price * factor as f64;
    (scaled - 1e-6).ceil().max(0.0) as i64
}

/// Render integer price units as a fixed-point decimal string
fn format_units(units: i64, decimals: u32) -> String {
    let factor = 10i64.pow(decimals);
    format!(
        "{}.{:0width$}",
        units / factor,
        units % factor,
        width = decimals as usize
    )
}

/// Library type label from the classification flags
pub fn library_type(basic: bool, preferred: bool) -> &'static str {
    if basic {
        "Basic"
    } else if preferred {
        "Preferred"
    } else {
        "Extended"
    }
}

/// Clean a description for indexing.
///
/// Overrides from the attribute blob's description when present, then
/// normalizes the ROHS marker (nearly every part is ROHS now, so absence
/// is the interesting signal), strips the duplicated subcategory and
/// package strings, and collapses doubled spaces.
pub fn clean_description(
    description: &str,
    extra_json: Option<&str>,
    subcategory: &str,
    package: &str,
) -> String {
    let mut description = description.to_string();
    if let Some(json) = extra_json {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(json) {
            if let Some(overridden) = obj.get("description").and_then(Value::as_str) {
                description = overridden.to_string();
            }
        }
    }

    if description.to_lowercase().contains(" rohs") {
        description = description.replace(" ROHS", "");
    } else {
        description.push_str(" not ROHS");
    }

    if !subcategory.is_empty() {
        description = description.replace(subcategory, "");
    }
    if !package.is_empty() {
        description = description.replace(package, "");
    }
    while description.contains("  ") {
        description = description.replace("  ", " ");
    }
    description.trim().to_string()
}

/// Translates stored component rows to parts rows, accumulating price
/// statistics across the run
pub struct Translator {
    manufacturers: HashMap<i64, String>,
    categories: HashMap<i64, (String, String)>,
    stats: PriceStats,
}

impl Translator {
    pub fn new(
        manufacturers: HashMap<i64, String>,
        categories: HashMap<i64, (String, String)>,
    ) -> Self {
        Self {
            manufacturers,
            categories,
            stats: PriceStats::default(),
        }
    }

    /// Translate one stored component under the given price policy
    pub fn translate(&mut self, row: &StoredComponent, policy: &PricePolicy) -> Result<PartRow> {
        let (category, subcategory) = self
            .categories
            .get(&row.category_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::StoreIntegrity(format!(
                    "component C{} references unknown category id {}",
                    row.lcsc, row.category_id
                ))
            })?;
        let manufacturer = self
            .manufacturers
            .get(&row.manufacturer_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::StoreIntegrity(format!(
                    "component C{} references unknown manufacturer id {}",
                    row.lcsc, row.manufacturer_id
                ))
            })?;

        let breaks: Vec<PriceBreak> = serde_json::from_str(&row.price).unwrap_or_default();
        let (price, stats) = compress_prices(&breaks, policy);
        self.stats.absorb(stats);

        let description = clean_description(
            &row.description,
            row.extra.as_deref(),
            &subcategory,
            &row.package,
        );

        Ok(PartRow {
            lcsc_part: format!("C{}", row.lcsc),
            first_category: category,
            second_category: subcategory,
            mfr_part: row.mfr.clone(),
            package: row.package.clone(),
            solder_joint: row.joints,
            manufacturer,
            library_type: library_type(row.basic, row.preferred),
            description,
            datasheet: row.datasheet.clone(),
            price,
            stock: row.stock.to_string(),
        })
    }

    /// Accumulated price filtering statistics
    pub fn stats(&self) -> PriceStats {
        self.stats
    }
}

//! Domain types for the components store
//!
//! Raw catalog API payloads are loosely typed JSON; everything downstream
//! of the scrape boundary works with the strict [`Component`] record
//! defined here. A payload that does not normalize is rejected at the
//! boundary rather than propagated.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// LCSC part identity.
///
/// The same part is identified as the string `"C12345"` by the API and
/// user-facing tools, and as the integer `12345` by the database key. This
/// type holds the canonical integer form and converts both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LcscId(pub i64);

impl LcscId {
    /// Database / integer representation
    pub fn to_db_key(self) -> i64 {
        self.0
    }

    /// API / user-facing representation, e.g. `C12345`
    pub fn to_code(self) -> String {
        format!("C{}", self.0)
    }

    /// Parse either representation (`"C12345"`, `"12345"`, or an integer)
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(LcscId)
                .ok_or_else(|| PipelineError::UpstreamSchema(format!("bad LCSC id: {n}"))),
            Value::String(s) => s.parse(),
            other => Err(PipelineError::UpstreamSchema(format!(
                "bad LCSC id: {other}"
            ))),
        }
    }
}

impl std::str::FromStr for LcscId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix('C').unwrap_or(s);
        digits
            .parse::<i64>()
            .map(LcscId)
            .map_err(|_| PipelineError::UpstreamSchema(format!("bad LCSC id: '{s}'")))
    }
}

impl std::fmt::Display for LcscId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_code())
    }
}

/// One price tier: unit price for quantities in `q_from..=q_to`
/// (`q_to = None` means the tier is open-ended)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreak {
    #[serde(rename = "qFrom")]
    pub q_from: i64,
    #[serde(rename = "qTo")]
    pub q_to: Option<i64>,
    pub price: f64,
}

/// Normalized component record, one per LCSC part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub lcsc: LcscId,
    /// Primary category name
    pub category: String,
    /// Secondary category name (may be empty)
    pub subcategory: String,
    /// Manufacturer part number
    pub mfr: String,
    pub package: String,
    /// Solder joint count; not reported by the API, kept for schema
    /// compatibility with older imports
    pub joints: i64,
    pub manufacturer: String,
    pub basic: bool,
    pub preferred: bool,
    pub description: String,
    pub datasheet: String,
    pub stock: i64,
    pub prices: Vec<PriceBreak>,
    /// Component-specific attributes not captured by the named fields
    pub extra: Option<Value>,
    /// Unix timestamp of the scrape that produced this record
    pub last_update: i64,
}

// Fields lifted out of the raw payload into named columns; everything else
// lands in `extra`.
const CAPTURED_FIELDS: &[&str] = &[
    "componentCode",
    "firstSortName",
    "secondSortName",
    "componentModelEn",
    "componentSpecificationEn",
    "componentBrandEn",
    "componentLibraryType",
    "preferredComponentFlag",
    "describe",
    "dataManualUrl",
    "componentPriceList",
    "imageList",
    "componentPrices",
    "buyComponentPrices",
];

impl Component {
    /// Normalize a raw catalog API entry.
    ///
    /// `now` is the scrape timestamp recorded as `last_update`. Returns
    /// `UpstreamSchema` when a required field is missing or has the wrong
    /// shape; the caller skips such records.
    pub fn from_raw(raw: &Value, now: i64) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| PipelineError::UpstreamSchema("entry is not an object".into()))?;

        let lcsc = LcscId::parse(
            obj.get("componentCode")
                .ok_or_else(|| PipelineError::UpstreamSchema("missing componentCode".into()))?,
        )?;

        // The API swaps the sort-name fields on returned components:
        // `secondSortName` carries the primary category and `firstSortName`
        // the secondary, the opposite of the category-listing endpoint.
        let category = str_field(obj, "secondSortName")?;
        let subcategory = str_field(obj, "firstSortName").unwrap_or_default();

        let mfr = str_field(obj, "componentModelEn")?;
        let package = str_field(obj, "componentSpecificationEn").unwrap_or_default();
        let manufacturer = str_field(obj, "componentBrandEn")?;

        let basic = obj
            .get("componentLibraryType")
            .and_then(Value::as_str)
            .map(|t| t == "base")
            .unwrap_or(false);
        let preferred = obj
            .get("preferredComponentFlag")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let stock = obj
            .get("stockCount")
            .and_then(Value::as_i64)
            .ok_or_else(|| PipelineError::UpstreamSchema(format!("{lcsc}: missing stockCount")))?;

        let datasheet = match obj.get("dataManualUrl").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => {
                let suffix = obj
                    .get("urlSuffix")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                format!("https://jlcpcb.com/partdetail/{suffix}")
            }
        };

        let prices = parse_prices(obj.get("componentPrices"))?;
        let extra = strip_for_extra(obj);

        // JLC intermittently ships empty descriptions in the main field
        // while the text is still present inside the attribute blob.
        let mut description = str_field(obj, "describe").unwrap_or_default();
        if description.is_empty() {
            description = description_from_extra(extra.as_ref()).unwrap_or_default();
        }

        Ok(Component {
            lcsc,
            category,
            subcategory,
            mfr,
            package,
            joints: 0,
            manufacturer,
            basic,
            preferred,
            description,
            datasheet,
            stock,
            prices,
            extra,
            last_update: now,
        })
    }

    /// Price breaks as the JSON string stored in the components table
    pub fn prices_json(&self) -> String {
        serde_json::to_string(&self.prices).unwrap_or_else(|_| "[]".to_string())
    }

    /// Extra blob as the JSON string stored in the components table
    pub fn extra_json(&self) -> Option<String> {
        self.extra.as_ref().map(|v| v.to_string())
    }
}

/// Pull the description out of an extra blob (`description`, falling back
/// to `describe`)
pub fn description_from_extra(extra: Option<&Value>) -> Option<String> {
    let obj = extra?.as_object()?;
    obj.get("description")
        .or_else(|| obj.get("describe"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipelineError::UpstreamSchema(format!("missing field '{key}'")))
}

fn parse_prices(value: Option<&Value>) -> Result<Vec<PriceBreak>> {
    let Some(list) = value.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut prices = Vec::with_capacity(list.len());
    for bracket in list {
        let start = bracket
            .get("startNumber")
            .and_then(Value::as_i64)
            .ok_or_else(|| PipelineError::UpstreamSchema("price break missing startNumber".into()))?;
        let end = bracket.get("endNumber").and_then(Value::as_i64);
        let price = bracket
            .get("productPrice")
            .and_then(Value::as_f64)
            .ok_or_else(|| PipelineError::UpstreamSchema("price break missing productPrice".into()))?;
        prices.push(PriceBreak {
            q_from: start,
            // endNumber -1 marks the open-ended tail tier
            q_to: end.filter(|&e| e != -1),
            price,
        });
    }
    Ok(prices)
}

/// Copy the raw payload minus captured fields and nulls
fn strip_for_extra(obj: &Map<String, Value>) -> Option<Value> {
    let stripped: Map<String, Value> = obj
        .iter()
        .filter(|(k, v)| !CAPTURED_FIELDS.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if stripped.is_empty() {
        None
    } else {
        Some(Value::Object(stripped))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_raw(lcsc: i64) -> Value {
        json!({
            "componentCode": format!("C{lcsc}"),
            "firstSortName": "Chip Resistor - Surface Mount",
            "secondSortName": "Resistors",
            "componentModelEn": "0402WGF1000TCE",
            "componentSpecificationEn": "0402",
            "componentBrandEn": "UNI-ROYAL(Uniroyal Elec)",
            "componentLibraryType": "base",
            "preferredComponentFlag": false,
            "describe": "100Ω ±1% 62.5mW 0402 Chip Resistor ROHS",
            "dataManualUrl": "https://datasheet.lcsc.com/C25076.pdf",
            "stockCount": 914_000,
            "componentPrices": [
                {"startNumber": 1, "endNumber": 199, "productPrice": 0.0122},
                {"startNumber": 200, "endNumber": -1, "productPrice": 0.0098}
            ],
            "minImage": "https://assets.lcsc.com/C25076.jpg",
            "erpComponentName": null
        })
    }

    #[test]
    fn test_lcsc_id_conversions() {
        let id: LcscId = "C12345".parse().unwrap();
        assert_eq!(id.to_db_key(), 12345);
        assert_eq!(id.to_code(), "C12345");
        assert_eq!("12345".parse::<LcscId>().unwrap(), LcscId(12345));
        assert!("R123".parse::<LcscId>().is_err());
    }

    #[test]
    fn test_from_raw_normalizes() {
        let comp = Component::from_raw(&sample_raw(25076), 1_700_000_000).unwrap();
        assert_eq!(comp.lcsc, LcscId(25076));
        // sort-name swap: secondSortName is the primary category
        assert_eq!(comp.category, "Resistors");
        assert_eq!(comp.subcategory, "Chip Resistor - Surface Mount");
        assert!(comp.basic);
        assert!(!comp.preferred);
        assert_eq!(comp.stock, 914_000);
        assert_eq!(comp.prices.len(), 2);
        assert_eq!(comp.prices[1].q_to, None);
        assert_eq!(comp.last_update, 1_700_000_000);
    }

    #[test]
    fn test_extra_strips_captured_and_null_fields() {
        let comp = Component::from_raw(&sample_raw(1), 0).unwrap();
        let extra = comp.extra.unwrap();
        let obj = extra.as_object().unwrap();
        assert!(obj.contains_key("minImage"));
        assert!(!obj.contains_key("componentCode"));
        assert!(!obj.contains_key("erpComponentName"));
    }

    #[test]
    fn test_datasheet_fallback() {
        let mut raw = sample_raw(2);
        raw["dataManualUrl"] = json!("");
        raw["urlSuffix"] = json!("C2_resistor");
        let comp = Component::from_raw(&raw, 0).unwrap();
        assert_eq!(comp.datasheet, "https://jlcpcb.com/partdetail/C2_resistor");
    }

    #[test]
    fn test_description_falls_back_to_extra() {
        let mut raw = sample_raw(3);
        raw["describe"] = json!("");
        raw["description"] = json!("1kΩ resistor from the blob");
        let comp = Component::from_raw(&raw, 0).unwrap();
        assert_eq!(comp.description, "1kΩ resistor from the blob");
    }

    #[test]
    fn test_missing_required_field_is_schema_error() {
        let mut raw = sample_raw(4);
        raw.as_object_mut().unwrap().remove("stockCount");
        let err = Component::from_raw(&raw, 0).unwrap_err();
        assert!(matches!(err, PipelineError::UpstreamSchema(_)));
    }
}

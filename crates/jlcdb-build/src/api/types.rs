//! Request and response models for the catalog API

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A component category as reported by the category-listing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCategory {
    /// Primary category name
    pub primary: String,
    /// Secondary category name; empty for a collapsed primary
    pub secondary: String,
    /// Reported component count
    pub count: i64,
}

impl std::fmt::Display for ApiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.secondary.is_empty() {
            write!(f, "{} ({})", self.primary, self.count)
        } else {
            write!(f, "{} | {} ({})", self.primary, self.secondary, self.count)
        }
    }
}

/// Body of the paginated component-list POST
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentListRequest {
    pub search_type: u32,
    /// `["stock"]` restricts results to in-stock parts
    pub presale_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_sort_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_sort_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl ComponentListRequest {
    /// Category-listing request (`searchType: 1`)
    pub fn categories(in_stock_only: bool) -> Self {
        Self {
            search_type: 1,
            presale_types: presale_types(in_stock_only),
            first_sort_name: None,
            second_sort_name: None,
            current_page: None,
            page_size: None,
        }
    }

    /// Page request for one category (`searchType: 2`)
    pub fn page(category: &ApiCategory, page: u32, page_size: u32, in_stock_only: bool) -> Self {
        Self {
            search_type: 2,
            presale_types: presale_types(in_stock_only),
            first_sort_name: Some(category.primary.clone()),
            second_sort_name: (!category.secondary.is_empty())
                .then(|| category.secondary.clone()),
            current_page: Some(page),
            page_size: Some(page_size),
        }
    }
}

fn presale_types(in_stock_only: bool) -> Vec<String> {
    if in_stock_only {
        vec!["stock".to_string()]
    } else {
        Vec::new()
    }
}

/// Top-level response envelope
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ResponseData>,
}

/// Response payload; which half is populated depends on the search type
#[derive(Debug, Default, Deserialize)]
pub struct ResponseData {
    #[serde(rename = "componentPageInfo")]
    pub component_page_info: Option<ComponentPageInfo>,
    #[serde(rename = "sortAndCountVoList")]
    pub sort_and_count: Option<Vec<PrimarySort>>,
}

/// One page of raw component entries
#[derive(Debug, Deserialize)]
pub struct ComponentPageInfo {
    #[serde(default)]
    pub list: Vec<Value>,
}

/// Primary category with its secondary categories
#[derive(Debug, Deserialize)]
pub struct PrimarySort {
    #[serde(rename = "sortName")]
    pub sort_name: String,
    #[serde(rename = "childSortList", default)]
    pub child_sort_list: Vec<SecondarySort>,
}

/// Secondary category with its stock count
#[derive(Debug, Deserialize)]
pub struct SecondarySort {
    #[serde(rename = "sortName")]
    pub sort_name: String,
    #[serde(rename = "componentCount", default)]
    pub component_count: i64,
}

/// Flatten the category listing into `ApiCategory` values
pub fn flatten_categories(primaries: &[PrimarySort]) -> Vec<ApiCategory> {
    let mut categories = Vec::new();
    for primary in primaries {
        for secondary in &primary.child_sort_list {
            categories.push(ApiCategory {
                primary: primary.sort_name.clone(),
                secondary: secondary.sort_name.clone(),
                count: secondary.component_count,
            });
        }
    }
    categories
}

/// Collapse small secondary categories into their primary.
///
/// The API caps a query at 1000 items per page and 100 pages, so a
/// category holding more than the window must be queried per secondary.
/// Every primary whose total fits inside `limit` is collapsed into a
/// single entry with an empty secondary name, which saves a request per
/// tiny subcategory.
pub fn collapse_categories(categories: &[ApiCategory], limit: i64) -> Vec<ApiCategory> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: std::collections::HashMap<&str, Vec<&ApiCategory>> =
        std::collections::HashMap::new();
    for cat in categories {
        let group = groups.entry(cat.primary.as_str()).or_default();
        if group.is_empty() {
            order.push(cat.primary.as_str());
        }
        group.push(cat);
    }

    let mut result = Vec::new();
    for primary in order {
        let group = &groups[primary];
        let total: i64 = group.iter().map(|c| c.count).sum();
        if total < limit {
            result.push(ApiCategory {
                primary: primary.to_string(),
                secondary: String::new(),
                count: total,
            });
        } else {
            result.extend(group.iter().map(|c| (*c).clone()));
        }
    }
    result
}

//! HTTP client for the catalog API
//!
//! Wraps reqwest with the XSRF-token dance the API requires, the
//! "no data" response-code quirks, and a bounded-retry exponential
//! backoff policy shared with the scraper.

use crate::api::types::{
    flatten_categories, ApiCategory, ApiEnvelope, ComponentListRequest, ResponseData,
};
use crate::error::{PipelineError, Result};
use reqwest::header::SET_COOKIE;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

// ============================================================================
// API Client Constants
// ============================================================================

/// Production catalog API base URL
pub const DEFAULT_BASE_URL: &str =
    "https://jlcpcb.com/api/overseas-pcb-order/v1/shoppingCart/smtGood";

/// Default per-request timeout in seconds.
/// Can be overridden via the JLCDB_API_TIMEOUT_SECS environment variable.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// XSRF tokens stay valid for a few minutes; re-fetch after this long
const TOKEN_TTL: Duration = Duration::from_secs(180);

// Body codes the API uses to say "no data here" (563/564: past the last
// page, 404: unknown category, 429: drained by rate limiting). Retrying
// these doesn't help, so they terminate pagination instead of erroring.
const NO_DATA_CODES: &[i64] = &[563, 564, 404, 429];

/// Bounded-retry policy with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles per retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds, fails non-transiently, or the
    /// attempt budget runs out.
    ///
    /// Only errors classified transient by
    /// [`PipelineError::is_transient`] are retried; exhausting the budget
    /// yields `TransientNetwork`.
    pub async fn run<T, Fut>(
        &self,
        what: &str,
        mut attempt_fn: impl FnMut() -> Fut,
    ) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(attempt, of = attempts, error = %err, "{} failed", what);
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(PipelineError::TransientNetwork {
            attempts,
            message: last_error,
        })
    }
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Client for the catalog API
pub struct JlcClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

impl JlcClient {
    /// Create a client against the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let timeout_secs = std::env::var("JLCDB_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
            token: Mutex::new(None),
        })
    }

    /// Client against the production API
    pub fn production() -> Result<Self> {
        Self::new(DEFAULT_BASE_URL)
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The retry policy this client was configured with
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Current XSRF token, fetching a fresh one when the cache is stale
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(token.value.clone());
            }
        }
        let value = self
            .retry
            .run("XSRF token fetch", || self.fetch_token_once())
            .await?;
        *cached = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    async fn fetch_token_once(&self) -> Result<String> {
        let url = format!("{}/getXSRFToken", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Api {
                code: status.as_u16() as i64,
                message: format!("token endpoint returned {status}"),
            });
        }
        parse_xsrf_cookie(response.headers()).ok_or_else(|| PipelineError::Api {
            code: status.as_u16() as i64,
            message: "token endpoint set no XSRF-TOKEN cookie".to_string(),
        })
    }

    /// One component-list call.
    ///
    /// `Ok(None)` means the API reported "no data" for this query; any
    /// other non-200 body code is an error. No retry here — callers wrap
    /// this in the policy so a retried page re-runs the whole call,
    /// token included.
    pub async fn component_list(
        &self,
        request: &ComponentListRequest,
    ) -> Result<Option<ResponseData>> {
        let token = self.token().await?;
        let url = format!("{}/selectSmtComponentList", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-XSRF-TOKEN", token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Api {
                code: status.as_u16() as i64,
                message: format!("component list returned {status}"),
            });
        }

        let envelope: ApiEnvelope = response.json().await?;
        if NO_DATA_CODES.contains(&envelope.code) {
            debug!(code = envelope.code, "no-data response");
            return Ok(None);
        }
        if envelope.code != 200 {
            return Err(PipelineError::Api {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        Ok(Some(envelope.data.unwrap_or_default()))
    }

    /// Fetch one page of a category; an empty vec means past the last page
    pub async fn fetch_page(
        &self,
        category: &ApiCategory,
        page: u32,
        page_size: u32,
        in_stock_only: bool,
    ) -> Result<Vec<Value>> {
        let request = ComponentListRequest::page(category, page, page_size, in_stock_only);
        let data = self.component_list(&request).await?;
        Ok(data
            .and_then(|d| d.component_page_info)
            .map(|p| p.list)
            .unwrap_or_default())
    }

    /// Fetch the category listing with per-category stock counts
    pub async fn fetch_categories(&self, in_stock_only: bool) -> Result<Vec<ApiCategory>> {
        self.retry
            .run("category listing", || async move {
                let request = ComponentListRequest::categories(in_stock_only);
                let data = self.component_list(&request).await?.ok_or_else(|| {
                    PipelineError::Api {
                        code: 200,
                        message: "category listing returned no data".to_string(),
                    }
                })?;
                Ok(flatten_categories(&data.sort_and_count.unwrap_or_default()))
            })
            .await
    }
}

/// Pull the XSRF-TOKEN value out of Set-Cookie headers
fn parse_xsrf_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    for value in headers.get_all(SET_COOKIE) {
        let cookie = value.to_str().ok()?;
        if let Some(rest) = cookie.strip_prefix("XSRF-TOKEN=") {
            let token = rest.split(';').next().unwrap_or(rest);
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_parse_xsrf_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("other=1; Path=/"),
        );
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("XSRF-TOKEN=abc123; Path=/; Secure"),
        );
        assert_eq!(parse_xsrf_cookie(&headers).unwrap(), "abc123");
    }

    #[test]
    fn test_parse_xsrf_cookie_absent() {
        let headers = HeaderMap::new();
        assert!(parse_xsrf_cookie(&headers).is_none());
    }

    #[tokio::test]
    async fn test_retry_policy_gives_up_after_budget() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: Result<()> = policy
            .run("always failing", || {
                calls += 1;
                async {
                    Err(PipelineError::Api {
                        code: 503,
                        message: "unavailable".to_string(),
                    })
                }
            })
            .await;
        assert_eq!(calls, 3);
        assert!(matches!(
            result.unwrap_err(),
            PipelineError::TransientNetwork { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_policy_does_not_retry_fatal_errors() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<()> = policy
            .run("fatal", || {
                calls += 1;
                async {
                    Err(PipelineError::StoreIntegrity("boom".to_string()))
                }
            })
            .await;
        assert_eq!(calls, 1);
        assert!(matches!(
            result.unwrap_err(),
            PipelineError::StoreIntegrity(_)
        ));
    }
}

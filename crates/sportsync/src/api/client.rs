//! Sports-data API HTTP client
//!
//! Provides page and single-entity fetches against the upstream API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::debug;
use std::time::Duration;
use url::Url;

use super::classify::{classify_entity_response, classify_page_response};
use super::{EntityFetchOutcome, EntityFetcher, FetchOutcome, PageFetchOutcome, PageFetcher};
use crate::config::ApiCredentials;
use crate::models::EntityId;

/// Raw pieces of a response that classification needs
struct RawResponse {
    status: u16,
    retry_after: Option<String>,
    body: String,
}

/// Blocking client for the upstream sports-data API
pub struct SportsApiClient {
    agent: ureq::Agent,
    base_url: String,
    api_token: String,
    /// Seconds to wait when a rate-limit response carries no reset time
    fallback_retry_after: i64,
}

impl SportsApiClient {
    /// Create a new client
    ///
    /// Non-2xx statuses are returned as responses rather than errors so
    /// that rate-limit bodies and headers can be inspected.
    pub fn new(
        credentials: &ApiCredentials,
        timeout: Duration,
        fallback_retry_after: i64,
    ) -> Result<Self> {
        Url::parse(&credentials.base_url)
            .with_context(|| format!("Invalid API base URL: {}", credentials.base_url))?;

        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();

        Ok(Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_token: credentials.api_token.clone(),
            fallback_retry_after,
        })
    }

    /// Build a request URL; the token is appended last and never logged
    fn url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut url = Url::parse(&raw).with_context(|| format!("Invalid endpoint: {}", path))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("api_token", &self.api_token);
        }
        Ok(url)
    }

    fn get(&self, url: &Url) -> Result<RawResponse, ureq::Error> {
        let mut response = self
            .agent
            .get(url.as_str())
            .header("Accept", "application/json")
            .call()?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.body_mut().read_to_string()?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

impl PageFetcher for SportsApiClient {
    fn fetch_page(
        &self,
        endpoint: &str,
        page: u32,
        extra_params: &[(String, String)],
    ) -> PageFetchOutcome {
        let mut query = vec![("page".to_string(), page.to_string())];
        query.extend(extra_params.iter().cloned());

        let url = match self.url(endpoint, &query) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::FatalError {
                    cause: format!("{:#}", e),
                };
            }
        };

        debug!("[API] GET {} page {}", endpoint, page);
        match self.get(&url) {
            Ok(raw) => classify_page_response(
                raw.status,
                raw.retry_after.as_deref(),
                &raw.body,
                self.fallback_retry_after,
            ),
            // Connection resets, DNS hiccups and timeouts are worth retrying
            Err(e) => FetchOutcome::TransientError {
                cause: format!("Request to {} failed: {}", endpoint, e),
            },
        }
    }
}

impl EntityFetcher for SportsApiClient {
    fn fetch_entity(&self, endpoint: &str, id: EntityId) -> EntityFetchOutcome {
        let path = format!("{}/{}", endpoint.trim_end_matches('/'), id.get());
        let url = match self.url(&path, &[]) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::FatalError {
                    cause: format!("{:#}", e),
                };
            }
        };

        debug!("[API] GET {}", path);
        match self.get(&url) {
            Ok(raw) => classify_entity_response(
                raw.status,
                raw.retry_after.as_deref(),
                &raw.body,
                self.fallback_retry_after,
            ),
            Err(e) => FetchOutcome::TransientError {
                cause: format!("Request to {} failed: {}", path, e),
            },
        }
    }
}

//! Upstream sports-data API integration
//!
//! This module provides:
//! - The [`PageFetcher`] and [`EntityFetcher`] seams the sync engines call
//! - Response classification (success / rate-limited / transient / fatal)
//! - A blocking HTTP client implementing both seams

mod classify;
mod client;

pub use classify::{classify_entity_response, classify_page_response};
pub use client::SportsApiClient;

use serde_json::Value;

use crate::models::EntityId;
use crate::rate::RateLimitSnapshot;

/// Outcome of a single upstream call
///
/// Every HTTP result maps to exactly one of these; callers decide what
/// to retry based on the variant, never on raw status codes.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Success(T),
    RateLimited { retry_after_seconds: i64 },
    TransientError { cause: String },
    FatalError { cause: String },
}

impl<T> FetchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

/// Pagination metadata for a page of results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub has_more: bool,
    /// Total page count if upstream reported one (approximate)
    pub total_pages: Option<u32>,
}

/// One page of items plus whatever rate info came with it
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub pagination: Pagination,
    pub rate_limit: Option<RateLimitSnapshot>,
}

/// A single entity fetched by ID
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedEntity {
    pub item: Value,
    pub rate_limit: Option<RateLimitSnapshot>,
}

pub type PageFetchOutcome = FetchOutcome<Page>;
pub type EntityFetchOutcome = FetchOutcome<FetchedEntity>;

/// Fetches one page of a paginated collection
pub trait PageFetcher: Send + Sync {
    /// `page` is 1-based; `extra_params` are appended to the query string
    fn fetch_page(
        &self,
        endpoint: &str,
        page: u32,
        extra_params: &[(String, String)],
    ) -> PageFetchOutcome;
}

/// Fetches a single entity by its upstream ID
pub trait EntityFetcher: Send + Sync {
    fn fetch_entity(&self, endpoint: &str, id: EntityId) -> EntityFetchOutcome;
}

/// Wire types for upstream responses
pub mod wire {
    use serde::Deserialize;
    use serde_json::Value;

    /// Successful collection response
    #[derive(Debug, Deserialize)]
    pub struct PageResponse {
        #[serde(default)]
        pub data: Vec<Value>,
        pub pagination: Option<PaginationBody>,
        pub rate_limit: Option<RateLimitBody>,
    }

    /// Successful single-entity response
    #[derive(Debug, Deserialize)]
    pub struct EntityResponse {
        pub data: Option<Value>,
        pub rate_limit: Option<RateLimitBody>,
    }

    /// Pagination block; page-count key names vary between endpoints
    ///
    /// `total` is an item count in every paginator that sends it, so it is
    /// not read.
    #[derive(Debug, Deserialize)]
    pub struct PaginationBody {
        #[serde(alias = "hasMore")]
        pub has_more: bool,
        pub total_pages: Option<u32>,
        #[serde(rename = "totalPages")]
        pub total_pages_camel: Option<u32>,
        pub last_page: Option<u32>,
    }

    impl PaginationBody {
        pub fn page_count(&self) -> Option<u32> {
            self.total_pages
                .or(self.total_pages_camel)
                .or(self.last_page)
        }
    }

    /// Rate-limit block that accompanies most responses
    #[derive(Debug, Deserialize)]
    pub struct RateLimitBody {
        pub remaining: Option<u32>,
        #[serde(alias = "resetsInSeconds")]
        pub resets_in_seconds: Option<i64>,
        pub limit: Option<u32>,
        pub requested_entity: Option<String>,
    }

    /// Error response body
    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub message: Option<String>,
        pub rate_limit: Option<RateLimitBody>,
        pub data: Option<Value>,
    }
}

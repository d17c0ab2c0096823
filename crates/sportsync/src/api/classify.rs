//! Pure response classification
//!
//! Kept free of I/O so every status/body combination can be tested
//! without a server.

use super::wire::{EntityResponse, ErrorBody, PageResponse, RateLimitBody};
use super::{EntityFetchOutcome, FetchOutcome, FetchedEntity, Page, PageFetchOutcome, Pagination};
use crate::rate::{MAX_RESET_SECONDS, RateLimitSnapshot};

/// Classify the response to a collection (page) request
pub fn classify_page_response(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
    fallback_retry_after: i64,
) -> PageFetchOutcome {
    if let Some(outcome) = classify_failure(status, retry_after, body, fallback_retry_after) {
        return outcome;
    }

    match serde_json::from_str::<PageResponse>(body) {
        Ok(parsed) => {
            let pagination = parsed
                .pagination
                .map(|p| Pagination {
                    has_more: p.has_more,
                    total_pages: p.page_count(),
                })
                .unwrap_or_default();
            FetchOutcome::Success(Page {
                items: parsed.data,
                pagination,
                rate_limit: parsed.rate_limit.as_ref().and_then(snapshot),
            })
        }
        // A 2xx that doesn't parse is most likely a truncated body
        Err(e) => FetchOutcome::TransientError {
            cause: format!("Failed to parse page response: {}", e),
        },
    }
}

/// Classify the response to a single-entity request
pub fn classify_entity_response(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
    fallback_retry_after: i64,
) -> EntityFetchOutcome {
    if status == 404 {
        return FetchOutcome::FatalError {
            cause: "Entity not found (HTTP 404)".to_string(),
        };
    }
    if let Some(outcome) = classify_failure(status, retry_after, body, fallback_retry_after) {
        return outcome;
    }

    match serde_json::from_str::<EntityResponse>(body) {
        Ok(EntityResponse {
            data: Some(item),
            rate_limit,
        }) if !item.is_null() => FetchOutcome::Success(FetchedEntity {
            item,
            rate_limit: rate_limit.as_ref().and_then(snapshot),
        }),
        Ok(_) => FetchOutcome::FatalError {
            cause: "Entity response contained no data".to_string(),
        },
        Err(e) => FetchOutcome::TransientError {
            cause: format!("Failed to parse entity response: {}", e),
        },
    }
}

/// Map everything that isn't a usable 2xx to an outcome
///
/// Returns `None` when the response should be parsed as a success.
fn classify_failure<T>(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
    fallback_retry_after: i64,
) -> Option<FetchOutcome<T>> {
    let error_body = serde_json::from_str::<ErrorBody>(body).ok();
    let message = error_body
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| truncate(body, 200));

    if status == 429 || error_body.as_ref().is_some_and(has_rate_limit_marker) {
        let body_reset = error_body
            .as_ref()
            .and_then(|b| b.rate_limit.as_ref())
            .and_then(|r| r.resets_in_seconds);
        let header_reset = retry_after
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(plausible_reset);
        let retry_after_seconds = body_reset
            .filter(plausible_reset)
            .or(header_reset)
            .unwrap_or(fallback_retry_after);
        return Some(FetchOutcome::RateLimited {
            retry_after_seconds,
        });
    }

    match status {
        200..=299 => None,
        500..=599 => Some(FetchOutcome::TransientError {
            cause: format!("HTTP {}: {}", status, message),
        }),
        _ => Some(FetchOutcome::FatalError {
            cause: format!("HTTP {}: {}", status, message),
        }),
    }
}

/// An error body with an exhausted budget and no data means "rate limited"
/// even when the status code says otherwise
fn has_rate_limit_marker(body: &ErrorBody) -> bool {
    body.message.is_some()
        && body.data.is_none()
        && body
            .rate_limit
            .as_ref()
            .is_some_and(|r| r.remaining == Some(0))
}

/// Reset delays outside `0..=MAX_RESET_SECONDS` are treated as garbage
fn plausible_reset(seconds: &i64) -> bool {
    (0..=MAX_RESET_SECONDS).contains(seconds)
}

fn snapshot(body: &RateLimitBody) -> Option<RateLimitSnapshot> {
    Some(RateLimitSnapshot {
        remaining: body.remaining?,
        resets_in_seconds: body.resets_in_seconds?.clamp(0, MAX_RESET_SECONDS),
        limit: body.limit,
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FALLBACK: i64 = 3600;

    #[test]
    fn test_success_page() {
        let body = json!({
            "data": [{"id": 1}, {"id": 2}],
            "pagination": {"count": 2, "per_page": 25, "current_page": 1, "has_more": true},
            "rate_limit": {"resets_in_seconds": 1200, "remaining": 2950, "requested_entity": "Player"}
        })
        .to_string();

        match classify_page_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(page) => {
                assert_eq!(page.items.len(), 2);
                assert!(page.pagination.has_more);
                assert_eq!(page.pagination.total_pages, None);
                assert_eq!(
                    page.rate_limit,
                    Some(RateLimitSnapshot {
                        remaining: 2950,
                        resets_in_seconds: 1200,
                        limit: None,
                    })
                );
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_success_page_camel_case_pagination() {
        let body = json!({
            "data": [],
            "pagination": {"hasMore": false, "totalPages": 12}
        })
        .to_string();

        match classify_page_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(page) => {
                assert!(page.items.is_empty());
                assert!(!page.pagination.has_more);
                assert_eq!(page.pagination.total_pages, Some(12));
                assert!(page.rate_limit.is_none());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_paginator_page_count_keys() {
        let body = json!({
            "data": [{"id": 1}],
            "pagination": {"has_more": true, "total": 5000, "per_page": 25, "last_page": 200}
        })
        .to_string();
        match classify_page_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(page) => {
                assert!(page.pagination.has_more);
                assert_eq!(page.pagination.total_pages, Some(200));
            }
            other => panic!("expected success, got {:?}", other),
        }

        // An item count alone says nothing about the number of pages
        let body = json!({"data": [], "pagination": {"has_more": true, "total": 5000}}).to_string();
        match classify_page_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(page) => assert_eq!(page.pagination.total_pages, None),
            other => panic!("expected success, got {:?}", other),
        }

        let body = json!({
            "data": [],
            "pagination": {"has_more": true, "total_pages": 7, "totalPages": 9, "last_page": 11}
        })
        .to_string();
        match classify_page_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(page) => assert_eq!(page.pagination.total_pages, Some(7)),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_pagination_means_last_page() {
        let body = json!({"data": [{"id": 5}]}).to_string();
        match classify_page_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(page) => assert!(!page.pagination.has_more),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_429_uses_body_reset() {
        let body = json!({
            "message": "You have reached the rate limit",
            "rate_limit": {"resets_in_seconds": 600, "remaining": 0}
        })
        .to_string();
        assert_eq!(
            classify_page_response(429, Some("30"), &body, FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: 600
            }
        );
    }

    #[test]
    fn test_429_falls_back_to_header_then_default() {
        assert_eq!(
            classify_page_response(429, Some("45"), "Too Many Requests", FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: 45
            }
        );
        assert_eq!(
            classify_page_response(429, None, "", FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: FALLBACK
            }
        );
        // HTTP-date form is not interpreted; be conservative
        assert_eq!(
            classify_page_response(429, Some("Wed, 21 Oct 2026 07:28:00 GMT"), "", FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: FALLBACK
            }
        );
    }

    #[test]
    fn test_out_of_range_reset_uses_fallback() {
        assert_eq!(
            classify_page_response(429, Some("9223372036854775807"), "", FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: FALLBACK
            }
        );
        assert_eq!(
            classify_page_response(429, Some("-30"), "", FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: FALLBACK
            }
        );

        // A garbage body value does not hide a usable header
        let body = json!({
            "message": "Too many requests",
            "rate_limit": {"resets_in_seconds": i64::MAX, "remaining": 0}
        })
        .to_string();
        assert_eq!(
            classify_page_response(429, Some("45"), &body, FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: 45
            }
        );
    }

    #[test]
    fn test_success_snapshot_reset_is_clamped() {
        for (reported, expected) in [(i64::MAX, MAX_RESET_SECONDS), (i64::MIN, 0), (-5, 0)] {
            let body = json!({
                "data": [{"id": 1}],
                "pagination": {"has_more": false},
                "rate_limit": {"resets_in_seconds": reported, "remaining": 10}
            })
            .to_string();
            match classify_page_response(200, None, &body, FALLBACK) {
                FetchOutcome::Success(page) => {
                    assert_eq!(page.rate_limit.map(|r| r.resets_in_seconds), Some(expected))
                }
                other => panic!("expected success, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_body_marker_without_429() {
        let body = json!({
            "message": "Rate limit reached for this entity",
            "rate_limit": {"resets_in_seconds": 90, "remaining": 0, "requested_entity": "Team"}
        })
        .to_string();
        assert_eq!(
            classify_page_response(403, None, &body, FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: 90
            }
        );
    }

    #[test]
    fn test_last_call_of_budget_is_still_success() {
        // remaining == 0 alongside data is a normal page, not a refusal
        let body = json!({
            "data": [{"id": 1}],
            "pagination": {"has_more": true},
            "rate_limit": {"resets_in_seconds": 90, "remaining": 0}
        })
        .to_string();
        assert!(classify_page_response(200, None, &body, FALLBACK).is_success());
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503, 504] {
            match classify_page_response(status, None, "upstream down", FALLBACK) {
                FetchOutcome::TransientError { cause } => {
                    assert!(cause.contains(&status.to_string()))
                }
                other => panic!("expected transient for {}, got {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_client_errors_are_fatal() {
        let body = json!({"message": "Unauthenticated."}).to_string();
        match classify_page_response(401, None, &body, FALLBACK) {
            FetchOutcome::FatalError { cause } => assert_eq!(cause, "HTTP 401: Unauthenticated."),
            other => panic!("expected fatal, got {:?}", other),
        }
        assert!(matches!(
            classify_page_response(400, None, "bad include", FALLBACK),
            FetchOutcome::FatalError { .. }
        ));
    }

    #[test]
    fn test_garbled_success_is_transient() {
        assert!(matches!(
            classify_page_response(200, None, "{\"data\": [", FALLBACK),
            FetchOutcome::TransientError { .. }
        ));
    }

    #[test]
    fn test_entity_success() {
        let body = json!({
            "data": {"id": 37, "name": "Ajax"},
            "rate_limit": {"resets_in_seconds": 10, "remaining": 5, "limit": 3000}
        })
        .to_string();
        match classify_entity_response(200, None, &body, FALLBACK) {
            FetchOutcome::Success(entity) => {
                assert_eq!(entity.item["id"], 37);
                assert_eq!(entity.rate_limit.and_then(|r| r.limit), Some(3000));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_entity_not_found_is_fatal() {
        assert!(matches!(
            classify_entity_response(404, None, "{}", FALLBACK),
            FetchOutcome::FatalError { .. }
        ));
        assert!(matches!(
            classify_entity_response(200, None, "{\"data\": null}", FALLBACK),
            FetchOutcome::FatalError { .. }
        ));
    }

    #[test]
    fn test_entity_rate_limited() {
        assert_eq!(
            classify_entity_response(429, Some("12"), "", FALLBACK),
            FetchOutcome::RateLimited {
                retry_after_seconds: 12
            }
        );
    }
}

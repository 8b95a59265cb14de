//! Tests for the graphql module

use super::*;
use crate::budget::Usage;
use serde_json::json;
use std::time::Duration;
use test_case::test_case;

fn shopify_profile() -> UsageProfile {
    UsageProfile {
        requested_path: Some("extensions.cost.requestedQueryCost".to_string()),
        consumed_path: Some("extensions.cost.actualQueryCost".to_string()),
        available_path: Some("extensions.cost.throttleStatus.currentlyAvailable".to_string()),
        max_path: Some("extensions.cost.throttleStatus.maximumAvailable".to_string()),
        restore_rate_path: Some("extensions.cost.throttleStatus.restoreRate".to_string()),
        throttle_codes: vec!["THROTTLED".to_string()],
        ..UsageProfile::default()
    }
}

fn shiphero_profile() -> UsageProfile {
    UsageProfile {
        consumed_path: Some("$.data.*.complexity".to_string()),
        throttle_codes: vec!["30".to_string()],
        auth_expired_codes: vec!["22".to_string()],
        error_code_path: "code".to_string(),
        throttle_wait_pattern: Some(r"(\d+) seconds".to_string()),
        ..UsageProfile::default()
    }
}

// ============================================================================
// Path Tests
// ============================================================================

#[test]
fn test_select_paths() {
    let data = json!({"data": {"items": [{"id": 1}, {"id": 2}, {"id": 3}], "count": "7"}});

    assert_eq!(select(&data, "$.data.items[0].id"), Some(&json!(1)));
    assert_eq!(select(&data, "data.items[-1].id"), Some(&json!(3)));
    assert_eq!(select(&data, "$"), Some(&data));
    assert_eq!(select(&data, "data.missing"), None);
    assert_eq!(select_string(&data, "data.count"), Some("7".to_string()));
    assert_eq!(select_f64(&data, "data.count").unwrap(), Some(7.0));
}

#[test]
fn test_select_value_wildcard() {
    let data = json!({"data": {"orders": {"complexity": 101, "request_id": "abc"}}});

    assert_eq!(
        select_value(&data, "$.data.*.complexity").unwrap(),
        Some(json!(101))
    );
    assert_eq!(find_all(&data, "data.orders.request_id").unwrap(), vec![json!("abc")]);
}

// ============================================================================
// Request Tests
// ============================================================================

#[test]
fn test_request_serialization() {
    let request = GraphQlRequest::new("query Orders($first: Int) { orders(first: $first) { id } }")
        .variable("first", 50);

    let body = serde_json::to_value(&request).unwrap();
    assert_eq!(body["variables"]["first"], 50);
    assert_eq!(request.summary(), r#"query Orders {"first":50}"#);

    let bare = GraphQlRequest::new("{ shop { name } }");
    let body = serde_json::to_value(&bare).unwrap();
    assert!(body.get("variables").is_none());
    assert_eq!(bare.summary(), "query {}");
}

#[test]
fn test_usage_profile_merge() {
    let base = shopify_profile();
    let merged = base.merged_with(&UsagePaths {
        consumed_path: Some("data.orders.complexity".to_string()),
        ..UsagePaths::default()
    });

    assert_eq!(merged.consumed_path.as_deref(), Some("data.orders.complexity"));
    assert_eq!(merged.available_path, base.available_path);
}

// ============================================================================
// Usage Extraction Tests
// ============================================================================

#[test]
fn test_shopify_usage() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let body = json!({
        "data": {},
        "extensions": {"cost": {
            "requestedQueryCost": 52,
            "actualQueryCost": 12,
            "throttleStatus": {"maximumAvailable": 1000.0, "currentlyAvailable": 988, "restoreRate": 50.0}
        }}
    });

    let usage = inspector.usage(&body).unwrap();
    assert_eq!(
        usage,
        Usage {
            requested: Some(52.0),
            consumed: Some(12.0),
            available: Some(988.0),
            max: Some(1000.0),
            restore_rate: Some(50.0),
        }
    );
}

#[test]
fn test_shiphero_usage_via_wildcard() {
    let inspector = ResponseInspector::new(shiphero_profile()).unwrap();
    let body = json!({"data": {"orders": {"complexity": 101, "data": {"edges": []}}}});

    let usage = inspector.usage(&body).unwrap();
    assert_eq!(usage.consumed, Some(101.0));
    assert_eq!(usage.available, None);
}

#[test]
fn test_missing_usage_is_empty() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let usage = inspector.usage(&json!({"data": {}})).unwrap();
    assert!(usage.is_empty());
}

// ============================================================================
// Error Classification Tests
// ============================================================================

#[test]
fn test_no_errors_is_no_failure() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    assert_eq!(inspector.failure(&json!({"data": {}}), &Usage::default()), None);
    assert_eq!(
        inspector.failure(&json!({"data": {}, "errors": []}), &Usage::default()),
        None
    );
}

#[test]
fn test_shopify_throttle_derives_wait_from_usage() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let body = json!({
        "errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}],
        "extensions": {"cost": {
            "requestedQueryCost": 752,
            "throttleStatus": {"maximumAvailable": 1000, "currentlyAvailable": 502, "restoreRate": 50}
        }}
    });
    let usage = inspector.usage(&body).unwrap();

    assert_eq!(
        inspector.failure(&body, &usage),
        Some(GraphQlFailure::Throttled(Duration::from_secs(5)))
    );
}

#[test]
fn test_shiphero_throttle_reads_wait_from_message() {
    let inspector = ResponseInspector::new(shiphero_profile()).unwrap();
    let body = json!({"errors": [{
        "code": 30,
        "message": "There are not enough credits to perform the requested operation, which requires 101 credits. There are 7 seconds left for a credit to be available."
    }]});

    assert_eq!(
        inspector.failure(&body, &Usage::default()),
        Some(GraphQlFailure::Throttled(Duration::from_secs(7)))
    );
    assert_eq!(inspector.error_codes(&body), vec!["30".to_string()]);
}

#[test]
fn test_auth_expired_code() {
    let inspector = ResponseInspector::new(shiphero_profile()).unwrap();
    let body = json!({"errors": [{"code": 22, "message": "Token expired"}]});

    assert_eq!(
        inspector.failure(&body, &Usage::default()),
        Some(GraphQlFailure::AuthExpired)
    );
}

#[test]
fn test_other_errors_are_rejected() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let body = json!({"errors": [
        {"message": "Field 'foo' doesn't exist"},
        {"message": "Variable $first is required", "extensions": {"code": "BAD_REQUEST"}}
    ]});

    assert_eq!(
        inspector.failure(&body, &Usage::default()),
        Some(GraphQlFailure::Rejected(
            "Field 'foo' doesn't exist; Variable $first is required".to_string()
        ))
    );
}

#[test_case("retry in 12 seconds", Usage::default() => Duration::from_secs(12); "message pattern")]
#[test_case("throttled", Usage { requested: Some(100.0), available: Some(25.0), restore_rate: Some(50.0), ..Usage::default() } => Duration::from_secs(2); "derived from usage, rounded up")]
#[test_case("throttled", Usage { requested: Some(10.0), available: Some(25.0), restore_rate: Some(50.0), ..Usage::default() } => Duration::ZERO; "already enough capacity")]
#[test_case("throttled", Usage::default() => Duration::from_secs(10); "default wait")]
fn test_throttle_wait(message: &str, usage: Usage) -> Duration {
    let profile = UsageProfile {
        throttle_wait_pattern: Some(r"in (\d+) seconds".to_string()),
        ..UsageProfile::default()
    };
    ResponseInspector::new(profile)
        .unwrap()
        .throttle_wait(message, &usage)
}

#[test]
fn test_invalid_wait_pattern_rejected() {
    let profile = UsageProfile {
        throttle_wait_pattern: Some("(unclosed".to_string()),
        ..UsageProfile::default()
    };
    assert!(ResponseInspector::new(profile).is_err());
}

// ============================================================================
// Page Extraction Tests
// ============================================================================

#[test]
fn test_page_from_edges() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let body = json!({"data": {"orders": {
        "edges": [
            {"cursor": "c1", "node": {"id": "1"}},
            {"cursor": "c2", "node": {"id": "2"}}
        ],
        "pageInfo": {"hasNextPage": true, "endCursor": "c2"}
    }}});

    let page = inspector
        .page("orders", &body, "data.orders", Usage::default())
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page.items[1], json!({"id": "2"}));
    assert_eq!(page.cursor.as_deref(), Some("c2"));
    assert!(page.has_next);
}

#[test]
fn test_page_from_nodes_without_next() {
    let inspector = ResponseInspector::new(shiphero_profile()).unwrap();
    let body = json!({"data": {"products": {"complexity": 5, "data": {
        "nodes": [{"id": "p1"}],
        "pageInfo": {"hasNextPage": false, "endCursor": null}
    }}}});

    let page = inspector
        .page("products", &body, "data.products.data", Usage::default())
        .unwrap();

    assert_eq!(page.len(), 1);
    assert_eq!(page.cursor, None);
    assert!(!page.has_next);
}

#[test]
fn test_page_falls_back_to_last_edge_cursor() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let body = json!({"data": {"orders": {
        "edges": [{"cursor": "only", "node": {"id": "1"}}],
        "pageInfo": {"hasNextPage": true}
    }}});

    let page = inspector
        .page("orders", &body, "data.orders", Usage::default())
        .unwrap();
    assert_eq!(page.cursor.as_deref(), Some("only"));
}

#[test]
fn test_null_connection_is_empty_page() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let page = inspector
        .page("orders", &json!({"data": {"orders": null}}), "data.orders", Usage::default())
        .unwrap();
    assert!(page.is_empty());
    assert!(!page.has_next);
}

#[test]
fn test_edge_without_node_fails() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let body = json!({"data": {"orders": {"edges": [{"cursor": "c1"}]}}});

    let err = inspector
        .page("orders", &body, "data.orders", Usage::default())
        .unwrap_err();
    assert!(matches!(err, crate::error::Error::Flatten { .. }));
}

#[test]
fn test_missing_connection_fails() {
    let inspector = ResponseInspector::new(shopify_profile()).unwrap();
    let err = inspector
        .page("orders", &json!({"data": {}}), "data.orders", Usage::default())
        .unwrap_err();
    assert!(matches!(err, crate::error::Error::Pagination { .. }));
}

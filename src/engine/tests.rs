//! Tests for the engine module

use super::*;
use crate::cancel::CancellationToken;
use crate::clock::ManualClock;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::flatten::Scalar;
use crate::loader::{LoadBatch, LoadReceipt, Loader, MemoryLoader};
use crate::state::{MemoryWatermarkStore, WatermarkStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

const SOURCE: &str = r#"
name: shop
endpoint: "{{ config.endpoint }}"
auth:
  type: bearer
  token: "{{ config.token }}"
http:
  max_attempts: 2
  initial_backoff_ms: 10
  max_backoff_ms: 10
  jitter_ms: 0
budget:
  max_capacity: 1000
  restore_rate: 50
  baseline_delay_ms: 0
  fallback_cost: 10
start_date: "2024-01-01T00:00:00Z"
resources:
  - name: orders
    primary_key: [id]
    incremental_field: updatedAt
    write_disposition: merge
    page_size: 2
    connection_path: data.orders
    variables:
      query: "updated_at:>='{{ window.start }}' AND updated_at:<'{{ window.end }}'"
    query: "query Orders($first: Int!, $after: String, $query: String) { orders { id } }"
  - name: products
    primary_key: [id]
    write_disposition: replace
    page_size: 2
    connection_path: data.products
    query: "query Products($first: Int!, $after: String) { products { id } }"
"#;

fn source(server: &MockServer, yaml: &str) -> Source {
    let config = SourceConfig::from_yaml(yaml).unwrap();
    let secrets = json!({
        "endpoint": format!("{}/graphql", server.uri()),
        "token": "secret-token"
    });
    Source::resolve(config, &secrets).unwrap()
}

fn connection(root: &str, nodes: Vec<Value>, end_cursor: Option<&str>, has_next: bool) -> Value {
    let edges: Vec<Value> = nodes.into_iter().map(|node| json!({ "node": node })).collect();
    json!({
        "data": {
            root: {
                "edges": edges,
                "pageInfo": { "hasNextPage": has_next, "endCursor": end_cursor }
            }
        }
    })
}

fn order(id: u32, updated_at: &str) -> Value {
    json!({ "id": id.to_string(), "updatedAt": updated_at, "lineItems": { "edges": [
        { "node": { "id": format!("{id}-1"), "quantity": 1 } }
    ] } })
}

async fn mount_page(server: &MockServer, operation: &str, after: Option<&str>, body: Value) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains(operation))
        .and(body_partial_json(json!({ "variables": { "after": after } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

struct Harness {
    orchestrator: Orchestrator,
    loader: Arc<MemoryLoader>,
    watermarks: Arc<MemoryWatermarkStore>,
}

fn harness() -> Harness {
    let loader = Arc::new(MemoryLoader::new());
    let watermarks = Arc::new(MemoryWatermarkStore::new(ts(2024, 1, 1)));
    let clock = Arc::new(ManualClock::new(ts(2024, 3, 1)));
    let orchestrator = Orchestrator::new(loader.clone(), watermarks.clone()).with_clock(clock.clone());
    Harness {
        orchestrator,
        loader,
        watermarks,
    }
}

// ============================================================================
// Window Tests
// ============================================================================

#[test]
fn test_split_windows_without_span_is_one_window() {
    let windows = split_windows(ts(2024, 1, 1), ts(2024, 3, 1), None);
    assert_eq!(windows, vec![TimeWindow::new(ts(2024, 1, 1), ts(2024, 3, 1))]);
}

#[test]
fn test_split_windows_caps_each_window() {
    let windows = split_windows(ts(2024, 1, 1), ts(2024, 3, 1), Some(Duration::days(30)));
    assert_eq!(
        windows,
        vec![
            TimeWindow::new(ts(2024, 1, 1), ts(2024, 1, 31)),
            TimeWindow::new(ts(2024, 1, 31), ts(2024, 3, 1)),
        ]
    );
}

#[test]
fn test_split_windows_empty_range() {
    assert!(split_windows(ts(2024, 3, 1), ts(2024, 3, 1), None).is_empty());
    assert!(split_windows(ts(2024, 3, 2), ts(2024, 3, 1), Some(Duration::days(1))).is_empty());
}

#[test]
fn test_window_template_values() {
    let window = TimeWindow::new(ts(2024, 1, 1), ts(2024, 1, 31));
    assert_eq!(
        window.to_value(),
        json!({ "start": "2024-01-01T00:00:00Z", "end": "2024-01-31T00:00:00Z" })
    );
}

// ============================================================================
// Phase Tests
// ============================================================================

#[test]
fn test_phase_transitions() {
    use ResourcePhase::*;

    assert!(Idle.can_advance_to(Fetching));
    assert!(Fetching.can_advance_to(Flattening));
    assert!(Flattening.can_advance_to(Delivering));
    assert!(Delivering.can_advance_to(Fetching));
    assert!(Fetching.can_advance_to(Completed));
    assert!(Flattening.can_advance_to(Failed));

    assert!(!Idle.can_advance_to(Delivering));
    assert!(!Delivering.can_advance_to(Completed));
    assert!(!Completed.can_advance_to(Failed));
    assert!(!Failed.can_advance_to(Fetching));
    assert!(Completed.is_terminal() && Failed.is_terminal());
}

#[test]
fn test_report_counts() {
    let mut done = ResourceReport::new("orders");
    done.phase = ResourcePhase::Completed;
    done.records = 4;
    let mut broken = ResourceReport::new("products");
    broken.phase = ResourcePhase::Failed;

    let report = ExtractionReport {
        source: "shop".to_string(),
        started_at: ts(2024, 3, 1),
        finished_at: ts(2024, 3, 1),
        resources: vec![done, broken],
    };

    assert_eq!(report.completed_count(), 1);
    assert_eq!(report.failed_count(), 1);
    assert!(!report.is_success());
    assert_eq!(report.total_records(), 4);
    assert!(report.resource("products").unwrap().is_failed());
}

// ============================================================================
// Source Tests
// ============================================================================

#[test]
fn test_resolve_requires_secrets() {
    let config = SourceConfig::from_yaml(SOURCE).unwrap();
    let err = Source::resolve(config, &json!({ "token": "t" })).unwrap_err();
    assert!(err.to_string().contains("config.endpoint"));
}

#[test]
fn test_resolve_prefers_source_section() {
    let config = SourceConfig::from_yaml(SOURCE).unwrap();
    let secrets = json!({
        "endpoint": "https://wrong.example.com/graphql",
        "token": "wrong",
        "shop": { "endpoint": "https://shop.example.com/graphql", "token": "right" }
    });

    let source = Source::resolve(config, &secrets).unwrap();
    assert_eq!(source.endpoint(), "https://shop.example.com/graphql");
    assert!(!format!("{source:?}").contains("right"));
}

// ============================================================================
// Orchestrator Tests
// ============================================================================

#[tokio::test]
async fn test_run_delivers_pages_and_advances_watermark() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "query Orders",
        None,
        connection(
            "orders",
            vec![order(1, "2024-01-05T00:00:00Z"), order(2, "2024-01-10T00:00:00Z")],
            Some("c2"),
            true,
        ),
    )
    .await;
    mount_page(
        &server,
        "query Orders",
        Some("c2"),
        connection("orders", vec![order(3, "2024-02-01T12:00:00Z")], Some("c3"), false),
    )
    .await;
    mount_page(
        &server,
        "query Products",
        None,
        connection("products", vec![json!({ "id": "p1", "title": "Hat" })], None, false),
    )
    .await;

    let h = harness();
    let report = h.orchestrator.run(&source(&server, SOURCE)).await;

    assert!(report.is_success(), "{report:?}");
    let orders = report.resource("orders").unwrap();
    assert_eq!(orders.phase, ResourcePhase::Completed);
    assert_eq!(orders.windows, 1);
    assert_eq!(orders.pages, 2);
    assert_eq!(orders.records, 3);
    assert_eq!(orders.child_rows, 3);
    assert_eq!(orders.batches, 2);
    assert_eq!(orders.watermark_before, Some(ts(2024, 1, 1)));
    assert_eq!(
        orders.watermark_after,
        Some(Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap())
    );

    let products = report.resource("products").unwrap();
    assert_eq!(products.records, 1);
    assert_eq!(products.watermark_after, None);

    assert_eq!(
        h.watermarks.get("orders").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    );
    assert!(!h.watermarks.contains("products").await);

    assert_eq!(h.loader.table("orders").len(), 3);
    assert_eq!(h.loader.table("orders__line_items").len(), 3);
    assert_eq!(h.loader.table("products").len(), 1);

    let sequences: Vec<(String, u64)> = h
        .loader
        .batches()
        .iter()
        .map(|b| (b.resource.clone(), b.sequence))
        .collect();
    assert_eq!(
        sequences,
        vec![
            ("orders".to_string(), 0),
            ("orders".to_string(), 1),
            ("products".to_string(), 0)
        ]
    );
}

#[tokio::test]
async fn test_window_variables_are_rendered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": {
            "query": "updated_at:>='2024-01-01T00:00:00Z' AND updated_at:<'2024-03-01T00:00:00Z'",
            "first": 2,
            "after": null
        } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(connection("orders", vec![], None, false)))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "query Products", None, connection("products", vec![], None, false)).await;

    let h = harness();
    let report = h.orchestrator.run(&source(&server, SOURCE)).await;

    assert!(report.is_success(), "{report:?}");
    let orders = report.resource("orders").unwrap();
    assert_eq!(orders.records, 0);
    assert_eq!(orders.batches, 0);
    assert_eq!(orders.watermark_after, Some(ts(2024, 1, 1)));
    assert!(!h.watermarks.contains("orders").await);
}

#[tokio::test]
async fn test_span_limit_splits_range_into_windows() {
    let server = MockServer::start().await;
    for (from, to) in [
        ("2024-01-01T00:00:00Z", "2024-01-31T00:00:00Z"),
        ("2024-01-31T00:00:00Z", "2024-03-01T00:00:00Z"),
    ] {
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "from": from, "to": to } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(connection("shipments", vec![], None, false)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let yaml = SOURCE.split("resources:").next().unwrap().to_string()
        + r#"resources:
  - name: shipments
    primary_key: [id]
    incremental_field: createdAt
    max_query_span_days: 30
    connection_path: data.shipments
    variables:
      from: "{{ window.start }}"
      to: "{{ window.end }}"
    query: "query Shipments($first: Int!, $after: String, $from: String, $to: String) { shipments { id } }"
"#;

    let h = harness();
    let report = h.orchestrator.run(&source(&server, &yaml)).await;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.resource("shipments").unwrap().windows, 2);
}

#[tokio::test]
async fn test_failure_keeps_watermark_and_isolates_resources() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "query Orders",
        None,
        connection("orders", vec![order(1, "2024-02-20T00:00:00Z")], Some("c1"), true),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query Orders"))
        .and(body_partial_json(json!({ "variables": { "after": "c1" } })))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "query Products",
        None,
        connection("products", vec![json!({ "id": "p1" })], None, false),
    )
    .await;

    let h = harness();
    let report = h.orchestrator.run(&source(&server, SOURCE)).await;

    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.completed_count(), 1);

    let orders = report.resource("orders").unwrap();
    assert_eq!(orders.phase, ResourcePhase::Failed);
    assert_eq!(orders.failed_in, Some(ResourcePhase::Fetching));
    assert_eq!(orders.pages, 1);
    assert_eq!(orders.watermark_after, orders.watermark_before);
    assert!(orders.error.as_deref().unwrap().contains("400"));

    assert!(!h.watermarks.contains("orders").await);
    assert_eq!(h.watermarks.get("orders").await.unwrap(), ts(2024, 1, 1));
    assert_eq!(h.loader.table("products").len(), 1);
}

#[tokio::test]
async fn test_flatten_failure_marks_resource_failed() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "query Orders",
        None,
        connection("orders", vec![json!({ "updatedAt": "2024-01-05T00:00:00Z" })], None, false),
    )
    .await;
    mount_page(&server, "query Products", None, connection("products", vec![], None, false)).await;

    let h = harness();
    let report = h.orchestrator.run(&source(&server, SOURCE)).await;

    let orders = report.resource("orders").unwrap();
    assert_eq!(orders.failed_in, Some(ResourcePhase::Flattening));
    assert!(h.loader.table("orders").is_empty());
    assert!(report.resource("products").unwrap().is_completed());
}

/// Loader that refuses one resource and stores the rest
#[derive(Debug)]
struct RefusingLoader {
    refuse: &'static str,
    inner: MemoryLoader,
}

#[async_trait]
impl Loader for RefusingLoader {
    async fn load(&self, batch: LoadBatch) -> Result<LoadReceipt> {
        if batch.resource == self.refuse {
            return Err(Error::loader(&batch.resource, "destination unavailable"));
        }
        self.inner.load(batch).await
    }
}

#[tokio::test]
async fn test_loader_failure_marks_resource_failed_in_delivering() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "query Orders",
        None,
        connection("orders", vec![order(1, "2024-02-20T00:00:00Z")], None, false),
    )
    .await;
    mount_page(
        &server,
        "query Products",
        None,
        connection("products", vec![json!({ "id": "p1" })], None, false),
    )
    .await;

    let loader = Arc::new(RefusingLoader {
        refuse: "orders",
        inner: MemoryLoader::new(),
    });
    let watermarks = Arc::new(MemoryWatermarkStore::new(ts(2024, 1, 1)));
    let orchestrator = Orchestrator::new(loader.clone(), watermarks.clone())
        .with_clock(Arc::new(ManualClock::new(ts(2024, 3, 1))));

    let report = orchestrator.run(&source(&server, SOURCE)).await;

    let orders = report.resource("orders").unwrap();
    assert_eq!(orders.phase, ResourcePhase::Failed);
    assert_eq!(orders.failed_in, Some(ResourcePhase::Delivering));
    assert_eq!(orders.batches, 0);
    assert_eq!(orders.watermark_after, Some(ts(2024, 1, 1)));
    assert!(orders.error.as_deref().unwrap().contains("destination unavailable"));
    assert!(!watermarks.contains("orders").await);

    assert!(report.resource("products").unwrap().is_completed());
    assert_eq!(loader.inner.table("products").len(), 1);
}

#[tokio::test]
async fn test_page_limit_leaves_watermark_unchanged() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "query Orders",
        None,
        connection("orders", vec![order(1, "2024-02-20T00:00:00Z")], Some("c1"), true),
    )
    .await;
    mount_page(&server, "query Products", None, connection("products", vec![], None, false)).await;

    let yaml = SOURCE.replacen(
        "    page_size: 2\n    connection_path: data.orders",
        "    page_size: 2\n    max_pages: 1\n    connection_path: data.orders",
        1,
    );
    let h = harness();
    let report = h.orchestrator.run(&source(&server, &yaml)).await;

    let orders = report.resource("orders").unwrap();
    assert!(orders.is_completed(), "{orders:?}");
    assert!(orders.truncated);
    assert_eq!(orders.pages, 1);
    assert_eq!(orders.records, 1);
    assert_eq!(orders.watermark_after, Some(ts(2024, 1, 1)));
    assert!(!h.watermarks.contains("orders").await);
    assert!(!report.resource("products").unwrap().truncated);
}

#[tokio::test]
async fn test_cancelled_run_fails_every_resource() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(connection("orders", vec![], None, false)))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let orchestrator = h.orchestrator.with_cancellation(cancel);

    let report = orchestrator.run(&source(&server, SOURCE)).await;

    assert_eq!(report.resources.len(), 2);
    assert_eq!(report.failed_count(), 2);
    for resource in &report.resources {
        assert_eq!(resource.error.as_deref(), Some("Extraction cancelled"));
    }
    assert!(h.loader.batches().is_empty());
}

#[tokio::test]
async fn test_second_run_starts_from_stored_watermark() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": {
            "query": "updated_at:>='2024-02-10T00:00:00Z' AND updated_at:<'2024-03-01T00:00:00Z'"
        } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(connection(
            "orders",
            vec![order(9, "2024-02-15T00:00:00Z")],
            None,
            false,
        )))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "query Products", None, connection("products", vec![], None, false)).await;

    let h = harness();
    h.watermarks.set("orders", ts(2024, 2, 10)).await.unwrap();

    let report = h.orchestrator.run(&source(&server, SOURCE)).await;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(h.watermarks.get("orders").await.unwrap(), ts(2024, 2, 15));
    assert_eq!(
        h.loader.table("orders")[0].get("updated_at"),
        Some(&Scalar::from("2024-02-15T00:00:00.000Z"))
    );
}

#[tokio::test]
async fn test_run_concurrently_keeps_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("query Orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(connection("orders", vec![], None, false)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("query Products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(connection("products", vec![], None, false)))
        .mount(&server)
        .await;

    let first = harness();
    let second = harness();
    let renamed = SOURCE.replacen("name: shop", "name: outlet", 1);
    let runs = vec![
        (first.orchestrator, source(&server, SOURCE)),
        (second.orchestrator, source(&server, &renamed)),
    ];

    let reports = run_concurrently(&runs).await;

    let names: Vec<_> = reports.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(names, vec!["shop", "outlet"]);
    assert!(reports.iter().all(ExtractionReport::is_success));
}

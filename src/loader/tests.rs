//! Tests for the loader module

use super::*;
use crate::flatten::{ChildRecordSet, FlatRecord, Scalar, DEFAULT_PARENT_LINK};
use crate::types::WriteDisposition;
use tempfile::tempdir;

fn record(id: i64, name: &str, children: &[i64]) -> FlatRecord {
    let mut record = FlatRecord::default();
    record.fields.insert("id".to_string(), Scalar::Int(id));
    record.fields.insert("name".to_string(), Scalar::from(name));
    if !children.is_empty() {
        record.children.push(ChildRecordSet {
            table: "orders__line_items".to_string(),
            records: children
                .iter()
                .map(|child| {
                    let mut row = FlatRecord::default();
                    row.fields.insert("id".to_string(), Scalar::Int(*child));
                    row.fields
                        .insert(DEFAULT_PARENT_LINK.to_string(), Scalar::from(id.to_string()));
                    row
                })
                .collect(),
        });
    }
    record
}

fn batch(disposition: WriteDisposition, sequence: u64, records: Vec<FlatRecord>) -> LoadBatch {
    LoadBatch {
        source: "shop".to_string(),
        resource: "orders".to_string(),
        disposition,
        primary_key: vec!["id".to_string()],
        sequence,
        records,
    }
}

// ============================================================================
// Batch Tests
// ============================================================================

#[test]
fn test_batch_rows_and_tables() {
    let batch = batch(
        WriteDisposition::Merge,
        0,
        vec![record(1, "a", &[10, 11]), record(2, "b", &[])],
    );

    assert_eq!(batch.row_count(), 4);
    assert_eq!(batch.rows().len(), 4);
    assert_eq!(
        batch.tables().into_iter().collect::<Vec<_>>(),
        vec!["orders", "orders__line_items"]
    );
}

// ============================================================================
// Memory Loader Tests
// ============================================================================

#[tokio::test]
async fn test_memory_loader_merges_by_primary_key() {
    let loader = MemoryLoader::new();

    loader
        .load(batch(WriteDisposition::Merge, 0, vec![record(1, "a", &[10])]))
        .await
        .unwrap();
    let receipt = loader
        .load(batch(WriteDisposition::Merge, 1, vec![record(1, "a2", &[10]), record(2, "b", &[])]))
        .await
        .unwrap();

    assert_eq!(receipt, LoadReceipt { rows: 3, tables: 2 });
    let orders = loader.table("orders");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["name"], Scalar::from("a2"));
    assert_eq!(loader.table("orders__line_items").len(), 1);
    assert_eq!(loader.batches().len(), 2);
}

#[tokio::test]
async fn test_memory_loader_replace_clears_previous_contents_once() {
    let loader = MemoryLoader::new();
    loader
        .load(batch(WriteDisposition::Merge, 0, vec![record(1, "old", &[])]))
        .await
        .unwrap();

    loader
        .load(batch(WriteDisposition::Replace, 0, vec![record(2, "b", &[])]))
        .await
        .unwrap();
    loader
        .load(batch(WriteDisposition::Replace, 1, vec![record(3, "c", &[])]))
        .await
        .unwrap();

    let names: Vec<_> = loader
        .table("orders")
        .iter()
        .map(|row| row["name"].clone())
        .collect();
    assert_eq!(names, vec![Scalar::from("b"), Scalar::from("c")]);
}

// ============================================================================
// JSONL Loader Tests
// ============================================================================

#[tokio::test]
async fn test_jsonl_loader_writes_one_file_per_table() {
    let dir = tempdir().unwrap();
    let loader = JsonlLoader::new(dir.path());

    let receipt = loader
        .load(batch(WriteDisposition::Merge, 0, vec![record(1, "a", &[10, 11])]))
        .await
        .unwrap();

    assert_eq!(receipt, LoadReceipt { rows: 3, tables: 2 });
    let orders = std::fs::read_to_string(loader.table_path("shop", "orders")).unwrap();
    assert_eq!(orders, "{\"id\":1,\"name\":\"a\"}\n");
    let items = std::fs::read_to_string(loader.table_path("shop", "orders__line_items")).unwrap();
    assert_eq!(items.lines().count(), 2);
    assert!(items.contains("\"_parent_id\":\"1\""));
}

#[tokio::test]
async fn test_jsonl_loader_merge_appends_across_loaders() {
    let dir = tempdir().unwrap();

    for run in 0..2 {
        let loader = JsonlLoader::new(dir.path());
        loader
            .load(batch(WriteDisposition::Merge, 0, vec![record(run, "a", &[])]))
            .await
            .unwrap();
    }

    let orders = std::fs::read_to_string(dir.path().join("shop/orders.jsonl")).unwrap();
    assert_eq!(orders.lines().count(), 2);
}

#[tokio::test]
async fn test_jsonl_loader_replace_truncates_on_first_batch_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shop/orders.jsonl");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{\"stale\":true}\n").unwrap();

    let loader = JsonlLoader::new(dir.path());
    loader
        .load(batch(WriteDisposition::Replace, 0, vec![record(1, "a", &[])]))
        .await
        .unwrap();
    loader
        .load(batch(WriteDisposition::Replace, 1, vec![record(2, "b", &[])]))
        .await
        .unwrap();

    let orders = std::fs::read_to_string(&path).unwrap();
    assert!(!orders.contains("stale"));
    assert_eq!(orders.lines().count(), 2);
}

//! Loader contract types

use crate::error::Result;
use crate::flatten::{FlatRecord, Row};
use crate::types::WriteDisposition;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Flat records of one page, addressed to the loader
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBatch {
    /// Source name
    pub source: String,
    /// Resource (top-level table) name
    pub resource: String,
    /// How the loader should persist the rows
    pub disposition: WriteDisposition,
    /// Primary key columns of the top-level table
    pub primary_key: Vec<String>,
    /// Position of this batch within the resource's run, from 0
    pub sequence: u64,
    /// Parent records with their child sets, in discovery order
    pub records: Vec<FlatRecord>,
}

impl LoadBatch {
    /// Every row in the batch, each parent followed by its descendants
    pub fn rows(&self) -> Vec<Row<'_>> {
        self.records
            .iter()
            .flat_map(|record| record.rows(&self.resource))
            .collect()
    }

    /// Total rows across all tables
    pub fn row_count(&self) -> usize {
        self.records
            .iter()
            .map(|record| 1 + record.child_row_count())
            .sum()
    }

    /// Tables touched by this batch
    pub fn tables(&self) -> BTreeSet<&str> {
        self.rows().into_iter().map(|row| row.table).collect()
    }

    /// Whether the batch has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// What a loader accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReceipt {
    /// Rows written across all tables
    pub rows: usize,
    /// Distinct tables written
    pub tables: usize,
}

/// Destination for flat records
///
/// Implementations own persistence, deduplication by primary key and schema
/// evolution. Batches for a resource arrive in sequence order.
#[async_trait]
pub trait Loader: Send + Sync + std::fmt::Debug {
    /// Accept one batch
    async fn load(&self, batch: LoadBatch) -> Result<LoadReceipt>;
}

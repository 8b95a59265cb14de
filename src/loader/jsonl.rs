//! Bundled loaders: JSON Lines files and in-memory tables

use super::types::{LoadBatch, LoadReceipt, Loader};
use crate::error::{Error, Result};
use crate::flatten::{Fields, Scalar, RECORD_KEY};
use crate::types::WriteDisposition;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes each table to `<dir>/<source>/<table>.jsonl`
///
/// `merge` batches append. `replace` truncates a table file the first time
/// this loader touches it, then appends.
#[derive(Debug)]
pub struct JsonlLoader {
    dir: PathBuf,
    touched: tokio::sync::Mutex<HashSet<PathBuf>>,
}

impl JsonlLoader {
    /// Create a loader rooted at `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            touched: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a table
    pub fn table_path(&self, source: &str, table: &str) -> PathBuf {
        self.dir.join(source).join(format!("{table}.jsonl"))
    }
}

#[async_trait]
impl Loader for JsonlLoader {
    async fn load(&self, batch: LoadBatch) -> Result<LoadReceipt> {
        let mut lines: BTreeMap<&str, String> = BTreeMap::new();
        let rows = batch.rows();
        for row in &rows {
            let line = serde_json::to_string(row.fields)
                .map_err(|e| Error::loader(&batch.resource, format!("{}: {e}", row.table)))?;
            let buffer = lines.entry(row.table).or_default();
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let mut touched = self.touched.lock().await;
        for (table, contents) in &lines {
            let path = self.table_path(&batch.source, table);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let first_touch = touched.insert(path.clone());
            let truncate = first_touch && batch.disposition == WriteDisposition::Replace;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(!truncate)
                .truncate(truncate)
                .open(&path)
                .await
                .map_err(|e| {
                    Error::loader(&batch.resource, format!("open {}: {e}", path.display()))
                })?;
            file.write_all(contents.as_bytes()).await?;
            file.flush().await?;
        }

        debug!(
            source = %batch.source,
            resource = %batch.resource,
            sequence = batch.sequence,
            rows = rows.len(),
            tables = lines.len(),
            "Wrote batch"
        );

        Ok(LoadReceipt {
            rows: rows.len(),
            tables: lines.len(),
        })
    }
}

/// Keeps every batch in memory, applying merge and replace per table
#[derive(Debug, Default)]
pub struct MemoryLoader {
    inner: Mutex<MemoryTables>,
}

#[derive(Debug, Default)]
struct MemoryTables {
    batches: Vec<LoadBatch>,
    tables: HashMap<String, Vec<Fields>>,
    replaced: HashSet<String>,
}

impl MemoryLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch received, in arrival order
    pub fn batches(&self) -> Vec<LoadBatch> {
        self.lock().batches.clone()
    }

    /// Current contents of a table
    pub fn table(&self, table: &str) -> Vec<Fields> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Names of tables with at least one row
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTables> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    async fn load(&self, batch: LoadBatch) -> Result<LoadReceipt> {
        let mut inner = self.lock();
        let mut written = HashSet::new();
        let mut count = 0;

        for row in batch.rows() {
            let key = format!("{}.{}", batch.source, row.table);
            if batch.disposition == WriteDisposition::Replace && inner.replaced.insert(key) {
                inner.tables.remove(row.table);
            }

            let rows = inner.tables.entry(row.table.to_string()).or_default();
            let existing = identity(&batch, row.table, row.fields).and_then(|id| {
                rows.iter()
                    .position(|r| identity(&batch, row.table, r).as_ref() == Some(&id))
            });

            match existing {
                Some(index) if batch.disposition == WriteDisposition::Merge => {
                    rows[index] = row.fields.clone();
                }
                _ => rows.push(row.fields.clone()),
            }
            written.insert(row.table.to_string());
            count += 1;
        }

        inner.batches.push(batch);
        Ok(LoadReceipt {
            rows: count,
            tables: written.len(),
        })
    }
}

/// Deduplication key: the primary key on the top-level table, `id` or the
/// synthetic record key on child tables
fn identity(batch: &LoadBatch, table: &str, fields: &Fields) -> Option<Vec<String>> {
    let value = |column: &str| fields.get(column).and_then(Scalar::key_string);
    if table == batch.resource {
        if batch.primary_key.is_empty() {
            return None;
        }
        batch.primary_key.iter().map(|column| value(column.as_str())).collect()
    } else {
        value("id").or_else(|| value(RECORD_KEY)).map(|key| vec![key])
    }
}

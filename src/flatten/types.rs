//! Flat record types and flatten rules

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column name of the parent link written on every child row
pub const DEFAULT_PARENT_LINK: &str = "_parent_id";

/// Column holding the synthetic key of children without an `id`
pub const RECORD_KEY: &str = "_record_key";

/// Column holding the extraction timestamp
pub const EXTRACTED_AT: &str = "_extracted_at";

/// A single flat column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a key component; null has no key form
    pub fn key_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Column name to scalar
pub type Fields = BTreeMap<String, Scalar>;

/// One entity instance with its one-to-many children externalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRecord {
    /// Flat columns
    pub fields: Fields,
    /// Child tables discovered under this record, in discovery order
    pub children: Vec<ChildRecordSet>,
}

impl FlatRecord {
    /// Look up a column
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.fields.get(column)
    }

    /// Child set for a table name
    pub fn child(&self, table: &str) -> Option<&ChildRecordSet> {
        self.children.iter().find(|set| set.table == table)
    }

    /// Every row of this record and its descendants, parent first
    pub fn rows<'a>(&'a self, table: &'a str) -> Vec<Row<'a>> {
        let mut rows = Vec::new();
        self.collect_rows(table, &mut rows);
        rows
    }

    fn collect_rows<'a>(&'a self, table: &'a str, rows: &mut Vec<Row<'a>>) {
        rows.push(Row {
            table,
            fields: &self.fields,
        });
        for set in &self.children {
            for record in &set.records {
                record.collect_rows(&set.table, rows);
            }
        }
    }

    /// Number of rows across all descendant child sets
    pub fn child_row_count(&self) -> usize {
        self.children
            .iter()
            .flat_map(|set| &set.records)
            .map(|record| 1 + record.child_row_count())
            .sum()
    }
}

/// Records of one child table belonging to a single parent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildRecordSet {
    /// Table name, e.g. `orders__line_items`
    pub table: String,
    /// Child records in payload order
    pub records: Vec<FlatRecord>,
}

/// A borrowed row addressed to a table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row<'a> {
    /// Destination table
    pub table: &'a str,
    /// Row columns
    pub fields: &'a Fields,
}

/// Per-resource flatten rules
///
/// Field lists match on the snake_case leaf name at any depth. An entry may
/// be an exact name, `*_suffix` or `prefix_*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenRules {
    /// Fields removed everywhere (privacy and bulky payloads)
    #[serde(default)]
    pub drop_fields: Vec<String>,

    /// Numeric fields preserved as strings
    #[serde(default)]
    pub money_fields: Vec<String>,

    /// Fields coerced to integers
    #[serde(default = "default_quantity_fields")]
    pub quantity_fields: Vec<String>,

    /// Fields normalized to millisecond UTC timestamps
    #[serde(default = "default_timestamp_fields")]
    pub timestamp_fields: Vec<String>,

    /// Parent link column on child rows
    #[serde(default = "default_parent_link")]
    pub parent_link: String,
}

fn default_quantity_fields() -> Vec<String> {
    vec!["quantity".to_string(), "*_quantity".to_string()]
}

fn default_timestamp_fields() -> Vec<String> {
    vec!["*_at".to_string()]
}

fn default_parent_link() -> String {
    DEFAULT_PARENT_LINK.to_string()
}

impl Default for FlattenRules {
    fn default() -> Self {
        Self {
            drop_fields: Vec::new(),
            money_fields: Vec::new(),
            quantity_fields: default_quantity_fields(),
            timestamp_fields: default_timestamp_fields(),
            parent_link: default_parent_link(),
        }
    }
}

impl FlattenRules {
    /// Add fields to the drop list
    #[must_use]
    pub fn drop<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add money fields
    #[must_use]
    pub fn money<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.money_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add quantity fields
    #[must_use]
    pub fn quantities<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quantity_fields.extend(fields.into_iter().map(Into::into));
        self
    }
}

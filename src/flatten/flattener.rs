//! Flattener implementation

use super::naming::{format_timestamp, join, normalize_timestamp, snake_case, FieldSet};
use super::types::{ChildRecordSet, Fields, FlatRecord, FlattenRules, Scalar, EXTRACTED_AT, RECORD_KEY};
use crate::error::{Error, Result};
use crate::graphql::Page;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

/// Turns graph-shaped item nodes into flat records for one resource
#[derive(Debug, Clone)]
pub struct Flattener {
    resource: String,
    primary_key: Vec<String>,
    parent_link: String,
    drop: FieldSet,
    money: FieldSet,
    quantity: FieldSet,
    timestamps: FieldSet,
}

/// Where a record sits while being flattened
struct Scope<'a> {
    table: &'a str,
    extracted_at: &'a str,
}

impl Flattener {
    /// Create a flattener for a resource and its primary key columns
    pub fn new(resource: impl Into<String>, primary_key: &[String], rules: &FlattenRules) -> Self {
        Self {
            resource: resource.into(),
            primary_key: primary_key.iter().map(|k| snake_case(k)).collect(),
            parent_link: rules.parent_link.clone(),
            drop: FieldSet::new(&rules.drop_fields),
            money: FieldSet::new(&rules.money_fields),
            quantity: FieldSet::new(&rules.quantity_fields),
            timestamps: FieldSet::new(&rules.timestamp_fields),
        }
    }

    /// Resource (and top-level table) name
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Flatten every item on a page, tagged with the resource name
    pub fn flatten(&self, page: &Page, extracted_at: DateTime<Utc>) -> Result<Vec<(String, FlatRecord)>> {
        Ok(self
            .flatten_page(page, extracted_at)?
            .into_iter()
            .map(|record| (self.resource.clone(), record))
            .collect())
    }

    /// Flatten every item on a page, in page order
    pub fn flatten_page(&self, page: &Page, extracted_at: DateTime<Utc>) -> Result<Vec<FlatRecord>> {
        let stamp = format_timestamp(&extracted_at);
        page.items
            .iter()
            .enumerate()
            .map(|(index, item)| self.flatten_item(item, index, &stamp))
            .collect()
    }

    fn flatten_item(&self, item: &Value, index: usize, extracted_at: &str) -> Result<FlatRecord> {
        let Value::Object(node) = item else {
            return Err(self.error(format!("item {index} is not an object: {}", kind(item))));
        };

        let scope = Scope {
            table: &self.resource,
            extracted_at,
        };
        let mut record = FlatRecord::default();
        let mut pending = Vec::new();
        self.flatten_object(node, "", &scope, &mut record.fields, &mut pending)?;

        let key = if self.primary_key.is_empty() {
            match record.get("id").and_then(Scalar::key_string) {
                Some(id) => id,
                None => {
                    let key = format!("#{index}");
                    if !pending.is_empty() {
                        record.fields.insert(RECORD_KEY.to_string(), Scalar::Text(key.clone()));
                    }
                    key
                }
            }
        } else {
            self.primary_key_of(&record, index)?
        };

        record.fields.insert(EXTRACTED_AT.to_string(), Scalar::from(extracted_at));
        record.children = self.resolve_children(pending, &key, &scope)?;
        Ok(record)
    }

    fn primary_key_of(&self, record: &FlatRecord, index: usize) -> Result<String> {
        let mut parts = Vec::with_capacity(self.primary_key.len());
        for column in &self.primary_key {
            match record.get(column).and_then(Scalar::key_string) {
                Some(part) => parts.push(part),
                None => {
                    return Err(self.error(format!(
                        "item {index} is missing primary key field '{column}'"
                    )))
                }
            }
        }
        Ok(parts.join("|"))
    }

    /// Write scalar columns of `node` into `fields`; collections go to `pending`
    fn flatten_object<'v>(
        &self,
        node: &'v Map<String, Value>,
        prefix: &str,
        scope: &Scope<'_>,
        fields: &mut Fields,
        pending: &mut Vec<(String, &'v Value)>,
    ) -> Result<()> {
        for (key, value) in node {
            let name = snake_case(key);
            if self.drop.matches(&name) {
                continue;
            }
            let column = join(prefix, &name);

            match value {
                Value::Object(inner) if is_money(inner) => {
                    self.flatten_money(inner, &column, fields);
                }
                Value::Object(inner) if is_connection(inner) => {
                    pending.push((column, value));
                }
                Value::Object(inner) => {
                    self.flatten_object(inner, &column, scope, fields, pending)?;
                }
                Value::Array(_) => pending.push((column, value)),
                scalar => {
                    let flat = self.scalar(&name, &column, scalar, scope)?;
                    fields.insert(column, flat);
                }
            }
        }
        Ok(())
    }

    fn flatten_money(&self, money: &Map<String, Value>, column: &str, fields: &mut Fields) {
        let amount = money.get("amount").map_or(Scalar::Null, |v| match v {
            Value::Null => Scalar::Null,
            Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        });
        let currency = money
            .get("currencyCode")
            .or_else(|| money.get("currency_code"))
            .and_then(Value::as_str)
            .map_or(Scalar::Null, Scalar::from);
        fields.insert(format!("{column}_amount"), amount);
        fields.insert(format!("{column}_currency"), currency);
    }

    fn scalar(&self, name: &str, column: &str, value: &Value, scope: &Scope<'_>) -> Result<Scalar> {
        if value.is_null() {
            return Ok(Scalar::Null);
        }
        if self.money.matches(name) {
            return Ok(match value {
                Value::String(s) => Scalar::Text(s.clone()),
                other => Scalar::Text(other.to_string()),
            });
        }
        if self.quantity.matches(name) {
            return coerce_int(value).map(Scalar::Int).ok_or_else(|| {
                self.error(format!(
                    "{}.{column}: cannot coerce {value} to an integer",
                    scope.table
                ))
            });
        }
        if self.timestamps.matches(name) {
            return value
                .as_str()
                .and_then(normalize_timestamp)
                .map(Scalar::Text)
                .ok_or_else(|| {
                    self.error(format!(
                        "{}.{column}: unparsable timestamp {value}",
                        scope.table
                    ))
                });
        }
        Ok(match value {
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => number(n),
            Value::String(s) => Scalar::Text(s.clone()),
            _ => Scalar::Null,
        })
    }

    /// Turn collected collections into child sets keyed to `parent_key`
    fn resolve_children(
        &self,
        pending: Vec<(String, &Value)>,
        parent_key: &str,
        scope: &Scope<'_>,
    ) -> Result<Vec<ChildRecordSet>> {
        let mut sets = Vec::new();
        for (column, value) in pending {
            let table = format!("{}__{column}", scope.table);
            let elements = self.elements(&table, value)?;
            if elements.is_empty() {
                continue;
            }

            let mut records = Vec::with_capacity(elements.len());
            for (index, element) in elements.into_iter().enumerate() {
                records.push(self.child(&table, element, parent_key, index, scope.extracted_at)?);
            }
            sets.push(ChildRecordSet { table, records });
        }
        Ok(sets)
    }

    /// Items of an `edges` / `nodes` connection or a plain array
    fn elements<'v>(&self, table: &str, value: &'v Value) -> Result<Vec<&'v Value>> {
        match value {
            Value::Array(items) => Ok(items.iter().collect()),
            Value::Object(connection) => {
                if let Some(Value::Array(edges)) = connection.get("edges") {
                    edges
                        .iter()
                        .enumerate()
                        .map(|(i, edge)| match edge.get("node") {
                            Some(node) if node.is_object() => Ok(node),
                            Some(node) if !node.is_null() => Err(self.error(format!(
                                "{table}: node {i} is not an object: {}",
                                kind(node)
                            ))),
                            _ => Err(self.error(format!("{table}: edge {i} has no node"))),
                        })
                        .collect()
                } else if let Some(Value::Array(nodes)) = connection.get("nodes") {
                    Ok(nodes.iter().collect())
                } else {
                    Ok(Vec::new())
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    fn child(
        &self,
        table: &str,
        element: &Value,
        parent_key: &str,
        index: usize,
        extracted_at: &str,
    ) -> Result<FlatRecord> {
        let scope = Scope { table, extracted_at };
        let mut record = FlatRecord::default();
        let mut pending = Vec::new();

        match element {
            Value::Object(node) => {
                self.flatten_object(node, "", &scope, &mut record.fields, &mut pending)?;
            }
            Value::Array(_) => {
                return Err(self.error(format!("{table}: element {index} is a nested array")));
            }
            scalar => {
                let flat = self.scalar("value", "value", scalar, &scope)?;
                record.fields.insert("value".to_string(), flat);
            }
        }

        let key = match record.get("id").and_then(Scalar::key_string) {
            Some(id) => id,
            None => {
                let key = format!("{parent_key}#{index}");
                record.fields.insert(RECORD_KEY.to_string(), Scalar::Text(key.clone()));
                key
            }
        };

        record
            .fields
            .insert(self.parent_link.clone(), Scalar::Text(parent_key.to_string()));
        record
            .fields
            .insert(EXTRACTED_AT.to_string(), Scalar::from(extracted_at));
        record.children = self.resolve_children(pending, &key, &scope)?;
        Ok(record)
    }

    fn error(&self, message: String) -> Error {
        Error::flatten(&self.resource, message)
    }
}

fn is_money(object: &Map<String, Value>) -> bool {
    object.contains_key("amount")
        && (object.contains_key("currencyCode") || object.contains_key("currency_code"))
}

fn is_connection(object: &Map<String, Value>) -> bool {
    matches!(object.get("edges"), Some(Value::Array(_)))
        || matches!(object.get("nodes"), Some(Value::Array(_)))
}

fn number(n: &Number) -> Scalar {
    match n.as_i64() {
        Some(i) => Scalar::Int(i),
        None => n.as_f64().map_or(Scalar::Null, Scalar::Float),
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    let whole = |f: f64| (f.is_finite() && f.fract() == 0.0).then_some(f as i64);
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole))
        }
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// src/data.rs

//! In-memory dataset handles passed between steps.
//!
//! A [`Dataset`] is what a submitted step produces and what its dependents
//! consume. Rows are JSON objects; the schema is a flat list of field names
//! used by stream translators and derivers. Rows are behind an `Arc` so a
//! dataset can be handed to several dependents without copying.

use std::sync::Arc;

use serde_json::Value;

/// One row of step data. Always a JSON object in practice.
pub type Record = Value;

/// Flat schema descriptor: ordered field names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub fields: Vec<String>,
}

impl Schema {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Schema inferred from the first row's object keys, or empty.
    pub fn infer(rows: &[Record]) -> Self {
        let fields = rows
            .first()
            .and_then(|r| r.as_object())
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        Self { fields }
    }
}

/// Materialized output of a submitted step.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Schema,
    rows: Arc<Vec<Record>>,
}

impl Dataset {
    pub fn new(schema: Schema, rows: Vec<Record>) -> Self {
        Self {
            schema,
            rows: Arc::new(rows),
        }
    }

    /// Dataset with a schema inferred from the rows themselves.
    pub fn from_rows(rows: Vec<Record>) -> Self {
        let schema = Schema::infer(&rows);
        Self::new(schema, rows)
    }

    pub fn empty() -> Self {
        Self::new(Schema::default(), Vec::new())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

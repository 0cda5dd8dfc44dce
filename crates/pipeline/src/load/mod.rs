//! Destination writes.
//!
//! Every destination table is made of text columns named after the
//! sanitized source columns. Rows are inserted in batches with positional
//! placeholders; identifiers are never taken from user input without
//! passing through [`sanitize_identifier`].

mod sql;

use async_trait::async_trait;
use cadence_core::model::{Pipeline, WriteMode};
use cadence_core::number::stringify;
use cadence_core::Row;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

pub use sql::SqlLoader;

pub const BATCH_SIZE: usize = 500;
/// Bind parameters one statement may carry, on both PostgreSQL and MySQL.
pub const MAX_BIND_PARAMS: usize = 65_535;
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Writes transformed rows to a pipeline's destination.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Returns the number of rows written.
    async fn load(
        &self,
        pipeline: &Pipeline,
        rows: &[Row],
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError>;
}

/// Lower-case, collapse every run of characters outside `[a-z0-9_]` into a
/// single `_`, and cut to 63 bytes.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
            last_was_sep = c == '_';
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    if out.is_empty() {
        out.push_str("col");
    }
    out.truncate(MAX_IDENTIFIER_LEN);
    out
}

/// Table written by INTERNAL_RAW destinations.
pub fn internal_table_name(pipeline_name: &str) -> String {
    sanitize_identifier(&format!("pipeline_data_{pipeline_name}"))
}

/// Table written by external destinations: the configured name, or one
/// derived from the pipeline id.
pub fn external_table_name(pipeline: &Pipeline) -> String {
    match pipeline.destination_config.table_name.as_deref() {
        Some(name) if !name.trim().is_empty() => sanitize_identifier(name),
        _ => sanitize_identifier(&format!("pipeline_{}", pipeline.id.simple())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Mysql,
}

impl Dialect {
    fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{ident}\""),
            Dialect::Mysql => format!("`{ident}`"),
        }
    }

    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Mysql => "?".to_string(),
        }
    }
}

/// Table name, column mapping and statements for one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub table: String,
    /// `(source column, destination column)`, sorted by source column.
    pub columns: Vec<(String, String)>,
    pub write_mode: WriteMode,
}

impl LoadPlan {
    /// Columns are the sorted union of every row's keys. Sanitized names
    /// that collide get a numeric suffix.
    pub fn new(table: String, rows: &[Row], write_mode: WriteMode) -> Self {
        let mut source: Vec<&String> = rows.iter().flat_map(|r| r.keys()).collect();
        source.sort();
        source.dedup();

        let mut taken = std::collections::HashSet::new();
        let columns = source
            .into_iter()
            .map(|src| {
                let base = sanitize_identifier(src);
                let mut name = base.clone();
                let mut n = 2;
                while !taken.insert(name.clone()) {
                    let suffix = format!("_{n}");
                    let keep = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len()).min(base.len());
                    name = format!("{}{suffix}", &base[..keep]);
                    n += 1;
                }
                (src.clone(), name)
            })
            .collect();

        Self {
            table,
            columns,
            write_mode,
        }
    }

    pub fn drop_sql(&self, d: Dialect) -> String {
        format!("DROP TABLE IF EXISTS {}", d.quote(&self.table))
    }

    pub fn create_sql(&self, d: Dialect) -> String {
        let defs: Vec<String> = self
            .columns
            .iter()
            .map(|(_, dest)| format!("{} TEXT", d.quote(dest)))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            d.quote(&self.table),
            defs.join(", ")
        )
    }

    /// Rows per INSERT: [`BATCH_SIZE`], fewer for wide tables so one
    /// statement stays within [`MAX_BIND_PARAMS`].
    pub fn batch_rows(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).clamp(1, BATCH_SIZE)
    }

    pub fn insert_sql(&self, d: Dialect, row_count: usize) -> String {
        let cols: Vec<String> = self.columns.iter().map(|(_, dest)| d.quote(dest)).collect();
        let width = self.columns.len();
        let groups: Vec<String> = (0..row_count)
            .map(|r| {
                let ph: Vec<String> = (1..=width).map(|c| d.placeholder(r * width + c)).collect();
                format!("({})", ph.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            d.quote(&self.table),
            cols.join(", "),
            groups.join(", ")
        )
    }

    /// Bind values for one batch in placeholder order. Null and missing
    /// cells bind as SQL NULL.
    pub fn batch_values(&self, batch: &[Row]) -> Vec<Option<String>> {
        let mut out = Vec::with_capacity(batch.len() * self.columns.len());
        for row in batch {
            for (src, _) in &self.columns {
                out.push(match row.get(src) {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(stringify(v)),
                });
            }
        }
        out
    }
}

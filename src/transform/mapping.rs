use csv::StringRecord;
use std::collections::HashSet;
use tracing::debug;

use super::coercion::{CellCoercionWarning, Value, coerce};
use super::{Batch, DestinationRow};
use crate::db::schema::{Column, Schema, SqlType};
use crate::error::LoadError;
use crate::formats::RawBatch;

/// Coercion warnings kept per batch for logging; the rest are only counted
const MAX_WARNING_SAMPLES: usize = 5;

const PRICE: SqlType = SqlType::Numeric {
    precision: 12,
    scale: 2,
};

const TOTAL: SqlType = SqlType::Numeric {
    precision: 15,
    scale: 2,
};

/// Source header -> destination column -> type, in destination column order
const SALES_RECORD_COLUMNS: &[(&str, &str, SqlType)] = &[
    ("Region", "region", SqlType::Text),
    ("Country", "country", SqlType::Text),
    ("Item Type", "item_type", SqlType::Text),
    ("Sales Channel", "sales_channel", SqlType::Text),
    ("Order Priority", "order_priority", SqlType::Text),
    ("Order Date", "order_date", SqlType::Date),
    ("Order ID", "order_id", SqlType::BigInt),
    ("Ship Date", "ship_date", SqlType::Date),
    ("Units Sold", "units_sold", SqlType::Integer),
    ("Unit Price", "unit_price", PRICE),
    ("Unit Cost", "unit_cost", PRICE),
    ("Total Revenue", "total_revenue", TOTAL),
    ("Total Cost", "total_cost", TOTAL),
    ("Total Profit", "total_profit", TOTAL),
];

/// One entry of the column mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub source: String,
    pub destination: String,
    pub sql_type: SqlType,
}

impl ColumnSpec {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            sql_type,
        }
    }
}

/// Normalize a header for matching: keep letters and digits, lowercased.
///
/// `Order ID`, `OrderID` and `order_id` all normalize to `orderid`.
pub fn normalize_header(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_snake_case_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Static mapping from source headers to the destination schema
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    columns: Vec<ColumnSpec>,
}

impl ColumnMapping {
    /// Build and validate a mapping
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, LoadError> {
        let mapping = Self { columns };
        mapping.validate()?;
        Ok(mapping)
    }

    /// The sales-record export mapping
    pub fn sales_records() -> Self {
        Self {
            columns: SALES_RECORD_COLUMNS
                .iter()
                .map(|&(source, destination, sql_type)| {
                    ColumnSpec::new(source, destination, sql_type)
                })
                .collect(),
        }
    }

    /// Reject mappings that would drift the destination schema: no columns,
    /// destination names that are not lowercase snake_case, or two entries
    /// claiming the same source or destination column
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.columns.is_empty() {
            return Err(LoadError::Config(
                "column mapping must contain at least one column".to_string(),
            ));
        }

        let mut sources = HashSet::new();
        let mut destinations = HashSet::new();

        for col in &self.columns {
            if !is_snake_case_identifier(&col.destination) {
                return Err(LoadError::Config(format!(
                    "destination column '{}' is not a lowercase snake_case identifier",
                    col.destination
                )));
            }

            let normalized = normalize_header(&col.source);
            if normalized.is_empty() {
                return Err(LoadError::Config(format!(
                    "source column for '{}' has no letters or digits",
                    col.destination
                )));
            }
            if !sources.insert(normalized) {
                return Err(LoadError::Config(format!(
                    "duplicate source column '{}' in column mapping",
                    col.source
                )));
            }
            if !destinations.insert(col.destination.as_str()) {
                return Err(LoadError::Config(format!(
                    "duplicate destination column '{}' in column mapping",
                    col.destination
                )));
            }
        }

        Ok(())
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Destination schema implied by the mapping. Every column is nullable
    /// because any cell may be nulled by coercion.
    pub fn schema(&self) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.destination.clone(),
                    sql_type: c.sql_type,
                })
                .collect(),
        }
    }

    /// Resolve the mapping against a file's header row
    pub fn bind(&self, headers: &StringRecord) -> BoundMapping<'_> {
        let mut source_indices = vec![None; self.columns.len()];
        let mut dropped = Vec::new();

        for (idx, header) in headers.iter().enumerate() {
            let normalized = normalize_header(header);
            let slot = self
                .columns
                .iter()
                .position(|c| normalize_header(&c.source) == normalized)
                .filter(|&pos| source_indices[pos].is_none());

            match slot {
                Some(pos) => source_indices[pos] = Some(idx),
                None => dropped.push(header.to_string()),
            }
        }

        let missing = self
            .columns
            .iter()
            .zip(&source_indices)
            .filter(|(_, idx)| idx.is_none())
            .map(|(c, _)| c.source.clone())
            .collect();

        BoundMapping {
            mapping: self,
            source_indices,
            missing,
            dropped,
        }
    }
}

/// Per-batch record of cells that were nulled by coercion
#[derive(Debug, Default)]
pub struct CoercionReport {
    pub cells_nulled: u64,
    pub samples: Vec<CellCoercionWarning>,
}

impl CoercionReport {
    fn record(&mut self, warning: CellCoercionWarning) {
        debug!(%warning, "cell coercion failed");
        self.cells_nulled += 1;
        if self.samples.len() < MAX_WARNING_SAMPLES {
            self.samples.push(warning);
        }
    }
}

/// A mapping resolved against a concrete header: which source field feeds
/// each destination column
#[derive(Debug)]
pub struct BoundMapping<'m> {
    mapping: &'m ColumnMapping,
    source_indices: Vec<Option<usize>>,
    missing: Vec<String>,
    dropped: Vec<String>,
}

impl BoundMapping<'_> {
    /// Mapped source columns absent from the header; their cells load as NULL
    pub fn missing_columns(&self) -> &[String] {
        &self.missing
    }

    /// Header columns with no mapping entry; they are not loaded
    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }

    /// Rename and coerce a raw batch into destination rows.
    ///
    /// Never fails: a missing or uncoercible cell becomes NULL and only that
    /// cell is affected.
    pub fn transform(&self, raw: RawBatch) -> (Batch, CoercionReport) {
        let mut report = CoercionReport::default();
        let columns = self.mapping.columns();

        let rows = raw
            .records
            .iter()
            .enumerate()
            .map(|(offset, record)| {
                let row_number = raw.first_row + offset as u64;
                let values = columns
                    .iter()
                    .zip(&self.source_indices)
                    .map(|(col, idx)| {
                        let Some(cell) = idx.and_then(|i| record.get(i)) else {
                            return Value::null(col.sql_type);
                        };
                        coerce(cell, col.sql_type).unwrap_or_else(|| {
                            report.record(CellCoercionWarning {
                                row: row_number,
                                column: col.destination.clone(),
                                value: cell.to_string(),
                                target: col.sql_type,
                            });
                            Value::null(col.sql_type)
                        })
                    })
                    .collect();
                DestinationRow { values }
            })
            .collect();

        let batch = Batch {
            index: raw.index,
            first_row: raw.first_row,
            rows,
        };
        (batch, report)
    }
}

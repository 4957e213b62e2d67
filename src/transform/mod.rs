//! Rename and coerce raw source records into destination rows

pub mod coercion;
pub mod mapping;

pub use coercion::Value;
pub use mapping::{ColumnMapping, ColumnSpec};

/// A typed row in destination column order
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRow {
    pub values: Vec<Value>,
}

/// A bounded, ordered slice of destination rows committed as one unit
#[derive(Debug, Clone)]
pub struct Batch {
    /// Zero-based position of the batch in the file
    pub index: u64,
    /// 1-based data row number of the first row (header excluded)
    pub first_row: u64,
    pub rows: Vec<DestinationRow>,
}

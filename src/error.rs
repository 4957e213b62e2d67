//! Error kinds surfaced by the loader
//!
//! Cell-level coercion problems never appear here: they are absorbed by the
//! transform step (see `transform::coercion`) and only counted. Everything in
//! `LoadError` terminates the run.

use std::fmt;
use std::path::PathBuf;

/// Sub-step of schema initialization that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStep {
    DatabaseCreation,
    NamespaceCreation,
    TableCreation,
    TableVerification,
}

impl fmt::Display for SchemaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            SchemaStep::DatabaseCreation => "database creation",
            SchemaStep::NamespaceCreation => "namespace creation",
            SchemaStep::TableCreation => "table creation",
            SchemaStep::TableVerification => "table verification",
        };
        f.write_str(step)
    }
}

/// Location inside the source file, as reported by the CSV parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub byte: u64,
    pub line: u64,
    pub record: u64,
}

impl From<&csv::Position> for SourcePosition {
    fn from(pos: &csv::Position) -> Self {
        Self {
            byte: pos.byte(),
            line: pos.line(),
            record: pos.record(),
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}, byte {}, record {}",
            self.line, self.byte, self.record
        )
    }
}

fn at(position: &Option<SourcePosition>) -> String {
    position
        .map(|p| format!(" at {}", p))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection error: cannot connect to {target}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("schema error during {step}: {detail}")]
    Schema {
        step: SchemaStep,
        detail: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("source read error in '{}'{}: {detail}", .path.display(), at(.position))]
    SourceRead {
        path: PathBuf,
        position: Option<SourcePosition>,
        detail: String,
        #[source]
        source: Option<csv::Error>,
    },

    #[error(
        "batch write error: batch {batch_index} failed to commit after {rows_written} rows were written"
    )]
    BatchWrite {
        batch_index: u64,
        rows_written: u64,
        #[source]
        source: sqlx::Error,
    },
}

impl LoadError {
    pub(crate) fn schema(step: SchemaStep, source: sqlx::Error) -> Self {
        LoadError::Schema {
            step,
            detail: source.to_string(),
            source: Some(source),
        }
    }

    /// Wrap a CSV parser failure, keeping whatever position it knows about
    pub(crate) fn source_read(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        let position = source.position().map(SourcePosition::from);
        let detail = match source.kind() {
            csv::ErrorKind::Io(e) => format!("I/O failure: {}", e),
            csv::ErrorKind::Utf8 { .. } => "invalid UTF-8 in record".to_string(),
            _ => source.to_string(),
        };
        LoadError::SourceRead {
            path: path.into(),
            position,
            detail,
            source: Some(source),
        }
    }
}

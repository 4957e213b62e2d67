//! High-level runner API for the sales loader.
//!
//! This module wires configuration, the schema initializer, the chunked reader
//! and the loader together. It is the interface the CLI uses.

use derive_builder::Builder;
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::coordination::ChunkedLoader;
use crate::db::{BatchSink, DbConnection, SchemaInitializer};
use crate::formats::{ChunkedReader, DelimitedConfig};
use crate::telemetry::ProgressReporter;
use crate::transform::ColumnMapping;

pub use crate::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CSV_PATH, DatabaseConfig, DatabaseConfigBuilder, TableSpec,
};
pub use crate::coordination::LoadResult;
pub use crate::db::TableStatus;
pub use crate::error::{LoadError, SchemaStep, SourcePosition};

/// Arguments for a load run
#[derive(Debug, Clone, Builder)]
pub struct LoadArgs {
    #[builder(default)]
    pub database: DatabaseConfig,

    #[builder(setter(into), default = "PathBuf::from(DEFAULT_CSV_PATH)")]
    pub csv_path: PathBuf,

    /// Maximum rows per batch; must be positive
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    pub chunk_size: usize,

    #[builder(default)]
    pub table: TableSpec,

    /// Suppress the progress bar
    #[builder(default)]
    pub quiet: bool,
}

/// Load the sales CSV at `args.csv_path` into the destination table.
///
/// Configuration and the source header are checked before the database is
/// touched. The destination database and table are then created or verified,
/// and batches are appended in file order until the file is exhausted or the
/// first fatal error.
///
/// # Example
///
/// ```no_run
/// use sales_loader::runner::{LoadArgsBuilder, run_load};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = LoadArgsBuilder::default()
///     .csv_path("data/sales.csv")
///     .chunk_size(50_000)
///     .build()?;
///
/// let result = run_load(&args).await?;
/// println!("Loaded {} rows", result.rows_written);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: &LoadArgs) -> Result<LoadResult, LoadError> {
    let mapping = ColumnMapping::sales_records();
    mapping.validate()?;

    let reader = ChunkedReader::open(&args.csv_path, &DelimitedConfig::csv(), args.chunk_size)?;

    let (mut conn, _) = SchemaInitializer::connect_or_create(&args.database).await?;
    SchemaInitializer::new(&args.table, &mapping)
        .ensure_table(&mut conn)
        .await?;

    let result = load_into(&mut conn, reader, &args.table, &mapping, args.quiet).await;
    conn.close().await;
    result
}

/// Drive `reader` into `sink`; the table must already exist
pub(crate) async fn load_into<S: BatchSink, R: Read>(
    sink: &mut S,
    reader: ChunkedReader<R>,
    table: &TableSpec,
    mapping: &ColumnMapping,
    quiet: bool,
) -> Result<LoadResult, LoadError> {
    let progress = ProgressReporter::new(quiet, reader.source_size());
    ChunkedLoader::new(sink, table, mapping, progress)
        .run(reader)
        .await
}

/// Create the destination database and table if missing, and verify the table.
///
/// Safe to run any number of times.
pub async fn init_schema(
    config: &DatabaseConfig,
    table: &TableSpec,
) -> Result<TableStatus, LoadError> {
    let mapping = ColumnMapping::sales_records();
    mapping.validate()?;

    let (mut conn, created) = SchemaInitializer::connect_or_create(config).await?;
    if created {
        info!(database = %config.database, "initialized new database");
    }

    let status = SchemaInitializer::new(table, &mapping)
        .ensure_table(&mut conn)
        .await;
    conn.close().await;
    status
}

/// Whether the destination database accepts connections and answers a trivial query
pub async fn healthcheck(config: &DatabaseConfig) -> bool {
    let mut conn = match DbConnection::connect(config, &config.database).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "healthcheck failed");
            return false;
        }
    };

    let healthy = match conn.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(endpoint = %conn.target(), error = %e, "healthcheck query failed");
            false
        }
    };
    conn.close().await;
    healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_args_defaults() {
        let args = LoadArgsBuilder::default().build().unwrap();
        assert_eq!(args.csv_path, PathBuf::from("data/5m Sales Records.csv"));
        assert_eq!(args.chunk_size, 200_000);
        assert_eq!(args.table, TableSpec::new("public", "sales_records"));
        assert_eq!(args.database.database, "etl_db");
        assert!(!args.quiet);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_fails_before_connecting() {
        // Missing source and unreachable port: only the chunk size check
        // runs first and yields a config error.
        let database = DatabaseConfigBuilder::default()
            .port(1u16)
            .build()
            .unwrap();
        let args = LoadArgsBuilder::default()
            .database(database)
            .csv_path("/no/such/dir/sales.csv")
            .chunk_size(0usize)
            .build()
            .unwrap();

        let err = run_load(&args).await.unwrap_err();
        assert!(matches!(err, LoadError::Config(_)), "got: {err}");
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_connecting() {
        let database = DatabaseConfigBuilder::default()
            .port(1u16)
            .build()
            .unwrap();
        let args = LoadArgsBuilder::default()
            .database(database)
            .csv_path("/no/such/dir/sales.csv")
            .build()
            .unwrap();

        let err = run_load(&args).await.unwrap_err();
        assert!(matches!(err, LoadError::SourceRead { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn test_connect_tries_target_database_first() {
        let database = DatabaseConfigBuilder::default()
            .port(1u16)
            .database("sales_dw")
            .build()
            .unwrap();

        // Unreachable, not missing: no fallback to the maintenance database
        let err = init_schema(&database, &TableSpec::default())
            .await
            .unwrap_err();
        match err {
            LoadError::Connection { target, .. } => assert!(target.ends_with("/sales_dw"), "{target}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_healthcheck_unreachable_server() {
        let database = DatabaseConfigBuilder::default()
            .port(1u16)
            .build()
            .unwrap();
        assert!(!healthcheck(&database).await);
    }
}

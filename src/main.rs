use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use sales_loader::runner::{
    DEFAULT_CSV_PATH, DatabaseConfig, LoadArgs, TableSpec, TableStatus, healthcheck, init_schema,
    run_load,
};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(about = "Load a sales records CSV into PostgreSQL in fixed-size chunks")]
struct Args {
    /// Quiet mode - no progress bar, only warnings and the summary
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Create the database and the sales_records table if missing
    Initdb {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Load the CSV file into the sales_records table
    Run {
        #[command(flatten)]
        db: DbArgs,

        /// Path to the source CSV file
        #[arg(long, env = "CSV_PATH", default_value = DEFAULT_CSV_PATH)]
        csv: PathBuf,

        /// Rows per batch
        #[arg(long, env = "CHUNK_SIZE", default_value = "200000", value_parser = cli::parse_chunk_size)]
        chunk: usize,
    },
    /// Check that the database accepts connections
    Check {
        #[command(flatten)]
        db: DbArgs,
    },
}

#[derive(Clone, ClapArgs)]
struct DbArgs {
    /// Database host
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    host: String,

    /// Database port
    #[arg(long, env = "POSTGRES_PORT", default_value = "5432")]
    port: u16,

    /// Database name
    #[arg(long, env = "POSTGRES_DB", default_value = "etl_db")]
    database: String,

    /// Database user
    #[arg(long, env = "POSTGRES_USER", default_value = "etl_user")]
    user: String,

    /// Database password
    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "etl_password", hide_env_values = true)]
    password: String,
}

impl From<DbArgs> for DatabaseConfig {
    fn from(args: DbArgs) -> Self {
        DatabaseConfig {
            host: args.host,
            port: args.port,
            database: args.database,
            user: args.user,
            password: args.password,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet);

    match args.command {
        Command::Initdb { db } => run_initdb(db.into()).await,
        Command::Run { db, csv, chunk } => run_loader(db.into(), csv, chunk, args.quiet).await,
        Command::Check { db } => run_check(db.into()).await,
    }
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let default_filter = if quiet {
        "sales_loader=warn,sqlx=warn"
    } else {
        "sales_loader=info,sqlx=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_initdb(database: DatabaseConfig) -> anyhow::Result<()> {
    let table = TableSpec::default();
    let status = init_schema(&database, &table)
        .await
        .with_context(|| format!("initdb failed for {}", database.describe(&database.database)))?;

    match status {
        TableStatus::Created => println!("Created table {}", table),
        TableStatus::AlreadyPresent => println!("Table {} already initialized", table),
    }
    Ok(())
}

async fn run_loader(
    database: DatabaseConfig,
    csv_path: PathBuf,
    chunk_size: usize,
    quiet: bool,
) -> anyhow::Result<()> {
    if !quiet {
        println!("Sales Loader");
        println!("============");
        println!("Database: {}", database.describe(&database.database));
        println!("Source: {}", csv_path.display());
        println!("Chunk size: {}", chunk_size);
        println!();
    }

    let load_args = LoadArgs {
        database,
        csv_path,
        chunk_size,
        table: TableSpec::default(),
        quiet,
    };

    let result = run_load(&load_args)
        .await
        .with_context(|| format!("load of '{}' failed", load_args.csv_path.display()))?;

    println!();
    println!("Load Summary");
    println!("============");
    println!("Batches written: {}", result.batches_written);
    println!("Rows written: {}", result.rows_written);
    println!("Cells stored as NULL: {}", result.cells_nulled);
    println!("Duration: {:.2}s", result.duration.as_secs_f64());
    let secs = result.duration.as_secs_f64();
    if secs > 0.0 {
        println!("Throughput: {:.2} rows/sec", result.rows_written as f64 / secs);
    }
    if let (Some(p50), Some(p90), Some(p99)) = result.batch_time_percentiles {
        println!("Batch time p50/p90/p99: {}ms / {}ms / {}ms", p50, p90, p99);
    }

    Ok(())
}

async fn run_check(database: DatabaseConfig) -> anyhow::Result<()> {
    let target = database.describe(&database.database);
    if healthcheck(&database).await {
        println!("OK: {} is reachable", target);
        Ok(())
    } else {
        anyhow::bail!("{} is unreachable", target)
    }
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    /// Parse a chunk size; zero and non-numeric values are rejected
    pub fn parse_chunk_size(s: &str) -> Result<usize, String> {
        let value: usize = s
            .trim()
            .replace('_', "")
            .parse()
            .map_err(|e| format!("invalid chunk size '{}': {}", s, e))?;
        if value == 0 {
            return Err("chunk size must be a positive integer".to_string());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(cli::parse_chunk_size("200000"), Ok(200_000));
        assert_eq!(cli::parse_chunk_size("50_000"), Ok(50_000));
        assert_eq!(cli::parse_chunk_size(" 2 "), Ok(2));
        assert!(cli::parse_chunk_size("0").is_err());
        assert!(cli::parse_chunk_size("-5").is_err());
        assert!(cli::parse_chunk_size("lots").is_err());
    }

    #[test]
    fn test_run_overrides() {
        let args = Args::try_parse_from([
            "sales-loader",
            "--quiet",
            "run",
            "--csv",
            "/tmp/sales.csv",
            "--chunk",
            "10",
            "--host",
            "db.internal",
        ])
        .unwrap();

        assert!(args.quiet);
        match args.command {
            Command::Run { db, csv, chunk } => {
                assert_eq!(csv, PathBuf::from("/tmp/sales.csv"));
                assert_eq!(chunk, 10);
                assert_eq!(db.host, "db.internal");
                let config: DatabaseConfig = db.into();
                assert_eq!(config.host, "db.internal");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_zero_chunk_rejected_by_cli() {
        let result = Args::try_parse_from(["sales-loader", "run", "--chunk", "0"]);
        assert!(result.is_err());
    }
}

//! Single owned database connection with a test-only SQLite backend.
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::query_builder::QueryBuilder;
use sqlx::{ConnectOptions, Connection};
use tracing::debug;

use super::schema::quote_ident;
use crate::config::{CONNECT_TIMEOUT, DatabaseConfig, MAX_BIND_PARAMS, TableSpec};
use crate::error::LoadError;
use crate::transform::{Batch, ColumnSpec, DestinationRow, Value};

/// Destination the chunked loader appends batches to.
///
/// Implementations must commit a batch atomically: either every row of the
/// batch is durable when `append_batch` returns `Ok`, or none is.
#[async_trait]
pub trait BatchSink: Send {
    /// Append all rows of `batch` to `table`, returning the number of rows written
    async fn append_batch(
        &mut self,
        table: &TableSpec,
        columns: &[ColumnSpec],
        batch: &Batch,
    ) -> Result<u64, sqlx::Error>;
}

/// Inner connection variants
enum ConnectionInner {
    Postgres(PgConnection),
    #[cfg(test)]
    Sqlite(sqlx::SqliteConnection),
}

/// The run's exclusively owned database connection
pub struct DbConnection {
    inner: ConnectionInner,
    target: String,
}

impl DbConnection {
    /// Connect to `database` on the server described by `config`
    pub async fn connect(config: &DatabaseConfig, database: &str) -> Result<Self, LoadError> {
        let target = config.describe(database);
        let connect_options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(database);

        let conn = tokio::time::timeout(CONNECT_TIMEOUT, connect_options.connect())
            .await
            // Surface a connect timeout as a sqlx error so callers see one error type
            .map_err(|_| sqlx::Error::PoolTimedOut)
            .and_then(|result| result)
            .map_err(|source| LoadError::Connection {
                target: target.clone(),
                source,
            })?;

        debug!(endpoint = %target, "connected");

        Ok(Self {
            inner: ConnectionInner::Postgres(conn),
            target,
        })
    }

    /// Create an in-memory SQLite connection for testing
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let conn = sqlx::SqliteConnection::connect("sqlite::memory:").await?;
        Ok(Self {
            inner: ConnectionInner::Sqlite(conn),
            target: "sqlite::memory:".to_string(),
        })
    }

    /// Raw SQLite handle for assertions in tests
    #[cfg(test)]
    pub fn as_sqlite(&mut self) -> Option<&mut sqlx::SqliteConnection> {
        match &mut self.inner {
            ConnectionInner::Sqlite(conn) => Some(conn),
            ConnectionInner::Postgres(_) => None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Check if this connection is using PostgreSQL (returns false for SQLite)
    pub fn is_postgres(&self) -> bool {
        matches!(&self.inner, ConnectionInner::Postgres(_))
    }

    /// Quoted table name; SQLite has no namespaces so only the name is used
    pub fn qualified_table_name(&self, table: &TableSpec) -> String {
        match &self.inner {
            ConnectionInner::Postgres(_) => format!(
                "{}.{}",
                quote_ident(&table.namespace),
                quote_ident(&table.name)
            ),
            #[cfg(test)]
            ConnectionInner::Sqlite(_) => quote_ident(&table.name),
        }
    }

    /// Execute a DDL statement with the simple query protocol, outside any
    /// explicit transaction
    pub async fn execute_ddl(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        debug!(sql, "executing DDL");
        match &mut self.inner {
            ConnectionInner::Postgres(conn) => {
                sqlx::raw_sql(sql).execute(&mut *conn).await?;
            }
            #[cfg(test)]
            ConnectionInner::Sqlite(conn) => {
                sqlx::raw_sql(sql).execute(&mut *conn).await?;
            }
        }
        Ok(())
    }

    /// Whether a database with this name exists on the server
    pub async fn database_exists(&mut self, database: &str) -> Result<bool, sqlx::Error> {
        match &mut self.inner {
            ConnectionInner::Postgres(conn) => {
                let row: Option<(i32,)> =
                    sqlx::query_as("SELECT 1 FROM pg_database WHERE datname = $1")
                        .bind(database)
                        .fetch_optional(&mut *conn)
                        .await?;
                Ok(row.is_some())
            }
            // An open SQLite connection is its own database
            #[cfg(test)]
            ConnectionInner::Sqlite(_) => Ok(true),
        }
    }

    /// Column names of `table` in ordinal order; empty if the table does not exist
    pub async fn table_columns(&mut self, table: &TableSpec) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = match &mut self.inner {
            ConnectionInner::Postgres(conn) => {
                let query = r#"
                    SELECT column_name::text
                    FROM information_schema.columns
                    WHERE table_schema = $1 AND table_name = $2
                    ORDER BY ordinal_position
                "#;
                sqlx::query_as(query)
                    .bind(&table.namespace)
                    .bind(&table.name)
                    .fetch_all(&mut *conn)
                    .await?
            }
            #[cfg(test)]
            ConnectionInner::Sqlite(conn) => {
                sqlx::query_as("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
                    .bind(&table.name)
                    .fetch_all(&mut *conn)
                    .await?
            }
        };

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Round-trip a trivial statement to confirm the connection is usable
    pub async fn ping(&mut self) -> Result<(), sqlx::Error> {
        match &mut self.inner {
            ConnectionInner::Postgres(conn) => conn.ping().await,
            #[cfg(test)]
            ConnectionInner::Sqlite(conn) => conn.ping().await,
        }
    }

    /// Close the connection gracefully; errors while closing are only logged
    pub async fn close(self) {
        let result = match self.inner {
            ConnectionInner::Postgres(conn) => conn.close().await,
            #[cfg(test)]
            ConnectionInner::Sqlite(conn) => conn.close().await,
        };
        if let Err(e) = result {
            debug!(endpoint = %self.target, error = %e, "error while closing connection");
        }
    }
}

#[async_trait]
impl BatchSink for DbConnection {
    /// Bulk insert inside one transaction per batch.
    ///
    /// The batch is split into multi-row INSERT statements of at most
    /// `MAX_BIND_PARAMS` parameters each; all of them commit together.
    async fn append_batch(
        &mut self,
        table: &TableSpec,
        columns: &[ColumnSpec],
        batch: &Batch,
    ) -> Result<u64, sqlx::Error> {
        if batch.rows.is_empty() {
            return Ok(0);
        }

        let column_list: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(&c.destination))
            .collect();
        let insert_head = format!(
            "INSERT INTO {} ({}) ",
            self.qualified_table_name(table),
            column_list.join(", ")
        );
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);

        match &mut self.inner {
            ConnectionInner::Postgres(conn) => {
                let mut tx = conn.begin().await?;
                for rows in batch.rows.chunks(rows_per_statement) {
                    let mut builder = insert_builder::<sqlx::Postgres>(&insert_head, rows);
                    builder.build().execute(&mut *tx).await?;
                }
                tx.commit().await?;
            }
            #[cfg(test)]
            ConnectionInner::Sqlite(conn) => {
                let mut tx = conn.begin().await?;
                for rows in batch.rows.chunks(rows_per_statement) {
                    let mut builder = insert_builder::<sqlx::Sqlite>(&insert_head, rows);
                    builder.build().execute(&mut *tx).await?;
                }
                tx.commit().await?;
            }
        }

        Ok(batch.rows.len() as u64)
    }
}

/// Build `INSERT INTO ... VALUES (...), (...)` with every cell bound as a typed
/// parameter; NULL cells bind as typed NULLs
fn insert_builder<'args, DB>(insert_head: &str, rows: &[DestinationRow]) -> QueryBuilder<'args, DB>
where
    DB: sqlx::Database,
    <DB as sqlx::Database>::Arguments<'args>: Default,
    Option<i64>: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    Option<f64>: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    Option<NaiveDate>: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
    Option<String>: sqlx::Encode<'args, DB> + sqlx::Type<DB>,
{
    let mut builder = QueryBuilder::new(insert_head);
    builder.push_values(rows, |mut tuple, row| {
        for value in &row.values {
            match value {
                Value::Integer(v) => tuple.push_bind(*v),
                Value::Numeric(v) => tuple.push_bind(*v),
                Value::Date(v) => tuple.push_bind(*v),
                Value::Text(v) => tuple.push_bind(v.clone()),
            };
        }
    });
    builder
}

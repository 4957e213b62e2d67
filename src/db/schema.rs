use tracing::{info, warn};

use super::connection::DbConnection;
use crate::config::{ADMIN_DATABASE, DEFAULT_NAMESPACE, DatabaseConfig, TableSpec};
use crate::error::{LoadError, SchemaStep};
use crate::transform::ColumnMapping;

/// SQL data type of a destination column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    /// Fixed-point decimal with total digits and digits after the point
    Numeric {
        precision: u8,
        scale: u8,
    },
    Text,
    Date,
}

impl SqlType {
    /// Returns the Postgres type name
    pub fn to_postgres(self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Numeric { precision, scale } => format!("NUMERIC({},{})", precision, scale),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Date => "DATE".to_string(),
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_postgres())
    }
}

/// A column in a schema
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
}

/// A database schema (collection of columns)
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

/// Outcome of `SchemaInitializer::ensure_table`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    AlreadyPresent,
}

/// Quote an identifier for use in SQL text
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Generate an idempotent DDL statement for creating a table.
///
/// Every column is nullable, since any cell may be nulled by coercion.
/// `table_spec` must already be quoted (see `DbConnection::qualified_table_name`).
pub fn generate_ddl(table_spec: &str, schema: &Schema) -> String {
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", table_spec);

    let column_defs: Vec<String> = schema
        .columns
        .iter()
        .map(|col| format!("  {} {}", quote_ident(&col.name), col.sql_type.to_postgres()))
        .collect();

    ddl.push_str(&column_defs.join(",\n"));
    ddl.push_str("\n)");

    ddl
}

/// Makes sure the destination database and table exist before a load.
///
/// Both steps are idempotent: against an initialized target they only verify.
pub struct SchemaInitializer<'a> {
    table: &'a TableSpec,
    schema: Schema,
}

impl<'a> SchemaInitializer<'a> {
    pub fn new(table: &'a TableSpec, mapping: &ColumnMapping) -> Self {
        Self {
            table,
            schema: mapping.schema(),
        }
    }

    /// Connect to `config.database`, creating it first if the server reports
    /// that it does not exist.
    ///
    /// The maintenance database is only contacted in that case, so users
    /// without access to it can load into an existing database. Returns the
    /// connection and whether the database was created by this call.
    pub async fn connect_or_create(
        config: &DatabaseConfig,
    ) -> Result<(DbConnection, bool), LoadError> {
        match DbConnection::connect(config, &config.database).await {
            Ok(conn) => Ok((conn, false)),
            Err(e) if is_missing_database(&e) => {
                info!(database = %config.database, "database does not exist, creating it");
                let created = Self::ensure_database_exists(config).await?;
                let conn = DbConnection::connect(config, &config.database).await?;
                Ok((conn, created))
            }
            Err(e) => Err(e),
        }
    }

    /// Create `config.database` if it is missing.
    ///
    /// Connects to the maintenance database with the same credentials, since
    /// the target cannot be connected to before it exists. Returns whether the
    /// database was created by this call.
    pub async fn ensure_database_exists(config: &DatabaseConfig) -> Result<bool, LoadError> {
        let mut admin = DbConnection::connect(config, ADMIN_DATABASE).await?;

        let exists = admin
            .database_exists(&config.database)
            .await
            .map_err(|e| LoadError::schema(SchemaStep::DatabaseCreation, e))?;

        let created = if exists {
            info!(database = %config.database, "database already exists");
            false
        } else {
            // CREATE DATABASE cannot run inside a transaction block; execute_ddl
            // uses the simple query protocol without an explicit transaction.
            let ddl = format!("CREATE DATABASE {}", quote_ident(&config.database));
            match admin.execute_ddl(&ddl).await {
                Ok(()) => {
                    info!(database = %config.database, "database created");
                    true
                }
                Err(e) if is_duplicate_database(&e) => {
                    info!(database = %config.database, "database was created concurrently");
                    false
                }
                Err(e) => return Err(LoadError::schema(SchemaStep::DatabaseCreation, e)),
            }
        };

        admin.close().await;
        Ok(created)
    }

    /// Create the destination table if missing, then verify its columns
    pub async fn ensure_table(&self, conn: &mut DbConnection) -> Result<TableStatus, LoadError> {
        let existing = conn
            .table_columns(self.table)
            .await
            .map_err(|e| LoadError::schema(SchemaStep::TableVerification, e))?;

        let status = if existing.is_empty() {
            if conn.is_postgres() && self.table.namespace != DEFAULT_NAMESPACE {
                let ddl = format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    quote_ident(&self.table.namespace)
                );
                conn.execute_ddl(&ddl)
                    .await
                    .map_err(|e| LoadError::schema(SchemaStep::NamespaceCreation, e))?;
            }

            let ddl = generate_ddl(&conn.qualified_table_name(self.table), &self.schema);
            conn.execute_ddl(&ddl)
                .await
                .map_err(|e| LoadError::schema(SchemaStep::TableCreation, e))?;

            info!(
                table = %self.table,
                columns = self.schema.columns.len(),
                "table created"
            );
            TableStatus::Created
        } else {
            info!(table = %self.table, "table already exists, verifying columns");
            TableStatus::AlreadyPresent
        };

        self.verify(conn).await?;
        Ok(status)
    }

    /// Every mapped column must be present; extra columns are tolerated because
    /// inserts always name their columns explicitly.
    async fn verify(&self, conn: &mut DbConnection) -> Result<(), LoadError> {
        let actual = conn
            .table_columns(self.table)
            .await
            .map_err(|e| LoadError::schema(SchemaStep::TableVerification, e))?;

        let missing: Vec<&str> = self
            .schema
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !actual.iter().any(|a| a == name))
            .collect();

        if !missing.is_empty() {
            return Err(LoadError::Schema {
                step: SchemaStep::TableVerification,
                detail: format!(
                    "table {} is missing column(s): {}",
                    self.table,
                    missing.join(", ")
                ),
                source: None,
            });
        }

        let extra = actual.len().saturating_sub(self.schema.columns.len());
        if extra > 0 {
            warn!(
                table = %self.table,
                extra,
                "table has columns the loader does not populate"
            );
        }

        Ok(())
    }
}

/// SQLSTATE 3D000 (`invalid_catalog_name`): the target database does not exist
fn is_missing_database(error: &LoadError) -> bool {
    match error {
        LoadError::Connection { source, .. } => source
            .as_database_error()
            .and_then(|e| e.code())
            .is_some_and(|code| code == "3D000"),
        _ => false,
    }
}

fn is_duplicate_database(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "42P04")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_type_names() {
        assert_eq!(SqlType::Integer.to_postgres(), "INTEGER");
        assert_eq!(SqlType::BigInt.to_postgres(), "BIGINT");
        assert_eq!(
            SqlType::Numeric {
                precision: 12,
                scale: 2
            }
            .to_postgres(),
            "NUMERIC(12,2)"
        );
        assert_eq!(SqlType::Date.to_string(), "DATE");
    }

    #[test]
    fn test_generate_ddl() {
        let schema = Schema {
            columns: vec![
                Column {
                    name: "order_id".to_string(),
                    sql_type: SqlType::BigInt,
                },
                Column {
                    name: "region".to_string(),
                    sql_type: SqlType::Text,
                },
                Column {
                    name: "unit_price".to_string(),
                    sql_type: SqlType::Numeric {
                        precision: 12,
                        scale: 2,
                    },
                },
            ],
        };

        let ddl = generate_ddl("\"public\".\"sales_records\"", &schema);

        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"sales_records\" ("));
        assert!(ddl.contains("\"order_id\" BIGINT,"));
        assert!(ddl.contains("\"region\" TEXT,"));
        assert!(!ddl.contains("NOT NULL"));
        assert!(ddl.contains("\"unit_price\" NUMERIC(12,2)"));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("sales"), "\"sales\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_only_missing_database_triggers_creation() {
        let unreachable = LoadError::Connection {
            target: "postgres://etl_user@localhost:1/etl_db".to_string(),
            source: sqlx::Error::PoolTimedOut,
        };
        assert!(!is_missing_database(&unreachable));
        assert!(!is_missing_database(&LoadError::Config("bad".to_string())));
    }
}

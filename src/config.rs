//! Configuration for the sales loader
//!
//! This module centralizes the tunable constants and the explicit configuration
//! structs that are handed to both the schema initializer and the chunked loader.

use derive_builder::Builder;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Connection Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maintenance database used to check for and create the target database
pub const ADMIN_DATABASE: &str = "postgres";

pub const DEFAULT_HOST: &str = "localhost";

pub const DEFAULT_PORT: u16 = 5432;

pub const DEFAULT_DATABASE: &str = "etl_db";

pub const DEFAULT_USER: &str = "etl_user";

pub const DEFAULT_PASSWORD: &str = "etl_password";

// ============================================================================
// Destination Configuration
// ============================================================================

pub const DEFAULT_NAMESPACE: &str = "public";

pub const DEFAULT_TABLE: &str = "sales_records";

/// Upper bound on bind parameters in a single INSERT statement
///
/// PostgreSQL accepts 65535 parameters per statement and SQLite 32766 since
/// 3.32. The lower of the two keeps one code path valid for both engines; a
/// batch is split into as many statements as this limit requires.
pub const MAX_BIND_PARAMS: usize = 32_766;

// ============================================================================
// Source Configuration
// ============================================================================

pub const DEFAULT_CSV_PATH: &str = "data/5m Sales Records.csv";

/// Rows per batch
///
/// 200k rows of the sales export is roughly 25 MB of text, which keeps a
/// single resident batch comfortably small while amortizing the per-batch
/// transaction overhead.
pub const DEFAULT_CHUNK_SIZE: usize = 200_000;

/// Connection parameters for the destination database
#[derive(Clone, Builder)]
pub struct DatabaseConfig {
    #[builder(setter(into), default = "DEFAULT_HOST.to_string()")]
    pub host: String,
    #[builder(default = "DEFAULT_PORT")]
    pub port: u16,
    #[builder(setter(into), default = "DEFAULT_DATABASE.to_string()")]
    pub database: String,
    #[builder(setter(into), default = "DEFAULT_USER.to_string()")]
    pub user: String,
    #[builder(setter(into), default = "DEFAULT_PASSWORD.to_string()")]
    pub password: String,
}

impl DatabaseConfig {
    /// Human-readable connection target, never includes the password
    pub fn describe(&self, database: &str) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, database
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Destination table identifier: namespace (PostgreSQL schema) plus table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub namespace: String,
    pub name: String,
}

impl TableSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Default for TableSpec {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, DEFAULT_TABLE)
    }
}

impl fmt::Display for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

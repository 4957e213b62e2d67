//! Database layer - the owned connection, batch sink, and schema initialization

pub mod connection;
pub mod schema;

pub use connection::{BatchSink, DbConnection};
pub use schema::{SchemaInitializer, TableStatus};

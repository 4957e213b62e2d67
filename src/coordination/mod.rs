//! Sequential orchestration of the chunked load

pub mod loader;

pub use loader::{ChunkedLoader, LoadResult};

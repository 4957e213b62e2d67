//! Source file readers

pub mod delimited;
pub mod reader;

pub use delimited::ChunkedReader;
pub use reader::{DelimitedConfig, RawBatch};

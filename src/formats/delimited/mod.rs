//! Chunked reading of comma-separated (and similar) text files

pub mod reader;

pub use reader::ChunkedReader;

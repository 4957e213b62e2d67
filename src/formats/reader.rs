use csv::StringRecord;

/// Configuration for delimited file reading
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    /// CSV reader builder for this dialect.
    ///
    /// The first line is always a header. `flexible` lets short rows through
    /// so their missing cells can load as NULL; long rows are rejected by the
    /// chunked reader itself.
    pub(crate) fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(true)
            .flexible(true);
        builder
    }
}

/// A contiguous run of source records read as one unit, before transformation
#[derive(Debug, Clone)]
pub struct RawBatch {
    /// Zero-based position of the batch in the file
    pub index: u64,
    /// 1-based data row number of the first record (header excluded)
    pub first_row: u64,
    /// Byte offset in the source just past the last record
    pub end_byte: u64,
    pub records: Vec<StringRecord>,
}

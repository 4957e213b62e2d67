use csv::StringRecord;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{LoadError, SourcePosition};
use crate::formats::reader::{DelimitedConfig, RawBatch};

/// Preallocation cap for a batch's record buffer; large chunk sizes grow past
/// it on demand
const MAX_INITIAL_CAPACITY: usize = 65_536;

/// Lazy, forward-only sequence of raw batches over a delimited file.
///
/// Yields `Ok(RawBatch)` of at most `chunk_size` records each, in file order.
/// Only the last batch may be short; a file with a header and no data rows
/// yields nothing. After an error the sequence ends. It cannot be restarted
/// without opening the file again.
pub struct ChunkedReader<R: Read> {
    path: PathBuf,
    reader: csv::Reader<R>,
    headers: StringRecord,
    chunk_size: usize,
    source_size: Option<u64>,
    next_index: u64,
    rows_read: u64,
    finished: bool,
}

impl ChunkedReader<BufReader<File>> {
    /// Open `path` and read its header row.
    ///
    /// The chunk size is checked before the file is touched.
    pub fn open(
        path: impl AsRef<Path>,
        config: &DelimitedConfig,
        chunk_size: usize,
    ) -> Result<Self, LoadError> {
        check_chunk_size(chunk_size)?;
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| LoadError::source_read(path, e.into()))?;
        let source_size = file.metadata().ok().map(|m| m.len());

        let mut reader = Self::from_reader(path, BufReader::new(file), config, chunk_size)?;
        reader.source_size = source_size;
        Ok(reader)
    }
}

impl<R: Read> ChunkedReader<R> {
    /// Wrap any byte source; `path` is only used in error messages
    pub fn from_reader(
        path: impl Into<PathBuf>,
        source: R,
        config: &DelimitedConfig,
        chunk_size: usize,
    ) -> Result<Self, LoadError> {
        check_chunk_size(chunk_size)?;
        let path = path.into();

        let mut reader = config.reader_builder().from_reader(source);
        let headers = reader
            .headers()
            .map_err(|e| LoadError::source_read(&path, e))?
            .clone();

        Ok(Self {
            path,
            reader,
            headers,
            chunk_size,
            source_size: None,
            next_index: 0,
            rows_read: 0,
            finished: false,
        })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Total size of the underlying file, when known
    pub fn source_size(&self) -> Option<u64> {
        self.source_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_batch(&mut self) -> Result<Option<RawBatch>, LoadError> {
        let mut records = Vec::with_capacity(self.chunk_size.min(MAX_INITIAL_CAPACITY));

        while records.len() < self.chunk_size {
            let mut record = StringRecord::new();
            match self.reader.read_record(&mut record) {
                Ok(true) => {
                    if record.len() > self.headers.len() {
                        return Err(LoadError::SourceRead {
                            path: self.path.clone(),
                            position: record.position().map(SourcePosition::from),
                            detail: format!(
                                "malformed row: found {} fields, header has {}",
                                record.len(),
                                self.headers.len()
                            ),
                            source: None,
                        });
                    }
                    records.push(record);
                }
                Ok(false) => break,
                Err(e) => return Err(LoadError::source_read(&self.path, e)),
            }
        }

        if records.is_empty() {
            return Ok(None);
        }

        let batch = RawBatch {
            index: self.next_index,
            first_row: self.rows_read + 1,
            end_byte: self.reader.position().byte(),
            records,
        };
        self.next_index += 1;
        self.rows_read += batch.records.len() as u64;

        Ok(Some(batch))
    }
}

fn check_chunk_size(chunk_size: usize) -> Result<(), LoadError> {
    if chunk_size == 0 {
        return Err(LoadError::Config(
            "chunk size must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = Result<RawBatch, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn reader_over(content: &str, chunk_size: usize) -> ChunkedReader<&[u8]> {
        ChunkedReader::from_reader(
            "test.csv",
            content.as_bytes(),
            &DelimitedConfig::csv(),
            chunk_size,
        )
        .unwrap()
    }

    fn csv_with_rows(rows: usize) -> String {
        let mut content = String::from("id,name\n");
        for i in 0..rows {
            content.push_str(&format!("{},name_{}\n", i, i));
        }
        content
    }

    #[test]
    fn test_batch_sizes_for_every_chunk_size() {
        // ceil(R/N) batches, all full except possibly the last
        for rows in [0usize, 1, 7, 10, 23] {
            let content = csv_with_rows(rows);
            for chunk_size in 1..=12 {
                let sizes: Vec<usize> = reader_over(&content, chunk_size)
                    .map(|b| b.unwrap().records.len())
                    .collect();

                assert_eq!(sizes.len(), rows.div_ceil(chunk_size), "R={rows} N={chunk_size}");
                assert_eq!(sizes.iter().sum::<usize>(), rows);
                if let Some((last, full)) = sizes.split_last() {
                    assert!(full.iter().all(|&s| s == chunk_size));
                    let expected_last = if rows % chunk_size == 0 {
                        chunk_size
                    } else {
                        rows % chunk_size
                    };
                    assert_eq!(*last, expected_last);
                }
            }
        }
    }

    #[test]
    fn test_batches_preserve_order_and_numbering() {
        let batches: Vec<RawBatch> = reader_over(&csv_with_rows(5), 2)
            .map(|b| b.unwrap())
            .collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            batches.iter().map(|b| b.first_row).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        let ids: Vec<&str> = batches
            .iter()
            .flat_map(|b| b.records.iter().map(|r| r.get(0).unwrap()))
            .collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert!(batches[0].end_byte < batches[2].end_byte);
    }

    #[test]
    fn test_chunk_larger_than_file_yields_one_batch() {
        let batches: Vec<_> = reader_over(&csv_with_rows(3), 1000).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].as_ref().unwrap().records.len(), 3);
    }

    #[test]
    fn test_header_only_and_empty_file_yield_nothing() {
        assert_eq!(reader_over("id,name\n", 10).count(), 0);
        assert_eq!(reader_over("", 10).count(), 0);
    }

    #[test]
    fn test_quoted_fields() {
        let content = "id,name\n1,\"Doe, Jane\"\n2,\"say \"\"hi\"\"\"\n";
        let batch = reader_over(content, 10).next().unwrap().unwrap();
        assert_eq!(batch.records[0].get(1), Some("Doe, Jane"));
        assert_eq!(batch.records[1].get(1), Some("say \"hi\""));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = ChunkedReader::from_reader(
            "test.csv",
            "id\n1\n".as_bytes(),
            &DelimitedConfig::csv(),
            0,
        );
        assert!(matches!(result, Err(LoadError::Config(_))));
    }

    #[test]
    fn test_zero_chunk_size_rejected_before_opening_file() {
        let result = ChunkedReader::open("/definitely/not/here.csv", &DelimitedConfig::csv(), 0);
        assert!(matches!(result, Err(LoadError::Config(_))));
    }

    #[test]
    fn test_long_row_is_fatal_with_position() {
        let content = "id,name\n1,a\n2,b,extra\n3,c\n";
        let mut reader = reader_over(content, 10);

        let err = reader.next().unwrap().unwrap_err();
        match err {
            LoadError::SourceRead {
                position, detail, ..
            } => {
                assert_eq!(position.unwrap().line, 3);
                assert!(detail.contains("found 3 fields"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(reader.next().is_none(), "sequence ends after an error");
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let mut content = b"id,name\n1,".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);
        content.push(b'\n');

        let mut reader = ChunkedReader::from_reader(
            "bad.csv",
            content.as_slice(),
            &DelimitedConfig::csv(),
            10,
        )
        .unwrap();

        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, LoadError::SourceRead { .. }));
        assert!(err.to_string().contains("bad.csv"));
    }

    #[test]
    fn test_open_missing_file() {
        let result = ChunkedReader::open("/definitely/not/here.csv", &DelimitedConfig::csv(), 10);
        match result {
            Err(LoadError::SourceRead { path, .. }) => {
                assert_eq!(path, PathBuf::from("/definitely/not/here.csv"));
            }
            _ => panic!("expected a source read error"),
        }
    }

    #[test]
    fn test_open_reports_source_size() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "id,name").unwrap();
        writeln!(temp_file, "1,Alice").unwrap();
        temp_file.flush().unwrap();

        let reader = ChunkedReader::open(temp_file.path(), &DelimitedConfig::csv(), 10).unwrap();
        assert_eq!(reader.source_size(), Some(16));
        assert_eq!(reader.headers().len(), 2);
    }
}

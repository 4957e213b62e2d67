use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::TableSpec;
use crate::db::BatchSink;
use crate::error::LoadError;
use crate::formats::ChunkedReader;
use crate::telemetry::{ProgressReporter, ProgressStats, TelemetryEvent};
use crate::transform::ColumnMapping;

/// Result of a completed load
#[derive(Debug)]
pub struct LoadResult {
    pub batches_written: u64,
    pub rows_written: u64,
    /// Cells stored as NULL because their text did not fit the column type
    pub cells_nulled: u64,
    pub duration: Duration,
    /// p50/p90/p99 of per-batch read+transform+commit time in milliseconds
    pub batch_time_percentiles: (Option<u64>, Option<u64>, Option<u64>),
}

/// Drives batches from a `ChunkedReader` through the column mapping into a sink.
///
/// Strictly sequential: each batch is read, transformed and committed before
/// the next one is read, so at most one batch is resident.
pub struct ChunkedLoader<'a, S: BatchSink> {
    sink: &'a mut S,
    table: &'a TableSpec,
    mapping: &'a ColumnMapping,
    progress: ProgressReporter,
}

impl<'a, S: BatchSink> ChunkedLoader<'a, S> {
    pub fn new(
        sink: &'a mut S,
        table: &'a TableSpec,
        mapping: &'a ColumnMapping,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            sink,
            table,
            mapping,
            progress,
        }
    }

    /// Consume `reader` to the end, appending every batch in order.
    ///
    /// The first failed commit ends the run with `LoadError::BatchWrite`
    /// carrying the zero-based batch index and the rows committed before it;
    /// earlier batches stay committed.
    pub async fn run<R: Read>(self, reader: ChunkedReader<R>) -> Result<LoadResult, LoadError> {
        let start_time = Instant::now();

        let bound = self.mapping.bind(reader.headers());
        if !bound.missing_columns().is_empty() {
            warn!(
                missing = ?bound.missing_columns(),
                "mapped columns absent from source header will load as NULL"
            );
        }
        if !bound.dropped_columns().is_empty() {
            info!(
                dropped = ?bound.dropped_columns(),
                "unmapped source columns will not be loaded"
            );
        }

        info!(
            source = %reader.path().display(),
            table = %self.table,
            "starting load"
        );

        let mut stats = ProgressStats::new();

        for raw in reader {
            let raw = raw?;
            let batch_start = Instant::now();
            let end_byte = raw.end_byte;

            let (batch, report) = bound.transform(raw);
            let rows = batch.rows.len() as u64;

            if report.cells_nulled > 0 {
                let first = report
                    .samples
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                warn!(
                    batch_index = batch.index,
                    cells_nulled = report.cells_nulled,
                    first,
                    "uncoercible cells stored as NULL"
                );
            }

            if let Err(source) = self
                .sink
                .append_batch(self.table, self.mapping.columns(), &batch)
                .await
            {
                let event = TelemetryEvent::BatchFailed {
                    batch_index: batch.index,
                };
                stats.update(&event);
                self.progress.update(&event, &stats);
                error!(
                    batch_index = batch.index,
                    first_row = batch.first_row,
                    rows_written = stats.rows_written,
                    error = %source,
                    "batch failed to commit"
                );
                return Err(LoadError::BatchWrite {
                    batch_index: batch.index,
                    rows_written: stats.rows_written,
                    source,
                });
            }

            let event = TelemetryEvent::BatchCommitted {
                batch_index: batch.index,
                rows,
                cells_nulled: report.cells_nulled,
                end_byte,
                duration_ms: batch_start.elapsed().as_millis() as u64,
            };
            stats.update(&event);
            self.progress.update(&event, &stats);

            info!(
                batch_index = batch.index,
                rows,
                total_rows = stats.rows_written,
                "batch committed"
            );
        }

        self.progress.finish(&stats);
        let duration = start_time.elapsed();

        info!(
            batches = stats.batches_committed,
            rows = stats.rows_written,
            cells_nulled = stats.cells_nulled,
            "Load complete in {:.2}s",
            duration.as_secs_f64()
        );

        Ok(LoadResult {
            batches_written: stats.batches_committed,
            rows_written: stats.rows_written,
            cells_nulled: stats.cells_nulled,
            duration,
            batch_time_percentiles: stats.get_percentiles(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::SqlType;
    use crate::formats::DelimitedConfig;
    use crate::transform::{Batch, ColumnSpec, Value};
    use async_trait::async_trait;

    /// Records every batch it receives; optionally fails on one batch index
    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<Batch>,
        fail_at: Option<u64>,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn append_batch(
            &mut self,
            _table: &TableSpec,
            _columns: &[ColumnSpec],
            batch: &Batch,
        ) -> Result<u64, sqlx::Error> {
            if self.fail_at == Some(batch.index) {
                return Err(sqlx::Error::Protocol("connection dropped".to_string()));
            }
            self.batches.push(batch.clone());
            Ok(batch.rows.len() as u64)
        }
    }

    fn scenario_mapping() -> ColumnMapping {
        ColumnMapping::new(vec![
            ColumnSpec::new("OrderID", "order_id", SqlType::BigInt),
            ColumnSpec::new("Region", "region", SqlType::Text),
            ColumnSpec::new("UnitsSold", "units_sold", SqlType::Integer),
        ])
        .unwrap()
    }

    fn reader(content: &'static str, chunk_size: usize) -> ChunkedReader<&'static [u8]> {
        ChunkedReader::from_reader(
            "scenario.csv",
            content.as_bytes(),
            &DelimitedConfig::csv(),
            chunk_size,
        )
        .unwrap()
    }

    async fn load(
        sink: &mut RecordingSink,
        content: &'static str,
        chunk_size: usize,
    ) -> Result<LoadResult, LoadError> {
        let table = TableSpec::default();
        let mapping = scenario_mapping();
        ChunkedLoader::new(sink, &table, &mapping, ProgressReporter::new(true, None))
            .run(reader(content, chunk_size))
            .await
    }

    const SCENARIO: &str = "OrderID,Region,UnitsSold\n1,Asia,10\n2,Europe,abc\n3,Africa,30\n";

    #[tokio::test]
    async fn test_scenario_chunk_two() {
        let mut sink = RecordingSink::default();
        let result = load(&mut sink, SCENARIO, 2).await.unwrap();

        assert_eq!(result.rows_written, 3);
        assert_eq!(result.batches_written, 2);
        assert_eq!(result.cells_nulled, 1);

        assert_eq!(sink.batches.len(), 2);
        assert_eq!(sink.batches[0].rows.len(), 2);
        assert_eq!(sink.batches[0].rows[1].values[2], Value::Integer(None));
        assert_eq!(
            sink.batches[0].rows[1].values[1],
            Value::Text(Some("Europe".to_string()))
        );
        assert_eq!(sink.batches[1].rows.len(), 1);
        assert_eq!(sink.batches[1].rows[0].values[0], Value::Integer(Some(3)));
    }

    #[tokio::test]
    async fn test_header_only_file_is_success_with_zero_rows() {
        let mut sink = RecordingSink::default();
        let result = load(&mut sink, "OrderID,Region,UnitsSold\n", 2).await.unwrap();

        assert_eq!(result.rows_written, 0);
        assert_eq!(result.batches_written, 0);
        assert!(sink.batches.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_reports_batch_index_and_progress() {
        let mut sink = RecordingSink {
            fail_at: Some(1),
            ..Default::default()
        };
        let err = load(&mut sink, SCENARIO, 2).await.unwrap_err();

        match err {
            LoadError::BatchWrite {
                batch_index,
                rows_written,
                ..
            } => {
                assert_eq!(batch_index, 1);
                assert_eq!(rows_written, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.batches.len(), 1, "no retry and no later batches");
    }

    #[tokio::test]
    async fn test_first_batch_failure_reports_zero_rows() {
        let mut sink = RecordingSink {
            fail_at: Some(0),
            ..Default::default()
        };
        let err = load(&mut sink, SCENARIO, 5).await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::BatchWrite {
                batch_index: 0,
                rows_written: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_row_stops_after_committed_batches() {
        let content = "OrderID,Region,UnitsSold\n1,Asia,10\n2,Europe,20\n3,Africa,30,oops\n";
        let mut sink = RecordingSink::default();
        let err = load(&mut sink, content, 2).await.unwrap_err();

        assert!(matches!(err, LoadError::SourceRead { .. }));
        assert_eq!(sink.batches.len(), 1);
    }
}

use indicatif::{ProgressBar, ProgressStyle};

/// Telemetry events emitted by the chunked loader for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A batch was committed to the destination
    BatchCommitted {
        batch_index: u64,
        rows: u64,
        cells_nulled: u64,
        /// Source offset just past the batch's last record
        end_byte: u64,
        duration_ms: u64,
    },
    /// A batch failed to commit; the run stops after this event
    BatchFailed { batch_index: u64 },
}

/// Statistics aggregated from telemetry events.
///
/// `rows_written` is the loader's running total.
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub batches_committed: u64,
    pub rows_written: u64,
    pub cells_nulled: u64,
    pub bytes_processed: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::BatchCommitted {
                rows,
                cells_nulled,
                end_byte,
                duration_ms,
                ..
            } => {
                self.batches_committed += 1;
                self.rows_written += rows;
                self.cells_nulled += cells_nulled;
                self.bytes_processed = *end_byte;
                self.batch_durations_ms.push(*duration_ms);
            }
            // Nothing from a failed batch counts as progress
            TelemetryEvent::BatchFailed { .. } => {}
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

/// Terminal progress display, a no-op in quiet mode
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    /// Bytes-based bar when the source size is known, spinner otherwise
    pub fn new(quiet: bool, source_size: Option<u64>) -> Self {
        if quiet {
            return Self { bar: None };
        }

        let bar = match source_size {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template(
                        "[{elapsed_precise}] [{bar:30.green/blue}] {bytes}/{total_bytes} ({percent}%) | {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("[{elapsed_precise}] {spinner} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };

        Self { bar: Some(bar) }
    }

    pub fn update(&self, event: &TelemetryEvent, stats: &ProgressStats) {
        let Some(bar) = &self.bar else {
            return;
        };

        match event {
            TelemetryEvent::BatchCommitted { batch_index, .. } => {
                bar.set_position(stats.bytes_processed);
                bar.set_message(format!(
                    "batch {} | {} rows",
                    batch_index, stats.rows_written
                ));
            }
            TelemetryEvent::BatchFailed { batch_index } => {
                bar.abandon_with_message(format!(
                    "batch {} failed | {} rows committed",
                    batch_index, stats.rows_written
                ));
            }
        }
    }

    pub fn finish(&self, stats: &ProgressStats) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!(
                "{} rows in {} batches",
                stats.rows_written, stats.batches_committed
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(batch_index: u64, rows: u64, duration_ms: u64) -> TelemetryEvent {
        TelemetryEvent::BatchCommitted {
            batch_index,
            rows,
            cells_nulled: batch_index,
            end_byte: (batch_index + 1) * 100,
            duration_ms,
        }
    }

    #[test]
    fn test_stats_accumulate_committed_batches() {
        let mut stats = ProgressStats::new();
        stats.update(&committed(0, 10, 5));
        stats.update(&committed(1, 10, 7));
        stats.update(&committed(2, 3, 2));

        assert_eq!(stats.batches_committed, 3);
        assert_eq!(stats.rows_written, 23);
        assert_eq!(stats.cells_nulled, 3);
        assert_eq!(stats.bytes_processed, 300);
    }

    #[test]
    fn test_failed_batch_does_not_count_rows() {
        let mut stats = ProgressStats::new();
        stats.update(&committed(0, 10, 5));
        stats.update(&TelemetryEvent::BatchFailed { batch_index: 1 });

        assert_eq!(stats.batches_committed, 1);
        assert_eq!(stats.rows_written, 10);
        assert_eq!(stats.batch_durations_ms, vec![5]);
    }

    #[test]
    fn test_percentiles() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.get_percentiles(), (None, None, None));

        for (i, ms) in (1..=100).enumerate() {
            stats.update(&committed(i as u64, 1, ms));
        }

        assert_eq!(stats.percentile(50.0), Some(50));
        assert_eq!(stats.percentile(90.0), Some(90));
        assert_eq!(stats.percentile(99.0), Some(99));
        assert_eq!(stats.percentile(0.0), Some(1));
    }

    #[test]
    fn test_quiet_reporter_is_inert() {
        let reporter = ProgressReporter::new(true, Some(1000));
        let mut stats = ProgressStats::new();
        let event = committed(0, 10, 1);
        stats.update(&event);
        reporter.update(&event, &stats);
        reporter.finish(&stats);
        assert!(reporter.bar.is_none());
    }
}

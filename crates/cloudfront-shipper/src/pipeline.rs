// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! One shipping run, from listing log files to deleting delivered ones.
//!
//! Everything runs in order on the calling task: a file is read, its records
//! are buffered, a full buffer is flushed chunk by chunk, and each chunk's push
//! is awaited before the next one starts. A crash mid-run only leaves files
//! undeleted, which the next run picks up again.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::accumulator::RecordAccumulator;
use crate::chunker::{chunk, ChunkError};
use crate::deletion::{DeletionGate, FlushResult};
use crate::memory::read_memory_usage;
use crate::metrics::RunMetrics;
use crate::rate_limit::Clock;
use crate::shipper::Shipper;
use crate::source::{ListFilter, SourceError, SourceStore};

/// Failure key recorded when removing delivered files fails.
pub const DELETE_FAILURE_REASON: &str = "delete";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to list log files: {0}")]
    Listing(#[source] SourceError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

pub struct Pipeline<C: Clock> {
    source: Arc<dyn SourceStore>,
    shipper: Shipper<C>,
    deletion: DeletionGate,
    filter: ListFilter,
    max_lines: usize,
    max_chunk_lines: usize,
}

impl<C: Clock> Pipeline<C> {
    pub fn new(
        source: Arc<dyn SourceStore>,
        shipper: Shipper<C>,
        deletion: DeletionGate,
        filter: ListFilter,
        max_lines: usize,
        max_chunk_lines: usize,
    ) -> Self {
        Pipeline {
            source,
            shipper,
            deletion,
            filter,
            max_lines,
            max_chunk_lines,
        }
    }

    pub async fn run(&mut self) -> Result<RunMetrics, PipelineError> {
        let started = Instant::now();
        let mut metrics = RunMetrics::default();

        let units = self
            .source
            .list_pending(&self.filter)
            .await
            .map_err(PipelineError::Listing)?;
        info!(
            "Shipping {} log files ({:?} mode)",
            units.len(),
            self.deletion.mode()
        );

        let mut accumulator = RecordAccumulator::new(self.max_lines);
        for unit in &units {
            let records = match self.source.fetch_records(unit).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Skipping {unit}: {e}");
                    metrics.files_failed += 1;
                    continue;
                }
            };
            debug!("Read {} lines from {unit}", records.len());
            metrics.files_processed += 1;
            metrics.lines_processed += records.len() as u64;

            // A full buffer is flushed when the next record arrives, so a unit
            // whose last record filled it is already complete in that flush.
            for record in records {
                if accumulator.should_flush() {
                    self.flush(&mut accumulator, &mut metrics).await?;
                }
                accumulator.add(record, unit);
            }
            accumulator.complete(unit);
        }
        self.flush(&mut accumulator, &mut metrics).await?;

        metrics.elapsed = started.elapsed();
        metrics.memory = read_memory_usage();
        info!(
            "Run finished in {:.2}s: {} files, {} lines sent, {} skipped, {} chunks failed, {} files deleted",
            metrics.elapsed.as_secs_f64(),
            metrics.files_processed,
            metrics.lines_sent,
            metrics.lines_skipped,
            metrics.chunks_failed,
            metrics.files_deleted
        );
        Ok(metrics)
    }

    async fn flush(
        &mut self,
        accumulator: &mut RecordAccumulator,
        metrics: &mut RunMetrics,
    ) -> Result<(), PipelineError> {
        let pending = accumulator.drain();
        if pending.is_empty() {
            return Ok(());
        }

        let mut flush_metrics = RunMetrics::default();
        if !pending.records.is_empty() {
            flush_metrics.flushes = 1;
        }
        let lines = pending.records.len();

        let mut outcomes = Vec::new();
        for batch in chunk(pending.records, self.max_chunk_lines)? {
            outcomes.push(self.shipper.ship(&batch, &mut flush_metrics).await);
        }
        let result = FlushResult::new(outcomes);
        debug!(
            "Flushed {lines} lines in {} chunks, succeeded: {}",
            result.outcomes().len(),
            result.succeeded()
        );

        if let Err(e) = self
            .deletion
            .resolve(
                &result,
                &pending.sources,
                self.source.as_ref(),
                &mut flush_metrics,
            )
            .await
        {
            error!("Failed to delete delivered log files: {e}");
            flush_metrics.record_failure(DELETE_FAILURE_REASON);
        }

        metrics.merge(flush_metrics);
        Ok(())
    }
}

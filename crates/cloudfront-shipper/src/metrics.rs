// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-run counters and their delivery at the end of a run.
//!
//! Components receive a `&mut RunMetrics` instead of touching shared state; the
//! pipeline merges what they record and hands the final map to a
//! [`MetricsSink`] once the run is over.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::memory::MemoryUsage;

pub const METRIC_FILES_PROCESSED: &str = "files-processed";
pub const METRIC_FILES_FAILED: &str = "files-failed";
pub const METRIC_FILES_DELETED: &str = "files-deleted";
pub const METRIC_LINES_PROCESSED: &str = "lines-processed";
pub const METRIC_LINES_SENT: &str = "lines-sent";
pub const METRIC_LINES_SKIPPED: &str = "lines-skipped";
pub const METRIC_FLUSHES: &str = "flushes";
pub const METRIC_CHUNKS_SENT: &str = "chunks-sent";
pub const METRIC_CHUNKS_FAILED: &str = "chunks-failed";
pub const METRIC_FAILURES_PREFIX: &str = "failures.";
pub const METRIC_TIME_ELAPSED: &str = "time-elapsed";
pub const METRIC_MEMORY_USAGE_CURRENT: &str = "memory-usage-current";
pub const METRIC_MEMORY_USAGE_PEAK: &str = "memory-usage-peak";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunMetrics {
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_deleted: u64,
    pub lines_processed: u64,
    pub lines_sent: u64,
    /// Lines Loki acknowledged but ignored (partial 400 responses).
    pub lines_skipped: u64,
    pub flushes: u64,
    pub chunks_sent: u64,
    pub chunks_failed: u64,
    /// Failed pushes keyed by reason: an HTTP status code or `connect`.
    pub failures: BTreeMap<String, u64>,
    pub elapsed: Duration,
    pub memory: Option<MemoryUsage>,
}

impl RunMetrics {
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        *self.failures.entry(reason.into()).or_insert(0) += 1;
    }

    /// Folds `other` into `self`. Counters add up, gauges keep the larger value.
    pub fn merge(&mut self, other: RunMetrics) {
        self.files_processed += other.files_processed;
        self.files_failed += other.files_failed;
        self.files_deleted += other.files_deleted;
        self.lines_processed += other.lines_processed;
        self.lines_sent += other.lines_sent;
        self.lines_skipped += other.lines_skipped;
        self.flushes += other.flushes;
        self.chunks_sent += other.chunks_sent;
        self.chunks_failed += other.chunks_failed;
        for (reason, count) in other.failures {
            *self.failures.entry(reason).or_insert(0) += count;
        }
        self.elapsed = self.elapsed.max(other.elapsed);
        self.memory = match (self.memory, other.memory) {
            (Some(a), Some(b)) => Some(MemoryUsage {
                current_bytes: b.current_bytes,
                peak_bytes: a.peak_bytes.max(b.peak_bytes),
            }),
            (a, b) => b.or(a),
        };
    }

    /// Flat name to value mapping handed to a [`MetricsSink`].
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        for (name, value) in [
            (METRIC_FILES_PROCESSED, self.files_processed),
            (METRIC_FILES_FAILED, self.files_failed),
            (METRIC_FILES_DELETED, self.files_deleted),
            (METRIC_LINES_PROCESSED, self.lines_processed),
            (METRIC_LINES_SENT, self.lines_sent),
            (METRIC_LINES_SKIPPED, self.lines_skipped),
            (METRIC_FLUSHES, self.flushes),
            (METRIC_CHUNKS_SENT, self.chunks_sent),
            (METRIC_CHUNKS_FAILED, self.chunks_failed),
        ] {
            map.insert(name.to_string(), value as f64);
        }
        for (reason, count) in &self.failures {
            map.insert(format!("{METRIC_FAILURES_PREFIX}{reason}"), *count as f64);
        }
        map.insert(METRIC_TIME_ELAPSED.to_string(), self.elapsed.as_secs_f64());
        if let Some(memory) = self.memory {
            map.insert(
                METRIC_MEMORY_USAGE_CURRENT.to_string(),
                memory.current_bytes as f64,
            );
            map.insert(
                METRIC_MEMORY_USAGE_PEAK.to_string(),
                memory.peak_bytes as f64,
            );
        }
        map
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to deliver metrics to {address}: {source}")]
    Delivery {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn send(&self, metrics: &BTreeMap<String, f64>) -> Result<(), MetricsError>;
}

/// Writes every metric to the log at info level.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn send(&self, metrics: &BTreeMap<String, f64>) -> Result<(), MetricsError> {
        for (name, value) in metrics {
            info!("METRICS | {name}: {value}");
        }
        Ok(())
    }
}

/// Carbon plaintext protocol: one `<prefix>.<name> <value> <epoch>` line per metric.
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    host: String,
    port: u16,
    prefix: Option<String>,
}

impl GraphiteSink {
    pub fn new(host: impl Into<String>, port: u16, prefix: Option<String>) -> Self {
        GraphiteSink {
            host: host.into(),
            port,
            prefix,
        }
    }

    fn render(&self, metrics: &BTreeMap<String, f64>, timestamp: i64) -> String {
        metrics
            .iter()
            .map(|(name, value)| {
                let name = name.replace(' ', "_");
                match &self.prefix {
                    Some(prefix) => format!("{prefix}.{name} {value} {timestamp}\n"),
                    None => format!("{name} {value} {timestamp}\n"),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MetricsSink for GraphiteSink {
    async fn send(&self, metrics: &BTreeMap<String, f64>) -> Result<(), MetricsError> {
        let address = format!("{}:{}", self.host, self.port);
        let payload = self.render(metrics, chrono::Utc::now().timestamp());
        let delivery_error = |source: std::io::Error| MetricsError::Delivery {
            address: address.clone(),
            source,
        };

        let mut stream = TcpStream::connect(&address).await.map_err(delivery_error)?;
        stream
            .write_all(payload.as_bytes())
            .await
            .map_err(delivery_error)?;
        stream.shutdown().await.map_err(delivery_error)?;

        debug!("Sent {} metrics to graphite at {address}", metrics.len());
        Ok(())
    }
}

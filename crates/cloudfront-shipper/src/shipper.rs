// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Pushing one chunk to Loki and classifying the response.
//!
//! # Outcomes
//!
//! | Response                         | Outcome                          |
//! |----------------------------------|----------------------------------|
//! | `204 No Content`                 | `Success`                        |
//! | `400 Bad Request`                | `PartialNonFatal(ignored lines)` |
//! | `429 Too Many Requests`          | `FatalTransient(RateLimited)`    |
//! | `500`, `502`, `503`, `504`       | `FatalTransient(ServerOverload)` |
//! | `413 Payload Too Large`          | `FatalTransient(PayloadTooLarge)`|
//! | any other status                 | `FatalTransient(Unclassified)`   |
//! | no response (connect, timeout)   | `FatalTransient(ConnectFailure)` |
//!
//! A fatal outcome leaves the chunk undelivered: the sources of the owning
//! flush are kept and re-read by a later run. There is no retry within a run.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::loki::PushRequest;
use crate::metrics::RunMetrics;
use crate::rate_limit::{Clock, IntervalGate};
use crate::record::LogRecord;
use crate::stream::StreamGrouper;

lazy_static! {
    /// Loki reports dropped entries of a partially rejected push as
    /// `... total ignored: 3 out of 50`.
    static ref IGNORED_COUNT_REGEX: Regex =
        Regex::new(r"total ignored: (\d+) out of").expect("failed creating regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipFailure {
    ConnectFailure(String),
    RateLimited,
    ServerOverload(StatusCode),
    PayloadTooLarge,
    UnclassifiedNonSuccess(StatusCode),
}

impl ShipFailure {
    /// Key under which the failure is counted in [`RunMetrics::failures`].
    pub fn metric_reason(&self) -> String {
        match self {
            ShipFailure::ConnectFailure(_) => "connect".to_string(),
            ShipFailure::RateLimited => StatusCode::TOO_MANY_REQUESTS.as_u16().to_string(),
            ShipFailure::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE.as_u16().to_string(),
            ShipFailure::ServerOverload(status) | ShipFailure::UnclassifiedNonSuccess(status) => {
                status.as_u16().to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipOutcome {
    Success,
    /// Loki accepted the push but dropped this many lines.
    PartialNonFatal(u64),
    FatalTransient(ShipFailure),
}

impl ShipOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShipOutcome::FatalTransient(_))
    }
}

/// Extracts the ignored-entry count from a Loki error body.
pub fn parse_ignored_count(body: &str) -> Option<u64> {
    IGNORED_COUNT_REGEX
        .captures(body)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse().ok())
}

/// Maps a Loki response to an outcome for a push of `lines` lines.
///
/// A `400` whose body carries no ignored count is taken as a rejection of every
/// line, which is still non-fatal: resending the same payload cannot succeed.
pub fn classify_response(status: StatusCode, body: &str, lines: u64) -> ShipOutcome {
    match status {
        StatusCode::NO_CONTENT => ShipOutcome::Success,
        StatusCode::BAD_REQUEST => {
            ShipOutcome::PartialNonFatal(parse_ignored_count(body).unwrap_or(lines).min(lines))
        }
        StatusCode::TOO_MANY_REQUESTS => ShipOutcome::FatalTransient(ShipFailure::RateLimited),
        StatusCode::PAYLOAD_TOO_LARGE => ShipOutcome::FatalTransient(ShipFailure::PayloadTooLarge),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            ShipOutcome::FatalTransient(ShipFailure::ServerOverload(status))
        }
        other => ShipOutcome::FatalTransient(ShipFailure::UnclassifiedNonSuccess(other)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct ShipperConfig {
    pub push_url: String,
    pub timeout: Duration,
    /// Minimum pause after a delivered chunk before the next push.
    pub ship_interval: Duration,
    pub grouper: StreamGrouper,
}

pub struct Shipper<C: Clock> {
    client: reqwest::Client,
    push_url: String,
    grouper: StreamGrouper,
    gate: IntervalGate<C>,
}

impl<C: Clock> Shipper<C> {
    pub fn new(config: ShipperConfig, clock: C) -> Result<Self, ShipperError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Shipper {
            client,
            push_url: config.push_url,
            grouper: config.grouper,
            gate: IntervalGate::new(clock, config.ship_interval),
        })
    }

    /// Pushes `chunk` as one request and records the outcome in `metrics`.
    pub async fn ship(&mut self, chunk: &[LogRecord], metrics: &mut RunMetrics) -> ShipOutcome {
        let request = PushRequest::from(self.grouper.group(chunk));
        let lines = request.line_count() as u64;

        self.gate.ready().await;
        debug!(
            "Pushing {lines} lines in {} streams to {}",
            request.streams.len(),
            self.push_url
        );

        let outcome = match self.client.post(&self.push_url).json(&request).send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::NO_CONTENT {
                    ShipOutcome::Success
                } else {
                    // Only read the body when it can change the classification
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            warn!("{status}: Failed to read Loki response body: {e}");
                            String::new()
                        }
                    };
                    let outcome = classify_response(status, &body, lines);
                    if outcome.is_fatal() {
                        error!("{status}: Failed to push to Loki: {body:?}");
                    }
                    outcome
                }
            }
            Err(e) => {
                error!("Error pushing to Loki at {}: {e}", self.push_url);
                ShipOutcome::FatalTransient(ShipFailure::ConnectFailure(e.to_string()))
            }
        };

        match &outcome {
            ShipOutcome::Success => {
                metrics.lines_sent += lines;
                metrics.chunks_sent += 1;
                self.gate.delivered();
            }
            ShipOutcome::PartialNonFatal(ignored) => {
                warn!("Loki ignored {ignored} out of {lines} lines");
                metrics.lines_sent += lines - ignored;
                metrics.lines_skipped += ignored;
                metrics.chunks_sent += 1;
                self.gate.delivered();
            }
            ShipOutcome::FatalTransient(failure) => {
                metrics.chunks_failed += 1;
                metrics.record_failure(failure.metric_reason());
            }
        }

        outcome
    }
}

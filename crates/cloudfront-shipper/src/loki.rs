// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! JSON body of a Loki push request.
//!
//! ```json
//! {"streams":[{"stream":{"system":"cloudfront","distribution":"E2DIST","year":"2024"},
//!              "values":[["1704099600000000000","2024-01-01\t09:00:00\t..."]]}]}
//! ```

use serde::Serialize;

use crate::stream::{GroupedStreams, StreamKey};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PushRequest {
    pub streams: Vec<PushStream>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PushStream {
    pub stream: StreamLabels,
    /// `[timestamp_ns_as_string, line]` pairs in timestamp order.
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StreamLabels {
    pub system: String,
    pub distribution: String,
    pub year: String,
}

impl From<StreamKey> for StreamLabels {
    fn from(key: StreamKey) -> Self {
        StreamLabels {
            system: key.system.to_string(),
            distribution: key.distribution,
            year: key.year,
        }
    }
}

impl From<GroupedStreams> for PushRequest {
    fn from(streams: GroupedStreams) -> Self {
        PushRequest {
            streams: streams
                .into_iter()
                .map(|(key, entries)| PushStream {
                    stream: key.into(),
                    values: entries
                        .into_iter()
                        .map(|entry| (entry.timestamp_ns.to_string(), entry.line))
                        .collect(),
                })
                .collect(),
        }
    }
}

impl PushRequest {
    pub fn line_count(&self) -> usize {
        self.streams.iter().map(|s| s.values.len()).sum()
    }
}

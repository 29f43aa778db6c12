// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Grouping of records into Loki streams.
//!
//! Loki rejects an entry whose timestamp is older than the newest entry already
//! accepted for the same stream, so entries are sorted by timestamp inside each
//! stream before a chunk is pushed. This removes nearly all "entry too far
//! behind" rejections within a chunk. Ordering across chunks is not guaranteed.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use crate::constants::SYSTEM_TAG;
use crate::record::{join_fields, LogRecord};

lazy_static! {
    /// A whole field holding a dotted-quad IPv4 address, each octet 0-255.
    static ref IPV4_FIELD_REGEX: Regex = Regex::new(
        r"^(?:(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])$"
    )
    .expect("failed creating regex");
}

/// Label set identifying one Loki stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    pub system: &'static str,
    pub distribution: String,
    pub year: String,
}

impl StreamKey {
    pub fn for_record(record: &LogRecord) -> Self {
        StreamKey {
            system: SYSTEM_TAG,
            distribution: record.distribution().to_string(),
            year: record.year().to_string(),
        }
    }
}

/// One serialized log line with its event time in Unix nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub timestamp_ns: i64,
    pub line: String,
}

pub type GroupedStreams = BTreeMap<StreamKey, Vec<StreamEntry>>;

/// Replaces fields that are exactly a dotted-quad IPv4 address.
#[derive(Debug, Clone)]
pub struct IpScrubber {
    mask: String,
}

impl IpScrubber {
    pub fn new(mask: impl Into<String>) -> Self {
        IpScrubber { mask: mask.into() }
    }

    pub fn scrub<'a>(&'a self, field: &'a str) -> &'a str {
        if IPV4_FIELD_REGEX.is_match(field) {
            &self.mask
        } else {
            field
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamGrouper {
    scrubber: Option<IpScrubber>,
}

impl StreamGrouper {
    pub fn new(scrubber: Option<IpScrubber>) -> Self {
        StreamGrouper { scrubber }
    }

    /// Groups `records` by stream and sorts each stream by timestamp.
    ///
    /// The sort is stable, so entries sharing a timestamp keep their input order
    /// and the result is a pure function of the input.
    pub fn group(&self, records: &[LogRecord]) -> GroupedStreams {
        let mut streams = GroupedStreams::new();

        for record in records {
            streams
                .entry(StreamKey::for_record(record))
                .or_default()
                .push(StreamEntry {
                    timestamp_ns: record.timestamp_ns(),
                    line: self.render(record),
                });
        }

        for entries in streams.values_mut() {
            entries.sort_by_key(|entry| entry.timestamp_ns);
        }

        streams
    }

    fn render(&self, record: &LogRecord) -> String {
        match &self.scrubber {
            None => record.to_line(),
            Some(scrubber) => join_fields(
                record
                    .fields()
                    .iter()
                    .map(|f| f.as_deref().map(|value| scrubber.scrub(value))),
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::tests::record;
    use proptest::prelude::*;

    #[test]
    fn test_same_stream_entries_are_sorted() {
        let records = vec![
            record("2024-01-01", "10:00:00", "distA"),
            record("2024-01-01", "09:00:00", "distA"),
        ];

        let streams = StreamGrouper::default().group(&records);

        let key = StreamKey {
            system: "cloudfront",
            distribution: "distA".to_string(),
            year: "2024".to_string(),
        };
        let entries = &streams[&key];
        assert_eq!(streams.len(), 1);
        assert!(entries[0].line.contains("09:00:00"));
        assert!(entries[1].line.contains("10:00:00"));
    }

    #[test]
    fn test_streams_split_by_distribution_and_year() {
        let records = vec![
            record("2023-12-31", "23:59:59", "distA"),
            record("2024-01-01", "00:00:00", "distA"),
            record("2024-01-01", "00:00:00", "distB"),
        ];

        let streams = StreamGrouper::default().group(&records);

        let keys: Vec<(String, String)> = streams
            .keys()
            .map(|k| (k.distribution.clone(), k.year.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("distA".to_string(), "2023".to_string()),
                ("distA".to_string(), "2024".to_string()),
                ("distB".to_string(), "2024".to_string()),
            ]
        );
    }

    #[test]
    fn test_equal_timestamps_keep_input_order() {
        let a = LogRecord::from_fields(
            vec![Some("2024-01-01".into()), Some("10:00:00".into()), Some("first".into())],
            "distA",
        )
        .unwrap();
        let b = LogRecord::from_fields(
            vec![Some("2024-01-01".into()), Some("10:00:00".into()), Some("second".into())],
            "distA",
        )
        .unwrap();

        let streams = StreamGrouper::default().group(&[a, b]);
        let entries = streams.values().next().unwrap();

        assert!(entries[0].line.ends_with("first"));
        assert!(entries[1].line.ends_with("second"));
    }

    #[test]
    fn test_scrubber_replaces_whole_field_matches_only() {
        let scrubber = IpScrubber::new("0.0.0.0");

        assert_eq!(scrubber.scrub("192.0.2.10"), "0.0.0.0");
        assert_eq!(scrubber.scrub("255.255.255.255"), "0.0.0.0");
        assert_eq!(scrubber.scrub("host 192.0.2.10"), "host 192.0.2.10");
        assert_eq!(scrubber.scrub("192.0.2.10:443"), "192.0.2.10:443");
        assert_eq!(scrubber.scrub("999.1.1.1"), "999.1.1.1");
        assert_eq!(scrubber.scrub("2001:db8::1"), "2001:db8::1");
    }

    #[test]
    fn test_grouper_applies_scrubber() {
        let grouper = StreamGrouper::new(Some(IpScrubber::new("0.0.0.0")));
        let streams = grouper.group(&[record("2024-01-01", "10:00:00", "distA")]);
        let line = &streams.values().next().unwrap()[0].line;

        assert_eq!(line, "2024-01-01\t10:00:00\tAMS54-C1\t1024\t0.0.0.0\tGET\t-");
    }

    proptest! {
        #[test]
        fn prop_stream_timestamps_are_non_decreasing(
            times in prop::collection::vec((0u32..24, 0u32..60, 0u32..60, 0usize..3), 0..200)
        ) {
            let distributions = ["distA", "distB", "distC"];
            let records: Vec<LogRecord> = times
                .iter()
                .map(|(h, m, s, d)| {
                    record("2024-06-01", &format!("{h:02}:{m:02}:{s:02}"), distributions[*d])
                })
                .collect();

            let streams = StreamGrouper::default().group(&records);

            let total: usize = streams.values().map(Vec::len).sum();
            prop_assert_eq!(total, records.len());
            for entries in streams.values() {
                prop_assert!(entries.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
            }
        }
    }
}

// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Decoded log records and the source units they come from.
//!
//! A [`LogRecord`] is one line of a CloudFront standard log, already split into
//! fields. Its event timestamp is derived once, at construction, from the two
//! leading `date` and `time` fields, so a record with an undefined timestamp can
//! never reach the stream grouper.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use std::fmt;

use crate::constants::MISSING_FIELD;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is missing its {0} field")]
    MissingField(&'static str),

    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("timestamp {0} is outside the representable nanosecond range")]
    TimestampOutOfRange(String),
}

/// One decoded log line.
///
/// Immutable once constructed: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    fields: Vec<Option<String>>,
    timestamp_ns: i64,
    year: i32,
    distribution: String,
}

impl LogRecord {
    /// Builds a record from its decoded fields.
    ///
    /// Field 0 must hold the event date (`YYYY-MM-DD`) and field 1 the event time
    /// (`HH:MM:SS`), both in UTC as CloudFront writes them.
    pub fn from_fields(
        fields: Vec<Option<String>>,
        distribution: impl Into<String>,
    ) -> Result<Self, RecordError> {
        let date = field_at(&fields, 0, "date")?;
        let time = field_at(&fields, 1, "time")?;

        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| {
            RecordError::InvalidField {
                field: "date",
                value: date.to_string(),
            }
        })?;
        let time = NaiveTime::parse_from_str(time, TIME_FORMAT).map_err(|_| {
            RecordError::InvalidField {
                field: "time",
                value: time.to_string(),
            }
        })?;

        let event_time = date.and_time(time).and_utc();
        let timestamp_ns = event_time
            .timestamp_nanos_opt()
            .ok_or_else(|| RecordError::TimestampOutOfRange(event_time.to_rfc3339()))?;

        Ok(LogRecord {
            year: date.year(),
            fields,
            timestamp_ns,
            distribution: distribution.into(),
        })
    }

    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    /// Event time as Unix nanoseconds.
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    /// Tab-joined rendering of the fields, absent fields written as `-`.
    pub fn to_line(&self) -> String {
        join_fields(self.fields.iter().map(|f| f.as_deref()))
    }
}

pub(crate) fn join_fields<'a>(fields: impl Iterator<Item = Option<&'a str>>) -> String {
    fields
        .map(|f| f.unwrap_or(MISSING_FIELD))
        .collect::<Vec<_>>()
        .join("\t")
}

fn field_at<'a>(
    fields: &'a [Option<String>],
    index: usize,
    name: &'static str,
) -> Result<&'a str, RecordError> {
    fields
        .get(index)
        .and_then(|f| f.as_deref())
        .ok_or(RecordError::MissingField(name))
}

/// One origin of decoded records: a log object in the source store.
///
/// Identity (equality, ordering, hashing) is the object key alone.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub key: String,
    pub distribution: String,
    pub last_modified: DateTime<Utc>,
}

impl SourceUnit {
    pub fn new(
        key: impl Into<String>,
        distribution: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        SourceUnit {
            key: key.into(),
            distribution: distribution.into(),
            last_modified,
        }
    }
}

impl PartialEq for SourceUnit {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SourceUnit {}

impl std::hash::Hash for SourceUnit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for SourceUnit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourceUnit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

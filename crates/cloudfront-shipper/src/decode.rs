// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Decoding of gzip-compressed CloudFront standard log files.
//!
//! A log object looks like:
//!
//! ```text
//! #Version: 1.0
//! #Fields: date time x-edge-location sc-bytes c-ip cs-method ...
//! 2024-01-01	10:00:00	AMS54-C1	1024	192.0.2.10	GET	...
//! ```
//!
//! Header lines are skipped, every other line is split on tabs and a literal `-`
//! becomes an absent field. A single undecodable line rejects the whole file so
//! that a source unit is either fully admitted into the pipeline or not at all.

use flate2::read::GzDecoder;
use std::io::{BufRead, BufReader};

use crate::constants::MISSING_FIELD;
use crate::record::{LogRecord, RecordError};

const FIELDS_HEADER_PREFIX: &str = "#Fields:";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read compressed log: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected column layout, expected date and time first: {0:?}")]
    UnexpectedLayout(Vec<String>),

    #[error("line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: RecordError,
    },
}

/// Decodes a gzip-compressed CloudFront log into records tagged with `distribution`.
pub fn decode_log_file(bytes: &[u8], distribution: &str) -> Result<Vec<LogRecord>, DecodeError> {
    let reader = BufReader::new(GzDecoder::new(bytes));
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if let Some(columns) = parse_fields_header(line) {
            if columns.len() < 2 || columns[0] != "date" || columns[1] != "time" {
                return Err(DecodeError::UnexpectedLayout(columns));
            }
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record = LogRecord::from_fields(split_fields(line), distribution).map_err(|source| {
            DecodeError::Record {
                line: index + 1,
                source,
            }
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Splits one tab-separated line, mapping `-` to `None`.
pub fn split_fields(line: &str) -> Vec<Option<String>> {
    line.split('\t')
        .map(|col| {
            if col == MISSING_FIELD {
                None
            } else {
                Some(col.to_string())
            }
        })
        .collect()
}

/// Column names from a `#Fields:` header line, `None` for any other line.
pub fn parse_fields_header(line: &str) -> Option<Vec<String>> {
    let names = line.strip_prefix(FIELDS_HEADER_PREFIX)?;
    Some(names.split_whitespace().map(str::to_string).collect())
}

// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

use crate::record::LogRecord;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be greater than 0")]
    InvalidSize,
}

/// Size-bounded transport unit. Chunks are shipped one at a time, in order.
pub type Chunk = Vec<LogRecord>;

/// Slices `records` into consecutive chunks of at most `max_size` records.
///
/// Input order is preserved and nothing is rebalanced across streams; only the
/// last chunk may be shorter.
pub fn chunk(records: Vec<LogRecord>, max_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    if max_size == 0 {
        return Err(ChunkError::InvalidSize);
    }

    let mut chunks = Vec::with_capacity(records.len().div_ceil(max_size));
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        chunks.push(records.by_ref().take(max_size).collect());
    }
    Ok(chunks)
}

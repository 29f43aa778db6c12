// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory buffer of decoded records.
//!
//! The accumulator is the only backpressure in the pipeline: once it holds
//! `max_lines` records the caller must flush before reading more, so peak memory
//! is bounded by `max_lines` instead of by the size of the backlog.
//!
//! Every record is tagged with the source unit it came from. A unit whose records
//! are still being added is *open*; once the caller has added its last record it
//! calls [`RecordAccumulator::complete`]. A drain reports which units contributed
//! to it and whether each one was complete at that point, and open units carry
//! over into the next pending set.

use std::collections::BTreeMap;

use crate::record::{LogRecord, SourceUnit};

/// One source unit's participation in a drained [`PendingSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub unit: SourceUnit,
    /// No more records of this unit will follow in later flushes.
    pub complete: bool,
}

/// Everything drained from the accumulator in one flush.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingSet {
    pub records: Vec<LogRecord>,
    pub sources: Vec<Contribution>,
}

impl PendingSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.sources.is_empty()
    }
}

#[derive(Debug)]
pub struct RecordAccumulator {
    max_lines: usize,
    records: Vec<LogRecord>,
    sources: BTreeMap<SourceUnit, bool>,
}

impl RecordAccumulator {
    pub fn new(max_lines: usize) -> Self {
        RecordAccumulator {
            max_lines,
            records: Vec::with_capacity(max_lines),
            sources: BTreeMap::new(),
        }
    }

    /// Appends `record` and records `unit` as a contributor.
    pub fn add(&mut self, record: LogRecord, unit: &SourceUnit) {
        self.track(unit);
        self.records.push(record);
    }

    /// Marks `unit` as fully read. A unit with no records still joins the set so
    /// it is resolved by the next flush.
    pub fn complete(&mut self, unit: &SourceUnit) {
        self.sources.insert(unit.clone(), true);
    }

    pub fn should_flush(&self) -> bool {
        self.records.len() >= self.max_lines
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.sources.is_empty()
    }

    /// Takes every pending record and the contributing units in one step.
    ///
    /// Open units stay registered so the next pending set also reports them.
    pub fn drain(&mut self) -> PendingSet {
        let records = std::mem::replace(&mut self.records, Vec::with_capacity(self.max_lines));
        let sources = std::mem::take(&mut self.sources);

        let contributions = sources
            .into_iter()
            .map(|(unit, complete)| {
                if !complete {
                    self.sources.insert(unit.clone(), false);
                }
                Contribution { unit, complete }
            })
            .collect();

        PendingSet {
            records,
            sources: contributions,
        }
    }

    fn track(&mut self, unit: &SourceUnit) {
        if !self.sources.contains_key(unit) {
            self.sources.insert(unit.clone(), false);
        }
    }
}

// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Deciding which source units may be removed after a flush.
//!
//! A unit is deleted once its last record has been flushed, provided every
//! flush that carried any of its records was delivered. Units of a failed flush
//! are remembered for the rest of the run and never deleted, so a later run
//! re-reads them in full.

use std::collections::HashSet;
use tracing::{info, warn};

use crate::accumulator::Contribution;
use crate::metrics::RunMetrics;
use crate::record::SourceUnit;
use crate::shipper::ShipOutcome;
use crate::source::{SourceError, SourceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Ship and delete delivered sources.
    Production,
    /// Ship but leave every source in place.
    DryRun,
}

/// Every chunk outcome of one flush.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushResult {
    outcomes: Vec<ShipOutcome>,
}

impl FlushResult {
    pub fn new(outcomes: Vec<ShipOutcome>) -> Self {
        FlushResult { outcomes }
    }

    pub fn outcomes(&self) -> &[ShipOutcome] {
        &self.outcomes
    }

    /// True when no chunk of the flush failed fatally.
    pub fn succeeded(&self) -> bool {
        !self.outcomes.iter().any(ShipOutcome::is_fatal)
    }
}

impl FromIterator<ShipOutcome> for FlushResult {
    fn from_iter<I: IntoIterator<Item = ShipOutcome>>(iter: I) -> Self {
        FlushResult::new(iter.into_iter().collect())
    }
}

#[derive(Debug)]
pub struct DeletionGate {
    mode: OperatingMode,
    tainted: HashSet<SourceUnit>,
}

impl DeletionGate {
    pub fn new(mode: OperatingMode) -> Self {
        DeletionGate {
            mode,
            tainted: HashSet::new(),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Resolves one flush and returns the units that were deleted.
    pub async fn resolve(
        &mut self,
        result: &FlushResult,
        sources: &[Contribution],
        store: &dyn SourceStore,
        metrics: &mut RunMetrics,
    ) -> Result<Vec<SourceUnit>, SourceError> {
        if !result.succeeded() {
            warn!(
                "Flush had failed pushes; keeping {} source files for a later run",
                sources.len()
            );
            self.tainted
                .extend(sources.iter().map(|contribution| contribution.unit.clone()));
            return Ok(Vec::new());
        }

        let eligible: Vec<SourceUnit> = sources
            .iter()
            .filter(|contribution| contribution.complete)
            .filter(|contribution| !self.tainted.contains(&contribution.unit))
            .map(|contribution| contribution.unit.clone())
            .collect();

        if eligible.is_empty() {
            return Ok(eligible);
        }

        match self.mode {
            OperatingMode::DryRun => {
                for unit in &eligible {
                    info!("Dry run: would delete {unit}");
                }
                Ok(Vec::new())
            }
            OperatingMode::Production => {
                // One unit per call so a failure part way keeps the count exact
                for unit in &eligible {
                    store.delete(std::slice::from_ref(unit)).await?;
                    metrics.files_deleted += 1;
                }
                Ok(eligible)
            }
        }
    }
}

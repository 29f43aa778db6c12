// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Process memory readings for the end-of-run summary.
//!
//! Values come from `/proc/self/status` and are reported in bytes. On platforms
//! without procfs the reading is simply absent.

use std::fs;
use tracing::debug;

const PROC_SELF_STATUS_PATH: &str = "/proc/self/status"; // Per-process memory counters, values in kB
const RESIDENT_KEY: &str = "VmRSS:"; // Current resident set size
const PEAK_RESIDENT_KEY: &str = "VmHWM:"; // Peak resident set size ("high water mark")

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub current_bytes: u64,
    pub peak_bytes: u64,
}

/// Reads the current and peak resident memory of this process.
pub fn read_memory_usage() -> Option<MemoryUsage> {
    match fs::read_to_string(PROC_SELF_STATUS_PATH) {
        Ok(contents) => parse_status(&contents),
        Err(e) => {
            debug!("Could not read memory usage from {PROC_SELF_STATUS_PATH}: {e}");
            None
        }
    }
}

fn parse_status(contents: &str) -> Option<MemoryUsage> {
    let current = read_kb(contents, RESIDENT_KEY);
    if current.is_none() {
        debug!("No {RESIDENT_KEY} entry in {PROC_SELF_STATUS_PATH}");
    }
    let peak = read_kb(contents, PEAK_RESIDENT_KEY);
    if peak.is_none() {
        debug!("No {PEAK_RESIDENT_KEY} entry in {PROC_SELF_STATUS_PATH}");
    }

    let current_bytes = current? * 1024;
    Some(MemoryUsage {
        current_bytes,
        peak_bytes: peak.map_or(current_bytes, |kb| kb * 1024),
    })
}

/// Parses lines like `VmRSS:	   10240 kB`
fn read_kb(contents: &str, key: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u64>().ok())
}

// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

/// Value of the `system` label on every stream pushed to Loki.
pub const SYSTEM_TAG: &str = "cloudfront";

/// Rendering of an absent field, both in source files and in shipped lines.
pub const MISSING_FIELD: &str = "-";

/// Records accumulated before a flush is forced.
pub const DEFAULT_MAX_LINES: usize = 1_000;

/// Source objects considered in a single run.
pub const DEFAULT_MAX_FILES: usize = 100;

/// Minimum pause between two delivered chunks.
pub const DEFAULT_SHIP_INTERVAL_MS: u64 = 1_000;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_GRAPHITE_PORT: u16 = 2003;

pub const DEFAULT_IP_MASK: &str = "0.0.0.0";

/// Extension of the compressed log objects written by CloudFront.
pub const LOG_FILE_EXTENSION: &str = ".gz";

// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod chunker;
pub mod config;
pub mod constants;
pub mod decode;
pub mod deletion;
pub mod loki;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod record;
pub mod shipper;
pub mod source;
pub mod stream;

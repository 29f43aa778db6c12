// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Self-imposed pacing between pushes.
//!
//! After a chunk is delivered the [`IntervalGate`] is armed; the next push waits
//! until `interval` has passed since that delivery. Failed pushes do not arm the
//! gate. Time is read through a [`Clock`] so tests can run without real delays.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time elapsed since the clock was created.
    fn now(&self) -> Duration;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        TokioClock {
            origin: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct IntervalGate<C: Clock> {
    clock: C,
    interval: Duration,
    next_allowed: Option<Duration>,
}

impl<C: Clock> IntervalGate<C> {
    pub fn new(clock: C, interval: Duration) -> Self {
        IntervalGate {
            clock,
            interval,
            next_allowed: None,
        }
    }

    /// Waits until the gate allows another push.
    pub async fn ready(&mut self) {
        let Some(next_allowed) = self.next_allowed.take() else {
            return;
        };
        let now = self.clock.now();
        if next_allowed > now {
            let wait = next_allowed - now;
            debug!("Pausing {} ms before next push", wait.as_millis());
            self.clock.sleep(wait).await;
        }
    }

    /// Records a delivered push, arming the gate for the next one.
    pub fn delivered(&mut self) {
        if !self.interval.is_zero() {
            self.next_allowed = Some(self.clock.now() + self.interval);
        }
    }
}

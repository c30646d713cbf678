/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing numeric value.
#[derive(Debug, Clone, Default)]
pub struct IncreasingCounter {
    value: Arc<AtomicU64>,
}

impl IncreasingCounter {
    /// Increment the counter by the given amount and return the new value.
    pub fn increment(&self, amount: u64) -> u64 {
        self.value.fetch_add(amount, Ordering::Relaxed) + amount
    }

    /// Get the current value of the counter.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A value that can increase or decrease over time.
/// Minimum value is 0.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    /// Increment the gauge by the given amount and return the new value.
    pub fn increment(&self, amount: u64) -> u64 {
        self.value.fetch_add(amount, Ordering::Relaxed) + amount
    }

    /// Decrement the gauge by the given amount and return the new value.
    /// If the decrement would cause underflow, the gauge is clamped at 0.
    pub fn decrement(&self, amount: u64) -> u64 {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let new_value = current.saturating_sub(amount);
            match self.value.compare_exchange_weak(
                current,
                new_value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return new_value,
                Err(actual) => current = actual,
            }
        }
    }

    /// Get the current value of the gauge.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Coordinator-level counters aggregated over all sessions
#[derive(Debug, Clone, Default)]
pub struct CoordinatorMetrics {
    sessions_started: IncreasingCounter,
    sessions_completed: IncreasingCounter,
    sessions_aborted: IncreasingCounter,
    sessions_expired: IncreasingCounter,
    parts_accepted: IncreasingCounter,
    bytes_accepted: IncreasingCounter,
    metadata_write_failures: IncreasingCounter,
    active_sessions: Gauge,
}

impl CoordinatorMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_started(&self) {
        self.sessions_started.increment(1);
        self.active_sessions.increment(1);
    }

    pub(crate) fn session_completed(&self) {
        self.sessions_completed.increment(1);
        self.active_sessions.decrement(1);
    }

    pub(crate) fn session_aborted(&self) {
        self.sessions_aborted.increment(1);
        self.active_sessions.decrement(1);
    }

    pub(crate) fn session_expired(&self) {
        self.sessions_expired.increment(1);
        self.active_sessions.decrement(1);
    }

    pub(crate) fn part_accepted(&self, size_bytes: u64) {
        self.parts_accepted.increment(1);
        self.bytes_accepted.increment(size_bytes);
    }

    pub(crate) fn metadata_write_failed(&self) {
        self.metadata_write_failures.increment(1);
    }

    /// Sessions successfully started
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.value()
    }

    /// Sessions that reached `Completed`
    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.value()
    }

    /// Sessions that reached `Aborted`
    pub fn sessions_aborted(&self) -> u64 {
        self.sessions_aborted.value()
    }

    /// Sessions that reached `Expired`
    pub fn sessions_expired(&self) -> u64 {
        self.sessions_expired.value()
    }

    /// Parts accepted across all sessions
    pub fn parts_accepted(&self) -> u64 {
        self.parts_accepted.value()
    }

    /// Payload bytes accepted across all sessions
    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted.value()
    }

    /// Completed uploads whose metadata could not be recorded
    pub fn metadata_write_failures(&self) -> u64 {
        self.metadata_write_failures.value()
    }

    /// Sessions not yet in a terminal state
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.value()
    }
}

impl fmt::Display for CoordinatorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sessions started: {}, completed: {}, aborted: {}, expired: {}, active: {}; \
             parts accepted: {} ({} bytes); metadata write failures: {}",
            self.sessions_started(),
            self.sessions_completed(),
            self.sessions_aborted(),
            self.sessions_expired(),
            self.active_sessions(),
            self.parts_accepted(),
            self.bytes_accepted(),
            self.metadata_write_failures()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_clamps_at_zero() {
        let gauge = Gauge::default();
        assert_eq!(2, gauge.increment(2));
        assert_eq!(0, gauge.decrement(5));
        assert_eq!(0, gauge.value());
    }

    #[test]
    fn test_session_lifecycle_counters() {
        let metrics = CoordinatorMetrics::new();
        metrics.session_started();
        metrics.session_started();
        metrics.part_accepted(10);
        metrics.part_accepted(5);
        metrics.session_completed();
        metrics.session_expired();

        assert_eq!(2, metrics.sessions_started());
        assert_eq!(1, metrics.sessions_completed());
        assert_eq!(1, metrics.sessions_expired());
        assert_eq!(2, metrics.parts_accepted());
        assert_eq!(15, metrics.bytes_accepted());
        assert_eq!(0, metrics.active_sessions());
    }
}

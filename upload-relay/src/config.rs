/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::time::Duration;

use crate::types::ConcurrencySetting;
use crate::{DEFAULT_CONCURRENCY, GIBIBYTE, MEBIBYTE};

/// Loading service settings from files and the environment
pub mod loader;

/// Minimum size of every part but the last, as enforced by Amazon S3
pub const DEFAULT_MIN_PART_SIZE_BYTES: u64 = 5 * MEBIBYTE;

/// Maximum size of a single part, as enforced by Amazon S3
pub const DEFAULT_MAX_PART_SIZE_BYTES: u64 = 5 * GIBIBYTE;

/// Sessions not completed within this window are reaped
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-part size bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSizeLimits {
    /// Smallest allowed part, the last part of an upload is exempt
    pub min_bytes: u64,
    /// Largest allowed part
    pub max_bytes: u64,
}

impl Default for PartSizeLimits {
    fn default() -> Self {
        Self {
            min_bytes: DEFAULT_MIN_PART_SIZE_BYTES,
            max_bytes: DEFAULT_MAX_PART_SIZE_BYTES,
        }
    }
}

/// Bounded exponential backoff used for storage provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for each further retry
    pub initial_backoff: Duration,
    /// Upper bound for a single delay
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Configuration for a [`Coordinator`](crate::client::Coordinator)
#[derive(Debug, Clone)]
pub struct Config {
    session_ttl: Duration,
    part_size: PartSizeLimits,
    retry: RetryConfig,
    gateway_timeout: Duration,
    complete_timeout: Duration,
    concurrency: ConcurrencySetting,
    reap_interval: Duration,
    terminal_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Builder::default().build()
    }
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// How long a session may stay open before it is reaped
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Per-part size bounds
    pub fn part_size(&self) -> &PartSizeLimits {
        &self.part_size
    }

    /// Retry policy for storage provider calls
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Deadline for a single attempt of a storage provider call
    pub fn gateway_timeout(&self) -> Duration {
        self.gateway_timeout
    }

    /// Deadline for a single attempt to assemble an object, which may take minutes
    pub fn complete_timeout(&self) -> Duration {
        self.complete_timeout
    }

    /// Returns the concurrency setting for storage provider calls.
    pub fn concurrency(&self) -> &ConcurrencySetting {
        &self.concurrency
    }

    /// The concrete number of provider calls allowed in flight at once
    pub fn gateway_permits(&self) -> usize {
        match self.concurrency {
            ConcurrencySetting::Explicit(concurrency) => cmp::max(concurrency, 1),
            ConcurrencySetting::Auto => DEFAULT_CONCURRENCY,
        }
    }

    /// How often the background reaper sweeps expired sessions
    pub fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    /// How long terminal sessions are kept before their record is purged
    pub fn terminal_retention(&self) -> Duration {
        self.terminal_retention
    }
}

/// Fluent style builder for [Config]
#[derive(Debug, Clone)]
pub struct Builder {
    session_ttl: Duration,
    part_size: PartSizeLimits,
    retry: RetryConfig,
    gateway_timeout: Duration,
    complete_timeout: Duration,
    concurrency: ConcurrencySetting,
    reap_interval: Duration,
    terminal_retention: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            part_size: PartSizeLimits::default(),
            retry: RetryConfig::default(),
            gateway_timeout: Duration::from_secs(60),
            complete_timeout: Duration::from_secs(10 * 60),
            concurrency: ConcurrencySetting::default(),
            reap_interval: Duration::from_secs(60),
            terminal_retention: Duration::from_secs(60 * 60),
        }
    }
}

impl Builder {
    /// Time-to-live of a session, measured from `StartUpload`.
    ///
    /// Default is 24 hours, matching typical provider abandonment windows.
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Smallest allowed part size, the last part of an upload is exempt.
    ///
    /// Default is 5 MiB. Lower values are only useful against S3 compatible stores that relax
    /// the limit.
    pub fn min_part_size(mut self, bytes: u64) -> Self {
        self.part_size.min_bytes = bytes;
        self
    }

    /// Largest allowed part size. Default is 5 GiB.
    ///
    /// Values smaller than the minimum part size are raised to it.
    pub fn max_part_size(mut self, bytes: u64) -> Self {
        self.part_size.max_bytes = bytes;
        self
    }

    /// Retry policy for storage provider calls
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for a single attempt of a storage provider call. Default is 60 seconds.
    pub fn gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Deadline for a single attempt to complete an upload. Default is 10 minutes.
    ///
    /// Assembling a large object can outlast [`gateway_timeout`](Self::gateway_timeout).
    pub fn complete_timeout(mut self, timeout: Duration) -> Self {
        self.complete_timeout = timeout;
        self
    }

    /// Set the concurrency level for storage provider calls.
    ///
    /// This sets the maximum number of concurrent in-flight requests across all sessions.
    /// Default is [ConcurrencySetting::Auto].
    pub fn concurrency(mut self, concurrency: ConcurrencySetting) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Interval between background reaper sweeps. Default is 60 seconds.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// How long a terminal session stays queryable before it is purged. Default is 1 hour.
    pub fn terminal_retention(mut self, retention: Duration) -> Self {
        self.terminal_retention = retention;
        self
    }

    /// Consumes the builder and constructs a [`Config`](crate::config::Config)
    pub fn build(self) -> Config {
        let part_size = PartSizeLimits {
            min_bytes: self.part_size.min_bytes,
            max_bytes: cmp::max(self.part_size.max_bytes, self.part_size.min_bytes),
        };
        let retry = RetryConfig {
            max_attempts: cmp::max(self.retry.max_attempts, 1),
            ..self.retry
        };
        Config {
            session_ttl: self.session_ttl,
            part_size,
            retry,
            gateway_timeout: self.gateway_timeout,
            complete_timeout: self.complete_timeout,
            concurrency: self.concurrency,
            reap_interval: self.reap_interval,
            terminal_retention: self.terminal_retention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(DEFAULT_SESSION_TTL, config.session_ttl());
        assert_eq!(5 * MEBIBYTE, config.part_size().min_bytes);
        assert_eq!(5 * GIBIBYTE, config.part_size().max_bytes);
        assert_eq!(3, config.retry().max_attempts);
        assert_eq!(Duration::from_millis(200), config.retry().initial_backoff);
        assert_eq!(DEFAULT_CONCURRENCY, config.gateway_permits());
        assert_eq!(Duration::from_secs(60), config.gateway_timeout());
        assert!(config.complete_timeout() > config.gateway_timeout());
    }

    #[test]
    fn test_build_normalizes_limits() {
        let config = Config::builder()
            .min_part_size(100)
            .max_part_size(10)
            .retry(RetryConfig {
                max_attempts: 0,
                ..Default::default()
            })
            .concurrency(ConcurrencySetting::Explicit(0))
            .build();
        assert_eq!(100, config.part_size().max_bytes);
        assert_eq!(1, config.retry().max_attempts);
        assert_eq!(1, config.gateway_permits());
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for Azure API calls and store consistency waits.
//!
//! This module provides backoff policies for retrying transient Azure errors
//! (429, 5xx) and for waiting until a freshly written status becomes visible.

use rand::Rng;
use reqwest::StatusCode;
use std::time::{Duration, Instant};

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// HTTP retry initial interval (50ms)
const HTTP_INITIAL_INTERVAL_MILLIS: u64 = 50;

/// HTTP retry maximum interval (10 seconds)
const HTTP_MAX_INTERVAL_SECS: u64 = 10;

/// HTTP retry maximum elapsed time (2 minutes)
const HTTP_MAX_ELAPSED_TIME_SECS: u64 = 120;

/// HTTP backoff multiplier (exponential growth factor)
const HTTP_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Consistency wait initial interval (10ms)
const CONSISTENCY_INITIAL_INTERVAL_MILLIS: u64 = 10;

/// Consistency wait multiplier
const CONSISTENCY_BACKOFF_MULTIPLIER: f64 = 5.0;

/// Consistency wait maximum number of waits between attempts
const CONSISTENCY_MAX_STEPS: u32 = 4;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
/// The schedule ends when either the elapsed-time budget or the step budget runs out.
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time
    pub max_elapsed_time: Option<Duration>,
    /// Maximum number of intervals handed out
    pub max_steps: Option<u32>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Number of intervals handed out so far
    steps: u32,
    /// Start time for tracking total elapsed time
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        max_steps: Option<u32>,
        multiplier: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            max_steps,
            multiplier,
            randomization_factor: RANDOMIZATION_FACTOR,
            steps: 0,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None once the budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }
        if let Some(max_steps) = self.max_steps {
            if self.steps >= max_steps {
                return None;
            }
        }
        self.steps += 1;

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let jittered = rand::rng().random_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Create exponential backoff configuration for Azure HTTP API retries.
///
/// # Configuration
///
/// - **Initial interval**: 50ms
/// - **Max interval**: 10 seconds
/// - **Max elapsed time**: 2 minutes total
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
#[must_use]
pub fn http_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(HTTP_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(HTTP_MAX_INTERVAL_SECS),
        Some(Duration::from_secs(HTTP_MAX_ELAPSED_TIME_SECS)),
        None,
        HTTP_BACKOFF_MULTIPLIER,
    )
}

/// Create the bounded backoff used while waiting for a status write to become visible.
///
/// # Retry Schedule
///
/// Four waits of approximately 10ms, 50ms, 250ms and 1.25s, after which the
/// wait gives up.
#[must_use]
pub fn consistency_backoff() -> ExponentialBackoff {
    let initial = Duration::from_millis(CONSISTENCY_INITIAL_INTERVAL_MILLIS);
    ExponentialBackoff::new(
        initial,
        initial.mul_f64(CONSISTENCY_BACKOFF_MULTIPLIER.powi(CONSISTENCY_MAX_STEPS as i32)),
        None,
        Some(CONSISTENCY_MAX_STEPS),
        CONSISTENCY_BACKOFF_MULTIPLIER,
    )
}

/// Determine if an HTTP status code is retryable.
///
/// # Retryable Status Codes
///
/// - **429** (Too Many Requests) - Rate limiting
/// - **500** (Internal Server Error) - Server error
/// - **502** (Bad Gateway) - Proxy/gateway error
/// - **503** (Service Unavailable) - Temporary unavailability
/// - **504** (Gateway Timeout) - Gateway timeout
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;

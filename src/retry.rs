// Copyright 2025 The gmp-operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded exponential backoff and condition polling.

use snafu::Snafu;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Total attempts including the first one; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `retry`-th consecutive failure, starting at 0.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(64) as i32);
        let secs = (self.initial.as_secs_f64() * factor).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Runs `operation` until it succeeds, fails with an error `retryable` rejects,
/// or the attempts of `policy` are used up.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let exhausted = policy.max_attempts > 0 && attempt >= policy.max_attempts;
                if exhausted || !retryable(&e) {
                    return Err(e);
                }
                let delay = policy.delay(attempt - 1);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Consecutive-failure counter driving controller requeue delays.
#[derive(Debug, Default)]
pub struct Backoff {
    failures: AtomicU32,
}

impl Backoff {
    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed);
        policy.delay(failures)
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("timed out after {:?} waiting for {}", timeout, what))]
pub struct PollTimeout {
    what: String,
    timeout: Duration,
}

/// Calls `check` every interval until it returns `Ok(true)`. Errors count as
/// "not yet".
pub async fn poll_until<F, Fut, E>(
    policy: &PollPolicy,
    what: &str,
    mut check: F,
) -> Result<(), PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(what, "condition not met yet"),
            Err(e) => trace!(what, error = %e, "condition check failed"),
        }
        if Instant::now() + policy.interval > deadline {
            return PollTimeoutSnafu {
                what,
                timeout: policy.timeout,
            }
            .fail();
        }
        tokio::time::sleep(policy.interval).await;
    }
}

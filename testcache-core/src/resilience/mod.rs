// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Resilience primitives: a backoff policy for loaders that retry on their
//! own, and a deadline helper layered over `tokio::time::timeout` (§5
//! "Timeouts"). The KV cache and the solution coordinator use the deadline
//! helper directly in their `*_with_deadline` operations; `RetryPolicy` is
//! exposed for loaders that want their own backoff schedule around a single
//! attempt before handing its result to a deadline-bounded cache call.

use rand::random;
use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Exponential backoff with jitter for a caller-driven retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Delay before the `attempt`th retry (0-based: `0` is the delay before
    /// the first retry, after the initial attempt already failed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base * jitter_factor;
        let clamped = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped.max(0.0))
    }
}

/// Run `operation` and fail with [`Error::Timeout`] if it hasn't resolved
/// within `deadline`. A thin, crate-error-typed wrapper over
/// `tokio::time::timeout` so every layer reports overruns the same way.
pub async fn with_deadline<F, T>(deadline: Duration, operation: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline)),
    }
}

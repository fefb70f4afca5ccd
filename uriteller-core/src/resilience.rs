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

//! Conflict retry policy for sequence-number writes.

use rand::random;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential pause between conflicting writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Relative jitter, 0.1 = +/-10%
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// Reject settings that cannot produce a delay.
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be finite and at least 1, got {}", self.multiplier));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be between 0 and 1, got {}", self.jitter));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must not be below initial_delay_ms".to_string());
        }
        Ok(())
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let delay = base * jitter_factor;
        let clamped = if delay.is_nan() {
            self.max_delay_ms as f64
        } else {
            delay.clamp(0.0, self.max_delay_ms as f64)
        };
        Duration::from_secs_f64(clamped / 1_000.0)
    }
}

/// What a writer does after losing a sequence number to another writer.
///
/// The default retries forever with no pause: a conflict means someone else
/// made progress, so the next candidate is usually free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    /// Conflicts tolerated per chunk before giving up. None = unbounded.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Pause between attempts. None = retry immediately.
    #[serde(default)]
    pub backoff: Option<Backoff>,
}

impl ConflictPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            backoff: Some(Backoff::default()),
        }
    }

    /// Whether another attempt is allowed after `conflicts` conflicts.
    pub fn allows(&self, conflicts: u32) -> bool {
        self.max_retries.map_or(true, |max| conflicts <= max)
    }

    /// Pause before the attempt following conflict number `conflicts`.
    pub fn pause_after(&self, conflicts: u32) -> Option<Duration> {
        self.backoff
            .as_ref()
            .map(|b| b.delay_for_attempt(conflicts.saturating_sub(1)))
    }
}

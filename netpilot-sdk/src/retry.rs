use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often and how patiently a session open is retried.
///
/// Only connection establishment goes through this. A refused login, a
/// rejected command or an exchange timeout is final for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra opens after the first one failed; 0 disables retrying
    pub retries: u32,
    /// Pause before the first retry
    pub base_delay_ms: u64,
    /// Ceiling for the grown pause
    pub max_delay_ms: u64,
    /// Growth of the pause per retry
    pub factor: f64,
    /// Relative jitter, clamped to [0, 1]
    pub jitter: f64,
    /// Stop retrying once this much time has passed since the first failure
    pub give_up_after_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            factor: 2.0,
            jitter: 0.2,
            give_up_after_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    #[inline]
    pub fn permits(&self, retries_done: u32) -> bool {
        retries_done < self.retries
    }

    /// Delay schedule for one acquisition.
    ///
    /// The count bound is checked separately through [`RetryPolicy::permits`];
    /// the schedule itself only ends on `give_up_after_ms`.
    pub fn backoff(&self) -> ExponentialBackoff {
        let base = Duration::from_millis(self.base_delay_ms.max(1));
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            max_interval: Duration::from_millis(self.max_delay_ms).max(base),
            randomization_factor: self.jitter.clamp(0.0, 1.0),
            multiplier: self.factor.max(1.0),
            max_elapsed_time: self.give_up_after_ms.map(Duration::from_millis),
            ..ExponentialBackoff::default()
        }
    }
}

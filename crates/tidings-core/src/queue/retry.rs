//! Retry policy: attempt ceiling and backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy carried by every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total deliveries allowed, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 3 attempts, exponential from 3000ms.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(3000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Longest wait between two attempts.
    pub const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier: 2.0,
        }
    }

    /// Delay before the next delivery, given the number of attempts already
    /// made (1-indexed): `base_delay * multiplier^(attempts - 1)`.
    ///
    /// With base_delay=3s, multiplier=2.0:
    /// - attempt 1 (first failure): 3s
    /// - attempt 2: 6s
    /// - attempt 3: 12s
    ///
    /// Never more than [`RetryPolicy::MAX_DELAY`]. A policy read back from a
    /// journal is not validated, so overflow and a broken multiplier land
    /// on the cap instead of panicking.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(Self::MAX_DELAY)
            .min(Self::MAX_DELAY)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

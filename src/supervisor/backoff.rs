//! # Backoff policy for restarting failure units.
//!
//! [`BackoffPolicy`] computes the delay before a failure unit is
//! restarted, from the unit's consecutive-failure count:
//!
//! ```text
//! delay(n) = min(first * factor^(n-1), max)      n >= 1
//! ```
//!
//! Reaching HEALTHY resets the failure count, so a runnable that
//! recovers restarts quickly on its next failure. Optional jitter
//! spreads simultaneous restarts apart.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use clustervisor::{BackoffPolicy, Jitter};
//!
//! let backoff = BackoffPolicy::default();
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! // Saturates at the cap and never decreases.
//! assert_eq!(backoff.delay(64), Duration::from_secs(60));
//! ```

use std::time::Duration;

use rand::Rng;

/// Randomization applied on top of the computed delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter; predictable delays. Right for single trees and tests.
    #[default]
    None,
    /// `delay/2 + random[0, delay/2]`; spreads herds while preserving
    /// most of the backoff.
    Equal,
}

/// Restart backoff policy of a supervision tree.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor per consecutive failure.
    pub factor: f64,
    /// Jitter applied to the computed delay.
    pub jitter: Jitter,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `max = 60s`, `factor = 2.0`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: Jitter::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the restart delay after `consecutive_failures` failures
    /// (1-based; `0` is treated as `1`).
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1);
        let grown = self.first.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = if !grown.is_finite() || grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        self.apply_jitter(capped)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        match self.jitter {
            Jitter::None => delay,
            Jitter::Equal => {
                let half = delay / 2;
                let spread = half.as_millis().min(u128::from(u64::MAX)) as u64;
                if spread == 0 {
                    return delay;
                }
                let extra = rand::thread_rng().gen_range(0..=spread);
                half + Duration::from_millis(extra)
            }
        }
    }
}

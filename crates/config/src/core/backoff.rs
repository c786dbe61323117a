//! Retry delay policy for watch tasks after transient watcher failures

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay applied by a watch task before calling `next` again after a failure.
///
/// Deserializes from tagged maps with humantime durations, e.g.
/// `{ kind = "exponential", base = "250ms", max = "30s" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchBackoff {
    /// Same delay after every failure
    Fixed {
        /// Delay between attempts
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Doubling delay, capped
    Exponential {
        /// Delay after the first failure
        #[serde(with = "humantime_serde")]
        base: Duration,
        /// Upper bound on the delay
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl WatchBackoff {
    /// Fixed delay policy
    pub const fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Exponential delay policy
    pub const fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential { base, max }
    }

    /// Delay after the `failures`-th consecutive failure (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(failures.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for WatchBackoff {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

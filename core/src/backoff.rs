//! Retry policy and exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Retry and backoff tuning, shared by every call a client makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first. 0 disables retry.
    pub max_retries: u32,
    /// Delay unit for the exponential schedule.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Draw each delay uniformly from `[0, computed]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that fails on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::Config("retry base delay must be positive".into()));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::Config(format!(
                "retry max delay ({:?}) is below base delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }

    /// Deterministic part of the schedule: `base * 2^attempt`, capped.
    pub fn ceiling(&self, attempt: u32) -> Result<Duration> {
        if attempt == 0 {
            return Err(Error::InvalidAttempt(attempt));
        }
        let cap = self.max_delay.as_nanos();
        let nanos = 1u128
            .checked_shl(attempt)
            .and_then(|factor| self.base_delay.as_nanos().checked_mul(factor))
            .map_or(cap, |raw| raw.min(cap));
        Ok(from_nanos(nanos))
    }

    /// Delay before retry number `attempt` (1 = the first retry, i.e. the
    /// second overall attempt).
    pub fn delay(&self, attempt: u32) -> Result<Duration> {
        let ceiling = self.ceiling(attempt)?;
        if !self.jitter {
            return Ok(ceiling);
        }
        let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        Ok(Duration::from_nanos(
            rand::thread_rng().gen_range(0..=nanos),
        ))
    }
}

/// `nanos` never exceeds `max_delay`, so the seconds always fit in a u64.
fn from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    Duration::new(
        (nanos / NANOS_PER_SEC) as u64,
        (nanos % NANOS_PER_SEC) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter: false,
        }
    }

    #[test]
    fn defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert!(p.jitter);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn exponential_schedule_without_jitter_is_exact() {
        let p = fixed(100, 1_000);
        let expected = [
            (1, 200),
            (2, 400),
            (3, 800),
            (4, 1_000),
            (5, 1_000),
        ];
        for (attempt, ms) in expected {
            assert_eq!(
                p.delay(attempt).unwrap(),
                Duration::from_millis(ms),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn matches_capped_formula_for_many_attempts() {
        let p = fixed(3, 250_000);
        for attempt in 1..=40u32 {
            let raw = 3u128 * (1u128 << attempt);
            let want = Duration::from_millis(raw.min(250_000) as u64);
            assert_eq!(p.delay(attempt).unwrap(), want, "attempt {attempt}");
        }
    }

    #[test]
    fn nanosecond_base_keeps_doubling_past_32_attempts() {
        let p = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_nanos(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        };
        for attempt in 31..=34u32 {
            let want = Duration::from_nanos(1u64 << attempt);
            assert_eq!(p.delay(attempt).unwrap(), want, "attempt {attempt}");
        }
        assert_eq!(p.delay(35).unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn full_range_durations_do_not_overflow() {
        let p = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::MAX,
            max_delay: Duration::MAX,
            jitter: false,
        };
        assert_eq!(p.delay(1).unwrap(), Duration::MAX);
        assert_eq!(p.delay(127).unwrap(), Duration::MAX);
        assert_eq!(p.delay(128).unwrap(), Duration::MAX);
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_max() {
        let p = fixed(1_000, 30_000);
        assert_eq!(p.delay(u32::MAX).unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_ceiling() {
        let p = RetryPolicy {
            jitter: true,
            ..fixed(10, 500)
        };
        for attempt in 1..=8 {
            let ceiling = p.ceiling(attempt).unwrap();
            for _ in 0..200 {
                let d = p.delay(attempt).unwrap();
                assert!(d <= ceiling, "attempt {attempt}: {d:?} > {ceiling:?}");
            }
        }
    }

    #[test]
    fn attempt_zero_is_rejected() {
        assert!(matches!(
            fixed(100, 1_000).delay(0),
            Err(Error::InvalidAttempt(0))
        ));
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        let zero_base = RetryPolicy {
            base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert!(matches!(zero_base.validate(), Err(Error::Config(_))));

        let inverted = fixed(500, 100);
        assert!(matches!(inverted.validate(), Err(Error::Config(_))));

        assert!(fixed(100, 100).validate().is_ok());
    }
}

// Retry schedule for failed outbox deliveries.
//
// Purpose
// - Decide whether a pending entry that failed before is due for another attempt.
// - Decide when an entry has used up its attempts and must be dead-lettered.
//
// The default policy retries every pending entry on every relay cycle, forever.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

use crate::core::outbox_entry::OutboxEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    None,
    Fixed(Duration),
    /// `base * 2^(retry_count - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => 2u32
                .checked_pow(retry_count - 1)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(max, |delay| delay.min(max)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        self.max_attempts.is_some_and(|max| retry_count >= max)
    }

    pub fn is_due(&self, entry: &OutboxEntry, now: DateTime<Utc>) -> bool {
        let Some(last_attempt) = entry.last_attempted_at else {
            return true;
        };
        let delay = self.backoff.delay_for(entry.retry_count);
        if delay.is_zero() {
            return true;
        }
        let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        match last_attempt.checked_add_signed(delay) {
            Some(due_at) => due_at <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod retry_policy_tests {
    use super::*;
    use rstest::rstest;

    fn exponential() -> Backoff {
        Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 400)]
    #[case(5, 1600)]
    #[case(6, 2000)]
    #[case(64, 2000)]
    fn it_should_double_the_exponential_delay_up_to_the_cap(
        #[case] retry_count: u32,
        #[case] expected_ms: u64,
    ) {
        assert_eq!(
            exponential().delay_for(retry_count),
            Duration::from_millis(expected_ms)
        );
    }

    #[rstest]
    fn it_should_only_apply_a_fixed_delay_after_a_failure() {
        let backoff = Backoff::Fixed(Duration::from_secs(3));
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(7), Duration::from_secs(3));
    }

    #[rstest]
    fn it_should_never_exhaust_an_unbounded_policy() {
        assert!(!RetryPolicy::unbounded().is_exhausted(u32::MAX));
    }

    #[rstest]
    #[case(2, false)]
    #[case(3, true)]
    #[case(4, true)]
    fn it_should_exhaust_at_max_attempts(#[case] retry_count: u32, #[case] exhausted: bool) {
        let policy = RetryPolicy::unbounded().with_max_attempts(3);
        assert_eq!(policy.is_exhausted(retry_count), exhausted);
    }

    #[rstest]
    fn it_should_defer_a_failed_entry_until_the_backoff_elapsed() {
        let policy = RetryPolicy::unbounded().with_backoff(exponential());
        let failed_at = Utc::now();
        let mut entry = OutboxEntry::new("orders", "k", "{}");
        assert!(policy.is_due(&entry, failed_at));

        entry.mark_failed("down", failed_at);
        assert!(!policy.is_due(&entry, failed_at + TimeDelta::milliseconds(50)));
        assert!(policy.is_due(&entry, failed_at + TimeDelta::milliseconds(100)));
    }

    #[rstest]
    fn it_should_always_be_due_without_backoff() {
        let policy = RetryPolicy::unbounded();
        let now = Utc::now();
        let mut entry = OutboxEntry::new("orders", "k", "{}");
        entry.mark_failed("down", now);
        assert!(policy.is_due(&entry, now));
    }
}

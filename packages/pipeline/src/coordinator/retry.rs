//! Retry backoff policy: exponential with jitter.

use chrono::Duration;
use rand::Rng;

/// Base delay doubles per prior retry, capped at one hour.
const BASE_DELAY_SECS: i64 = 2;
const MAX_DELAY_SECS: i64 = 3600;

/// Compute the delay before the next retry attempt.
///
/// `multiplier` stretches the schedule for throttling errors. Jitter of
/// up to 50% is added so a burst of failures does not requeue in
/// lockstep.
pub fn backoff_delay(retry_count: i32, multiplier: u32) -> Duration {
    let exp = BASE_DELAY_SECS
        .saturating_mul(2i64.saturating_pow(retry_count.max(0) as u32))
        .saturating_mul(multiplier as i64)
        .min(MAX_DELAY_SECS);

    let jitter_ms = rand::thread_rng().gen_range(0..=exp * 500);
    Duration::seconds(exp) + Duration::milliseconds(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        assert!(backoff_delay(0, 1) < backoff_delay(3, 1));
        assert!(backoff_delay(3, 1) < backoff_delay(8, 1));
    }

    #[test]
    fn delay_is_capped() {
        let delay = backoff_delay(30, 1);
        assert!(delay <= Duration::seconds(MAX_DELAY_SECS) + Duration::milliseconds(MAX_DELAY_SECS * 500));
    }

    #[test]
    fn throttling_multiplier_stretches_schedule() {
        // Max jittered normal delay for retry 0 is 2s + 1s; min throttled is 8s.
        assert!(backoff_delay(0, 4) > Duration::seconds(7));
    }

    #[test]
    fn jitter_stays_within_half_of_base() {
        for _ in 0..50 {
            let delay = backoff_delay(2, 1);
            // 2 * 2^2 = 8s base, jitter adds at most 4s.
            assert!(delay >= Duration::seconds(8));
            assert!(delay <= Duration::seconds(12));
        }
    }
}

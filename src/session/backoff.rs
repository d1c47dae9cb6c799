//! Reconnection backoff.

use std::time::Duration;

/// Ceiling for any single reconnection delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Delay before reconnection attempt `attempt` (1-based).
///
/// `min(base * 2^(attempt - 1), 30s)`. Attempt 0 is treated as 1.
#[must_use]
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_RECONNECT_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence_is_capped() {
        let base = Duration::from_millis(1000);
        let delays: Vec<u128> = (1..=6)
            .map(|attempt| reconnect_delay(base, attempt).as_millis())
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn test_large_attempts_do_not_overflow() {
        let base = Duration::from_millis(5000);
        assert_eq!(reconnect_delay(base, 64), MAX_RECONNECT_DELAY);
        assert_eq!(reconnect_delay(base, u32::MAX), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let base = Duration::from_millis(250);
        assert_eq!(reconnect_delay(base, 0), base);
    }
}

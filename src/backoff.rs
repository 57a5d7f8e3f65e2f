//! Truncated exponential backoff with jitter, shared by the bridge's relay
//! client and the client sync core's reconnector (spec.md §4.6, §4.7).

use std::time::Duration;

use rand::Rng;

/// Base delay for attempt 0.
pub const BASE: Duration = Duration::from_secs(1);

/// Ceiling on the un-jittered delay.
pub const MAX: Duration = Duration::from_secs(60);

/// Maximum number of reconnect attempts before giving up (sync core only;
/// the bridge retries indefinitely while the relay is unreachable).
pub const MAX_RETRIES: u32 = 10;

/// `delay(n) = min(base*2^n, 60s) * (1 ± 0.2*U)`, `U` uniform on `[0,1)`.
#[must_use]
pub fn delay(attempt: u32) -> Duration {
    let base_secs = BASE.as_secs_f64() * 2f64.powi(attempt.min(32) as i32);
    let capped = base_secs.min(MAX.as_secs_f64());

    let jitter = rand::thread_rng().gen_range(-0.2..0.2);
    let jittered = (capped * (1.0 + jitter)).max(0.0);

    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_bounds_match_spec_property() {
        for attempt in 0..10 {
            let expected = BASE.as_secs_f64() * 2f64.powi(attempt as i32);
            let capped = expected.min(MAX.as_secs_f64());

            for _ in 0..200 {
                let d = delay(attempt).as_secs_f64();
                assert!(d >= 0.8 * capped - 1e-9, "attempt {attempt}: {d} < {}", 0.8 * capped);
                assert!(d <= 1.2 * capped + 1e-9, "attempt {attempt}: {d} > {}", 1.2 * capped);
            }
        }
    }

    #[test]
    fn delay_never_exceeds_max_ceiling_even_at_high_attempts() {
        for _ in 0..50 {
            let d = delay(20).as_secs_f64();
            assert!(d <= 1.2 * MAX.as_secs_f64());
        }
    }
}

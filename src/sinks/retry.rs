// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::config::RetrySpec;

/// Backoff schedule for a single request: multiplicative growth from the
/// initial delay, capped, with ±25% jitter applied per attempt.
#[derive(Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiple: f64,
}

impl Backoff {
    pub fn new(spec: &RetrySpec) -> Self {
        Self {
            current: spec.initial_backoff,
            max: spec.max_backoff,
            multiple: if spec.backoff_multiple > 1.0 {
                spec.backoff_multiple
            } else {
                2.0
            },
        }
    }

    /// The delay before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;

        let grown = self.current.mul_f64(self.multiple);
        self.current = std::cmp::min(grown, self.max);

        jitter(base)
    }
}

fn jitter(d: Duration) -> Duration {
    let millis = d.as_millis() as i64;
    let mut half = millis / 2;
    if half == 0 {
        half = 1;
    }
    let offset = (rand::random::<i64>() % half) - (half / 2);
    let jittered = millis + offset;
    Duration::from_millis(jittered.max(1) as u64)
}

/// Whether an HTTP status is worth another attempt. Success needs none;
/// client errors are terminal; everything else is transient.
pub fn status_is_retryable(status: u16) -> bool {
    !(200..300).contains(&status) && !(400..500).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(initial_ms: u64, max_ms: u64, multiple: f64) -> RetrySpec {
        RetrySpec {
            max_retries: 3,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            backoff_multiple: multiple,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(&spec(100, 1000, 2.0));

        // Jitter is ±25%, so each delay is within half a step of its base.
        let d1 = b.next_delay();
        assert!(d1 >= Duration::from_millis(50) && d1 <= Duration::from_millis(150));

        let d2 = b.next_delay();
        assert!(d2 >= Duration::from_millis(100) && d2 <= Duration::from_millis(300));

        b.next_delay(); // base 400
        let d4 = b.next_delay(); // base 800
        let d5 = b.next_delay(); // capped at 1000
        assert!(d4 <= Duration::from_millis(1200));
        assert!(d5 <= Duration::from_millis(1500));
    }

    #[test]
    fn tiny_backoff_does_not_panic() {
        let mut b = Backoff::new(&spec(1, 2, 2.0));
        for _ in 0..10 {
            assert!(b.next_delay() >= Duration::from_millis(1));
        }
    }

    #[test]
    fn degenerate_multiple_falls_back() {
        let mut b = Backoff::new(&spec(100, 1000, 0.0));
        b.next_delay();
        // With the fallback multiple of 2.0 the second base is 200ms.
        let d = b.next_delay();
        assert!(d >= Duration::from_millis(100));
    }

    #[test]
    fn retryable_statuses() {
        for status in [200, 201, 204, 400, 401, 403, 404, 422, 499] {
            assert!(!status_is_retryable(status), "status {}", status);
        }
        for status in [301, 500, 502, 503, 504, 599] {
            assert!(status_is_retryable(status), "status {}", status);
        }
    }
}

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fixed attempt budget with doubling delays.
///
/// The delay after failed attempt `k` is `base_delay * 2^(k-1)`. There is no jitter and no cap
/// other than the attempt budget itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

/// Returned once every attempt has failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts made.
    pub attempts: u32,
    /// Error of the final attempt.
    pub last: E,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` attempts in total (at least one).
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the failed 1-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `operation` until it succeeds or the budget is spent.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = label,
                            attempts = attempt,
                            "Succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if attempt >= self.max_attempts => {
                    tracing::error!(
                        operation = label,
                        attempts = attempt,
                        error = %error,
                        "Giving up after max retries"
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn delay_doubles_from_base() {
        let policy = RetryPolicy::new(5, Duration::from_secs(3));
        assert_eq!(policy.delay_for(1), Duration::from_secs(3));
        assert_eq!(policy.delay_for(2), Duration::from_secs(6));
        assert_eq!(policy.delay_for(4), Duration::from_secs(24));
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts_and_stops_at_budget() {
        let policy = RetryPolicy::new(4, Duration::from_secs(3));
        let start = Instant::now();
        let mut started_at = Vec::new();

        let result: Result<(), _> = policy
            .run("test", |attempt| {
                started_at.push((attempt, start.elapsed()));
                async { Err::<(), _>("boom") }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.last, "boom");
        assert_eq!(
            started_at,
            vec![
                (1, Duration::ZERO),
                (2, Duration::from_secs(3)),
                (3, Duration::from_secs(9)),
                (4, Duration::from_secs(21)),
            ]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_fourth_attempt_is_out_of_budget_for_three() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut calls = 0;

        let result = policy
            .run("test", |attempt| {
                calls += 1;
                async move {
                    if attempt >= 4 {
                        Ok("done")
                    } else {
                        Err("transport")
                    }
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_on_success() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let start = Instant::now();

        let value = policy
            .run("test", |attempt| async move {
                if attempt == 2 { Ok(attempt) } else { Err("flaky") }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }
}

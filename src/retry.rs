//! Bounded exponential backoff for rate-limited embedding calls.
//!
//! [`Backoff`] is a plain policy value; [`Backoff::run`] wraps any async
//! operation that returns [`EmbedError`]. Only [`EmbedError::RateLimited`]
//! is retried. The policy gives up once the next sleep would push the total
//! wait past `max_elapsed`.
//!
//! ```text
//! attempt:   0      1      2      3 ...
//! delay:     -    init  2×init 4×init  (capped at max_delay)
//! jitter:    delay drawn uniformly from [delay/2, delay]
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::embedding::EmbedError;

#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on the total time spent sleeping between attempts.
    pub max_elapsed: Duration,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_elapsed: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let extra = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(extra)
    }

    /// Run `op` until it succeeds, fails permanently, or the wait budget runs
    /// out. On give-up, returns the last rate-limit error.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, EmbedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbedError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(EmbedError::RateLimited(message)) => {
                    attempt += 1;
                    let delay = self.jittered(self.delay_for(attempt));
                    let waited = started.elapsed();
                    if waited + delay > self.max_elapsed {
                        return Err(EmbedError::RateLimited(format!(
                            "{} (gave up after {} attempts, {:.1}s)",
                            message,
                            attempt,
                            waited.as_secs_f64()
                        )));
                    }
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "embedding provider rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_elapsed_ms: u64) -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_elapsed: Duration::from_millis(max_elapsed_ms),
            jitter: false,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let b = Backoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(30),
            jitter: false,
        };
        assert_eq!(b.delay_for(1), Duration::from_millis(100));
        assert_eq!(b.delay_for(2), Duration::from_millis(200));
        assert_eq!(b.delay_for(3), Duration::from_millis(400));
        assert_eq!(b.delay_for(4), Duration::from_millis(500));
        assert_eq!(b.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let b = Backoff {
            jitter: true,
            ..Backoff::default()
        };
        for _ in 0..50 {
            let d = b.jittered(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn test_recovers_after_rate_limits() {
        let calls = &AtomicU32::new(0);
        let result = fast(1000)
            .run(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(EmbedError::RateLimited("429".into()))
                } else {
                    Ok(vec![1.0f32])
                }
            })
            .await;
        assert_eq!(result.unwrap(), vec![1.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_when_budget_exhausted() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(10)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EmbedError::RateLimited("429".into()))
            })
            .await;
        match result {
            Err(EmbedError::RateLimited(msg)) => assert!(msg.contains("gave up")),
            other => panic!("expected rate-limit give-up, got {:?}", other),
        }
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(1000)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EmbedError::Failed("400 bad input".into()))
            })
            .await;
        assert!(matches!(result, Err(EmbedError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

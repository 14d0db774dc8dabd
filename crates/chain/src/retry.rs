//! Shared retry/hedge/backoff combinator.
//!
//! Spec-level design note: verifier and broadcaster both need a
//! "timeout, optional hedge, retry with backoff" shape; this is the one
//! place that shape is implemented. The broadcaster's replacement loop
//! is a fan-out-to-all-endpoints policy, not a primary/secondary hedge,
//! so it does not route through here — only the verifier's per-chunk
//! RPC calls do.

use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub call_timeout: Duration,
    /// Delay before firing a secondary/hedge request. `None` disables
    /// hedging.
    pub hedge_delay: Option<Duration>,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub jitter_frac: f64,
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32, jitter: f64) -> Duration {
        let base_ms = self.backoff_base.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (jitter * 2.0 - 1.0) * self.jitter_frac;
        Duration::from_millis((base_ms * jitter_factor).max(0.0) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    Timeout,
    RetriesExhausted,
}

/// Run `primary` (and, after `hedge_delay`, `secondary` if one is
/// supplied) under `policy`'s timeout, retrying up to `max_retries`
/// times with jittered exponential backoff. Returns the first `Ok`
/// result from either race arm.
///
/// Both closures return boxed futures so a call site can supply `None`
/// for `secondary` without naming an unnameable `async fn` return type.
pub async fn execute_with_policy<T, E>(
    policy: &RetryPolicy,
    mut primary: impl FnMut() -> BoxFuture<'static, Result<T, E>>,
    mut secondary: Option<impl FnMut() -> BoxFuture<'static, Result<T, E>>>,
) -> Result<T, PolicyError> {
    for attempt in 0..=policy.max_retries {
        let primary_fut = primary();
        let result = match (&mut secondary, policy.hedge_delay) {
            (Some(secondary_fn), Some(delay)) if delay > Duration::ZERO => {
                let secondary_fut = secondary_fn();
                let hedged = async move {
                    tokio::select! {
                        r = primary_fut => r,
                        r = async move {
                            tokio::time::sleep(delay).await;
                            secondary_fut.await
                        } => r,
                    }
                };
                tokio_timeout(policy.call_timeout, hedged).await
            }
            _ => tokio_timeout(policy.call_timeout, primary_fut).await,
        };

        match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(_)) | Err(_) => {
                if attempt == policy.max_retries {
                    return Err(if result.is_err() {
                        PolicyError::Timeout
                    } else {
                        PolicyError::RetriesExhausted
                    });
                }
                let jitter = rand::thread_rng().gen_range(0.0..1.0);
                tokio::time::sleep(policy.backoff_for(attempt, jitter)).await;
            }
        }
    }
    Err(PolicyError::RetriesExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_on_first_try() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(100),
            hedge_delay: None,
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            jitter_frac: 0.3,
        };
        let result = execute_with_policy::<u32, &str>(
            &policy,
            || Box::pin(async { Ok(7) }),
            None::<fn() -> BoxFuture<'static, Result<u32, &str>>>,
        )
        .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(100),
            hedge_delay: None,
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            backoff_multiplier: 1.5,
            jitter_frac: 0.1,
        };
        let calls = AtomicU32::new(0);
        let result = execute_with_policy::<u32, &str>(
            &policy,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                })
            },
            None::<fn() -> BoxFuture<'static, Result<u32, &str>>>,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries_and_fails() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(50),
            hedge_delay: None,
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            jitter_frac: 0.0,
        };
        let result = execute_with_policy::<u32, &str>(
            &policy,
            || Box::pin(async { Err("always fails") }),
            None::<fn() -> BoxFuture<'static, Result<u32, &str>>>,
        )
        .await;
        assert_eq!(result, Err(PolicyError::RetriesExhausted));
    }

    #[tokio::test]
    async fn test_hedge_takes_faster_secondary() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(500),
            hedge_delay: Some(Duration::from_millis(10)),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            jitter_frac: 0.0,
        };
        let result = execute_with_policy::<u32, &str>(
            &policy,
            || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(1)
                })
            },
            Some(|| Box::pin(async { Ok::<u32, &str>(2) }) as BoxFuture<'static, Result<u32, &str>>),
        )
        .await;
        assert_eq!(result, Ok(2));
    }
}

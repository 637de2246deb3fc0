//! Shared rate-limit guard. Every REST call the core issues passes
//! through [`RateLimitGuard::run`], which sleeps out any active
//! back-off *before* invoking the call and extends the back-off again
//! on a fresh 429.
//!
//! The mutex is only ever held to read/write the `blocked_until`
//! deadline, never across the sleep or the wrapped call — so one
//! stalled caller can't starve the others' bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::EngineError;

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 60_000;
const JITTER_MS: i64 = 250;

#[derive(Debug, Clone, Copy)]
struct BackoffState {
    blocked_until: Option<Instant>,
    next_delay_ms: u64,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self { blocked_until: None, next_delay_ms: INITIAL_BACKOFF_MS }
    }
}

/// Shared across every adapter call issuer for the same exchange client.
#[derive(Clone)]
pub struct RateLimitGuard {
    state: Arc<Mutex<BackoffState>>,
}

impl Default for RateLimitGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitGuard {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(BackoffState::default())) }
    }

    /// Runs `call`, sleeping first if a prior 429 left us blocked.
    /// `retry_after` lets the caller report a `Retry-After` header
    /// value (seconds) when the failure itself signals one.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, RateLimitOutcome>>,
    {
        self.wait_if_blocked().await;
        match call().await {
            Ok(value) => {
                self.reset().await;
                Ok(value)
            }
            Err(RateLimitOutcome::RateLimited { retry_after_secs }) => {
                self.record_rate_limited(retry_after_secs).await;
                Err(EngineError::AdapterTransient("rate limited".into()))
            }
            Err(RateLimitOutcome::Other(e)) => Err(e),
        }
    }

    async fn wait_if_blocked(&self) {
        let deadline = {
            let state = self.state.lock().await;
            state.blocked_until
        };
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await;
        }
    }

    async fn record_rate_limited(&self, retry_after_secs: Option<u64>) {
        let mut state = self.state.lock().await;
        let delay_ms = match retry_after_secs {
            Some(secs) => secs.saturating_mul(1000),
            None => {
                let jitter: i64 = rand::thread_rng().gen_range(-JITTER_MS..=JITTER_MS);
                (state.next_delay_ms as i64 + jitter).max(0) as u64
            }
        };
        state.blocked_until = Some(Instant::now() + Duration::from_millis(delay_ms));
        state.next_delay_ms = (state.next_delay_ms.saturating_mul(2)).min(MAX_BACKOFF_MS);
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = BackoffState::default();
    }
}

/// What a guarded call reports back, distinguishing "this failed
/// because of rate limiting" from every other error.
pub enum RateLimitOutcome {
    RateLimited { retry_after_secs: Option<u64> },
    Other(EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn successful_call_resets_backoff() {
        let guard = RateLimitGuard::new();
        let result: Result<u32, EngineError> = guard.run(|| async { Ok::<_, RateLimitOutcome>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_call_blocks_the_next_one() {
        let guard = RateLimitGuard::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let first: Result<(), EngineError> = guard
            .run(|| async { Err::<(), _>(RateLimitOutcome::RateLimited { retry_after_secs: Some(5) }) })
            .await;
        assert!(matches!(first, Err(EngineError::AdapterTransient(_))));

        let attempts_clone = attempts.clone();
        let before = Instant::now();
        let second: Result<(), EngineError> = guard
            .run(move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RateLimitOutcome>(())
                }
            })
            .await;
        assert!(second.is_ok());
        assert!(before.elapsed() >= Duration::from_secs(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

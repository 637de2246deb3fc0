//! Position cache: reconciles the push (account stream) and pull (REST)
//! sources of net position into a single value the sync procedure can
//! trust without re-deriving freshness rules at every call site.

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::exchange::ExchangeAdapter;

const FRESH_WINDOW_MS: i64 = 15_000;
const REFRESH_MIN_INTERVAL_MS: i64 = 2_000;

#[derive(Default)]
struct Inner {
    net: Option<Decimal>,
    last_update_at_ms: Option<i64>,
    last_refresh_triggered_at_ms: Option<i64>,
    snapshot_ready: bool,
}

/// Shared by the account-stream callback (push) and the sync procedure
/// (pull, via [`PositionCache::load`]).
pub struct PositionCache {
    inner: Mutex<Inner>,
}

impl Default for PositionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionCache {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// Called on every account-stream position push, whether or not it
    /// matched the traded symbol (absent match -> `net = 0`).
    pub async fn on_push(&self, net: Option<Decimal>, now_ms: i64) {
        let mut inner = self.inner.lock().await;
        inner.net = Some(net.unwrap_or(Decimal::ZERO));
        inner.last_update_at_ms = Some(now_ms);
        inner.snapshot_ready = true;
    }

    /// Invalidates the cache after a FILLED/PARTIALLY_FILLED account
    /// event; the next `load` will trigger a REST refresh.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.lock().await;
        inner.net = None;
    }

    pub async fn snapshot_ready(&self) -> bool {
        self.inner.lock().await.snapshot_ready
    }

    pub async fn last_update_at_ms(&self) -> Option<i64> {
        self.inner.lock().await.last_update_at_ms
    }

    /// Returns the cached value if fresh; otherwise triggers a
    /// rate-limited REST refresh (at most once per 2s) and returns the
    /// refreshed value, falling back to the stale cached value if the
    /// refresh itself fails or was skipped due to the rate limit.
    pub async fn load(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        now_ms: i64,
    ) -> EngineResult<Decimal> {
        {
            let inner = self.inner.lock().await;
            if let (Some(net), Some(updated_at)) = (inner.net, inner.last_update_at_ms) {
                if now_ms - updated_at < FRESH_WINDOW_MS {
                    return Ok(net);
                }
            }
        }

        let should_refresh = {
            let mut inner = self.inner.lock().await;
            let allowed = match inner.last_refresh_triggered_at_ms {
                Some(triggered) => now_ms - triggered >= REFRESH_MIN_INTERVAL_MS,
                None => true,
            };
            if allowed {
                inner.last_refresh_triggered_at_ms = Some(now_ms);
            }
            allowed
        };

        if !should_refresh {
            return self.stale_or_err().await;
        }

        match adapter.get_net_position(symbol).await {
            Ok(net) => {
                let mut inner = self.inner.lock().await;
                inner.net = Some(net);
                inner.last_update_at_ms = Some(now_ms);
                Ok(net)
            }
            Err(_) => self.stale_or_err().await,
        }
    }

    async fn stale_or_err(&self) -> EngineResult<Decimal> {
        let inner = self.inner.lock().await;
        inner.net.ok_or_else(|| {
            EngineError::PreconditionViolation("no usable net position value yet".into())
        })
    }
}

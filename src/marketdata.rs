//! Process-wide quote aggregator: last value per exchange, fanned out
//! to subscribers filtered by exchange list.
//!
//! Dispatch is synchronous on the calling stream callback; there is no
//! buffering beyond "last quote per exchange", matching the adapter's
//! own push cadence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::grid::types::Quote;

/// Snapshot handed to a subscriber on every dispatch: the quote that
/// triggered it plus the full latest-per-exchange map.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub source_exchange: String,
    pub source_quote: Quote,
    pub latest: HashMap<String, Quote>,
}

type Subscriber = Box<dyn Fn(&MarketSnapshot) + Send + Sync>;

struct Subscription {
    exchanges: Vec<String>,
    callback: Subscriber,
}

/// Shared aggregator. Clone to hand out cheap handles; all clones see
/// the same underlying state.
#[derive(Clone, Default)]
pub struct MarketDataHub {
    inner: Arc<RwLock<HubState>>,
}

#[derive(Default)]
struct HubState {
    latest: HashMap<String, Quote>,
    subscribers: Vec<Subscription>,
}

impl MarketDataHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber that only sees dispatches whose source
    /// exchange is in `exchanges`. An empty list means "all exchanges".
    pub fn subscribe(&self, exchanges: Vec<String>, callback: Subscriber) {
        let mut state = self.inner.write().expect("market data hub lock poisoned");
        state.subscribers.push(Subscription { exchanges, callback });
    }

    /// Called by an adapter's quote callback. Updates the last-value
    /// cache for `exchange` and dispatches to every matching subscriber.
    pub fn publish(&self, exchange: &str, quote: Quote) {
        let mut state = self.inner.write().expect("market data hub lock poisoned");
        state.latest.insert(exchange.to_string(), quote);
        let snapshot = MarketSnapshot {
            source_exchange: exchange.to_string(),
            source_quote: quote,
            latest: state.latest.clone(),
        };
        for sub in &state.subscribers {
            if sub.exchanges.is_empty() || sub.exchanges.iter().any(|e| e == exchange) {
                (sub.callback)(&snapshot);
            }
        }
    }

    pub fn get_latest_quote(&self, exchange: &str) -> Option<Quote> {
        self.inner.read().expect("market data hub lock poisoned").latest.get(exchange).copied()
    }

    pub fn get_latest_snapshot(&self) -> HashMap<String, Quote> {
        self.inner.read().expect("market data hub lock poisoned").latest.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use rust_decimal_macros::dec;

    fn quote(mark: rust_decimal::Decimal) -> Quote {
        Quote { bid: mark, ask: mark, mark, ts_ms: 0 }
    }

    #[test]
    fn publish_updates_latest_and_dispatches_to_matching_subscribers() {
        let hub = MarketDataHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        hub.subscribe(vec!["hyperliquid".into()], Box::new(move |_snap| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        hub.publish("hyperliquid", quote(dec!(100)));
        hub.publish("other_venue", quote(dec!(200)));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(hub.get_latest_quote("hyperliquid"), Some(quote(dec!(100))));
        assert_eq!(hub.get_latest_quote("other_venue"), Some(quote(dec!(200))));
        assert_eq!(hub.get_latest_quote("missing"), None);
    }

    #[test]
    fn empty_exchange_list_subscribes_to_everything() {
        let hub = MarketDataHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        hub.subscribe(vec![], Box::new(move |_snap| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));
        hub.publish("a", quote(dec!(1)));
        hub.publish("b", quote(dec!(2)));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn latest_snapshot_holds_only_most_recent_per_exchange() {
        let hub = MarketDataHub::new();
        hub.publish("a", quote(dec!(1)));
        hub.publish("a", quote(dec!(2)));
        let snap = hub.get_latest_snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["a"].mark, dec!(2));
    }
}

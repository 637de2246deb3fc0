//! Exchange abstraction the order manager depends on.
//!
//! Everything here is transport-agnostic: no HTTP/WS types leak out of
//! this module. [`mock`] backs the order-manager tests; [`hyperliquid`]
//! is the real venue.

pub mod hyperliquid;
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::EngineResult;
use crate::grid::types::{OrderStatus, Side};

/// What an adapter can actually do. The engine refuses to start against
/// an adapter missing `mark_price` or `orderbook`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub mark_price: bool,
    pub orderbook: bool,
    pub post_only: bool,
    pub mass_cancel: bool,
}

/// Tick/lot and fee parameters for a symbol, as reported by the venue.
#[derive(Debug, Clone, Copy)]
pub struct MarketConfig {
    pub min_price_change: Decimal,
    pub min_order_size_change: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

/// A market quote pushed from an orderbook/mark-price subscription.
pub use crate::grid::types::Quote;

/// Snapshot of an order as reported by the adapter, keyed by the
/// client-order-id the core assigned when placing it.
#[derive(Debug, Clone)]
pub struct AdapterOrder {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub updated_at_ms: i64,
}

/// A request to place a single resting order.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub client_order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub post_only: bool,
    pub reduce_only: bool,
    pub expire_time_ms: Option<i64>,
}

/// Result of a `place_order` call. An adapter may resolve a terminal
/// outcome (filled or rejected) synchronously rather than leaving the
/// order resting.
#[derive(Debug, Clone)]
pub struct PlaceOrderResult {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
}

/// Account-stream callbacks passed to `subscribe_account`.
pub type OnOrderUpdate = Box<dyn Fn(AdapterOrder) + Send + Sync>;
pub type OnPositionUpdate = Box<dyn Fn(Decimal) + Send + Sync>;
pub type OnQuote = Box<dyn Fn(Quote) + Send + Sync>;

/// Cancels the subscription it was returned from when dropped or when
/// `unsubscribe` is called explicitly; either is valid exactly once.
#[async_trait]
pub trait Unsubscribe: Send + Sync {
    async fn unsubscribe(&self);
}

/// A no-op handle for adapters that never hand out a live subscription
/// (e.g. a mock with no background task to cancel).
pub struct NullUnsubscribe;

#[async_trait]
impl Unsubscribe for NullUnsubscribe {
    async fn unsubscribe(&self) {}
}

/// The contract every venue must satisfy for the order manager to run
/// against it. Adapters own price/size rounding to tick/lot, their own
/// rate-limit back-off (or delegate to [`crate::ratelimit`]), and the
/// mapping from exchange-native status strings to [`OrderStatus`].
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Capabilities;

    /// Canonical symbol (e.g. `"BTC"`) to venue-specific identifier.
    fn resolve_exchange_symbol(&self, symbol: &str) -> EngineResult<String>;

    /// Idempotent; required before any other operation, though an
    /// adapter may choose to await it implicitly on first use.
    async fn connect(&self) -> EngineResult<()>;
    /// Idempotent.
    async fn disconnect(&self) -> EngineResult<()>;

    async fn subscribe_orderbook(
        &self,
        symbol: &str,
        on_quote: OnQuote,
    ) -> EngineResult<Box<dyn Unsubscribe>>;

    /// `on_position_updates` is optional: adapters without a native
    /// position-push stream may leave it uncalled and rely on REST
    /// refresh via [`ExchangeAdapter::get_net_position`] instead.
    async fn subscribe_account(
        &self,
        on_order_updates: OnOrderUpdate,
        on_position_updates: Option<OnPositionUpdate>,
    ) -> EngineResult<Box<dyn Unsubscribe>>;

    async fn get_market_config(&self, symbol: &str) -> EngineResult<MarketConfig>;

    /// Signed net size: LONG positive, SHORT negative.
    async fn get_net_position(&self, symbol: &str) -> EngineResult<Decimal>;

    async fn get_order_by_client_order_id(
        &self,
        client_order_id: &str,
    ) -> EngineResult<Option<AdapterOrder>>;

    async fn get_open_orders(&self, symbol: &str) -> EngineResult<Vec<AdapterOrder>>;

    async fn get_orders_history(
        &self,
        symbol: &str,
        since_ms: i64,
    ) -> EngineResult<Vec<AdapterOrder>>;

    async fn place_order(&self, req: PlaceOrderRequest) -> EngineResult<PlaceOrderResult>;

    async fn cancel_order_by_external_id(&self, client_order_id: &str) -> EngineResult<()>;

    /// Optional; callers must check `capabilities().mass_cancel` first.
    async fn mass_cancel(&self, symbol: &str) -> EngineResult<u32> {
        let _ = symbol;
        Err(crate::error::EngineError::CapabilityUnmet(
            "mass_cancel not supported by this adapter".into(),
        ))
    }
}

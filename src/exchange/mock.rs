//! In-memory adapter for exercising the order manager without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{
    AdapterOrder, Capabilities, ExchangeAdapter, MarketConfig, NullUnsubscribe, OnOrderUpdate,
    OnPositionUpdate, OnQuote, PlaceOrderRequest, PlaceOrderResult, Quote, Unsubscribe,
};
use crate::error::{EngineError, EngineResult};
use crate::grid::types::OrderStatus;

/// Fully in-memory [`ExchangeAdapter`]. Orders placed via `place_order`
/// rest until the test calls [`MockAdapter::fill`] or
/// [`MockAdapter::reject`]; nothing resolves on its own.
pub struct MockAdapter {
    capabilities: Capabilities,
    market_config: MarketConfig,
    net_position: Mutex<Decimal>,
    orders: Mutex<HashMap<String, AdapterOrder>>,
    should_fail_place: Mutex<bool>,
    next_exchange_id: AtomicU64,
    order_update_sink: Mutex<Option<OnOrderUpdate>>,
}

impl MockAdapter {
    pub fn new(market_config: MarketConfig) -> Self {
        Self {
            capabilities: Capabilities { mark_price: true, orderbook: true, post_only: true, mass_cancel: true },
            market_config,
            net_position: Mutex::new(Decimal::ZERO),
            orders: Mutex::new(HashMap::new()),
            should_fail_place: Mutex::new(false),
            next_exchange_id: AtomicU64::new(1),
            order_update_sink: Mutex::new(None),
        }
    }

    pub async fn set_should_fail_place(&self, fail: bool) {
        *self.should_fail_place.lock().await = fail;
    }

    pub async fn set_net_position(&self, position: Decimal) {
        *self.net_position.lock().await = position;
    }

    pub async fn push_quote(&self, on_quote_calls: &[OnQuote], quote: Quote) {
        for cb in on_quote_calls {
            cb(quote);
        }
    }

    /// Marks an order filled and, if a subscriber is attached, pushes the update.
    pub async fn fill(&self, client_order_id: &str, fill_qty: Decimal, now_ms: i64) -> EngineResult<()> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(client_order_id)
            .ok_or_else(|| EngineError::UnknownOrder(client_order_id.to_string()))?;
        order.filled_quantity += fill_qty;
        order.status = if order.filled_quantity >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at_ms = now_ms;
        let snapshot = order.clone();
        drop(orders);
        if let Some(cb) = self.order_update_sink.lock().await.as_ref() {
            cb(snapshot);
        }
        Ok(())
    }

    pub async fn reject(&self, client_order_id: &str, now_ms: i64) -> EngineResult<()> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(client_order_id)
            .ok_or_else(|| EngineError::UnknownOrder(client_order_id.to_string()))?;
        order.status = OrderStatus::Rejected;
        order.updated_at_ms = now_ms;
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn resolve_exchange_symbol(&self, symbol: &str) -> EngineResult<String> {
        Ok(symbol.to_string())
    }

    async fn connect(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn subscribe_orderbook(&self, _symbol: &str, _on_quote: OnQuote) -> EngineResult<Box<dyn Unsubscribe>> {
        Ok(Box::new(NullUnsubscribe))
    }

    async fn subscribe_account(
        &self,
        on_order_updates: OnOrderUpdate,
        _on_position_updates: Option<OnPositionUpdate>,
    ) -> EngineResult<Box<dyn Unsubscribe>> {
        *self.order_update_sink.lock().await = Some(on_order_updates);
        Ok(Box::new(NullUnsubscribe))
    }

    async fn get_market_config(&self, _symbol: &str) -> EngineResult<MarketConfig> {
        Ok(self.market_config)
    }

    async fn get_net_position(&self, _symbol: &str) -> EngineResult<Decimal> {
        Ok(*self.net_position.lock().await)
    }

    async fn get_order_by_client_order_id(&self, client_order_id: &str) -> EngineResult<Option<AdapterOrder>> {
        Ok(self.orders.lock().await.get(client_order_id).cloned())
    }

    async fn get_open_orders(&self, _symbol: &str) -> EngineResult<Vec<AdapterOrder>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_orders_history(&self, _symbol: &str, since_ms: i64) -> EngineResult<Vec<AdapterOrder>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.updated_at_ms >= since_ms)
            .cloned()
            .collect())
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> EngineResult<PlaceOrderResult> {
        if *self.should_fail_place.lock().await {
            return Err(EngineError::AdapterTransient("mock place_order failure".into()));
        }
        let exchange_order_id = self.next_exchange_id.fetch_add(1, Ordering::SeqCst).to_string();
        let order = AdapterOrder {
            client_order_id: req.client_order_id.clone(),
            exchange_order_id: Some(exchange_order_id.clone()),
            status: OrderStatus::Acked,
            side: req.side,
            price: req.price,
            quantity: req.quantity,
            filled_quantity: Decimal::ZERO,
            updated_at_ms: req.expire_time_ms.unwrap_or(0),
        };
        self.orders.lock().await.insert(req.client_order_id.clone(), order);
        Ok(PlaceOrderResult {
            client_order_id: req.client_order_id,
            exchange_order_id: Some(exchange_order_id),
            status: OrderStatus::Acked,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
        })
    }

    async fn cancel_order_by_external_id(&self, client_order_id: &str) -> EngineResult<()> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(client_order_id)
            .ok_or_else(|| EngineError::UnknownOrder(client_order_id.to_string()))?;
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn mass_cancel(&self, _symbol: &str) -> EngineResult<u32> {
        let mut orders = self.orders.lock().await;
        let mut count = 0;
        for order in orders.values_mut() {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Cancelled;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::Side;
    use rust_decimal_macros::dec;

    fn market_config() -> MarketConfig {
        MarketConfig {
            min_price_change: dec!(0.1),
            min_order_size_change: dec!(0.001),
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0005),
        }
    }

    fn place_req(id: &str, side: Side, price: Decimal, qty: Decimal) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "BTC".into(),
            client_order_id: id.into(),
            side,
            price,
            quantity: qty,
            post_only: true,
            reduce_only: false,
            expire_time_ms: None,
        }
    }

    #[tokio::test]
    async fn place_then_get_order_round_trips() {
        let adapter = MockAdapter::new(market_config());
        adapter.place_order(place_req("o1", Side::Buy, dec!(100), dec!(1))).await.unwrap();
        let fetched = adapter.get_order_by_client_order_id("o1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Acked);
        assert_eq!(fetched.price, dec!(100));
    }

    #[tokio::test]
    async fn fill_transitions_to_filled_when_fully_matched() {
        let adapter = MockAdapter::new(market_config());
        adapter.place_order(place_req("o1", Side::Buy, dec!(100), dec!(1))).await.unwrap();
        adapter.fill("o1", dec!(1), 10).await.unwrap();
        let fetched = adapter.get_order_by_client_order_id("o1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn partial_fill_stays_open() {
        let adapter = MockAdapter::new(market_config());
        adapter.place_order(place_req("o1", Side::Buy, dec!(100), dec!(2))).await.unwrap();
        adapter.fill("o1", dec!(1), 10).await.unwrap();
        let fetched = adapter.get_order_by_client_order_id("o1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::PartiallyFilled);
    }

    #[tokio::test]
    async fn cancel_marks_order_cancelled() {
        let adapter = MockAdapter::new(market_config());
        adapter.place_order(place_req("o1", Side::Buy, dec!(100), dec!(1))).await.unwrap();
        adapter.cancel_order_by_external_id("o1").await.unwrap();
        let fetched = adapter.get_order_by_client_order_id("o1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn mass_cancel_only_touches_open_orders() {
        let adapter = MockAdapter::new(market_config());
        adapter.place_order(place_req("o1", Side::Buy, dec!(100), dec!(1))).await.unwrap();
        adapter.place_order(place_req("o2", Side::Sell, dec!(110), dec!(1))).await.unwrap();
        adapter.fill("o2", dec!(1), 10).await.unwrap();
        let cancelled = adapter.mass_cancel("BTC").await.unwrap();
        assert_eq!(cancelled, 1);
        assert_eq!(adapter.get_open_orders("BTC").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn place_order_respects_failure_flag() {
        let adapter = MockAdapter::new(market_config());
        adapter.set_should_fail_place(true).await;
        let result = adapter.place_order(place_req("o1", Side::Buy, dec!(100), dec!(1))).await;
        assert!(matches!(result, Err(EngineError::AdapterTransient(_))));
    }
}

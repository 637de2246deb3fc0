//! Periodic and cancel-failure reconciliation against the exchange's
//! view of open orders.
//!
//! Local state is authoritative for `level_index` and `placed_at_ms`
//! (the exchange has no notion of either); the exchange is authoritative
//! for `status` and `exchange_order_id`. Reconciliation only ever pulls
//! the latter into the former, never the reverse.

use std::collections::HashSet;

use log::warn;

use crate::error::EngineResult;
use crate::grid::types::{parse_client_order_id, GridOrderState, OrderStatus};

use super::GridManager;

impl GridManager {
    /// Fetches all open orders for the traded symbol and merges any that
    /// belong to this strategy instance into local state. Locally-open
    /// orders absent from the exchange's list are reconciled individually,
    /// since "not listed as open" is ambiguous between filled, cancelled,
    /// and never-acked.
    pub(super) async fn periodic_reconcile(&mut self, now_ms: i64) -> EngineResult<()> {
        let open = self.adapter.get_open_orders(&self.config.symbol).await?;
        let mut remote_ids: HashSet<String> = HashSet::new();

        for remote in open {
            remote_ids.insert(remote.client_order_id.clone());

            let owned = parse_client_order_id(&remote.client_order_id)
                .map(|p| p.strategy_id == self.config.strategy_id && p.symbol == self.config.symbol)
                .unwrap_or(false);
            if !owned {
                continue;
            }

            if let Some(local) = self.state.orders.get(&remote.client_order_id).cloned() {
                let merged = GridOrderState {
                    client_order_id: local.client_order_id,
                    exchange_order_id: remote.exchange_order_id.or(local.exchange_order_id),
                    status: remote.status,
                    side: local.side,
                    price: local.price,
                    quantity: local.quantity,
                    level_index: local.level_index,
                    placed_at_ms: local.placed_at_ms,
                    updated_at_ms: now_ms,
                };
                self.record_and_upsert(merged, now_ms);
            }
        }

        let locally_open: Vec<GridOrderState> = self
            .state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        for order in locally_open {
            if !remote_ids.contains(&order.client_order_id) {
                self.reconcile_single_order(&order, now_ms).await;
            }
        }

        self.last_reconcile_at_ms = Some(now_ms);
        Ok(())
    }

    /// Looks `order` up by client-order-id and adopts whatever the
    /// exchange reports; an order the exchange has never heard of is
    /// marked `Unknown` rather than assumed cancelled, since a transient
    /// network failure on the original place call looks identical.
    ///
    /// Takes the snapshot directly rather than re-reading
    /// `self.state.orders`, since callers reach this after a cancel
    /// failure where the order may already be gone from that table
    /// (shifted out of range, or cleared by a `reset`) — without a
    /// snapshot to fall back on, both outcomes below would silently
    /// no-op and the sink would never see the order's final status.
    pub(super) async fn reconcile_single_order(&mut self, order: &GridOrderState, now_ms: i64) {
        match self.adapter.get_order_by_client_order_id(&order.client_order_id).await {
            Ok(Some(remote)) => {
                let mut updated = order.clone();
                updated.status = remote.status;
                updated.exchange_order_id = remote.exchange_order_id.or(updated.exchange_order_id);
                updated.updated_at_ms = now_ms;
                self.record_and_upsert(updated, now_ms);
            }
            Ok(None) => {
                let mut updated = order.clone();
                updated.status = OrderStatus::Unknown;
                updated.updated_at_ms = now_ms;
                self.record_and_upsert(updated, now_ms);
            }
            Err(e) => {
                warn!("reconcile_single_order failed for {}: {e}", order.client_order_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockAdapter;
    use crate::exchange::{ExchangeAdapter, MarketConfig, PlaceOrderRequest};
    use crate::grid::types::Side;
    use crate::manager::ManagerConfig;
    use crate::sink::{OrderRecord, OrderSink};
    use crate::grid::{GeometryConfig, SpacingMode};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct NullSink;
    #[async_trait::async_trait]
    impl OrderSink for NullSink {
        async fn record_order(&self, _record: OrderRecord) {}
    }

    fn market_config() -> MarketConfig {
        MarketConfig {
            min_price_change: dec!(0.1),
            min_order_size_change: dec!(0.001),
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0005),
        }
    }

    fn config() -> ManagerConfig {
        ManagerConfig {
            strategy_id: "grid-default".into(),
            symbol: "BTC".into(),
            geometry: GeometryConfig { mode: SpacingMode::Abs, spacing: dec!(10), spacing_percent: Decimal::ZERO, levels: 3 },
            quantity: dec!(1),
            post_only: false,
            cancel_timeout_ms: 10_000,
            max_position: dec!(100),
            max_open_orders: 50,
            mark_shift_confirm_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn periodic_reconcile_merges_remote_status_while_order_stays_open() {
        let adapter = Arc::new(MockAdapter::new(market_config()));
        let (mut manager, _handle) = GridManager::new(config(), adapter.clone(), Arc::new(NullSink));
        manager.state.reset(&config().geometry, dec!(100), 0);

        let client_order_id = "grid-default-BTC-BUY--1-0".to_string();
        adapter
            .place_order(PlaceOrderRequest {
                symbol: "BTC".into(),
                client_order_id: client_order_id.clone(),
                side: Side::Buy,
                price: dec!(90),
                quantity: dec!(2),
                post_only: false,
                reduce_only: false,
                expire_time_ms: None,
            })
            .await
            .unwrap();
        manager.state.upsert_order(GridOrderState {
            client_order_id: client_order_id.clone(),
            exchange_order_id: Some("1".into()),
            status: OrderStatus::Acked,
            side: Side::Buy,
            price: dec!(90),
            quantity: dec!(2),
            level_index: -1,
            placed_at_ms: 0,
            updated_at_ms: 0,
        });

        // Partial fill keeps the order in the exchange's open-orders list,
        // exercising the merge path rather than the unlisted-order path.
        adapter.fill(&client_order_id, dec!(1), 5_000).await.unwrap();
        manager.periodic_reconcile(6_000).await.unwrap();

        let merged = manager.state().orders.get(&client_order_id).unwrap();
        assert_eq!(merged.status, OrderStatus::PartiallyFilled);
        assert_eq!(merged.level_index, -1);
    }

    #[tokio::test]
    async fn locally_open_but_unlisted_order_is_marked_unknown() {
        let adapter = Arc::new(MockAdapter::new(market_config()));
        let (mut manager, _handle) = GridManager::new(config(), adapter.clone(), Arc::new(NullSink));
        manager.state.reset(&config().geometry, dec!(100), 0);

        manager.state.upsert_order(GridOrderState {
            client_order_id: "ghost-order".into(),
            exchange_order_id: None,
            status: OrderStatus::Acked,
            side: Side::Buy,
            price: dec!(90),
            quantity: dec!(1),
            level_index: -1,
            placed_at_ms: 0,
            updated_at_ms: 0,
        });

        manager.periodic_reconcile(1_000).await.unwrap();
        let order = manager.state().orders.get("ghost-order").unwrap();
        assert_eq!(order.status, OrderStatus::Unknown);
    }
}

//! The order manager: the single writer of grid state and the sole
//! issuer of place/cancel commands. Everything else — the market-data
//! hub, the account stream, the tick driver — feeds it through
//! [`WorkQueueHandle`]; nothing else touches [`crate::grid::GridState`]
//! directly.

mod position;
mod reconcile;

pub use position::PositionCache;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::error::{EngineError, EngineResult};
use crate::exchange::{AdapterOrder, ExchangeAdapter, PlaceOrderRequest};
use crate::grid::types::{
    format_client_order_id, parse_client_order_id, GridOrderState, OrderStatus, Quote, Side,
    TargetSide,
};
use crate::grid::{risk, GeometryConfig, GridState};
use crate::sink::{OrderRecord, OrderSink};

/// Parameters fixed for the lifetime of one grid strategy instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub strategy_id: String,
    pub symbol: String,
    pub geometry: GeometryConfig,
    pub quantity: Decimal,
    pub post_only: bool,
    pub cancel_timeout_ms: i64,
    pub max_position: Decimal,
    pub max_open_orders: usize,
    pub mark_shift_confirm_ms: i64,
}

/// Commands the tick driver feeds in alongside live quotes and order
/// updates.
#[derive(Debug, Clone, Copy)]
pub enum ManagerCommand {
    /// Cancel-on-timeout sweep, independent of any specific quote.
    Maintenance,
    Reconcile,
}

/// Tracks an in-progress mark-shift confirmation window (§4.5.1).
#[derive(Debug, Clone, Copy)]
struct ShiftConfirm {
    started_at_ms: i64,
    sign: i8,
}

/// Published for the health checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSnapshot {
    pub center_price: Option<Decimal>,
    pub last_quote_ts_ms: Option<i64>,
    pub last_order_update_at_ms: Option<i64>,
    pub last_position_update_at_ms: Option<i64>,
    pub last_maintenance_at_ms: Option<i64>,
    pub last_reconcile_at_ms: Option<i64>,
}

/// A cheaply-cloneable handle onto the manager's latest published
/// status. The manager remains the sole writer (refreshed after every
/// processed work unit in `run`); a health-check task reads through
/// this lock directly instead of being routed through the work queue.
pub type SharedStatus = Arc<tokio::sync::RwLock<StatusSnapshot>>;

/// Cloneable set of senders handed to the market-data hub, the account
/// stream subscription, and the tick driver. Pushing never blocks and
/// never fails silently-except-logged: an unbounded channel backs every
/// slot, and a closed receiver (manager task gone) means shutdown is
/// already in progress.
#[derive(Clone)]
pub struct WorkQueueHandle {
    quote_tx: mpsc::UnboundedSender<Quote>,
    order_update_tx: mpsc::UnboundedSender<AdapterOrder>,
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl WorkQueueHandle {
    pub fn push_quote(&self, quote: Quote) {
        let _ = self.quote_tx.send(quote);
    }

    pub fn push_order_update(&self, order: AdapterOrder) {
        let _ = self.order_update_tx.send(order);
    }

    pub fn push_command(&self, command: ManagerCommand) {
        let _ = self.command_tx.send(command);
    }
}

pub struct GridManager {
    config: ManagerConfig,
    adapter: Arc<dyn ExchangeAdapter>,
    sink: Arc<dyn OrderSink>,
    state: GridState,
    position: PositionCache,
    pending_cancels: HashSet<String>,
    shift_confirm: Option<ShiftConfirm>,
    sequence: AtomicU64,
    fill_queue: VecDeque<i32>,
    latest_quote: Option<Quote>,
    last_order_update_at_ms: Option<i64>,
    last_maintenance_at_ms: Option<i64>,
    last_reconcile_at_ms: Option<i64>,
    status_handle: SharedStatus,

    quote_rx: mpsc::UnboundedReceiver<Quote>,
    order_update_rx: mpsc::UnboundedReceiver<AdapterOrder>,
    command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
}

impl GridManager {
    pub fn new(
        config: ManagerConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        sink: Arc<dyn OrderSink>,
    ) -> (Self, WorkQueueHandle) {
        let (quote_tx, quote_rx) = mpsc::unbounded_channel();
        let (order_update_tx, order_update_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let manager = Self {
            config,
            adapter,
            sink,
            state: GridState::new(),
            position: PositionCache::new(),
            pending_cancels: HashSet::new(),
            shift_confirm: None,
            sequence: AtomicU64::new(0),
            fill_queue: VecDeque::new(),
            latest_quote: None,
            last_order_update_at_ms: None,
            last_maintenance_at_ms: None,
            last_reconcile_at_ms: None,
            status_handle: Arc::new(tokio::sync::RwLock::new(StatusSnapshot::default())),
            quote_rx,
            order_update_rx,
            command_rx,
        };
        let handle = WorkQueueHandle { quote_tx, order_update_tx, command_tx };
        (manager, handle)
    }

    /// Returns a clone of the shared status handle. Must be called before
    /// `run` consumes `self` by value.
    pub fn status_handle(&self) -> SharedStatus {
        self.status_handle.clone()
    }

    pub async fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            center_price: self.state.center_price,
            last_quote_ts_ms: self.state.last_quote_ts_ms,
            last_order_update_at_ms: self.last_order_update_at_ms,
            last_position_update_at_ms: self.position.last_update_at_ms().await,
            last_maintenance_at_ms: self.last_maintenance_at_ms,
            last_reconcile_at_ms: self.last_reconcile_at_ms,
        }
    }

    /// Recomputes the snapshot and publishes it to `status_handle`. Called
    /// after every processed work unit in `run` so a reader never sees
    /// state older than the manager's last completed step.
    async fn publish_status(&self) {
        let snapshot = self.status().await;
        *self.status_handle.write().await = snapshot;
    }

    /// The event loop. Drains order updates first (they populate the
    /// fill queue), then fill shifts, then the single pending quote
    /// slot, then maintenance/reconcile commands — each work unit runs
    /// to completion before the next is considered.
    pub async fn run(mut self) {
        loop {
            while let Ok(order) = self.order_update_rx.try_recv() {
                self.ingest_order_update(order, now_ms()).await;
                self.publish_status().await;
            }
            if let Some(level_index) = self.fill_queue.pop_front() {
                self.process_fill(level_index, now_ms()).await;
                self.publish_status().await;
                continue;
            }
            let mut latest_quote = None;
            while let Ok(q) = self.quote_rx.try_recv() {
                latest_quote = Some(q);
            }
            if let Some(quote) = latest_quote {
                if let Err(e) = self.process_quote(quote, now_ms()).await {
                    warn!("quote processing failed: {e}");
                }
                self.publish_status().await;
                continue;
            }
            if let Ok(command) = self.command_rx.try_recv() {
                self.handle_command(command, now_ms()).await;
                self.publish_status().await;
                continue;
            }

            tokio::select! {
                biased;
                Some(order) = self.order_update_rx.recv() => {
                    self.ingest_order_update(order, now_ms()).await;
                    self.publish_status().await;
                }
                Some(quote) = self.quote_rx.recv() => {
                    if let Err(e) = self.process_quote(quote, now_ms()).await {
                        warn!("quote processing failed: {e}");
                    }
                    self.publish_status().await;
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command, now_ms()).await;
                    self.publish_status().await;
                }
                else => break,
            }
        }
    }

    async fn handle_command(&mut self, command: ManagerCommand, now_ms: i64) {
        match command {
            ManagerCommand::Maintenance => {
                if let Err(e) = self.cancel_on_timeout_sweep(now_ms).await {
                    warn!("maintenance sweep failed: {e}");
                }
                self.last_maintenance_at_ms = Some(now_ms);
                if let Err(e) = self.sync(now_ms).await {
                    warn!("maintenance sync failed: {e}");
                }
            }
            ManagerCommand::Reconcile => {
                if let Err(e) = self.periodic_reconcile(now_ms).await {
                    warn!("reconcile failed: {e}");
                }
            }
        }
    }

    /// Records a locally-observed order-state mutation: updates the
    /// status snapshot timestamp, writes to state, and fires the sink
    /// write without awaiting it.
    fn record_and_upsert(&mut self, order: GridOrderState, now_ms: i64) {
        self.last_order_update_at_ms = Some(now_ms);
        let record = OrderRecord {
            exchange: self.adapter.name().to_string(),
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: order.exchange_order_id.clone(),
            symbol: self.config.symbol.clone(),
            side: order.side,
            level_index: order.level_index,
            price: order.price,
            quantity: order.quantity,
            filled_quantity: Decimal::ZERO,
            status: order.status,
            exchange_status_raw: None,
            created_at_ms: order.placed_at_ms,
            updated_at_ms: order.updated_at_ms,
        };
        self.state.upsert_order(order);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            sink.record_order(record).await;
        });
    }

    /// Applies a raw account-stream update to local state and, when it
    /// is a fresh FILL away from the center, enqueues a fill-shift.
    async fn ingest_order_update(&mut self, adapter_order: AdapterOrder, now_ms: i64) {
        let parsed = parse_client_order_id(&adapter_order.client_order_id);
        if let Some(parsed) = &parsed {
            if parsed.strategy_id != self.config.strategy_id || parsed.symbol != self.config.symbol {
                return;
            }
        }
        let existing = self.state.orders.get(&adapter_order.client_order_id).cloned();
        let level_index = existing
            .as_ref()
            .map(|o| o.level_index)
            .or_else(|| parsed.as_ref().map(|p| p.level_index))
            .unwrap_or(0);
        let placed_at_ms = existing.as_ref().map(|o| o.placed_at_ms).unwrap_or(now_ms);
        let fresh_fill = adapter_order.status == OrderStatus::Filled
            && existing.as_ref().map(|o| o.status) != Some(OrderStatus::Filled);
        let invalidates_position = matches!(
            adapter_order.status,
            OrderStatus::Filled | OrderStatus::PartiallyFilled
        );

        let order = GridOrderState {
            client_order_id: adapter_order.client_order_id,
            exchange_order_id: adapter_order.exchange_order_id,
            status: adapter_order.status,
            side: adapter_order.side,
            price: adapter_order.price,
            quantity: adapter_order.quantity,
            level_index,
            placed_at_ms,
            updated_at_ms: now_ms,
        };
        self.record_and_upsert(order, now_ms);

        if invalidates_position {
            self.position.invalidate().await;
        }
        if fresh_fill && level_index != 0 {
            self.fill_queue.push_back(level_index);
        }
    }

    async fn process_quote(&mut self, quote: Quote, now_ms: i64) -> EngineResult<()> {
        self.latest_quote = Some(quote);
        self.state.update_mark(quote.mark, now_ms);

        let Some(center) = self.state.center_price else {
            self.state.reset(&self.config.geometry, quote.mark, now_ms);
            self.cancel_all_managed_open_orders(now_ms).await?;
            return self.sync(now_ms).await;
        };

        self.cancel_on_timeout_sweep(now_ms).await?;

        let steps = self.config.geometry.steps(center, quote.mark)?;
        if steps == 0 {
            self.shift_confirm = None;
            return self.sync(now_ms).await;
        }
        if steps.abs() >= self.config.geometry.levels {
            self.state.reset(&self.config.geometry, quote.mark, now_ms);
            self.cancel_all_managed_open_orders(now_ms).await?;
            return self.sync(now_ms).await;
        }
        if steps.abs() < 2 {
            self.shift_confirm = None;
            return self.sync(now_ms).await;
        }

        let sign: i8 = if steps > 0 { 1 } else { -1 };
        let confirmed = match self.shift_confirm {
            Some(existing) if existing.sign == sign => {
                now_ms - existing.started_at_ms >= self.config.mark_shift_confirm_ms
            }
            _ => {
                self.shift_confirm = Some(ShiftConfirm { started_at_ms: now_ms, sign });
                false
            }
        };
        if !confirmed {
            return self.sync(now_ms).await;
        }

        self.shift_confirm = None;
        let result = self.state.shift_center(&self.config.geometry, steps, now_ms);
        self.cancel_orders(&result.out_of_range_orders, now_ms).await;
        self.sync(now_ms).await
    }

    async fn process_fill(&mut self, level_index: i32, now_ms: i64) {
        if level_index == 0 || self.state.center_price.is_none() {
            return;
        }
        self.shift_confirm = None;
        let result = self.state.shift_center(&self.config.geometry, level_index, now_ms);
        self.cancel_orders(&result.out_of_range_orders, now_ms).await;
        if let Err(e) = self.sync(now_ms).await {
            warn!("sync after fill-driven shift failed: {e}");
        }
    }

    /// Cancels every managed open order reported by the exchange; used
    /// on first-quote and full-rebuild, where local state was just
    /// cleared and can no longer identify what it previously placed.
    /// Builds a snapshot from the exchange's own report (rather than a
    /// local lookup, since there is nothing local left to find) so the
    /// cancel path still has an order to mark terminal and hand to the
    /// sink.
    async fn cancel_all_managed_open_orders(&mut self, now_ms: i64) -> EngineResult<()> {
        let open = self.adapter.get_open_orders(&self.config.symbol).await?;
        for adapter_order in open {
            let parsed = parse_client_order_id(&adapter_order.client_order_id);
            let owned = parsed
                .as_ref()
                .map(|p| p.strategy_id == self.config.strategy_id && p.symbol == self.config.symbol)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            let level_index = parsed.map(|p| p.level_index).unwrap_or(0);
            let snapshot = GridOrderState {
                client_order_id: adapter_order.client_order_id,
                exchange_order_id: adapter_order.exchange_order_id,
                status: adapter_order.status,
                side: adapter_order.side,
                price: adapter_order.price,
                quantity: adapter_order.quantity,
                level_index,
                placed_at_ms: adapter_order.updated_at_ms,
                updated_at_ms: adapter_order.updated_at_ms,
            };
            self.cancel_order_with_reconciliation(snapshot, now_ms).await;
        }
        Ok(())
    }

    async fn cancel_orders(&mut self, orders: &[GridOrderState], now_ms: i64) {
        for order in orders {
            self.cancel_order_with_reconciliation(order.clone(), now_ms).await;
        }
    }

    /// Cancels `order` and marks it terminal on success, or falls back to
    /// reconciliation on failure. Operates on the snapshot the caller
    /// already holds rather than re-reading `self.state.orders`, since by
    /// the time this runs the order may already be absent from that table
    /// (shifted out of range, or dropped by a `reset`).
    async fn cancel_order_with_reconciliation(&mut self, order: GridOrderState, now_ms: i64) {
        let client_order_id = order.client_order_id.clone();
        if self.pending_cancels.contains(&client_order_id) {
            return;
        }
        self.pending_cancels.insert(client_order_id.clone());
        match self.adapter.cancel_order_by_external_id(&client_order_id).await {
            Ok(()) => {
                let mut cancelled = order;
                cancelled.status = OrderStatus::Cancelled;
                cancelled.updated_at_ms = now_ms;
                self.record_and_upsert(cancelled, now_ms);
            }
            Err(e) => {
                warn!("cancel failed for {client_order_id}: {e}; reconciling");
                self.reconcile_single_order(&order, now_ms).await;
            }
        }
        self.pending_cancels.remove(&client_order_id);
    }

    async fn cancel_on_timeout_sweep(&mut self, now_ms: i64) -> EngineResult<()> {
        let candidates: Vec<GridOrderState> = self
            .state
            .orders
            .values()
            .filter(|o| {
                o.status.is_cancel_candidate()
                    && now_ms - o.placed_at_ms >= self.config.cancel_timeout_ms
                    && !self.pending_cancels.contains(&o.client_order_id)
            })
            .cloned()
            .collect();
        for order in candidates {
            self.cancel_order_with_reconciliation(order, now_ms).await;
        }
        Ok(())
    }

    /// Level -> order reconciliation (§4.5.2). Skips the pass entirely
    /// (rather than failing) when preconditions aren't met, since a
    /// missing center or position value is a transient startup state.
    async fn sync(&mut self, now_ms: i64) -> EngineResult<()> {
        if self.state.center_price.is_none() {
            return Ok(());
        }
        if !self.position.snapshot_ready().await {
            warn!("sync skipped: position snapshot not ready");
            return Ok(());
        }
        let net_position = match self.position.load(self.adapter.as_ref(), &self.config.symbol, now_ms).await {
            Ok(v) => v,
            Err(e) => {
                warn!("sync skipped: {e}");
                return Ok(());
            }
        };

        let mut indices: Vec<i32> = self.state.levels.keys().copied().collect();
        indices.sort_unstable();

        for index in indices {
            let level = match self.state.levels.get(&index) {
                Some(l) => *l,
                None => continue,
            };
            let side = match level.target_side {
                TargetSide::None => continue,
                TargetSide::Buy => Side::Buy,
                TargetSide::Sell => Side::Sell,
            };
            if self.state.bound_order_at(index).is_some() {
                continue;
            }
            let active_count = self.state.orders.values().filter(|o| !o.status.is_terminal()).count();
            if active_count >= self.config.max_open_orders {
                break;
            }
            let (pending_buy, pending_sell) = self.state.pending_quantities();
            if !risk::admits(side, net_position, pending_buy, pending_sell, self.config.quantity, self.config.max_position) {
                continue;
            }
            if self.post_only_guard_blocks(side, level.price) {
                continue;
            }
            self.place_level_order(side, level.index, level.price, now_ms).await;
        }
        Ok(())
    }

    fn post_only_guard_blocks(&self, side: Side, price: Decimal) -> bool {
        if !self.config.post_only {
            return false;
        }
        match &self.latest_quote {
            None => true,
            Some(q) => match side {
                Side::Buy => price >= q.ask,
                Side::Sell => price <= q.bid,
            },
        }
    }

    async fn place_level_order(&mut self, side: Side, level_index: i32, price: Decimal, now_ms: i64) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let client_order_id =
            format_client_order_id(&self.config.strategy_id, &self.config.symbol, side, level_index, sequence);

        let pending = GridOrderState {
            client_order_id: client_order_id.clone(),
            exchange_order_id: None,
            status: OrderStatus::PendingSend,
            side,
            price,
            quantity: self.config.quantity,
            level_index,
            placed_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        self.record_and_upsert(pending, now_ms);

        let request = PlaceOrderRequest {
            symbol: self.config.symbol.clone(),
            client_order_id: client_order_id.clone(),
            side,
            price,
            quantity: self.config.quantity,
            post_only: self.config.post_only,
            reduce_only: false,
            expire_time_ms: Some(now_ms + self.config.cancel_timeout_ms),
        };

        match self.adapter.place_order(request).await {
            Ok(result) => {
                let order = GridOrderState {
                    client_order_id: client_order_id.clone(),
                    exchange_order_id: result.exchange_order_id,
                    status: result.status,
                    side,
                    price,
                    quantity: self.config.quantity,
                    level_index,
                    placed_at_ms: now_ms,
                    updated_at_ms: now_ms,
                };
                self.record_and_upsert(order, now_ms);
            }
            Err(EngineError::AdapterReject(reason)) => {
                warn!("order rejected at level {level_index}: {reason}");
                let order = GridOrderState {
                    client_order_id,
                    exchange_order_id: None,
                    status: OrderStatus::Rejected,
                    side,
                    price,
                    quantity: self.config.quantity,
                    level_index,
                    placed_at_ms: now_ms,
                    updated_at_ms: now_ms,
                };
                self.record_and_upsert(order, now_ms);
            }
            Err(e) => {
                warn!("place_order transient failure at level {level_index}: {e}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &GridState {
        &self.state
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockAdapter;
    use crate::exchange::MarketConfig;
    use crate::grid::SpacingMode;
    use crate::sink::OrderRecord;
    use rust_decimal_macros::dec;

    fn geometry() -> GeometryConfig {
        GeometryConfig { mode: SpacingMode::Abs, spacing: dec!(10), spacing_percent: Decimal::ZERO, levels: 5 }
    }

    fn config() -> ManagerConfig {
        ManagerConfig {
            strategy_id: "grid-default".into(),
            symbol: "BTC".into(),
            geometry: geometry(),
            quantity: dec!(1),
            post_only: false,
            cancel_timeout_ms: 10_000,
            max_position: dec!(100),
            max_open_orders: 50,
            mark_shift_confirm_ms: 2_000,
        }
    }

    struct NullSink;
    #[async_trait::async_trait]
    impl OrderSink for NullSink {
        async fn record_order(&self, _record: OrderRecord) {}
    }

    struct RecordingSink {
        records: std::sync::Mutex<Vec<OrderRecord>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { records: std::sync::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl OrderSink for RecordingSink {
        async fn record_order(&self, record: OrderRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn market_config() -> MarketConfig {
        MarketConfig {
            min_price_change: dec!(0.1),
            min_order_size_change: dec!(0.001),
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0005),
        }
    }

    fn quote(mark: Decimal) -> Quote {
        Quote { bid: mark - dec!(1), ask: mark + dec!(1), mark, ts_ms: 0 }
    }

    async fn new_manager() -> (GridManager, Arc<MockAdapter>) {
        let adapter = Arc::new(MockAdapter::new(market_config()));
        let (manager, _handle) = GridManager::new(config(), adapter.clone(), Arc::new(NullSink));
        (manager, adapter)
    }

    #[tokio::test]
    async fn first_quote_resets_and_syncs() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;

        manager.process_quote(quote(dec!(100)), 0).await.unwrap();
        assert_eq!(manager.state().center_price, Some(dec!(100)));
        // 5 levels per side, all admissible at net=0 -> all 10 should place.
        assert_eq!(manager.state().orders.len(), 10);
    }

    #[tokio::test]
    async fn jitter_quote_causes_no_shift_and_no_order_changes() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();
        assert_eq!(manager.state().orders.len(), 10);

        // delta=4 -> steps=0, below even the one-step floor.
        manager.process_quote(quote(dec!(104)), 1_000).await.unwrap();
        assert_eq!(manager.state().center_price, Some(dec!(100)));
        assert_eq!(manager.state().orders.len(), 10);
    }

    #[tokio::test]
    async fn single_step_drift_does_not_shift() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();

        // delta=15 -> one whole step, below the two-step confirmation floor.
        manager.process_quote(quote(dec!(115)), 1_000).await.unwrap();
        assert_eq!(manager.state().center_price, Some(dec!(100)));
    }

    #[tokio::test]
    async fn confirmed_two_step_shift_moves_center() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();

        // First signal starts the window; not yet confirmed.
        manager.process_quote(quote(dec!(121)), 1_000).await.unwrap();
        assert_eq!(manager.state().center_price, Some(dec!(100)));

        // Same sign, window elapsed -> confirmed shift.
        manager.process_quote(quote(dec!(121)), 3_500).await.unwrap();
        assert_eq!(manager.state().center_price, Some(dec!(120)));
    }

    #[tokio::test]
    async fn full_rebuild_triggers_when_steps_exceed_levels() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();

        manager.process_quote(quote(dec!(200)), 1_000).await.unwrap();
        assert_eq!(manager.state().center_price, Some(dec!(200)));
    }

    #[tokio::test]
    async fn fill_driven_shift_is_unconditional() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();

        manager.process_fill(-3, 1_000).await;
        assert_eq!(manager.state().center_price, Some(dec!(70)));
    }

    #[tokio::test]
    async fn max_position_blocks_further_buy_admission() {
        let cfg = ManagerConfig { max_position: dec!(1), ..config() };
        let adapter = Arc::new(MockAdapter::new(market_config()));
        let (mut manager, _handle) = GridManager::new(cfg, adapter.clone(), Arc::new(NullSink));
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;

        manager.process_quote(quote(dec!(100)), 0).await.unwrap();
        let buy_orders = manager
            .state()
            .orders
            .values()
            .filter(|o| o.side == Side::Buy && !o.status.is_terminal())
            .count();
        assert_eq!(buy_orders, 1);
    }

    #[tokio::test]
    async fn post_only_guard_suppresses_crossing_buy() {
        let cfg = ManagerConfig { post_only: true, ..config() };
        let adapter = Arc::new(MockAdapter::new(market_config()));
        let (mut manager, _handle) = GridManager::new(cfg, adapter.clone(), Arc::new(NullSink));
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;

        // ask=89 crosses the nearest BUY level (index -1, price 90) but
        // not the next one down (index -2, price 80).
        let crossed = Quote { bid: dec!(88), ask: dec!(89), mark: dec!(100), ts_ms: 0 };
        manager.process_quote(crossed, 0).await.unwrap();

        assert!(manager.state().bound_order_at(-1).is_none());
        assert!(manager.state().bound_order_at(-2).is_some());
    }

    #[tokio::test]
    async fn cancel_on_timeout_sweep_cancels_overdue_orders() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();

        manager.cancel_on_timeout_sweep(20_000).await.unwrap();
        // upsert_order removes terminal orders from the table entirely,
        // so every cancelled order simply vanishes.
        assert_eq!(manager.state().orders.len(), 0);
    }

    #[tokio::test]
    async fn full_rebuild_records_cancelled_status_for_orders_dropped_from_state() {
        let adapter = Arc::new(MockAdapter::new(market_config()));
        let sink = Arc::new(RecordingSink::new());
        let (mut manager, _handle) = GridManager::new(config(), adapter.clone(), sink.clone());
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;

        manager.process_quote(quote(dec!(100)), 0).await.unwrap();
        assert_eq!(manager.state().orders.len(), 10);

        // `reset` (triggered by the full-rebuild path) clears local state
        // before cancellation runs; the exchange still reports the prior
        // 10 orders as open, so cancelling them must still produce a
        // terminal record even though `self.state.orders` no longer holds
        // any of them.
        manager.process_quote(quote(dec!(200)), 1_000).await.unwrap();

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let cancelled = sink
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == OrderStatus::Cancelled)
            .count();
        assert_eq!(cancelled, 10);
    }

    #[tokio::test]
    async fn ingest_fill_enqueues_shift_and_invalidates_position() {
        let (mut manager, adapter) = new_manager().await;
        adapter.set_net_position(Decimal::ZERO).await;
        manager.position.on_push(Some(Decimal::ZERO), 0).await;
        manager.process_quote(quote(dec!(100)), 0).await.unwrap();

        let target = manager.state().orders.values().find(|o| o.level_index == -3).unwrap().clone();
        let filled = AdapterOrder {
            client_order_id: target.client_order_id.clone(),
            exchange_order_id: target.exchange_order_id.clone(),
            status: OrderStatus::Filled,
            side: target.side,
            price: target.price,
            quantity: target.quantity,
            filled_quantity: target.quantity,
            updated_at_ms: 5_000,
        };
        manager.ingest_order_update(filled, 5_000).await;
        assert_eq!(manager.fill_queue.front().copied(), Some(-3));

        // invalidate() clears the cached net, so the next load() call
        // against a zero-position mock must hit the adapter, not a cache
        // hit of whatever value preceded this fill.
        adapter.set_net_position(Decimal::ZERO).await;
        let net = manager.position.load(adapter.as_ref(), "BTC", 5_001).await.unwrap();
        assert_eq!(net, Decimal::ZERO);
    }
}

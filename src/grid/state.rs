//! In-memory level table and order table, and the operations that keep
//! them consistent: `reset`, `update_mark`, `upsert_order`, `shift_center`.
//!
//! [`GridState`] is mutated exclusively by the order manager (§4.5 of the
//! design notes); everything else reads published snapshots.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::geometry::GeometryConfig;
use super::types::{GridOrderState, Level, OrderStatus, ShiftResult, TargetSide};

/// Aggregate grid state: the level table, the order table, and the
/// timestamps the health checker watches.
#[derive(Debug, Clone, Default)]
pub struct GridState {
    pub center_price: Option<Decimal>,
    pub last_mark: Option<Decimal>,
    pub last_quote_ts_ms: Option<i64>,
    pub last_rebuild_at_ms: Option<i64>,
    pub levels: HashMap<i32, Level>,
    pub orders: HashMap<String, GridOrderState>,
}

impl GridState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the symmetric `{-N..0..+N}` level table around `center`
    /// and clears every order. Used on first quote and on full rebuild.
    pub fn reset(&mut self, geometry: &GeometryConfig, center: Decimal, now_ms: i64) {
        self.orders.clear();
        self.center_price = Some(center);
        self.last_rebuild_at_ms = Some(now_ms);
        self.rebuild_levels(geometry, center);
    }

    fn rebuild_levels(&mut self, geometry: &GeometryConfig, center: Decimal) {
        self.levels.clear();
        for index in -geometry.levels..=geometry.levels {
            let price = geometry.price_at(center, index);
            self.levels.insert(index, Level { index, target_side: TargetSide::for_index(index), price });
        }
    }

    /// Records the latest mark price and quote timestamp; never touches levels.
    pub fn update_mark(&mut self, mark: Decimal, ts_ms: i64) {
        self.last_mark = Some(mark);
        self.last_quote_ts_ms = Some(ts_ms);
    }

    /// Inserts or replaces the local record for an order. Terminal orders
    /// are removed (and thereby detached from whatever level they
    /// occupied); a non-terminal order is bound to `levels[level_index]`
    /// iff that level's target side matches the order's side, otherwise
    /// it is left out of `self.orders` entirely — a defensive state hit
    /// when reconciliation discovers an orphan.
    pub fn upsert_order(&mut self, order: GridOrderState) {
        if order.status.is_terminal() {
            self.orders.remove(&order.client_order_id);
            return;
        }
        match self.levels.get(&order.level_index) {
            Some(level) if level.target_side.matches(order.side) => {
                self.orders.insert(order.client_order_id.clone(), order);
            }
            _ => {
                self.orders.remove(&order.client_order_id);
            }
        }
    }

    /// Returns the non-terminal order bound to `level_index`, if any.
    pub fn bound_order_at(&self, level_index: i32) -> Option<&GridOrderState> {
        self.orders.values().find(|o| o.level_index == level_index && !o.status.is_terminal())
    }

    /// Sum of quantities of non-terminal BUY and SELL orders respectively.
    pub fn pending_quantities(&self) -> (Decimal, Decimal) {
        let mut buy = Decimal::ZERO;
        let mut sell = Decimal::ZERO;
        for order in self.orders.values() {
            if order.status.is_terminal() {
                continue;
            }
            match order.side {
                super::types::Side::Buy => buy += order.quantity,
                super::types::Side::Sell => sell += order.quantity,
            }
        }
        (buy, sell)
    }

    /// Recomputes the center by `steps` grid spacings, rebuilds levels,
    /// and remaps every order's `level_index -= steps`. Orders that land
    /// outside `[-N, +N]`, or whose side no longer matches their new
    /// level's target side, are returned as `out_of_range_orders` —
    /// their status is *not* mutated here; cancellation is the caller's
    /// responsibility.
    pub fn shift_center(&mut self, geometry: &GeometryConfig, steps: i32, now_ms: i64) -> ShiftResult {
        let Some(old_center) = self.center_price else {
            return ShiftResult::default();
        };
        if steps == 0 {
            return ShiftResult { new_center_price: old_center, steps: 0, out_of_range_orders: Vec::new() };
        }

        let new_center = geometry.price_at(old_center, steps);
        self.center_price = Some(new_center);
        self.last_rebuild_at_ms = Some(now_ms);
        self.rebuild_levels(geometry, new_center);

        let mut out_of_range = Vec::new();
        let mut remapped = HashMap::with_capacity(self.orders.len());
        for (id, mut order) in self.orders.drain() {
            order.level_index -= steps;
            match self.levels.get(&order.level_index) {
                Some(level) if level.target_side.matches(order.side) => {
                    remapped.insert(id, order);
                }
                _ => out_of_range.push(order),
            }
        }
        self.orders = remapped;

        ShiftResult { new_center_price: new_center, steps, out_of_range_orders: out_of_range }
    }
}

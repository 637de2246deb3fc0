//! Core data types shared by grid geometry, grid state, and the order manager.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Net position side, derived from the sign of the net position size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Unified order status. Exchange-native status strings are mapped into
/// this set by the adapter before the core ever sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSend,
    Sent,
    Acked,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Unknown,
}

impl OrderStatus {
    /// Terminal statuses never occupy a level.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Orders eligible for the cancel-on-timeout sweep.
    pub fn is_cancel_candidate(self) -> bool {
        matches!(self, OrderStatus::Acked | OrderStatus::PartiallyFilled)
    }
}

/// A market quote from one exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub mark: Decimal,
    pub ts_ms: i64,
}

impl Quote {
    pub fn is_valid(&self) -> bool {
        self.bid <= self.ask && self.mark > Decimal::ZERO
    }
}

/// Which side a grid level targets. `None` is reserved for the center
/// level (index 0), which is a reference point, not a placement target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSide {
    None,
    Buy,
    Sell,
}

impl TargetSide {
    pub fn for_index(index: i32) -> TargetSide {
        match index.cmp(&0) {
            std::cmp::Ordering::Less => TargetSide::Buy,
            std::cmp::Ordering::Equal => TargetSide::None,
            std::cmp::Ordering::Greater => TargetSide::Sell,
        }
    }

    pub fn matches(self, side: Side) -> bool {
        matches!(
            (self, side),
            (TargetSide::Buy, Side::Buy) | (TargetSide::Sell, Side::Sell)
        )
    }
}

/// A discrete price tier at a signed offset from the grid center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub index: i32,
    pub target_side: TargetSide,
    pub price: Decimal,
}

/// Local record of a managed order bound (or formerly bound) to a level.
#[derive(Debug, Clone, PartialEq)]
pub struct GridOrderState {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub level_index: i32,
    pub placed_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Result of a `shift_center` call: the orders that fell outside the
/// rebuilt level range (or whose side no longer matches their new level)
/// and must be cancelled by the caller.
#[derive(Debug, Clone, Default)]
pub struct ShiftResult {
    pub new_center_price: Decimal,
    pub steps: i32,
    pub out_of_range_orders: Vec<GridOrderState>,
}

/// Builds a client-order-id of the form
/// `"<strategy_id>-<symbol>-<SIDE>-<level_index>-<sequence>"`.
pub fn format_client_order_id(strategy_id: &str, symbol: &str, side: Side, level_index: i32, sequence: u64) -> String {
    format!("{strategy_id}-{symbol}-{}-{level_index}-{sequence}", side.as_str())
}

/// Parsed components of a client-order-id relevant to recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClientOrderId {
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub level_index: i32,
    pub sequence: u64,
}

/// Parses a client-order-id produced by [`format_client_order_id`].
///
/// Returns `None` for ids that do not match the expected shape at all.
/// Prefix ownership (does this id belong to *this* strategy instance) is
/// a policy decision the caller makes by comparing `strategy_id`.
pub fn parse_client_order_id(raw: &str) -> Option<ParsedClientOrderId> {
    let (rest, seq_str) = raw.rsplit_once('-')?;
    let sequence: u64 = seq_str.parse().ok()?;

    // A negative level_index embeds its own '-' sign directly after the
    // SIDE token, so we can't blindly split on '-' again; search for the
    // literal "-BUY-" / "-SELL-" marker instead.
    for (tag, side) in [("BUY", Side::Buy), ("SELL", Side::Sell)] {
        let marker = format!("-{tag}-");
        if let Some(pos) = rest.rfind(&marker) {
            let prefix = &rest[..pos];
            let level_str = &rest[pos + marker.len()..];
            let level_index: i32 = level_str.parse().ok()?;
            let (strategy_id, symbol) = prefix.rsplit_once('-')?;
            return Some(ParsedClientOrderId {
                strategy_id: strategy_id.to_string(),
                symbol: symbol.to_string(),
                side,
                level_index,
                sequence,
            });
        }
    }
    None
}

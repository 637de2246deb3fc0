//! Grid geometry, grid state, and the risk guard.
//!
//! This module holds the purely computational pieces of the engine —
//! nothing here touches the network or the clock beyond taking
//! `now_ms`/timestamps as plain arguments. The order manager (see
//! [`crate::manager`]) is the only caller that drives these types
//! against real time and a real exchange adapter.

pub mod geometry;
pub mod risk;
pub mod state;
pub mod types;

pub use geometry::{GeometryConfig, SpacingMode};
pub use state::GridState;
pub use types::{
    format_client_order_id, parse_client_order_id, GridOrderState, Level, OrderStatus,
    ParsedClientOrderId, PositionSide, Quote, Side, ShiftResult, TargetSide,
};

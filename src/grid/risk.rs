//! Max-position admission rule.
//!
//! A worst-case guard: it assumes every already-pending same-side order
//! fills, so admitting one more order can never push the worst-case net
//! position past `max_position` in either direction.

use rust_decimal::Decimal;

use super::types::Side;

/// Returns `true` if placing `order_qty` more on `side` is admissible
/// given the current net position and already-pending same-side quantity.
pub fn admits(
    side: Side,
    net_position: Decimal,
    pending_buy: Decimal,
    pending_sell: Decimal,
    order_qty: Decimal,
    max_position: Decimal,
) -> bool {
    match side {
        Side::Buy => net_position + pending_buy + order_qty <= max_position,
        Side::Sell => net_position - pending_sell - order_qty >= -max_position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn max_position_cap_scenario() {
        let max_position = dec!(2);
        let qty = dec!(1);
        let mut pending_buy = Decimal::ZERO;
        let mut pending_sell = Decimal::ZERO;
        let net = Decimal::ZERO;

        assert!(admits(Side::Buy, net, pending_buy, pending_sell, qty, max_position));
        pending_buy += qty;
        assert!(admits(Side::Buy, net, pending_buy, pending_sell, qty, max_position));
        pending_buy += qty;
        assert!(!admits(Side::Buy, net, pending_buy, pending_sell, qty, max_position));

        assert!(admits(Side::Sell, net, pending_buy, pending_sell, qty, max_position));
        pending_sell += qty;
        assert!(admits(Side::Sell, net, pending_buy, pending_sell, qty, max_position));
        pending_sell += qty;
        assert!(!admits(Side::Sell, net, pending_buy, pending_sell, qty, max_position));
    }

    #[test]
    fn existing_net_position_consumes_headroom() {
        let max_position = dec!(10);
        assert!(admits(Side::Buy, dec!(9), Decimal::ZERO, Decimal::ZERO, dec!(1), max_position));
        assert!(!admits(Side::Buy, dec!(9), Decimal::ZERO, Decimal::ZERO, dec!(2), max_position));
        assert!(admits(Side::Sell, dec!(-9), Decimal::ZERO, Decimal::ZERO, dec!(1), max_position));
        assert!(!admits(Side::Sell, dec!(-9), Decimal::ZERO, Decimal::ZERO, dec!(2), max_position));
    }
}

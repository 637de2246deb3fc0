//! Decimal arithmetic helpers shared across the engine.
//!
//! All prices, quantities, and thresholds on the trading path are
//! [`rust_decimal::Decimal`] values. The only floating-point arithmetic
//! tolerated anywhere in the engine lives in
//! [`crate::grid::geometry::steps`], where a log-ratio decision is coerced
//! back to an integer step count before it touches anything else.

use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};

/// `floor(value / step) * step`.
///
/// `step` must be strictly positive; violating that precondition is a
/// [`EngineError::PreconditionViolation`], not a panic.
pub fn round_down(value: Decimal, step: Decimal) -> EngineResult<Decimal> {
    if step <= Decimal::ZERO {
        return Err(EngineError::PreconditionViolation(format!(
            "round_down step must be > 0, got {step}"
        )));
    }
    let quotient = (value / step).floor();
    Ok(quotient * step)
}

/// Parses a decimal string. Thin wrapper kept so callers have one place to
/// change error reporting if the underlying parser ever does.
pub fn parse(raw: &str) -> EngineResult<Decimal> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| EngineError::InvalidConfig(format!("invalid decimal '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_down_basic() {
        assert_eq!(round_down(dec!(17.3), dec!(5)).unwrap(), dec!(15));
        assert_eq!(round_down(dec!(15), dec!(5)).unwrap(), dec!(15));
        assert_eq!(round_down(dec!(-3.2), dec!(5)).unwrap(), dec!(-5));
    }

    #[test]
    fn round_down_rejects_nonpositive_step() {
        assert!(round_down(dec!(10), dec!(0)).is_err());
        assert!(round_down(dec!(10), dec!(-1)).is_err());
    }

    #[test]
    fn round_down_is_idempotent_and_never_rounds_up() {
        let x = dec!(123.456);
        let s = dec!(0.1);
        let once = round_down(x, s).unwrap();
        let twice = round_down(once, s).unwrap();
        assert_eq!(once, twice);
        assert!(once <= x);
    }
}

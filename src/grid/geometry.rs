//! Level-price computation and cross-step calculation.
//!
//! Mirrors the arithmetic/geometric spacing split of the donor's
//! `GridType`, but prices are computed relative to a moving `center`
//! rather than a fixed `lower_price`, and `steps` answers "how far has
//! the mark price drifted, in whole grid spacings" rather than "which
//! fixed level are we at".

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Spacing mode selecting which price formula governs level placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpacingMode {
    /// `price(i) = center + i * spacing`
    Abs,
    /// `price(i) = center * (1 + spacing_percent)^|i|` (inverted for `i < 0`)
    Percent,
}

/// Parameters governing grid geometry. Validated once at startup.
#[derive(Debug, Clone, Copy)]
pub struct GeometryConfig {
    pub mode: SpacingMode,
    /// Required and `> 0` iff `mode == Abs`.
    pub spacing: Decimal,
    /// Required and `> 0` iff `mode == Percent`.
    pub spacing_percent: Decimal,
    /// Levels per side; total levels including the center is `2 * levels + 1`.
    pub levels: i32,
}

impl GeometryConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.levels < 1 {
            return Err(EngineError::InvalidConfig("levels must be >= 1".into()));
        }
        match self.mode {
            SpacingMode::Abs if self.spacing <= Decimal::ZERO => {
                Err(EngineError::InvalidConfig("spacing must be > 0 in ABS mode".into()))
            }
            SpacingMode::Percent if self.spacing_percent <= Decimal::ZERO => {
                Err(EngineError::InvalidConfig("spacing_percent must be > 0 in PERCENT mode".into()))
            }
            _ => Ok(()),
        }
    }

    /// `price(i)` for a level at signed offset `i` from `center`.
    pub fn price_at(&self, center: Decimal, index: i32) -> Decimal {
        match self.mode {
            SpacingMode::Abs => center + Decimal::from(index) * self.spacing,
            SpacingMode::Percent => {
                let factor = pow_decimal(Decimal::ONE + self.spacing_percent, index.unsigned_abs());
                if index >= 0 {
                    center * factor
                } else {
                    center / factor
                }
            }
        }
    }

    /// Cross-step calculation: how many whole grid spacings separate
    /// `mark` from `center`, signed by direction.
    ///
    /// Preconditions: `center > 0`, `mark > 0`.
    pub fn steps(&self, center: Decimal, mark: Decimal) -> EngineResult<i32> {
        if center <= Decimal::ZERO || mark <= Decimal::ZERO {
            return Err(EngineError::PreconditionViolation(
                "steps() requires center > 0 and mark > 0".into(),
            ));
        }
        match self.mode {
            SpacingMode::Abs => {
                let delta = mark - center;
                let whole = (delta.abs() / self.spacing).floor();
                let magnitude = whole
                    .to_i32()
                    .ok_or_else(|| EngineError::Logic("step count overflowed i32".into()))?;
                Ok(if delta.is_sign_negative() { -magnitude } else { magnitude })
            }
            SpacingMode::Percent => {
                // The only floating-point arithmetic on the entire trading
                // path lives here: floor() of a log-ratio is insensitive
                // to sub-ULP error except exactly at an integer step
                // boundary, where the confirmation window already
                // tolerates a one-step misclassification.
                if mark == center {
                    return Ok(0);
                }
                let ratio = (mark / center)
                    .to_f64()
                    .ok_or_else(|| EngineError::Logic("ratio conversion failed".into()))?;
                let base = 1.0 + self.spacing_percent.to_f64().unwrap_or(0.0);
                if ratio > 1.0 {
                    Ok((ratio.ln() / base.ln()).floor() as i32)
                } else {
                    let inv = 1.0 / ratio;
                    Ok(-((inv.ln() / base.ln()).floor() as i32))
                }
            }
        }
    }
}

/// Integer power of a `Decimal` base, computed by repeated multiplication
/// (exponents here are small — bounded by `levels`, typically under a
/// few hundred — so a loop is clearer than a fast-power implementation).
fn pow_decimal(base: Decimal, exponent: u32) -> Decimal {
    let mut result = Decimal::ONE;
    for _ in 0..exponent {
        result *= base;
    }
    result
}

//! Engine configuration, loaded from a file plus `GRID_*` environment
//! overrides in the donor's `Settings::new` shape.

use std::collections::HashMap;

use config::{Config, ConfigError, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::grid::{GeometryConfig, SpacingMode};
use crate::manager::ManagerConfig;

/// Top-level settings recognized by the engine. Per-adapter credentials
/// and endpoints are opaque to the core and land in `adapter`, keyed by
/// whatever name the chosen adapter expects (e.g. `wallet_private_key`,
/// `testnet` for `EXCHANGE=hyperliquid`).
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_strategy_id")]
    pub strategy_id: String,
    pub symbol: String,
    pub levels: i32,
    pub spacing_mode: SpacingMode,
    #[serde(default)]
    pub spacing: Decimal,
    #[serde(default)]
    pub spacing_percent: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub post_only: bool,
    pub cancel_timeout_ms: i64,
    pub max_position: Decimal,
    pub max_open_orders: usize,
    pub exchange: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(flatten)]
    pub adapter: HashMap<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_strategy_id() -> String {
    "grid-default".to_string()
}

/// Confirmation window for a mark-shift of 2-4 grid spacings; not
/// exposed as a config knob, since every deployment of this engine has
/// used the same value.
const DEFAULT_MARK_SHIFT_CONFIRM_MS: i64 = 2_000;

impl Settings {
    pub fn load(config_path: &str) -> Result<Self, ConfigError> {
        let raw = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(config::Environment::with_prefix("GRID").try_parsing(true))
            .build()?;
        raw.try_deserialize()
    }

    pub fn geometry(&self) -> GeometryConfig {
        GeometryConfig {
            mode: self.spacing_mode,
            spacing: self.spacing,
            spacing_percent: self.spacing_percent,
            levels: self.levels,
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            strategy_id: self.strategy_id.clone(),
            symbol: self.symbol.clone(),
            geometry: self.geometry(),
            quantity: self.quantity,
            post_only: self.post_only,
            cancel_timeout_ms: self.cancel_timeout_ms,
            max_position: self.max_position,
            max_open_orders: self.max_open_orders,
            mark_shift_confirm_ms: DEFAULT_MARK_SHIFT_CONFIRM_MS,
        }
    }

    /// Validates every constraint the geometry, quantity, and sizing
    /// fields are subject to. Called once at startup; any failure here
    /// is fatal before the engine connects to anything.
    pub fn validate(&self) -> EngineResult<()> {
        self.geometry().validate()?;
        if self.quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig("quantity must be > 0".into()));
        }
        if self.cancel_timeout_ms < 1 {
            return Err(EngineError::InvalidConfig("cancel_timeout_ms must be >= 1".into()));
        }
        if self.max_position < Decimal::ZERO {
            return Err(EngineError::InvalidConfig("max_position must be >= 0".into()));
        }
        if self.max_open_orders < 1 {
            return Err(EngineError::InvalidConfig("max_open_orders must be >= 1".into()));
        }
        if self.exchange.trim().is_empty() {
            return Err(EngineError::InvalidConfig("exchange must be set".into()));
        }
        Ok(())
    }

    /// Looks up a string-valued adapter credential, e.g. `wallet_private_key`.
    pub fn adapter_str(&self, key: &str) -> EngineResult<String> {
        self.adapter
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::InvalidConfig(format!("missing adapter setting: {key}")))
    }

    pub fn adapter_bool(&self, key: &str, default: bool) -> bool {
        self.adapter.get(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> Settings {
        Settings {
            strategy_id: "grid-default".into(),
            symbol: "BTC".into(),
            levels: 5,
            spacing_mode: SpacingMode::Abs,
            spacing: dec!(10),
            spacing_percent: Decimal::ZERO,
            quantity: dec!(1),
            post_only: true,
            cancel_timeout_ms: 10_000,
            max_position: dec!(10),
            max_open_orders: 50,
            exchange: "hyperliquid".into(),
            log: LogConfig::default(),
            adapter: HashMap::new(),
        }
    }

    #[test]
    fn valid_settings_pass() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut s = settings();
        s.quantity = Decimal::ZERO;
        assert!(matches!(s.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn empty_exchange_is_rejected() {
        let mut s = settings();
        s.exchange = String::new();
        assert!(matches!(s.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn adapter_str_reads_flattened_credentials() {
        let mut s = settings();
        s.adapter.insert("wallet_private_key".into(), Value::String("0xabc".into()));
        assert_eq!(s.adapter_str("wallet_private_key").unwrap(), "0xabc");
        assert!(s.adapter_str("missing").is_err());
    }
}

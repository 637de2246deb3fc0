//! Health report: compares status-snapshot and market-data timestamps
//! against fixed thresholds and emits warnings on breach.

use serde::Serialize;

const MARKET_AGE_THRESHOLD_MS: i64 = 15_000;
const POSITION_AGE_THRESHOLD_MS: i64 = 60_000;
const MAINTENANCE_AGE_THRESHOLD_MS: i64 = 5_000;
const RECONCILE_AGE_THRESHOLD_MS: i64 = 15_000;

/// Inputs the health checker needs; `None` means "no data observed yet".
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
    pub now_ms: i64,
    pub last_quote_ts_ms: Option<i64>,
    pub last_position_update_at_ms: Option<i64>,
    pub last_maintenance_at_ms: Option<i64>,
    pub last_reconcile_at_ms: Option<i64>,
    /// Suppresses the market-quote warning during the initial grace
    /// window right after startup, when no quote has arrived yet.
    pub started_at_ms: i64,
}

const STARTUP_GRACE_MS: i64 = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub warnings: Vec<String>,
    pub market_age_ms: Option<i64>,
    pub position_age_ms: Option<i64>,
    pub maintenance_age_ms: Option<i64>,
    pub reconcile_age_ms: Option<i64>,
}

pub fn check(inputs: HealthInputs) -> HealthReport {
    let mut warnings = Vec::new();

    let market_age_ms = inputs.last_quote_ts_ms.map(|ts| inputs.now_ms - ts);
    match market_age_ms {
        Some(age) if age > MARKET_AGE_THRESHOLD_MS => {
            warnings.push(format!("market quote stale: {age}ms since last update"));
        }
        None if inputs.now_ms - inputs.started_at_ms > STARTUP_GRACE_MS => {
            warnings.push("market quote never received".to_string());
        }
        _ => {}
    }

    let position_age_ms = inputs.last_position_update_at_ms.map(|ts| inputs.now_ms - ts);
    if let Some(age) = position_age_ms {
        if age > POSITION_AGE_THRESHOLD_MS {
            warnings.push(format!("position cache stale: {age}ms since last update"));
        }
    }

    let maintenance_age_ms = inputs.last_maintenance_at_ms.map(|ts| inputs.now_ms - ts);
    if let Some(age) = maintenance_age_ms {
        if age > MAINTENANCE_AGE_THRESHOLD_MS {
            warnings.push(format!("maintenance pass stale: {age}ms since last run"));
        }
    }

    let reconcile_age_ms = inputs.last_reconcile_at_ms.map(|ts| inputs.now_ms - ts);
    if let Some(age) = reconcile_age_ms {
        if age > RECONCILE_AGE_THRESHOLD_MS {
            warnings.push(format!("reconcile pass stale: {age}ms since last run"));
        }
    }

    HealthReport {
        ok: warnings.is_empty(),
        warnings,
        market_age_ms,
        position_age_ms,
        maintenance_age_ms,
        reconcile_age_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timestamps_produce_no_warnings() {
        let report = check(HealthInputs {
            now_ms: 100_000,
            last_quote_ts_ms: Some(99_000),
            last_position_update_at_ms: Some(95_000),
            last_maintenance_at_ms: Some(99_000),
            last_reconcile_at_ms: Some(90_000),
            started_at_ms: 0,
        });
        assert!(report.ok);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn stale_market_quote_warns() {
        let report = check(HealthInputs {
            now_ms: 100_000,
            last_quote_ts_ms: Some(50_000),
            started_at_ms: 0,
            ..Default::default()
        });
        assert!(!report.ok);
        assert!(report.warnings.iter().any(|w| w.contains("market quote stale")));
    }

    #[test]
    fn absent_market_quote_within_grace_window_is_silent() {
        let report = check(HealthInputs { now_ms: 5_000, started_at_ms: 0, ..Default::default() });
        assert!(report.ok);
    }

    #[test]
    fn absent_market_quote_past_grace_window_warns() {
        let report = check(HealthInputs { now_ms: 20_000, started_at_ms: 0, ..Default::default() });
        assert!(!report.ok);
        assert!(report.warnings.iter().any(|w| w.contains("never received")));
    }

    #[test]
    fn absent_position_or_maintenance_timestamps_are_silent() {
        let report = check(HealthInputs {
            now_ms: 100_000,
            last_quote_ts_ms: Some(99_000),
            started_at_ms: 0,
            ..Default::default()
        });
        assert!(report.ok);
    }
}

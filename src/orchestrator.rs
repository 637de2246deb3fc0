//! Top-level wiring: builds the adapter, the manager, and the
//! market-data/account-stream/tick-driver plumbing, then runs until a
//! shutdown signal arrives.
//!
//! Mirrors the donor's `BotRunner::run` in shape — load settings, build
//! the venue client, hand it to the strategy engine, run to completion —
//! generalized from one hardcoded venue to the `EXCHANGE`-selected
//! adapter.

use std::sync::Arc;

use log::{info, warn};

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::exchange::hyperliquid::{HyperliquidAdapter, HyperliquidConfig};
use crate::exchange::{ExchangeAdapter, Unsubscribe};
use crate::health::{self, HealthInputs};
use crate::manager::{now_ms, GridManager, ManagerCommand, SharedStatus, WorkQueueHandle};
use crate::marketdata::MarketDataHub;
use crate::sink::JsonFileOrderSink;
use crate::tick::{TickDriver, TickTask};

const ORDER_SINK_PATH_KEY: &str = "order_sink_path";
const DEFAULT_ORDER_SINK_PATH: &str = "grid_orders.json";
const MAINTENANCE_INTERVAL_MS: u64 = 1_000;
const RECONCILE_INTERVAL_MS: u64 = 5_000;
const HEALTH_INTERVAL_MS: u64 = 5_000;

/// Builds the adapter named by `settings.exchange`. Only `"hyperliquid"`
/// is wired up; new venues register here as they gain an adapter.
fn build_adapter(settings: &Settings) -> EngineResult<Arc<dyn ExchangeAdapter>> {
    match settings.exchange.as_str() {
        "hyperliquid" => {
            let config = HyperliquidConfig {
                wallet_private_key: settings.adapter_str("wallet_private_key")?,
                testnet: settings.adapter_bool("testnet", true),
                max_retries: 5,
                retry_base_delay_ms: 500,
            };
            Ok(Arc::new(HyperliquidAdapter::new(config)?))
        }
        other => Err(EngineError::InvalidConfig(format!("unknown exchange: {other}"))),
    }
}

/// Runs the engine until `shutdown` resolves (typically `tokio::signal::ctrl_c()`).
pub async fn run(settings: Settings, shutdown: impl std::future::Future<Output = ()>) -> EngineResult<()> {
    settings.validate()?;

    let adapter = build_adapter(&settings)?;
    let capabilities = adapter.capabilities();
    if !capabilities.mark_price || !capabilities.orderbook {
        return Err(EngineError::CapabilityUnmet(
            "adapter must support mark_price and orderbook".into(),
        ));
    }

    adapter.connect().await?;
    info!("connected to {}", adapter.name());

    let sink_path = settings
        .adapter
        .get(ORDER_SINK_PATH_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_ORDER_SINK_PATH)
        .to_string();
    let sink = Arc::new(JsonFileOrderSink::open(&sink_path).await?);

    let (manager, handle) = GridManager::new(settings.manager_config(), adapter.clone(), sink);
    let status_handle = manager.status_handle();
    let started_at_ms = now_ms();

    let hub = MarketDataHub::new();
    let exchange_name = adapter.name().to_string();

    let quote_handle = handle.clone();
    hub.subscribe(
        vec![exchange_name.clone()],
        Box::new(move |snapshot| quote_handle.push_quote(snapshot.source_quote)),
    );

    let hub_publish = hub.clone();
    let publish_exchange = exchange_name.clone();
    let quote_unsub = adapter
        .subscribe_orderbook(
            &settings.symbol,
            Box::new(move |quote| hub_publish.publish(&publish_exchange, quote)),
        )
        .await?;

    let order_handle = handle.clone();
    let account_unsub = adapter
        .subscribe_account(Box::new(move |order| order_handle.push_order_update(order)), None)
        .await?;

    let tick_driver = TickDriver::start(vec![
        maintenance_task(handle.clone()),
        reconcile_task(handle.clone()),
        health_task(status_handle, started_at_ms),
    ]);

    let manager_task = tokio::spawn(manager.run());

    shutdown.await;
    info!("shutdown signal received, stopping");

    quote_unsub.unsubscribe().await;
    account_unsub.unsubscribe().await;
    tick_driver.stop();

    // Dropping the work queue's senders (via `handle`'s last clone going
    // out of scope here) lets `manager.run()` drain and exit on its own;
    // give it a bounded window before moving on regardless.
    drop(handle);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), manager_task).await;

    if let Err(e) = adapter.disconnect().await {
        warn!("adapter disconnect failed during shutdown: {e}");
    }

    Ok(())
}

fn maintenance_task(handle: WorkQueueHandle) -> TickTask {
    TickTask {
        name: "maintenance".to_string(),
        interval_ms: MAINTENANCE_INTERVAL_MS,
        run_on_start: false,
        handler: Arc::new(move || {
            let handle = handle.clone();
            Box::pin(async move {
                handle.push_command(ManagerCommand::Maintenance);
            })
        }),
    }
}

fn reconcile_task(handle: WorkQueueHandle) -> TickTask {
    TickTask {
        name: "reconcile".to_string(),
        interval_ms: RECONCILE_INTERVAL_MS,
        run_on_start: true,
        handler: Arc::new(move || {
            let handle = handle.clone();
            Box::pin(async move {
                handle.push_command(ManagerCommand::Reconcile);
            })
        }),
    }
}

/// Reads the manager's published status directly through `status_handle`
/// rather than the work queue — the manager stays the sole writer of
/// grid state, this task only ever takes a read lock.
fn health_task(status_handle: SharedStatus, started_at_ms: i64) -> TickTask {
    TickTask {
        name: "health".to_string(),
        interval_ms: HEALTH_INTERVAL_MS,
        run_on_start: false,
        handler: Arc::new(move || {
            let status_handle = status_handle.clone();
            Box::pin(async move {
                let snapshot = *status_handle.read().await;
                let report = health::check(HealthInputs {
                    now_ms: now_ms(),
                    last_quote_ts_ms: snapshot.last_quote_ts_ms,
                    last_position_update_at_ms: snapshot.last_position_update_at_ms,
                    last_maintenance_at_ms: snapshot.last_maintenance_at_ms,
                    last_reconcile_at_ms: snapshot.last_reconcile_at_ms,
                    started_at_ms,
                });
                if !report.ok {
                    for w in &report.warnings {
                        warn!("health: {w}");
                    }
                } else {
                    info!("health: ok");
                }
            })
        }),
    }
}

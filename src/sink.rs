//! Order sink: fire-and-forget persistence of every observed order
//! state mutation, keyed `(exchange, client_order_id)`.
//!
//! The core never awaits a sink write on its hot path; `record_order`
//! only logs on failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::EngineResult;
use crate::grid::types::{OrderStatus, Side};

/// Enough fields to replay full order history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub exchange: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub level_index: i32,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub exchange_status_raw: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn record_order(&self, record: OrderRecord);
}

/// Default sink: a single JSON file keyed by `(exchange, client_order_id)`.
/// Each `record_order` call rewrites the whole file atomically (write to
/// a temp path, then rename), so a crash mid-write never corrupts it.
pub struct JsonFileOrderSink {
    path: PathBuf,
    records: Mutex<HashMap<(String, String), OrderRecord>>,
}

impl JsonFileOrderSink {
    pub async fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let list: Vec<OrderRecord> = serde_json::from_str(&content)?;
                list.into_iter()
                    .map(|r| ((r.exchange.clone(), r.client_order_id.clone()), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, records: Mutex::new(records) })
    }

    async fn flush(&self, records: &HashMap<(String, String), OrderRecord>) -> EngineResult<()> {
        let list: Vec<&OrderRecord> = records.values().collect();
        let content = serde_json::to_string_pretty(&list)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderSink for JsonFileOrderSink {
    async fn record_order(&self, record: OrderRecord) {
        let mut records = self.records.lock().await;
        let key = (record.exchange.clone(), record.client_order_id.clone());
        if let Some(existing) = records.get(&key) {
            let mut merged = record.clone();
            merged.created_at_ms = existing.created_at_ms;
            records.insert(key, merged);
        } else {
            records.insert(key, record);
        }
        if let Err(e) = self.flush(&records).await {
            warn!("order sink: failed to flush to {}: {e}", self.path.display());
        }
    }
}

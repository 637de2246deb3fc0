//! Hyperliquid adapter: REST for info/exchange calls, a websocket for
//! orderbook and account streams, signed with an `alloy` local signer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use super::{
    AdapterOrder, Capabilities, ExchangeAdapter, MarketConfig, OnOrderUpdate, OnPositionUpdate,
    OnQuote, PlaceOrderRequest, PlaceOrderResult, Unsubscribe,
};
use crate::error::{EngineError, EngineResult};
use crate::grid::types::{OrderStatus, Quote, Side};
use crate::ratelimit::{RateLimitGuard, RateLimitOutcome};

const MAINNET_REST: &str = "https://api.hyperliquid.xyz";
const TESTNET_REST: &str = "https://api.hyperliquid-testnet.xyz";
const MAINNET_WS: &str = "wss://api.hyperliquid.xyz/ws";
const TESTNET_WS: &str = "wss://api.hyperliquid-testnet.xyz/ws";

pub struct HyperliquidConfig {
    pub wallet_private_key: String,
    pub testnet: bool,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

/// Real Hyperliquid venue. REST for everything synchronous, a single
/// websocket connection fanning out to per-symbol/account callbacks for
/// everything push-based.
pub struct HyperliquidAdapter {
    http: reqwest::Client,
    rest_base: String,
    ws_url: String,
    signer: PrivateKeySigner,
    address: Address,
    max_retries: u32,
    retry_base_delay_ms: u64,
    connected: AtomicBool,
    asset_index_cache: Mutex<Option<std::collections::HashMap<String, u32>>>,
    /// Shared across every REST call this adapter issues, so one 429
    /// blocks every other in-flight caller rather than each retrying
    /// independently into the same wall.
    rate_limit: RateLimitGuard,
}

impl HyperliquidAdapter {
    pub fn new(config: HyperliquidConfig) -> EngineResult<Self> {
        let signer: PrivateKeySigner = config
            .wallet_private_key
            .parse()
            .map_err(|e| EngineError::InvalidConfig(format!("invalid wallet key: {e}")))?;
        let address = signer.address();
        let (rest_base, ws_url) = if config.testnet {
            (TESTNET_REST.to_string(), TESTNET_WS.to_string())
        } else {
            (MAINNET_REST.to_string(), MAINNET_WS.to_string())
        };
        Ok(Self {
            http: reqwest::Client::new(),
            rest_base,
            ws_url,
            signer,
            address,
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
            connected: AtomicBool::new(false),
            asset_index_cache: Mutex::new(None),
            rate_limit: RateLimitGuard::new(),
        })
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0;
        let mut last_err = EngineError::AdapterTransient("no attempts made".into());
        while attempt < self.max_retries {
            match op().await {
                Ok(v) => return Ok(v),
                Err(EngineError::AdapterReject(r)) => return Err(EngineError::AdapterReject(r)),
                Err(e) => {
                    attempt += 1;
                    last_err = e;
                    if attempt < self.max_retries {
                        let delay = self.retry_base_delay_ms * 2u64.pow(attempt - 1);
                        warn!("hyperliquid call failed (attempt {attempt}/{0}), retrying in {delay}ms: {last_err}", self.max_retries);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn info(&self, body: Value) -> EngineResult<Value> {
        let url = format!("{}/info", self.rest_base);
        self.rate_limit
            .run(|| async {
                let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
                    RateLimitOutcome::Other(EngineError::AdapterTransient(e.to_string()))
                })?;
                if resp.status().as_u16() == 429 {
                    return Err(RateLimitOutcome::RateLimited { retry_after_secs: None });
                }
                resp.json::<Value>().await.map_err(|e| {
                    RateLimitOutcome::Other(EngineError::AdapterTransient(e.to_string()))
                })
            })
            .await
    }

    async fn asset_index(&self, symbol: &str) -> EngineResult<u32> {
        {
            let cache = self.asset_index_cache.lock().await;
            if let Some(map) = cache.as_ref() {
                if let Some(idx) = map.get(symbol) {
                    return Ok(*idx);
                }
            }
        }
        let meta = self.info(json!({ "type": "meta" })).await?;
        let universe = meta
            .get("universe")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::AdapterTransient("malformed meta response".into()))?;
        let mut map = std::collections::HashMap::new();
        for (idx, asset) in universe.iter().enumerate() {
            if let Some(name) = asset.get("name").and_then(Value::as_str) {
                map.insert(name.to_string(), idx as u32);
            }
        }
        let idx = map
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown symbol '{symbol}'")))?;
        *self.asset_index_cache.lock().await = Some(map);
        Ok(idx)
    }

    /// L1 actions are signed over keccak256(msgpack-ish json bytes); the
    /// exact phantom-agent wrapper Hyperliquid expects is venue-specific
    /// wire format, kept behind this one call site so callers never touch
    /// raw signing.
    async fn sign_action(&self, action: &Value, nonce: u64) -> EngineResult<String> {
        let mut payload = serde_json::to_vec(action).map_err(EngineError::from)?;
        payload.extend_from_slice(&nonce.to_be_bytes());
        let digest = keccak256(&payload);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| EngineError::AdapterTransient(format!("signing failed: {e}")))?;
        Ok(format!("0x{}", hex::encode_signature(&signature)))
    }

    fn price_to_str(price: Decimal) -> String {
        price.normalize().to_string()
    }

    fn qty_to_str(qty: Decimal) -> String {
        qty.normalize().to_string()
    }

    fn map_order_status(raw: &str) -> OrderStatus {
        match raw {
            "open" => OrderStatus::Acked,
            "filled" => OrderStatus::Filled,
            "canceled" | "cancelled" => OrderStatus::Cancelled,
            "rejected" => OrderStatus::Rejected,
            "triggered" | "marginCanceled" => OrderStatus::Expired,
            _ => OrderStatus::Unknown,
        }
    }
}

/// Minimal hex-encoding shim; kept local rather than pulling in the
/// `hex` crate for a single call site.
mod hex {
    pub fn encode_signature(sig: &alloy::signers::Signature) -> String {
        let bytes = sig.as_bytes();
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[async_trait]
impl ExchangeAdapter for HyperliquidAdapter {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { mark_price: true, orderbook: true, post_only: true, mass_cancel: true }
    }

    fn resolve_exchange_symbol(&self, symbol: &str) -> EngineResult<String> {
        Ok(symbol.to_string())
    }

    async fn connect(&self) -> EngineResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> EngineResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_orderbook(&self, symbol: &str, on_quote: OnQuote) -> EngineResult<Box<dyn Unsubscribe>> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| EngineError::AdapterTransient(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        let sub = json!({
            "method": "subscribe",
            "subscription": { "type": "bbo", "coin": symbol },
        });
        write
            .send(Message::Text(sub.to_string()))
            .await
            .map_err(|e| EngineError::AdapterTransient(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = alive.clone();
        tokio::spawn(async move {
            while task_alive.load(Ordering::SeqCst) {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(quote) = parse_bbo_message(&text) {
                            on_quote(quote);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("hyperliquid orderbook stream error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Box::new(TaskUnsubscribe { alive }))
    }

    async fn subscribe_account(
        &self,
        on_order_updates: OnOrderUpdate,
        on_position_updates: Option<OnPositionUpdate>,
    ) -> EngineResult<Box<dyn Unsubscribe>> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| EngineError::AdapterTransient(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        let sub = json!({
            "method": "subscribe",
            "subscription": { "type": "orderUpdates", "user": format!("{:#x}", self.address) },
        });
        write
            .send(Message::Text(sub.to_string()))
            .await
            .map_err(|e| EngineError::AdapterTransient(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = alive.clone();
        tokio::spawn(async move {
            while task_alive.load(Ordering::SeqCst) {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        for order in parse_order_updates(&text) {
                            on_order_updates(order);
                        }
                        if let Some(net) = parse_position_update(&text) {
                            if let Some(cb) = &on_position_updates {
                                cb(net);
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("hyperliquid account stream error: {e}, will resubscribe on reconnect");
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Box::new(TaskUnsubscribe { alive }))
    }

    async fn get_market_config(&self, symbol: &str) -> EngineResult<MarketConfig> {
        let meta = self.info(json!({ "type": "meta" })).await?;
        let universe = meta
            .get("universe")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::AdapterTransient("malformed meta response".into()))?;
        let asset = universe
            .iter()
            .find(|a| a.get("name").and_then(Value::as_str) == Some(symbol))
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown symbol '{symbol}'")))?;
        let sz_decimals = asset.get("szDecimals").and_then(Value::as_u64).unwrap_or(0) as u32;
        let min_order_size_change = Decimal::new(1, sz_decimals);
        Ok(MarketConfig {
            min_price_change: Decimal::new(1, 1),
            min_order_size_change,
            maker_fee: Decimal::new(2, 4),
            taker_fee: Decimal::new(5, 4),
        })
    }

    async fn get_net_position(&self, symbol: &str) -> EngineResult<Decimal> {
        self.with_retry(|| async {
            let state = self
                .info(json!({ "type": "clearinghouseState", "user": format!("{:#x}", self.address) }))
                .await?;
            let positions = state
                .get("assetPositions")
                .and_then(Value::as_array)
                .ok_or_else(|| EngineError::AdapterTransient("malformed clearinghouse response".into()))?;
            for entry in positions {
                let coin = entry.pointer("/position/coin").and_then(Value::as_str);
                if coin == Some(symbol) {
                    let szi = entry.pointer("/position/szi").and_then(Value::as_str).unwrap_or("0");
                    return crate::decimal::parse(szi);
                }
            }
            Ok(Decimal::ZERO)
        })
        .await
    }

    async fn get_order_by_client_order_id(&self, client_order_id: &str) -> EngineResult<Option<AdapterOrder>> {
        let resp = self
            .info(json!({
                "type": "orderStatus",
                "user": format!("{:#x}", self.address),
                "oid": client_order_id,
            }))
            .await?;
        Ok(parse_single_order(&resp))
    }

    async fn get_open_orders(&self, symbol: &str) -> EngineResult<Vec<AdapterOrder>> {
        let resp = self.info(json!({ "type": "openOrders", "user": format!("{:#x}", self.address) })).await?;
        let orders = resp.as_array().cloned().unwrap_or_default();
        Ok(orders
            .iter()
            .filter(|o| o.get("coin").and_then(Value::as_str) == Some(symbol))
            .filter_map(parse_order_entry)
            .collect())
    }

    async fn get_orders_history(&self, symbol: &str, since_ms: i64) -> EngineResult<Vec<AdapterOrder>> {
        let resp = self
            .info(json!({
                "type": "historicalOrders",
                "user": format!("{:#x}", self.address),
            }))
            .await?;
        let orders = resp.as_array().cloned().unwrap_or_default();
        Ok(orders
            .iter()
            .filter(|o| o.get("coin").and_then(Value::as_str) == Some(symbol))
            .filter(|o| o.get("statusTimestamp").and_then(Value::as_i64).unwrap_or(0) >= since_ms)
            .filter_map(parse_order_entry)
            .collect())
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> EngineResult<PlaceOrderResult> {
        let asset_index = self.asset_index(&req.symbol).await?;
        let nonce = now_nonce();
        let order_type = if req.post_only {
            json!({ "limit": { "tif": "Alo" } })
        } else {
            json!({ "limit": { "tif": "Gtc" } })
        };
        let action = json!({
            "type": "order",
            "orders": [{
                "a": asset_index,
                "b": matches!(req.side, Side::Buy),
                "p": Self::price_to_str(req.price),
                "s": Self::qty_to_str(req.quantity),
                "r": req.reduce_only,
                "t": order_type,
                "c": req.client_order_id,
            }],
            "grouping": "na",
        });
        let signature = self.sign_action(&action, nonce).await?;

        let body = json!({ "action": action, "nonce": nonce, "signature": signature });
        let url = format!("{}/exchange", self.rest_base);
        self.with_retry(|| async {
            let parsed = self
                .rate_limit
                .run(|| async {
                    let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
                        RateLimitOutcome::Other(EngineError::AdapterTransient(e.to_string()))
                    })?;
                    if resp.status().as_u16() == 429 {
                        return Err(RateLimitOutcome::RateLimited { retry_after_secs: None });
                    }
                    resp.json::<Value>().await.map_err(|e| {
                        RateLimitOutcome::Other(EngineError::AdapterTransient(e.to_string()))
                    })
                })
                .await?;
            parse_place_response(&parsed, &req.client_order_id, req.quantity)
        })
        .await
    }

    async fn cancel_order_by_external_id(&self, client_order_id: &str) -> EngineResult<()> {
        let action = json!({
            "type": "cancelByCloid",
            "cancels": [{ "cloid": client_order_id }],
        });
        let nonce = now_nonce();
        let signature = self.sign_action(&action, nonce).await?;
        let body = json!({ "action": action, "nonce": nonce, "signature": signature });
        let url = format!("{}/exchange", self.rest_base);
        self.with_retry(|| async {
            self.rate_limit
                .run(|| async {
                    let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
                        RateLimitOutcome::Other(EngineError::AdapterTransient(e.to_string()))
                    })?;
                    if resp.status().as_u16() == 429 {
                        return Err(RateLimitOutcome::RateLimited { retry_after_secs: None });
                    }
                    debug!("cancel response: {:?}", resp.status());
                    Ok(())
                })
                .await
        })
        .await
    }

    async fn mass_cancel(&self, symbol: &str) -> EngineResult<u32> {
        let open = self.get_open_orders(symbol).await?;
        let count = open.len() as u32;
        for order in open {
            if let Err(e) = self.cancel_order_by_external_id(&order.client_order_id).await {
                warn!("mass_cancel: failed to cancel {}: {e}", order.client_order_id);
            }
        }
        Ok(count)
    }
}

struct TaskUnsubscribe {
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl Unsubscribe for TaskUnsubscribe {
    async fn unsubscribe(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

fn now_nonce() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Deserialize)]
struct BboMessage {
    data: BboData,
}

#[derive(Deserialize)]
struct BboData {
    coin: String,
    bbo: [BboLevel; 2],
}

#[derive(Deserialize)]
struct BboLevel {
    px: String,
    #[allow(dead_code)]
    sz: String,
}

fn parse_bbo_message(text: &str) -> Option<Quote> {
    let msg: BboMessage = serde_json::from_str(text).ok()?;
    let bid: Decimal = msg.data.bbo[0].px.parse().ok()?;
    let ask: Decimal = msg.data.bbo[1].px.parse().ok()?;
    let mark = (bid + ask) / Decimal::TWO;
    Some(Quote { bid, ask, mark, ts_ms: 0 })
}

fn parse_order_updates(text: &str) -> Vec<AdapterOrder> {
    let Ok(value) = serde_json::from_str::<Value>(text) else { return Vec::new() };
    let Some(entries) = value.pointer("/data").and_then(Value::as_array) else { return Vec::new() };
    entries.iter().filter_map(parse_order_entry).collect()
}

fn parse_position_update(text: &str) -> Option<Decimal> {
    let value = serde_json::from_str::<Value>(text).ok()?;
    let szi = value.pointer("/data/position/szi")?.as_str()?;
    szi.parse().ok()
}

fn parse_order_entry(entry: &Value) -> Option<AdapterOrder> {
    let order = entry.get("order").unwrap_or(entry);
    let client_order_id = order.get("cloid").and_then(Value::as_str)?.to_string();
    let exchange_order_id = order.get("oid").map(|v| v.to_string());
    let side = match order.get("side").and_then(Value::as_str) {
        Some("B") => Side::Buy,
        Some("A") => Side::Sell,
        _ => return None,
    };
    let price: Decimal = order.get("limitPx").and_then(Value::as_str)?.parse().ok()?;
    let quantity: Decimal = order.get("sz").and_then(Value::as_str)?.parse().ok()?;
    let filled_quantity = order
        .get("origSz")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Decimal>().ok())
        .map(|orig| (orig - quantity).max(Decimal::ZERO))
        .unwrap_or(Decimal::ZERO);
    let status_str = entry.get("status").and_then(Value::as_str).unwrap_or("open");
    let updated_at_ms = entry.get("statusTimestamp").and_then(Value::as_i64).unwrap_or(0);
    Some(AdapterOrder {
        client_order_id,
        exchange_order_id,
        status: HyperliquidAdapter::map_order_status(status_str),
        side,
        price,
        quantity,
        filled_quantity,
        updated_at_ms,
    })
}

fn parse_single_order(value: &Value) -> Option<AdapterOrder> {
    value.get("order").and_then(parse_order_entry)
}

fn parse_place_response(value: &Value, client_order_id: &str, requested_qty: Decimal) -> EngineResult<PlaceOrderResult> {
    let status = value.pointer("/response/data/statuses/0").ok_or_else(|| {
        EngineError::AdapterTransient("place_order: no status in response".into())
    })?;
    if let Some(resting) = status.get("resting") {
        return Ok(PlaceOrderResult {
            client_order_id: client_order_id.to_string(),
            exchange_order_id: resting.get("oid").map(|v| v.to_string()),
            status: OrderStatus::Acked,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
        });
    }
    if let Some(filled) = status.get("filled") {
        let avg_price = filled.get("avgPx").and_then(Value::as_str).and_then(|s| s.parse().ok());
        let total_sz = filled
            .get("totalSz")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(requested_qty);
        return Ok(PlaceOrderResult {
            client_order_id: client_order_id.to_string(),
            exchange_order_id: filled.get("oid").map(|v| v.to_string()),
            status: OrderStatus::Filled,
            filled_quantity: total_sz,
            avg_fill_price: avg_price,
        });
    }
    if let Some(error) = status.get("error").and_then(Value::as_str) {
        return Err(EngineError::AdapterReject(error.to_string()));
    }
    Err(EngineError::AdapterTransient("place_order: unrecognized status".into()))
}

//! Live exchange adapter: signed REST for account and order flow. Reads go
//! through the retrying client; order placement goes through a plain client
//! and is never retried — after a timeout the order's fate is confirmed via
//! the exchange before anything else happens.

use crate::domain::errors::ExchangeError;
use crate::domain::fees::FeeSchedule;
use crate::domain::money;
use crate::domain::types::{
    Balances, Candle, ConditionalKind, ConditionalOrder, ConditionalStatus, FillReport,
    OpenOrderInfo, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderStatusReport, OrderType,
    OrderUpdate, Quote, SymbolMetadata, Timeframe,
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::{ExchangeAdapter, HttpClientFactory};

pub struct LiveAdapter {
    client: ClientWithMiddleware,
    placement_client: reqwest::Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    update_tx: broadcast::Sender<OrderUpdate>,
    /// Orders accepted but not yet terminal, client id -> symbol. Drained by
    /// the fill poller.
    pending: Arc<RwLock<HashMap<String, String>>>,
}

fn net_err(context: &str, e: impl std::fmt::Display) -> ExchangeError {
    ExchangeError::Unavailable {
        reason: format!("{}: {}", context, e),
    }
}

impl LiveAdapter {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        Self {
            client: HttpClientFactory::create_client(),
            placement_client: HttpClientFactory::create_placement_client(),
            api_key,
            api_secret,
            base_url,
            update_tx,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn sign(&self, query_string: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Utc::now().timestamp_millis()));
        let signature = self.sign(&query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let mut request = self.client.get(url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| net_err("request failed", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                reason: format!("{} -> {}: {}", url, status, body),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| net_err("malformed response", e))
    }

    fn map_status(raw: &str) -> OrderStatus {
        match raw {
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "PENDING_CANCEL" => OrderStatus::Cancelled,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Open,
        }
    }

    /// Poll accepted orders until terminal and publish their transitions.
    /// Spawned once by the engine in live mode.
    pub fn spawn_fill_poller(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                let snapshot: Vec<(String, String)> = adapter
                    .pending
                    .read()
                    .await
                    .iter()
                    .map(|(id, symbol)| (id.clone(), symbol.clone()))
                    .collect();
                for (order_id, symbol) in snapshot {
                    match adapter.order_status(&order_id, &symbol).await {
                        Ok(report) if report.status.is_terminal() => {
                            adapter.pending.write().await.remove(&order_id);
                            let _ = adapter.update_tx.send(OrderUpdate {
                                order_id,
                                symbol,
                                status: report.status,
                                fill: report.fill,
                            });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            debug!("LiveAdapter: fill poll for {} failed: {}", order_id, e)
                        }
                    }
                }
            }
        })
    }

    /// The order placement call timed out or errored without a readable
    /// response. Confirm against the exchange of record before reporting:
    /// resubmission without proof of non-placement is how double fills
    /// happen.
    async fn confirm_ambiguous(
        &self,
        order: &OrderRequest,
        original: String,
    ) -> Result<OrderAck, ExchangeError> {
        warn!(
            "LiveAdapter: place {} ambiguous ({}), confirming against exchange",
            order.id, original
        );
        match self.order_status(&order.id, &order.symbol).await {
            Ok(report) => match report.status {
                OrderStatus::Filled => Ok(OrderAck::Filled(report.fill.ok_or_else(|| {
                    ExchangeError::OrderAmbiguous {
                        order_id: order.id.clone(),
                        attempts: 1,
                        reason: "filled but fill details unavailable".to_string(),
                    }
                })?)),
                OrderStatus::Open => {
                    self.pending
                        .write()
                        .await
                        .insert(order.id.clone(), order.symbol.clone());
                    Ok(OrderAck::Accepted {
                        exchange_order_id: String::new(),
                    })
                }
                other => Err(ExchangeError::Rejected {
                    reason: format!("order {} terminal as {:?}", order.id, other),
                }),
            },
            Err(ExchangeError::Rejected { .. }) => {
                // Proven absent on the exchange: safe to report placement
                // failure, caller may decide to act again.
                Err(ExchangeError::Unavailable { reason: original })
            }
            Err(_) => Err(ExchangeError::OrderAmbiguous {
                order_id: order.id.clone(),
                attempts: 1,
                reason: original,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerPayload {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
    #[serde(rename = "closeTime")]
    close_time: i64,
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "clientOrderId", default)]
    client_order_id: String,
    symbol: String,
    side: String,
    status: String,
    #[serde(rename = "origQty", default)]
    orig_qty: String,
    #[serde(rename = "executedQty", default)]
    executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty", default)]
    cummulative_quote_qty: String,
    #[serde(default)]
    price: String,
    #[serde(rename = "updateTime", default)]
    update_time: i64,
    #[serde(default)]
    fills: Vec<FillPayload>,
}

#[derive(Debug, Deserialize)]
struct FillPayload {
    price: String,
    qty: String,
    commission: String,
}

fn parse_dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or(Decimal::ZERO)
}

impl OrderPayload {
    fn to_fill(&self, order_id: &str) -> Option<FillReport> {
        let executed = parse_dec(&self.executed_qty);
        if executed <= Decimal::ZERO {
            return None;
        }
        let (avg_price, fee) = if self.fills.is_empty() {
            let quote_qty = parse_dec(&self.cummulative_quote_qty);
            (money::quantize(quote_qty / executed), Decimal::ZERO)
        } else {
            let mut notional = Decimal::ZERO;
            let mut qty = Decimal::ZERO;
            let mut fee = Decimal::ZERO;
            for fill in &self.fills {
                let fill_qty = parse_dec(&fill.qty);
                notional += parse_dec(&fill.price) * fill_qty;
                qty += fill_qty;
                fee += parse_dec(&fill.commission);
            }
            if qty <= Decimal::ZERO {
                return None;
            }
            (money::quantize(notional / qty), fee)
        };
        Some(FillReport {
            order_id: order_id.to_string(),
            exchange_order_id: self.order_id.to_string(),
            symbol: self.symbol.clone(),
            side: if self.side == "BUY" {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            },
            qty_filled: executed,
            avg_fill_price: avg_price,
            fee,
            filled_at: chrono::TimeZone::timestamp_millis_opt(&Utc, self.update_time)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for LiveAdapter {
    async fn quote(&self, symbol: &str) -> Result<Quote, ExchangeError> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let payload: TickerPayload = self.get_json(&url, false).await?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price: parse_dec(&payload.last_price),
            spread: parse_dec(&payload.ask_price) - parse_dec(&payload.bid_price),
            volume_24h: parse_dec(&payload.quote_volume),
            ts: payload.close_time / 1000,
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            timeframe.as_str(),
            limit.min(1000)
        );
        let rows: Vec<Vec<serde_json::Value>> = self.get_json(&url, false).await?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 6 {
                continue;
            }
            let as_dec = |v: &serde_json::Value| parse_dec(v.as_str().unwrap_or("0"));
            let candle = Candle {
                ts: row[0].as_i64().unwrap_or(0) / 1000,
                open: as_dec(&row[1]),
                high: as_dec(&row[2]),
                low: as_dec(&row[3]),
                close: as_dec(&row[4]),
                volume: as_dec(&row[5]),
                timeframe,
            };
            if candle.is_coherent() {
                candles.push(candle);
            }
        }
        Ok(candles)
    }

    async fn place(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let side = match order.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", side.to_string()),
            ("quantity", order.qty.to_string()),
            ("newClientOrderId", order.id.clone()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        match order.order_type {
            OrderType::Market => params.push(("type", "MARKET".to_string())),
            OrderType::Limit => {
                params.push(("type", "LIMIT".to_string()));
                params.push((
                    "price",
                    order.limit_price.unwrap_or(Decimal::ZERO).to_string(),
                ));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        let url = self.signed_url("/api/v3/order", &params);
        let response = match self
            .placement_client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return self.confirm_ambiguous(order, e.to_string()).await,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                reason: format!("place {} -> {}: {}", order.id, status, body),
            });
        }

        let payload: OrderPayload = match response.json().await {
            Ok(payload) => payload,
            Err(e) => return self.confirm_ambiguous(order, e.to_string()).await,
        };

        match Self::map_status(&payload.status) {
            OrderStatus::Filled => {
                let fill = payload.to_fill(&order.id).ok_or_else(|| {
                    ExchangeError::OrderAmbiguous {
                        order_id: order.id.clone(),
                        attempts: 1,
                        reason: "FILLED without executed quantity".to_string(),
                    }
                })?;
                info!(
                    "LiveAdapter: {} {} {} filled @ {}",
                    side, fill.qty_filled, order.symbol, fill.avg_fill_price
                );
                Ok(OrderAck::Filled(fill))
            }
            OrderStatus::Rejected => Err(ExchangeError::Rejected {
                reason: format!("order {} rejected by exchange", order.id),
            }),
            _ => {
                self.pending
                    .write()
                    .await
                    .insert(order.id.clone(), order.symbol.clone());
                Ok(OrderAck::Accepted {
                    exchange_order_id: payload.order_id.to_string(),
                })
            }
        }
    }

    async fn cancel(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let url = self.signed_url(
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("origClientOrderId", order_id.to_string()),
            ],
        );
        let response = self
            .placement_client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| net_err("cancel failed", e))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                reason: format!("cancel {}: {}", order_id, body),
            });
        }
        self.pending.write().await.remove(order_id);
        Ok(())
    }

    async fn list_open_orders(&self) -> Result<Vec<OpenOrderInfo>, ExchangeError> {
        let url = self.signed_url("/api/v3/openOrders", &[]);
        let payloads: Vec<OrderPayload> = self.get_json(&url, true).await?;
        Ok(payloads
            .into_iter()
            .map(|payload| OpenOrderInfo {
                order_id: payload.client_order_id.clone(),
                exchange_order_id: payload.order_id.to_string(),
                symbol: payload.symbol.clone(),
                side: if payload.side == "BUY" {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                },
                qty: parse_dec(&payload.orig_qty),
                limit_price: Some(parse_dec(&payload.price)).filter(|p| *p > Decimal::ZERO),
            })
            .collect())
    }

    async fn balances(&self) -> Result<Balances, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct BalancePayload {
            asset: String,
            free: String,
            locked: String,
        }
        #[derive(Debug, Deserialize)]
        struct AccountPayload {
            balances: Vec<BalancePayload>,
        }

        let url = self.signed_url("/api/v3/account", &[]);
        let account: AccountPayload = self.get_json(&url, true).await?;

        let mut balances = Balances::default();
        for balance in account.balances {
            let total = parse_dec(&balance.free) + parse_dec(&balance.locked);
            if total <= Decimal::ZERO {
                continue;
            }
            if balance.asset == "USD" || balance.asset == "USDT" || balance.asset == "USDC" {
                balances.cash += total;
            } else {
                // Allow-list symbols are BASE+USD, so key holdings that way.
                balances
                    .assets
                    .insert(format!("{}USD", balance.asset), total);
            }
        }
        Ok(balances)
    }

    async fn symbol_metadata(&self) -> Result<Vec<SymbolMetadata>, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct FilterPayload {
            #[serde(rename = "filterType")]
            filter_type: String,
            #[serde(rename = "stepSize", default)]
            step_size: Option<String>,
            #[serde(rename = "minNotional", default)]
            min_notional: Option<String>,
        }
        #[derive(Debug, Deserialize)]
        struct SymbolPayload {
            symbol: String,
            filters: Vec<FilterPayload>,
        }
        #[derive(Debug, Deserialize)]
        struct ExchangeInfoPayload {
            symbols: Vec<SymbolPayload>,
        }

        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let info: ExchangeInfoPayload = self.get_json(&url, false).await?;

        let mut metadata = Vec::new();
        for entry in info.symbols {
            let mut lot_step = None;
            let mut min_notional = Decimal::ZERO;
            for filter in &entry.filters {
                match filter.filter_type.as_str() {
                    "LOT_SIZE" => {
                        lot_step = filter.step_size.as_deref().map(parse_dec);
                    }
                    "MIN_NOTIONAL" | "NOTIONAL" => {
                        min_notional = filter.min_notional.as_deref().map(parse_dec).unwrap_or(
                            Decimal::ZERO,
                        );
                    }
                    _ => {}
                }
            }
            // Symbols with unknown lot step are not tradable and are
            // filtered out here; the engine refuses them upstream.
            match lot_step {
                Some(step) if step > Decimal::ZERO => metadata.push(SymbolMetadata {
                    symbol: entry.symbol,
                    lot_step: step,
                    min_notional,
                }),
                _ => warn!(
                    "LiveAdapter: symbol {} has no lot step, excluded",
                    entry.symbol
                ),
            }
        }
        Ok(metadata)
    }

    async fn fee_schedule(&self) -> Result<FeeSchedule, ExchangeError> {
        #[derive(Debug, Deserialize)]
        struct CommissionRates {
            maker: String,
            taker: String,
        }
        #[derive(Debug, Deserialize)]
        struct AccountPayload {
            #[serde(rename = "commissionRates")]
            commission_rates: CommissionRates,
        }

        let url = self.signed_url("/api/v3/account", &[]);
        let account: AccountPayload = self.get_json(&url, true).await?;
        Ok(FeeSchedule::new(
            parse_dec(&account.commission_rates.maker),
            parse_dec(&account.commission_rates.taker),
        ))
    }

    async fn order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderStatusReport, ExchangeError> {
        let url = self.signed_url(
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("origClientOrderId", order_id.to_string()),
            ],
        );
        let payload: OrderPayload = self.get_json(&url, true).await?;
        let status = Self::map_status(&payload.status);
        Ok(OrderStatusReport {
            fill: if status == OrderStatus::Filled {
                payload.to_fill(order_id)
            } else {
                None
            },
            status,
        })
    }

    async fn place_conditional(
        &self,
        symbol: &str,
        tag: &str,
        kind: ConditionalKind,
        trigger_price: Decimal,
        qty: Decimal,
    ) -> Result<Option<ConditionalOrder>, ExchangeError> {
        let order_type = match kind {
            ConditionalKind::StopLoss => "STOP_LOSS",
            ConditionalKind::TakeProfit => "TAKE_PROFIT",
        };
        // Client id doubles as the durable conditional id, so status lookups
        // go through the same origClientOrderId path as regular orders.
        let client_id = format!("cond-{}", uuid::Uuid::new_v4());
        let url = self.signed_url(
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", "SELL".to_string()),
                ("type", order_type.to_string()),
                ("quantity", qty.to_string()),
                ("stopPrice", trigger_price.to_string()),
                ("newClientOrderId", client_id.clone()),
            ],
        );
        let response = self
            .placement_client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| net_err("conditional place failed", e))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected {
                reason: format!("conditional {} on {}: {}", order_type, symbol, body),
            });
        }
        let _payload: OrderPayload = response
            .json()
            .await
            .map_err(|e| net_err("malformed conditional response", e))?;
        Ok(Some(ConditionalOrder {
            id: client_id,
            symbol: symbol.to_string(),
            tag: tag.to_string(),
            kind,
            trigger_price,
            status: ConditionalStatus::Active,
        }))
    }

    async fn conditional_status(
        &self,
        id: &str,
        symbol: &str,
    ) -> Result<ConditionalStatus, ExchangeError> {
        let url = self.signed_url(
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("origClientOrderId", id.to_string()),
            ],
        );
        let payload: OrderPayload = self.get_json(&url, true).await?;
        Ok(match Self::map_status(&payload.status) {
            OrderStatus::Filled => ConditionalStatus::Filled,
            OrderStatus::Open => ConditionalStatus::Active,
            _ => ConditionalStatus::Cancelled,
        })
    }

    async fn cancel_conditional(&self, id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let url = self.signed_url(
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("origClientOrderId", id.to_string()),
            ],
        );
        let response = self
            .placement_client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| net_err("conditional cancel failed", e))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("LiveAdapter: conditional cancel {} failed: {}", id, body);
            return Err(ExchangeError::Rejected {
                reason: format!("conditional cancel {}: {}", id, body),
            });
        }
        Ok(())
    }

    fn order_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.update_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_signature_is_hex_sha256() {
        let adapter = LiveAdapter::new(
            "key".to_string(),
            "secret".to_string(),
            "https://api.exchange.example".to_string(),
        );
        let signature =
            adapter.sign("symbol=BTCUSD&side=BUY&type=MARKET&quantity=0.001&timestamp=1");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_mapping_covers_terminal_states() {
        assert_eq!(LiveAdapter::map_status("NEW"), OrderStatus::Open);
        assert_eq!(
            LiveAdapter::map_status("PARTIALLY_FILLED"),
            OrderStatus::Open
        );
        assert_eq!(LiveAdapter::map_status("FILLED"), OrderStatus::Filled);
        assert_eq!(LiveAdapter::map_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(LiveAdapter::map_status("EXPIRED"), OrderStatus::Expired);
        assert_eq!(LiveAdapter::map_status("REJECTED"), OrderStatus::Rejected);
    }

    #[test]
    fn fill_aggregation_is_qty_weighted() {
        let payload = OrderPayload {
            order_id: 42,
            client_order_id: "c-1".to_string(),
            symbol: "BTCUSD".to_string(),
            side: "BUY".to_string(),
            status: "FILLED".to_string(),
            orig_qty: "0.003".to_string(),
            executed_qty: "0.003".to_string(),
            cummulative_quote_qty: "153".to_string(),
            price: "0".to_string(),
            update_time: 1_700_000_000_000,
            fills: vec![
                FillPayload {
                    price: "50000".to_string(),
                    qty: "0.001".to_string(),
                    commission: "0.02".to_string(),
                },
                FillPayload {
                    price: "51500".to_string(),
                    qty: "0.002".to_string(),
                    commission: "0.04".to_string(),
                },
            ],
        };
        let fill = payload.to_fill("c-1").unwrap();
        // (50000*0.001 + 51500*0.002) / 0.003 = 51000
        assert_eq!(fill.avg_fill_price, Decimal::from(51000));
        assert_eq!(fill.fee, parse_dec("0.06"));
        assert_eq!(fill.qty_filled, parse_dec("0.003"));
    }

    #[test]
    fn fill_without_execution_is_none() {
        let payload = OrderPayload {
            order_id: 42,
            client_order_id: "c-1".to_string(),
            symbol: "BTCUSD".to_string(),
            side: "BUY".to_string(),
            status: "NEW".to_string(),
            orig_qty: "0.003".to_string(),
            executed_qty: "0".to_string(),
            cummulative_quote_qty: "0".to_string(),
            price: "0".to_string(),
            update_time: 0,
            fills: vec![],
        };
        assert!(payload.to_fill("c-1").is_none());
    }
}

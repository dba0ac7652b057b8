use crate::domain::errors::ExchangeError;
use crate::domain::fees::{FeeSchedule, PAPER_SLIPPAGE_PCT};
use crate::domain::money;
use crate::domain::types::{
    Balances, Candle, ConditionalKind, ConditionalOrder, ConditionalStatus, FillReport,
    OpenOrderInfo, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderStatusReport, OrderType,
    OrderUpdate, Quote, SymbolMetadata, Timeframe,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use super::ExchangeAdapter;

struct RestingLimit {
    order: OrderRequest,
}

/// In-memory fill simulator. Quotes are seeded from the live feed (or a
/// scripted feed in tests); fills, fees and slippage are synthesized here.
/// Stops are enforced client-side by the position monitor, so conditional
/// orders are deliberately not supported.
pub struct PaperAdapter {
    quotes: RwLock<HashMap<String, Quote>>,
    balances: RwLock<Balances>,
    fee_tier: Arc<RwLock<FeeSchedule>>,
    open_limits: RwLock<Vec<RestingLimit>>,
    completed: RwLock<HashMap<String, OrderStatusReport>>,
    update_tx: broadcast::Sender<OrderUpdate>,
    /// Resting limit orders older than this expire unfilled.
    limit_horizon_secs: i64,
    metadata: Vec<SymbolMetadata>,
    /// Optional real adapter used as a read-only market data source
    /// (candles, warmup quotes). Never used for order flow.
    market_source: Option<Arc<dyn ExchangeAdapter>>,
}

impl PaperAdapter {
    pub fn new(
        initial_cash: Decimal,
        fee_tier: Arc<RwLock<FeeSchedule>>,
        metadata: Vec<SymbolMetadata>,
        limit_horizon_secs: i64,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        Self {
            quotes: RwLock::new(HashMap::new()),
            balances: RwLock::new(Balances {
                cash: initial_cash,
                assets: HashMap::new(),
            }),
            fee_tier,
            open_limits: RwLock::new(Vec::new()),
            completed: RwLock::new(HashMap::new()),
            update_tx,
            limit_horizon_secs,
            metadata,
            market_source: None,
        }
    }

    pub fn with_market_source(mut self, source: Arc<dyn ExchangeAdapter>) -> Self {
        self.market_source = Some(source);
        self
    }

    /// Default metadata for paper runs without exchange connectivity.
    pub fn default_metadata(symbols: &[String]) -> Vec<SymbolMetadata> {
        symbols
            .iter()
            .map(|symbol| SymbolMetadata {
                symbol: symbol.clone(),
                lot_step: dec!(0.00000001),
                min_notional: dec!(1),
            })
            .collect()
    }

    /// Feed one quote into the simulator: updates the last-known price and
    /// sweeps resting limit orders for crossings and expiry. The quote's
    /// timestamp is the simulator's time source, so paper and tests share
    /// one clock.
    pub async fn on_quote(&self, quote: &Quote) {
        self.quotes
            .write()
            .await
            .insert(quote.symbol.clone(), quote.clone());
        self.sweep_limits(quote).await;
    }

    async fn sweep_limits(&self, quote: &Quote) {
        let mut matured = Vec::new();
        {
            let mut open = self.open_limits.write().await;
            let mut index = 0;
            while index < open.len() {
                let resting = &open[index];
                if resting.order.symbol != quote.symbol {
                    index += 1;
                    continue;
                }
                let limit = resting.order.limit_price.unwrap_or(Decimal::ZERO);
                let crossed = match resting.order.side {
                    OrderSide::Buy => quote.price <= limit,
                    OrderSide::Sell => quote.price >= limit,
                };
                let age_secs = quote.ts - resting.order.created_at.timestamp();
                if crossed || age_secs > self.limit_horizon_secs {
                    matured.push((open.remove(index).order, crossed));
                } else {
                    index += 1;
                }
            }
        }

        for (order, crossed) in matured {
            if crossed {
                let fees = *self.fee_tier.read().await;
                let limit = order.limit_price.unwrap_or(quote.price);
                match self.settle(&order, limit, fees.maker, quote.ts).await {
                    Ok(fill) => {
                        self.finish(&order, OrderStatus::Filled, Some(fill)).await;
                    }
                    Err(e) => {
                        debug!("PaperAdapter: limit {} unfillable: {}", order.id, e);
                        self.finish(&order, OrderStatus::Cancelled, None).await;
                    }
                }
            } else {
                info!("PaperAdapter: limit order {} expired unfilled", order.id);
                self.finish(&order, OrderStatus::Expired, None).await;
            }
        }
    }

    /// Apply a fill to the simulated ledger.
    async fn settle(
        &self,
        order: &OrderRequest,
        price: Decimal,
        fee_rate: Decimal,
        fill_ts: i64,
    ) -> Result<FillReport, ExchangeError> {
        let notional = money::quantize(order.qty * price);
        let fee = money::quantize(notional * fee_rate);
        let mut ledger = self.balances.write().await;

        match order.side {
            OrderSide::Buy => {
                let need = notional + fee;
                if ledger.cash < need {
                    return Err(ExchangeError::InsufficientFunds {
                        need,
                        available: ledger.cash,
                    });
                }
                ledger.cash = money::quantize(ledger.cash - need);
                *ledger.assets.entry(order.symbol.clone()).or_default() += order.qty;
            }
            OrderSide::Sell => {
                let held = ledger
                    .assets
                    .get(&order.symbol)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                if held < order.qty {
                    return Err(ExchangeError::Rejected {
                        reason: format!(
                            "sell {} {} exceeds held {}",
                            order.qty, order.symbol, held
                        ),
                    });
                }
                ledger.cash = money::quantize(ledger.cash + notional - fee);
                let remaining = money::quantize(held - order.qty);
                if remaining.is_zero() {
                    ledger.assets.remove(&order.symbol);
                } else {
                    ledger.assets.insert(order.symbol.clone(), remaining);
                }
            }
        }

        Ok(FillReport {
            order_id: order.id.clone(),
            exchange_order_id: format!("paper-{}", order.id),
            symbol: order.symbol.clone(),
            side: order.side,
            qty_filled: order.qty,
            avg_fill_price: price,
            fee,
            filled_at: Utc
                .timestamp_opt(fill_ts, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    async fn finish(&self, order: &OrderRequest, status: OrderStatus, fill: Option<FillReport>) {
        self.completed.write().await.insert(
            order.id.clone(),
            OrderStatusReport {
                status,
                fill: fill.clone(),
            },
        );
        let _ = self.update_tx.send(OrderUpdate {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            status,
            fill,
        });
    }
}

#[async_trait]
impl ExchangeAdapter for PaperAdapter {
    async fn quote(&self, symbol: &str) -> Result<Quote, ExchangeError> {
        if let Some(quote) = self.quotes.read().await.get(symbol) {
            return Ok(quote.clone());
        }
        if let Some(source) = &self.market_source {
            return source.quote(symbol).await;
        }
        Err(ExchangeError::Unavailable {
            reason: format!("no quote observed yet for {}", symbol),
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        match &self.market_source {
            Some(source) => source.candles(symbol, timeframe, limit).await,
            // Missing candle tiers are empty sequences, never errors.
            None => Ok(Vec::new()),
        }
    }

    async fn place(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let quote = self
            .quotes
            .read()
            .await
            .get(&order.symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::Unavailable {
                reason: format!("no market price for {}", order.symbol),
            })?;

        match order.order_type {
            OrderType::Market => {
                let fees = *self.fee_tier.read().await;
                let slip = quote.price * PAPER_SLIPPAGE_PCT;
                let fill_price = match order.side {
                    OrderSide::Buy => quote.price + slip,
                    OrderSide::Sell => quote.price - slip,
                };
                let fill = self
                    .settle(order, money::quantize(fill_price), fees.taker, quote.ts)
                    .await?;
                self.completed.write().await.insert(
                    order.id.clone(),
                    OrderStatusReport {
                        status: OrderStatus::Filled,
                        fill: Some(fill.clone()),
                    },
                );
                info!(
                    "PaperAdapter: {} {} {} filled @ {} (fee {})",
                    order.side, order.qty, order.symbol, fill.avg_fill_price, fill.fee
                );
                Ok(OrderAck::Filled(fill))
            }
            OrderType::Limit => {
                let limit = order.limit_price.ok_or_else(|| ExchangeError::Rejected {
                    reason: "limit order without price".to_string(),
                })?;
                let marketable = match order.side {
                    OrderSide::Buy => quote.price <= limit,
                    OrderSide::Sell => quote.price >= limit,
                };
                if marketable {
                    let fees = *self.fee_tier.read().await;
                    let fill = self.settle(order, limit, fees.taker, quote.ts).await?;
                    self.completed.write().await.insert(
                        order.id.clone(),
                        OrderStatusReport {
                            status: OrderStatus::Filled,
                            fill: Some(fill.clone()),
                        },
                    );
                    return Ok(OrderAck::Filled(fill));
                }
                self.open_limits.write().await.push(RestingLimit {
                    order: order.clone(),
                });
                debug!(
                    "PaperAdapter: limit {} resting at {} ({})",
                    order.id, limit, order.symbol
                );
                Ok(OrderAck::Accepted {
                    exchange_order_id: format!("paper-{}", order.id),
                })
            }
        }
    }

    async fn cancel(&self, order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        let removed = {
            let mut open = self.open_limits.write().await;
            let before = open.len();
            let mut cancelled = None;
            open.retain(|resting| {
                if resting.order.id == order_id {
                    cancelled = Some(resting.order.clone());
                    false
                } else {
                    true
                }
            });
            (before != open.len()).then_some(cancelled).flatten()
        };
        match removed {
            Some(order) => {
                self.finish(&order, OrderStatus::Cancelled, None).await;
                Ok(())
            }
            None => Err(ExchangeError::Rejected {
                reason: format!("order {} not open", order_id),
            }),
        }
    }

    async fn list_open_orders(&self) -> Result<Vec<OpenOrderInfo>, ExchangeError> {
        Ok(self
            .open_limits
            .read()
            .await
            .iter()
            .map(|resting| OpenOrderInfo {
                order_id: resting.order.id.clone(),
                exchange_order_id: format!("paper-{}", resting.order.id),
                symbol: resting.order.symbol.clone(),
                side: resting.order.side,
                qty: resting.order.qty,
                limit_price: resting.order.limit_price,
            })
            .collect())
    }

    async fn balances(&self) -> Result<Balances, ExchangeError> {
        Ok(self.balances.read().await.clone())
    }

    async fn symbol_metadata(&self) -> Result<Vec<SymbolMetadata>, ExchangeError> {
        Ok(self.metadata.clone())
    }

    async fn fee_schedule(&self) -> Result<FeeSchedule, ExchangeError> {
        Ok(*self.fee_tier.read().await)
    }

    async fn order_status(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> Result<OrderStatusReport, ExchangeError> {
        if let Some(report) = self.completed.read().await.get(order_id) {
            return Ok(report.clone());
        }
        if self
            .open_limits
            .read()
            .await
            .iter()
            .any(|resting| resting.order.id == order_id)
        {
            return Ok(OrderStatusReport {
                status: OrderStatus::Open,
                fill: None,
            });
        }
        Err(ExchangeError::Rejected {
            reason: format!("unknown order {}", order_id),
        })
    }

    async fn place_conditional(
        &self,
        _symbol: &str,
        _tag: &str,
        _kind: ConditionalKind,
        _trigger_price: Decimal,
        _qty: Decimal,
    ) -> Result<Option<ConditionalOrder>, ExchangeError> {
        // Client-side enforcement by the position monitor.
        Ok(None)
    }

    async fn conditional_status(
        &self,
        id: &str,
        _symbol: &str,
    ) -> Result<ConditionalStatus, ExchangeError> {
        Err(ExchangeError::Rejected {
            reason: format!("paper mode has no native conditional orders ({})", id),
        })
    }

    async fn cancel_conditional(&self, _id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    fn order_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.update_tx.subscribe()
    }
}

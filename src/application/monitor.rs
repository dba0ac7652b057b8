//! Position monitor. Every 30 seconds: re-mark the portfolio, track each
//! open position's max adverse excursion, and enforce protection — by
//! synthesizing CLOSE signals in paper mode, by reconciling exchange-native
//! conditional orders in live mode.

use crate::application::executor::Executor;
use crate::application::market_state::MarketState;
use crate::application::risk::RiskEngine;
use crate::application::scheduler::JobHandler;
use crate::application::strategy::StrategyIdentity;
use crate::domain::events::EngineEvent;
use crate::domain::portfolio::{CloseReason, OpenPosition, Portfolio, PositionKey};
use crate::domain::repositories::{ConditionalOrderStore, PositionStore};
use crate::domain::signal::{Signal, SignalAction};
use crate::domain::types::{ConditionalStatus, OrderType};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::ExchangeAdapter;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct PositionMonitor {
    market: Arc<MarketState>,
    portfolio: Arc<RwLock<Portfolio>>,
    risk: Arc<RiskEngine>,
    executor: Arc<Executor>,
    position_store: Arc<dyn PositionStore>,
    conditional_store: Arc<dyn ConditionalOrderStore>,
    adapter: Arc<dyn ExchangeAdapter>,
    events: EventBus,
    identity: Arc<RwLock<StrategyIdentity>>,
    live_mode: bool,
}

impl PositionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<MarketState>,
        portfolio: Arc<RwLock<Portfolio>>,
        risk: Arc<RiskEngine>,
        executor: Arc<Executor>,
        position_store: Arc<dyn PositionStore>,
        conditional_store: Arc<dyn ConditionalOrderStore>,
        adapter: Arc<dyn ExchangeAdapter>,
        events: EventBus,
        identity: Arc<RwLock<StrategyIdentity>>,
        live_mode: bool,
    ) -> Self {
        Self {
            market,
            portfolio,
            risk,
            executor,
            position_store,
            conditional_store,
            adapter,
            events,
            identity,
            live_mode,
        }
    }

    fn close_signal(position: &OpenPosition, reasoning: String) -> Signal {
        Signal {
            symbol: position.symbol.clone(),
            action: SignalAction::Close,
            size_pct: Decimal::ONE,
            order_type: OrderType::Market,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            intent: position.intent,
            tag: position.tag.clone(),
            confidence: dec!(1),
            reasoning,
        }
    }

    /// Paper-mode protection: compare the latest quote against each
    /// position's stop/target and route a CLOSE through the normal
    /// admission path (closes are always admitted outside emergencies).
    async fn enforce_client_side(&self, positions: &[OpenPosition]) -> Result<()> {
        let identity = self.identity.read().await.clone();
        for position in positions {
            let Some(price) = self.market.last_price(&position.symbol).await else {
                continue;
            };
            if self.executor.has_reconcile_pending(&position.symbol).await {
                debug!(
                    "PositionMonitor: {} reconcile_pending, skipping protection",
                    position.symbol
                );
                continue;
            }

            let triggered = if position.stop_loss.is_some_and(|stop| price <= stop) {
                Some((CloseReason::StopLoss, position.stop_loss.unwrap_or_default()))
            } else if position.take_profit.is_some_and(|target| price >= target) {
                Some((
                    CloseReason::TakeProfit,
                    position.take_profit.unwrap_or_default(),
                ))
            } else {
                None
            };

            let Some((reason, trigger_price)) = triggered else {
                continue;
            };
            info!(
                "PositionMonitor: {} crossed {} at {} (quote {}), closing ({}, {})",
                position.symbol,
                reason.as_str(),
                trigger_price,
                price,
                position.symbol,
                position.tag
            );
            self.events
                .publish(EngineEvent::StopTriggered {
                    symbol: position.symbol.clone(),
                    tag: position.tag.clone(),
                    reason,
                    trigger_price,
                })
                .await;

            let signal = Self::close_signal(
                position,
                format!("{} triggered at {} (quote {})", reason.as_str(), trigger_price, price),
            );
            self.executor
                .handle_signal(&signal, reason, &identity.version, &identity.regime)
                .await?;
        }
        Ok(())
    }

    /// Live-mode protection is enforced at the exchange; here we only
    /// reconcile: a conditional order that transitioned to filled closes
    /// the position locally at the exchange's fill price.
    async fn reconcile_native_stops(&self) -> Result<()> {
        let identity = self.identity.read().await.clone();
        let active = self.conditional_store.active().await?;
        for conditional in active {
            let status = match self
                .adapter
                .conditional_status(&conditional.id, &conditional.symbol)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    debug!(
                        "PositionMonitor: conditional {} status check failed: {}",
                        conditional.id, e
                    );
                    continue;
                }
            };
            match status {
                ConditionalStatus::Active => {}
                ConditionalStatus::Cancelled => {
                    self.conditional_store
                        .update_status(&conditional.id, ConditionalStatus::Cancelled)
                        .await?;
                }
                ConditionalStatus::Filled => {
                    let reason = match conditional.kind {
                        crate::domain::types::ConditionalKind::StopLoss => CloseReason::StopLoss,
                        crate::domain::types::ConditionalKind::TakeProfit => {
                            CloseReason::TakeProfit
                        }
                    };
                    // Prefer the actual fill price; fall back to trigger.
                    let (exit_price, fee) = match self
                        .adapter
                        .order_status(&conditional.id, &conditional.symbol)
                        .await
                    {
                        Ok(report) => report
                            .fill
                            .map(|fill| (fill.avg_fill_price, fill.fee))
                            .unwrap_or((conditional.trigger_price, Decimal::ZERO)),
                        Err(_) => (conditional.trigger_price, Decimal::ZERO),
                    };

                    warn!(
                        "PositionMonitor: native {} fired for ({}, {}) at {}",
                        conditional.kind.as_str(),
                        conditional.symbol,
                        conditional.tag,
                        exit_price
                    );
                    self.conditional_store
                        .update_status(&conditional.id, ConditionalStatus::Filled)
                        .await?;
                    self.events
                        .publish(EngineEvent::StopTriggered {
                            symbol: conditional.symbol.clone(),
                            tag: conditional.tag.clone(),
                            reason,
                            trigger_price: conditional.trigger_price,
                        })
                        .await;

                    let key = PositionKey::new(conditional.symbol.clone(), conditional.tag.clone());
                    self.executor
                        .apply_external_close(
                            &key,
                            exit_price,
                            fee,
                            reason,
                            true,
                            &identity.version,
                            &identity.regime,
                        )
                        .await;
                    // Drop the sibling mirror now that the position is gone.
                    self.executor.sync_conditionals(&key).await;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for PositionMonitor {
    async fn run(&self) -> Result<()> {
        let prices = self.market.price_map().await;
        let positions: Vec<OpenPosition> = {
            let mut portfolio = self.portfolio.write().await;
            for position in portfolio.positions.values_mut() {
                if let Some(price) = prices.get(&position.symbol) {
                    position.update_mae(*price);
                }
            }
            portfolio.positions.values().cloned().collect()
        };

        // Persist MAE movement so it survives restarts and is carried into
        // the eventual closed trade.
        for position in &positions {
            self.position_store.upsert(position).await?;
        }

        if !prices.is_empty() {
            let total_value = self.portfolio.read().await.total_value(&prices);
            self.risk.mark(total_value).await;
        }

        if self.live_mode {
            self.reconcile_native_stops().await?;
        } else {
            self.enforce_client_side(&positions).await?;
        }

        self.executor.retry_reconciliations().await;
        Ok(())
    }
}

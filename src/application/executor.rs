//! Portfolio & execution. Owns the authoritative positions-by-(symbol, tag)
//! map and cash. The whole read-modify-write of positions + cash + journal
//! runs under a per-symbol mutex; there is no global lock. Counters move
//! only after a fill is confirmed, and an order is never resubmitted
//! without proof it did not fill.

use crate::application::clock::SharedClock;
use crate::application::market_state::MarketState;
use crate::application::risk::{GateContext, RiskEngine};
use crate::domain::errors::{ExchangeError, JournalError};
use crate::domain::events::EngineEvent;
use crate::domain::fees::FeeSchedule;
use crate::domain::money;
use crate::domain::portfolio::{ClosedTrade, CloseReason, OpenPosition, Portfolio, PositionKey};
use crate::domain::repositories::{
    ConditionalOrderStore, FillJournal, OrderRecord, OrderStore, PositionUpdate, SignalRecord,
    SignalStore, TradeStore,
};
use crate::domain::risk::GateDecision;
use crate::domain::signal::{Intent, Signal, SignalAction};
use crate::domain::types::{
    ConditionalKind, ConditionalStatus, FillReport, OrderAck, OrderRequest, OrderSide,
    OrderStatus, OrderUpdate, SymbolMetadata,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::ExchangeAdapter;
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything the strategy hears about after a fill lands.
#[derive(Debug, Clone)]
pub struct FillNotice {
    pub symbol: String,
    pub action: SignalAction,
    pub qty: Decimal,
    pub price: Decimal,
    pub intent: Intent,
    pub tag: String,
    /// Set when the fill closed the position: (pnl, pnl_pct).
    pub closed: Option<(Decimal, Decimal)>,
}

/// Signal context remembered per in-flight order so asynchronous fills can
/// be applied with full attribution.
#[derive(Debug, Clone)]
struct PendingContext {
    action: SignalAction,
    tag: String,
    intent: Intent,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    close_reason: CloseReason,
    strategy_version: String,
    strategy_regime: String,
}

pub struct Executor {
    adapter: Arc<dyn ExchangeAdapter>,
    market: Arc<MarketState>,
    portfolio: Arc<RwLock<Portfolio>>,
    risk: Arc<RiskEngine>,
    trade_store: Arc<dyn TradeStore>,
    order_store: Arc<dyn OrderStore>,
    signal_store: Arc<dyn SignalStore>,
    conditional_store: Arc<dyn ConditionalOrderStore>,
    events: EventBus,
    clock: SharedClock,
    fee_tier: Arc<RwLock<FeeSchedule>>,
    metadata: HashMap<String, SymbolMetadata>,
    symbol_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pending: RwLock<HashMap<String, PendingContext>>,
    /// Orders whose placement outcome is unknown; resolved against the
    /// exchange of record before anything else may touch the symbol.
    reconcile_pending: Mutex<HashMap<String, OrderRequest>>,
    notice_tx: mpsc::Sender<FillNotice>,
    /// Journal failures are fatal: signalled here, acted on by the engine.
    fatal_tx: mpsc::Sender<String>,
}

#[allow(clippy::too_many_arguments)]
impl Executor {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        market: Arc<MarketState>,
        portfolio: Arc<RwLock<Portfolio>>,
        risk: Arc<RiskEngine>,
        trade_store: Arc<dyn TradeStore>,
        order_store: Arc<dyn OrderStore>,
        signal_store: Arc<dyn SignalStore>,
        conditional_store: Arc<dyn ConditionalOrderStore>,
        events: EventBus,
        clock: SharedClock,
        fee_tier: Arc<RwLock<FeeSchedule>>,
        metadata: HashMap<String, SymbolMetadata>,
        notice_tx: mpsc::Sender<FillNotice>,
        fatal_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            adapter,
            market,
            portfolio,
            risk,
            trade_store,
            order_store,
            signal_store,
            conditional_store,
            events,
            clock,
            fee_tier,
            metadata,
            symbol_locks: Mutex::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            reconcile_pending: Mutex::new(HashMap::new()),
            notice_tx,
            fatal_tx,
        }
    }

    pub fn portfolio(&self) -> Arc<RwLock<Portfolio>> {
        Arc::clone(&self.portfolio)
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.symbol_locks.lock().await;
        Arc::clone(
            locks
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn fatal(&self, context: String, error: JournalError) {
        error!("Executor: FATAL journal failure ({}): {}", context, error);
        self.events
            .publish(EngineEvent::SystemError {
                context: format!("{}: {}", context, error),
            })
            .await;
        let _ = self.fatal_tx.send(format!("{}: {}", context, error)).await;
    }

    /// Gate one signal and, if admitted, execute it. The full pipeline of
    /// one scan tick funnels through here, as do monitor-synthesized
    /// closes.
    #[tracing::instrument(skip_all, fields(symbol = %signal.symbol, action = %signal.action))]
    pub async fn handle_signal(
        &self,
        signal: &Signal,
        close_reason: CloseReason,
        strategy_version: &str,
        strategy_regime: &str,
    ) -> Result<GateDecision> {
        let key = PositionKey::new(signal.symbol.clone(), signal.tag.clone());
        let prices = self.market.price_map().await;

        let (total_value, existing_notional, position_exists, open_positions) = {
            let portfolio = self.portfolio.read().await;
            let total = portfolio.total_value(&prices);
            let existing = portfolio.position(&key).map_or(Decimal::ZERO, |p| {
                p.notional(prices.get(&p.symbol).copied().unwrap_or(p.avg_entry))
            });
            (
                total,
                existing,
                portfolio.position(&key).is_some(),
                portfolio.positions.len(),
            )
        };

        let current_price = prices.get(&signal.symbol).copied().unwrap_or(Decimal::ZERO);
        let ctx = GateContext {
            total_value,
            current_price,
            existing_notional,
            position_exists,
            open_positions,
            symbol_tradable: self.risk.is_tradable(&signal.symbol)
                && self.metadata.contains_key(&signal.symbol),
            round_trip_fee: self.fee_tier.read().await.round_trip(),
        };

        let decision = self.risk.gate(signal, &ctx).await;

        if let GateDecision::Shaped {
            size_pct,
            shaped_from,
        } = &decision
        {
            info!(
                "Executor: {} {} shaped to {} (shaped_from={})",
                signal.action, signal.symbol, size_pct, shaped_from
            );
        }

        self.journal_signal(signal, &decision, strategy_version, strategy_regime)
            .await;

        match &decision {
            GateDecision::Rejected { reason } => {
                self.events
                    .publish(EngineEvent::SignalRejected {
                        symbol: signal.symbol.clone(),
                        action: signal.action.as_str().to_string(),
                        reason: reason.clone(),
                    })
                    .await;
            }
            _ => {
                let effective = decision.effective_size(signal.size_pct);
                if let Err(e) = self
                    .execute(
                        signal,
                        effective,
                        total_value,
                        current_price,
                        close_reason,
                        strategy_version,
                        strategy_regime,
                    )
                    .await
                {
                    warn!(
                        "Executor: execution of {} {} failed: {:#}",
                        signal.action, signal.symbol, e
                    );
                }
            }
        }
        Ok(decision)
    }

    async fn journal_signal(
        &self,
        signal: &Signal,
        decision: &GateDecision,
        strategy_version: &str,
        strategy_regime: &str,
    ) {
        let record = SignalRecord {
            symbol: signal.symbol.clone(),
            action: signal.action.as_str().to_string(),
            size_pct: signal.size_pct,
            confidence: signal.confidence,
            intent: signal.intent.as_str().to_string(),
            tag: signal.tag.clone(),
            reasoning: signal.reasoning.clone(),
            strategy_version: strategy_version.to_string(),
            strategy_regime: strategy_regime.to_string(),
            acted_on: decision.is_admitted(),
            rejected_reason: decision.rejection_reason().map(|r| r.to_string()),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.signal_store.record(&record).await {
            self.fatal("signal journal".to_string(), e).await;
        }
    }

    /// Size and place one admitted signal, then apply the fill if it came
    /// back synchronously.
    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        signal: &Signal,
        effective_size_pct: Decimal,
        total_value: Decimal,
        current_price: Decimal,
        close_reason: CloseReason,
        strategy_version: &str,
        strategy_regime: &str,
    ) -> Result<()> {
        if current_price <= Decimal::ZERO {
            anyhow::bail!("no market price for {}", signal.symbol);
        }
        let metadata = self
            .metadata
            .get(&signal.symbol)
            .ok_or_else(|| anyhow::anyhow!("no metadata for {}", signal.symbol))?;

        let key = PositionKey::new(signal.symbol.clone(), signal.tag.clone());
        let (side, qty) = match signal.action {
            SignalAction::Buy => {
                let requested = effective_size_pct * total_value / current_price;
                (OrderSide::Buy, money::round_down_to_step(requested, metadata.lot_step))
            }
            SignalAction::Sell => {
                let held = {
                    let portfolio = self.portfolio.read().await;
                    portfolio.position(&key).map_or(Decimal::ZERO, |p| p.qty)
                };
                let requested = (effective_size_pct * total_value / current_price).min(held);
                (OrderSide::Sell, money::round_down_to_step(requested, metadata.lot_step))
            }
            SignalAction::Close => {
                let held = {
                    let portfolio = self.portfolio.read().await;
                    portfolio.position(&key).map_or(Decimal::ZERO, |p| p.qty)
                };
                // Full exit: the position was opened in lot-step multiples.
                (OrderSide::Sell, held)
            }
        };

        if qty <= Decimal::ZERO {
            anyhow::bail!(
                "computed qty for {} {} is zero after lot rounding",
                signal.action,
                signal.symbol
            );
        }
        if signal.action == SignalAction::Buy && qty * current_price < metadata.min_notional {
            anyhow::bail!(
                "notional {} below exchange minimum {}",
                qty * current_price,
                metadata.min_notional
            );
        }

        let order = OrderRequest {
            id: Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            side,
            qty,
            order_type: signal.order_type,
            limit_price: signal.limit_price,
            created_at: self.clock.now(),
        };

        if let Err(e) = self
            .order_store
            .record(&OrderRecord {
                id: order.id.clone(),
                exchange_order_id: None,
                symbol: order.symbol.clone(),
                side: side.to_string(),
                qty,
                limit_price: order.limit_price,
                status: OrderStatus::Open,
                created_at: order.created_at,
                filled_at: None,
                fill_price: None,
                fee: None,
            })
            .await
        {
            self.fatal("order journal".to_string(), e).await;
            anyhow::bail!("order journal failed");
        }

        let context = PendingContext {
            action: signal.action,
            tag: signal.tag.clone(),
            intent: signal.intent,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            close_reason,
            strategy_version: strategy_version.to_string(),
            strategy_regime: strategy_regime.to_string(),
        };
        self.pending
            .write()
            .await
            .insert(order.id.clone(), context.clone());

        info!(
            "Executor: placing {} {} {} ({:?}, size_pct {})",
            side, qty, order.symbol, order.order_type, effective_size_pct
        );

        match self.adapter.place(&order).await {
            Ok(OrderAck::Filled(fill)) => {
                self.apply_fill(&fill, &context).await;
                Ok(())
            }
            Ok(OrderAck::Accepted { exchange_order_id }) => {
                let exchange_id =
                    (!exchange_order_id.is_empty()).then_some(exchange_order_id.as_str());
                if let Err(e) = self
                    .order_store
                    .update_status(&order.id, OrderStatus::Open, exchange_id)
                    .await
                {
                    self.fatal("order journal".to_string(), e).await;
                }
                Ok(())
            }
            Err(ExchangeError::OrderAmbiguous { reason, .. }) => {
                warn!(
                    "Executor: order {} ambiguous ({}), symbol {} enters reconcile_pending",
                    order.id, reason, order.symbol
                );
                self.reconcile_pending
                    .lock()
                    .await
                    .insert(order.symbol.clone(), order.clone());
                self.resolve_ambiguous(&order).await;
                Ok(())
            }
            Err(e) => {
                self.pending.write().await.remove(&order.id);
                if let Err(journal_err) = self
                    .order_store
                    .update_status(&order.id, OrderStatus::Rejected, None)
                    .await
                {
                    self.fatal("order journal".to_string(), journal_err).await;
                }
                Err(e.into())
            }
        }
    }

    /// Resolve an order whose placement outcome is unknown. Patches local
    /// state if the exchange proves a fill; journals the attempt as
    /// rejected (`post_place_failure`) if it proves there was none. Under
    /// no circumstance is the order re-submitted.
    async fn resolve_ambiguous(&self, order: &OrderRequest) {
        match self.adapter.order_status(&order.id, &order.symbol).await {
            Ok(report) => {
                match report.status {
                    OrderStatus::Filled => {
                        if let Some(fill) = report.fill {
                            let context = self.pending.read().await.get(&order.id).cloned();
                            if let Some(context) = context {
                                info!(
                                    "Executor: reconciliation proved fill for {}, patching state",
                                    order.id
                                );
                                self.apply_fill(&fill, &context).await;
                            }
                        }
                    }
                    OrderStatus::Open => {
                        // Still resting; fill poller will deliver it.
                    }
                    _ => {
                        info!(
                            "Executor: reconciliation proved no fill for {} ({})",
                            order.id,
                            report.status.as_str()
                        );
                        self.pending.write().await.remove(&order.id);
                        if let Err(e) = self
                            .order_store
                            .update_status(&order.id, OrderStatus::Rejected, None)
                            .await
                        {
                            self.fatal("order journal".to_string(), e).await;
                        }
                    }
                }
                self.reconcile_pending.lock().await.remove(&order.symbol);
            }
            Err(e) => {
                warn!(
                    "Executor: reconciliation of {} still unresolved: {}",
                    order.id, e
                );
            }
        }
    }

    /// Re-attempt reconciliation for any symbol stuck in reconcile_pending.
    /// Called from the monitor cadence.
    pub async fn retry_reconciliations(&self) {
        let stuck: Vec<OrderRequest> = self
            .reconcile_pending
            .lock()
            .await
            .values()
            .cloned()
            .collect();
        for order in stuck {
            self.resolve_ambiguous(&order).await;
        }
    }

    pub async fn has_reconcile_pending(&self, symbol: &str) -> bool {
        self.reconcile_pending.lock().await.contains_key(symbol)
    }

    /// Asynchronous order transitions from the adapter (resting limit
    /// fills, expirations, cancellations).
    pub async fn on_order_update(&self, update: OrderUpdate) {
        match update.status {
            OrderStatus::Filled => {
                let context = self.pending.read().await.get(&update.order_id).cloned();
                match (context, update.fill) {
                    (Some(context), Some(fill)) => self.apply_fill(&fill, &context).await,
                    (None, Some(fill)) => {
                        warn!(
                            "Executor: fill for unknown order {} ({}), ignoring",
                            update.order_id, fill.symbol
                        );
                    }
                    _ => {}
                }
            }
            OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Rejected => {
                self.pending.write().await.remove(&update.order_id);
                if let Err(e) = self
                    .order_store
                    .update_status(&update.order_id, update.status, None)
                    .await
                {
                    self.fatal("order journal".to_string(), e).await;
                }
            }
            OrderStatus::Open => {}
        }
    }

    /// Apply one confirmed fill: mutate positions and cash under the
    /// symbol's mutex, journal the transition atomically, update risk
    /// counters, then notify.
    async fn apply_fill(&self, fill: &FillReport, context: &PendingContext) {
        let lock = self.symbol_lock(&fill.symbol).await;
        let _guard = lock.lock().await;

        let key = PositionKey::new(fill.symbol.clone(), context.tag.clone());
        let prices = self.market.price_map().await;
        let limits = self.risk.limits();

        let (journal, closed_trade, notice) = {
            let mut portfolio = self.portfolio.write().await;

            let position_update;
            let mut closed: Option<ClosedTrade> = None;

            match fill.side {
                OrderSide::Buy => {
                    let gross = money::quantize(fill.qty_filled * fill.avg_fill_price);
                    portfolio.cash = money::quantize(portfolio.cash - gross - fill.fee);
                    portfolio.fees_total = money::quantize(portfolio.fees_total + fill.fee);

                    let position =
                        portfolio
                            .positions
                            .entry(key.clone())
                            .or_insert_with(|| OpenPosition {
                                symbol: fill.symbol.clone(),
                                tag: context.tag.clone(),
                                qty: Decimal::ZERO,
                                avg_entry: Decimal::ZERO,
                                opened_at: fill.filled_at,
                                intent: context.intent,
                                stop_loss: None,
                                take_profit: None,
                                mae_pct: Decimal::ZERO,
                                entry_fees: Decimal::ZERO,
                            });
                    position.apply_buy(fill.qty_filled, fill.avg_fill_price, fill.fee);
                    // Declared protection wins; otherwise the configured
                    // defaults anchor off the resulting average entry.
                    position.stop_loss = context.stop_loss.or(Some(money::quantize(
                        position.avg_entry * (Decimal::ONE - limits.default_stop_loss_pct),
                    )));
                    position.take_profit = context.take_profit.or(Some(money::quantize(
                        position.avg_entry * (Decimal::ONE + limits.default_take_profit_pct),
                    )));
                    position_update = PositionUpdate::Upsert(position.clone());
                }
                OrderSide::Sell => {
                    let gross = money::quantize(fill.qty_filled * fill.avg_fill_price);
                    portfolio.cash = money::quantize(portfolio.cash + gross - fill.fee);
                    portfolio.fees_total = money::quantize(portfolio.fees_total + fill.fee);

                    match portfolio.positions.get_mut(&key) {
                        Some(position) => {
                            let entry_price = position.avg_entry;
                            let opened_at = position.opened_at;
                            let intent = position.intent;
                            let mae_pct = position.mae_pct;
                            let released_fees = position.apply_sell(fill.qty_filled);

                            if position.qty <= money::EPSILON {
                                let fees = money::quantize(released_fees + fill.fee);
                                let pnl = money::quantize(
                                    (fill.avg_fill_price - entry_price) * fill.qty_filled - fees,
                                );
                                let pnl_pct = if entry_price > Decimal::ZERO {
                                    money::quantize(
                                        (fill.avg_fill_price - entry_price) / entry_price,
                                    )
                                } else {
                                    Decimal::ZERO
                                };
                                let trade = ClosedTrade {
                                    id: Uuid::new_v4().to_string(),
                                    symbol: fill.symbol.clone(),
                                    tag: context.tag.clone(),
                                    qty: fill.qty_filled,
                                    entry_price,
                                    exit_price: fill.avg_fill_price,
                                    pnl,
                                    pnl_pct,
                                    fees,
                                    intent,
                                    strategy_version: context.strategy_version.clone(),
                                    strategy_regime: context.strategy_regime.clone(),
                                    close_reason: context.close_reason,
                                    opened_at,
                                    closed_at: fill.filled_at,
                                    mae_pct,
                                };
                                portfolio.positions.remove(&key);
                                portfolio.record_closed_trade(trade.clone());
                                closed = Some(trade);
                                position_update = PositionUpdate::Remove(key.clone());
                            } else {
                                position_update = PositionUpdate::Upsert(position.clone());
                            }
                        }
                        None => {
                            warn!(
                                "Executor: sell fill for absent position {}, journaling order only",
                                key
                            );
                            position_update = PositionUpdate::None;
                        }
                    }
                }
            }

            let cash_after = portfolio.cash;
            let total_value_after = portfolio.total_value(&prices);
            let journal = FillJournal {
                order_id: fill.order_id.clone(),
                order_status: OrderStatus::Filled,
                fill_price: fill.avg_fill_price,
                fee: fill.fee,
                filled_at: fill.filled_at,
                position: position_update,
                closed_trade: closed.clone(),
                cash_after,
                total_value_after,
            };
            let notice = FillNotice {
                symbol: fill.symbol.clone(),
                action: context.action,
                qty: fill.qty_filled,
                price: fill.avg_fill_price,
                intent: context.intent,
                tag: context.tag.clone(),
                closed: closed.as_ref().map(|t| (t.pnl, t.pnl_pct)),
            };
            (journal, closed, notice)
        };

        // Journal before any observer hears about it.
        if let Err(e) = self.trade_store.journal_fill(&journal).await {
            self.fatal("fill journal".to_string(), e).await;
            return;
        }
        self.pending.write().await.remove(&fill.order_id);

        self.risk.on_fill().await;
        if let Some(trade) = &closed_trade {
            self.risk.on_trade_closed(trade.pnl).await;
        }

        self.sync_conditionals(&key).await;

        self.events
            .publish(EngineEvent::TradeExecuted {
                symbol: fill.symbol.clone(),
                tag: context.tag.clone(),
                side: fill.side,
                qty: fill.qty_filled,
                price: fill.avg_fill_price,
                fee: fill.fee,
            })
            .await;
        let _ = self.notice_tx.send(notice).await;
    }

    /// Mirror the position's stop/take-profit as exchange-native
    /// conditional orders. The paper adapter declines (client-side stops),
    /// so this is a no-op there.
    pub(crate) async fn sync_conditionals(&self, key: &PositionKey) {
        // Drop any previous mirrors for this key.
        let active = match self.conditional_store.active().await {
            Ok(active) => active,
            Err(e) => {
                error!("Executor: conditional load failed: {}", e);
                return;
            }
        };
        for existing in active
            .iter()
            .filter(|c| c.symbol == key.symbol && c.tag == key.tag)
        {
            if let Err(e) = self
                .adapter
                .cancel_conditional(&existing.id, &existing.symbol)
                .await
            {
                warn!("Executor: cancel of conditional {} failed: {}", existing.id, e);
            }
            if let Err(e) = self
                .conditional_store
                .update_status(&existing.id, ConditionalStatus::Cancelled)
                .await
            {
                self.fatal("conditional journal".to_string(), e).await;
                return;
            }
        }

        let position = {
            let portfolio = self.portfolio.read().await;
            portfolio.position(key).cloned()
        };
        let Some(position) = position else {
            return;
        };

        for (kind, trigger) in [
            (ConditionalKind::StopLoss, position.stop_loss),
            (ConditionalKind::TakeProfit, position.take_profit),
        ] {
            let Some(trigger_price) = trigger else {
                continue;
            };
            match self
                .adapter
                .place_conditional(&key.symbol, &key.tag, kind, trigger_price, position.qty)
                .await
            {
                Ok(Some(conditional)) => {
                    if let Err(e) = self.conditional_store.upsert(&conditional).await {
                        self.fatal("conditional journal".to_string(), e).await;
                        return;
                    }
                }
                Ok(None) => {} // client-side enforcement
                Err(e) => {
                    warn!(
                        "Executor: placing {} mirror for {} failed: {}",
                        kind.as_str(),
                        key,
                        e
                    );
                }
            }
        }
    }

    /// Close a position locally without touching the exchange: the exchange
    /// of record already executed the exit (a native stop fired, or
    /// reconciliation proved the holding is gone).
    pub async fn apply_external_close(
        &self,
        key: &PositionKey,
        exit_price: Decimal,
        fee: Decimal,
        close_reason: CloseReason,
        credit_cash: bool,
        strategy_version: &str,
        strategy_regime: &str,
    ) {
        let lock = self.symbol_lock(&key.symbol).await;
        let _guard = lock.lock().await;

        let prices = self.market.price_map().await;
        let (journal, trade, notice) = {
            let mut portfolio = self.portfolio.write().await;
            let Some(position) = portfolio.positions.get(key).cloned() else {
                return;
            };
            let fees = money::quantize(position.entry_fees + fee);
            let pnl = money::quantize((exit_price - position.avg_entry) * position.qty - fees);
            let pnl_pct = if position.avg_entry > Decimal::ZERO {
                money::quantize((exit_price - position.avg_entry) / position.avg_entry)
            } else {
                Decimal::ZERO
            };
            let trade = ClosedTrade {
                id: Uuid::new_v4().to_string(),
                symbol: key.symbol.clone(),
                tag: key.tag.clone(),
                qty: position.qty,
                entry_price: position.avg_entry,
                exit_price,
                pnl,
                pnl_pct,
                fees,
                intent: position.intent,
                strategy_version: strategy_version.to_string(),
                strategy_regime: strategy_regime.to_string(),
                close_reason,
                opened_at: position.opened_at,
                closed_at: self.clock.now(),
                mae_pct: position.mae_pct,
            };
            if credit_cash {
                let gross = money::quantize(position.qty * exit_price);
                portfolio.cash = money::quantize(portfolio.cash + gross - fee);
                portfolio.fees_total = money::quantize(portfolio.fees_total + fee);
            }
            portfolio.positions.remove(key);
            portfolio.record_closed_trade(trade.clone());

            let cash_after = portfolio.cash;
            let total_value_after = portfolio.total_value(&prices);
            let journal = FillJournal {
                order_id: trade.id.clone(),
                order_status: OrderStatus::Filled,
                fill_price: exit_price,
                fee,
                filled_at: trade.closed_at,
                position: PositionUpdate::Remove(key.clone()),
                closed_trade: Some(trade.clone()),
                cash_after,
                total_value_after,
            };
            let notice = FillNotice {
                symbol: key.symbol.clone(),
                action: SignalAction::Close,
                qty: trade.qty,
                price: exit_price,
                intent: trade.intent,
                tag: key.tag.clone(),
                closed: Some((trade.pnl, trade.pnl_pct)),
            };
            (journal, trade, notice)
        };

        if let Err(e) = self.trade_store.journal_fill(&journal).await {
            self.fatal("external close journal".to_string(), e).await;
            return;
        }
        // A native stop firing is a real exchange fill; reconciliation
        // patches are not.
        if matches!(close_reason, CloseReason::StopLoss | CloseReason::TakeProfit) {
            self.risk.on_fill().await;
        }
        self.risk.on_trade_closed(trade.pnl).await;
        self.events
            .publish(EngineEvent::TradeExecuted {
                symbol: key.symbol.clone(),
                tag: key.tag.clone(),
                side: OrderSide::Sell,
                qty: trade.qty,
                price: exit_price,
                fee,
            })
            .await;
        let _ = self.notice_tx.send(notice).await;
    }
}

//! Startup reconciliation. The persistence store is the authoritative
//! replica of local state; the exchange is the authority on what actually
//! happened while the process was down. In live mode discrepancies resolve
//! exchange-wins: local state is patched to match, and every divergence is
//! journaled as a synthetic trade with `close_reason = reconciliation`.

use crate::application::clock::SharedClock;
use crate::application::executor::Executor;
use crate::domain::money;
use crate::domain::portfolio::{CloseReason, Portfolio, PositionKey};
use crate::domain::repositories::{
    CapitalEvent, CapitalEventKind, OrderStore, PerformanceStore, PositionStore, TradeStore,
};
use crate::domain::types::OrderStatus;
use crate::infrastructure::exchange::ExchangeAdapter;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct Reconciler {
    adapter: Arc<dyn ExchangeAdapter>,
    executor: Arc<Executor>,
    portfolio: Arc<RwLock<Portfolio>>,
    position_store: Arc<dyn PositionStore>,
    trade_store: Arc<dyn TradeStore>,
    order_store: Arc<dyn OrderStore>,
    performance_store: Arc<dyn PerformanceStore>,
    clock: SharedClock,
    live_mode: bool,
    paper_balance: Decimal,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        executor: Arc<Executor>,
        portfolio: Arc<RwLock<Portfolio>>,
        position_store: Arc<dyn PositionStore>,
        trade_store: Arc<dyn TradeStore>,
        order_store: Arc<dyn OrderStore>,
        performance_store: Arc<dyn PerformanceStore>,
        clock: SharedClock,
        live_mode: bool,
        paper_balance: Decimal,
    ) -> Self {
        Self {
            adapter,
            executor,
            portfolio,
            position_store,
            trade_store,
            order_store,
            performance_store,
            clock,
            live_mode,
            paper_balance,
        }
    }

    /// Rebuild the in-memory portfolio from the journal, then (live mode)
    /// patch it against the exchange of record.
    pub async fn run_startup(&self, strategy_version: &str) -> Result<()> {
        self.rebuild_from_journal()
            .await
            .context("portfolio rebuild from journal")?;
        self.expire_stale_orders().await?;
        if self.live_mode {
            self.reconcile_against_exchange(strategy_version)
                .await
                .context("exchange reconciliation")?;
        }

        let portfolio = self.portfolio.read().await;
        info!(
            "Reconciler: startup complete — cash {}, {} open positions, {} recent trades",
            portfolio.cash,
            portfolio.positions.len(),
            portfolio.recent_trades.len()
        );
        Ok(())
    }

    async fn rebuild_from_journal(&self) -> Result<()> {
        let positions = self.position_store.load_all().await?;
        let recent = self.trade_store.recent_trades(100).await?;
        let snapshot = self.performance_store.latest_portfolio_snapshot().await?;

        let mut portfolio = self.portfolio.write().await;
        for position in positions {
            portfolio.positions.insert(position.key(), position);
        }
        portfolio.fees_total = recent.iter().map(|t| t.fees).sum();
        portfolio.total_pnl = recent.iter().map(|t| t.pnl).sum();
        portfolio.recent_trades = recent;

        match snapshot {
            Some(snapshot) => {
                portfolio.cash = snapshot.cash;
            }
            None => {
                // First boot of this data directory: seed paper cash and
                // journal the deposit so the conservation property holds
                // from the very first trade.
                portfolio.cash = self.paper_balance;
                if !self.live_mode {
                    self.performance_store
                        .record_capital_event(&CapitalEvent {
                            ts: self.clock.now(),
                            kind: CapitalEventKind::Deposit,
                            amount: self.paper_balance,
                        })
                        .await?;
                    info!(
                        "Reconciler: seeded paper balance {} (journaled as deposit)",
                        self.paper_balance
                    );
                }
            }
        }
        Ok(())
    }

    /// Orders journaled as open cannot have survived the restart in paper
    /// mode, and in live mode only those still on the exchange did.
    async fn expire_stale_orders(&self) -> Result<()> {
        let local_open = self.order_store.open_orders().await?;
        if local_open.is_empty() {
            return Ok(());
        }
        let on_exchange: HashSet<String> = if self.live_mode {
            self.adapter
                .list_open_orders()
                .await
                .map(|orders| orders.into_iter().map(|o| o.order_id).collect())
                .unwrap_or_default()
        } else {
            HashSet::new()
        };
        for order in local_open {
            if !on_exchange.contains(&order.id) {
                info!("Reconciler: marking stale order {} cancelled", order.id);
                self.order_store
                    .update_status(&order.id, OrderStatus::Cancelled, None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn reconcile_against_exchange(&self, strategy_version: &str) -> Result<()> {
        let balances = self.adapter.balances().await?;

        // Cash: exchange wins outright.
        {
            let mut portfolio = self.portfolio.write().await;
            if !money::approx_eq(portfolio.cash, balances.cash) {
                warn!(
                    "Reconciler: cash drift (local {}, exchange {}), exchange wins",
                    portfolio.cash, balances.cash
                );
                portfolio.cash = balances.cash;
            }
        }

        // Positions: for each symbol, the exchange holding caps what local
        // state may claim. Vanished quantity is journaled as a synthetic
        // reconciliation trade at the last known price.
        let local: Vec<(PositionKey, Decimal, Decimal)> = {
            let portfolio = self.portfolio.read().await;
            portfolio
                .positions
                .values()
                .map(|p| (p.key(), p.qty, p.avg_entry))
                .collect()
        };

        let mut held_by_symbol: HashMap<String, Decimal> = balances.assets.clone();
        for (key, qty, avg_entry) in local {
            let held = held_by_symbol.entry(key.symbol.clone()).or_default();
            if *held + money::EPSILON >= qty {
                *held -= qty;
                continue;
            }

            warn!(
                "Reconciler: position {} qty {} not backed by exchange (remaining {}), closing locally",
                key, qty, held
            );
            let exit_price = match self.adapter.quote(&key.symbol).await {
                Ok(quote) => quote.price,
                Err(_) => avg_entry,
            };
            // Cash already mirrors the exchange, so the synthetic close
            // must not credit proceeds a second time.
            self.executor
                .apply_external_close(
                    &key,
                    exit_price,
                    Decimal::ZERO,
                    CloseReason::Reconciliation,
                    false,
                    strategy_version,
                    "reconciliation",
                )
                .await;
            *held = Decimal::ZERO;
        }

        for (symbol, remaining) in held_by_symbol {
            if remaining > money::EPSILON {
                warn!(
                    "Reconciler: exchange holds {} {} with no local position (untracked)",
                    remaining, symbol
                );
            }
        }
        Ok(())
    }
}

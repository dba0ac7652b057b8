//! Daily performance rollup (the 23:55 snapshot job) and the 24h fee-tier
//! refresh.

use crate::application::clock::SharedClock;
use crate::application::market_state::MarketState;
use crate::application::risk::RiskEngine;
use crate::application::scheduler::JobHandler;
use crate::application::strategy::StrategyIdentity;
use crate::domain::fees::FeeSchedule;
use crate::domain::money;
use crate::domain::portfolio::{ClosedTrade, Portfolio};
use crate::domain::repositories::{DailyPerformance, PerformanceStore, PortfolioSnapshot, TradeStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Journal portfolio value and risk counters once a day, plus the rollup
/// row the orchestrator and reporting read.
pub struct DailySnapshotJob {
    portfolio: Arc<RwLock<Portfolio>>,
    market: Arc<MarketState>,
    risk: Arc<RiskEngine>,
    trade_store: Arc<dyn TradeStore>,
    performance_store: Arc<dyn PerformanceStore>,
    identity: Arc<RwLock<StrategyIdentity>>,
    clock: SharedClock,
    tz: Tz,
}

impl DailySnapshotJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        portfolio: Arc<RwLock<Portfolio>>,
        market: Arc<MarketState>,
        risk: Arc<RiskEngine>,
        trade_store: Arc<dyn TradeStore>,
        performance_store: Arc<dyn PerformanceStore>,
        identity: Arc<RwLock<StrategyIdentity>>,
        clock: SharedClock,
        tz: Tz,
    ) -> Self {
        Self {
            portfolio,
            market,
            risk,
            trade_store,
            performance_store,
            identity,
            clock,
            tz,
        }
    }
}

/// Win rate and expectancy over one day's closed trades.
fn rollup(trades: &[ClosedTrade]) -> (u32, u32, Decimal, Decimal, Decimal, Decimal) {
    let mut wins = 0u32;
    let mut losses = 0u32;
    let mut gross = Decimal::ZERO;
    let mut fees = Decimal::ZERO;
    for trade in trades {
        if trade.pnl > Decimal::ZERO {
            wins += 1;
        } else {
            losses += 1;
        }
        gross += trade.pnl + trade.fees;
        fees += trade.fees;
    }
    let net: Decimal = gross - fees;
    let total = wins + losses;
    let win_rate = if total > 0 {
        Decimal::from(wins) / Decimal::from(total)
    } else {
        Decimal::ZERO
    };
    let expectancy = if total > 0 {
        net / Decimal::from(total)
    } else {
        Decimal::ZERO
    };
    (wins, losses, gross, fees, win_rate, expectancy)
}

#[async_trait]
impl JobHandler for DailySnapshotJob {
    async fn run(&self) -> Result<()> {
        let now = self.clock.now();
        let local_date = now.with_timezone(&self.tz).date_naive();
        let day_start = self
            .tz
            .from_local_datetime(&local_date.and_hms_opt(0, 0, 0).unwrap_or_default())
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        let trades = self.trade_store.trades_between(day_start, now).await?;
        let (wins, losses, gross, fees, win_rate, expectancy) = rollup(&trades);

        let prices = self.market.price_map().await;
        let (portfolio_value, cash) = {
            let portfolio = self.portfolio.read().await;
            (portfolio.total_value(&prices), portfolio.cash)
        };
        let risk_state = self.risk.snapshot().await;
        let identity = self.identity.read().await.clone();

        self.performance_store
            .record_daily(&DailyPerformance {
                date: local_date,
                portfolio_value,
                cash,
                total_trades: trades.len() as u32,
                wins,
                losses,
                gross_pnl: money::quantize(gross),
                net_pnl: money::quantize(gross - fees),
                fees_total: money::quantize(fees),
                max_drawdown_pct: risk_state.drawdown_pct,
                win_rate: money::quantize(win_rate),
                expectancy: money::quantize(expectancy),
                strategy_version: identity.version,
            })
            .await?;
        self.performance_store.record_risk_snapshot(&risk_state).await?;
        self.performance_store
            .record_portfolio_snapshot(&PortfolioSnapshot {
                ts: now,
                cash,
                total_value: portfolio_value,
            })
            .await?;

        info!(
            "DailySnapshotJob: {} journaled (value {}, {} trades, win rate {})",
            local_date,
            portfolio_value,
            trades.len(),
            win_rate
        );
        Ok(())
    }
}

/// Refresh maker/taker tiers from the exchange. On failure the previous
/// tier stands (falling back further to configured overrides at startup).
pub struct FeeRefreshJob {
    adapter: Arc<dyn crate::infrastructure::exchange::ExchangeAdapter>,
    fee_tier: Arc<RwLock<FeeSchedule>>,
}

impl FeeRefreshJob {
    pub fn new(
        adapter: Arc<dyn crate::infrastructure::exchange::ExchangeAdapter>,
        fee_tier: Arc<RwLock<FeeSchedule>>,
    ) -> Self {
        Self { adapter, fee_tier }
    }
}

#[async_trait]
impl JobHandler for FeeRefreshJob {
    async fn run(&self) -> Result<()> {
        match self.adapter.fee_schedule().await {
            Ok(fresh) => {
                let mut tier = self.fee_tier.write().await;
                if *tier != fresh {
                    info!(
                        "FeeRefreshJob: tier updated (maker {}, taker {})",
                        fresh.maker, fresh.taker
                    );
                }
                *tier = fresh;
            }
            Err(e) => {
                warn!("FeeRefreshJob: fee query unavailable, keeping previous tier: {}", e);
            }
        }
        Ok(())
    }
}

//! Engine bootstrap and lifecycle. Wires the adapters, persistence, risk
//! engine, strategy host and scheduler together; owns startup
//! reconciliation and the ordered shutdown sequence. Open positions are
//! deliberately preserved across restarts.

use crate::application::clock::{SharedClock, SystemClock};
use crate::application::executor::{Executor, FillNotice};
use crate::application::market_state::MarketState;
use crate::application::monitor::PositionMonitor;
use crate::application::performance::{DailySnapshotJob, FeeRefreshJob};
use crate::application::reconciler::Reconciler;
use crate::application::risk::RiskEngine;
use crate::application::scheduler::{Cadence, JobHandler, Scheduler};
use crate::application::strategy::{PortfolioView, StrategyHost, indicators};
use crate::config::{Config, Mode};
use crate::domain::events::{EngineEvent, LoggingListener};
use crate::domain::fees::FeeSchedule;
use crate::domain::portfolio::{CloseReason, Portfolio};
use crate::domain::repositories::{OrderStore, PerformanceStore, ScanSnapshot, ScanStore};
use crate::domain::risk::RiskState;
use crate::domain::signal::Signal;
use crate::domain::types::{MarketEvent, OrderStatus, SymbolMetadata, Timeframe};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::{
    ExchangeAdapter, LiveAdapter, PaperAdapter, TickerStream,
};
use crate::infrastructure::lockfile::PidLock;
use crate::infrastructure::persistence::{Database, SqliteJournal};
use anyhow::Result;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{error, info, warn};

/// Unfilled paper limit orders expire after this horizon.
const PAPER_LIMIT_HORIZON_SECS: i64 = 6 * 3600;

/// Grace window for in-flight handlers at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Warmup candle depth per tier (first scan), then incremental refresh.
const WARMUP_LIMITS: [(Timeframe, usize, usize); 3] = [
    (Timeframe::M5, 1000, 24),
    (Timeframe::H1, 720, 6),
    (Timeframe::D1, 1000, 3),
];

pub struct Engine {
    config: Config,
    clock: SharedClock,
    events: EventBus,
    market: Arc<MarketState>,
    portfolio: Arc<RwLock<Portfolio>>,
    risk: Arc<RiskEngine>,
    executor: Arc<Executor>,
    host: Arc<StrategyHost>,
    adapter: Arc<dyn ExchangeAdapter>,
    paper: Option<Arc<PaperAdapter>>,
    live: Option<Arc<LiveAdapter>>,
    fee_tier: Arc<RwLock<FeeSchedule>>,
    journal: Arc<SqliteJournal>,
    shutdown_tx: watch::Sender<bool>,
    notice_rx: mpsc::Receiver<FillNotice>,
    fatal_rx: mpsc::Receiver<String>,
    _lock: PidLock,
}

impl Engine {
    pub async fn build(config: Config) -> Result<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        Self::build_with_clock(config, clock).await
    }

    pub async fn build_with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        let lock = PidLock::acquire(&config.data_dir)?;
        let db = Database::connect(&config.database_url()).await?;
        let journal = Arc::new(SqliteJournal::new(&db));

        let events = EventBus::new();
        events.subscribe(Arc::new(LoggingListener)).await;

        // Fee tier: configured overrides seed it; the exchange query (and
        // the 24h refresh job) supersedes them when reachable.
        let override_tier = match (config.risk.fee_override_maker, config.risk.fee_override_taker)
        {
            (Some(maker), Some(taker)) => Some(FeeSchedule::new(maker, taker)),
            _ => None,
        };
        let fee_tier = Arc::new(RwLock::new(override_tier.unwrap_or_default()));

        // The live adapter is constructed in both modes: it is the order
        // backend in live mode and the public market-data source (quotes,
        // candles, metadata) in paper mode.
        let live = Arc::new(LiveAdapter::new(
            config.exchange.api_key.clone(),
            config.exchange.api_secret.clone(),
            config.exchange.base_url.clone(),
        ));

        if let Ok(fresh) = live.fee_schedule().await {
            *fee_tier.write().await = fresh;
        } else if override_tier.is_none() {
            warn!("Engine: fee query unavailable and no overrides set, using default tier");
        }

        let metadata = Self::resolve_metadata(&config, live.as_ref()).await;
        let tradable: HashSet<String> = metadata.keys().cloned().collect();
        for symbol in &config.symbols {
            if !tradable.contains(symbol) {
                warn!(
                    "Engine: symbol {} has no usable lot step, refusing to trade it",
                    symbol
                );
            }
        }

        let (adapter, paper): (Arc<dyn ExchangeAdapter>, Option<Arc<PaperAdapter>>) =
            match config.mode {
                Mode::Live => (live.clone() as Arc<dyn ExchangeAdapter>, None),
                Mode::Paper => {
                    let paper = Arc::new(
                        PaperAdapter::new(
                            config.paper_balance_usd,
                            Arc::clone(&fee_tier),
                            metadata.values().cloned().collect(),
                            PAPER_LIMIT_HORIZON_SECS,
                        )
                        .with_market_source(live.clone() as Arc<dyn ExchangeAdapter>),
                    );
                    (paper.clone() as Arc<dyn ExchangeAdapter>, Some(paper))
                }
            };

        let market = Arc::new(MarketState::new(&config.symbols));
        let portfolio = Arc::new(RwLock::new(Portfolio::default()));

        let initial_risk_state = match journal.latest_risk_snapshot().await? {
            Some(state) => {
                info!(
                    "Engine: restored risk state ({}; daily pnl {}, {} trades)",
                    state.status, state.daily_pnl, state.daily_trades
                );
                state
            }
            None => {
                let now = clock.now();
                RiskState::new(
                    Decimal::ZERO,
                    now.with_timezone(&config.timezone).date_naive(),
                    now,
                )
            }
        };
        let risk = Arc::new(RiskEngine::new(
            config.risk.clone(),
            Arc::clone(&clock),
            config.timezone,
            tradable,
            initial_risk_state,
            journal.clone() as Arc<dyn PerformanceStore>,
            events.clone(),
        ));

        let (notice_tx, notice_rx) = mpsc::channel(256);
        let (fatal_tx, fatal_rx) = mpsc::channel(4);

        let executor = Arc::new(Executor::new(
            Arc::clone(&adapter),
            Arc::clone(&market),
            Arc::clone(&portfolio),
            Arc::clone(&risk),
            journal.clone(),
            journal.clone(),
            journal.clone(),
            journal.clone(),
            events.clone(),
            Arc::clone(&clock),
            Arc::clone(&fee_tier),
            metadata,
            notice_tx,
            fatal_tx,
        ));

        let host = Arc::new(
            StrategyHost::load(
                &config.strategy,
                &config.risk,
                &config.symbols,
                journal.clone(),
            )
            .await,
        );

        // Startup reconciliation: rebuild from the journal, then let the
        // exchange of record win.
        let reconciler = Reconciler::new(
            Arc::clone(&adapter),
            Arc::clone(&executor),
            Arc::clone(&portfolio),
            journal.clone(),
            journal.clone(),
            journal.clone(),
            journal.clone(),
            Arc::clone(&clock),
            config.mode == Mode::Live,
            config.paper_balance_usd,
        );
        let version = host.identity().read().await.version.clone();
        reconciler.run_startup(&version).await?;

        {
            let prices = market.price_map().await;
            let total = portfolio.read().await.total_value(&prices);
            risk.initialize_session(total).await;
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            clock,
            events,
            market,
            portfolio,
            risk,
            executor,
            host,
            adapter,
            paper,
            live: Some(live),
            fee_tier,
            journal,
            shutdown_tx,
            notice_rx,
            fatal_rx,
            _lock: lock,
        })
    }

    async fn resolve_metadata(
        config: &Config,
        live: &LiveAdapter,
    ) -> HashMap<String, SymbolMetadata> {
        match live.symbol_metadata().await {
            Ok(all) => {
                let wanted: HashSet<&String> = config.symbols.iter().collect();
                all.into_iter()
                    .filter(|m| wanted.contains(&m.symbol))
                    .map(|m| (m.symbol.clone(), m))
                    .collect()
            }
            Err(e) => {
                if config.mode == Mode::Live {
                    // Live trading without lot steps is refused per symbol;
                    // an empty map means nothing trades until metadata
                    // resolves on a later boot.
                    error!("Engine: exchange metadata unavailable in live mode: {}", e);
                    HashMap::new()
                } else {
                    info!("Engine: exchange metadata unavailable, paper defaults in effect");
                    PaperAdapter::default_metadata(&config.symbols)
                        .into_iter()
                        .map(|m| (m.symbol.clone(), m))
                        .collect()
                }
            }
        }
    }

    pub fn portfolio(&self) -> Arc<RwLock<Portfolio>> {
        Arc::clone(&self.portfolio)
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Run until ctrl-c or a fatal journal failure. Returns an error only
    /// for the fatal path so the process can exit non-zero.
    pub async fn run(mut self) -> Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();

        // Ingestion: single writer of market state; the paper simulator
        // taps the same feed for fills.
        let (quote_tx, mut quote_rx) = mpsc::channel::<MarketEvent>(1024);
        let ingest_market = Arc::clone(&self.market);
        let ingest_paper = self.paper.clone();
        let ingest_events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = quote_rx.recv().await {
                match event {
                    MarketEvent::Quote(quote) => {
                        ingest_market.apply_quote(&quote).await;
                        if let Some(paper) = &ingest_paper {
                            paper.on_quote(&quote).await;
                        }
                    }
                    MarketEvent::FeedDegraded {
                        consecutive_failures,
                    } => {
                        ingest_events
                            .publish(EngineEvent::WebsocketFeedLost {
                                consecutive_failures,
                            })
                            .await;
                    }
                    MarketEvent::FeedRestored => {
                        info!("Engine: streaming feed restored");
                    }
                }
            }
        });

        // Streaming ticker (REST fallback handled inside).
        if let Some(live) = &self.live {
            let stream = TickerStream::new(
                self.config.exchange.ws_url.clone(),
                self.config.symbols.clone(),
                quote_tx.clone(),
                live.clone() as Arc<dyn ExchangeAdapter>,
                self.config.exchange.degraded_poll_secs,
            );
            tokio::spawn(stream.run(self.shutdown_tx.subscribe()));
        }

        // Asynchronous order transitions (limit fills, expiries).
        {
            let mut updates = self.adapter.order_updates();
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                while let Ok(update) = updates.recv().await {
                    executor.on_order_update(update).await;
                }
            });
        }
        if self.config.mode == Mode::Live
            && let Some(live) = &self.live
        {
            live.spawn_fill_poller();
        }

        // Fill notices flow to the strategy after journaling.
        {
            let host = Arc::clone(&self.host);
            let mut notice_rx = std::mem::replace(&mut self.notice_rx, mpsc::channel(1).1);
            tokio::spawn(async move {
                while let Some(notice) = notice_rx.recv().await {
                    host.notify_fill(&notice).await;
                }
            });
        }

        // Jobs.
        let scan_minutes = {
            let requested = self.host.scan_interval_minutes();
            // The override clamps the strategy's requested cadence.
            self.config
                .scan_interval_minutes_override
                .map_or(requested, |clamp| requested.max(clamp))
        };
        let mut scheduler = Scheduler::new(Arc::clone(&self.clock), SHUTDOWN_GRACE);
        scheduler.register(
            "scan",
            Cadence::Every(Duration::from_secs(u64::from(scan_minutes) * 60)),
            Arc::new(ScanJob {
                config_symbols: self.config.symbols.clone(),
                market: Arc::clone(&self.market),
                adapter: Arc::clone(&self.adapter),
                portfolio: Arc::clone(&self.portfolio),
                risk: Arc::clone(&self.risk),
                host: Arc::clone(&self.host),
                executor: Arc::clone(&self.executor),
                scan_store: self.journal.clone(),
                events: self.events.clone(),
                clock: Arc::clone(&self.clock),
                warmed: AtomicBool::new(false),
            }),
        );
        scheduler.register(
            "monitor",
            Cadence::Every(Duration::from_secs(30)),
            Arc::new(PositionMonitor::new(
                Arc::clone(&self.market),
                Arc::clone(&self.portfolio),
                Arc::clone(&self.risk),
                Arc::clone(&self.executor),
                self.journal.clone(),
                self.journal.clone(),
                Arc::clone(&self.adapter),
                self.events.clone(),
                self.host.identity(),
                self.config.mode == Mode::Live,
            )),
        );
        scheduler.register(
            "daily-snapshot",
            Cadence::DailyAt {
                hour: 23,
                minute: 55,
                tz: self.config.timezone,
            },
            Arc::new(DailySnapshotJob::new(
                Arc::clone(&self.portfolio),
                Arc::clone(&self.market),
                Arc::clone(&self.risk),
                self.journal.clone(),
                self.journal.clone(),
                self.host.identity(),
                Arc::clone(&self.clock),
                self.config.timezone,
            )),
        );
        scheduler.register(
            "fee-refresh",
            Cadence::Every(Duration::from_secs(24 * 3600)),
            Arc::new(FeeRefreshJob::new(
                Arc::clone(&self.adapter),
                Arc::clone(&self.fee_tier),
            )),
        );
        let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

        self.events.publish(EngineEvent::SystemOnline).await;
        info!(
            "Engine: online ({:?} mode, {} symbols, scan every {}m)",
            self.config.mode,
            self.config.symbols.len(),
            scan_minutes
        );

        // Wait for a shutdown cause.
        let fatal = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Engine: shutdown signal received");
                None
            }
            reason = self.fatal_rx.recv() => {
                let reason = reason.unwrap_or_else(|| "fatal channel closed".to_string());
                error!("Engine: fatal failure: {}", reason);
                self.risk.kill(&reason).await;
                Some(reason)
            }
        };

        // Ordered shutdown: stop dispatching and drain handlers first, then
        // touch the exchange, then persist strategy state. Open positions
        // stay open.
        let _ = self.shutdown_tx.send(true);
        let _ = scheduler_handle.await;

        match self.journal.open_orders().await {
            Ok(open) => {
                for order in open {
                    info!("Engine: cancelling unfilled order {} on shutdown", order.id);
                    if let Err(e) = self.adapter.cancel(&order.id, &order.symbol).await {
                        warn!("Engine: cancel {} failed: {}", order.id, e);
                    } else if let Err(e) = self
                        .journal
                        .update_status(&order.id, OrderStatus::Cancelled, None)
                        .await
                    {
                        error!("Engine: cancel journal failed: {}", e);
                    }
                }
            }
            Err(e) => error!("Engine: open order sweep failed: {}", e),
        }

        self.host.save_state().await;
        self.events.publish(EngineEvent::SystemShutdown).await;
        info!("Engine: shutdown complete");

        match fatal {
            Some(reason) => Err(anyhow::anyhow!("journal failure: {}", reason)),
            None => Ok(()),
        }
    }
}

/// One scan tick: refresh candles, snapshot the market, invoke the
/// strategy, journal per-symbol snapshots, route signals through the risk
/// gate into execution.
struct ScanJob {
    config_symbols: Vec<String>,
    market: Arc<MarketState>,
    adapter: Arc<dyn ExchangeAdapter>,
    portfolio: Arc<RwLock<Portfolio>>,
    risk: Arc<RiskEngine>,
    host: Arc<StrategyHost>,
    executor: Arc<Executor>,
    scan_store: Arc<dyn ScanStore>,
    events: EventBus,
    clock: SharedClock,
    warmed: AtomicBool,
}

impl ScanJob {
    async fn refresh_market(&self) {
        let first_scan = !self.warmed.swap(true, Ordering::AcqRel);
        join_all(
            self.config_symbols
                .iter()
                .map(|symbol| self.refresh_symbol(symbol, first_scan)),
        )
        .await;
    }

    async fn refresh_symbol(&self, symbol: &str, first_scan: bool) {
        if self.market.last_price(symbol).await.is_none() {
            match self.adapter.quote(symbol).await {
                Ok(quote) => self.market.apply_quote(&quote).await,
                Err(e) => {
                    warn!("ScanJob: no quote for {}: {}", symbol, e);
                    return;
                }
            }
        }
        for (timeframe, warmup, incremental) in WARMUP_LIMITS {
            let limit = if first_scan { warmup } else { incremental };
            match self.adapter.candles(symbol, timeframe, limit).await {
                Ok(candles) => {
                    self.market.extend_candles(symbol, timeframe, candles).await;
                }
                Err(e) => {
                    // Scan continues: missing tiers stay empty.
                    warn!("ScanJob: {} {} candles unavailable: {}", symbol, timeframe, e);
                }
            }
        }
    }

    async fn portfolio_view(&self) -> PortfolioView {
        let prices = self.market.price_map().await;
        let risk_state = self.risk.snapshot().await;
        let portfolio = self.portfolio.read().await;
        PortfolioView {
            cash: portfolio.cash,
            total_value: portfolio.total_value(&prices),
            positions: portfolio.positions.values().cloned().collect(),
            recent_trades: portfolio.recent_trades.clone(),
            daily_pnl: risk_state.daily_pnl,
            total_pnl: portfolio.total_pnl,
            fees_total: portfolio.fees_total,
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for ScanJob {
    async fn run(&self) -> Result<()> {
        let now = self.clock.now();
        self.refresh_market().await;

        let mut markets = HashMap::new();
        for symbol in &self.config_symbols {
            if let Some(data) = self.market.snapshot(symbol).await {
                markets.insert(symbol.clone(), data);
            }
        }
        if markets.is_empty() {
            warn!("ScanJob: no market data yet, skipping tick");
            return Ok(());
        }

        let view = self.portfolio_view().await;
        let identity = self.host.identity().read().await.clone();

        let signals: Vec<Signal> = match self.host.run_scan(&markets, &view, now).await {
            Ok(signals) => signals,
            Err(e) => {
                // The offending batch is dropped and journaled; the scan
                // snapshot below still lands.
                error!("ScanJob: strategy error: {}", e);
                self.events
                    .publish(EngineEvent::SystemError {
                        context: format!("strategy: {}", e),
                    })
                    .await;
                Vec::new()
            }
        };

        let regime = self.host.identity().read().await.regime.clone();
        let mut rows = Vec::with_capacity(markets.len());
        for (symbol, data) in &markets {
            let set = indicators::compute(data);
            let matched = signals.iter().find(|s| &s.symbol == symbol);
            rows.push(ScanSnapshot {
                ts: now,
                symbol: symbol.clone(),
                price: data.price,
                ema_fast: set.ema_fast,
                ema_slow: set.ema_slow,
                rsi: set.rsi,
                volume_ratio: set.volume_ratio,
                spread: data.spread,
                strategy_regime: regime.clone(),
                signal_generated: matched.is_some(),
                signal_action: matched.map(|s| s.action.as_str().to_string()),
                signal_confidence: matched.map(|s| s.confidence),
            });
        }
        self.scan_store.record(&rows).await?;

        let signal_count = signals.len();
        for signal in &signals {
            self.executor
                .handle_signal(signal, CloseReason::Signal, &identity.version, &regime)
                .await?;
        }

        // Keep valuation moving even between monitor ticks.
        let prices = self.market.price_map().await;
        let total = self.portfolio.read().await.total_value(&prices);
        self.risk.mark(total).await;

        self.events
            .publish(EngineEvent::ScanComplete {
                symbols_scanned: markets.len(),
                signals: signal_count,
            })
            .await;
        Ok(())
    }
}

//! Shared test rig: the full paper execution stack wired around an
//! ephemeral (or caller-supplied) database, no network anywhere.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::TimeZone;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tidebot::application::clock::{Clock, ManualClock, SharedClock};
use tidebot::application::executor::{Executor, FillNotice};
use tidebot::application::market_state::MarketState;
use tidebot::application::risk::RiskEngine;
use tidebot::application::strategy::StrategyIdentity;
use tidebot::config::RiskLimits;
use tidebot::domain::errors::ExchangeError;
use tidebot::domain::fees::FeeSchedule;
use tidebot::domain::portfolio::Portfolio;
use tidebot::domain::risk::RiskState;
use tidebot::domain::types::{
    Balances, Candle, ConditionalKind, ConditionalOrder, ConditionalStatus, OpenOrderInfo,
    OrderAck, OrderRequest, OrderStatusReport, OrderUpdate, Quote, SymbolMetadata, Timeframe,
};
use tidebot::infrastructure::event_bus::EventBus;
use tidebot::infrastructure::exchange::{ExchangeAdapter, PaperAdapter};
use tidebot::infrastructure::persistence::{Database, SqliteJournal};
use tokio::sync::{RwLock, broadcast, mpsc};

pub const SYMBOL: &str = "BTCUSD";

pub struct Rig {
    pub clock: Arc<ManualClock>,
    pub market: Arc<MarketState>,
    pub portfolio: Arc<RwLock<Portfolio>>,
    pub risk: Arc<RiskEngine>,
    pub executor: Arc<Executor>,
    pub paper: Arc<PaperAdapter>,
    pub journal: Arc<SqliteJournal>,
    pub fee_tier: Arc<RwLock<FeeSchedule>>,
    pub events: EventBus,
    pub identity: Arc<RwLock<StrategyIdentity>>,
    pub notice_rx: mpsc::Receiver<FillNotice>,
    pub fatal_rx: mpsc::Receiver<String>,
}

pub fn metadata() -> HashMap<String, SymbolMetadata> {
    HashMap::from([
        (
            SYMBOL.to_string(),
            SymbolMetadata {
                symbol: SYMBOL.to_string(),
                lot_step: dec!(0.00000001),
                min_notional: dec!(1),
            },
        ),
        (
            "ETHUSD".to_string(),
            SymbolMetadata {
                symbol: "ETHUSD".to_string(),
                lot_step: dec!(0.00000001),
                min_notional: dec!(1),
            },
        ),
    ])
}

pub async fn rig(cash: Decimal, limits: RiskLimits) -> Rig {
    let db = Database::connect_ephemeral().await.unwrap();
    rig_with_db(db, cash, limits).await
}

pub async fn rig_with_db(db: Database, cash: Decimal, limits: RiskLimits) -> Rig {
    let journal = Arc::new(SqliteJournal::new(&db));
    let clock = Arc::new(ManualClock::starting_at(
        chrono::Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
    ));
    let shared_clock: SharedClock = clock.clone();

    let fee_tier = Arc::new(RwLock::new(FeeSchedule::default()));
    let paper = Arc::new(PaperAdapter::new(
        cash,
        Arc::clone(&fee_tier),
        metadata().into_values().collect(),
        6 * 3600,
    ));
    let market = Arc::new(MarketState::new(&[
        SYMBOL.to_string(),
        "ETHUSD".to_string(),
    ]));
    let portfolio = Arc::new(RwLock::new(Portfolio::with_cash(cash)));
    let events = EventBus::new();

    let now = shared_clock.now();
    let risk = Arc::new(RiskEngine::new(
        limits,
        Arc::clone(&shared_clock),
        chrono_tz::UTC,
        HashSet::from([SYMBOL.to_string(), "ETHUSD".to_string()]),
        RiskState::new(cash, now.date_naive(), now),
        journal.clone(),
        events.clone(),
    ));

    let (notice_tx, notice_rx) = mpsc::channel(64);
    let (fatal_tx, fatal_rx) = mpsc::channel(4);

    let executor = Arc::new(Executor::new(
        paper.clone(),
        Arc::clone(&market),
        Arc::clone(&portfolio),
        Arc::clone(&risk),
        journal.clone(),
        journal.clone(),
        journal.clone(),
        journal.clone(),
        events.clone(),
        Arc::clone(&shared_clock),
        Arc::clone(&fee_tier),
        metadata(),
        notice_tx,
        fatal_tx,
    ));

    Rig {
        clock,
        market,
        portfolio,
        risk,
        executor,
        paper,
        journal,
        fee_tier,
        events,
        identity: Arc::new(RwLock::new(StrategyIdentity {
            version: "test-1".to_string(),
            regime: "test".to_string(),
        })),
        notice_rx,
        fatal_rx,
    }
}

impl Rig {
    /// Push one quote through the whole ingestion path (market state and
    /// paper fill simulator).
    pub async fn quote(&self, symbol: &str, price: Decimal) {
        let quote = Quote {
            symbol: symbol.to_string(),
            price,
            spread: dec!(0.5),
            volume_24h: dec!(1000),
            ts: self.clock.now().timestamp(),
        };
        self.market.apply_quote(&quote).await;
        self.paper.on_quote(&quote).await;
    }
}

/// Scripted exchange of record for reconciliation scenarios: reports
/// whatever balances and quotes the test configured, refuses order flow.
pub struct ScriptedExchange {
    pub balances: Balances,
    pub quotes: HashMap<String, Decimal>,
    update_tx: broadcast::Sender<OrderUpdate>,
}

impl ScriptedExchange {
    pub fn new(cash: Decimal, assets: &[(&str, Decimal)], quotes: &[(&str, Decimal)]) -> Self {
        let (update_tx, _) = broadcast::channel(8);
        Self {
            balances: Balances {
                cash,
                assets: assets
                    .iter()
                    .map(|(symbol, qty)| (symbol.to_string(), *qty))
                    .collect(),
            },
            quotes: quotes
                .iter()
                .map(|(symbol, price)| (symbol.to_string(), *price))
                .collect(),
            update_tx,
        }
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedExchange {
    async fn quote(&self, symbol: &str) -> Result<Quote, ExchangeError> {
        self.quotes
            .get(symbol)
            .map(|price| Quote {
                symbol: symbol.to_string(),
                price: *price,
                spread: dec!(0.5),
                volume_24h: dec!(1000),
                ts: 0,
            })
            .ok_or_else(|| ExchangeError::Unavailable {
                reason: format!("no scripted quote for {}", symbol),
            })
    }

    async fn candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(vec![])
    }

    async fn place(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        Err(ExchangeError::Rejected {
            reason: format!("scripted exchange refuses order {}", order.id),
        })
    }

    async fn cancel(&self, _order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn list_open_orders(&self) -> Result<Vec<OpenOrderInfo>, ExchangeError> {
        Ok(vec![])
    }

    async fn balances(&self) -> Result<Balances, ExchangeError> {
        Ok(self.balances.clone())
    }

    async fn symbol_metadata(&self) -> Result<Vec<SymbolMetadata>, ExchangeError> {
        Ok(metadata().into_values().collect())
    }

    async fn fee_schedule(&self) -> Result<FeeSchedule, ExchangeError> {
        Ok(FeeSchedule::default())
    }

    async fn order_status(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> Result<OrderStatusReport, ExchangeError> {
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
        Ok(None)
    }

    async fn conditional_status(
        &self,
        _id: &str,
        _symbol: &str,
    ) -> Result<ConditionalStatus, ExchangeError> {
        Ok(ConditionalStatus::Active)
    }

    async fn cancel_conditional(&self, _id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    fn order_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.update_tx.subscribe()
    }
}

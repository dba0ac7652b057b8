//! Persistence seams. Traits live here; the SQLite implementations are in
//! `infrastructure::persistence`. The store is the authoritative replica:
//! every in-memory structure must be rebuildable from these interfaces.

use crate::domain::errors::JournalError;
use crate::domain::portfolio::{ClosedTrade, OpenPosition, PositionKey};
use crate::domain::risk::RiskState;
use crate::domain::types::{ConditionalOrder, ConditionalStatus, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// Everything journaled atomically when a fill is applied: the order row
/// transition, the position upsert (or removal), the closed trade if the
/// position died, and the resulting cash snapshot. One transaction.
#[derive(Debug, Clone)]
pub struct FillJournal {
    pub order_id: String,
    pub order_status: OrderStatus,
    pub fill_price: Decimal,
    pub fee: Decimal,
    pub filled_at: DateTime<Utc>,
    pub position: PositionUpdate,
    pub closed_trade: Option<ClosedTrade>,
    pub cash_after: Decimal,
    pub total_value_after: Decimal,
}

#[derive(Debug, Clone)]
pub enum PositionUpdate {
    Upsert(OpenPosition),
    Remove(PositionKey),
    /// Reconciliation paths may journal a trade without touching positions.
    None,
}

#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub symbol: String,
    pub action: String,
    pub size_pct: Decimal,
    pub confidence: Decimal,
    pub intent: String,
    pub tag: String,
    pub reasoning: String,
    pub strategy_version: String,
    pub strategy_regime: String,
    pub acted_on: bool,
    pub rejected_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One per-symbol snapshot journaled on every scan tick, whether or not a
/// signal came out of it. The nightly orchestrator reads these.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub price: Decimal,
    pub ema_fast: Option<Decimal>,
    pub ema_slow: Option<Decimal>,
    pub rsi: Option<Decimal>,
    pub volume_ratio: Option<Decimal>,
    pub spread: Decimal,
    pub strategy_regime: String,
    pub signal_generated: bool,
    pub signal_action: Option<String>,
    pub signal_confidence: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub fill_price: Option<Decimal>,
    pub fee: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapitalEventKind {
    Deposit,
    Withdrawal,
    Mark,
}

impl CapitalEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapitalEventKind::Deposit => "deposit",
            CapitalEventKind::Withdrawal => "withdrawal",
            CapitalEventKind::Mark => "mark",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapitalEvent {
    pub ts: DateTime<Utc>,
    pub kind: CapitalEventKind,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub fees_total: Decimal,
    pub max_drawdown_pct: Decimal,
    pub win_rate: Decimal,
    pub expectancy: Decimal,
    pub strategy_version: String,
}

#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub ts: DateTime<Utc>,
    pub cash: Decimal,
    pub total_value: Decimal,
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Apply one fill to the store atomically.
    async fn journal_fill(&self, journal: &FillJournal) -> Result<(), JournalError>;
    async fn recent_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>, JournalError>;
    async fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClosedTrade>, JournalError>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn upsert(&self, position: &OpenPosition) -> Result<(), JournalError>;
    async fn remove(&self, key: &PositionKey) -> Result<(), JournalError>;
    async fn load_all(&self) -> Result<Vec<OpenPosition>, JournalError>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn record(&self, signal: &SignalRecord) -> Result<(), JournalError>;
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn record(&self, snapshots: &[ScanSnapshot]) -> Result<(), JournalError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn record(&self, order: &OrderRecord) -> Result<(), JournalError>;
    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        exchange_order_id: Option<&str>,
    ) -> Result<(), JournalError>;
    async fn open_orders(&self) -> Result<Vec<OrderRecord>, JournalError>;
}

#[async_trait]
pub trait ConditionalOrderStore: Send + Sync {
    async fn upsert(&self, order: &ConditionalOrder) -> Result<(), JournalError>;
    async fn update_status(
        &self,
        id: &str,
        status: ConditionalStatus,
    ) -> Result<(), JournalError>;
    async fn active(&self) -> Result<Vec<ConditionalOrder>, JournalError>;
}

#[async_trait]
pub trait PerformanceStore: Send + Sync {
    async fn record_daily(&self, row: &DailyPerformance) -> Result<(), JournalError>;
    async fn record_capital_event(&self, event: &CapitalEvent) -> Result<(), JournalError>;
    async fn capital_events(&self) -> Result<Vec<CapitalEvent>, JournalError>;
    async fn record_risk_snapshot(&self, state: &RiskState) -> Result<(), JournalError>;
    async fn latest_risk_snapshot(&self) -> Result<Option<RiskState>, JournalError>;
    async fn record_portfolio_snapshot(
        &self,
        snapshot: &PortfolioSnapshot,
    ) -> Result<(), JournalError>;
    async fn latest_portfolio_snapshot(&self)
        -> Result<Option<PortfolioSnapshot>, JournalError>;
}

#[async_trait]
pub trait StrategyStateStore: Send + Sync {
    async fn save(
        &self,
        strategy_version: &str,
        blob: &serde_json::Value,
    ) -> Result<(), JournalError>;
    /// Most recent blob for a version, or the most recent of any version
    /// when `strategy_version` is None (fallback path).
    async fn load(
        &self,
        strategy_version: Option<&str>,
    ) -> Result<Option<(String, serde_json::Value)>, JournalError>;
}

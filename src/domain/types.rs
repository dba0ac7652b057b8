use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(OrderStatus::Open),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "expired" => Ok(OrderStatus::Expired),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Candle timeframes the engine ingests. The three tiers map to the
/// strategy input windows (~30d of 5m, ~1y of 1h, ~7y of 1d).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    H1,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::M5, Timeframe::H1, Timeframe::D1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M5 => 300,
            Timeframe::H1 => 3600,
            Timeframe::D1 => 86400,
        }
    }

    /// How many candles of this timeframe the market state retains.
    pub fn retention(&self) -> usize {
        match self {
            Timeframe::M5 => 8_640,  // ~30 days
            Timeframe::H1 => 8_760,  // ~1 year
            Timeframe::D1 => 2_556,  // ~7 years
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Timeframe::M5),
            "1h" => Ok(Timeframe::H1),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

/// OHLCV bucket. `ts` is the bucket start, UTC epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timeframe: Timeframe,
}

impl Candle {
    /// `low <= open, close <= high` must hold for any candle the engine accepts.
    pub fn is_coherent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

/// Latest observed market quote for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub spread: Decimal,
    pub volume_24h: Decimal,
    pub ts: i64,
}

/// Events emitted by the market data feed.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Quote(Quote),
    /// The streaming ticker dropped and the feed degraded to REST polling.
    FeedDegraded { consecutive_failures: u32 },
    /// Streaming resumed after a degrade.
    FeedRestored,
}

/// An order request as handed to the exchange adapter.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Terminal fill information for an order, as reported by the exchange
/// (or synthesized by the paper simulator).
#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub order_id: String,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty_filled: Decimal,
    pub avg_fill_price: Decimal,
    pub fee: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// Result of submitting an order: market orders typically come back
/// `Filled` immediately, resting limit orders come back `Accepted` and
/// fill later through the adapter's fill stream.
#[derive(Debug, Clone)]
pub enum OrderAck {
    Filled(FillReport),
    Accepted { exchange_order_id: String },
}

/// Asynchronous order state transition, delivered on the adapter's update
/// stream. Limit fills, expirations and cancellations arrive this way, in
/// fill-completion order, not submission order.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub fill: Option<FillReport>,
}

/// A resting order as reported by `list_open_orders`.
#[derive(Debug, Clone)]
pub struct OpenOrderInfo {
    pub order_id: String,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Terminal-state lookup used by reconciliation.
#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub fill: Option<FillReport>,
}

/// Per-symbol trading rules fetched from exchange metadata at startup.
/// Symbols without a known lot step are refused at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMetadata {
    pub symbol: String,
    pub lot_step: Decimal,
    pub min_notional: Decimal,
}

/// Account balances as reported by the exchange of record.
#[derive(Debug, Clone, Default)]
pub struct Balances {
    pub cash: Decimal,
    /// Base-asset quantity per symbol, e.g. "BTCUSD" -> BTC held.
    pub assets: std::collections::HashMap<String, Decimal>,
}

/// Exchange-side conditional order mirroring a position's stop or target,
/// kept so enforcement survives process downtime (live mode only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub id: String,
    pub symbol: String,
    pub tag: String,
    pub kind: ConditionalKind,
    pub trigger_price: Decimal,
    pub status: ConditionalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalKind {
    StopLoss,
    TakeProfit,
}

impl ConditionalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionalKind::StopLoss => "stop_loss",
            ConditionalKind::TakeProfit => "take_profit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalStatus {
    Active,
    Filled,
    Cancelled,
}

impl ConditionalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionalStatus::Active => "active",
            ConditionalStatus::Filled => "filled",
            ConditionalStatus::Cancelled => "cancelled",
        }
    }
}

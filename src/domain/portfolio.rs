use crate::domain::money;
use crate::domain::signal::Intent;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Position identity. A symbol may hold several simultaneous positions
/// distinguished by tag ("core", "swing", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub tag: String,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.symbol, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Signal,
    StopLoss,
    TakeProfit,
    Emergency,
    Reconciliation,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Signal => "signal",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Emergency => "emergency",
            CloseReason::Reconciliation => "reconciliation",
        }
    }
}

impl std::str::FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(CloseReason::Signal),
            "stop_loss" => Ok(CloseReason::StopLoss),
            "take_profit" => Ok(CloseReason::TakeProfit),
            "emergency" => Ok(CloseReason::Emergency),
            "reconciliation" => Ok(CloseReason::Reconciliation),
            other => Err(format!("unknown close reason: {}", other)),
        }
    }
}

/// A long spot position. Created on first buy with a tag, averaged into by
/// further buys, reduced by sells, destroyed at qty zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub tag: String,
    pub qty: Decimal,
    pub avg_entry: Decimal,
    pub opened_at: DateTime<Utc>,
    pub intent: Intent,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Max adverse excursion: worst unrealized percentage observed while
    /// open. Never positive.
    pub mae_pct: Decimal,
    /// Fees accumulated on the entry legs, carried into pnl at close.
    pub entry_fees: Decimal,
}

impl OpenPosition {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.tag.clone())
    }

    /// Merge an additional buy fill: qty-weighted average entry.
    pub fn apply_buy(&mut self, qty: Decimal, price: Decimal, fee: Decimal) {
        let total_qty = self.qty + qty;
        if total_qty > Decimal::ZERO {
            self.avg_entry =
                money::quantize((self.qty * self.avg_entry + qty * price) / total_qty);
        }
        self.qty = money::quantize(total_qty);
        self.entry_fees = money::quantize(self.entry_fees + fee);
    }

    /// Reduce quantity on a sell. `avg_entry` is unchanged; entry fees are
    /// released proportionally and returned so the closing leg can charge
    /// them against pnl.
    pub fn apply_sell(&mut self, qty: Decimal) -> Decimal {
        let sold_share = if self.qty > Decimal::ZERO {
            (qty / self.qty).min(Decimal::ONE)
        } else {
            Decimal::ONE
        };
        let released_fees = money::quantize(self.entry_fees * sold_share);
        self.entry_fees = money::quantize(self.entry_fees - released_fees);
        self.qty = money::quantize(self.qty - qty).max(Decimal::ZERO);
        released_fees
    }

    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Decimal {
        if self.avg_entry.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.avg_entry) / self.avg_entry
    }

    /// Track the worst unrealized drawdown seen so far.
    pub fn update_mae(&mut self, current_price: Decimal) {
        let unrealized = self.unrealized_pnl_pct(current_price);
        if unrealized < self.mae_pct {
            self.mae_pct = unrealized;
        }
    }

    pub fn notional(&self, current_price: Decimal) -> Decimal {
        self.qty * current_price
    }
}

/// Immutable record of a completed round trip, journaled when a position's
/// quantity reaches zero (or is zeroed by reconciliation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: String,
    pub symbol: String,
    pub tag: String,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub fees: Decimal,
    pub intent: Intent,
    pub strategy_version: String,
    pub strategy_regime: String,
    pub close_reason: CloseReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub mae_pct: Decimal,
}

/// The authoritative in-memory portfolio. A cache over persistence: every
/// mutation is journaled before being acknowledged, and the whole structure
/// is rebuildable from the store on startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Portfolio {
    pub cash: Decimal,
    pub positions: HashMap<PositionKey, OpenPosition>,
    pub recent_trades: Vec<ClosedTrade>,
    pub fees_total: Decimal,
    pub total_pnl: Decimal,
}

/// How many closed trades the in-memory view retains.
pub const RECENT_TRADES_CAP: usize = 100;

impl Portfolio {
    pub fn with_cash(cash: Decimal) -> Self {
        Self {
            cash,
            ..Default::default()
        }
    }

    /// Mark-to-market value: cash plus every position at its latest price.
    /// Positions without a quote fall back to average entry.
    pub fn total_value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let mut value = self.cash;
        for position in self.positions.values() {
            let price = prices
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.avg_entry);
            value += position.qty * price;
        }
        money::quantize(value)
    }

    pub fn position(&self, key: &PositionKey) -> Option<&OpenPosition> {
        self.positions.get(key)
    }

    pub fn record_closed_trade(&mut self, trade: ClosedTrade) {
        self.total_pnl = money::quantize(self.total_pnl + trade.pnl);
        self.recent_trades.push(trade);
        if self.recent_trades.len() > RECENT_TRADES_CAP {
            let excess = self.recent_trades.len() - RECENT_TRADES_CAP;
            self.recent_trades.drain(..excess);
        }
    }
}

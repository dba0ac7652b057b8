//! Strategy contract and host. The engine treats the strategy as a black
//! box behind this trait: it receives the IO contract values (markets,
//! portfolio view, the authoritative `now`) and returns signal batches.
//! No network, no filesystem, no wall clock.

pub mod host;
pub mod indicators;
pub mod momentum;
pub mod process;
pub mod purity;

pub use host::StrategyHost;

use crate::application::executor::FillNotice;
use crate::application::market_state::SymbolData;
use crate::config::RiskLimits;
use crate::domain::errors::StrategyError;
use crate::domain::portfolio::{ClosedTrade, OpenPosition};
use crate::domain::signal::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the strategy is told about the book. A snapshot, serializable so
/// the subprocess host can ship it over the line protocol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioView {
    pub cash: Decimal,
    pub total_value: Decimal,
    pub positions: Vec<OpenPosition>,
    pub recent_trades: Vec<ClosedTrade>,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub fees_total: Decimal,
}

impl PortfolioView {
    pub fn position(&self, symbol: &str, tag: &str) -> Option<&OpenPosition> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.tag == tag)
    }
}

/// Version and regime the currently loaded strategy reports. Shared with
/// the monitor and the snapshot job so journaled rows carry attribution.
#[derive(Debug, Clone, Default)]
pub struct StrategyIdentity {
    pub version: String,
    pub regime: String,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> String;
    /// Regime label after the most recent analyze.
    fn regime(&self) -> String;
    fn scan_interval_minutes(&self) -> u32 {
        5
    }

    async fn initialize(
        &mut self,
        limits: &RiskLimits,
        symbols: &[String],
    ) -> Result<(), StrategyError>;

    /// One scan tick. `now` is authoritative; implementations never read
    /// the wall clock.
    async fn analyze(
        &mut self,
        markets: &HashMap<String, SymbolData>,
        portfolio: &PortfolioView,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StrategyError>;

    async fn on_fill(&mut self, notice: &FillNotice);

    async fn on_position_closed(
        &mut self,
        symbol: &str,
        tag: &str,
        pnl: Decimal,
        pnl_pct: Decimal,
    );

    async fn get_state(&mut self) -> Result<serde_json::Value, StrategyError>;

    async fn load_state(&mut self, blob: &serde_json::Value) -> Result<(), StrategyError>;
}

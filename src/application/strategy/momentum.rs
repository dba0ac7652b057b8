//! Built-in EMA-crossover momentum strategy. The compiled-in default and
//! the fallback target when a deployed strategy fails to load.

use crate::application::executor::FillNotice;
use crate::application::market_state::SymbolData;
use crate::application::strategy::indicators::{self, IndicatorSet};
use crate::application::strategy::{PortfolioView, Strategy};
use crate::config::RiskLimits;
use crate::domain::errors::StrategyError;
use crate::domain::money;
use crate::domain::signal::{Intent, Signal, SignalAction};
use crate::domain::types::OrderType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const VERSION: &str = "momentum-1.3.0";
const TAG: &str = "core";

/// Per-symbol carry-over between scans, persisted through get_state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SymbolMemory {
    /// Sign of (ema_fast - ema_slow) at the previous scan.
    prev_diff_sign: i8,
    /// Cooldown: no re-entry until this timestamp.
    reentry_after: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MomentumState {
    memory: HashMap<String, SymbolMemory>,
}

pub struct MomentumStrategy {
    state: MomentumState,
    trade_pct: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
    regime: String,
    /// Re-entry cooldown after an exit, seconds.
    cooldown_secs: i64,
}

impl MomentumStrategy {
    pub fn new() -> Self {
        Self {
            state: MomentumState::default(),
            trade_pct: dec!(0.05),
            stop_loss_pct: dec!(0.03),
            take_profit_pct: dec!(0.06),
            regime: "warmup".to_string(),
            cooldown_secs: 3600,
        }
    }

    fn classify_regime(set: &IndicatorSet) -> &'static str {
        match (set.ema_fast, set.ema_slow) {
            (Some(fast), Some(slow)) if slow > Decimal::ZERO => {
                let divergence = (fast - slow) / slow;
                if divergence > dec!(0.002) {
                    "trending_up"
                } else if divergence < dec!(-0.002) {
                    "trending_down"
                } else {
                    "ranging"
                }
            }
            _ => "warmup",
        }
    }

    fn entry_signal(&self, symbol: &str, price: Decimal, set: &IndicatorSet) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            action: SignalAction::Buy,
            size_pct: self.trade_pct,
            order_type: OrderType::Market,
            limit_price: None,
            stop_loss: Some(money::quantize(price * (Decimal::ONE - self.stop_loss_pct))),
            take_profit: Some(money::quantize(price * (Decimal::ONE + self.take_profit_pct))),
            intent: Intent::Swing,
            tag: TAG.to_string(),
            confidence: set
                .volume_ratio
                .map_or(dec!(0.6), |ratio| (dec!(0.5) + ratio / dec!(10)).min(dec!(0.9))),
            reasoning: format!(
                "ema {} crossed above {} with rsi {}",
                set.ema_fast.unwrap_or_default(),
                set.ema_slow.unwrap_or_default(),
                set.rsi.unwrap_or_default()
            ),
        }
    }

    fn exit_signal(&self, symbol: &str, reason: String) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            action: SignalAction::Close,
            size_pct: Decimal::ONE,
            order_type: OrderType::Market,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            intent: Intent::Swing,
            tag: TAG.to_string(),
            confidence: dec!(0.7),
            reasoning: reason,
        }
    }
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for MomentumStrategy {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn version(&self) -> String {
        VERSION.to_string()
    }

    fn regime(&self) -> String {
        self.regime.clone()
    }

    async fn initialize(
        &mut self,
        limits: &RiskLimits,
        symbols: &[String],
    ) -> Result<(), StrategyError> {
        self.trade_pct = limits.default_trade_pct;
        self.stop_loss_pct = limits.default_stop_loss_pct;
        self.take_profit_pct = limits.default_take_profit_pct;
        for symbol in symbols {
            self.state.memory.entry(symbol.clone()).or_default();
        }
        Ok(())
    }

    async fn analyze(
        &mut self,
        markets: &HashMap<String, SymbolData>,
        portfolio: &PortfolioView,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StrategyError> {
        let mut signals = Vec::new();
        let mut regimes: Vec<&'static str> = Vec::new();

        for (symbol, data) in markets {
            let set = indicators::compute(data);
            regimes.push(Self::classify_regime(&set));

            let (Some(fast), Some(slow), Some(rsi)) = (set.ema_fast, set.ema_slow, set.rsi)
            else {
                continue;
            };

            let diff_sign: i8 = if fast > slow { 1 } else { -1 };
            let (prev_sign, reentry_after) = {
                let memory = self.state.memory.entry(symbol.clone()).or_default();
                let prev = memory.prev_diff_sign;
                memory.prev_diff_sign = diff_sign;
                (prev, memory.reentry_after)
            };

            let holding = portfolio.position(symbol, TAG).is_some();
            let crossed_up = prev_sign <= 0 && diff_sign > 0;
            let crossed_down = prev_sign >= 0 && diff_sign < 0;

            if holding && crossed_down {
                if let Some(memory) = self.state.memory.get_mut(symbol) {
                    memory.reentry_after = now.timestamp() + self.cooldown_secs;
                }
                signals.push(self.exit_signal(
                    symbol,
                    format!("ema {} crossed below {}", fast, slow),
                ));
            } else if !holding
                && crossed_up
                && rsi < dec!(70)
                && now.timestamp() >= reentry_after
            {
                signals.push(self.entry_signal(symbol, data.price, &set));
            } else {
                debug!(
                    "MomentumStrategy: {} no action (sign {} -> {}, rsi {})",
                    symbol, prev_sign, diff_sign, rsi
                );
            }
        }

        // Majority regime across scanned symbols.
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for regime in regimes {
            *counts.entry(regime).or_default() += 1;
        }
        self.regime = counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(regime, _)| regime)
            .unwrap_or("warmup")
            .to_string();

        Ok(signals)
    }

    async fn on_fill(&mut self, _notice: &FillNotice) {}

    async fn on_position_closed(
        &mut self,
        symbol: &str,
        _tag: &str,
        pnl: Decimal,
        _pnl_pct: Decimal,
    ) {
        // After a losing exit, hold back longer before re-entering.
        if pnl < Decimal::ZERO
            && let Some(memory) = self.state.memory.get_mut(symbol)
        {
            memory.reentry_after += self.cooldown_secs;
        }
    }

    async fn get_state(&mut self) -> Result<serde_json::Value, StrategyError> {
        serde_json::to_value(&self.state)
            .map_err(|e| StrategyError::BadState(e.to_string()))
    }

    async fn load_state(&mut self, blob: &serde_json::Value) -> Result<(), StrategyError> {
        self.state = serde_json::from_value(blob.clone())
            .map_err(|e| StrategyError::BadState(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Candle, Timeframe};

    fn market(closes: &[i64]) -> HashMap<String, SymbolData> {
        let data = SymbolData {
            price: Decimal::from(*closes.last().unwrap()),
            candles_5m: closes
                .iter()
                .enumerate()
                .map(|(i, close)| Candle {
                    ts: i as i64 * 300,
                    open: Decimal::from(*close),
                    high: Decimal::from(*close + 1),
                    low: Decimal::from(*close - 1),
                    close: Decimal::from(*close),
                    volume: dec!(10),
                    timeframe: Timeframe::M5,
                })
                .collect(),
            ..Default::default()
        };
        HashMap::from([("BTCUSD".to_string(), data)])
    }

    async fn ready_strategy() -> MomentumStrategy {
        let mut strategy = MomentumStrategy::new();
        strategy
            .initialize(&RiskLimits::default(), &["BTCUSD".to_string()])
            .await
            .unwrap();
        strategy
    }

    #[tokio::test]
    async fn cross_up_emits_buy_with_protection() {
        let mut strategy = ready_strategy().await;
        let portfolio = PortfolioView::default();

        // downtrend first so the fast ema sits below the slow one
        let mut closes: Vec<i64> = (0..40).map(|i| 200 - i).collect();
        strategy
            .analyze(&market(&closes), &portfolio, Utc::now())
            .await
            .unwrap();

        // choppy recovery: fast crosses above slow without pinning RSI
        let mut last = *closes.last().unwrap();
        for i in 0..30 {
            last += if i % 2 == 0 { 3 } else { -2 };
            closes.push(last);
        }
        let signals = strategy
            .analyze(&market(&closes), &portfolio, Utc::now())
            .await
            .unwrap();

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.stop_loss.unwrap() < signal.take_profit.unwrap());
        assert_eq!(signal.tag, "core");
    }

    #[tokio::test]
    async fn no_reentry_while_holding() {
        let mut strategy = ready_strategy().await;
        let mut portfolio = PortfolioView::default();
        portfolio.positions.push(crate::domain::portfolio::OpenPosition {
            symbol: "BTCUSD".to_string(),
            tag: "core".to_string(),
            qty: dec!(0.001),
            avg_entry: dec!(150),
            opened_at: Utc::now(),
            intent: Intent::Swing,
            stop_loss: None,
            take_profit: None,
            mae_pct: Decimal::ZERO,
            entry_fees: Decimal::ZERO,
        });

        let mut closes: Vec<i64> = (0..40).map(|i| 200 - i).collect();
        strategy
            .analyze(&market(&closes), &portfolio, Utc::now())
            .await
            .unwrap();
        let mut last = *closes.last().unwrap();
        for i in 0..30 {
            last += if i % 2 == 0 { 3 } else { -2 };
            closes.push(last);
        }
        let signals = strategy
            .analyze(&market(&closes), &portfolio, Utc::now())
            .await
            .unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn state_roundtrip_preserves_memory() {
        let mut strategy = ready_strategy().await;
        strategy
            .state
            .memory
            .get_mut("BTCUSD")
            .unwrap()
            .reentry_after = 12345;

        let blob = strategy.get_state().await.unwrap();
        let mut fresh = MomentumStrategy::new();
        fresh.load_state(&blob).await.unwrap();
        assert_eq!(fresh.state.memory["BTCUSD"].reentry_after, 12345);

        assert!(fresh.load_state(&serde_json::json!("garbage")).await.is_err());
    }
}

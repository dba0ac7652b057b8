use crate::domain::errors::StrategyError;
use crate::domain::types::OrderType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy's declared holding horizon. Informational to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Day,
    Swing,
    Position,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Day => "DAY",
            Intent::Swing => "SWING",
            Intent::Position => "POSITION",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY" => Ok(Intent::Day),
            "SWING" => Ok(Intent::Swing),
            "POSITION" => Ok(Intent::Position),
            other => Err(format!("unknown intent: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Close => "CLOSE",
        }
    }

    /// BUY opposes SELL/CLOSE; SELL and CLOSE point the same way.
    fn direction(&self) -> i8 {
        match self {
            SignalAction::Buy => 1,
            SignalAction::Sell | SignalAction::Close => -1,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trade request produced by the strategy. Admission is decided by the
/// risk gate; a signal carries no authority of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub size_pct: Decimal,
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    pub intent: Intent,
    pub tag: String,
    pub confidence: Decimal,
    pub reasoning: String,
}

impl Signal {
    /// Field-level contract checks: `size_pct` and `confidence` in [0, 1],
    /// limit orders carry a positive limit price.
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.size_pct < Decimal::ZERO || self.size_pct > Decimal::ONE {
            return Err(StrategyError::ContractViolation(format!(
                "{} {}: size_pct {} outside [0, 1]",
                self.symbol, self.action, self.size_pct
            )));
        }
        if self.confidence < Decimal::ZERO || self.confidence > Decimal::ONE {
            return Err(StrategyError::ContractViolation(format!(
                "{} {}: confidence {} outside [0, 1]",
                self.symbol, self.action, self.confidence
            )));
        }
        if self.order_type == OrderType::Limit
            && self.limit_price.map_or(true, |p| p <= Decimal::ZERO)
        {
            return Err(StrategyError::ContractViolation(format!(
                "{} {}: limit order without a positive limit price",
                self.symbol, self.action
            )));
        }
        Ok(())
    }
}

/// Validate one `analyze()` batch. A batch carrying two signals for the same
/// `(symbol, tag)` with opposing directions is a contract violation and is
/// rejected whole.
pub fn validate_batch(signals: &[Signal]) -> Result<(), StrategyError> {
    for signal in signals {
        signal.validate()?;
    }
    for (i, a) in signals.iter().enumerate() {
        for b in signals.iter().skip(i + 1) {
            if a.symbol == b.symbol
                && a.tag == b.tag
                && a.action.direction() != b.action.direction()
            {
                return Err(StrategyError::ContractViolation(format!(
                    "opposing signals for ({}, {}): {} vs {}",
                    a.symbol, a.tag, a.action, b.action
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(symbol: &str, tag: &str, action: SignalAction) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            action,
            size_pct: dec!(0.1),
            order_type: OrderType::Market,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            intent: Intent::Swing,
            tag: tag.to_string(),
            confidence: dec!(0.8),
            reasoning: "test".to_string(),
        }
    }

    #[test]
    fn size_pct_out_of_range_is_violation() {
        let mut s = signal("BTCUSD", "core", SignalAction::Buy);
        s.size_pct = dec!(1.2);
        assert!(s.validate().is_err());
        s.size_pct = dec!(-0.1);
        assert!(s.validate().is_err());
        s.size_pct = dec!(1);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn limit_order_requires_price() {
        let mut s = signal("BTCUSD", "core", SignalAction::Buy);
        s.order_type = OrderType::Limit;
        assert!(s.validate().is_err());
        s.limit_price = Some(dec!(50000));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn opposing_batch_rejected_whole() {
        let batch = vec![
            signal("BTCUSD", "core", SignalAction::Buy),
            signal("BTCUSD", "core", SignalAction::Close),
        ];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn distinct_tags_may_oppose() {
        let batch = vec![
            signal("BTCUSD", "core", SignalAction::Buy),
            signal("BTCUSD", "swing", SignalAction::Close),
        ];
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn sell_and_close_do_not_oppose() {
        let batch = vec![
            signal("ETHUSD", "core", SignalAction::Sell),
            signal("ETHUSD", "core", SignalAction::Close),
        ];
        assert!(validate_batch(&batch).is_ok());
    }
}

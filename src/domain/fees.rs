use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Fixed slippage applied by the paper simulator to market fills (0.05%).
pub const PAPER_SLIPPAGE_PCT: Decimal = dec!(0.0005);

/// Current maker/taker fee tier. Refreshed every 24h from the exchange;
/// falls back to configured overrides when the query is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker: Decimal,
    pub taker: Decimal,
}

impl FeeSchedule {
    pub fn new(maker: Decimal, taker: Decimal) -> Self {
        Self { maker, taker }
    }

    /// Effective cost of a complete buy-then-sell round trip, assuming taker
    /// on both legs (worst case). The risk gate compares expected moves
    /// against a multiple of this.
    pub fn round_trip(&self) -> Decimal {
        self.taker * dec!(2)
    }

    pub fn fee_for(&self, order_type: crate::domain::types::OrderType) -> Decimal {
        match order_type {
            crate::domain::types::OrderType::Market => self.taker,
            crate::domain::types::OrderType::Limit => self.maker,
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        // 0.25% maker / 0.40% taker — the conservative default tier.
        Self {
            maker: dec!(0.0025),
            taker: dec!(0.0040),
        }
    }
}

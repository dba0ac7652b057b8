use anyhow::{Result, bail};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// The risk limits document. Pure data: the risk engine evaluates against
/// these, the gate never reads config files itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskLimits {
    /// Max share of portfolio value a single position may reach.
    pub max_position_pct: Decimal,
    pub max_positions: usize,
    /// Per-trade size cap. Oversized signals are shaped down to this.
    pub max_trade_pct: Decimal,
    pub default_trade_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_daily_trades: u32,
    pub max_drawdown_pct: Decimal,
    /// Daily drop beyond this marks rollback_pending and halts.
    pub rollback_daily_loss_pct: Decimal,
    /// Consecutive losses that pause the engine. None = disabled.
    pub consecutive_losses_disable: Option<u32>,
    pub default_stop_loss_pct: Decimal,
    pub default_take_profit_pct: Decimal,
    /// Floor below which shaping rejects instead of shrinking further.
    pub min_notional_usd: Decimal,
    /// Maker/taker overrides used when the exchange fee query is
    /// unavailable.
    pub fee_override_maker: Option<Decimal>,
    pub fee_override_taker: Option<Decimal>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.25),
            max_positions: 6,
            max_trade_pct: dec!(0.10),
            default_trade_pct: dec!(0.05),
            max_daily_loss_pct: dec!(0.10),
            max_daily_trades: 20,
            max_drawdown_pct: dec!(0.20),
            rollback_daily_loss_pct: dec!(0.06),
            consecutive_losses_disable: None,
            default_stop_loss_pct: dec!(0.03),
            default_take_profit_pct: dec!(0.06),
            min_notional_usd: dec!(10),
            fee_override_maker: None,
            fee_override_taker: None,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<()> {
        let pcts = [
            ("max_position_pct", self.max_position_pct),
            ("max_trade_pct", self.max_trade_pct),
            ("default_trade_pct", self.default_trade_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("rollback_daily_loss_pct", self.rollback_daily_loss_pct),
            ("default_stop_loss_pct", self.default_stop_loss_pct),
            ("default_take_profit_pct", self.default_take_profit_pct),
        ];
        for (name, value) in pcts {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                bail!("{} must be in (0, 1], got {}", name, value);
            }
        }
        if self.default_trade_pct > self.max_trade_pct {
            bail!(
                "default_trade_pct ({}) exceeds max_trade_pct ({})",
                self.default_trade_pct,
                self.max_trade_pct
            );
        }
        if self.max_positions == 0 {
            bail!("max_positions must be at least 1");
        }
        if self.max_daily_trades == 0 {
            bail!("max_daily_trades must be at least 1");
        }
        if self.min_notional_usd < Decimal::ZERO {
            bail!("min_notional_usd must not be negative");
        }
        for (name, fee) in [
            ("fee_override_maker", self.fee_override_maker),
            ("fee_override_taker", self.fee_override_taker),
        ] {
            if let Some(fee) = fee
                && (fee < Decimal::ZERO || fee >= dec!(0.1))
            {
                bail!("{} out of range: {}", name, fee);
            }
        }
        Ok(())
    }
}

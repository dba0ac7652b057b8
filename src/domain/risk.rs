use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine trading status. HALTED admits only CLOSE signals; PAUSED is the
/// operator-reversible variant; both are left only by operator resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Running,
    Paused,
    Halted,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Running => write!(f, "RUNNING"),
            EngineStatus::Paused => write!(f, "PAUSED"),
            EngineStatus::Halted => write!(f, "HALTED"),
        }
    }
}

/// Live risk counters. Single writer (the risk engine); everyone else reads
/// cloned snapshots through a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub status: EngineStatus,
    pub halt_reason: Option<String>,
    /// Set when the daily drop breaches the rollback threshold; the external
    /// orchestrator observes it and restores the prior strategy version.
    pub rollback_pending: bool,

    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    pub consecutive_losses: u32,

    /// Portfolio value at the start of the trading day (local midnight).
    pub start_of_day_value: Decimal,
    /// High-water mark. Drawdown resets only on a new peak, never daily.
    pub peak_value: Decimal,
    pub drawdown_pct: Decimal,

    /// Local date the daily counters refer to.
    pub reference_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl RiskState {
    pub fn new(start_value: Decimal, reference_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            status: EngineStatus::Running,
            halt_reason: None,
            rollback_pending: false,
            daily_pnl: Decimal::ZERO,
            daily_trades: 0,
            consecutive_losses: 0,
            start_of_day_value: start_value,
            peak_value: start_value,
            drawdown_pct: Decimal::ZERO,
            reference_date,
            updated_at: now,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.status == EngineStatus::Halted
    }

    pub fn is_paused(&self) -> bool {
        self.status == EngineStatus::Paused
    }

    /// Daily counters reset at the local midnight boundary. Drawdown and the
    /// peak carry across days.
    pub fn roll_day(&mut self, new_date: NaiveDate, current_value: Decimal, now: DateTime<Utc>) {
        self.reference_date = new_date;
        self.daily_pnl = Decimal::ZERO;
        self.daily_trades = 0;
        self.start_of_day_value = current_value;
        self.updated_at = now;
    }

    /// Re-mark drawdown against the high-water mark.
    pub fn mark_value(&mut self, current_value: Decimal, now: DateTime<Utc>) {
        if current_value > self.peak_value {
            self.peak_value = current_value;
        }
        self.drawdown_pct = if self.peak_value > Decimal::ZERO {
            (self.peak_value - current_value) / self.peak_value
        } else {
            Decimal::ZERO
        };
        self.updated_at = now;
    }
}

/// Risk gate outcome for one signal. Halts are a state, not an error: the
/// gate returns `Rejected` with the halt reason attached.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Admitted,
    /// Size trimmed down to the per-trade cap.
    Shaped {
        size_pct: Decimal,
        shaped_from: Decimal,
    },
    Rejected { reason: String },
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Admitted | GateDecision::Shaped { .. })
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            GateDecision::Rejected { reason } => Some(reason),
            _ => None,
        }
    }

    /// Admitted size for an admitted decision, given the requested size.
    pub fn effective_size(&self, requested: Decimal) -> Decimal {
        match self {
            GateDecision::Shaped { size_pct, .. } => *size_pct,
            _ => requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn day_roll_resets_daily_but_not_drawdown() {
        let now = Utc::now();
        let mut state = RiskState::new(dec!(1000), now.date_naive(), now);
        state.mark_value(dec!(1200), now); // new peak
        state.mark_value(dec!(1080), now); // 10% off peak
        state.daily_pnl = dec!(-50);
        state.daily_trades = 7;

        state.roll_day(now.date_naive().succ_opt().unwrap(), dec!(1080), now);

        assert_eq!(state.daily_pnl, Decimal::ZERO);
        assert_eq!(state.daily_trades, 0);
        assert_eq!(state.start_of_day_value, dec!(1080));
        assert_eq!(state.peak_value, dec!(1200));
        assert_eq!(state.drawdown_pct, dec!(0.1));
    }

    #[test]
    fn drawdown_resets_on_new_peak() {
        let now = Utc::now();
        let mut state = RiskState::new(dec!(1000), now.date_naive(), now);
        state.mark_value(dec!(900), now);
        assert_eq!(state.drawdown_pct, dec!(0.1));
        state.mark_value(dec!(1100), now);
        assert_eq!(state.drawdown_pct, Decimal::ZERO);
        assert_eq!(state.peak_value, dec!(1100));
    }

    #[test]
    fn shaped_decisions_are_admitted() {
        let shaped = GateDecision::Shaped {
            size_pct: dec!(0.07),
            shaped_from: dec!(0.20),
        };
        assert!(shaped.is_admitted());
        assert_eq!(shaped.effective_size(dec!(0.20)), dec!(0.07));

        let rejected = GateDecision::Rejected {
            reason: "halted".to_string(),
        };
        assert!(!rejected.is_admitted());
        assert_eq!(rejected.rejection_reason(), Some("halted"));
    }
}
